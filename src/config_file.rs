//! Configuration file support
//!
//! Loads server configuration from TOML files. Every table except `[server]`
//! may be omitted, and optional keys fall back to the built-in defaults.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::{LimitsConfig, LogFormat, LoggingConfig, ServerConfig, TranscoderConfig};
use crate::error::{GatewayError, Result};

/// Configuration file format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Server settings
    pub server: ServerSettings,
    /// Transcoder settings
    pub transcoder: Option<TranscoderSettings>,
    /// Limits settings
    pub limits: Option<LimitsSettings>,
    /// Logging settings
    pub logging: Option<LoggingSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Host address to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Enable CORS
    pub cors_enabled: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscoderSettings {
    /// Path to the ffmpeg binary
    pub program: Option<String>,
    /// Command prefix run in front of the program
    pub launcher: Option<Vec<String>>,
    /// ffmpeg `-loglevel` value
    pub log_level: Option<String>,
    /// Size of each read from stdout in bytes
    pub read_chunk_size: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsSettings {
    /// Maximum request body size in MB
    pub max_body_mb: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: Option<String>,
}

impl ConfigFile {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| GatewayError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| GatewayError::Config(e.to_string()))?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }

    /// Generate default configuration file
    pub fn default_config() -> Self {
        let defaults = ServerConfig::default();
        Self {
            server: ServerSettings {
                host: defaults.host,
                port: defaults.port,
                cors_enabled: Some(defaults.cors_enabled),
            },
            transcoder: Some(TranscoderSettings {
                program: Some(defaults.transcoder.program),
                launcher: Some(defaults.transcoder.launcher),
                log_level: Some(defaults.transcoder.log_level),
                read_chunk_size: Some(defaults.transcoder.read_chunk_size),
            }),
            limits: Some(LimitsSettings {
                max_body_mb: Some(defaults.limits.max_body_mb),
            }),
            logging: Some(LoggingSettings {
                level: defaults.logging.level,
                format: Some("pretty".to_string()),
            }),
        }
    }

    /// Convert to ServerConfig
    pub fn into_server_config(self) -> ServerConfig {
        let transcoder_defaults = TranscoderConfig::default();
        let transcoder = match self.transcoder {
            Some(t) => TranscoderConfig {
                program: t.program.unwrap_or(transcoder_defaults.program),
                launcher: t.launcher.unwrap_or(transcoder_defaults.launcher),
                log_level: t.log_level.unwrap_or(transcoder_defaults.log_level),
                read_chunk_size: t
                    .read_chunk_size
                    .filter(|&n| n > 0)
                    .unwrap_or(transcoder_defaults.read_chunk_size),
            },
            None => transcoder_defaults,
        };

        let limits = LimitsConfig {
            max_body_mb: self
                .limits
                .and_then(|l| l.max_body_mb)
                .unwrap_or_else(|| LimitsConfig::default().max_body_mb),
        };

        let logging = match self.logging {
            Some(l) => LoggingConfig {
                format: l
                    .format
                    .as_deref()
                    .map(LogFormat::from_name)
                    .unwrap_or(LogFormat::Pretty),
                level: l.level,
            },
            None => LoggingConfig::default(),
        };

        ServerConfig {
            host: self.server.host,
            port: self.server.port,
            transcoder,
            limits,
            cors_enabled: self.server.cors_enabled.unwrap_or(true),
            logging,
        }
    }
}

/// Generate default configuration file at the specified path
pub fn generate_default_config<P: AsRef<Path>>(path: P) -> Result<()> {
    ConfigFile::default_config().to_file(path)
}

/// Load the server configuration from `path`.
///
/// A missing file yields the defaults. A file that cannot be read or parsed
/// also yields the defaults, together with the error so the caller can report
/// it once logging is up.
pub fn load_or_default<P: AsRef<Path>>(path: P) -> (ServerConfig, Option<GatewayError>) {
    let path = path.as_ref();
    if !path.exists() {
        return (ServerConfig::default(), None);
    }
    match ConfigFile::from_file(path) {
        Ok(cf) => (cf.into_server_config(), None),
        Err(e) => (ServerConfig::default(), Some(e)),
    }
}
