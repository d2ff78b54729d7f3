//! Server configuration

use serde::{Deserialize, Serialize};

/// Transcoder process configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscoderConfig {
    /// Path to the ffmpeg binary
    pub program: String,

    /// Optional command prefix run in front of the program (e.g. `nice -n 10`)
    pub launcher: Vec<String>,

    /// Value passed to ffmpeg's `-loglevel`
    pub log_level: String,

    /// Size of each read from the transcoder's stdout
    pub read_chunk_size: usize,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            program: "/usr/bin/ffmpeg".to_string(),
            launcher: Vec::new(),
            log_level: "error".to_string(),
            read_chunk_size: 16 * 1024,
        }
    }
}

/// Request limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum accepted request body in megabytes
    pub max_body_mb: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self { max_body_mb: 64 }
    }
}

impl LimitsConfig {
    /// Get maximum body size in bytes
    pub fn max_body_bytes(&self) -> u64 {
        (self.max_body_mb as u64) * 1024 * 1024
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Output format (pretty, json)
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    /// Parse a format name, falling back to `Pretty` for anything unknown
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Transcoder configuration
    pub transcoder: TranscoderConfig,

    /// Request limits
    pub limits: LimitsConfig,

    /// Enable CORS
    pub cors_enabled: bool,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            transcoder: TranscoderConfig::default(),
            limits: LimitsConfig::default(),
            cors_enabled: true,
            logging: LoggingConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Get the socket address string
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Default tracing filter directive for this configuration
    pub fn log_filter(&self) -> String {
        let level = &self.logging.level;
        format!("ogg_gateway={level},tower_http={level}")
    }
}
