//! Transcoding module
//!
//! The actual audio work is done by an external ffmpeg process. This module
//! owns everything around it:
//! - The output formats and their fixed ffmpeg arguments
//! - Building the command line from the transcoder configuration
//! - Running a conversion that pipes a byte stream through the process

pub mod process;

use serde::Serialize;
use std::fmt;
use tokio::process::Command;

use crate::config::TranscoderConfig;

pub use process::{Conversion, ConversionOutput};

/// Output container produced by the transcoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Mp3,
    Wav,
}

impl AudioFormat {
    /// All supported output formats
    pub const ALL: [AudioFormat; 2] = [AudioFormat::Mp3, AudioFormat::Wav];

    /// ffmpeg muxer name (`-f`)
    pub fn muxer(self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Wav => "wav",
        }
    }

    /// ffmpeg audio encoder (`-codec:a`)
    pub fn codec(self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "libmp3lame",
            AudioFormat::Wav => "pcm_s16le",
        }
    }

    /// MIME type of the response body
    pub fn mime_type(self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "audio/mpeg",
            AudioFormat::Wav => "audio/wav",
        }
    }

    /// HTTP route serving this format
    pub fn route(self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "/ogg-to-mp3",
            AudioFormat::Wav => "/ogg-to-wav",
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.muxer())
    }
}

/// The fixed ffmpeg arguments for one conversion: read from stdin, write to stdout.
pub fn transcoder_args(format: AudioFormat, log_level: &str) -> Vec<String> {
    [
        "-hide_banner",
        "-loglevel",
        log_level,
        "-i",
        "pipe:0",
        "-codec:a",
        format.codec(),
        "-f",
        format.muxer(),
        "pipe:1",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Full argv (program first) for a conversion, including any launcher prefix.
pub fn command_line(config: &TranscoderConfig, format: AudioFormat) -> Vec<String> {
    let mut argv = Vec::with_capacity(config.launcher.len() + 11);
    argv.extend(config.launcher.iter().cloned());
    argv.push(config.program.clone());
    argv.extend(transcoder_args(format, &config.log_level));
    argv
}

/// Build the tokio `Command` for a conversion. Stdio is left to the caller.
pub fn build_command(config: &TranscoderConfig, format: AudioFormat) -> Command {
    let argv = command_line(config, format);
    let mut cmd = Command::new(&argv[0]);
    cmd.args(&argv[1..]);
    cmd
}
