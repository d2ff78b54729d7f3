//! Test fixtures for conversion tests

use axum::body::Body;
use axum::http::{header, Request};
use std::sync::Arc;

use crate::config::{ServerConfig, TranscoderConfig};
use crate::state::AppState;
use crate::transcode::AudioFormat;

/// Script that copies stdin to stdout unchanged
pub const PASS_THROUGH: &str = "exec cat";

/// Transcoder configuration running `script` under `/bin/sh` in place of ffmpeg.
///
/// The fixed ffmpeg arguments still follow and are visible to the script as
/// `$1` (the program) and onwards.
pub fn script_transcoder(script: &str) -> TranscoderConfig {
    TranscoderConfig {
        program: "ffmpeg".to_string(),
        launcher: vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            script.to_string(),
            "transcoder".to_string(),
        ],
        read_chunk_size: 8 * 1024,
        ..Default::default()
    }
}

pub fn state_with_script(script: &str) -> Arc<AppState> {
    let config = ServerConfig {
        transcoder: script_transcoder(script),
        ..Default::default()
    };
    Arc::new(AppState::new(config))
}

/// Fake Ogg payload: capture pattern followed by a byte ramp
pub fn ogg_bytes(len: usize) -> Vec<u8> {
    let mut data = b"OggS".to_vec();
    data.extend((0..len.saturating_sub(4)).map(|i| (i % 251) as u8));
    data.truncate(len);
    data
}

/// A well-formed conversion request for `format`
pub fn ogg_request(format: AudioFormat, payload: Vec<u8>) -> Request<Body> {
    Request::post(format.route())
        .header(header::CONTENT_TYPE, "audio/ogg")
        .header(header::CONTENT_LENGTH, payload.len().to_string())
        .body(Body::from(payload))
        .unwrap()
}
