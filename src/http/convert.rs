//! Ogg conversion handlers
//!
//! POST /ogg-to-mp3 and POST /ogg-to-wav. The request body is streamed into
//! the transcoder and its output is streamed back; neither side is buffered.

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use futures_util::StreamExt;
use std::sync::Arc;
use tracing::debug;

use crate::error::{GatewayError, Result};
use crate::state::AppState;
use crate::transcode::{AudioFormat, Conversion, ConversionOutput};

/// Only accepted request media type
pub const OGG_MIME: &str = "audio/ogg";

/// Check the request headers before any process is spawned.
///
/// Returns the declared body length.
pub fn validate_request(headers: &HeaderMap, max_body: u64) -> Result<u64> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .ok_or(GatewayError::MissingContentType)?;
    let content_type = content_type
        .to_str()
        .map_err(|_| GatewayError::InvalidContentType(format!("{:?}", content_type)))?;

    // Parameters such as `codecs=opus` are allowed
    let essence = content_type.split(';').next().unwrap_or_default().trim();
    if !essence.eq_ignore_ascii_case(OGG_MIME) {
        return Err(GatewayError::InvalidContentType(content_type.to_string()));
    }

    let content_length = headers
        .get(header::CONTENT_LENGTH)
        .ok_or(GatewayError::MissingContentLength)?;
    let content_length: u64 = content_length
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .ok_or_else(|| GatewayError::InvalidContentLength(format!("{:?}", content_length)))?;

    if content_length == 0 {
        return Err(GatewayError::EmptyBody);
    }
    if content_length > max_body {
        return Err(GatewayError::PayloadTooLarge { limit: max_body });
    }

    Ok(content_length)
}

/// Ogg to MP3 conversion
/// POST /ogg-to-mp3
pub async fn ogg_to_mp3(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response> {
    convert(state, AudioFormat::Mp3, headers, body).await
}

/// Ogg to WAV conversion
/// POST /ogg-to-wav
pub async fn ogg_to_wav(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response> {
    convert(state, AudioFormat::Wav, headers, body).await
}

async fn convert(
    state: Arc<AppState>,
    format: AudioFormat,
    headers: HeaderMap,
    body: Body,
) -> Result<Response> {
    let result = stream_conversion(&state, format, &headers, body).await;
    if let Err(e) = &result {
        state.metrics.record_error(e.kind());
    }
    result
}

async fn stream_conversion(
    state: &Arc<AppState>,
    format: AudioFormat,
    headers: &HeaderMap,
    body: Body,
) -> Result<Response> {
    let max_body = state.config.limits.max_body_bytes();
    let content_length = validate_request(headers, max_body)?;

    let conversion = Conversion::start(
        &state.config.transcoder,
        format,
        body.into_data_stream(),
        max_body,
    )?;
    let id = conversion.id();
    debug!(%id, %format, content_length, "Conversion accepted");

    let guard = state.track_conversion(&conversion);

    let body = match conversion.first_output().await? {
        ConversionOutput::Streaming { first, conversion } => {
            // The guard lives as long as the body, so the registry entry goes
            // away whether the stream completes or the client disconnects.
            let stream = conversion.into_stream(Some(first)).map(move |item| {
                let _guard = &guard;
                item
            });
            Body::from_stream(stream)
        }
        ConversionOutput::Empty => Body::empty(),
    };

    Ok(audio_response(format, id, body))
}

fn audio_response(format: AudioFormat, id: uuid::Uuid, body: Body) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(format.mime_type()),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    if let Ok(value) = HeaderValue::from_str(&id.to_string()) {
        headers.insert("x-conversion-id", value);
    }

    (StatusCode::OK, headers, body).into_response()
}
