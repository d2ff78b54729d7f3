//! End-to-end tests for the conversion routes
//!
//! These drive the full router with a shell script standing in for ffmpeg,
//! so they run without any media tooling installed:
//! - Pass-through streaming and response headers
//! - Transcoder failures before and after the first output byte
//! - Registry and metrics bookkeeping

mod fixtures;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use futures_util::StreamExt;
use std::sync::Arc;
use tower::util::ServiceExt;

use crate::http::create_router;
use crate::state::AppState;
use crate::transcode::AudioFormat;
use fixtures::{ogg_bytes, ogg_request, state_with_script, PASS_THROUGH};

#[tokio::test]
async fn test_mp3_pass_through() {
    let state = state_with_script(PASS_THROUGH);
    let payload = ogg_bytes(100 * 1024);

    let response = create_router(state.clone())
        .oneshot(ogg_request(AudioFormat::Mp3, payload.clone()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "audio/mpeg"
    );
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL).unwrap(),
        "no-store"
    );
    assert!(response.headers().contains_key("x-conversion-id"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(body.as_ref(), payload.as_slice());

    // Body consumed and dropped: the conversion is no longer registered
    assert!(state.list_conversions().is_empty());
    let counters = state.metrics.format_counters(AudioFormat::Mp3);
    assert_eq!(counters.started, 1);
    assert_eq!(counters.succeeded, 1);
}

#[tokio::test]
async fn test_wav_content_type() {
    let state = state_with_script(PASS_THROUGH);

    let response = create_router(state)
        .oneshot(ogg_request(AudioFormat::Wav, ogg_bytes(16)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "audio/wav"
    );
}

#[tokio::test]
async fn test_receives_fixed_arguments() {
    // Echo the arguments the transcoder was started with
    let state = state_with_script("cat >/dev/null; printf '%s ' \"$@\"");

    let response = create_router(state)
        .oneshot(ogg_request(AudioFormat::Wav, ogg_bytes(16)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let args = String::from_utf8(body.to_vec()).unwrap();
    assert!(args.contains("-i pipe:0"));
    assert!(args.contains("-codec:a pcm_s16le"));
    assert!(args.contains("-f wav pipe:1"));
}

#[tokio::test]
async fn test_failure_before_output_is_500() {
    let state = state_with_script("cat >/dev/null; echo 'Invalid data found' >&2; exit 1");

    let response = create_router(state.clone())
        .oneshot(ogg_request(AudioFormat::Mp3, ogg_bytes(64)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    // stderr stays in the logs
    assert_eq!(body.as_ref(), b"Transcoding failed");

    assert_eq!(state.metrics.error_count("transcode_failed"), 1);
    assert_eq!(state.metrics.format_counters(AudioFormat::Mp3).failed, 1);
}

#[tokio::test]
async fn test_transcoder_exits_without_reading() {
    let state = state_with_script("exit 2");

    let response = create_router(state)
        .oneshot(ogg_request(AudioFormat::Mp3, ogg_bytes(1024 * 1024)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_silent_success_is_empty_200() {
    // Exits cleanly without reading a byte or writing any output
    let state = state_with_script("exit 0");

    let response = create_router(state.clone())
        .oneshot(ogg_request(AudioFormat::Wav, ogg_bytes(256 * 1024)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "audio/wav"
    );
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert!(body.is_empty());
    assert_eq!(state.metrics.format_counters(AudioFormat::Wav).succeeded, 1);
}

#[tokio::test]
async fn test_failure_after_output_aborts_body() {
    let state = state_with_script("cat >/dev/null; printf 'ID3'; exit 1");

    let response = create_router(state.clone())
        .oneshot(ogg_request(AudioFormat::Mp3, ogg_bytes(64)))
        .await
        .unwrap();

    // Headers were already sent when the failure happened
    assert_eq!(response.status(), StatusCode::OK);
    assert!(axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .is_err());
    assert_eq!(state.metrics.format_counters(AudioFormat::Mp3).failed, 1);
}

#[tokio::test]
async fn test_spawn_failure_is_500() {
    let mut config = crate::config::ServerConfig::default();
    config.transcoder.program = "/nonexistent/bin/ffmpeg".to_string();
    let state = Arc::new(AppState::new(config));

    let response = create_router(state.clone())
        .oneshot(ogg_request(AudioFormat::Wav, ogg_bytes(8)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(state.metrics.error_count("spawn"), 1);
}

#[tokio::test]
async fn test_validation_statuses() {
    let state = state_with_script(PASS_THROUGH);
    let app = create_router(state.clone());

    let cases = [
        (None, Some("4"), StatusCode::BAD_REQUEST),
        (Some("application/octet-stream"), Some("4"), StatusCode::BAD_REQUEST),
        (Some("audio/ogg"), None, StatusCode::BAD_REQUEST),
        (Some("audio/ogg"), Some("0"), StatusCode::BAD_REQUEST),
        (Some("audio/ogg"), Some("999999999999"), StatusCode::PAYLOAD_TOO_LARGE),
    ];

    for (content_type, content_length, expected) in cases {
        let mut builder = Request::post("/ogg-to-mp3");
        if let Some(ct) = content_type {
            builder = builder.header(header::CONTENT_TYPE, ct);
        }
        if let Some(cl) = content_length {
            builder = builder.header(header::CONTENT_LENGTH, cl);
        }
        let response = app
            .clone()
            .oneshot(builder.body(Body::from("OggS")).unwrap())
            .await
            .unwrap();
        assert_eq!(
            response.status(),
            expected,
            "content-type={:?} content-length={:?}",
            content_type,
            content_length
        );
    }

    // Nothing was spawned
    assert_eq!(state.metrics.format_counters(AudioFormat::Mp3).started, 0);
    assert_eq!(state.metrics.error_count("payload_too_large"), 1);
}

#[tokio::test]
async fn test_dropped_response_unregisters() {
    let state = state_with_script(PASS_THROUGH);

    // Upload that never finishes, so the transcoder stays alive
    let (tx, rx) = tokio::sync::mpsc::channel::<Result<bytes::Bytes, std::io::Error>>(4);
    tx.send(Ok(bytes::Bytes::from(ogg_bytes(32)))).await.unwrap();
    let body = Body::from_stream(tokio_stream_from(rx));

    let request = Request::post("/ogg-to-mp3")
        .header(header::CONTENT_TYPE, "audio/ogg")
        .header(header::CONTENT_LENGTH, "1000")
        .body(body)
        .unwrap();

    let response = create_router(state.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let listed = state.list_conversions();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].bytes_in, 32);

    // Client goes away
    drop(response);
    drop(tx);

    assert!(state.list_conversions().is_empty());
    assert_eq!(state.metrics.format_counters(AudioFormat::Mp3).aborted, 1);
}

#[tokio::test]
async fn test_upload_error_mid_stream_counts_as_aborted() {
    let state = state_with_script(PASS_THROUGH);

    let (tx, rx) = tokio::sync::mpsc::channel::<Result<bytes::Bytes, std::io::Error>>(4);
    tx.send(Ok(bytes::Bytes::from(ogg_bytes(8)))).await.unwrap();
    let request = Request::post("/ogg-to-mp3")
        .header(header::CONTENT_TYPE, "audio/ogg")
        .header(header::CONTENT_LENGTH, "100000")
        .body(Body::from_stream(tokio_stream_from(rx)))
        .unwrap();

    let response = create_router(state.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let mut body = response.into_body().into_data_stream();
    let first = body.next().await.unwrap().unwrap();
    assert_eq!(first.as_ref(), ogg_bytes(8).as_slice());

    // Connection reset while the response is still being streamed
    tx.send(Err(std::io::Error::new(
        std::io::ErrorKind::ConnectionReset,
        "connection reset",
    )))
    .await
    .unwrap();

    let mut failed = false;
    while let Some(item) = body.next().await {
        failed |= item.is_err();
    }
    assert!(failed);
    drop(body);

    assert!(state.list_conversions().is_empty());
    let counters = state.metrics.format_counters(AudioFormat::Mp3);
    assert_eq!(counters.aborted, 1);
    assert_eq!(counters.failed, 0);
    assert_eq!(state.metrics.active_conversions(), 0);
}

fn tokio_stream_from<T: Send + 'static>(
    mut rx: tokio::sync::mpsc::Receiver<T>,
) -> impl futures_util::Stream<Item = T> + Send {
    futures_util::stream::poll_fn(move |cx| rx.poll_recv(cx))
}
