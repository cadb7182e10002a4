//! Pipeline tests across transport readers, configuration and observers

use std::io::Write;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tempfile::NamedTempFile;
use tokio_test::io::Builder;

use stream_engine_core::config::load_config_with_env;
use stream_engine_core::{
    AsyncReadReader, ChannelReader, ConfigSource, Diagnostic, MessageKind, RawChunk,
    ResponseBodyReader, SessionStatus, StreamEngine, TransportError, MAX_RETAINED_DIAGNOSTICS,
};

// =============================================================================
// AsyncRead transport
// =============================================================================

#[tokio::test]
async fn test_mock_body_split_mid_frame() {
    let mock = Builder::new()
        .read(b"data: {\"type\":\"thou")
        .read(b"ght\",\"content\":\"T1\"}\n\ndata: {\"type\":\"fin")
        .read(b"al\",\"content\":\"Done\"}\n\n")
        .build();
    let mut reader = AsyncReadReader::new(mock);

    let snapshot = StreamEngine::new().run(&mut reader).await;

    assert_eq!(snapshot.status, SessionStatus::Completed);
    assert_eq!(snapshot.sections.len(), 2);
    assert_eq!(snapshot.sections[0].kind, MessageKind::ThoughtStep);
    assert_eq!(snapshot.sections[1].rendered(), "Done");
}

#[tokio::test]
async fn test_mock_body_read_error() {
    let mock = Builder::new()
        .read(b"data: {\"type\":\"action\",\"content\":\"A\"}\n")
        .read_error(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "peer reset",
        ))
        .build();
    let mut reader = AsyncReadReader::new(mock);

    let snapshot = StreamEngine::new().run(&mut reader).await;

    assert_eq!(snapshot.status, SessionStatus::Errored);
    assert!(snapshot
        .error_detail
        .as_deref()
        .is_some_and(|detail| detail.starts_with("transport error: connection failed")));
    assert_eq!(snapshot.sections.len(), 1);
}

#[tokio::test]
async fn test_small_read_size_over_slice() {
    let body: &[u8] = b"data: {\"type\":\"stream\",\"content\":\"na\xc3\xafve\"}\ndata: [DONE]\n";
    let mut reader = AsyncReadReader::with_read_size(body, 3);

    let snapshot = StreamEngine::new().run(&mut reader).await;

    assert_eq!(snapshot.status, SessionStatus::Completed);
    assert_eq!(
        snapshot.section("Response").map(|s| s.rendered()),
        Some("naïve".to_string())
    );
}

// =============================================================================
// HTTP response bodies
// =============================================================================

fn http_response(status: u16, body: impl Into<reqwest::Body>) -> reqwest::Response {
    reqwest::Response::from(
        http::Response::builder()
            .status(status)
            .body(body.into())
            .unwrap(),
    )
}

#[tokio::test]
async fn test_http_body_runs_to_completion() {
    let body = reqwest::Body::wrap_stream(futures::stream::iter(vec![
        Ok::<_, std::io::Error>("data: {\"type\":\"status\",\"content\":\"Go\"}\n\nda"),
        Ok("ta: {\"type\":\"action\",\"content\":\"Fetch\"}\n\n"),
        Ok("data: {\"type\":\"final\",\"content\":\"Done\"}\n\n"),
    ]));
    let mut reader = ResponseBodyReader::new(http_response(200, body));

    let snapshot = StreamEngine::new().run(&mut reader).await;

    assert_eq!(snapshot.status, SessionStatus::Completed);
    assert_eq!(snapshot.progress, 100);
    assert_eq!(snapshot.latest_status.as_deref(), Some("Go"));
    assert_eq!(
        snapshot.section("Actions").map(|s| s.rendered()),
        Some("Fetch".to_string())
    );
    assert_eq!(
        snapshot.section("Final Answer").map(|s| s.rendered()),
        Some("Done".to_string())
    );
}

#[tokio::test]
async fn test_http_error_status_errors_session() {
    let mut reader = ResponseBodyReader::new(http_response(502, "upstream down"));

    let snapshot = StreamEngine::new().run(&mut reader).await;

    assert_eq!(snapshot.status, SessionStatus::Errored);
    assert!(snapshot.sections.is_empty());
    assert_eq!(
        snapshot.error_detail.as_deref(),
        Some("transport error: unexpected HTTP status 502")
    );
}

// =============================================================================
// Malformed input
// =============================================================================

#[test]
fn test_invalid_utf8_line_is_skipped() {
    let mut engine = StreamEngine::new();
    engine.push_chunk(b"data: {\"type\":\"thought\",\"content\":\"ab\xff\xfecd\"}\n");
    engine.push_chunk(b"data: {\"type\":\"thought\",\"content\":\"ok\"}\n");

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.diagnostics.total(), 1);
    assert!(matches!(
        &snapshot.diagnostics[0],
        Diagnostic::FrameParse { reason, .. } if reason.starts_with("invalid UTF-8")
    ));
    assert_eq!(
        snapshot.section("Thinking").map(|s| s.rendered()),
        Some("ok".to_string())
    );
}

#[tokio::test]
async fn test_malformed_flood_shares_snapshot_state() {
    let (tx, mut reader) = ChannelReader::channel(4);
    let engine = StreamEngine::new();
    let mut updates = engine.subscribe().unwrap();
    let run = tokio::spawn(async move { engine.run(&mut reader).await });

    let flood = "data: not-json\n".repeat(10_000);
    tx.send(Ok(RawChunk::from(flood))).await.unwrap();
    updates.changed().await.unwrap();
    let first = updates.borrow_and_update().clone();

    tx.send(Ok(RawChunk::from("data: also-not-json\n")))
        .await
        .unwrap();
    updates.changed().await.unwrap();
    let second = updates.borrow_and_update().clone();

    assert_eq!(first.diagnostics.total(), 10_000);
    assert_eq!(first.diagnostics.len(), MAX_RETAINED_DIAGNOSTICS);
    assert_eq!(second.diagnostics.total(), 10_001);
    assert_eq!(second.diagnostics.len(), MAX_RETAINED_DIAGNOSTICS);
    assert!(matches!(
        second.diagnostics.last(),
        Some(Diagnostic::FrameParse { excerpt, .. }) if excerpt == "also-not-json"
    ));

    drop(tx);
    let snapshot = run.await.unwrap();
    assert_eq!(snapshot.status, SessionStatus::Errored);
}

// =============================================================================
// Observers
// =============================================================================

#[tokio::test]
async fn test_observers_see_every_stage() {
    let engine = StreamEngine::new();
    let mut updates = engine
        .subscribe()
        .expect("snapshot channel is on by default");
    let (tx, mut reader) = ChannelReader::channel(8);

    let run = tokio::spawn(async move { engine.run(&mut reader).await });

    tx.send(Ok(RawChunk::from(
        "data: {\"type\":\"status\",\"content\":\"Queued\"}\n",
    )))
    .await
    .unwrap();
    updates.changed().await.unwrap();
    assert_eq!(updates.borrow_and_update().status, SessionStatus::Active);

    tx.send(Ok(RawChunk::from(
        "data: {\"type\":\"action\",\"content\":\"Fetch\"}\n",
    )))
    .await
    .unwrap();
    updates.changed().await.unwrap();
    let first_section = updates.borrow_and_update().sections[0].clone();

    tx.send(Ok(RawChunk::from(
        "data: {\"type\":\"thought\",\"content\":\"Hmm\"}\n",
    )))
    .await
    .unwrap();
    updates.changed().await.unwrap();
    {
        let snapshot = updates.borrow_and_update();
        assert_eq!(snapshot.sections.len(), 2);
        assert!(std::sync::Arc::ptr_eq(&snapshot.sections[0], &first_section));
    }

    tx.send(Ok(RawChunk::from("data: [DONE]\n"))).await.unwrap();
    let final_snapshot = run.await.unwrap();

    assert_eq!(final_snapshot.status, SessionStatus::Completed);
    assert_eq!(updates.borrow().status, SessionStatus::Completed);
}

#[tokio::test]
async fn test_transport_error_through_channel() {
    let (tx, mut reader) = ChannelReader::channel(4);
    tx.send(Ok(RawChunk::from(
        "data: {\"type\":\"thought\",\"content\":\"T\"}\n",
    )))
    .await
    .unwrap();
    tx.send(Err(TransportError::HttpStatus { status: 502 }))
        .await
        .unwrap();

    let snapshot = StreamEngine::new().run(&mut reader).await;

    assert_eq!(snapshot.status, SessionStatus::Errored);
    assert_eq!(
        snapshot.error_detail.as_deref(),
        Some("transport error: unexpected HTTP status 502")
    );
}

// =============================================================================
// Idle timeout (paused clock)
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_idle_timeout_keeps_partial_sections() {
    let mut config = stream_engine_core::EngineConfig::default();
    config.idle_timeout = Some(Duration::from_secs(30));

    let (tx, mut reader) = ChannelReader::channel(4);
    tx.send(Ok(RawChunk::from(
        "data: {\"type\":\"observation\",\"content\":\"O\"}\n",
    )))
    .await
    .unwrap();

    let snapshot = StreamEngine::with_config(config).run(&mut reader).await;
    drop(tx);

    assert_eq!(snapshot.status, SessionStatus::Errored);
    assert_eq!(
        snapshot.error_detail.as_deref(),
        Some("incomplete stream: no data received within 30000 ms")
    );
    assert_eq!(snapshot.sections.len(), 1);
}

// =============================================================================
// Configuration
// =============================================================================

#[tokio::test]
async fn test_config_file_drives_engine() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(
        br#"
[progress]
ceiling = 50
action_weight = 30

[classifier.aliases]
reasoning = "thought"
"#,
    )
    .unwrap();

    let config = load_config_with_env(Some(file.path().to_path_buf()), |_| None).unwrap();
    assert_eq!(config.source(), ConfigSource::File);

    let mut engine = StreamEngine::with_config(config);
    engine.push_chunk(b"data: {\"type\":\"action\",\"content\":\"A1\"}\n");
    assert_eq!(engine.snapshot().progress, 30);
    engine.push_chunk(b"data: {\"type\":\"action\",\"content\":\"A2\"}\n");
    assert_eq!(engine.snapshot().progress, 50);

    engine.push_chunk(b"data: {\"type\":\"reasoning\",\"content\":\"R\"}\n");
    let snapshot = engine.snapshot();
    assert!(snapshot.diagnostics.is_empty());
    assert_eq!(snapshot.sections_of(MessageKind::ThoughtStep).count(), 1);
}

#[test]
fn test_line_limit_from_config() {
    let mut config = stream_engine_core::EngineConfig::default();
    config.max_line_bytes = 64;

    let mut engine = StreamEngine::with_config(config);
    let long = format!(
        "data: {{\"type\":\"thought\",\"content\":\"{}\"}}\n",
        "x".repeat(200)
    );
    engine.push_chunk(long.as_bytes());
    engine.push_chunk(b"data: {\"type\":\"thought\",\"content\":\"short\"}\n");

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.diagnostics.len(), 1);
    assert_eq!(
        snapshot.section("Thinking").map(|s| s.rendered()),
        Some("short".to_string())
    );
}
