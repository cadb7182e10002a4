//! Stream Engine
//!
//! Drives one session from transport to snapshot.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐  RawChunk  ┌──────────────┐  Frame  ┌────────────┐
//! │ TransportReader │ ─────────► │ FrameDecoder │ ──────► │ Classifier │
//! └─────────────────┘            └──────────────┘         └─────┬──────┘
//!         ▲                                                     │ Message
//!         │ cancel()                                            ▼
//! ┌───────┴──────┐                ┌───────────┐  snapshot ┌────────────┐
//! │ CancelHandle │                │ Projector │ ◄──────── │ Aggregator │
//! └──────────────┘                └─────┬─────┘           └────────────┘
//!                                       │ watch
//!                                       ▼
//!                                   observers
//! ```
//!
//! Consumption is strictly sequential. The only suspension point is waiting
//! for the next chunk, and that is where cancellation and the idle timeout are
//! checked. Every failure ends up as a terminal snapshot; [`StreamEngine::run`]
//! has no error path.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::aggregator::{Aggregator, SessionId, SessionStatus};
use crate::classifier::MessageClassifier;
use crate::config::EngineConfig;
use crate::decoder::{Frame, FrameDecoder};
use crate::error::{Diagnostic, Failure, TransportError};
use crate::snapshot::{Projector, SessionSnapshot};
use crate::transport::{RawChunk, TransportReader};

// ============================================================================
// Cancellation
// ============================================================================

/// Requests cancellation of a running session
///
/// Cloneable and usable from any task. Cancellation takes effect the next
/// time the engine waits for a chunk.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { tx: Arc::new(tx) }, rx)
    }

    /// Ask the engine to stop consuming
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Whether cancellation was requested
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Result of waiting for the transport
enum ReadOutcome {
    Chunk(RawChunk),
    Failed(TransportError),
    Closed,
    IdleTimeout(Duration),
    Cancelled,
}

/// Pipeline for exactly one stream session
pub struct StreamEngine {
    config: EngineConfig,
    decoder: FrameDecoder,
    classifier: MessageClassifier,
    aggregator: Aggregator,
    projector: Option<Projector>,
    published_revision: u64,
    cancel: CancelHandle,
    cancel_rx: watch::Receiver<bool>,
}

impl Default for StreamEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamEngine {
    /// Create an engine with default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Create an engine with the given configuration
    #[must_use]
    pub fn with_config(config: EngineConfig) -> Self {
        let aggregator = Aggregator::new(config.progress);
        let projector = config
            .snapshot_channel
            .then(|| Projector::new(aggregator.snapshot()));
        let (cancel, cancel_rx) = CancelHandle::new();

        Self {
            decoder: FrameDecoder::with_max_line_bytes(config.max_line_bytes),
            classifier: MessageClassifier::new(config.kind_table()),
            aggregator,
            projector,
            published_revision: 0,
            cancel,
            cancel_rx,
            config,
        }
    }

    /// Identifier of the session this engine drives
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.aggregator.session().id()
    }

    /// Current lifecycle state
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.aggregator.status()
    }

    /// Handle for cancelling the session from elsewhere
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Subscribe to snapshots, if the snapshot channel is enabled
    #[must_use]
    pub fn subscribe(&self) -> Option<watch::Receiver<SessionSnapshot>> {
        self.projector.as_ref().map(Projector::subscribe)
    }

    /// Snapshot of the current state
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.aggregator.snapshot()
    }

    /// The aggregator (read-only)
    #[must_use]
    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    /// Feed one chunk through decoder, classifier and aggregator
    pub fn push_chunk(&mut self, chunk: &[u8]) {
        for item in self.decoder.push(chunk) {
            self.process(item);
        }
        self.publish();
    }

    /// The transport ended normally
    ///
    /// Flushes a trailing unterminated line, then ends the session as errored
    /// unless a terminal message already arrived.
    pub fn end_of_stream(&mut self) {
        if let Some(item) = self.decoder.finish() {
            self.process(item);
        }
        self.aggregator.end_of_stream();
        self.publish();
    }

    /// End the session with a fatal failure
    pub fn fail(&mut self, failure: Failure) {
        self.aggregator.fail(failure);
        self.publish();
    }

    /// Cancel immediately (synchronous counterpart of [`CancelHandle`])
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        self.aggregator.cancel();
        self.publish();
    }

    fn process(&mut self, item: Result<Frame, Diagnostic>) {
        match item.and_then(|frame| self.classifier.classify(&frame)) {
            Ok(message) => {
                self.aggregator.apply(message);
            }
            Err(diagnostic) => self.aggregator.record_diagnostic(diagnostic),
        }
    }

    fn publish(&mut self) {
        let revision = self.aggregator.session().revision();
        if revision <= self.published_revision {
            return;
        }
        self.published_revision = revision;
        if let Some(projector) = &self.projector {
            projector.publish(self.aggregator.snapshot());
        }
    }

    /// Consume `reader` until the session reaches a terminal state
    ///
    /// Returns the final snapshot. Transport failures, idle timeouts, premature
    /// termination and cancellation all end in a terminal snapshot; none of
    /// them is an error for the caller.
    pub async fn run<R>(mut self, reader: &mut R) -> SessionSnapshot
    where
        R: TransportReader + ?Sized,
    {
        tracing::info!(
            session = %self.session_id(),
            reader = reader.name(),
            "Consuming stream"
        );

        let idle_timeout = self.config.idle_timeout;
        let mut cancel_rx = self.cancel_rx.clone();

        while !self.aggregator.status().is_terminal() {
            let outcome = tokio::select! {
                biased;
                () = cancelled(&mut cancel_rx) => ReadOutcome::Cancelled,
                outcome = read_next(reader, idle_timeout) => outcome,
            };

            match outcome {
                ReadOutcome::Chunk(chunk) => {
                    tracing::trace!(bytes = chunk.len(), "Chunk received");
                    self.push_chunk(chunk.as_bytes());
                }
                ReadOutcome::Failed(error) => {
                    self.fail(Failure::from(error));
                }
                ReadOutcome::Closed => {
                    self.end_of_stream();
                }
                ReadOutcome::IdleTimeout(limit) => {
                    let timeout_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX);
                    self.fail(Failure::IdleTimeout { timeout_ms });
                }
                ReadOutcome::Cancelled => {
                    self.aggregator.cancel();
                    self.publish();
                }
            }
        }

        reader.cancel();
        let snapshot = self.aggregator.snapshot();
        tracing::info!(
            session = %snapshot.session_id,
            status = %snapshot.status,
            sections = snapshot.sections.len(),
            diagnostics = snapshot.diagnostics.total(),
            "Stream finished"
        );
        snapshot
    }
}

async fn cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn read_next<R>(reader: &mut R, idle_timeout: Option<Duration>) -> ReadOutcome
where
    R: TransportReader + ?Sized,
{
    let item = match idle_timeout {
        Some(limit) => match tokio::time::timeout(limit, reader.next_chunk()).await {
            Ok(item) => item,
            Err(_) => return ReadOutcome::IdleTimeout(limit),
        },
        None => reader.next_chunk().await,
    };

    match item {
        Some(Ok(chunk)) => ReadOutcome::Chunk(chunk),
        Some(Err(error)) => ReadOutcome::Failed(error),
        None => ReadOutcome::Closed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ChannelReader, ChunkQueueReader};

    #[tokio::test]
    async fn test_run_completes_on_final() {
        let mut reader = ChunkQueueReader::from_chunks([
            "data: {\"type\":\"status\",\"content\":\"Starting\"}\n\n",
            "data: {\"type\":\"final\",\"content\":\"Done\"}\n\n",
        ]);
        let snapshot = StreamEngine::new().run(&mut reader).await;

        assert_eq!(snapshot.status, SessionStatus::Completed);
        assert_eq!(snapshot.progress, 100);
        assert_eq!(snapshot.sections.len(), 1);
    }

    #[tokio::test]
    async fn test_run_stops_reading_after_terminal() {
        let mut reader = ChunkQueueReader::from_chunks([
            "data: [DONE]\n",
            "data: {\"type\":\"thought\",\"content\":\"late\"}\n",
        ]);
        let snapshot = StreamEngine::new().run(&mut reader).await;

        assert_eq!(snapshot.status, SessionStatus::Completed);
        assert!(snapshot.sections.is_empty());
        assert_eq!(reader.remaining(), 0);
    }

    #[tokio::test]
    async fn test_run_transport_failure() {
        let mut reader = ChunkQueueReader::from_chunks([
            "data: {\"type\":\"thought\",\"content\":\"T\"}\n",
        ])
        .then_fail(TransportError::ConnectionFailed("reset".to_string()));
        let snapshot = StreamEngine::new().run(&mut reader).await;

        assert_eq!(snapshot.status, SessionStatus::Errored);
        assert_eq!(
            snapshot.error_detail.as_deref(),
            Some("transport error: connection failed: reset")
        );
        assert_eq!(snapshot.sections.len(), 1);
    }

    #[tokio::test]
    async fn test_run_unexpected_termination() {
        let mut reader =
            ChunkQueueReader::from_chunks(["data: {\"type\":\"action\",\"content\":\"A\"}\n"]);
        let snapshot = StreamEngine::new().run(&mut reader).await;

        assert_eq!(snapshot.status, SessionStatus::Errored);
        assert!(snapshot
            .error_detail
            .as_deref()
            .is_some_and(|detail| detail.starts_with("incomplete stream")));
    }

    #[tokio::test]
    async fn test_trailing_line_without_newline() {
        let mut reader = ChunkQueueReader::from_chunks([
            "data: {\"type\":\"thought\",\"content\":\"T\"}\n",
            "data: [DONE]",
        ]);
        let snapshot = StreamEngine::new().run(&mut reader).await;
        assert_eq!(snapshot.status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn test_cancel_before_run() {
        let engine = StreamEngine::new();
        let handle = engine.cancel_handle();
        handle.cancel();
        assert!(handle.is_cancelled());

        let (_tx, mut reader) = ChannelReader::channel(4);
        let snapshot = engine.run(&mut reader).await;
        assert_eq!(snapshot.status, SessionStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_while_waiting() {
        let engine = StreamEngine::new();
        let handle = engine.cancel_handle();
        let mut updates = engine.subscribe().unwrap();
        let (tx, mut reader) = ChannelReader::channel(4);

        let run = tokio::spawn(async move { engine.run(&mut reader).await });

        tx.send(Ok(RawChunk::from(
            "data: {\"type\":\"thought\",\"content\":\"partial\"}\n",
        )))
        .await
        .unwrap();
        updates.changed().await.unwrap();
        assert_eq!(updates.borrow().sections.len(), 1);

        handle.cancel();
        let snapshot = run.await.unwrap();

        assert_eq!(snapshot.status, SessionStatus::Cancelled);
        assert_eq!(snapshot.sections.len(), 1);
        assert!(!snapshot.sections[0].is_final);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout() {
        let mut config = EngineConfig::default();
        config.idle_timeout = Some(Duration::from_millis(500));
        let (_tx, mut reader) = ChannelReader::channel(4);

        let snapshot = StreamEngine::with_config(config).run(&mut reader).await;

        assert_eq!(snapshot.status, SessionStatus::Errored);
        assert_eq!(
            snapshot.error_detail.as_deref(),
            Some("incomplete stream: no data received within 500 ms")
        );
    }

    #[test]
    fn test_snapshot_channel_disabled() {
        let mut config = EngineConfig::default();
        config.snapshot_channel = false;
        let engine = StreamEngine::with_config(config);
        assert!(engine.subscribe().is_none());
    }

    #[test]
    fn test_synchronous_driving() {
        let mut engine = StreamEngine::new();
        engine.push_chunk(b"data: {\"type\":\"stream\",\"content\":\"Hel\"}\n");
        engine.push_chunk(b"data: {\"type\":\"stream\",\"content\":\"lo\"}\n");
        assert_eq!(engine.snapshot().streaming_text, "Hello");

        engine.cancel();
        assert_eq!(engine.status(), SessionStatus::Cancelled);
        assert_eq!(engine.snapshot().sections[0].rendered(), "Hello");
    }
}
