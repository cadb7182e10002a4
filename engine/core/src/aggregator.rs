//! Section Aggregator
//!
//! Owns one [`StreamSession`] and is the only thing allowed to mutate it.
//!
//! # Architecture
//!
//! ```text
//!                  first message
//!        ┌──────┐ ──────────────► ┌────────┐
//!        │ Idle │                 │ Active │ ◄─┐ status / steps / deltas /
//!        └──┬───┘                 └───┬────┘ ──┘ section complete
//!           │                         │
//!           │ end of stream           ├── final answer, [DONE] ──► Completed
//!           └──────────────┐          ├── error, transport, EOF ─► Errored
//!                          ▼          └── cancel ────────────────► Cancelled
//!                       Errored
//! ```
//!
//! Terminal states absorb everything: later messages are logged as inert and
//! every mutating call becomes a no-op.
//!
//! Sections are stored as `Arc<Section>` and updated copy-on-write, so a
//! snapshot taken before a mutation keeps sharing every section the mutation
//! did not touch.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::classifier::{MergeKey, MergePolicy, Message, MessageKind, Payload};
use crate::error::{Diagnostic, Failure};
use crate::progress::{ProgressConfig, ProgressEstimator};
use crate::snapshot::{DiagnosticLog, SessionSnapshot, SharedText};

/// Title of the section that receives streamed text nobody claimed
pub const RESPONSE_SECTION_TITLE: &str = "Response";

// ============================================================================
// Session Types
// ============================================================================

/// Unique identifier of one stream session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Generate a fresh identifier
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a session
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// No message received yet
    #[default]
    Idle,
    /// Receiving messages
    Active,
    /// Finished normally
    Completed,
    /// Finished with a fatal failure
    Errored,
    /// Stopped by the consumer
    Cancelled,
}

impl SessionStatus {
    /// Whether no further mutation is possible
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Errored | Self::Cancelled)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Errored => "errored",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// An aggregated, stably keyed unit of content
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Section {
    /// Position-independent identifier, unique within the session
    pub id: u64,
    /// Merge identity
    pub key: MergeKey,
    /// Kind of the message that opened the section
    pub kind: MessageKind,
    /// Display title
    pub title: String,
    /// Bodies in arrival order
    pub body_fragments: Vec<Payload>,
    /// Set once the session completes
    pub is_final: bool,
}

impl Section {
    /// Fragments joined with newlines
    #[must_use]
    pub fn rendered(&self) -> String {
        self.body_fragments
            .iter()
            .filter(|fragment| !fragment.is_empty())
            .map(Payload::render)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Fragments that are plain or unparseable text
    pub fn text_fragments(&self) -> impl Iterator<Item = &str> {
        self.body_fragments.iter().filter_map(|fragment| match fragment {
            Payload::PlainText(text) | Payload::Unparseable(text) => Some(text.as_str()),
            Payload::Structured(_) => None,
        })
    }
}

/// What happened to one message handed to the aggregator
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Merged into the session
    Applied,
    /// Arrived after a terminal state; kept only in the log
    Inert,
    /// Sequence not greater than the last accepted one; dropped
    OutOfOrder,
}

/// One entry in the session's message log
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    /// Sequence number of the message
    pub sequence: u64,
    /// Its kind
    pub kind: MessageKind,
    /// What the aggregator did with it
    pub disposition: Disposition,
}

/// State of one consumption of one response stream
#[derive(Debug)]
pub struct StreamSession {
    id: SessionId,
    status: SessionStatus,
    sections: Vec<Arc<Section>>,
    index: HashMap<MergeKey, usize>,
    running_buffer: SharedText,
    failure: Option<Failure>,
    latest_status: Option<String>,
    diagnostics: DiagnosticLog,
    log: Vec<LogEntry>,
    progress: ProgressEstimator,
    last_sequence: u64,
    revision: u64,
    next_section_id: u64,
}

impl StreamSession {
    fn new(progress: ProgressConfig) -> Self {
        Self {
            id: SessionId::new(),
            status: SessionStatus::Idle,
            sections: Vec::new(),
            index: HashMap::new(),
            running_buffer: SharedText::new(),
            failure: None,
            latest_status: None,
            diagnostics: DiagnosticLog::new(),
            log: Vec::new(),
            progress: ProgressEstimator::new(progress),
            last_sequence: 0,
            revision: 0,
            next_section_id: 1,
        }
    }

    /// Session identifier
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Current lifecycle state
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Sections in first-appearance order
    #[must_use]
    pub fn sections(&self) -> &[Arc<Section>] {
        &self.sections
    }

    /// Fatal failure, once errored
    #[must_use]
    pub fn failure(&self) -> Option<&Failure> {
        self.failure.as_ref()
    }

    /// Progress in `0..=100`
    #[must_use]
    pub fn progress(&self) -> u8 {
        self.progress.value()
    }

    /// Diagnostics recorded so far (the most recent ones are retained)
    #[must_use]
    pub fn diagnostics(&self) -> &DiagnosticLog {
        &self.diagnostics
    }

    /// Every message seen, with its disposition
    #[must_use]
    pub fn log(&self) -> &[LogEntry] {
        &self.log
    }

    /// Streamed text not yet bound to a section
    #[must_use]
    pub fn running_buffer(&self) -> &SharedText {
        &self.running_buffer
    }

    /// Bumped on every mutation
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }
}

// ============================================================================
// Aggregator
// ============================================================================

/// Folds messages into a single session
#[derive(Debug)]
pub struct Aggregator {
    session: StreamSession,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new(ProgressConfig::default())
    }
}

impl Aggregator {
    /// Start a new idle session
    #[must_use]
    pub fn new(progress: ProgressConfig) -> Self {
        Self {
            session: StreamSession::new(progress),
        }
    }

    /// The owned session
    #[must_use]
    pub fn session(&self) -> &StreamSession {
        &self.session
    }

    /// Shorthand for `session().status()`
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.session.status
    }

    /// Immutable view of the current state
    ///
    /// Sections, streamed text and diagnostics are shared with the session,
    /// so the cost does not grow with the length of the stream.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        let session = &self.session;
        SessionSnapshot {
            session_id: session.id,
            revision: session.revision,
            status: session.status,
            sections: session.sections.clone(),
            streaming_text: session.running_buffer.clone(),
            error_detail: session.failure.as_ref().map(Failure::detail),
            progress: session.progress.value(),
            latest_status: session.latest_status.clone(),
            diagnostics: session.diagnostics.clone(),
        }
    }

    /// Fold one classified message into the session
    pub fn apply(&mut self, message: Message) -> Disposition {
        let disposition = self.dispose(&message);
        self.session.log.push(LogEntry {
            sequence: message.sequence,
            kind: message.kind,
            disposition,
        });

        if disposition == Disposition::Applied {
            self.merge(message);
        }
        disposition
    }

    fn dispose(&self, message: &Message) -> Disposition {
        if self.session.status.is_terminal() {
            tracing::debug!(
                session = %self.session.id,
                sequence = message.sequence,
                kind = %message.kind,
                "Message after terminal state"
            );
            return Disposition::Inert;
        }
        if message.sequence <= self.session.last_sequence {
            tracing::warn!(
                session = %self.session.id,
                sequence = message.sequence,
                last = self.session.last_sequence,
                "Ignoring out-of-order message"
            );
            return Disposition::OutOfOrder;
        }
        Disposition::Applied
    }

    fn merge(&mut self, message: Message) {
        let Message {
            kind,
            key,
            body,
            sequence,
            policy,
            terminal,
            progress_hint,
        } = message;

        let session = &mut self.session;
        session.last_sequence = sequence;
        session.revision += 1;
        if session.status == SessionStatus::Idle {
            session.status = SessionStatus::Active;
            tracing::debug!(session = %session.id, "Session active");
        }
        tracing::debug!(session = %session.id, sequence, kind = %kind, "Applying message");

        match policy {
            MergePolicy::StatusLine => {
                if !body.is_empty() {
                    session.latest_status = Some(body.render());
                }
                if let Some(percent) = progress_hint {
                    session.progress.hint(percent);
                }
                session.progress.observe(kind);
            }
            MergePolicy::MergeByKey => {
                self.merge_fragments(key, kind, vec![body]);
                self.session.progress.observe(kind);
            }
            MergePolicy::Accumulate => {
                session.running_buffer.push_str(&body.render());
            }
            MergePolicy::FlushAndMerge => {
                let buffered = session.running_buffer.take();
                let mut fragments = Vec::with_capacity(2);
                if !buffered.is_empty() {
                    fragments.push(Payload::PlainText(buffered));
                }
                fragments.push(body);
                self.merge_fragments(key, kind, fragments);
            }
            MergePolicy::Fail => {
                self.terminate_errored(Failure::ServerReported {
                    detail: body.error_detail(),
                });
            }
            MergePolicy::Terminate => {}
        }

        if terminal && !self.session.status.is_terminal() {
            self.complete();
        }
    }

    /// Append fragments to the section with `key`, opening it if needed
    fn merge_fragments(&mut self, key: MergeKey, kind: MessageKind, fragments: Vec<Payload>) {
        let fragments: Vec<Payload> = fragments.into_iter().filter(|f| !f.is_empty()).collect();
        if fragments.is_empty() {
            return;
        }

        let session = &mut self.session;
        if let Some(&position) = session.index.get(&key) {
            Arc::make_mut(&mut session.sections[position])
                .body_fragments
                .extend(fragments);
            return;
        }

        let title = key.title().unwrap_or(kind.as_str()).to_string();
        let section = Section {
            id: session.next_section_id,
            key: key.clone(),
            kind,
            title,
            body_fragments: fragments,
            is_final: false,
        };
        session.next_section_id += 1;
        session.index.insert(key, session.sections.len());
        session.sections.push(Arc::new(section));
    }

    /// Move streamed text nobody claimed into the response section
    fn flush_running_buffer(&mut self) {
        if self.session.running_buffer.is_empty() {
            return;
        }
        let text = self.session.running_buffer.take();
        self.merge_fragments(
            MergeKey::Section {
                kind: MessageKind::SectionComplete,
                title: RESPONSE_SECTION_TITLE.to_string(),
            },
            MessageKind::SectionComplete,
            vec![Payload::PlainText(text)],
        );
    }

    fn complete(&mut self) {
        self.flush_running_buffer();
        let session = &mut self.session;
        for section in &mut session.sections {
            if !section.is_final {
                Arc::make_mut(section).is_final = true;
            }
        }
        session.progress.complete();
        session.status = SessionStatus::Completed;
        tracing::info!(
            session = %session.id,
            sections = session.sections.len(),
            "Session completed"
        );
    }

    fn terminate_errored(&mut self, failure: Failure) {
        self.flush_running_buffer();
        let session = &mut self.session;
        tracing::warn!(session = %session.id, error = %failure, "Session errored");
        session.failure = Some(failure);
        session.status = SessionStatus::Errored;
    }

    /// Record a non-fatal problem with a frame or message
    pub fn record_diagnostic(&mut self, diagnostic: Diagnostic) {
        if self.session.status.is_terminal() {
            tracing::debug!(diagnostic = %diagnostic, "Diagnostic after terminal state");
            return;
        }
        tracing::warn!(session = %self.session.id, diagnostic = %diagnostic, "Skipping input");
        self.session.diagnostics.push(diagnostic);
        self.session.revision += 1;
    }

    /// End the session with a fatal failure
    ///
    /// Returns `false` when the session had already reached a terminal state.
    pub fn fail(&mut self, failure: Failure) -> bool {
        if self.session.status.is_terminal() {
            return false;
        }
        self.session.revision += 1;
        self.terminate_errored(failure);
        true
    }

    /// The transport closed
    ///
    /// Without a prior terminal message this is an unexpected termination.
    pub fn end_of_stream(&mut self) -> bool {
        self.fail(Failure::UnexpectedTermination)
    }

    /// Stop consuming on behalf of the consumer
    ///
    /// Sections gathered so far stay in place, not final.
    pub fn cancel(&mut self) -> bool {
        if self.session.status.is_terminal() {
            return false;
        }
        self.flush_running_buffer();
        let session = &mut self.session;
        session.revision += 1;
        session.status = SessionStatus::Cancelled;
        tracing::info!(session = %session.id, "Session cancelled");
        true
    }
}
