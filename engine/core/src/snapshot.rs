//! View-Model Projector
//!
//! [`SessionSnapshot`] is the immutable, render-ready view of a session.
//! [`Projector`] publishes snapshots to any number of observers through a
//! `tokio::sync::watch` channel: observers always see the latest state and
//! never block the writer.
//!
//! Snapshots share their sections with the session (`Arc<Section>`). A section
//! untouched between two snapshots is the same allocation in both, so a
//! renderer can skip it with `Arc::ptr_eq`.
//!
//! The two parts of a session that grow without bound, streamed text and
//! diagnostics, are held in [`SharedText`] and [`DiagnosticLog`]. Cloning
//! either one costs the same however long the stream has been running.

use std::collections::VecDeque;
use std::fmt;
use std::ops::Index;
use std::sync::Arc;

use serde::{Serialize, Serializer};
use serde_json::Value;
use tokio::sync::watch;

use crate::aggregator::{Section, SessionId, SessionStatus};
use crate::classifier::MessageKind;
use crate::error::Diagnostic;

/// Immutable view of a session at one point in time
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SessionSnapshot {
    /// Session the snapshot belongs to
    pub session_id: SessionId,
    /// Mutation counter at capture time
    pub revision: u64,
    /// Lifecycle state
    pub status: SessionStatus,
    /// Sections in first-appearance order
    pub sections: Vec<Arc<Section>>,
    /// Streamed text not yet bound to a section
    pub streaming_text: SharedText,
    /// Failure description when errored
    pub error_detail: Option<String>,
    /// Completion estimate in `0..=100`
    pub progress: u8,
    /// Text of the most recent status message
    pub latest_status: Option<String>,
    /// Skipped frames and messages
    pub diagnostics: DiagnosticLog,
}

impl SessionSnapshot {
    /// Whether the session can no longer change
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// First section with the given title
    #[must_use]
    pub fn section(&self, title: &str) -> Option<&Section> {
        self.sections
            .iter()
            .map(AsRef::as_ref)
            .find(|section| section.title == title)
    }

    /// Sections of the given kind
    pub fn sections_of(&self, kind: MessageKind) -> impl Iterator<Item = &Section> {
        self.sections
            .iter()
            .map(AsRef::as_ref)
            .filter(move |section| section.kind == kind)
    }

    /// Every structured payload, in order
    #[must_use]
    pub fn structured_results(&self) -> Vec<&Value> {
        self.sections
            .iter()
            .flat_map(|section| section.body_fragments.iter())
            .filter_map(|fragment| fragment.as_structured())
            .collect()
    }
}

// ============================================================================
// Shared Text
// ============================================================================

/// Sealed blocks are at least this long
const TEXT_BLOCK_BYTES: usize = 4096;

/// Append-only text whose clones share storage
///
/// Text lives in sealed blocks behind one `Arc`, plus an open tail shorter
/// than a block. A clone copies the tail and bumps one reference count.
#[derive(Clone, Default)]
pub struct SharedText {
    sealed: Arc<Vec<Arc<str>>>,
    tail: String,
    len: usize,
}

impl SharedText {
    /// Empty text
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `text`
    pub fn push_str(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.tail.push_str(text);
        self.len += text.len();
        if self.tail.len() >= TEXT_BLOCK_BYTES {
            let block: Arc<str> = Arc::from(std::mem::take(&mut self.tail));
            Arc::make_mut(&mut self.sealed).push(block);
        }
    }

    /// Length in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether nothing was appended
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The text as consecutive pieces
    pub fn chunks(&self) -> impl Iterator<Item = &str> {
        self.sealed
            .iter()
            .map(AsRef::as_ref)
            .chain(std::iter::once(self.tail.as_str()))
    }

    /// Move the text out, leaving this empty
    pub fn take(&mut self) -> String {
        let text = self.to_string();
        *self = Self::default();
        text
    }

    fn bytes_eq(&self, other: &str) -> bool {
        self.len == other.len() && self.chunks().flat_map(str::bytes).eq(other.bytes())
    }
}

impl fmt::Display for SharedText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.chunks().try_for_each(|chunk| f.write_str(chunk))
    }
}

impl fmt::Debug for SharedText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.to_string(), f)
    }
}

impl From<&str> for SharedText {
    fn from(text: &str) -> Self {
        let mut shared = Self::new();
        shared.push_str(text);
        shared
    }
}

impl PartialEq for SharedText {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len
            && self
                .chunks()
                .flat_map(str::bytes)
                .eq(other.chunks().flat_map(str::bytes))
    }
}

impl Eq for SharedText {}

impl PartialEq<str> for SharedText {
    fn eq(&self, other: &str) -> bool {
        self.bytes_eq(other)
    }
}

impl PartialEq<&str> for SharedText {
    fn eq(&self, other: &&str) -> bool {
        self.bytes_eq(other)
    }
}

impl Serialize for SharedText {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// ============================================================================
// Diagnostic Log
// ============================================================================

/// Diagnostics kept per session; older ones are counted but dropped
pub const MAX_RETAINED_DIAGNOSTICS: usize = 64;

/// Most recent diagnostics plus a running total
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DiagnosticLog {
    total: u64,
    recent: Arc<VecDeque<Arc<Diagnostic>>>,
}

impl DiagnosticLog {
    /// Empty log
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `diagnostic`, evicting the oldest retained one when full
    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.total += 1;
        let recent = Arc::make_mut(&mut self.recent);
        if recent.len() == MAX_RETAINED_DIAGNOSTICS {
            recent.pop_front();
        }
        recent.push_back(Arc::new(diagnostic));
    }

    /// Diagnostics recorded over the whole session
    #[must_use]
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Diagnostics recorded but no longer retained
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.total - self.recent.len() as u64
    }

    /// Number of retained diagnostics
    #[must_use]
    pub fn len(&self) -> usize {
        self.recent.len()
    }

    /// Whether nothing was recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Retained diagnostics, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.recent.iter().map(AsRef::as_ref)
    }

    /// Most recent diagnostic
    #[must_use]
    pub fn last(&self) -> Option<&Diagnostic> {
        self.recent.back().map(AsRef::as_ref)
    }
}

impl Index<usize> for DiagnosticLog {
    type Output = Diagnostic;

    fn index(&self, index: usize) -> &Diagnostic {
        &self.recent[index]
    }
}

// ============================================================================
// Projector
// ============================================================================

/// Publishes snapshots to observers
#[derive(Debug)]
pub struct Projector {
    tx: watch::Sender<SessionSnapshot>,
}

impl Projector {
    /// Create a projector holding `initial`
    #[must_use]
    pub fn new(initial: SessionSnapshot) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    /// Subscribe to future snapshots
    ///
    /// The receiver starts with the latest published snapshot marked as seen.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.tx.subscribe()
    }

    /// Replace the current snapshot and wake observers
    ///
    /// Snapshots with a revision no newer than the current one are dropped.
    pub fn publish(&self, snapshot: SessionSnapshot) -> bool {
        self.tx.send_if_modified(|current| {
            if snapshot.revision <= current.revision {
                return false;
            }
            *current = snapshot;
            true
        })
    }

    /// The latest published snapshot
    #[must_use]
    pub fn current(&self) -> SessionSnapshot {
        self.tx.borrow().clone()
    }

    /// Number of live observers
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
