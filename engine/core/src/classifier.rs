//! Message Classifier
//!
//! Turns decoded [`Frame`]s into typed [`Message`]s.
//!
//! Classification is driven by a declarative [`KindTable`] mapping each wire
//! discriminant (the `type` field) to a [`KindRule`]: the message kind, how the
//! aggregator merges it, the default section title and whether it ends the
//! stream. Adding a backend vocabulary means adding rules or aliases, not new
//! branches.
//!
//! Payload shapes are normalized here, once, into [`Payload`]:
//!
//! | `content` on the wire                 | Payload            |
//! |---------------------------------------|--------------------|
//! | object or array                       | `Structured`       |
//! | string holding JSON object/array      | `Structured`       |
//! | string holding a JSON-encoded string  | decoded again      |
//! | string starting with `{`/`[`, invalid | `Unparseable`      |
//! | any other string, number, bool        | `PlainText`        |
//! | missing or null                       | `PlainText("")`    |

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::decoder::Frame;
use crate::error::Diagnostic;

/// Field holding the discriminant
pub const DISCRIMINANT_FIELD: &str = "type";

/// Field holding the message body
pub const CONTENT_FIELD: &str = "content";

/// How many times a JSON-encoded string is unwrapped before giving up
const MAX_DECODE_PASSES: usize = 2;

// ============================================================================
// Message Types
// ============================================================================

/// Semantic kind of a message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Progress/status line
    Status,
    /// Reasoning step
    ThoughtStep,
    /// Tool or action step
    ActionStep,
    /// Result of an action
    ObservationStep,
    /// Incremental text appended to the running buffer
    ContentDelta,
    /// Closes a titled section, absorbing buffered deltas
    SectionComplete,
    /// The final answer; ends the stream
    FinalAnswer,
    /// Server-reported error; ends the stream
    ErrorSignal,
    /// The `[DONE]` sentinel; ends the stream
    DoneSentinel,
}

impl MessageKind {
    /// Lowercase name used in logs and rendered output
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::ThoughtStep => "thought",
            Self::ActionStep => "action",
            Self::ObservationStep => "observation",
            Self::ContentDelta => "content_delta",
            Self::SectionComplete => "section",
            Self::FinalAnswer => "final_answer",
            Self::ErrorSignal => "error",
            Self::DoneSentinel => "done",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the aggregator folds a message into the session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Updates the status line only; never creates a section
    StatusLine,
    /// Appends to the section with the same key, creating it if needed
    MergeByKey,
    /// Appends to the unbound running buffer
    Accumulate,
    /// Flushes the running buffer into the keyed section, then appends
    FlushAndMerge,
    /// Ends the session in the errored state
    Fail,
    /// Ends the session in the completed state without adding content
    Terminate,
}

/// Normalized message body
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "shape", content = "value", rename_all = "snake_case")]
pub enum Payload {
    /// Human-readable text
    PlainText(String),
    /// A JSON object or array
    Structured(Value),
    /// Text that looked like JSON but did not parse
    Unparseable(String),
}

impl Payload {
    /// Whether the payload carries nothing worth rendering
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::PlainText(text) | Self::Unparseable(text) => text.is_empty(),
            Self::Structured(_) => false,
        }
    }

    /// Text form used when rendering a section
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::PlainText(text) | Self::Unparseable(text) => text.clone(),
            Self::Structured(value) => {
                serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
            }
        }
    }

    /// Text used as a session error detail
    #[must_use]
    pub fn error_detail(&self) -> String {
        match self {
            Self::PlainText(text) | Self::Unparseable(text) => text.clone(),
            Self::Structured(value) => ["message", "error", "detail"]
                .iter()
                .find_map(|field| value.get(*field).and_then(Value::as_str))
                .map_or_else(|| value.to_string(), ToString::to_string),
        }
    }

    /// The structured value, if any
    #[must_use]
    pub fn as_structured(&self) -> Option<&Value> {
        match self {
            Self::Structured(value) => Some(value),
            _ => None,
        }
    }
}

/// Merge identity of a message
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "binding", rename_all = "snake_case")]
pub enum MergeKey {
    /// A titled section; kind and title must both match to merge
    Section {
        /// Kind of the section-opening message
        kind: MessageKind,
        /// Declared or default title
        title: String,
    },
    /// The implicit running buffer for content deltas
    RunningBuffer,
    /// Messages that never produce a section (status, errors, sentinel)
    Unbound,
}

impl MergeKey {
    /// Title for section keys
    #[must_use]
    pub fn title(&self) -> Option<&str> {
        match self {
            Self::Section { title, .. } => Some(title),
            Self::RunningBuffer | Self::Unbound => None,
        }
    }
}

/// A classified, structurally valid unit of the stream
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Message {
    /// Semantic kind
    pub kind: MessageKind,
    /// Merge identity
    pub key: MergeKey,
    /// Normalized body
    pub body: Payload,
    /// Position within the session, starting at 1
    pub sequence: u64,
    /// Merge behavior from the kind table
    pub policy: MergePolicy,
    /// Whether this message ends the stream
    pub terminal: bool,
    /// Completion percentage announced by the backend (status messages only)
    pub progress_hint: Option<u8>,
}

// ============================================================================
// Kind Table
// ============================================================================

/// Classification rule for one discriminant
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KindRule {
    /// Kind assigned to matching messages
    pub kind: MessageKind,
    /// How the aggregator merges them
    pub policy: MergePolicy,
    /// Section title when the payload declares none
    pub default_title: &'static str,
    /// Whether the message ends the stream
    pub terminal: bool,
}

impl KindRule {
    const fn new(
        kind: MessageKind,
        policy: MergePolicy,
        default_title: &'static str,
        terminal: bool,
    ) -> Self {
        Self {
            kind,
            policy,
            default_title,
            terminal,
        }
    }
}

/// Discriminants understood out of the box
pub const DEFAULT_RULES: &[(&str, KindRule)] = &[
    (
        "status",
        KindRule::new(MessageKind::Status, MergePolicy::StatusLine, "", false),
    ),
    (
        "thought",
        KindRule::new(
            MessageKind::ThoughtStep,
            MergePolicy::MergeByKey,
            "Thinking",
            false,
        ),
    ),
    (
        "action",
        KindRule::new(
            MessageKind::ActionStep,
            MergePolicy::MergeByKey,
            "Actions",
            false,
        ),
    ),
    (
        "observation",
        KindRule::new(
            MessageKind::ObservationStep,
            MergePolicy::MergeByKey,
            "Observations",
            false,
        ),
    ),
    (
        "stream",
        KindRule::new(
            MessageKind::ContentDelta,
            MergePolicy::Accumulate,
            "",
            false,
        ),
    ),
    (
        "content",
        KindRule::new(
            MessageKind::SectionComplete,
            MergePolicy::FlushAndMerge,
            "Content",
            false,
        ),
    ),
    (
        "research",
        KindRule::new(
            MessageKind::SectionComplete,
            MergePolicy::FlushAndMerge,
            "Research Findings",
            false,
        ),
    ),
    (
        "complete",
        KindRule::new(
            MessageKind::FinalAnswer,
            MergePolicy::FlushAndMerge,
            "Final Answer",
            true,
        ),
    ),
    (
        "final",
        KindRule::new(
            MessageKind::FinalAnswer,
            MergePolicy::FlushAndMerge,
            "Final Answer",
            true,
        ),
    ),
    (
        "error",
        KindRule::new(MessageKind::ErrorSignal, MergePolicy::Fail, "", true),
    ),
];

/// Rule applied to the `[DONE]` sentinel
const DONE_RULE: KindRule = KindRule::new(
    MessageKind::DoneSentinel,
    MergePolicy::Terminate,
    "",
    true,
);

/// Discriminant → rule lookup
#[derive(Clone, Debug)]
pub struct KindTable {
    rules: HashMap<String, KindRule>,
}

impl Default for KindTable {
    fn default() -> Self {
        Self {
            rules: DEFAULT_RULES
                .iter()
                .map(|(name, rule)| ((*name).to_string(), *rule))
                .collect(),
        }
    }
}

impl KindTable {
    /// Table with the default discriminants
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a rule
    #[must_use]
    pub fn with_rule(mut self, discriminant: impl Into<String>, rule: KindRule) -> Self {
        self.rules.insert(discriminant.into(), rule);
        self
    }

    /// Make `alias` classify exactly like `target`
    ///
    /// Unknown targets leave the table unchanged and return `false`.
    pub fn add_alias(&mut self, alias: impl Into<String>, target: &str) -> bool {
        match self.rules.get(target).copied() {
            Some(rule) => {
                self.rules.insert(alias.into(), rule);
                true
            }
            None => false,
        }
    }

    /// Look up a discriminant
    #[must_use]
    pub fn lookup(&self, discriminant: &str) -> Option<&KindRule> {
        self.rules.get(discriminant)
    }

    /// Number of known discriminants
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the table is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

// ============================================================================
// Classifier
// ============================================================================

/// Stateful classifier for one session (owns the sequence counter)
#[derive(Clone, Debug)]
pub struct MessageClassifier {
    table: KindTable,
    last_sequence: u64,
}

impl Default for MessageClassifier {
    fn default() -> Self {
        Self::new(KindTable::default())
    }
}

impl MessageClassifier {
    /// Create a classifier using `table`
    #[must_use]
    pub fn new(table: KindTable) -> Self {
        Self {
            table,
            last_sequence: 0,
        }
    }

    /// The table in use
    #[must_use]
    pub fn table(&self) -> &KindTable {
        &self.table
    }

    /// Classify one frame
    ///
    /// # Errors
    ///
    /// Returns a [`Diagnostic`] when the payload is not JSON or its
    /// discriminant is missing or unknown. Neither is fatal to the session.
    pub fn classify(&mut self, frame: &Frame) -> Result<Message, Diagnostic> {
        let payload = match frame {
            Frame::Done => {
                return Ok(self.build(DONE_RULE, MergeKey::Unbound, empty_text(), None));
            }
            Frame::Data(payload) => payload,
        };

        let value: Value = serde_json::from_str(payload)
            .map_err(|e| Diagnostic::frame_parse(e.to_string(), payload))?;

        let Value::Object(object) = value else {
            return Err(Diagnostic::message_schema(
                "payload is not a JSON object",
                None,
            ));
        };

        let Some(discriminant) = object.get(DISCRIMINANT_FIELD).and_then(Value::as_str) else {
            return Err(Diagnostic::message_schema(
                format!("missing `{DISCRIMINANT_FIELD}` field"),
                None,
            ));
        };

        let Some(rule) = self.table.lookup(discriminant).copied() else {
            return Err(Diagnostic::message_schema(
                "unknown discriminant",
                Some(discriminant),
            ));
        };

        let key = match rule.policy {
            MergePolicy::MergeByKey | MergePolicy::FlushAndMerge => MergeKey::Section {
                kind: rule.kind,
                title: declared_title(&object).unwrap_or_else(|| rule.default_title.to_string()),
            },
            MergePolicy::Accumulate => MergeKey::RunningBuffer,
            MergePolicy::StatusLine | MergePolicy::Fail | MergePolicy::Terminate => {
                MergeKey::Unbound
            }
        };

        let body = if rule.kind == MessageKind::ErrorSignal {
            error_body(&object)
        } else {
            normalize_content(object.get(CONTENT_FIELD))
        };

        let progress_hint = if rule.kind == MessageKind::Status {
            progress_hint(&object)
        } else {
            None
        };

        Ok(self.build(rule, key, body, progress_hint))
    }

    fn build(
        &mut self,
        rule: KindRule,
        key: MergeKey,
        body: Payload,
        progress_hint: Option<u8>,
    ) -> Message {
        self.last_sequence += 1;
        Message {
            kind: rule.kind,
            key,
            body,
            sequence: self.last_sequence,
            policy: rule.policy,
            terminal: rule.terminal,
            progress_hint,
        }
    }
}

fn empty_text() -> Payload {
    Payload::PlainText(String::new())
}

fn declared_title(object: &Map<String, Value>) -> Option<String> {
    ["title", "section"]
        .iter()
        .filter_map(|field| object.get(*field).and_then(Value::as_str))
        .map(str::trim)
        .find(|title| !title.is_empty())
        .map(ToString::to_string)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn progress_hint(object: &Map<String, Value>) -> Option<u8> {
    let value = object.get("progress").and_then(Value::as_f64)?;
    if !value.is_finite() {
        return None;
    }
    Some(value.clamp(0.0, 100.0).round() as u8)
}

fn error_body(object: &Map<String, Value>) -> Payload {
    let body = normalize_content(object.get(CONTENT_FIELD));
    if !body.is_empty() {
        return body;
    }
    ["message", "error"]
        .iter()
        .find_map(|field| object.get(*field).and_then(Value::as_str))
        .map_or_else(
            || Payload::PlainText("the server reported an error".to_string()),
            |text| Payload::PlainText(text.to_string()),
        )
}

/// Normalize a `content` field into a [`Payload`]
#[must_use]
pub fn normalize_content(content: Option<&Value>) -> Payload {
    match content {
        None | Some(Value::Null) => empty_text(),
        Some(Value::String(text)) => decode_text(text, 0),
        Some(value @ (Value::Object(_) | Value::Array(_))) => Payload::Structured(value.clone()),
        Some(other) => Payload::PlainText(other.to_string()),
    }
}

fn decode_text(text: &str, pass: usize) -> Payload {
    let trimmed = text.trim();
    let looks_structured = trimmed.starts_with('{') || trimmed.starts_with('[');

    match serde_json::from_str::<Value>(trimmed) {
        Ok(value @ (Value::Object(_) | Value::Array(_))) => Payload::Structured(value),
        Ok(Value::String(inner)) if pass < MAX_DECODE_PASSES => decode_text(&inner, pass + 1),
        Ok(Value::String(inner)) => Payload::PlainText(inner),
        Ok(_) => Payload::PlainText(text.to_string()),
        Err(_) if looks_structured => Payload::Unparseable(text.to_string()),
        Err(_) => Payload::PlainText(text.to_string()),
    }
}
