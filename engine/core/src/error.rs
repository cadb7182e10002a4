//! Error Taxonomy
//!
//! Every failure the engine can observe falls in one of two families:
//!
//! - [`Diagnostic`]: recoverable input problems (a malformed frame, a message
//!   with an unknown discriminant). They are recorded on the session and the
//!   stream continues.
//! - [`Failure`]: fatal problems (transport failure, a server-reported error,
//!   premature termination, idle timeout). Each one ends the session exactly
//!   once and is exposed through the snapshot's `error_detail`.
//!
//! Nothing here is ever returned across the engine's public boundary as an
//! `Err`; the driver turns failures into terminal session states.

use serde::Serialize;
use thiserror::Error;

/// Maximum number of characters of offending input kept in a diagnostic
const EXCERPT_CHARS: usize = 80;

// ============================================================================
// Transport Errors
// ============================================================================

/// Connection-level failure reported by a transport reader
#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum TransportError {
    /// The connection could not be established or was reset
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Reading the next chunk of the body failed
    #[error("read failed: {0}")]
    ReadFailed(String),

    /// The server answered with a non-success HTTP status
    #[error("unexpected HTTP status {status}")]
    HttpStatus {
        /// Numeric status code
        status: u16,
    },
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::NotConnected => Self::ConnectionFailed(err.to_string()),
            _ => Self::ReadFailed(err.to_string()),
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() {
            Self::ConnectionFailed(err.to_string())
        } else if let Some(status) = err.status() {
            Self::HttpStatus {
                status: status.as_u16(),
            }
        } else {
            Self::ReadFailed(err.to_string())
        }
    }
}

// ============================================================================
// Non-fatal Diagnostics
// ============================================================================

/// A recoverable problem with a single frame or message
///
/// The offending input is skipped; the session keeps going.
#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// A `data:` line whose payload is not valid JSON, or a line that exceeded
    /// the decoder's size limit
    #[error("malformed frame ({reason}): {excerpt}")]
    FrameParse {
        /// Parser message
        reason: String,
        /// Leading part of the offending payload
        excerpt: String,
    },

    /// Valid JSON with a missing or unrecognized discriminant
    #[error("unrecognized message ({reason})")]
    MessageSchema {
        /// What was wrong with the message shape
        reason: String,
        /// The discriminant value, when one was present
        discriminant: Option<String>,
    },
}

impl Diagnostic {
    /// Build a frame parse diagnostic, truncating the payload for storage
    pub fn frame_parse(reason: impl Into<String>, payload: &str) -> Self {
        Self::FrameParse {
            reason: reason.into(),
            excerpt: excerpt(payload),
        }
    }

    /// Build a schema diagnostic
    pub fn message_schema(reason: impl Into<String>, discriminant: Option<&str>) -> Self {
        Self::MessageSchema {
            reason: reason.into(),
            discriminant: discriminant.map(ToString::to_string),
        }
    }
}

fn excerpt(payload: &str) -> String {
    if payload.chars().count() <= EXCERPT_CHARS {
        return payload.to_string();
    }
    let mut cut: String = payload.chars().take(EXCERPT_CHARS).collect();
    cut.push('…');
    cut
}

// ============================================================================
// Fatal Failures
// ============================================================================

/// A failure that terminates the session in the `Errored` state
#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Failure {
    /// The transport failed mid-stream
    #[error("transport error: {source}")]
    Transport {
        /// Underlying transport error
        #[from]
        source: TransportError,
    },

    /// The backend sent an explicit error message
    #[error("{detail}")]
    ServerReported {
        /// Error text taken from the message body
        detail: String,
    },

    /// The stream closed without a completion, error or sentinel message
    #[error("incomplete stream: connection closed before the analysis finished")]
    UnexpectedTermination,

    /// No chunk arrived within the configured idle interval
    #[error("incomplete stream: no data received within {timeout_ms} ms")]
    IdleTimeout {
        /// The idle interval that elapsed
        timeout_ms: u64,
    },
}

impl Failure {
    /// Human-readable detail exposed on the snapshot
    #[must_use]
    pub fn detail(&self) -> String {
        self.to_string()
    }
}
