//! Stream Engine Core - Streaming Response Aggregation
//!
//! This crate consumes the chunked event stream an analysis backend returns
//! over HTTP and folds it into a stable, incrementally updated view model.
//! It does not build requests, authenticate, persist results or render
//! anything; it only turns a response body into snapshots.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        StreamEngine                              │
//! │                                                                  │
//! │  ┌───────────┐   ┌─────────┐   ┌────────────┐   ┌────────────┐   │
//! │  │ Transport │──►│ Decoder │──►│ Classifier │──►│ Aggregator │   │
//! │  │  Reader   │   │ (lines) │   │ (KindTable)│   │ (session)  │   │
//! │  └───────────┘   └─────────┘   └────────────┘   └─────┬──────┘   │
//! │                                                       │          │
//! │                                   ┌──────────┐  ┌─────┴──────┐   │
//! │                                   │ Progress │◄─┤  Projector │   │
//! │                                   └──────────┘  └─────┬──────┘   │
//! └───────────────────────────────────────────────────────┼──────────┘
//!                                                         │ watch
//!                                              SessionSnapshot observers
//! ```
//!
//! # Key Types
//!
//! - [`StreamEngine`]: drives one session from a [`TransportReader`]
//! - [`SessionSnapshot`]: immutable view of a session
//! - [`Section`]: aggregated content keyed by kind and title
//! - [`CancelHandle`]: stops consumption from another task
//! - [`EngineConfig`]: layered configuration (CLI > env > file > defaults)
//!
//! # Quick Start
//!
//! ```ignore
//! use stream_engine_core::{ResponseBodyReader, StreamEngine};
//!
//! let response = reqwest::Client::new().post(url).json(&job).send().await?;
//! let mut reader = ResponseBodyReader::new(response);
//!
//! let engine = StreamEngine::new();
//! if let Some(mut updates) = engine.subscribe() {
//!     tokio::spawn(async move {
//!         while updates.changed().await.is_ok() {
//!             render(&updates.borrow());
//!         }
//!     });
//! }
//!
//! let snapshot = engine.run(&mut reader).await;
//! ```
//!
//! # Module Overview
//!
//! - [`transport`]: chunk sources (HTTP bodies, `AsyncRead`, channels)
//! - [`decoder`]: line reassembly and `data:` frame extraction
//! - [`classifier`]: discriminant table and payload normalization
//! - [`aggregator`]: session state machine and section merging
//! - [`progress`]: heuristic completion estimate
//! - [`snapshot`]: snapshots and the watch-based projector
//! - [`engine`]: the async driver
//! - [`config`]: TOML/env configuration
//! - [`error`]: failure and diagnostic taxonomy

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod aggregator;
pub mod classifier;
pub mod config;
pub mod decoder;
pub mod engine;
pub mod error;
pub mod progress;
pub mod snapshot;
pub mod transport;

// Session exports
pub use aggregator::{
    Aggregator, Disposition, LogEntry, Section, SessionId, SessionStatus, StreamSession,
};

// Classifier exports
pub use classifier::{
    KindRule, KindTable, MergeKey, MergePolicy, Message, MessageClassifier, MessageKind, Payload,
};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConfigOverrides,
    ConfigSource, EngineConfig, EngineToml,
};

pub use decoder::{Frame, FrameDecoder};
pub use engine::{CancelHandle, StreamEngine};
pub use error::{Diagnostic, Failure, TransportError};
pub use progress::{ProgressConfig, ProgressEstimator};
pub use snapshot::{
    DiagnosticLog, Projector, SessionSnapshot, SharedText, MAX_RETAINED_DIAGNOSTICS,
};
pub use transport::{
    AsyncReadReader, ChannelReader, ChunkQueueReader, RawChunk, ResponseBodyReader,
    TransportReader,
};
