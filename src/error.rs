//! Error types for sbspk
//!
//! This module provides the error taxonomy of a kernel retrieval:
//! - Transport-level failures (connect, broken pipe, HTTP download)
//! - Remote rejections (object not found, ambiguous object, rejected input)
//! - Session-level failures (timeout, incomplete transfer, cancellation)
//! - Stable machine-readable kinds for reporting ([`ErrorKind`])

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::types::{Candidate, Stage};

/// Result type alias for sbspk operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for sbspk
///
/// Every variant produced by the session driver carries the stage it failed in
/// and the service output relevant to the failure, so that a change in the
/// remote wording can be diagnosed from the error alone.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "session.email")
        key: Option<String>,
    },

    /// Connection or download transport failed
    #[error("connection error: {0}")]
    Transport(#[from] TransportError),

    /// The service closed the session while a prompt was still expected
    #[error("connection closed by the service during {stage}; unmatched output: {unmatched:?}")]
    ConnectionLost {
        /// Stage the driver was in
        stage: Stage,
        /// Output received since the last recognized prompt
        unmatched: String,
    },

    /// No recognized prompt arrived within the configured timeout
    #[error("timed out after {elapsed:?} during {stage}; unmatched output: {unmatched:?}")]
    Timeout {
        /// Stage the driver was in
        stage: Stage,
        /// Time spent waiting
        elapsed: Duration,
        /// Output received since the last recognized prompt
        unmatched: String,
    },

    /// The service does not know the object
    #[error("no match found for {object}")]
    ObjectNotFound {
        /// Identifier as submitted
        object: String,
        /// Stage the rejection arrived in
        stage: Stage,
    },

    /// Several bodies match the object and none is an exact match
    #[error("{object} is ambiguous: {} candidates ({})", .candidates.len(), format_candidates(.candidates))]
    AmbiguousObject {
        /// Identifier as submitted
        object: String,
        /// Stage the list arrived in
        stage: Stage,
        /// Candidates listed by the service
        candidates: Vec<Candidate>,
    },

    /// The kernel transfer ended early or produced nothing
    #[error("incomplete transfer for {object}: {reason}")]
    IncompleteTransfer {
        /// Identifier as submitted
        object: String,
        /// Bytes received
        received: u64,
        /// Bytes announced by the service, when known
        expected: Option<u64>,
        /// What went wrong
        reason: String,
    },

    /// The service printed output the driver recognizes as fatal or unusable
    #[error("unexpected service output during {stage}: {reason}; output: {text:?}")]
    UnexpectedPrompt {
        /// Stage the driver was in
        stage: Stage,
        /// Why the output was rejected
        reason: String,
        /// The offending output
        text: String,
    },

    /// The retrieval was cancelled by closing its connection
    #[error("retrieval cancelled during {stage}")]
    Cancelled {
        /// Stage the driver was in
        stage: Stage,
    },

    /// Kernel file could not be moved to its destination
    #[error("failed to move {staged} to {dest}: {source}")]
    Finalize {
        /// Staged (partial) file
        staged: PathBuf,
        /// Destination path
        dest: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error (configuration files)
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Transport-level errors (telnet session and HTTP download)
#[derive(Debug, Error)]
pub enum TransportError {
    /// Failed to establish the connection
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        /// Address that was dialed
        addr: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// An established connection failed while reading or writing
    #[error("connection broken: {0}")]
    Broken(#[source] std::io::Error),

    /// The read deadline passed before any data arrived
    #[error("read deadline elapsed")]
    DeadlineElapsed,

    /// The connection was closed locally (cancellation)
    #[error("connection closed")]
    Closed,

    /// HTTP download failed
    #[error("download failed: {0}")]
    Http(#[from] reqwest::Error),

    /// HTTP download answered with a non-success status
    #[error("download of {url} returned HTTP {status}")]
    HttpStatus {
        /// URL announced by the service
        url: String,
        /// Response status code
        status: u16,
    },

    /// The announced download URL uses a scheme this client cannot fetch
    #[error("unsupported download URL {url}")]
    UnsupportedUrl {
        /// URL announced by the service
        url: String,
    },
}

/// Machine-readable error kind
///
/// Stable codes for reporting, independent of the message wording.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Connection could not be established or was severed
    ConnectError,
    /// No recognized prompt within the timeout
    Timeout,
    /// Identifier resolves to no body
    ObjectNotFound,
    /// Identifier resolves to several bodies
    AmbiguousObject,
    /// Transfer ended early or produced an empty file
    IncompleteTransfer,
    /// Service printed a fatal or unusable message
    UnexpectedPrompt,
    /// Retrieval was cancelled
    Cancelled,
    /// Invalid configuration
    ConfigError,
    /// Local I/O failure
    IoError,
}

impl ErrorKind {
    /// Stable snake_case code
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ConnectError => "connect_error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ObjectNotFound => "object_not_found",
            ErrorKind::AmbiguousObject => "ambiguous_object",
            ErrorKind::IncompleteTransfer => "incomplete_transfer",
            ErrorKind::UnexpectedPrompt => "unexpected_prompt",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::ConfigError => "config_error",
            ErrorKind::IoError => "io_error",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Classify the error into its reporting kind
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config { .. } | Error::Serialization(_) => ErrorKind::ConfigError,
            Error::Transport(TransportError::DeadlineElapsed) => ErrorKind::Timeout,
            Error::Transport(TransportError::Closed) => ErrorKind::Cancelled,
            Error::Transport(_) | Error::ConnectionLost { .. } => ErrorKind::ConnectError,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::ObjectNotFound { .. } => ErrorKind::ObjectNotFound,
            Error::AmbiguousObject { .. } => ErrorKind::AmbiguousObject,
            Error::IncompleteTransfer { .. } => ErrorKind::IncompleteTransfer,
            Error::UnexpectedPrompt { .. } => ErrorKind::UnexpectedPrompt,
            Error::Cancelled { .. } => ErrorKind::Cancelled,
            Error::Finalize { .. } | Error::Io(_) => ErrorKind::IoError,
        }
    }

    /// Stage the negotiation failed in, when the error carries one
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Error::ConnectionLost { stage, .. }
            | Error::Timeout { stage, .. }
            | Error::ObjectNotFound { stage, .. }
            | Error::AmbiguousObject { stage, .. }
            | Error::UnexpectedPrompt { stage, .. }
            | Error::Cancelled { stage } => Some(*stage),
            Error::IncompleteTransfer { .. } => Some(Stage::ReceivingFile),
            _ => None,
        }
    }

    /// Configuration error naming the offending setting
    pub fn config(message: impl Into<String>, key: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}

fn format_candidates(candidates: &[Candidate]) -> String {
    candidates
        .iter()
        .map(|c| c.record.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(record: &str) -> Candidate {
        Candidate {
            record: record.into(),
            description: String::new(),
        }
    }

    #[test]
    fn every_variant_maps_to_its_kind() {
        let cases: Vec<(Error, ErrorKind)> = vec![
            (
                Error::config("email is required", "session.email"),
                ErrorKind::ConfigError,
            ),
            (
                Error::Transport(TransportError::Connect {
                    addr: "localhost:1".into(),
                    source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
                }),
                ErrorKind::ConnectError,
            ),
            (
                Error::Transport(TransportError::DeadlineElapsed),
                ErrorKind::Timeout,
            ),
            (Error::Transport(TransportError::Closed), ErrorKind::Cancelled),
            (
                Error::ConnectionLost {
                    stage: Stage::SubmitDateRange,
                    unmatched: String::new(),
                },
                ErrorKind::ConnectError,
            ),
            (
                Error::Timeout {
                    stage: Stage::AwaitMainMenu,
                    elapsed: Duration::from_secs(5),
                    unmatched: "garbage".into(),
                },
                ErrorKind::Timeout,
            ),
            (
                Error::ObjectNotFound {
                    object: "Nonexistent".into(),
                    stage: Stage::SubmitObjectId,
                },
                ErrorKind::ObjectNotFound,
            ),
            (
                Error::AmbiguousObject {
                    object: "Eros".into(),
                    stage: Stage::SubmitObjectId,
                    candidates: vec![candidate("1"), candidate("2")],
                },
                ErrorKind::AmbiguousObject,
            ),
            (
                Error::IncompleteTransfer {
                    object: "433".into(),
                    received: 0,
                    expected: None,
                    reason: "empty".into(),
                },
                ErrorKind::IncompleteTransfer,
            ),
            (
                Error::UnexpectedPrompt {
                    stage: Stage::SubmitDateRange,
                    reason: "date rejected".into(),
                    text: "Cannot interpret date".into(),
                },
                ErrorKind::UnexpectedPrompt,
            ),
            (
                Error::Cancelled {
                    stage: Stage::ReceivingFile,
                },
                ErrorKind::Cancelled,
            ),
            (
                Error::Io(std::io::Error::other("disk fail")),
                ErrorKind::IoError,
            ),
        ];

        for (err, kind) in cases {
            assert_eq!(err.kind(), kind, "wrong kind for {err}");
        }
    }

    #[test]
    fn ambiguous_message_lists_candidate_records() {
        let err = Error::AmbiguousObject {
            object: "Ceres".into(),
            stage: Stage::ResolveAmbiguity,
            candidates: vec![candidate("2000001"), candidate("2000002")],
        };
        assert_eq!(
            err.to_string(),
            "Ceres is ambiguous: 2 candidates (2000001, 2000002)"
        );
    }

    #[test]
    fn timeout_message_includes_stage_and_unmatched_output() {
        let err = Error::Timeout {
            stage: Stage::SubmitDateRange,
            elapsed: Duration::from_millis(1500),
            unmatched: "Enter date:".into(),
        };
        let message = err.to_string();
        assert!(message.contains("submit_date_range"));
        assert!(message.contains("Enter date:"));
    }

    #[test]
    fn stage_context_is_exposed() {
        let err = Error::ObjectNotFound {
            object: "x".into(),
            stage: Stage::ResolveAmbiguity,
        };
        assert_eq!(err.stage(), Some(Stage::ResolveAmbiguity));
        assert_eq!(Error::Io(std::io::Error::other("x")).stage(), None);
    }

    #[test]
    fn kind_codes_are_snake_case() {
        assert_eq!(ErrorKind::ObjectNotFound.to_string(), "object_not_found");
        assert_eq!(
            serde_json::to_string(&ErrorKind::IncompleteTransfer).unwrap(),
            "\"incomplete_transfer\""
        );
    }
}
