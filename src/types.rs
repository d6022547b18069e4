//! Core types for sbspk

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::ErrorKind;

/// Negotiation stage of a Horizons session
///
/// A session is always in exactly one stage. The happy path runs top to
/// bottom; `ResolveAmbiguity` may repeat, and any stage can end in `Failed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Opening the connection to the service
    Connecting,
    /// Waiting for the top-level `Horizons>` prompt
    AwaitMainMenu,
    /// Submitting the object identifier and answering the search prompts
    SubmitObjectId,
    /// Choosing one body out of a candidate list
    ResolveAmbiguity,
    /// Registering the contact e-mail and choosing the binary format
    ConfirmEphemerisParams,
    /// Submitting the kernel start and stop dates
    SubmitDateRange,
    /// Declining additional objects for the kernel file
    SubmitOutputOptions,
    /// Waiting for the service to announce the kernel transfer
    AwaitTransferStart,
    /// Receiving the kernel payload
    ReceivingFile,
    /// Kernel received and handed off
    Done,
    /// Negotiation ended with an error
    Failed,
}

impl Stage {
    /// Every stage, in negotiation order
    pub const ALL: [Stage; 11] = [
        Stage::Connecting,
        Stage::AwaitMainMenu,
        Stage::SubmitObjectId,
        Stage::ResolveAmbiguity,
        Stage::ConfirmEphemerisParams,
        Stage::SubmitDateRange,
        Stage::SubmitOutputOptions,
        Stage::AwaitTransferStart,
        Stage::ReceivingFile,
        Stage::Done,
        Stage::Failed,
    ];

    /// Stable snake_case name, as used in logs and events
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Connecting => "connecting",
            Stage::AwaitMainMenu => "await_main_menu",
            Stage::SubmitObjectId => "submit_object_id",
            Stage::ResolveAmbiguity => "resolve_ambiguity",
            Stage::ConfirmEphemerisParams => "confirm_ephemeris_params",
            Stage::SubmitDateRange => "submit_date_range",
            Stage::SubmitOutputOptions => "submit_output_options",
            Stage::AwaitTransferStart => "await_transfer_start",
            Stage::ReceivingFile => "receiving_file",
            Stage::Done => "done",
            Stage::Failed => "failed",
        }
    }

    /// Whether the negotiation has ended
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Done | Stage::Failed)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of a Horizons small-body search result
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    /// Record number, which is what the service expects as a selection
    pub record: String,
    /// Remaining columns of the row (epoch, designation, name)
    pub description: String,
}

impl std::fmt::Display for Candidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.description.is_empty() {
            write!(f, "{}", self.record)
        } else {
            write!(f, "{} ({})", self.record, self.description)
        }
    }
}

/// A successfully retrieved kernel
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Retrieval {
    /// Identifier as submitted by the caller
    pub object: String,
    /// SPK object ID reported by the service
    pub object_id: String,
    /// Body name reported by the service (or the submitted identifier)
    pub target: String,
    /// Final location of the kernel file
    pub path: PathBuf,
    /// Kernel size in bytes
    pub bytes: u64,
}

/// Event emitted during a retrieval
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A retrieval was started for an object
    Started {
        /// Identifier as submitted
        object: String,
    },

    /// The negotiation moved to another stage
    StageChanged {
        /// Identifier as submitted
        object: String,
        /// Stage just entered
        stage: Stage,
    },

    /// Kernel bytes received so far (only when progress reporting is enabled)
    TransferProgress {
        /// Identifier as submitted
        object: String,
        /// Bytes received, never decreasing within one transfer
        received: u64,
        /// Total size, when the framing announces it
        #[serde(skip_serializing_if = "Option::is_none")]
        total: Option<u64>,
        /// Percentage (0 to 100), when the total is known
        #[serde(skip_serializing_if = "Option::is_none")]
        percent: Option<u8>,
    },

    /// Kernel written to its final location
    Completed {
        /// Identifier as submitted
        object: String,
        /// Final path
        path: PathBuf,
        /// Size in bytes
        bytes: u64,
    },

    /// Retrieval failed
    Failed {
        /// Identifier as submitted
        object: String,
        /// Machine-readable error kind
        kind: ErrorKind,
        /// Error message
        error: String,
    },
}
