//! # Transfer bridge
//!
//! Moves artifact bytes between the HTTP side of the gateway and the
//! registry's streaming calls.
//!
//! - [`identifier`] parses `source/author/name:token` strings.
//! - [`field`] reads one multipart field up to a byte ceiling.
//! - [`collect`] accumulates upload metadata from multipart fields.
//! - [`upload`] relays a payload to the registry as bounded content frames.
//! - [`download`] assembles a pulled artifact into a single body.
//!
//! Uploads never hold more than one frame of the payload in memory. Downloads
//! are assembled in full so the response carries an exact length, and a stream
//! failure never reaches the client as a truncated body.

use std::fmt;

pub mod collect;
pub mod download;
pub mod field;
pub mod identifier;
pub mod upload;

pub use collect::MetadataCollector;
pub use download::DownloadAssembler;
pub use field::{FieldRead, read_bounded};
pub use identifier::{identifier_from_parts, parse_identifier, parse_reference};
pub use upload::{UploadBridge, UploadSession};

/// Where one transfer is in its life.
///
/// `Failed` is reachable from every state and is final, as is `Committed`.
/// A retry always starts a new transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// Nothing has been sent or requested yet.
    Idle,

    /// The registry call is open.
    StreamOpen,

    /// Content frames are moving.
    Transferring,

    /// The last frame has moved; waiting for the call to complete.
    Finalizing,

    /// The transfer completed.
    Committed,

    /// The transfer was abandoned.
    Failed,
}

impl TransferState {
    /// Whether no further transitions are possible.
    pub fn is_final(&self) -> bool {
        matches!(self, TransferState::Committed | TransferState::Failed)
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransferState::Idle => "idle",
            TransferState::StreamOpen => "stream-open",
            TransferState::Transferring => "transferring",
            TransferState::Finalizing => "finalizing",
            TransferState::Committed => "committed",
            TransferState::Failed => "failed",
        };
        f.write_str(name)
    }
}
