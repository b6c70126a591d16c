//! Error types for the active-message layer.
//!
//! Three families, matching where a failure is observed:
//!
//! - local misuse, returned synchronously from the call that caused it
//! - transport failures, surfaced later through the terminal state of the
//!   affected request or rendezvous session
//! - protocol mismatches, fatal to the one message they concern

use amflow_core::{TransportError, WorkerAddress};

use crate::am::{DataHandle, SessionState};
use crate::wire::WireError;

/// Status codes exchanged between peers and returned by handlers that
/// reject a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AmStatus {
    /// No handler is registered for the message id.
    NoHandler,
    /// The peers disagree about the shape of a transfer.
    ProtocolError,
    /// The receiver could not allocate what the message needs.
    NoResource,
    /// The receiver does not support this kind of delivery.
    Unsupported,
    /// Application-defined status. Only the low 31 bits travel on the wire.
    Custom(u32),
}

const CUSTOM_BIT: u32 = 0x8000_0000;

impl AmStatus {
    /// Wire representation.
    pub fn code(self) -> u32 {
        match self {
            AmStatus::NoHandler => 1,
            AmStatus::ProtocolError => 2,
            AmStatus::NoResource => 3,
            AmStatus::Unsupported => 4,
            AmStatus::Custom(code) => CUSTOM_BIT | (code & !CUSTOM_BIT),
        }
    }

    /// Parse a wire code. Codes this version does not know map to
    /// `ProtocolError`.
    pub fn from_code(code: u32) -> Self {
        match code {
            1 => AmStatus::NoHandler,
            2 => AmStatus::ProtocolError,
            3 => AmStatus::NoResource,
            4 => AmStatus::Unsupported,
            c if c & CUSTOM_BIT != 0 => AmStatus::Custom(c & !CUSTOM_BIT),
            _ => AmStatus::ProtocolError,
        }
    }
}

impl std::fmt::Display for AmStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AmStatus::NoHandler => write!(f, "no handler"),
            AmStatus::ProtocolError => write!(f, "protocol error"),
            AmStatus::NoResource => write!(f, "no resource"),
            AmStatus::Unsupported => write!(f, "unsupported"),
            AmStatus::Custom(code) => write!(f, "custom status {code}"),
        }
    }
}

/// Errors produced by the active-message layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmError {
    /// The scatter/gather list cannot be sent.
    #[error("invalid segment list: {reason}")]
    InvalidSegments {
        /// What is wrong with the list.
        reason: &'static str,
    },

    /// The payload exceeds the configured limit for its path.
    #[error("payload of {size} bytes exceeds limit of {max}")]
    PayloadTooLarge {
        /// Offending size in bytes.
        size: usize,
        /// Configured limit in bytes.
        max: usize,
    },

    /// Too many packets are waiting for the link to come up.
    #[error("send queue to {peer} is full: capacity {capacity}")]
    QueueFull {
        /// Destination worker.
        peer: WorkerAddress,
        /// Maximum queued packets.
        capacity: usize,
    },

    /// The worker was closed.
    #[error("worker closed")]
    WorkerClosed,

    /// No retained buffer is held under this handle.
    #[error("unknown data handle {handle}")]
    UnknownDataHandle {
        /// The handle presented for release.
        handle: DataHandle,
    },

    /// The transport reported a failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The link to the peer went down before the operation finished.
    #[error("link to {peer} is down")]
    LinkDown {
        /// Remote worker.
        peer: WorkerAddress,
    },

    /// Destination segments do not add up to the announced bulk length.
    #[error("destination segments total {provided} bytes, expected {expected}")]
    SegmentLengthMismatch {
        /// Bulk bytes announced by the sender.
        expected: usize,
        /// Bytes the destination segments can hold.
        provided: usize,
    },

    /// The sender reported a different number of placed bytes than announced.
    #[error("rendezvous placed {received} bytes, expected {expected}")]
    ByteCountMismatch {
        /// Announced bulk length.
        expected: u64,
        /// Bytes the sender reports as placed.
        received: u64,
    },

    /// The receiver turned the message down.
    #[error("rejected by receiver: {status}")]
    Rejected {
        /// Status sent by the receiver.
        status: AmStatus,
    },

    /// The sender abandoned the transfer.
    #[error("aborted by sender: {status}")]
    Aborted {
        /// Status sent by the sender.
        status: AmStatus,
    },

    /// A rendezvous session was asked to move backwards or out of a
    /// terminal state.
    #[error("invalid session transition: {from:?} -> {to:?}")]
    InvalidState {
        /// Current state.
        from: SessionState,
        /// Requested state.
        to: SessionState,
    },

    /// A packet could not be encoded or decoded.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// `wait` gave up after spinning the progress loop.
    #[error("request still pending after {spins} progress calls")]
    Stalled {
        /// Number of progress calls made.
        spins: usize,
    },
}

/// Result type for active-message operations.
pub type AmResult<T> = Result<T, AmError>;
