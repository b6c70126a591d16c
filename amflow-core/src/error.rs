//! Error types reported by transports.

use thiserror::Error;

use crate::{RemoteKey, WorkerAddress};

/// Errors a [`Transport`](crate::Transport) can report.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The link to the peer is gone
    #[error("connection to {peer} lost")]
    ConnectionLost {
        /// Peer whose link failed.
        peer: WorkerAddress,
    },

    /// No worker with this address is reachable
    #[error("unknown peer {peer}")]
    UnknownPeer {
        /// Address that could not be resolved.
        peer: WorkerAddress,
    },

    /// The remote key does not name a registered region
    #[error("unknown remote key {key}")]
    UnknownRemoteKey {
        /// Key presented by the caller.
        key: RemoteKey,
    },

    /// A put would write past the end of the region
    #[error("put of {len} bytes at offset {offset} overflows region {key} of {capacity} bytes")]
    OutOfBounds {
        /// Target region.
        key: RemoteKey,
        /// Write offset.
        offset: usize,
        /// Write length.
        len: usize,
        /// Region length.
        capacity: usize,
    },

    /// The put operation failed on the wire
    #[error("put to {peer} failed")]
    PutFailed {
        /// Peer owning the target region.
        peer: WorkerAddress,
    },

    /// Packet exceeds what the transport accepts
    #[error("packet of {size} bytes exceeds transport limit of {max}")]
    PacketTooLarge {
        /// Packet size in bytes.
        size: usize,
        /// Transport limit in bytes.
        max: usize,
    },
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
