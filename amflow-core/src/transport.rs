//! Transport abstraction driven by an active-message worker.
//!
//! A transport provides ordered, reliable packet delivery between workers,
//! connection readiness notifications, and direct placement of bytes into
//! memory regions a peer registered. Connection bootstrap, address
//! resolution and memory registration mechanics stay behind this trait.

use crate::{MemoryRegion, RemoteKey, TransportResult, WorkerAddress};

/// Result of asking a transport to connect to a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    /// The link can carry packets now.
    Ready,
    /// The handshake is running; a [`TransportEvent::LinkUp`] follows.
    Pending,
}

/// Something that happened on the transport since the last poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A packet arrived from `source`.
    Packet {
        /// Sending worker.
        source: WorkerAddress,
        /// Packet bytes, as passed to [`Transport::send`].
        bytes: Vec<u8>,
    },
    /// The link to `peer` is established.
    LinkUp {
        /// Remote worker.
        peer: WorkerAddress,
    },
    /// The link to `peer` failed. Packets in flight may be lost.
    LinkDown {
        /// Remote worker.
        peer: WorkerAddress,
    },
}

/// Transport contract.
///
/// Single-threaded: implementations use interior mutability and are shared
/// as `Rc<dyn Transport>`. Packets sent to one peer are delivered in the
/// order they were sent.
pub trait Transport {
    /// Address of this attachment.
    fn local_address(&self) -> WorkerAddress;

    /// Start (or observe) the link to `peer`.
    fn connect(&self, peer: WorkerAddress) -> TransportResult<LinkStatus>;

    /// Send one packet over an established link.
    fn send(&self, peer: WorkerAddress, packet: Vec<u8>) -> TransportResult<()>;

    /// Next pending event, if any. Never blocks.
    fn poll(&self) -> Option<TransportEvent>;

    /// Expose `region` for remote writes and return its descriptor.
    fn register(&self, region: MemoryRegion) -> RemoteKey;

    /// Withdraw a region registered with [`register`](Transport::register).
    fn deregister(&self, key: RemoteKey) -> Option<MemoryRegion>;

    /// Write `data` into the region `key` owned by `peer`, at `offset`.
    ///
    /// A put issued before a subsequent [`send`](Transport::send) to the same
    /// peer is visible to that peer by the time the packet is delivered.
    fn put(&self, peer: WorkerAddress, key: RemoteKey, offset: usize, data: &[u8])
        -> TransportResult<()>;
}
