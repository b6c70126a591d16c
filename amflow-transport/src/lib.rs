//! # amflow transport layer
//!
//! Active-message delivery between workers over a pluggable [`Transport`].
//!
//! This crate provides:
//! - **Worker**: handler registry, receive dispatcher and the cooperative
//!   progress loop
//! - **Endpoint**: eager and rendezvous send entry points, scatter/gather
//! - **Links**: per-peer connection state with a handshake queue
//! - **Wire format**: framed packets with CRC32C checksums
//! - **Loopback fabric**: an in-process [`Transport`] for tests
//!
//! ```ignore
//! use amflow_transport::{
//!     AmHandler, AmId, Disposition, FabricConfig, LoopbackFabric, SendParams, Worker,
//!     WorkerConfig,
//! };
//!
//! let fabric = LoopbackFabric::new(FabricConfig::default());
//! let client = Worker::new(fabric.attach(), WorkerConfig::default());
//! let server = Worker::new(fabric.attach(), WorkerConfig::default());
//!
//! server.set_am_handler(AmId::new(1), AmHandler::new(|msg| {
//!     assert_eq!(msg.data(), b"ping");
//!     Disposition::Consumed
//! }))?;
//!
//! let request = client
//!     .endpoint(server.address())?
//!     .am_send(AmId::new(1), b"ping", SendParams::new())?;
//! while !request.is_done() {
//!     client.progress();
//!     server.progress();
//! }
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

pub use amflow_core::{
    AmId, LinkStatus, MemoryRegion, RemoteKey, Transport, TransportError, TransportEvent,
    TransportResult, WorkerAddress,
};

// =============================================================================
// Modules
// =============================================================================

mod am;
mod config;
mod error;
mod link;

/// In-process fabric implementing [`Transport`].
pub mod loopback;

/// Packet framing with CRC32C checksums.
pub mod wire;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use am::{
    AmHandler, AmHandlerFlags, AmMessage, CompletionCallback, DataHandle, Disposition, Endpoint,
    HandlerRegistry, Payload, RecvFlags, RendezvousCallback, RendezvousDone, RendezvousMessage,
    RendezvousPlan, RequestState, SendFlags, SendParams, SendPath, SendRequest, SessionState,
    Worker, WorkerStats, DIRECT_SLOTS,
};
pub use config::WorkerConfig;
pub use error::{AmError, AmResult, AmStatus};
pub use link::{LinkMetrics, LinkState};
pub use loopback::{FabricConfig, FabricPort, FabricStats, LoopbackFabric};
pub use wire::WireError;
