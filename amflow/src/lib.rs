//! # amflow
//!
//! Active messages for Rust: a sender names a handler by id and the
//! receiver runs it when the message arrives.
//!
//! ## Crate Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              amflow (this crate)                            │
//! │   Re-exports everything + prelude                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │              amflow-transport                               │
//! │  • Worker: registry, dispatcher, progress loop              │
//! │  • Endpoint: eager + rendezvous sends, scatter/gather       │
//! │  • Wire format, links, loopback fabric                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │              amflow-core                                    │
//! │  Transport trait, MemoryRegion, AmId, WorkerAddress         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Delivery paths
//!
//! | Path | Entry point | Payload |
//! |------|-------------|---------|
//! | Eager | [`Endpoint::am_send`] | copied inline into one packet |
//! | Rendezvous | [`Endpoint::am_send_rendezvous`] | prefix inline, bulk placed into receiver buffers |
//!
//! ## Quick Start
//!
//! ```ignore
//! use amflow::prelude::*;
//!
//! let fabric = LoopbackFabric::new(FabricConfig::default());
//! let client = Worker::new(fabric.attach(), WorkerConfig::default());
//! let server = Worker::new(fabric.attach(), WorkerConfig::default());
//!
//! server.set_am_handler(AmId::new(7), AmHandler::new(|msg| {
//!     if let Some(reply) = msg.reply_endpoint() {
//!         let _ = reply.am_send(AmId::new(8), msg.data(), SendParams::new());
//!     }
//!     Disposition::Consumed
//! }))?;
//!
//! let ep = client.endpoint(server.address())?;
//! let request = ep.am_send(AmId::new(7), b"echo", SendParams::new().reply())?;
//! client.progress_until(|| {
//!     server.progress();
//!     request.is_done()
//! })?;
//! ```

#![deny(missing_docs)]

pub use amflow_core::*;
pub use amflow_transport::*;

/// The types most programs need.
pub mod prelude {
    pub use amflow_core::{AmId, Transport, WorkerAddress};
    pub use amflow_transport::{
        AmError, AmHandler, AmHandlerFlags, AmMessage, AmResult, AmStatus, DataHandle,
        Disposition, Endpoint, FabricConfig, LoopbackFabric, Payload, RendezvousDone,
        RendezvousMessage, RendezvousPlan, RequestState, SendFlags, SendParams, SendRequest,
        Worker, WorkerConfig,
    };
}
