//! # amflow-core
//!
//! Core abstractions shared by every amflow crate.
//!
//! - **Core types**: [`AmId`], [`WorkerAddress`], [`RemoteKey`]
//! - **Transport contract**: the [`Transport`] trait an active-message worker
//!   drives, plus the [`TransportEvent`]s it yields
//! - **Memory regions**: [`MemoryRegion`], the remotely writable buffers used
//!   by rendezvous transfers
//!
//! Nothing in this crate performs I/O. Concrete transports live elsewhere
//! (the loopback fabric in `amflow-transport` is one).

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod error;
mod region;
mod transport;
mod types;

pub use error::{TransportError, TransportResult};
pub use region::MemoryRegion;
pub use transport::{LinkStatus, Transport, TransportEvent};
pub use types::{AmId, RemoteKey, WorkerAddress};
