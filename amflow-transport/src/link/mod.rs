//! Per-peer link state.
//!
//! A link tracks whether the transport can carry packets to one remote
//! worker yet. Packets submitted while the handshake is running wait in a
//! bounded FIFO and are flushed in order once the transport reports the
//! link up.

mod core;
mod metrics;

pub use core::LinkState;
pub(crate) use core::{Link, Submitted};
pub use metrics::LinkMetrics;
