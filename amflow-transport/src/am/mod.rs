//! Active messages: handlers, requests, and the worker that moves them.
//!
//! # Architecture
//!
//! ```text
//! Endpoint::am_send ──────────► send ──► Link ──► Transport::send
//! Endpoint::am_send_rendezvous ─┘   (queue while connecting)
//!
//! Worker::progress ──► Transport::poll ──► dispatch
//!                                           ├── eager: registry → handler → Disposition
//!                                           ├── rendezvous: session → plan → put → finish
//!                                           └── link up/down: flush or fail
//!                  └─► completions (request state + callbacks)
//! ```
//!
//! Everything is single-threaded. Callbacks run inside `progress()`.

mod dispatch;
mod endpoint;
mod flags;
mod message;
mod pool;
mod registry;
mod rendezvous;
mod request;
mod send;
mod worker;

pub use endpoint::Endpoint;
pub use flags::{AmHandlerFlags, RecvFlags, SendFlags};
pub use message::{
    AmMessage, Disposition, Payload, RendezvousCallback, RendezvousDone, RendezvousMessage,
    RendezvousPlan, SendParams,
};
pub use pool::DataHandle;
pub use registry::{AmHandler, HandlerRegistry, DIRECT_SLOTS};
pub use rendezvous::SessionState;
pub(crate) use request::RequestCell;
pub use request::{CompletionCallback, RequestState, SendPath, SendRequest};
pub use worker::{Worker, WorkerStats};
