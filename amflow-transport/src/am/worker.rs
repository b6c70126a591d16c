//! Worker: the progress engine that owns handlers, links and in-flight state.
//!
//! Send entry points live on [`Endpoint`]; incoming packets are processed by
//! [`Worker::progress`], which the application calls repeatedly. Every
//! handler and completion callback runs inside `progress()` on the calling
//! thread, with no worker state borrowed.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use amflow_core::{AmId, Transport, WorkerAddress};
use slab::Slab;

use super::endpoint::Endpoint;
use super::flags::AmHandlerFlags;
use super::pool::{DataHandle, HeldData, RecvPool};
use super::registry::{AmHandler, HandlerRegistry};
use super::rendezvous::RendezvousSession;
use super::request::{RequestCell, SendRequest};
use crate::config::WorkerConfig;
use crate::error::{AmError, AmResult};
use crate::link::{Link, LinkMetrics, LinkState};

/// Counters kept by a worker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Packets taken from the transport.
    pub packets_received: u64,
    /// Bytes taken from the transport.
    pub bytes_received: u64,
    /// Packets dropped because they failed to decode.
    pub decode_errors: u64,
    /// Eager sends issued.
    pub eager_sent: u64,
    /// Eager messages handed to a handler.
    pub eager_dispatched: u64,
    /// Messages dropped because no handler was registered for their id.
    pub unhandled: u64,
    /// Messages a handler turned down.
    pub rejected: u64,
    /// Eager buffers retained by handlers.
    pub retained: u64,
    /// Retained buffers released by the application.
    pub released: u64,
    /// Rendezvous sends issued.
    pub rendezvous_sent: u64,
    /// Rendezvous sessions that reached bulk transfer on this receiver.
    pub rendezvous_started: u64,
    /// Rendezvous sessions completed on this receiver.
    pub rendezvous_completed: u64,
    /// Rendezvous sessions failed on this receiver.
    pub rendezvous_failed: u64,
    /// Bulk bytes this worker placed into peers' buffers.
    pub bulk_bytes_placed: u64,
    /// Sends settled successfully.
    pub sends_completed: u64,
    /// Sends settled with an error.
    pub sends_failed: u64,
}

/// A rendezvous send waiting for the receiver's destinations.
pub(crate) struct PendingRendezvous {
    pub(crate) request: Rc<RequestCell>,
    pub(crate) peer: WorkerAddress,
    pub(crate) bulk: Vec<u8>,
}

/// Mutable worker state.
#[derive(Default)]
pub(crate) struct WorkerState {
    pub(crate) closed: bool,
    pub(crate) links: HashMap<WorkerAddress, Link>,
    pub(crate) rendezvous_sends: Slab<PendingRendezvous>,
    pub(crate) sessions: Slab<RendezvousSession>,
    pub(crate) held: HeldData,
    pub(crate) completions: VecDeque<(Rc<RequestCell>, AmResult<()>)>,
    pub(crate) stats: WorkerStats,
}

impl WorkerState {
    /// Queue settled requests; they complete during the next progress pass.
    pub(crate) fn settle_later<I>(&mut self, settled: I)
    where
        I: IntoIterator<Item = (Rc<RequestCell>, AmResult<()>)>,
    {
        self.completions.extend(settled);
    }
}

/// State shared by a worker and its endpoints.
pub(crate) struct WorkerShared {
    pub(crate) transport: Rc<dyn Transport>,
    pub(crate) config: WorkerConfig,
    pub(crate) registry: RefCell<HandlerRegistry>,
    pub(crate) state: RefCell<WorkerState>,
    pub(crate) pool: RecvPool,
    in_progress: Cell<bool>,
}

impl WorkerShared {
    /// Get the link to `peer`, opening it (or reopening a failed one).
    pub(crate) fn link<'s>(&self, state: &'s mut WorkerState, peer: WorkerAddress) -> &'s mut Link {
        let transport = &*self.transport;
        let max_queue_size = self.config.max_queue_size;
        let link = state
            .links
            .entry(peer)
            .or_insert_with(|| Link::open(peer, transport, max_queue_size));
        if link.state() == LinkState::Failed {
            tracing::debug!(%peer, "reopening failed link");
            *link = Link::open(peer, transport, max_queue_size);
        }
        link
    }

    /// Endpoint to `peer`, opening the link on first use.
    pub(crate) fn open_endpoint(self: &Rc<Self>, peer: WorkerAddress) -> Endpoint {
        {
            let mut state = self.state.borrow_mut();
            if !state.links.contains_key(&peer) {
                self.link(&mut state, peer);
            }
        }
        Endpoint::new(Rc::clone(self), peer)
    }

    /// Settle queued requests, running their callbacks.
    fn fire_completions(&self) -> usize {
        let mut fired = 0;
        loop {
            let next = {
                let mut state = self.state.borrow_mut();
                let next = state.completions.pop_front();
                if let Some((_, result)) = &next {
                    match result {
                        Ok(()) => state.stats.sends_completed += 1,
                        Err(_) => state.stats.sends_failed += 1,
                    }
                }
                next
            };
            let Some((request, result)) = next else {
                break;
            };
            request.settle(result);
            fired += 1;
        }
        fired
    }
}

/// Clears the re-entrancy flag when a progress pass ends, even by panic.
struct ProgressGuard<'a>(&'a Cell<bool>);

impl Drop for ProgressGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// An active-message worker attached to one transport.
///
/// Cloning yields another handle to the same worker.
///
/// # Example
///
/// ```ignore
/// let fabric = LoopbackFabric::new(FabricConfig::default());
/// let sender = Worker::new(fabric.attach(), WorkerConfig::default());
/// let receiver = Worker::new(fabric.attach(), WorkerConfig::default());
///
/// receiver.set_am_handler(AmId::new(0), AmHandler::new(|msg| {
///     println!("{} bytes", msg.len());
///     Disposition::Consumed
/// }))?;
///
/// let ep = sender.endpoint(receiver.address())?;
/// let request = ep.am_send(AmId::new(0), b"hello", SendParams::new())?;
/// while !request.is_done() {
///     sender.progress();
///     receiver.progress();
/// }
/// ```
#[derive(Clone)]
pub struct Worker {
    shared: Rc<WorkerShared>,
}

impl Worker {
    /// Create a worker driving `transport`.
    pub fn new(transport: Rc<dyn Transport>, config: WorkerConfig) -> Self {
        let config = config.normalized();
        let pool = RecvPool::new(config.recv_pool_size, config.recv_buffer_capacity);
        tracing::debug!(address = %transport.local_address(), "worker created");
        Self {
            shared: Rc::new(WorkerShared {
                transport,
                config,
                registry: RefCell::new(HandlerRegistry::new()),
                state: RefCell::new(WorkerState::default()),
                pool,
                in_progress: Cell::new(false),
            }),
        }
    }

    /// Transport address of this worker.
    pub fn address(&self) -> WorkerAddress {
        self.shared.transport.local_address()
    }

    /// Configuration in use.
    pub fn config(&self) -> &WorkerConfig {
        &self.shared.config
    }

    /// Endpoint to `peer`. The link is opened on first use; sends issued
    /// before it is connected are queued.
    ///
    /// # Errors
    ///
    /// Returns `WorkerClosed` after [`close`](Worker::close).
    pub fn endpoint(&self, peer: WorkerAddress) -> AmResult<Endpoint> {
        {
            let mut state = self.shared.state.borrow_mut();
            if state.closed {
                return Err(AmError::WorkerClosed);
            }
            self.shared.link(&mut state, peer);
        }
        Ok(Endpoint::new(Rc::clone(&self.shared), peer))
    }

    /// Install or replace the handler for `id`.
    ///
    /// Safe to call at any time, including from inside a handler. A dispatch
    /// already running keeps the handler it started with.
    ///
    /// # Errors
    ///
    /// Returns `WorkerClosed` after [`close`](Worker::close).
    pub fn set_am_handler(&self, id: AmId, handler: AmHandler) -> AmResult<()> {
        if self.shared.state.borrow().closed {
            return Err(AmError::WorkerClosed);
        }
        let flags = handler.flags();
        let replaced = self.shared.registry.borrow_mut().insert(id, handler).is_some();
        tracing::debug!(%id, ?flags, replaced, "handler registered");
        Ok(())
    }

    /// Remove the handler for `id`. Returns whether one was registered.
    pub fn remove_am_handler(&self, id: AmId) -> bool {
        self.shared.registry.borrow_mut().remove(id).is_some()
    }

    /// Flags the handler for `id` was registered with.
    pub fn handler_flags(&self, id: AmId) -> Option<AmHandlerFlags> {
        self.shared.registry.borrow().get(id).map(|h| h.flags())
    }

    /// Number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.shared.registry.borrow().len()
    }

    /// Run one progress pass.
    ///
    /// Handles at most `max_events_per_progress` transport events, then
    /// settles finished sends. Returns the number of events and completions
    /// processed; zero means there was nothing to do. A call made from inside
    /// a callback returns zero immediately.
    pub fn progress(&self) -> usize {
        let shared = &self.shared;
        if shared.in_progress.replace(true) {
            tracing::trace!("nested progress call ignored");
            return 0;
        }
        let _guard = ProgressGuard(&shared.in_progress);

        let mut work = 0;
        for _ in 0..shared.config.max_events_per_progress {
            let Some(event) = shared.transport.poll() else {
                break;
            };
            shared.handle_event(event);
            work += 1;
        }
        work + shared.fire_completions()
    }

    /// Call [`progress`](Worker::progress) until `done` returns true.
    ///
    /// Returns the number of progress calls made.
    ///
    /// # Errors
    ///
    /// Returns `Stalled` after `wait_spin_limit` calls.
    pub fn progress_until<F>(&self, mut done: F) -> AmResult<usize>
    where
        F: FnMut() -> bool,
    {
        let limit = self.shared.config.wait_spin_limit;
        for spins in 0..limit {
            if done() {
                return Ok(spins);
            }
            self.progress();
        }
        if done() {
            Ok(limit)
        } else {
            Err(AmError::Stalled { spins: limit })
        }
    }

    /// Spin the progress loop until `request` settles, then return its outcome.
    ///
    /// # Errors
    ///
    /// The request's own error, or `Stalled` if it never settled.
    pub fn wait(&self, request: &SendRequest) -> AmResult<()> {
        self.progress_until(|| request.is_done())?;
        match request.result() {
            Some(result) => result,
            None => Err(AmError::Stalled {
                spins: self.shared.config.wait_spin_limit,
            }),
        }
    }

    /// Run `f` over data retained under `handle`.
    ///
    /// Returns `None` if nothing is held under `handle`. The data stays held
    /// while `f` runs; a release from inside `f` takes effect once `f` returns.
    pub fn with_held_data<R, F>(&self, handle: DataHandle, f: F) -> Option<R>
    where
        F: FnOnce(&[u8]) -> R,
    {
        let buffer = self.shared.state.borrow().held.get(handle)?;
        Some(f(&buffer))
    }

    /// Release data retained under `handle`; its buffer returns to the pool.
    ///
    /// # Errors
    ///
    /// Returns `UnknownDataHandle` if nothing is held under `handle`,
    /// including a second release of the same handle.
    pub fn release_data(&self, handle: DataHandle) -> AmResult<()> {
        let buffer = {
            let mut state = self.shared.state.borrow_mut();
            let buffer = state.held.take(handle)?;
            state.stats.released += 1;
            buffer
        };
        tracing::trace!(%handle, len = buffer.len(), "retained data released");
        drop(buffer);
        Ok(())
    }

    /// Number of retained buffers not yet released.
    pub fn held_count(&self) -> usize {
        self.shared.state.borrow().held.len()
    }

    /// Receive buffers currently out of the pool (in a handler or retained).
    pub fn recv_buffers_outstanding(&self) -> usize {
        self.shared.pool.outstanding()
    }

    /// Rendezvous sessions currently receiving bulk data.
    pub fn active_sessions(&self) -> usize {
        self.shared.state.borrow().sessions.len()
    }

    /// Rendezvous sends waiting for the receiver's destinations.
    pub fn pending_rendezvous_sends(&self) -> usize {
        self.shared.state.borrow().rendezvous_sends.len()
    }

    /// Metrics of the link to `peer`, if one was opened.
    pub fn link_metrics(&self, peer: WorkerAddress) -> Option<LinkMetrics> {
        self.shared.state.borrow().links.get(&peer).map(Link::metrics)
    }

    /// Snapshot of the worker counters.
    pub fn stats(&self) -> WorkerStats {
        self.shared.state.borrow().stats.clone()
    }

    /// Refuse new registrations and sends. In-flight work still settles
    /// through `progress()`.
    pub fn close(&self) {
        self.shared.state.borrow_mut().closed = true;
        tracing::debug!(address = %self.address(), "worker closed");
    }

    /// Whether [`close`](Worker::close) was called.
    pub fn is_closed(&self) -> bool {
        self.shared.state.borrow().closed
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("address", &self.address())
            .field("handlers", &self.handler_count())
            .finish()
    }
}
