//! Endpoints: a worker's view of one remote peer.

use std::rc::Rc;

use amflow_core::{AmId, WorkerAddress};

use super::message::{Payload, SendParams};
use super::request::SendRequest;
use super::worker::WorkerShared;
use crate::error::AmResult;
use crate::link::{LinkMetrics, LinkState};

/// Addresses one remote worker from a local worker.
///
/// Cheap to clone. Handlers receive one as the reply endpoint when the
/// sender asked for it.
#[derive(Clone)]
pub struct Endpoint {
    shared: Rc<WorkerShared>,
    peer: WorkerAddress,
}

impl Endpoint {
    pub(crate) fn new(shared: Rc<WorkerShared>, peer: WorkerAddress) -> Self {
        Self { shared, peer }
    }

    /// Address of the remote worker.
    pub fn peer(&self) -> WorkerAddress {
        self.peer
    }

    /// Address of the local worker.
    pub fn local(&self) -> WorkerAddress {
        self.shared.transport.local_address()
    }

    /// Link state, or `Failed` if the link was never opened.
    pub fn link_state(&self) -> LinkState {
        self.shared
            .state
            .borrow()
            .links
            .get(&self.peer)
            .map_or(LinkState::Failed, |link| link.state())
    }

    /// Whether packets go straight to the transport.
    pub fn is_connected(&self) -> bool {
        self.link_state() == LinkState::Connected
    }

    /// Packets waiting for the link to come up.
    pub fn queued(&self) -> usize {
        self.shared
            .state
            .borrow()
            .links
            .get(&self.peer)
            .map_or(0, |link| link.queue_len())
    }

    /// Link metrics.
    pub fn metrics(&self) -> LinkMetrics {
        self.shared
            .state
            .borrow()
            .links
            .get(&self.peer)
            .map(|link| link.metrics())
            .unwrap_or_default()
    }

    /// Send an active message on the eager path.
    ///
    /// The payload is copied into one packet before this returns, so the
    /// caller's buffers are free immediately. The request settles, and its
    /// callback runs, during a later `Worker::progress()` call.
    ///
    /// # Errors
    ///
    /// - `InvalidSegments`: empty segment list
    /// - `PayloadTooLarge`: payload above `max_eager_size`
    /// - `QueueFull`: the link is connecting and its queue is full
    /// - `WorkerClosed`: the worker was closed
    pub fn am_send<'a>(
        &self,
        id: AmId,
        payload: impl Into<Payload<'a>>,
        params: SendParams,
    ) -> AmResult<SendRequest> {
        self.shared.send_eager(self.peer, id, payload.into(), params)
    }

    /// Send an active message on the rendezvous path.
    ///
    /// For a segment list the first segment is the header prefix, delivered
    /// to the receiver's rendezvous callback; the rest is the bulk, placed
    /// directly into the destinations that callback names.
    ///
    /// A contiguous payload is not split: its header prefix is empty and the
    /// whole buffer is bulk. Only a segment list sends a non-empty prefix.
    /// Send the header as its own first segment when the receiver needs it.
    ///
    /// The request completes once every bulk byte was placed.
    ///
    /// # Errors
    ///
    /// - `InvalidSegments`: empty segment list
    /// - `PayloadTooLarge`: prefix above `max_eager_size`, or bulk above
    ///   `max_rendezvous_size`
    /// - `QueueFull`: the link is connecting and its queue is full
    /// - `WorkerClosed`: the worker was closed
    pub fn am_send_rendezvous<'a>(
        &self,
        id: AmId,
        payload: impl Into<Payload<'a>>,
        params: SendParams,
    ) -> AmResult<SendRequest> {
        self.shared
            .send_rendezvous(self.peer, id, payload.into(), params)
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("local", &self.local())
            .field("peer", &self.peer)
            .finish()
    }
}
