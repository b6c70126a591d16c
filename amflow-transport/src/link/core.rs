//! Link state machine and handshake queue.

use std::collections::VecDeque;
use std::rc::Rc;

use amflow_core::{LinkStatus, Transport, TransportError, WorkerAddress};

use super::metrics::LinkMetrics;
use crate::am::RequestCell;
use crate::error::{AmError, AmResult};

/// Connection state of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Handshake running; packets are queued.
    Connecting,
    /// Packets go straight to the transport.
    Connected,
    /// The link is gone; sends fail.
    Failed,
}

/// A packet waiting for the handshake, with the eager request it settles.
struct QueuedPacket {
    bytes: Vec<u8>,
    request: Option<Rc<RequestCell>>,
}

/// What happened to a submitted packet.
#[derive(Debug)]
pub(crate) enum Submitted {
    /// Handed to the transport.
    Sent,
    /// Waiting for the link to come up.
    Queued,
    /// Will never be sent.
    Failed(AmError),
}

/// Requests whose packets left (or can no longer leave) the queue.
pub(crate) type Settled = Vec<(Rc<RequestCell>, AmResult<()>)>;

/// Connection to one remote worker.
pub(crate) struct Link {
    peer: WorkerAddress,
    state: LinkState,
    queue: VecDeque<QueuedPacket>,
    max_queue_size: usize,
    metrics: LinkMetrics,
}

impl Link {
    /// Open a link, asking the transport to connect.
    pub(crate) fn open(peer: WorkerAddress, transport: &dyn Transport, max_queue_size: usize) -> Self {
        let mut metrics = LinkMetrics::default();
        let state = match transport.connect(peer) {
            Ok(LinkStatus::Ready) => {
                metrics.record_connected();
                LinkState::Connected
            }
            Ok(LinkStatus::Pending) => LinkState::Connecting,
            Err(e) => {
                tracing::warn!(%peer, error = %e, "connect failed");
                metrics.record_failure(0);
                LinkState::Failed
            }
        };
        tracing::debug!(%peer, ?state, "link opened");

        Self {
            peer,
            state,
            queue: VecDeque::new(),
            max_queue_size,
            metrics,
        }
    }

    /// Send `bytes` now, or queue them behind the handshake.
    ///
    /// `request` is settled when a queued packet is finally transmitted; for
    /// an immediate send the caller settles it from the return value.
    ///
    /// # Errors
    ///
    /// Returns `QueueFull` if the handshake queue is at capacity. Nothing is
    /// queued in that case.
    pub(crate) fn submit(
        &mut self,
        transport: &dyn Transport,
        bytes: Vec<u8>,
        request: Option<Rc<RequestCell>>,
    ) -> AmResult<Submitted> {
        match self.state {
            LinkState::Connected => Ok(match self.transmit(transport, bytes) {
                Ok(()) => Submitted::Sent,
                Err(e) => Submitted::Failed(e),
            }),
            LinkState::Connecting => {
                if self.queue.len() >= self.max_queue_size {
                    return Err(AmError::QueueFull {
                        peer: self.peer,
                        capacity: self.max_queue_size,
                    });
                }
                self.queue.push_back(QueuedPacket { bytes, request });
                self.metrics.record_packet_queued();
                tracing::debug!(
                    "Link::submit queued packet for {}, queue size now: {}",
                    self.peer,
                    self.queue.len()
                );
                Ok(Submitted::Queued)
            }
            LinkState::Failed => Ok(Submitted::Failed(AmError::LinkDown { peer: self.peer })),
        }
    }

    fn transmit(&mut self, transport: &dyn Transport, bytes: Vec<u8>) -> AmResult<()> {
        let len = bytes.len();
        match transport.send(self.peer, bytes) {
            Ok(()) => {
                self.metrics.record_packet_sent(len);
                Ok(())
            }
            Err(e) => {
                if matches!(e, TransportError::ConnectionLost { .. }) {
                    self.state = LinkState::Failed;
                    self.metrics.record_failure(self.queue.len());
                }
                tracing::warn!(peer = %self.peer, error = %e, "send failed");
                Err(e.into())
            }
        }
    }

    /// The transport reported the link up: flush the queue in order.
    pub(crate) fn mark_connected(&mut self, transport: &dyn Transport) -> Settled {
        if self.state != LinkState::Connected {
            self.state = LinkState::Connected;
            self.metrics.record_connected();
        }

        let mut settled = Vec::new();
        let flushed = self.queue.len();
        while let Some(packet) = self.queue.pop_front() {
            self.metrics.record_packet_dequeued();
            let result = if self.state == LinkState::Failed {
                Err(AmError::LinkDown { peer: self.peer })
            } else {
                self.transmit(transport, packet.bytes)
            };
            if let Some(request) = packet.request {
                settled.push((request, result));
            }
        }

        if flushed > 0 {
            tracing::debug!(peer = %self.peer, flushed, "link up, queue flushed");
        }
        settled
    }

    /// The transport reported the link down: drop the queue.
    pub(crate) fn mark_failed(&mut self) -> Settled {
        let peer = self.peer;
        if self.state != LinkState::Failed {
            self.metrics.record_failure(self.queue.len());
        }
        self.state = LinkState::Failed;
        self.queue
            .drain(..)
            .filter_map(|packet| packet.request)
            .map(|request| (request, Err(AmError::LinkDown { peer })))
            .collect()
    }

    pub(crate) fn state(&self) -> LinkState {
        self.state
    }

    pub(crate) fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn metrics(&self) -> LinkMetrics {
        self.metrics.clone()
    }
}
