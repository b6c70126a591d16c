//! Receiver-side rendezvous sessions.
//!
//! ```text
//! HeaderReceived → AwaitingHandlerDecision → BulkTransfer → Complete
//!        └──────────────────┴─────────────────────┴──────→ Failed
//! ```
//!
//! A session owns the destination segments while the sender places bulk
//! data into them. Whatever way it ends, its completion callback runs
//! exactly once.

use amflow_core::{AmId, MemoryRegion, RemoteKey, Transport, WorkerAddress};

use super::message::{RendezvousCallback, RendezvousDone, RendezvousPlan};
use crate::error::{AmError, AmResult};
use crate::wire::RemoteSegment;

/// Rendezvous session states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// The sender's header arrived.
    HeaderReceived,
    /// The handler is choosing destinations.
    AwaitingHandlerDecision,
    /// Destinations are registered; the sender is placing data.
    BulkTransfer,
    /// All bytes placed and handed to the application.
    Complete,
    /// Ended without delivering the bulk data.
    Failed,
}

impl SessionState {
    /// Whether the session has ended.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Complete | SessionState::Failed)
    }

    fn can_advance_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (HeaderReceived, AwaitingHandlerDecision)
            | (AwaitingHandlerDecision, BulkTransfer)
            | (BulkTransfer, Complete) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// A completion callback with its outcome, ready to run once no worker
/// state is borrowed.
pub(crate) struct SessionNotice {
    callback: RendezvousCallback,
    done: RendezvousDone,
}

impl SessionNotice {
    pub(crate) fn succeeded(&self) -> bool {
        self.done.result.is_ok()
    }

    pub(crate) fn fire(self) {
        (self.callback)(self.done)
    }
}

pub(crate) struct RendezvousSession {
    peer: WorkerAddress,
    request: u64,
    id: AmId,
    total_length: usize,
    state: SessionState,
    regions: Vec<(RemoteKey, MemoryRegion)>,
    completion: Option<(u64, RendezvousCallback)>,
}

impl RendezvousSession {
    pub(crate) fn new(peer: WorkerAddress, request: u64, id: AmId, total_length: usize) -> Self {
        Self {
            peer,
            request,
            id,
            total_length,
            state: SessionState::HeaderReceived,
            regions: Vec::new(),
            completion: None,
        }
    }

    pub(crate) fn peer(&self) -> WorkerAddress {
        self.peer
    }

    pub(crate) fn request(&self) -> u64 {
        self.request
    }

    pub(crate) fn state(&self) -> SessionState {
        self.state
    }

    /// Move forward to `to`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` for a backward move or a move out of a
    /// terminal state.
    pub(crate) fn advance(&mut self, to: SessionState) -> AmResult<()> {
        if !self.state.can_advance_to(to) {
            return Err(AmError::InvalidState {
                from: self.state,
                to,
            });
        }
        tracing::trace!(peer = %self.peer, id = %self.id, from = ?self.state, ?to, "session transition");
        self.state = to;
        Ok(())
    }

    /// Keep the plan's cookie and callback; hand back its segments.
    pub(crate) fn accept_plan(&mut self, plan: RendezvousPlan) -> Vec<Vec<u8>> {
        self.completion = Some((plan.cookie, plan.on_complete));
        plan.segments
    }

    /// Register destination segments, in order, and describe them for the
    /// sender.
    pub(crate) fn register(&mut self, transport: &dyn Transport, segments: Vec<Vec<u8>>) -> Vec<RemoteSegment> {
        segments
            .into_iter()
            .map(|buffer| {
                let region = MemoryRegion::from_vec(buffer);
                let len = region.len() as u64;
                let key = transport.register(region.clone());
                self.regions.push((key, region));
                RemoteSegment { key, len }
            })
            .collect()
    }

    /// The sender reports `bytes` placed.
    pub(crate) fn complete(mut self, transport: &dyn Transport, bytes: u64) -> Option<SessionNotice> {
        if bytes != self.total_length as u64 {
            let expected = self.total_length as u64;
            return self.fail(
                transport,
                AmError::ByteCountMismatch {
                    expected,
                    received: bytes,
                },
            );
        }
        if let Err(e) = self.advance(SessionState::Complete) {
            return self.fail(transport, e);
        }

        let segments = self.release_regions(transport);
        tracing::debug!(peer = %self.peer, id = %self.id, bytes, "rendezvous complete");
        self.completion.take().map(|(cookie, callback)| SessionNotice {
            callback,
            done: RendezvousDone {
                cookie,
                result: Ok(segments),
            },
        })
    }

    /// End the session with `error`.
    pub(crate) fn fail(mut self, transport: &dyn Transport, error: AmError) -> Option<SessionNotice> {
        if self.advance(SessionState::Failed).is_err() {
            return None;
        }
        self.release_regions(transport);
        tracing::debug!(peer = %self.peer, id = %self.id, error = %error, "rendezvous failed");
        self.completion.take().map(|(cookie, callback)| SessionNotice {
            callback,
            done: RendezvousDone {
                cookie,
                result: Err(error),
            },
        })
    }

    fn release_regions(&mut self, transport: &dyn Transport) -> Vec<Vec<u8>> {
        self.regions
            .drain(..)
            .map(|(key, region)| {
                drop(transport.deregister(key));
                region.into_vec()
            })
            .collect()
    }
}
