//! Send engine: eager and rendezvous entry points, and the sender's half of
//! the rendezvous protocol.

use std::io::IoSlice;

use amflow_core::{AmId, WorkerAddress};

use super::message::{Payload, SendParams};
use super::request::{RequestCell, SendPath, SendRequest};
use super::worker::{PendingRendezvous, WorkerShared};
use crate::error::{AmError, AmResult, AmStatus};
use crate::link::Submitted;
use crate::wire::{self, Frame, RemoteSegment};

const EMPTY_SEGMENT_LIST: AmError = AmError::InvalidSegments {
    reason: "segment list is empty",
};

/// Header prefix and bulk slices of a rendezvous payload.
fn split_rendezvous<'p>(payload: Payload<'p>) -> AmResult<(&'p [u8], Vec<&'p [u8]>)> {
    match payload {
        Payload::Contig(data) => {
            let prefix: &[u8] = &[];
            Ok((prefix, vec![data]))
        }
        Payload::Iov(segments) => {
            let (first, rest) = segments.split_first().ok_or(EMPTY_SEGMENT_LIST)?;
            Ok((&**first, rest.iter().map(|s| &**s).collect()))
        }
    }
}

/// Status an aborting sender reports for `error`.
fn abort_status(error: &AmError) -> AmStatus {
    match error {
        AmError::SegmentLengthMismatch { .. } => AmStatus::ProtocolError,
        _ => AmStatus::NoResource,
    }
}

impl WorkerShared {
    pub(crate) fn send_eager(
        &self,
        peer: WorkerAddress,
        id: AmId,
        payload: Payload<'_>,
        params: SendParams,
    ) -> AmResult<SendRequest> {
        let len = payload.len();
        let packet = match payload {
            Payload::Iov([]) => return Err(EMPTY_SEGMENT_LIST),
            _ if len > self.config.max_eager_size => {
                return Err(AmError::PayloadTooLarge {
                    size: len,
                    max: self.config.max_eager_size,
                })
            }
            Payload::Contig(data) => wire::encode_eager(id, params.flags, &[IoSlice::new(data)])?,
            Payload::Iov(segments) => wire::encode_eager(id, params.flags, segments)?,
        };

        let mut state = self.state.borrow_mut();
        if state.closed {
            return Err(AmError::WorkerClosed);
        }

        let request = RequestCell::new(len, SendPath::Eager, params.callback);
        let link = self.link(&mut state, peer);
        match link.submit(&*self.transport, packet, Some(request.clone()))? {
            Submitted::Sent => state.completions.push_back((request.clone(), Ok(()))),
            Submitted::Queued => {}
            Submitted::Failed(e) => state.completions.push_back((request.clone(), Err(e))),
        }
        state.stats.eager_sent += 1;
        tracing::trace!(%peer, %id, len, "eager send");

        Ok(SendRequest::new(request))
    }

    pub(crate) fn send_rendezvous(
        &self,
        peer: WorkerAddress,
        id: AmId,
        payload: Payload<'_>,
        params: SendParams,
    ) -> AmResult<SendRequest> {
        let (prefix, bulk) = split_rendezvous(payload)?;
        let bulk_len: usize = bulk.iter().map(|s| s.len()).sum();
        if prefix.len() > self.config.max_eager_size {
            return Err(AmError::PayloadTooLarge {
                size: prefix.len(),
                max: self.config.max_eager_size,
            });
        }
        if bulk_len > self.config.max_rendezvous_size {
            return Err(AmError::PayloadTooLarge {
                size: bulk_len,
                max: self.config.max_rendezvous_size,
            });
        }

        let mut state = self.state.borrow_mut();
        if state.closed {
            return Err(AmError::WorkerClosed);
        }

        // The request id is the slab slot the pending send will occupy.
        let request_id = state.rendezvous_sends.vacant_key();
        let packet = wire::encode_ready_to_send(id, params.flags, request_id as u64, bulk_len as u64, prefix)?;
        let request = RequestCell::new(prefix.len() + bulk_len, SendPath::Rendezvous, params.callback);

        let link = self.link(&mut state, peer);
        match link.submit(&*self.transport, packet, None)? {
            Submitted::Sent | Submitted::Queued => {
                state.rendezvous_sends.insert(PendingRendezvous {
                    request: request.clone(),
                    peer,
                    bulk: bulk.concat(),
                });
            }
            Submitted::Failed(e) => state.completions.push_back((request.clone(), Err(e))),
        }
        state.stats.rendezvous_sent += 1;
        tracing::debug!(%peer, %id, request_id, prefix = prefix.len(), bulk = bulk_len, "rendezvous send");

        Ok(SendRequest::new(request))
    }

    /// Send a protocol frame that settles no request.
    pub(crate) fn send_control(&self, peer: WorkerAddress, frame: &Frame<'_>) -> AmResult<()> {
        let packet = frame.encode()?;
        let mut state = self.state.borrow_mut();
        let link = self.link(&mut state, peer);
        match link.submit(&*self.transport, packet, None)? {
            Submitted::Sent | Submitted::Queued => Ok(()),
            Submitted::Failed(e) => Err(e),
        }
    }

    /// Tell the sender of rendezvous `request` it was turned down.
    pub(crate) fn reject(&self, peer: WorkerAddress, request: u64, status: AmStatus) {
        tracing::debug!(%peer, request, %status, "rejecting rendezvous");
        if let Err(e) = self.send_control(peer, &Frame::Reject { request, status }) {
            tracing::warn!(%peer, request, error = %e, "could not deliver reject");
        }
    }

    /// Take the pending rendezvous send `request` if `peer` owns it.
    fn take_pending(&self, peer: WorkerAddress, request: u64) -> Option<PendingRendezvous> {
        let mut state = self.state.borrow_mut();
        let key = usize::try_from(request).ok()?;
        if !state.rendezvous_sends.get(key).is_some_and(|p| p.peer == peer) {
            tracing::warn!(%peer, request, "no pending rendezvous send for reply");
            return None;
        }
        Some(state.rendezvous_sends.remove(key))
    }

    /// The receiver named its destinations: place the bulk, then finish.
    pub(crate) fn on_ready_to_receive(
        &self,
        peer: WorkerAddress,
        request: u64,
        session: u64,
        segments: &[RemoteSegment],
    ) {
        let Some(pending) = self.take_pending(peer, request) else {
            return;
        };

        let outcome = self
            .scatter(peer, &pending.bulk, segments)
            .and_then(|bytes| {
                self.send_control(peer, &Frame::Finish { session, bytes })?;
                Ok(bytes)
            });

        let result = match outcome {
            Ok(bytes) => {
                self.state.borrow_mut().stats.bulk_bytes_placed += bytes;
                tracing::debug!(%peer, request, session, bytes, "rendezvous bulk placed");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(%peer, request, session, error = %e, "rendezvous placement failed");
                let status = abort_status(&e);
                if let Err(abort_err) = self.send_control(peer, &Frame::Abort { session, status }) {
                    tracing::warn!(%peer, session, error = %abort_err, "could not deliver abort");
                }
                Err(e)
            }
        };
        self.state
            .borrow_mut()
            .completions
            .push_back((pending.request, result));
    }

    /// The receiver turned the rendezvous down.
    pub(crate) fn on_reject(&self, peer: WorkerAddress, request: u64, status: AmStatus) {
        if let Some(pending) = self.take_pending(peer, request) {
            tracing::debug!(%peer, request, %status, "rendezvous rejected");
            self.state
                .borrow_mut()
                .completions
                .push_back((pending.request, Err(AmError::Rejected { status })));
        }
    }

    /// Spread `bulk` over `segments` in order, at most `max_put_size` bytes
    /// per put. Returns the number of bytes placed.
    fn scatter(&self, peer: WorkerAddress, bulk: &[u8], segments: &[RemoteSegment]) -> AmResult<u64> {
        let capacity = segments
            .iter()
            .try_fold(0u64, |acc, s| acc.checked_add(s.len));
        if capacity != Some(bulk.len() as u64) {
            return Err(AmError::SegmentLengthMismatch {
                expected: bulk.len(),
                provided: capacity
                    .and_then(|c| usize::try_from(c).ok())
                    .unwrap_or(usize::MAX),
            });
        }

        let chunk = self.config.max_put_size;
        let mut rest = bulk;
        for segment in segments {
            let (head, tail) = rest.split_at(segment.len as usize);
            for (i, piece) in head.chunks(chunk).enumerate() {
                self.transport.put(peer, segment.key, i * chunk, piece)?;
            }
            rest = tail;
        }
        Ok(bulk.len() as u64)
    }
}
