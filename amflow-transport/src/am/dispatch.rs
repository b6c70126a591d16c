//! Receive dispatcher: turns transport events into handler calls, request
//! completions and rendezvous session steps.
//!
//! No `RefCell` borrow is held across a call into application code. The
//! handler is cloned out of the registry first, so a handler may register,
//! send or release data while it runs.

use std::rc::Rc;

use amflow_core::{AmId, Transport, TransportEvent, WorkerAddress};

use super::endpoint::Endpoint;
use super::flags::{RecvFlags, SendFlags};
use super::message::{AmMessage, Disposition, RendezvousMessage};
use super::rendezvous::{RendezvousSession, SessionNotice, SessionState};
use super::worker::WorkerShared;
use crate::error::{AmError, AmStatus};
use crate::link::Link;
use crate::wire::{self, Frame};

impl WorkerShared {
    pub(crate) fn handle_event(self: &Rc<Self>, event: TransportEvent) {
        match event {
            TransportEvent::Packet { source, bytes } => self.on_packet(source, &bytes),
            TransportEvent::LinkUp { peer } => self.on_link_up(peer),
            TransportEvent::LinkDown { peer } => self.on_link_down(peer),
        }
    }

    fn on_packet(self: &Rc<Self>, source: WorkerAddress, bytes: &[u8]) {
        {
            let mut state = self.state.borrow_mut();
            state.stats.packets_received += 1;
            state.stats.bytes_received += bytes.len() as u64;
        }

        let frame = match wire::decode(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(%source, error = %e, "dropping undecodable packet");
                self.state.borrow_mut().stats.decode_errors += 1;
                return;
            }
        };

        match frame {
            Frame::Eager { id, flags, payload } => self.dispatch_eager(source, id, flags, payload),
            Frame::ReadyToSend {
                id,
                flags,
                request,
                remaining,
                prefix,
            } => self.on_ready_to_send(source, id, flags, request, remaining, prefix),
            Frame::ReadyToReceive {
                request,
                session,
                segments,
            } => self.on_ready_to_receive(source, request, session, &segments),
            Frame::Reject { request, status } => self.on_reject(source, request, status),
            Frame::Finish { session, bytes } => self.on_finish(source, session, bytes),
            Frame::Abort { session, status } => {
                self.end_session(source, session, |session, transport| {
                    session.fail(transport, AmError::Aborted { status })
                })
            }
        }
    }

    fn reply_endpoint(self: &Rc<Self>, source: WorkerAddress, flags: SendFlags) -> Option<Endpoint> {
        flags
            .contains(SendFlags::REPLY)
            .then(|| self.open_endpoint(source))
    }

    fn dispatch_eager(self: &Rc<Self>, source: WorkerAddress, id: AmId, flags: SendFlags, payload: &[u8]) {
        let handler = self.registry.borrow().get(id);
        let Some(handler) = handler else {
            tracing::warn!(%source, %id, len = payload.len(), "no handler registered, dropping message");
            self.state.borrow_mut().stats.unhandled += 1;
            return;
        };

        let buffer = self.pool.fill(payload);
        let handle = self.state.borrow_mut().held.next_handle();
        let msg = AmMessage {
            id,
            source,
            data: &buffer,
            reply: self.reply_endpoint(source, flags),
            flags: RecvFlags::from(flags) | RecvFlags::DATA,
            handle,
        };
        let disposition = handler.on_eager(&msg);
        drop(msg);

        let mut state = self.state.borrow_mut();
        state.stats.eager_dispatched += 1;
        match disposition {
            Disposition::Consumed => {}
            Disposition::Retain => {
                tracing::trace!(%id, %handle, len = buffer.len(), "handler retained data");
                state.held.hold(handle, buffer);
                state.stats.retained += 1;
            }
            Disposition::Reject(status) => {
                tracing::debug!(%source, %id, %status, "handler rejected message");
                state.stats.rejected += 1;
            }
        }
    }

    fn on_ready_to_send(
        self: &Rc<Self>,
        source: WorkerAddress,
        id: AmId,
        flags: SendFlags,
        request: u64,
        remaining: u64,
        prefix: &[u8],
    ) {
        let mut session = RendezvousSession::new(source, request, id, remaining as usize);

        let handler = self.registry.borrow().get(id);
        let Some(handler) = handler.filter(|h| h.accepts_rendezvous()) else {
            tracing::warn!(%source, %id, remaining, "no rendezvous handler registered");
            self.state.borrow_mut().stats.unhandled += 1;
            self.reject(source, request, AmStatus::NoHandler);
            return;
        };

        if remaining > self.config.max_rendezvous_size as u64 {
            tracing::warn!(%source, %id, remaining, max = self.config.max_rendezvous_size, "rendezvous too large");
            self.state.borrow_mut().stats.rejected += 1;
            self.reject(source, request, AmStatus::NoResource);
            return;
        }

        if let Err(e) = session.advance(SessionState::AwaitingHandlerDecision) {
            tracing::warn!(%source, %id, error = %e, "rendezvous session out of order");
            return;
        }
        let msg = RendezvousMessage {
            id,
            source,
            prefix,
            reply: self.reply_endpoint(source, flags),
            flags: RecvFlags::from(flags) | RecvFlags::RENDEZVOUS,
            remaining_length: remaining as usize,
        };
        let decision = handler.on_rendezvous(&msg);
        drop(msg);

        let plan = match decision {
            Ok(plan) => plan,
            Err(status) => {
                self.state.borrow_mut().stats.rejected += 1;
                self.reject(source, request, status);
                return;
            }
        };

        let provided = plan.total_len();
        let segments = session.accept_plan(plan);
        if provided != remaining as usize {
            let error = AmError::SegmentLengthMismatch {
                expected: remaining as usize,
                provided,
            };
            tracing::warn!(%source, %id, error = %error, "rendezvous plan does not fit");
            let notice = session.fail(&*self.transport, error);
            self.state.borrow_mut().stats.rendezvous_failed += 1;
            self.reject(source, request, AmStatus::ProtocolError);
            if let Some(notice) = notice {
                notice.fire();
            }
            return;
        }

        let remote = session.register(&*self.transport, segments);
        if let Err(e) = session.advance(SessionState::BulkTransfer) {
            tracing::warn!(%source, %id, error = %e, "rendezvous session out of order");
            return;
        }
        let key = {
            let mut state = self.state.borrow_mut();
            state.stats.rendezvous_started += 1;
            state.sessions.insert(session)
        };
        tracing::debug!(%source, %id, request, session = key, segments = remote.len(), "rendezvous accepted");

        let ready = Frame::ReadyToReceive {
            request,
            session: key as u64,
            segments: remote,
        };
        if let Err(e) = self.send_control(source, &ready) {
            self.end_session(source, key as u64, |session, transport| session.fail(transport, e));
        }
    }

    fn on_finish(&self, source: WorkerAddress, session: u64, bytes: u64) {
        self.end_session(source, session, |session, transport| {
            session.complete(transport, bytes)
        });
    }

    /// Remove session `key` if `source` owns it and finish it with `end`.
    fn end_session<F>(&self, source: WorkerAddress, key: u64, end: F)
    where
        F: FnOnce(RendezvousSession, &dyn Transport) -> Option<SessionNotice>,
    {
        let session = {
            let mut state = self.state.borrow_mut();
            let Ok(key) = usize::try_from(key) else {
                return;
            };
            if !state.sessions.get(key).is_some_and(|s| s.peer() == source) {
                tracing::warn!(%source, session = key, "no such rendezvous session");
                return;
            }
            state.sessions.remove(key)
        };
        tracing::trace!(
            %source,
            request = session.request(),
            state = ?session.state(),
            "ending rendezvous session"
        );

        let notice = end(session, &*self.transport);
        if let Some(notice) = notice {
            {
                let mut state = self.state.borrow_mut();
                if notice.succeeded() {
                    state.stats.rendezvous_completed += 1;
                } else {
                    state.stats.rendezvous_failed += 1;
                }
            }
            notice.fire();
        }
    }

    fn on_link_up(&self, peer: WorkerAddress) {
        let settled = {
            let mut state = self.state.borrow_mut();
            let settled = self.link(&mut state, peer).mark_connected(&*self.transport);
            let count = settled.len();
            state.settle_later(settled);
            count
        };
        tracing::debug!(%peer, settled, "link up");
    }

    fn on_link_down(&self, peer: WorkerAddress) {
        let sessions: Vec<RendezvousSession> = {
            let mut state = self.state.borrow_mut();
            let settled = state.links.get_mut(&peer).map(Link::mark_failed).unwrap_or_default();
            state.settle_later(settled);

            let orphaned: Vec<usize> = state
                .rendezvous_sends
                .iter()
                .filter(|(_, pending)| pending.peer == peer)
                .map(|(key, _)| key)
                .collect();
            for key in orphaned {
                let pending = state.rendezvous_sends.remove(key);
                state
                    .completions
                    .push_back((pending.request, Err(AmError::LinkDown { peer })));
            }

            let keys: Vec<usize> = state
                .sessions
                .iter()
                .filter(|(_, session)| session.peer() == peer)
                .map(|(key, _)| key)
                .collect();
            keys.into_iter()
                .map(|key| state.sessions.remove(key))
                .collect()
        };

        tracing::warn!(%peer, sessions = sessions.len(), "link down");
        for session in sessions {
            if let Some(notice) = session.fail(&*self.transport, AmError::LinkDown { peer }) {
                self.state.borrow_mut().stats.rendezvous_failed += 1;
                notice.fire();
            }
        }
    }
}
