//! Transport faults and malformed traffic.

use std::cell::Cell;
use std::rc::Rc;

use amflow_transport::wire::{self, Frame, RemoteSegment};
use amflow_transport::{
    AmError, AmHandler, AmId, AmResult, AmStatus, Disposition, FabricConfig, LinkState, RemoteKey,
    RequestState, SendFlags, SendParams, Transport, TransportError, TransportEvent, WorkerConfig,
};

use super::rendezvous::{landing_handler, whole, SharedLanding, BULK};
use super::Pair;

const DATA: AmId = AmId::new(0);

fn counted_params(calls: &Rc<Cell<usize>>) -> SendParams {
    let calls = calls.clone();
    SendParams::new().on_complete(move |_: &AmResult<()>| calls.set(calls.get() + 1))
}

#[test]
fn test_put_failure_fails_both_sides_once() {
    let pair = Pair::instant();
    let landing = SharedLanding::default();
    pair.receiver
        .set_am_handler(BULK, landing_handler(&landing, whole))
        .expect("register");
    pair.fabric.set_put_failures(true);

    let calls = Rc::new(Cell::new(0));
    let request = pair
        .endpoint()
        .am_send_rendezvous(BULK, &[5u8; 4096], counted_params(&calls))
        .expect("send");
    pair.pump();

    assert_eq!(
        request.result(),
        Some(Err(AmError::Transport(TransportError::PutFailed {
            peer: pair.receiver.address()
        })))
    );
    assert_eq!(calls.get(), 1);

    let landing = landing.borrow();
    assert_eq!(landing.done.len(), 1);
    assert_eq!(
        landing.error(0),
        AmError::Aborted {
            status: AmStatus::NoResource
        }
    );
    assert_eq!(pair.receiver.stats().rendezvous_failed, 1);
    assert_eq!(pair.receiver.active_sessions(), 0);
    assert_eq!(pair.fabric.registered_regions(pair.receiver.address()), 0);
}

#[test]
fn test_link_loss_during_rendezvous() {
    let pair = Pair::instant();
    let landing = SharedLanding::default();
    pair.receiver
        .set_am_handler(BULK, landing_handler(&landing, whole))
        .expect("register");

    let calls = Rc::new(Cell::new(0));
    let request = pair
        .endpoint()
        .am_send_rendezvous(BULK, &[9u8; 10_000], counted_params(&calls))
        .expect("send");

    // Receiver accepts and answers; the answer is still in flight.
    pair.receiver.progress();
    assert_eq!(pair.receiver.active_sessions(), 1);
    assert_eq!(pair.sender.pending_rendezvous_sends(), 1);
    assert_eq!(pair.fabric.registered_regions(pair.receiver.address()), 1);

    pair.fabric
        .disconnect(pair.sender.address(), pair.receiver.address());
    pair.pump();

    assert_eq!(
        request.result(),
        Some(Err(AmError::LinkDown {
            peer: pair.receiver.address()
        }))
    );
    assert_eq!(calls.get(), 1);
    assert_eq!(pair.sender.stats().sends_failed, 1);

    let landing = landing.borrow();
    assert_eq!(landing.done.len(), 1, "session fails exactly once");
    assert_eq!(
        landing.error(0),
        AmError::LinkDown {
            peer: pair.sender.address()
        }
    );
    assert_eq!(pair.receiver.active_sessions(), 0);
    assert_eq!(pair.sender.pending_rendezvous_sends(), 0);
    assert_eq!(pair.fabric.registered_regions(pair.receiver.address()), 0);
}

#[test]
fn test_link_loss_fails_queued_sends() {
    let pair = Pair::new(
        FabricConfig::default().with_connect_latency(5),
        WorkerConfig::default(),
    );
    let dispatched = Rc::new(Cell::new(0));
    let counter = dispatched.clone();
    pair.receiver
        .set_am_handler(
            DATA,
            AmHandler::new(move |_| {
                counter.set(counter.get() + 1);
                Disposition::Consumed
            }),
        )
        .expect("register");

    let ep = pair.endpoint();
    let calls = Rc::new(Cell::new(0));
    let requests: Vec<_> = (0..3u8)
        .map(|i| ep.am_send(DATA, &[i], counted_params(&calls)).expect("queue"))
        .collect();
    assert_eq!(ep.queued(), 3);

    pair.fabric
        .disconnect(pair.sender.address(), pair.receiver.address());
    pair.pump();

    let link_down = Some(Err(AmError::LinkDown {
        peer: pair.receiver.address(),
    }));
    for request in &requests {
        assert_eq!(request.state(), RequestState::Failed);
        assert_eq!(request.result(), link_down);
    }
    assert_eq!(calls.get(), 3);
    assert_eq!(dispatched.get(), 0);
    assert_eq!(ep.link_state(), LinkState::Failed);
    assert_eq!(ep.queued(), 0);
    assert_eq!(ep.metrics().connection_failures, 1);

    // A broken link refuses new traffic until it is repaired.
    let refused = ep.am_send(DATA, b"refused", SendParams::new()).expect("send");
    pair.pump();
    assert_eq!(refused.result(), link_down);

    pair.fabric
        .heal(pair.sender.address(), pair.receiver.address());
    let request = ep.am_send(DATA, b"again", SendParams::new()).expect("send");
    pair.pump();
    assert_eq!(request.state(), RequestState::Completed);
    assert_eq!(dispatched.get(), 1);
    assert!(ep.is_connected());
}

#[test]
fn test_undecodable_packets_are_counted() {
    let pair = Pair::instant();
    let rogue = pair.fabric.attach();
    let target = pair.receiver.address();
    rogue.connect(target).expect("connect");

    rogue.send(target, vec![0xFF; 20]).expect("send garbage");
    let mut packet = wire::encode_eager(DATA, SendFlags::empty(), &[]).expect("encode");
    packet[4] ^= 0x01;
    rogue.send(target, packet).expect("send corrupted");
    pair.pump();

    let stats = pair.receiver.stats();
    assert_eq!(stats.decode_errors, 2);
    assert_eq!(stats.packets_received, 2);
    assert_eq!(stats.eager_dispatched, 0);
}

#[test]
fn test_stray_protocol_frames_are_ignored() {
    let pair = Pair::instant();
    let rogue = pair.fabric.attach();
    rogue.connect(pair.receiver.address()).expect("connect");
    rogue.connect(pair.sender.address()).expect("connect");

    let finish = Frame::Finish {
        session: 77,
        bytes: 1,
    };
    rogue
        .send(pair.receiver.address(), finish.encode().expect("encode"))
        .expect("send");
    let ready = Frame::ReadyToReceive {
        request: 3,
        session: 0,
        segments: Vec::new(),
    };
    rogue
        .send(pair.sender.address(), ready.encode().expect("encode"))
        .expect("send");
    pair.pump();

    assert_eq!(pair.receiver.stats().decode_errors, 0);
    assert_eq!(pair.receiver.active_sessions(), 0);
    assert_eq!(pair.sender.stats().sends_completed, 0);
}

/// Drive the receiver through a rendezvous handshake from a raw port and
/// return the session id it assigned.
fn open_session(pair: &Pair, rogue: &dyn Transport, request: u64, len: u64) -> u64 {
    let target = pair.receiver.address();
    let rts = wire::encode_ready_to_send(BULK, SendFlags::empty(), request, len, b"p")
        .expect("encode");
    rogue.send(target, rts).expect("send");
    pair.pump();

    while let Some(event) = rogue.poll() {
        if let TransportEvent::Packet { bytes, .. } = event {
            if let Ok(Frame::ReadyToReceive {
                request: echoed,
                session,
                segments,
            }) = wire::decode(&bytes)
            {
                assert_eq!(echoed, request);
                assert_eq!(segments.iter().map(|s| s.len).sum::<u64>(), len);
                return session;
            }
        }
    }
    panic!("receiver never answered request {request}");
}

#[test]
fn test_finish_with_wrong_byte_count_fails_session() {
    let pair = Pair::instant();
    let landing = SharedLanding::default();
    pair.receiver
        .set_am_handler(BULK, landing_handler(&landing, whole))
        .expect("register");
    let rogue = pair.fabric.attach();
    let target = pair.receiver.address();
    rogue.connect(target).expect("connect");

    let short = open_session(&pair, &*rogue, 1, 64);
    rogue
        .send(
            target,
            Frame::Finish {
                session: short,
                bytes: 5,
            }
            .encode()
            .expect("encode"),
        )
        .expect("send");
    pair.pump();

    let aborted = open_session(&pair, &*rogue, 2, 64);
    rogue
        .send(
            target,
            Frame::Abort {
                session: aborted,
                status: AmStatus::Custom(4),
            }
            .encode()
            .expect("encode"),
        )
        .expect("send");
    pair.pump();

    let landing = landing.borrow();
    assert_eq!(landing.prefixes, vec![b"p".to_vec(), b"p".to_vec()]);
    assert_eq!(landing.done.len(), 2);
    assert_eq!(
        landing.error(0),
        AmError::ByteCountMismatch {
            expected: 64,
            received: 5
        }
    );
    assert_eq!(
        landing.error(1),
        AmError::Aborted {
            status: AmStatus::Custom(4)
        }
    );
    assert_eq!(pair.receiver.stats().rendezvous_failed, 2);
    assert_eq!(pair.fabric.registered_regions(target), 0);
}

#[test]
fn test_ready_to_receive_with_overflowing_lengths_aborts() {
    let pair = Pair::instant();
    let rogue = pair.fabric.attach();
    let target = rogue.local_address();
    let sender = pair.sender.address();

    let calls = Rc::new(Cell::new(0));
    let request = pair
        .sender
        .endpoint(target)
        .expect("endpoint")
        .am_send_rendezvous(BULK, &[7u8; 8], counted_params(&calls))
        .expect("send");

    let mut offered = None;
    while let Some(event) = rogue.poll() {
        if let TransportEvent::Packet { bytes, .. } = event {
            if let Ok(Frame::ReadyToSend { request, remaining, .. }) = wire::decode(&bytes) {
                assert_eq!(remaining, 8);
                offered = Some(request);
            }
        }
    }
    let offered = offered.expect("ready-to-send reached the peer");

    // Lengths whose sum overflows u64 and wraps to exactly the bulk size.
    let reply = Frame::ReadyToReceive {
        request: offered,
        session: 77,
        segments: vec![
            RemoteSegment {
                key: RemoteKey::new(1),
                len: u64::MAX,
            },
            RemoteSegment {
                key: RemoteKey::new(2),
                len: 9,
            },
        ],
    };
    rogue
        .send(sender, reply.encode().expect("encode"))
        .expect("send");
    pair.sender.progress();

    assert_eq!(request.state(), RequestState::Failed);
    assert_eq!(
        request.result(),
        Some(Err(AmError::SegmentLengthMismatch {
            expected: 8,
            provided: usize::MAX,
        }))
    );
    assert_eq!(calls.get(), 1);
    assert_eq!(pair.sender.pending_rendezvous_sends(), 0);
    assert_eq!(pair.sender.stats().sends_failed, 1);
    assert_eq!(pair.fabric.stats().puts, 0);

    let mut aborted = None;
    while let Some(event) = rogue.poll() {
        if let TransportEvent::Packet { bytes, .. } = event {
            if let Ok(Frame::Abort { session, status }) = wire::decode(&bytes) {
                aborted = Some((session, status));
            }
        }
    }
    assert_eq!(aborted, Some((77, AmStatus::ProtocolError)));
}
