//! Rendezvous path: header negotiation, placement, completion.

use std::cell::{Cell, RefCell};
use std::io::IoSlice;
use std::rc::Rc;

use amflow_transport::{
    AmError, AmHandler, AmId, AmResult, AmStatus, FabricConfig, RecvFlags, RendezvousDone,
    RendezvousPlan, RequestState, SendParams, WorkerConfig,
};

use super::{pattern, Pair};

pub const BULK: AmId = AmId::new(2);

/// What the receiving side observed.
#[derive(Debug, Default)]
pub struct Landing {
    pub prefixes: Vec<Vec<u8>>,
    pub replies_offered: Vec<bool>,
    pub done: Vec<RendezvousDone>,
}

impl Landing {
    /// Filled segments of the `index`th completed transfer, joined.
    pub fn bulk(&self, index: usize) -> Vec<u8> {
        match &self.done[index].result {
            Ok(segments) => segments.concat(),
            Err(e) => panic!("transfer {index} failed: {e}"),
        }
    }

    pub fn error(&self, index: usize) -> AmError {
        match &self.done[index].result {
            Ok(_) => panic!("transfer {index} succeeded"),
            Err(e) => e.clone(),
        }
    }
}

pub type SharedLanding = Rc<RefCell<Landing>>;

/// Rendezvous handler that splits the destination with `split` and records
/// everything into `landing`. Cookies count up from 1000.
pub fn landing_handler(landing: &SharedLanding, split: fn(usize) -> Vec<usize>) -> AmHandler {
    let landing = landing.clone();
    AmHandler::noop().with_rendezvous(move |msg| {
        assert!(msg.flags().contains(RecvFlags::RENDEZVOUS));
        let cookie = {
            let mut landing = landing.borrow_mut();
            landing.prefixes.push(msg.prefix().to_vec());
            landing.replies_offered.push(msg.reply_endpoint().is_some());
            1000 + landing.prefixes.len() as u64 - 1
        };
        let sink = landing.clone();
        let plan = RendezvousPlan::new(cookie, move |done| sink.borrow_mut().done.push(done));
        Ok(split(msg.remaining_length())
            .into_iter()
            .fold(plan, |plan, len| plan.zeroed_segment(len)))
    })
}

pub fn whole(len: usize) -> Vec<usize> {
    vec![len]
}

#[test]
fn test_prefix_and_bulk_round_trip() {
    let cases: [(usize, usize); 5] = [(0, 0), (1, 1), (32, 1000), (16, 100_000), (8, 1 << 20)];

    for connect_first in [false, true] {
        let pair = Pair::delayed();
        let landing = SharedLanding::default();
        pair.receiver
            .set_am_handler(BULK, landing_handler(&landing, whole))
            .expect("register");
        let ep = if connect_first {
            pair.connect()
        } else {
            pair.endpoint()
        };

        let mut originals = Vec::new();
        let mut requests = Vec::new();
        for (i, &(prefix_len, bulk_len)) in cases.iter().enumerate() {
            let prefix = pattern(prefix_len, 0xA0 + i as u8);
            let bulk = pattern(bulk_len, i as u8);
            let segments = [IoSlice::new(&prefix), IoSlice::new(&bulk)];
            requests.push(
                ep.am_send_rendezvous(BULK, &segments, SendParams::new())
                    .expect("send"),
            );
            originals.push((prefix, bulk));
        }
        pair.pump();

        let landing = landing.borrow();
        assert_eq!(landing.done.len(), cases.len(), "one completion per transfer");
        for (i, (prefix, bulk)) in originals.iter().enumerate() {
            assert_eq!(landing.prefixes[i], *prefix);
            assert_eq!(landing.done[i].cookie, 1000 + i as u64);
            assert_eq!(landing.bulk(i), *bulk);

            let mut joined = landing.prefixes[i].clone();
            joined.extend(landing.bulk(i));
            assert_eq!(joined, [prefix.as_slice(), bulk.as_slice()].concat());
        }
        for request in &requests {
            assert_eq!(request.state(), RequestState::Completed);
        }

        let total_bulk: u64 = cases.iter().map(|&(_, b)| b as u64).sum();
        assert_eq!(pair.sender.stats().bulk_bytes_placed, total_bulk);
        assert_eq!(pair.receiver.stats().rendezvous_completed, cases.len() as u64);
        assert_eq!(pair.receiver.active_sessions(), 0);
        assert_eq!(pair.sender.pending_rendezvous_sends(), 0);
        assert_eq!(pair.fabric.registered_regions(pair.receiver.address()), 0);
    }
}

#[test]
fn test_contiguous_payload_is_all_bulk() {
    let pair = Pair::instant();
    let landing = SharedLanding::default();
    pair.receiver
        .set_am_handler(BULK, landing_handler(&landing, whole))
        .expect("register");

    let data = pattern(5000, 7);
    let request = pair
        .endpoint()
        .am_send_rendezvous(BULK, &data, SendParams::new())
        .expect("send");
    pair.pump();

    let landing = landing.borrow();
    assert!(landing.prefixes[0].is_empty());
    assert_eq!(landing.bulk(0), data);
    assert_eq!(request.bytes_total(), 5000);
    assert_eq!(request.state(), RequestState::Completed);
}

#[test]
fn test_iov_bulk_is_concatenated() {
    let pair = Pair::instant();
    let landing = SharedLanding::default();
    pair.receiver
        .set_am_handler(BULK, landing_handler(&landing, whole))
        .expect("register");

    let header = b"hdr".to_vec();
    let parts: Vec<Vec<u8>> = (0..6u8).map(|i| pattern(300 * (i as usize + 1), i)).collect();
    let mut segments = vec![IoSlice::new(&header)];
    segments.extend(parts.iter().map(|p| IoSlice::new(p)));

    pair.endpoint()
        .am_send_rendezvous(BULK, &segments, SendParams::new())
        .expect("send");
    pair.pump();

    let landing = landing.borrow();
    assert_eq!(landing.prefixes[0], header);
    assert_eq!(landing.bulk(0), parts.concat());
}

#[test]
fn test_multi_segment_destination_with_chunked_puts() {
    let pair = Pair::new(
        FabricConfig::instant(),
        WorkerConfig::default().with_max_put_size(1000),
    );
    let landing = SharedLanding::default();
    pair.receiver
        .set_am_handler(
            BULK,
            landing_handler(&landing, |len| vec![3, 5000, 17, len - 5020]),
        )
        .expect("register");

    let bulk = pattern(20_000, 3);
    pair.endpoint()
        .am_send_rendezvous(BULK, &bulk, SendParams::new())
        .expect("send");
    pair.pump();

    let landing = landing.borrow();
    let segments = match &landing.done[0].result {
        Ok(segments) => segments,
        Err(e) => panic!("transfer failed: {e}"),
    };
    let lens: Vec<usize> = segments.iter().map(Vec::len).collect();
    assert_eq!(lens, vec![3, 5000, 17, 14_980]);
    assert_eq!(segments[0], bulk[..3]);
    assert_eq!(segments[1], bulk[3..5003]);
    assert_eq!(segments[2], bulk[5003..5020]);
    assert_eq!(segments[3], bulk[5020..]);

    // ceil(len / 1000) puts per segment: 1 + 5 + 1 + 15
    assert_eq!(pair.fabric.stats().puts, 22);
}

#[test]
fn test_length_mismatch_fails_session_and_request() {
    let pair = Pair::instant();
    let landing = SharedLanding::default();
    pair.receiver
        .set_am_handler(BULK, landing_handler(&landing, |len| vec![len - 1]))
        .expect("register");

    let request = pair
        .endpoint()
        .am_send_rendezvous(BULK, &[0u8; 100], SendParams::new())
        .expect("send");
    pair.pump();

    assert_eq!(
        request.result(),
        Some(Err(AmError::Rejected {
            status: AmStatus::ProtocolError
        }))
    );
    let landing = landing.borrow();
    assert_eq!(landing.done.len(), 1);
    assert_eq!(
        landing.error(0),
        AmError::SegmentLengthMismatch {
            expected: 100,
            provided: 99
        }
    );
    assert_eq!(pair.receiver.stats().rendezvous_failed, 1);
    assert_eq!(pair.fabric.registered_regions(pair.receiver.address()), 0);
}

#[test]
fn test_handler_can_decline() {
    let pair = Pair::instant();
    pair.receiver
        .set_am_handler(
            BULK,
            AmHandler::noop().with_rendezvous(|_| Err(AmStatus::Custom(9))),
        )
        .expect("register");

    let request = pair
        .endpoint()
        .am_send_rendezvous(BULK, &[1u8; 10], SendParams::new())
        .expect("send");
    pair.pump();

    assert_eq!(
        request.result(),
        Some(Err(AmError::Rejected {
            status: AmStatus::Custom(9)
        }))
    );
    assert_eq!(pair.receiver.stats().rejected, 1);
}

#[test]
fn test_missing_rendezvous_callback_is_rejected() {
    let pair = Pair::instant();
    pair.receiver
        .set_am_handler(BULK, AmHandler::noop())
        .expect("register");
    let ep = pair.endpoint();

    let eager_only = ep
        .am_send_rendezvous(BULK, &[1u8; 10], SendParams::new())
        .expect("send");
    let unregistered = ep
        .am_send_rendezvous(AmId::new(77), &[1u8; 10], SendParams::new())
        .expect("send");
    pair.pump();

    let no_handler = Some(Err(AmError::Rejected {
        status: AmStatus::NoHandler,
    }));
    assert_eq!(eager_only.result(), no_handler);
    assert_eq!(unregistered.result(), no_handler);
    assert_eq!(pair.receiver.stats().unhandled, 2);
}

#[test]
fn test_receiver_size_limit() {
    let pair = Pair::with_configs(
        FabricConfig::instant(),
        WorkerConfig::default(),
        WorkerConfig::default().with_max_rendezvous_size(100),
    );
    let landing = SharedLanding::default();
    pair.receiver
        .set_am_handler(BULK, landing_handler(&landing, whole))
        .expect("register");

    let request = pair
        .endpoint()
        .am_send_rendezvous(BULK, &[0u8; 200], SendParams::new())
        .expect("send");
    pair.pump();

    assert_eq!(
        request.result(),
        Some(Err(AmError::Rejected {
            status: AmStatus::NoResource
        }))
    );
    assert!(landing.borrow().prefixes.is_empty(), "handler never consulted");
}

#[test]
fn test_sender_limits() {
    let pair = Pair::new(
        FabricConfig::instant(),
        WorkerConfig::default()
            .with_max_eager_size(16)
            .with_max_rendezvous_size(100),
    );
    let ep = pair.endpoint();

    let prefix = [0u8; 17];
    let bulk = [0u8; 10];
    assert_eq!(
        ep.am_send_rendezvous(
            BULK,
            &[IoSlice::new(&prefix), IoSlice::new(&bulk)],
            SendParams::new()
        )
        .map(|_| ()),
        Err(AmError::PayloadTooLarge { size: 17, max: 16 })
    );
    assert_eq!(
        ep.am_send_rendezvous(BULK, &[0u8; 101], SendParams::new())
            .map(|_| ()),
        Err(AmError::PayloadTooLarge {
            size: 101,
            max: 100
        })
    );
    let empty: [IoSlice<'_>; 0] = [];
    assert!(matches!(
        ep.am_send_rendezvous(BULK, &empty, SendParams::new()),
        Err(AmError::InvalidSegments { .. })
    ));
    assert_eq!(pair.sender.pending_rendezvous_sends(), 0);
}

#[test]
fn test_completion_callback_and_progress_until() {
    let pair = Pair::delayed();
    let landing = SharedLanding::default();
    pair.receiver
        .set_am_handler(BULK, landing_handler(&landing, whole))
        .expect("register");

    let calls = Rc::new(Cell::new(0));
    let counter = calls.clone();
    let request = pair
        .endpoint()
        .am_send_rendezvous(
            BULK,
            &pattern(70_000, 1),
            SendParams::new().on_complete(move |result: &AmResult<()>| {
                assert!(result.is_ok());
                counter.set(counter.get() + 1);
            }),
        )
        .expect("send");

    let receiver = pair.receiver.clone();
    pair.sender
        .progress_until(|| {
            receiver.progress();
            request.is_done()
        })
        .expect("transfer finishes");
    pair.pump();

    assert_eq!(calls.get(), 1);
    assert_eq!(landing.borrow().done.len(), 1);
    assert_eq!(pair.sender.wait(&request), Ok(()));
}

#[test]
fn test_wait_without_receiver_progress_stalls() {
    let pair = Pair::new(
        FabricConfig::instant(),
        WorkerConfig::default().with_wait_spin_limit(50),
    );
    let request = pair
        .endpoint()
        .am_send_rendezvous(BULK, &[0u8; 64], SendParams::new())
        .expect("send");

    assert_eq!(
        pair.sender.wait(&request),
        Err(AmError::Stalled { spins: 50 })
    );
    assert_eq!(request.state(), RequestState::Pending);
}

#[test]
fn test_reply_endpoint_offered_on_request() {
    let pair = Pair::instant();
    let landing = SharedLanding::default();
    pair.receiver
        .set_am_handler(BULK, landing_handler(&landing, whole))
        .expect("register");
    let ep = pair.endpoint();

    ep.am_send_rendezvous(BULK, &[1u8; 8], SendParams::new().reply())
        .expect("send");
    ep.am_send_rendezvous(BULK, &[1u8; 8], SendParams::new())
        .expect("send");
    pair.pump();

    assert_eq!(landing.borrow().replies_offered, vec![true, false]);
}
