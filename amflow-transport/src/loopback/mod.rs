//! In-process fabric implementing [`Transport`] for tests and examples.
//!
//! Every [`FabricPort`] attached to one [`LoopbackFabric`] can reach every
//! other port. Each port has a FIFO inbox, so packets from one sender arrive
//! in send order. `put` writes straight into the target port's registered
//! region.
//!
//! Faults are injected by hand:
//!
//! | Fault | Method |
//! |-------|--------|
//! | Link loss, in-flight packets dropped | [`LoopbackFabric::disconnect`] |
//! | Link repair | [`LoopbackFabric::heal`] |
//! | Failing puts | [`LoopbackFabric::set_put_failures`] |

mod config;

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use amflow_core::{
    LinkStatus, MemoryRegion, RemoteKey, Transport, TransportError, TransportEvent,
    TransportResult, WorkerAddress,
};

pub use config::FabricConfig;

/// Counters kept by a fabric.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FabricStats {
    /// Packets handed to a port's inbox.
    pub packets_delivered: u64,
    /// Bytes handed to a port's inbox.
    pub bytes_delivered: u64,
    /// In-flight packets dropped by `disconnect`.
    pub packets_dropped: u64,
    /// Successful puts.
    pub puts: u64,
    /// Bytes written by successful puts.
    pub bytes_put: u64,
    /// Handshakes that finished.
    pub handshakes_completed: u64,
    /// Links broken by `disconnect`.
    pub disconnects: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PairState {
    Handshake { remaining: u32 },
    Established,
    Broken,
}

#[derive(Default)]
struct PortState {
    inbox: VecDeque<TransportEvent>,
    regions: HashMap<RemoteKey, MemoryRegion>,
}

struct FabricInner {
    config: FabricConfig,
    next_address: u64,
    next_key: u64,
    ports: HashMap<WorkerAddress, PortState>,
    pairs: HashMap<(WorkerAddress, WorkerAddress), PairState>,
    put_failures: bool,
    stats: FabricStats,
}

/// Links are symmetric; store each pair once.
fn pair_key(a: WorkerAddress, b: WorkerAddress) -> (WorkerAddress, WorkerAddress) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

impl FabricInner {
    fn push(&mut self, to: WorkerAddress, event: TransportEvent) {
        if let Some(port) = self.ports.get_mut(&to) {
            port.inbox.push_back(event);
        }
    }

    /// Tell both ends of a pair that its state changed.
    fn notify_pair(&mut self, (a, b): (WorkerAddress, WorkerAddress), event: fn(WorkerAddress) -> TransportEvent) {
        self.push(a, event(b));
        if a != b {
            self.push(b, event(a));
        }
    }

    fn tick_handshakes(&mut self) {
        let mut finished = Vec::new();
        for (key, state) in self.pairs.iter_mut() {
            if let PairState::Handshake { remaining } = state {
                *remaining = remaining.saturating_sub(1);
                if *remaining == 0 {
                    *state = PairState::Established;
                    finished.push(*key);
                }
            }
        }
        // HashMap order is arbitrary; keep delivery deterministic.
        finished.sort();
        for key in finished {
            tracing::trace!(a = %key.0, b = %key.1, "loopback handshake complete");
            self.stats.handshakes_completed += 1;
            self.notify_pair(key, |peer| TransportEvent::LinkUp { peer });
        }
    }

    fn require_established(&self, from: WorkerAddress, to: WorkerAddress) -> TransportResult<()> {
        if !self.ports.contains_key(&to) {
            return Err(TransportError::UnknownPeer { peer: to });
        }
        match self.pairs.get(&pair_key(from, to)) {
            Some(PairState::Established) => Ok(()),
            _ => Err(TransportError::ConnectionLost { peer: to }),
        }
    }
}

/// An in-process network of ports.
///
/// Cloning yields another handle to the same fabric.
///
/// # Example
///
/// ```ignore
/// let fabric = LoopbackFabric::new(FabricConfig::instant());
/// let a = fabric.attach();
/// let b = fabric.attach();
/// a.connect(b.local_address())?;
/// a.send(b.local_address(), vec![1, 2, 3])?;
/// ```
#[derive(Clone)]
pub struct LoopbackFabric {
    inner: Rc<RefCell<FabricInner>>,
}

impl LoopbackFabric {
    /// Create an empty fabric.
    pub fn new(config: FabricConfig) -> Self {
        Self {
            inner: Rc::new(RefCell::new(FabricInner {
                config,
                next_address: 1,
                next_key: 1,
                ports: HashMap::new(),
                pairs: HashMap::new(),
                put_failures: false,
                stats: FabricStats::default(),
            })),
        }
    }

    /// Attach a new port with a fresh address.
    pub fn attach(&self) -> Rc<FabricPort> {
        let mut inner = self.inner.borrow_mut();
        let address = WorkerAddress::new(inner.next_address);
        inner.next_address += 1;
        inner.ports.insert(address, PortState::default());
        tracing::debug!(%address, "loopback port attached");
        Rc::new(FabricPort {
            fabric: self.clone(),
            address,
        })
    }

    /// Break the link between `a` and `b`.
    ///
    /// Packets in flight between them are dropped and both ends get
    /// `LinkDown`. The pair stays broken until [`heal`](Self::heal).
    pub fn disconnect(&self, a: WorkerAddress, b: WorkerAddress) {
        let mut inner = self.inner.borrow_mut();
        let key = pair_key(a, b);
        let previous = inner.pairs.insert(key, PairState::Broken);

        let mut dropped = 0;
        for (port, other) in [(a, b), (b, a)] {
            if let Some(state) = inner.ports.get_mut(&port) {
                let before = state.inbox.len();
                state
                    .inbox
                    .retain(|event| !matches!(event, TransportEvent::Packet { source, .. } if *source == other));
                dropped += before - state.inbox.len();
            }
            if a == b {
                break;
            }
        }
        inner.stats.packets_dropped += dropped as u64;

        if matches!(previous, Some(PairState::Handshake { .. } | PairState::Established)) {
            inner.stats.disconnects += 1;
            inner.notify_pair(key, |peer| TransportEvent::LinkDown { peer });
        }
        tracing::debug!(%a, %b, dropped, "loopback link broken");
    }

    /// Forget a broken link so the next `connect` starts a new handshake.
    pub fn heal(&self, a: WorkerAddress, b: WorkerAddress) {
        let mut inner = self.inner.borrow_mut();
        let key = pair_key(a, b);
        if inner.pairs.get(&key) == Some(&PairState::Broken) {
            inner.pairs.remove(&key);
        }
    }

    /// Make every subsequent put fail with `PutFailed`.
    pub fn set_put_failures(&self, fail: bool) {
        self.inner.borrow_mut().put_failures = fail;
    }

    /// Whether `a` and `b` can exchange packets.
    pub fn is_established(&self, a: WorkerAddress, b: WorkerAddress) -> bool {
        self.inner.borrow().pairs.get(&pair_key(a, b)) == Some(&PairState::Established)
    }

    /// Regions `port` currently exposes.
    pub fn registered_regions(&self, port: WorkerAddress) -> usize {
        self.inner
            .borrow()
            .ports
            .get(&port)
            .map_or(0, |state| state.regions.len())
    }

    /// Events waiting in `port`'s inbox.
    pub fn pending_events(&self, port: WorkerAddress) -> usize {
        self.inner
            .borrow()
            .ports
            .get(&port)
            .map_or(0, |state| state.inbox.len())
    }

    /// Snapshot of the fabric counters.
    pub fn stats(&self) -> FabricStats {
        self.inner.borrow().stats.clone()
    }
}

/// One attachment to a [`LoopbackFabric`].
pub struct FabricPort {
    fabric: LoopbackFabric,
    address: WorkerAddress,
}

impl FabricPort {
    /// The fabric this port belongs to.
    pub fn fabric(&self) -> &LoopbackFabric {
        &self.fabric
    }
}

impl Transport for FabricPort {
    fn local_address(&self) -> WorkerAddress {
        self.address
    }

    fn connect(&self, peer: WorkerAddress) -> TransportResult<LinkStatus> {
        let mut inner = self.fabric.inner.borrow_mut();
        if !inner.ports.contains_key(&peer) {
            return Err(TransportError::UnknownPeer { peer });
        }

        let key = pair_key(self.address, peer);
        let existing = inner.pairs.get(&key).copied();
        match existing {
            Some(PairState::Established) => Ok(LinkStatus::Ready),
            Some(PairState::Handshake { .. }) => Ok(LinkStatus::Pending),
            Some(PairState::Broken) => Err(TransportError::ConnectionLost { peer }),
            None if inner.config.connect_latency_polls == 0 => {
                inner.pairs.insert(key, PairState::Established);
                inner.stats.handshakes_completed += 1;
                if peer != self.address {
                    inner.push(peer, TransportEvent::LinkUp { peer: self.address });
                }
                Ok(LinkStatus::Ready)
            }
            None => {
                let remaining = inner.config.connect_latency_polls;
                inner.pairs.insert(key, PairState::Handshake { remaining });
                tracing::trace!(from = %self.address, to = %peer, remaining, "loopback handshake started");
                Ok(LinkStatus::Pending)
            }
        }
    }

    fn send(&self, peer: WorkerAddress, packet: Vec<u8>) -> TransportResult<()> {
        let mut inner = self.fabric.inner.borrow_mut();
        let max = inner.config.max_packet_size;
        if packet.len() > max {
            return Err(TransportError::PacketTooLarge {
                size: packet.len(),
                max,
            });
        }
        inner.require_established(self.address, peer)?;

        inner.stats.packets_delivered += 1;
        inner.stats.bytes_delivered += packet.len() as u64;
        inner.push(
            peer,
            TransportEvent::Packet {
                source: self.address,
                bytes: packet,
            },
        );
        Ok(())
    }

    fn poll(&self) -> Option<TransportEvent> {
        let mut inner = self.fabric.inner.borrow_mut();
        inner.tick_handshakes();
        inner
            .ports
            .get_mut(&self.address)
            .and_then(|port| port.inbox.pop_front())
    }

    fn register(&self, region: MemoryRegion) -> RemoteKey {
        let mut inner = self.fabric.inner.borrow_mut();
        let key = RemoteKey::new(inner.next_key);
        inner.next_key += 1;
        if let Some(port) = inner.ports.get_mut(&self.address) {
            port.regions.insert(key, region);
        }
        key
    }

    fn deregister(&self, key: RemoteKey) -> Option<MemoryRegion> {
        self.fabric
            .inner
            .borrow_mut()
            .ports
            .get_mut(&self.address)
            .and_then(|port| port.regions.remove(&key))
    }

    fn put(&self, peer: WorkerAddress, key: RemoteKey, offset: usize, data: &[u8]) -> TransportResult<()> {
        let mut inner = self.fabric.inner.borrow_mut();
        if inner.put_failures {
            return Err(TransportError::PutFailed { peer });
        }
        inner.require_established(self.address, peer)?;

        let region = inner
            .ports
            .get(&peer)
            .and_then(|port| port.regions.get(&key))
            .ok_or(TransportError::UnknownRemoteKey { key })?;
        region.write_at(key, offset, data)?;

        inner.stats.puts += 1;
        inner.stats.bytes_put += data.len() as u64;
        Ok(())
    }
}

impl std::fmt::Debug for FabricPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FabricPort")
            .field("address", &self.address)
            .finish()
    }
}
