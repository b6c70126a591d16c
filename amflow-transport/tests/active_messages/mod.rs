//! Shared fixtures for active-message tests.

pub mod faults;
pub mod invariants;
pub mod rendezvous;

use amflow_transport::{Endpoint, FabricConfig, LoopbackFabric, Worker, WorkerConfig};

/// Consecutive idle rounds before `pump` considers both workers quiet.
///
/// Handshakes advance on every fabric poll without producing work, so a
/// single idle round is not enough.
const IDLE_ROUNDS: usize = 8;

/// Upper bound on pump rounds before a test is declared stuck.
const MAX_ROUNDS: usize = 100_000;

/// Install a subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_test_writer()
        .try_init();
}

/// `len` bytes where byte `i` is `i + seed` (wrapping).
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_add(seed)).collect()
}

/// Payload carrying a sequence number in its first eight bytes.
pub fn tagged(sequence: u64, len: usize) -> Vec<u8> {
    let mut bytes = sequence.to_le_bytes().to_vec();
    bytes.extend(pattern(len, sequence as u8));
    bytes
}

/// Sequence number of a [`tagged`] payload.
pub fn tag_of(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(raw)
}

/// A sender and a receiver attached to one fabric.
pub struct Pair {
    pub fabric: LoopbackFabric,
    pub sender: Worker,
    pub receiver: Worker,
}

impl Pair {
    /// Both workers share `config`.
    pub fn new(fabric: FabricConfig, config: WorkerConfig) -> Self {
        Self::with_configs(fabric, config.clone(), config)
    }

    pub fn with_configs(fabric: FabricConfig, sender: WorkerConfig, receiver: WorkerConfig) -> Self {
        init_tracing();
        let fabric = LoopbackFabric::new(fabric);
        let sender = Worker::new(fabric.attach(), sender);
        let receiver = Worker::new(fabric.attach(), receiver);
        Self {
            fabric,
            sender,
            receiver,
        }
    }

    /// Links come up immediately.
    pub fn instant() -> Self {
        Self::new(FabricConfig::instant(), WorkerConfig::default())
    }

    /// Links need a few polls to come up.
    pub fn delayed() -> Self {
        Self::new(
            FabricConfig::default().with_connect_latency(3),
            WorkerConfig::default(),
        )
    }

    /// Sender's endpoint to the receiver.
    pub fn endpoint(&self) -> Endpoint {
        self.sender
            .endpoint(self.receiver.address())
            .expect("open endpoint")
    }

    /// Progress both workers until neither has anything left to do.
    /// Returns the total work done.
    pub fn pump(&self) -> usize {
        let mut total = 0;
        let mut idle = 0;
        for _ in 0..MAX_ROUNDS {
            let work = self.sender.progress() + self.receiver.progress();
            total += work;
            if work == 0 {
                idle += 1;
                if idle >= IDLE_ROUNDS {
                    return total;
                }
            } else {
                idle = 0;
            }
        }
        panic!("workers still busy after {MAX_ROUNDS} rounds");
    }

    /// Open the sender's link and wait for it to come up.
    pub fn connect(&self) -> Endpoint {
        let ep = self.endpoint();
        self.pump();
        assert!(ep.is_connected(), "link should be up after pumping");
        ep
    }
}

#[cfg(test)]
mod fixture_tests {
    use super::*;

    #[test]
    fn test_tagged_payload() {
        let bytes = tagged(42, 10);
        assert_eq!(bytes.len(), 18);
        assert_eq!(tag_of(&bytes), 42);
    }

    #[test]
    fn test_pump_brings_delayed_link_up() {
        let pair = Pair::delayed();
        let ep = pair.endpoint();
        assert!(!ep.is_connected());
        pair.pump();
        assert!(ep.is_connected());
    }
}
