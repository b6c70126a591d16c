//! Loopback fabric configuration.

use crate::wire::MAX_PACKET_SIZE;

/// Behaviour of a [`LoopbackFabric`](super::LoopbackFabric).
///
/// | Setting | Field | Default |
/// |---------|-------|---------|
/// | Handshake length | `connect_latency_polls` | 2 polls |
/// | Packet size limit | `max_packet_size` | 1 MiB |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FabricConfig {
    /// Fabric polls a handshake takes. Zero connects immediately.
    pub connect_latency_polls: u32,

    /// Largest packet `send` accepts.
    pub max_packet_size: usize,
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self {
            connect_latency_polls: 2,
            max_packet_size: MAX_PACKET_SIZE,
        }
    }
}

impl FabricConfig {
    /// Links are ready as soon as they are requested.
    pub fn instant() -> Self {
        Self {
            connect_latency_polls: 0,
            ..Self::default()
        }
    }

    /// Set the handshake length in polls.
    pub fn with_connect_latency(mut self, polls: u32) -> Self {
        self.connect_latency_polls = polls;
        self
    }

    /// Set the packet size limit.
    pub fn with_max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size;
        self
    }
}
