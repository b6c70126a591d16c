//! Link metrics.

/// Counters kept per link.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkMetrics {
    /// Times the link came up
    pub connections_established: u64,

    /// Times the link failed
    pub connection_failures: u64,

    /// Packets handed to the transport
    pub packets_sent: u64,

    /// Bytes handed to the transport
    pub bytes_sent: u64,

    /// Packets that had to wait for the handshake
    pub packets_queued: u64,

    /// Queued packets discarded because the link failed
    pub packets_dropped: u64,

    /// Packets currently waiting
    pub current_queue_size: usize,

    /// Largest queue length observed
    pub queue_high_water: usize,

    /// Whether the link is currently connected
    pub is_connected: bool,
}

impl LinkMetrics {
    /// Record a packet handed to the transport.
    pub fn record_packet_sent(&mut self, bytes: usize) {
        self.packets_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    /// Record a packet queued behind the handshake.
    pub fn record_packet_queued(&mut self) {
        self.packets_queued += 1;
        self.current_queue_size += 1;
        self.queue_high_water = self.queue_high_water.max(self.current_queue_size);
    }

    /// Record a packet leaving the queue.
    pub fn record_packet_dequeued(&mut self) {
        self.current_queue_size = self.current_queue_size.saturating_sub(1);
    }

    /// Record the link coming up.
    pub fn record_connected(&mut self) {
        self.connections_established += 1;
        self.is_connected = true;
    }

    /// Record the link failing with `dropped` packets still queued.
    pub fn record_failure(&mut self, dropped: usize) {
        self.connection_failures += 1;
        self.packets_dropped += dropped as u64;
        self.current_queue_size = 0;
        self.is_connected = false;
    }
}
