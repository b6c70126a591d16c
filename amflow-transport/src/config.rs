//! Worker configuration.

/// Limits and batching parameters for a [`Worker`](crate::Worker).
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    /// Maximum number of packets queued per link while it is connecting
    pub max_queue_size: usize,

    /// Largest payload accepted by the eager path, and largest rendezvous
    /// header prefix
    pub max_eager_size: usize,

    /// Largest bulk remainder accepted by the rendezvous path
    pub max_rendezvous_size: usize,

    /// Largest single put issued while placing rendezvous bulk data.
    ///
    /// Bulk data is split into chunks of at most this size. Must be non-zero.
    pub max_put_size: usize,

    /// Maximum transport events handled by one `progress()` call
    pub max_events_per_progress: usize,

    /// Number of receive buffers created up front
    pub recv_pool_size: usize,

    /// Initial capacity of each pooled receive buffer
    pub recv_buffer_capacity: usize,

    /// Number of `progress()` calls `wait` makes before giving up
    pub wait_spin_limit: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 1024,
            max_eager_size: 64 * 1024,
            max_rendezvous_size: 256 * 1024 * 1024,
            max_put_size: 16 * 1024,
            max_events_per_progress: 64,
            recv_pool_size: 32,
            recv_buffer_capacity: 4096,
            wait_spin_limit: 1_000_000,
        }
    }
}

impl WorkerConfig {
    /// Set the eager payload limit.
    pub fn with_max_eager_size(mut self, max_eager_size: usize) -> Self {
        self.max_eager_size = max_eager_size;
        self
    }

    /// Set the rendezvous bulk limit.
    pub fn with_max_rendezvous_size(mut self, max_rendezvous_size: usize) -> Self {
        self.max_rendezvous_size = max_rendezvous_size;
        self
    }

    /// Set the put chunk size. Zero is raised to one.
    pub fn with_max_put_size(mut self, max_put_size: usize) -> Self {
        self.max_put_size = max_put_size.max(1);
        self
    }

    /// Set the per-link queue bound.
    pub fn with_max_queue_size(mut self, max_queue_size: usize) -> Self {
        self.max_queue_size = max_queue_size;
        self
    }

    /// Set how many events one progress call may handle. Zero is raised to one.
    pub fn with_max_events_per_progress(mut self, max_events: usize) -> Self {
        self.max_events_per_progress = max_events.max(1);
        self
    }

    /// Set the spin limit used by `wait`.
    pub fn with_wait_spin_limit(mut self, spins: usize) -> Self {
        self.wait_spin_limit = spins;
        self
    }

    /// Raise zero limits that must be non-zero, whichever way they were set.
    pub(crate) fn normalized(mut self) -> Self {
        self.max_put_size = self.max_put_size.max(1);
        self.max_events_per_progress = self.max_events_per_progress.max(1);
        self
    }

    /// Configuration for many small messages: tight buffers, short batches.
    pub fn small_messages() -> Self {
        Self {
            max_queue_size: 256,
            max_eager_size: 8 * 1024,
            max_rendezvous_size: 16 * 1024 * 1024,
            max_put_size: 4 * 1024,
            max_events_per_progress: 32,
            recv_pool_size: 64,
            recv_buffer_capacity: 1024,
            wait_spin_limit: 1_000_000,
        }
    }

    /// Configuration for large transfers: big put chunks, long batches.
    pub fn bulk_transfer() -> Self {
        Self {
            max_queue_size: 4096,
            max_eager_size: 64 * 1024,
            max_rendezvous_size: 1024 * 1024 * 1024,
            max_put_size: 256 * 1024,
            max_events_per_progress: 256,
            recv_pool_size: 16,
            recv_buffer_capacity: 64 * 1024,
            wait_spin_limit: 10_000_000,
        }
    }
}
