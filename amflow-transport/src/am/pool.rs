//! Receive buffers and the retained-data table.
//!
//! Eager payloads are copied into pooled buffers before the handler runs.
//! A handler that returns `Disposition::Retain` keeps its buffer out of the
//! pool until the application releases it by handle.

use std::cell::Cell;
use std::collections::HashMap;
use std::ops::Deref;
use std::rc::Rc;
use std::sync::Arc;

use object_pool::{Pool, ReusableOwned};

use crate::error::{AmError, AmResult};

/// Names a received buffer the application chose to retain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct DataHandle(u64);

impl DataHandle {
    /// Raw value.
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for DataHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "data#{}", self.0)
    }
}

/// Pool of receive buffers.
pub(crate) struct RecvPool {
    pool: Arc<Pool<Vec<u8>>>,
    buffer_capacity: usize,
    outstanding: Rc<Cell<usize>>,
}

impl RecvPool {
    pub(crate) fn new(size: usize, buffer_capacity: usize) -> Self {
        Self {
            pool: Arc::new(Pool::new(size, move || Vec::with_capacity(buffer_capacity))),
            buffer_capacity,
            outstanding: Rc::new(Cell::new(0)),
        }
    }

    /// Take a buffer from the pool and copy `data` into it.
    pub(crate) fn fill(&self, data: &[u8]) -> ReceivedBuffer {
        let capacity = self.buffer_capacity;
        let mut inner = self.pool.pull_owned(move || Vec::with_capacity(capacity));
        inner.clear();
        inner.extend_from_slice(data);
        self.outstanding.set(self.outstanding.get() + 1);
        ReceivedBuffer {
            inner,
            outstanding: self.outstanding.clone(),
        }
    }

    /// Buffers currently out of the pool.
    pub(crate) fn outstanding(&self) -> usize {
        self.outstanding.get()
    }
}

/// A receive buffer; goes back to its pool on drop.
pub(crate) struct ReceivedBuffer {
    inner: ReusableOwned<Vec<u8>>,
    outstanding: Rc<Cell<usize>>,
}

impl Deref for ReceivedBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.inner.as_slice()
    }
}

impl Drop for ReceivedBuffer {
    fn drop(&mut self) {
        self.outstanding.set(self.outstanding.get().saturating_sub(1));
    }
}

/// Buffers retained by handlers, keyed by handle.
#[derive(Default)]
pub(crate) struct HeldData {
    buffers: HashMap<DataHandle, Rc<ReceivedBuffer>>,
    next: u64,
}

impl HeldData {
    /// Allocate the handle for the next delivery.
    pub(crate) fn next_handle(&mut self) -> DataHandle {
        let handle = DataHandle(self.next);
        self.next += 1;
        handle
    }

    pub(crate) fn hold(&mut self, handle: DataHandle, buffer: ReceivedBuffer) {
        self.buffers.insert(handle, Rc::new(buffer));
    }

    /// Shared view of a held buffer; it stays in the table.
    pub(crate) fn get(&self, handle: DataHandle) -> Option<Rc<ReceivedBuffer>> {
        self.buffers.get(&handle).cloned()
    }

    /// Remove `handle`. The buffer returns to the pool once the last view drops.
    pub(crate) fn take(&mut self, handle: DataHandle) -> AmResult<Rc<ReceivedBuffer>> {
        self.buffers
            .remove(&handle)
            .ok_or(AmError::UnknownDataHandle { handle })
    }

    pub(crate) fn len(&self) -> usize {
        self.buffers.len()
    }
}
