//! Remotely writable memory regions.

use std::cell::{Ref, RefCell};
use std::rc::Rc;

use crate::{RemoteKey, TransportError};

/// A byte buffer that a transport may write into on behalf of a peer.
///
/// The region is shared between its owner and the transport while it is
/// registered. Its length is fixed at construction; writes are bounds checked.
///
/// # Examples
///
/// ```
/// use amflow_core::{MemoryRegion, RemoteKey};
///
/// let region = MemoryRegion::from_vec(vec![0u8; 4]);
/// region.write_at(RemoteKey::new(1), 1, b"ab").expect("in bounds");
/// assert_eq!(region.into_vec(), vec![0, b'a', b'b', 0]);
/// ```
#[derive(Debug, Clone)]
pub struct MemoryRegion {
    buf: Rc<RefCell<Vec<u8>>>,
}

impl MemoryRegion {
    /// Wrap an owned buffer. Its current length becomes the region length.
    pub fn from_vec(buf: Vec<u8>) -> Self {
        Self {
            buf: Rc::new(RefCell::new(buf)),
        }
    }

    /// Region length in bytes.
    pub fn len(&self) -> usize {
        self.buf.borrow().len()
    }

    /// Whether the region has zero length.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy `data` into the region starting at `offset`.
    ///
    /// `key` only labels the error if the write is out of bounds.
    ///
    /// # Errors
    ///
    /// Returns `OutOfBounds` if `offset + data.len()` exceeds the region.
    pub fn write_at(&self, key: RemoteKey, offset: usize, data: &[u8]) -> Result<(), TransportError> {
        let mut buf = self.buf.borrow_mut();
        let capacity = buf.len();
        let end = offset
            .checked_add(data.len())
            .filter(|end| *end <= capacity)
            .ok_or(TransportError::OutOfBounds {
                key,
                offset,
                len: data.len(),
                capacity,
            })?;
        buf[offset..end].copy_from_slice(data);
        Ok(())
    }

    /// Borrow the current contents.
    pub fn contents(&self) -> Ref<'_, Vec<u8>> {
        self.buf.borrow()
    }

    /// Recover the buffer.
    ///
    /// If another handle to the region is still alive the contents are
    /// copied out instead.
    pub fn into_vec(self) -> Vec<u8> {
        match Rc::try_unwrap(self.buf) {
            Ok(cell) => cell.into_inner(),
            Err(shared) => shared.borrow().clone(),
        }
    }
}
