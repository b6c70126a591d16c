//! Send requests: the handle an application holds for an outgoing message.
//!
//! A request is shared between the application's [`SendRequest`] and the
//! worker. The worker settles it exactly once, from inside `progress()`, and
//! runs the optional completion callback at that moment. Dropping (or
//! [`release`](SendRequest::release)-ing) the handle does not cancel the
//! send; the callback still runs.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::AmResult;

/// Callback run once when a send settles.
pub type CompletionCallback = Box<dyn FnOnce(&AmResult<()>)>;

/// Lifecycle of a send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// Not settled yet.
    Pending,
    /// The message left this worker (eager) or its bulk was placed (rendezvous).
    Completed,
    /// The send failed; see [`SendRequest::result`].
    Failed,
}

/// Delivery path a request was issued on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendPath {
    /// Copy-based, payload inline.
    Eager,
    /// Header inline, bulk placed into receiver buffers.
    Rendezvous,
}

/// Shared request state.
pub(crate) struct RequestCell {
    bytes_total: usize,
    path: SendPath,
    outcome: RefCell<Option<AmResult<()>>>,
    callback: RefCell<Option<CompletionCallback>>,
}

impl RequestCell {
    pub(crate) fn new(bytes_total: usize, path: SendPath, callback: Option<CompletionCallback>) -> Rc<Self> {
        Rc::new(Self {
            bytes_total,
            path,
            outcome: RefCell::new(None),
            callback: RefCell::new(callback),
        })
    }

    /// Settle the request and run its callback.
    ///
    /// Returns false, and does nothing, if it was already settled.
    pub(crate) fn settle(&self, result: AmResult<()>) -> bool {
        {
            let mut outcome = self.outcome.borrow_mut();
            if outcome.is_some() {
                tracing::warn!(path = ?self.path, "request settled twice, ignoring");
                return false;
            }
            *outcome = Some(result.clone());
        }

        let callback = self.callback.borrow_mut().take();
        if let Some(callback) = callback {
            callback(&result);
        }
        true
    }

    fn state(&self) -> RequestState {
        match &*self.outcome.borrow() {
            None => RequestState::Pending,
            Some(Ok(())) => RequestState::Completed,
            Some(Err(_)) => RequestState::Failed,
        }
    }
}

/// Handle to an outgoing active message.
///
/// # Examples
///
/// ```ignore
/// let request = endpoint.am_send(AmId::new(0), &payload, SendParams::new())?;
/// worker.wait(&request)?;
/// assert_eq!(request.state(), RequestState::Completed);
/// request.release();
/// ```
pub struct SendRequest {
    cell: Rc<RequestCell>,
}

impl SendRequest {
    pub(crate) fn new(cell: Rc<RequestCell>) -> Self {
        Self { cell }
    }

    /// Current state.
    pub fn state(&self) -> RequestState {
        self.cell.state()
    }

    /// Whether the request settled, successfully or not.
    pub fn is_done(&self) -> bool {
        self.state() != RequestState::Pending
    }

    /// Outcome, once settled.
    pub fn result(&self) -> Option<AmResult<()>> {
        self.cell.outcome.borrow().clone()
    }

    /// Total payload bytes of the message.
    pub fn bytes_total(&self) -> usize {
        self.cell.bytes_total
    }

    /// Path the message was sent on.
    pub fn path(&self) -> SendPath {
        self.cell.path
    }

    /// Give the handle back. The send itself continues.
    pub fn release(self) {
        tracing::trace!(path = ?self.cell.path, state = ?self.state(), "request released");
    }
}

impl std::fmt::Debug for SendRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendRequest")
            .field("state", &self.state())
            .field("path", &self.cell.path)
            .field("bytes_total", &self.cell.bytes_total)
            .finish()
    }
}
