//! Handler registry: active-message id → handler.
//!
//! Uses hybrid lookup: O(1) array for ids below [`DIRECT_SLOTS`], HashMap
//! for the rest. Entries are stored as `Rc<AmHandler>`; a lookup hands out a
//! clone, so a dispatch keeps the handler it started with even if the id is
//! re-registered while the callback runs.

use std::collections::HashMap;
use std::rc::Rc;

use amflow_core::AmId;

use super::flags::AmHandlerFlags;
use super::message::{AmMessage, Disposition, RendezvousMessage, RendezvousPlan};
use crate::error::AmStatus;

/// Number of ids served by the direct table.
pub const DIRECT_SLOTS: usize = 64;

type EagerFn = dyn Fn(&AmMessage<'_>) -> Disposition;
type RendezvousFn = dyn Fn(&RendezvousMessage<'_>) -> Result<RendezvousPlan, AmStatus>;

/// Callbacks and options registered for one id.
///
/// The eager callback receives every eager message. The optional rendezvous
/// callback receives rendezvous headers and decides where the bulk data
/// goes; without one, rendezvous messages for this id are rejected. Context
/// is whatever the closures capture.
///
/// # Example
///
/// ```ignore
/// let received = Rc::new(Cell::new(0));
/// let counter = received.clone();
/// worker.set_am_handler(
///     AmId::new(0),
///     AmHandler::new(move |_msg| {
///         counter.set(counter.get() + 1);
///         Disposition::Consumed
///     })
///     .with_flags(AmHandlerFlags::WHOLE_MSG),
/// )?;
/// ```
pub struct AmHandler {
    eager: Box<EagerFn>,
    rendezvous: Option<Box<RendezvousFn>>,
    flags: AmHandlerFlags,
}

impl AmHandler {
    /// Handler with an eager callback.
    pub fn new<F>(eager: F) -> Self
    where
        F: Fn(&AmMessage<'_>) -> Disposition + 'static,
    {
        Self {
            eager: Box::new(eager),
            rendezvous: None,
            flags: AmHandlerFlags::empty(),
        }
    }

    /// Handler that consumes and ignores everything.
    pub fn noop() -> Self {
        Self::new(|_| Disposition::Consumed)
    }

    /// Add a rendezvous callback.
    pub fn with_rendezvous<F>(mut self, rendezvous: F) -> Self
    where
        F: Fn(&RendezvousMessage<'_>) -> Result<RendezvousPlan, AmStatus> + 'static,
    {
        self.rendezvous = Some(Box::new(rendezvous));
        self
    }

    /// Set registration flags.
    pub fn with_flags(mut self, flags: AmHandlerFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Registration flags.
    pub fn flags(&self) -> AmHandlerFlags {
        self.flags
    }

    /// Whether rendezvous messages are accepted.
    pub fn accepts_rendezvous(&self) -> bool {
        self.rendezvous.is_some()
    }

    pub(crate) fn on_eager(&self, msg: &AmMessage<'_>) -> Disposition {
        (self.eager)(msg)
    }

    pub(crate) fn on_rendezvous(&self, msg: &RendezvousMessage<'_>) -> Result<RendezvousPlan, AmStatus> {
        match &self.rendezvous {
            Some(rendezvous) => rendezvous(msg),
            None => Err(AmStatus::NoHandler),
        }
    }
}

impl std::fmt::Debug for AmHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmHandler")
            .field("rendezvous", &self.rendezvous.is_some())
            .field("flags", &self.flags)
            .finish()
    }
}

/// Maps active-message ids to handlers.
pub struct HandlerRegistry {
    /// Handlers for ids below DIRECT_SLOTS.
    direct: [Option<Rc<AmHandler>>; DIRECT_SLOTS],

    /// Handlers for every other id.
    overflow: HashMap<AmId, Rc<AmHandler>>,

    registration_count: u64,
    replacement_count: u64,
    removal_count: u64,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            direct: std::array::from_fn(|_| None),
            overflow: HashMap::new(),
            registration_count: 0,
            replacement_count: 0,
            removal_count: 0,
        }
    }

    fn slot(id: AmId) -> Option<usize> {
        let index = id.as_u16() as usize;
        (index < DIRECT_SLOTS).then_some(index)
    }

    /// Install `handler` for `id`, returning the entry it replaced.
    pub fn insert(&mut self, id: AmId, handler: AmHandler) -> Option<Rc<AmHandler>> {
        let handler = Rc::new(handler);
        let previous = match Self::slot(id) {
            Some(index) => self.direct[index].replace(handler),
            None => self.overflow.insert(id, handler),
        };
        self.registration_count += 1;
        if previous.is_some() {
            self.replacement_count += 1;
        }
        previous
    }

    /// Look up the handler for `id`.
    pub fn get(&self, id: AmId) -> Option<Rc<AmHandler>> {
        match Self::slot(id) {
            Some(index) => self.direct[index].clone(),
            None => self.overflow.get(&id).cloned(),
        }
    }

    /// Remove the handler for `id`.
    pub fn remove(&mut self, id: AmId) -> Option<Rc<AmHandler>> {
        let removed = match Self::slot(id) {
            Some(index) => self.direct[index].take(),
            None => self.overflow.remove(&id),
        };
        if removed.is_some() {
            self.removal_count += 1;
        }
        removed
    }

    /// Number of registered ids.
    pub fn len(&self) -> usize {
        self.direct.iter().filter(|e| e.is_some()).count() + self.overflow.len()
    }

    /// Whether no id is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total registrations, replacements included.
    pub fn registration_count(&self) -> u64 {
        self.registration_count
    }

    /// Registrations that replaced an existing handler.
    pub fn replacement_count(&self) -> u64 {
        self.replacement_count
    }

    /// Successful removals.
    pub fn removal_count(&self) -> u64 {
        self.removal_count
    }
}
