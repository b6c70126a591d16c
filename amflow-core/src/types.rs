//! Core identifiers.
//!
//! - [`AmId`]: active-message type id, selects a handler on the receiver
//! - [`WorkerAddress`]: transport-level identity of a worker
//! - [`RemoteKey`]: descriptor for a registered memory region

/// Active-message type identifier.
///
/// Ids are chosen by the application. A receiver worker maps each id to at
/// most one handler at a time.
///
/// # Examples
///
/// ```
/// use amflow_core::AmId;
///
/// let id = AmId::new(1000);
/// assert_eq!(id.as_u16(), 1000);
/// assert_eq!(id.to_string(), "am#1000");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct AmId(u16);

impl AmId {
    /// Create an id from its raw value.
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    /// Raw value as carried on the wire.
    pub const fn as_u16(self) -> u16 {
        self.0
    }
}

impl From<u16> for AmId {
    fn from(raw: u16) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for AmId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "am#{}", self.0)
    }
}

/// Address of a worker on a transport.
///
/// Assigned by the transport. Two workers attached to the same transport
/// never share an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerAddress(u64);

impl WorkerAddress {
    /// Create an address from its raw value.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw value.
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for WorkerAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "worker-{:04x}", self.0)
    }
}

/// Descriptor naming a memory region registered with a transport.
///
/// Keys are only meaningful to the transport that issued them. A key sent to
/// a peer lets that peer place bytes into the region with
/// [`Transport::put`](crate::Transport::put).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RemoteKey(u64);

impl RemoteKey {
    /// Create a key from its raw value.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw value as carried on the wire.
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RemoteKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rkey:{:016x}", self.0)
    }
}
