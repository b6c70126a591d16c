//! Flag sets for registration, sending and delivery.

use bitflags::bitflags;

bitflags! {
    /// Options recorded with a handler registration.
    ///
    /// # Flags
    ///
    /// - `WHOLE_MSG`: the handler expects each message in a single call
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AmHandlerFlags: u32 {
        /// Deliver each message whole, in one callback invocation.
        const WHOLE_MSG = 1 << 0;
    }
}

bitflags! {
    /// Options for a single send. Carried on the wire in one byte.
    ///
    /// # Flags
    ///
    /// - `REPLY`: the receiver gets an endpoint back to the sender
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SendFlags: u8 {
        /// Attach the sender's identity so the handler can answer.
        const REPLY = 1 << 0;
    }
}

bitflags! {
    /// Describes a delivery to the handler.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct RecvFlags: u32 {
        /// The data buffer may be retained with `Disposition::Retain`.
        const DATA = 1 << 0;

        /// This is a rendezvous header; bulk data follows on request.
        const RENDEZVOUS = 1 << 1;

        /// A reply endpoint is attached.
        const REPLY = 1 << 2;
    }
}

impl From<SendFlags> for RecvFlags {
    fn from(flags: SendFlags) -> Self {
        if flags.contains(SendFlags::REPLY) {
            RecvFlags::REPLY
        } else {
            RecvFlags::empty()
        }
    }
}
