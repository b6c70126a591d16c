//! Types exchanged with handlers and passed to the send entry points.

use std::io::IoSlice;

use amflow_core::{AmId, WorkerAddress};

use super::endpoint::Endpoint;
use super::flags::{RecvFlags, SendFlags};
use super::pool::DataHandle;
use super::request::CompletionCallback;
use crate::error::{AmError, AmResult, AmStatus};

/// Outgoing payload: one contiguous buffer or an ordered scatter/gather list.
///
/// The receiver always sees the concatenation of the segments in list order.
#[derive(Debug, Clone, Copy)]
pub enum Payload<'a> {
    /// One contiguous buffer.
    Contig(&'a [u8]),
    /// Segments, sent as their concatenation.
    Iov(&'a [IoSlice<'a>]),
}

impl Payload<'_> {
    /// Total length in bytes.
    pub fn len(&self) -> usize {
        match self {
            Payload::Contig(data) => data.len(),
            Payload::Iov(segments) => segments.iter().map(|s| s.len()).sum(),
        }
    }

    /// Whether the payload carries no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<'a> From<&'a [u8]> for Payload<'a> {
    fn from(data: &'a [u8]) -> Self {
        Payload::Contig(data)
    }
}

impl<'a, const N: usize> From<&'a [u8; N]> for Payload<'a> {
    fn from(data: &'a [u8; N]) -> Self {
        Payload::Contig(data)
    }
}

impl<'a> From<&'a Vec<u8>> for Payload<'a> {
    fn from(data: &'a Vec<u8>) -> Self {
        Payload::Contig(data)
    }
}

impl<'a> From<&'a [IoSlice<'a>]> for Payload<'a> {
    fn from(segments: &'a [IoSlice<'a>]) -> Self {
        Payload::Iov(segments)
    }
}

impl<'a, const N: usize> From<&'a [IoSlice<'a>; N]> for Payload<'a> {
    fn from(segments: &'a [IoSlice<'a>; N]) -> Self {
        Payload::Iov(segments)
    }
}

impl<'a> From<&'a Vec<IoSlice<'a>>> for Payload<'a> {
    fn from(segments: &'a Vec<IoSlice<'a>>) -> Self {
        Payload::Iov(segments)
    }
}

/// Per-send options.
#[derive(Default)]
pub struct SendParams {
    pub(crate) flags: SendFlags,
    pub(crate) callback: Option<CompletionCallback>,
}

impl SendParams {
    /// No flags, no callback.
    pub fn new() -> Self {
        Self::default()
    }

    /// Let the receiver answer through the endpoint it is handed.
    pub fn reply(mut self) -> Self {
        self.flags |= SendFlags::REPLY;
        self
    }

    /// Replace the flag set.
    pub fn with_flags(mut self, flags: SendFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Run `callback` once when the send settles.
    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&AmResult<()>) + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Flags of this send.
    pub fn flags(&self) -> SendFlags {
        self.flags
    }
}

impl std::fmt::Debug for SendParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendParams")
            .field("flags", &self.flags)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

/// What the handler did with an eager message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Done with the data; the buffer is reused immediately.
    Consumed,
    /// Keep the data. It stays readable and unchanged under
    /// [`AmMessage::handle`] until `Worker::release_data` is called.
    Retain,
    /// Drop the message.
    Reject(AmStatus),
}

/// An eager message as seen by its handler.
pub struct AmMessage<'a> {
    pub(crate) id: AmId,
    pub(crate) source: WorkerAddress,
    pub(crate) data: &'a [u8],
    pub(crate) reply: Option<Endpoint>,
    pub(crate) flags: RecvFlags,
    pub(crate) handle: DataHandle,
}

impl AmMessage<'_> {
    /// Message id.
    pub fn id(&self) -> AmId {
        self.id
    }

    /// Worker that sent the message.
    pub fn source(&self) -> WorkerAddress {
        self.source
    }

    /// Payload. Valid for the duration of the call unless retained.
    pub fn data(&self) -> &[u8] {
        self.data
    }

    /// Payload length.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Endpoint back to the sender, present when it asked for replies.
    pub fn reply_endpoint(&self) -> Option<&Endpoint> {
        self.reply.as_ref()
    }

    /// Delivery flags.
    pub fn flags(&self) -> RecvFlags {
        self.flags
    }

    /// Bytes still to come. Eager messages are always whole.
    pub fn remaining_length(&self) -> usize {
        0
    }

    /// Handle the data is kept under if the handler returns
    /// [`Disposition::Retain`].
    pub fn handle(&self) -> DataHandle {
        self.handle
    }
}

/// A rendezvous header as seen by its handler.
pub struct RendezvousMessage<'a> {
    pub(crate) id: AmId,
    pub(crate) source: WorkerAddress,
    pub(crate) prefix: &'a [u8],
    pub(crate) reply: Option<Endpoint>,
    pub(crate) flags: RecvFlags,
    pub(crate) remaining_length: usize,
}

impl RendezvousMessage<'_> {
    /// Message id.
    pub fn id(&self) -> AmId {
        self.id
    }

    /// Worker that sent the message.
    pub fn source(&self) -> WorkerAddress {
        self.source
    }

    /// Header prefix. Valid only for the duration of the call.
    pub fn prefix(&self) -> &[u8] {
        self.prefix
    }

    /// Endpoint back to the sender, present when it asked for replies.
    pub fn reply_endpoint(&self) -> Option<&Endpoint> {
        self.reply.as_ref()
    }

    /// Delivery flags.
    pub fn flags(&self) -> RecvFlags {
        self.flags
    }

    /// Bulk bytes the destination segments must hold.
    pub fn remaining_length(&self) -> usize {
        self.remaining_length
    }
}

/// Callback run once when a rendezvous session ends.
pub type RendezvousCallback = Box<dyn FnOnce(RendezvousDone)>;

/// Where a rendezvous handler wants the bulk data placed.
///
/// Segment lengths must add up to
/// [`RendezvousMessage::remaining_length`]. Bulk bytes fill the segments in
/// order.
pub struct RendezvousPlan {
    pub(crate) segments: Vec<Vec<u8>>,
    pub(crate) cookie: u64,
    pub(crate) on_complete: RendezvousCallback,
}

impl RendezvousPlan {
    /// Start a plan with no segments.
    pub fn new<F>(cookie: u64, on_complete: F) -> Self
    where
        F: FnOnce(RendezvousDone) + 'static,
    {
        Self {
            segments: Vec::new(),
            cookie,
            on_complete: Box::new(on_complete),
        }
    }

    /// Append a destination segment. Its current length is the segment size.
    pub fn segment(mut self, buffer: Vec<u8>) -> Self {
        self.segments.push(buffer);
        self
    }

    /// Append a zeroed destination segment of `len` bytes.
    pub fn zeroed_segment(self, len: usize) -> Self {
        self.segment(vec![0u8; len])
    }

    /// Sum of segment lengths.
    pub fn total_len(&self) -> usize {
        self.segments.iter().map(Vec::len).sum()
    }

    /// Number of segments.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }
}

impl std::fmt::Debug for RendezvousPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RendezvousPlan")
            .field("segments", &self.segments.len())
            .field("total_len", &self.total_len())
            .field("cookie", &self.cookie)
            .finish()
    }
}

/// Outcome handed to a rendezvous completion callback.
#[derive(Debug)]
pub struct RendezvousDone {
    /// Cookie from the plan.
    pub cookie: u64,
    /// Filled destination segments, in plan order, or why the session failed.
    pub result: Result<Vec<Vec<u8>>, AmError>,
}
