//! Wire format for active-message packets.
//!
//! Packet format: `[length:4][checksum:4][kind:1][flags:1][am_id:2][body:N]`
//!
//! - **length**: total packet size including header (little-endian u32)
//! - **checksum**: CRC32C of everything after the checksum field
//! - **kind**: frame kind, see [`FrameKind`]
//! - **flags**: [`SendFlags`] of the originating send (zero for control frames)
//! - **am_id**: active-message id (zero for control frames)
//!
//! Bodies per kind, all integers little-endian:
//!
//! | kind             | body                                                 |
//! |------------------|------------------------------------------------------|
//! | `Eager`          | payload                                              |
//! | `ReadyToSend`    | `request:8 remaining:8` then the header prefix       |
//! | `ReadyToReceive` | `request:8 session:8 count:4` then `count × (key:8 len:8)` |
//! | `Reject`         | `request:8 status:4`                                 |
//! | `Finish`         | `session:8 bytes:8`                                  |
//! | `Abort`          | `session:8 status:4`                                 |

use std::io::IoSlice;

use amflow_core::{AmId, RemoteKey};

use crate::am::SendFlags;
use crate::error::AmStatus;

/// Header size: 4 (length) + 4 (checksum) + 1 (kind) + 1 (flags) + 2 (am_id).
pub const HEADER_SIZE: usize = 12;

/// Maximum packet size, header included (1MB).
///
/// Packets larger than this are refused on both encode and decode.
pub const MAX_PACKET_SIZE: usize = 1024 * 1024;

const SEGMENT_SIZE: usize = 16;

/// Wire format error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    /// Not enough data to parse the packet.
    #[error("insufficient data: need {needed} bytes, have {have}")]
    InsufficientData {
        /// Minimum bytes required to parse.
        needed: usize,
        /// Actual bytes available.
        have: usize,
    },

    /// Checksum verification failed - data was corrupted.
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Expected checksum from header.
        expected: u32,
        /// Computed checksum from data.
        actual: u32,
    },

    /// Packet exceeds maximum allowed size.
    #[error("packet too large: {size} bytes (max {MAX_PACKET_SIZE})")]
    PacketTooLarge {
        /// Packet size in bytes, header included.
        size: usize,
    },

    /// Length field has an invalid value.
    #[error("invalid packet length: {length}")]
    InvalidLength {
        /// The invalid length value from the header.
        length: u32,
    },

    /// Kind byte does not name a frame kind.
    #[error("unknown frame kind: {kind}")]
    UnknownKind {
        /// The kind byte from the header.
        kind: u8,
    },

    /// The body is longer than its kind allows.
    #[error("{extra} unexpected trailing bytes")]
    TrailingBytes {
        /// Number of unparsed bytes.
        extra: usize,
    },
}

/// Frame kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// Whole message inline.
    Eager = 1,
    /// Rendezvous header: prefix inline, bulk announced.
    ReadyToSend = 2,
    /// Receiver's destination descriptors.
    ReadyToReceive = 3,
    /// Receiver refuses a rendezvous.
    Reject = 4,
    /// Sender finished placing bulk data.
    Finish = 5,
    /// Sender abandons a rendezvous after it started placing data.
    Abort = 6,
}

impl FrameKind {
    fn from_u8(kind: u8) -> Result<Self, WireError> {
        Ok(match kind {
            1 => FrameKind::Eager,
            2 => FrameKind::ReadyToSend,
            3 => FrameKind::ReadyToReceive,
            4 => FrameKind::Reject,
            5 => FrameKind::Finish,
            6 => FrameKind::Abort,
            _ => return Err(WireError::UnknownKind { kind }),
        })
    }
}

/// Packet header for wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Total packet size including header.
    pub length: u32,
    /// CRC32C checksum of everything after this field.
    pub checksum: u32,
    /// Raw frame kind byte.
    pub kind: u8,
    /// Raw send flags byte.
    pub flags: u8,
    /// Active-message id.
    pub id: AmId,
}

impl PacketHeader {
    /// Serialize header into buffer (must be at least HEADER_SIZE bytes).
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than HEADER_SIZE.
    pub fn serialize_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0..4].copy_from_slice(&self.length.to_le_bytes());
        buf[4..8].copy_from_slice(&self.checksum.to_le_bytes());
        buf[8] = self.kind;
        buf[9] = self.flags;
        buf[10..12].copy_from_slice(&self.id.as_u16().to_le_bytes());
    }

    /// Deserialize header from buffer.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientData` if buffer is smaller than HEADER_SIZE.
    pub fn deserialize(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < HEADER_SIZE {
            return Err(WireError::InsufficientData {
                needed: HEADER_SIZE,
                have: buf.len(),
            });
        }

        Ok(Self {
            length: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            checksum: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            kind: buf[8],
            flags: buf[9],
            id: AmId::new(u16::from_le_bytes([buf[10], buf[11]])),
        })
    }
}

/// Destination descriptor carried by a `ReadyToReceive` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteSegment {
    /// Region the sender should put into.
    pub key: RemoteKey,
    /// Region length in bytes.
    pub len: u64,
}

/// A decoded packet. Payload slices borrow from the packet buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame<'a> {
    /// Whole message inline.
    Eager {
        /// Handler id.
        id: AmId,
        /// Flags of the send.
        flags: SendFlags,
        /// Linearized payload.
        payload: &'a [u8],
    },
    /// Rendezvous header.
    ReadyToSend {
        /// Handler id.
        id: AmId,
        /// Flags of the send.
        flags: SendFlags,
        /// Sender-side request id, echoed in the reply.
        request: u64,
        /// Bulk bytes that follow the prefix.
        remaining: u64,
        /// Header prefix.
        prefix: &'a [u8],
    },
    /// Receiver accepts a rendezvous and names its destinations.
    ReadyToReceive {
        /// Sender-side request id.
        request: u64,
        /// Receiver-side session id.
        session: u64,
        /// Destination descriptors in placement order.
        segments: Vec<RemoteSegment>,
    },
    /// Receiver refuses a rendezvous.
    Reject {
        /// Sender-side request id.
        request: u64,
        /// Reason.
        status: AmStatus,
    },
    /// Sender placed all bulk data.
    Finish {
        /// Receiver-side session id.
        session: u64,
        /// Bytes placed.
        bytes: u64,
    },
    /// Sender gave up on a session.
    Abort {
        /// Receiver-side session id.
        session: u64,
        /// Reason.
        status: AmStatus,
    },
}

impl Frame<'_> {
    /// Frame kind.
    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::Eager { .. } => FrameKind::Eager,
            Frame::ReadyToSend { .. } => FrameKind::ReadyToSend,
            Frame::ReadyToReceive { .. } => FrameKind::ReadyToReceive,
            Frame::Reject { .. } => FrameKind::Reject,
            Frame::Finish { .. } => FrameKind::Finish,
            Frame::Abort { .. } => FrameKind::Abort,
        }
    }

    /// Serialize the frame into a packet.
    ///
    /// # Errors
    ///
    /// Returns `PacketTooLarge` if the packet would exceed MAX_PACKET_SIZE.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        match self {
            Frame::Eager { id, flags, payload } => {
                encode_eager(*id, *flags, &[IoSlice::new(payload)])
            }
            Frame::ReadyToSend {
                id,
                flags,
                request,
                remaining,
                prefix,
            } => encode_ready_to_send(*id, *flags, *request, *remaining, prefix),
            Frame::ReadyToReceive {
                request,
                session,
                segments,
            } => {
                let mut w = PacketWriter::new(
                    FrameKind::ReadyToReceive,
                    SendFlags::empty(),
                    AmId::default(),
                    20 + segments.len() * SEGMENT_SIZE,
                )?;
                w.put_u64(*request);
                w.put_u64(*session);
                w.put_u32(segments.len() as u32);
                for segment in segments {
                    w.put_u64(segment.key.as_u64());
                    w.put_u64(segment.len);
                }
                Ok(w.finish())
            }
            Frame::Reject { request, status } => {
                let mut w = PacketWriter::control(FrameKind::Reject, 12)?;
                w.put_u64(*request);
                w.put_u32(status.code());
                Ok(w.finish())
            }
            Frame::Finish { session, bytes } => {
                let mut w = PacketWriter::control(FrameKind::Finish, 16)?;
                w.put_u64(*session);
                w.put_u64(*bytes);
                Ok(w.finish())
            }
            Frame::Abort { session, status } => {
                let mut w = PacketWriter::control(FrameKind::Abort, 12)?;
                w.put_u64(*session);
                w.put_u32(status.code());
                Ok(w.finish())
            }
        }
    }
}

/// Serialize an eager packet, linearizing `segments` in order.
///
/// # Errors
///
/// Returns `PacketTooLarge` if the packet would exceed MAX_PACKET_SIZE.
///
/// # Examples
///
/// ```
/// use std::io::IoSlice;
/// use amflow_core::AmId;
/// use amflow_transport::SendFlags;
/// use amflow_transport::wire::{decode, encode_eager, Frame};
///
/// let packet = encode_eager(
///     AmId::new(3),
///     SendFlags::REPLY,
///     &[IoSlice::new(b"hello "), IoSlice::new(b"world")],
/// )
/// .expect("encode");
///
/// match decode(&packet).expect("decode") {
///     Frame::Eager { id, flags, payload } => {
///         assert_eq!(id, AmId::new(3));
///         assert_eq!(flags, SendFlags::REPLY);
///         assert_eq!(payload, b"hello world");
///     }
///     other => panic!("unexpected frame {other:?}"),
/// }
/// ```
pub fn encode_eager(
    id: AmId,
    flags: SendFlags,
    segments: &[IoSlice<'_>],
) -> Result<Vec<u8>, WireError> {
    let body_len = segments.iter().map(|s| s.len()).sum();
    let mut w = PacketWriter::new(FrameKind::Eager, flags, id, body_len)?;
    for segment in segments {
        w.put_bytes(segment);
    }
    Ok(w.finish())
}

/// Serialize a rendezvous header packet.
///
/// # Errors
///
/// Returns `PacketTooLarge` if the packet would exceed MAX_PACKET_SIZE.
pub fn encode_ready_to_send(
    id: AmId,
    flags: SendFlags,
    request: u64,
    remaining: u64,
    prefix: &[u8],
) -> Result<Vec<u8>, WireError> {
    let mut w = PacketWriter::new(FrameKind::ReadyToSend, flags, id, 16 + prefix.len())?;
    w.put_u64(request);
    w.put_u64(remaining);
    w.put_bytes(prefix);
    Ok(w.finish())
}

/// Deserialize a packet, validating length and checksum.
///
/// Bytes past the header's length field are ignored.
///
/// # Errors
///
/// - `InsufficientData`: not enough bytes for the header, the packet, or the body
/// - `InvalidLength`: length field smaller than the header
/// - `PacketTooLarge`: length field above MAX_PACKET_SIZE
/// - `ChecksumMismatch`: data was corrupted
/// - `UnknownKind`: kind byte not recognized
/// - `TrailingBytes`: body longer than its kind allows
pub fn decode(data: &[u8]) -> Result<Frame<'_>, WireError> {
    let header = PacketHeader::deserialize(data)?;

    if header.length < HEADER_SIZE as u32 {
        return Err(WireError::InvalidLength {
            length: header.length,
        });
    }

    let expected_len = header.length as usize;
    if expected_len > MAX_PACKET_SIZE {
        return Err(WireError::PacketTooLarge { size: expected_len });
    }
    if data.len() < expected_len {
        return Err(WireError::InsufficientData {
            needed: expected_len,
            have: data.len(),
        });
    }

    let computed = crc32c::crc32c(&data[8..expected_len]);
    if computed != header.checksum {
        return Err(WireError::ChecksumMismatch {
            expected: header.checksum,
            actual: computed,
        });
    }

    let flags = SendFlags::from_bits_truncate(header.flags);
    let mut body = Reader::new(&data[HEADER_SIZE..expected_len]);

    let frame = match FrameKind::from_u8(header.kind)? {
        FrameKind::Eager => Frame::Eager {
            id: header.id,
            flags,
            payload: body.rest(),
        },
        FrameKind::ReadyToSend => Frame::ReadyToSend {
            id: header.id,
            flags,
            request: body.u64()?,
            remaining: body.u64()?,
            prefix: body.rest(),
        },
        FrameKind::ReadyToReceive => {
            let request = body.u64()?;
            let session = body.u64()?;
            let count = body.u32()? as usize;
            if body.remaining() != count * SEGMENT_SIZE {
                return Err(WireError::InvalidLength {
                    length: header.length,
                });
            }
            let mut segments = Vec::with_capacity(count);
            for _ in 0..count {
                segments.push(RemoteSegment {
                    key: RemoteKey::new(body.u64()?),
                    len: body.u64()?,
                });
            }
            Frame::ReadyToReceive {
                request,
                session,
                segments,
            }
        }
        FrameKind::Reject => Frame::Reject {
            request: body.u64()?,
            status: AmStatus::from_code(body.u32()?),
        },
        FrameKind::Finish => Frame::Finish {
            session: body.u64()?,
            bytes: body.u64()?,
        },
        FrameKind::Abort => Frame::Abort {
            session: body.u64()?,
            status: AmStatus::from_code(body.u32()?),
        },
    };

    body.finish()?;
    Ok(frame)
}

/// Builds a packet in place; length and checksum are filled in by `finish`.
struct PacketWriter {
    buf: Vec<u8>,
}

impl PacketWriter {
    fn new(kind: FrameKind, flags: SendFlags, id: AmId, body_len: usize) -> Result<Self, WireError> {
        let total = HEADER_SIZE.saturating_add(body_len);
        if total > MAX_PACKET_SIZE {
            return Err(WireError::PacketTooLarge { size: total });
        }
        let mut buf = vec![0u8; HEADER_SIZE];
        buf.reserve_exact(body_len);
        PacketHeader {
            length: 0,
            checksum: 0,
            kind: kind as u8,
            flags: flags.bits(),
            id,
        }
        .serialize_into(&mut buf);
        Ok(Self { buf })
    }

    fn control(kind: FrameKind, body_len: usize) -> Result<Self, WireError> {
        Self::new(kind, SendFlags::empty(), AmId::default(), body_len)
    }

    fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn finish(mut self) -> Vec<u8> {
        let length = self.buf.len() as u32;
        self.buf[0..4].copy_from_slice(&length.to_le_bytes());
        let checksum = crc32c::crc32c(&self.buf[8..]);
        self.buf[4..8].copy_from_slice(&checksum.to_le_bytes());
        self.buf
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], WireError> {
        let end = self.pos + N;
        let bytes = self
            .buf
            .get(self.pos..end)
            .ok_or(WireError::InsufficientData {
                needed: HEADER_SIZE + end,
                have: HEADER_SIZE + self.buf.len(),
            })?;
        self.pos = end;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn u32(&mut self) -> Result<u32, WireError> {
        self.take::<4>().map(u32::from_le_bytes)
    }

    fn u64(&mut self) -> Result<u64, WireError> {
        self.take::<8>().map(u64::from_le_bytes)
    }

    fn rest(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos..];
        self.pos = self.buf.len();
        rest
    }

    fn finish(self) -> Result<(), WireError> {
        match self.remaining() {
            0 => Ok(()),
            extra => Err(WireError::TrailingBytes { extra }),
        }
    }
}
