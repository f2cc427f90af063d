//! HELLO wire header codec
//!
//! Every frame on the AXI stream starts with a fixed 12-byte prefix of three
//! little-endian 32-bit words. Word 0 carries the addresses, word 1 is
//! type-specific, word 2 packs the type code, flags and the payload size.

use riolink_core::{DeviceAddr, Mailbox, MsgType};

/// Wire header length in bytes.
pub const HEADER_LEN: usize = 12;

/// Maximum MESSAGE payload bytes per fragment. Longer messages are segmented.
pub const MSG_FRAG_MAX: usize = 256;

/// Maximum payload size encodable in the header size field.
pub const SIZE_MAX: usize = 0xfff;

/// Type-specific part of the header (word 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HeaderKind {
    /// Streaming write to a 34-bit word-aligned target address. The low word
    /// rides in word 1, the two MSBs in word 2.
    Swrite { addr: u64 },
    Stream { stream_id: u16, cos: u8 },
    Doorbell { info: u16 },
    Message {
        mailbox: Mailbox,
        letter: u8,
        /// Fragment sequence number within the transfer.
        segment: u16,
        /// Set on the final fragment.
        last: bool,
    },
    /// Acknowledgement; echoes word 1 of the acknowledged request.
    Response { echo: u32 },
}

impl HeaderKind {
    pub const fn msg_type(&self) -> MsgType {
        match self {
            HeaderKind::Swrite { .. } => MsgType::Swrite,
            HeaderKind::Stream { .. } => MsgType::Stream,
            HeaderKind::Doorbell { .. } => MsgType::Doorbell,
            HeaderKind::Message { .. } => MsgType::Message,
            HeaderKind::Response { .. } => MsgType::Response,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HeaderError {
    Truncated,
    UnknownType(u8),
}

/// Decoded frame header.
///
/// `size` counts payload bytes following the header; `seg_count` is the total
/// fragment count of a segmented MESSAGE (zero otherwise).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HelloHeader {
    pub dst: DeviceAddr,
    pub src: DeviceAddr,
    pub kind: HeaderKind,
    pub ack: bool,
    pub prio: u8,
    pub seg_count: u8,
    pub size: u16,
}

impl HelloHeader {
    /// Word 1 as it appears on the wire. Also the value a RESPONSE echoes.
    pub const fn word1(&self) -> u32 {
        match self.kind {
            HeaderKind::Swrite { addr } => addr as u32,
            HeaderKind::Stream { stream_id, cos } => (stream_id as u32) << 16 | (cos as u32) << 8,
            HeaderKind::Doorbell { info } => info as u32,
            HeaderKind::Message {
                mailbox,
                letter,
                segment,
                last,
            } => {
                (mailbox.into_u8() as u32) << 24
                    | (letter as u32) << 16
                    | ((segment & 0x7fff) as u32) << 1
                    | last as u32
            }
            HeaderKind::Response { echo } => echo,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let word0 = (self.dst.into_u16() as u32) << 16 | self.src.into_u16() as u32;
        let mut word2 = (self.seg_count as u32) << 24
            | (self.kind.msg_type().into_u8() as u32) << 20
            | (self.ack as u32) << 19
            | ((self.prio & 0x7) as u32) << 16
            | (self.size as u32) & 0xfff;
        if let HeaderKind::Swrite { addr } = self.kind {
            word2 |= (((addr >> 32) & 0x3) as u32) << 12;
        }

        let mut bytes = [0; HEADER_LEN];
        bytes[0..4].copy_from_slice(&word0.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.word1().to_le_bytes());
        bytes[8..12].copy_from_slice(&word2.to_le_bytes());
        bytes
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, HeaderError> {
        if bytes.len() < HEADER_LEN {
            return Err(HeaderError::Truncated);
        }
        let word0 = word_at(bytes, 0);
        let word1 = word_at(bytes, 1);
        let word2 = word_at(bytes, 2);

        let code = ((word2 >> 20) & 0xf) as u8;
        let msg_type = MsgType::from_u8(code).ok_or(HeaderError::UnknownType(code))?;
        let kind = match msg_type {
            MsgType::Swrite => HeaderKind::Swrite {
                addr: word1 as u64 | (((word2 >> 12) & 0x3) as u64) << 32,
            },
            MsgType::Stream => HeaderKind::Stream {
                stream_id: (word1 >> 16) as u16,
                cos: (word1 >> 8) as u8,
            },
            MsgType::Doorbell => HeaderKind::Doorbell {
                info: word1 as u16,
            },
            MsgType::Message => HeaderKind::Message {
                mailbox: Mailbox::from_u8_truncating((word1 >> 24) as u8),
                letter: (word1 >> 16) as u8,
                segment: ((word1 >> 1) & 0x7fff) as u16,
                last: word1 & 0x1 != 0,
            },
            MsgType::Response => HeaderKind::Response { echo: word1 },
        };

        Ok(Self {
            dst: DeviceAddr::from_raw((word0 >> 16) as u16),
            src: DeviceAddr::from_raw(word0 as u16),
            kind,
            ack: (word2 >> 19) & 0x1 != 0,
            prio: ((word2 >> 16) & 0x7) as u8,
            seg_count: (word2 >> 24) as u8,
            size: (word2 & 0xfff) as u16,
        })
    }

    /// Builds the zero-length RESPONSE acknowledging this inbound header.
    pub const fn response_to(&self) -> HelloHeader {
        HelloHeader {
            dst: self.src,
            src: self.dst,
            kind: HeaderKind::Response { echo: self.word1() },
            ack: false,
            prio: self.prio,
            seg_count: 0,
            size: 0,
        }
    }
}

const fn word_at(bytes: &[u8], index: usize) -> u32 {
    u32::from_le_bytes([
        bytes[4 * index],
        bytes[4 * index + 1],
        bytes[4 * index + 2],
        bytes[4 * index + 3],
    ])
}

/// Response signature of an ack-requested frame.
///
/// The signature pairs the peer address with the echoed word 1 so the retry
/// list can match an inbound RESPONSE against exactly one pending descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RespSig(u64);

impl RespSig {
    const fn pack(peer: DeviceAddr, word1: u32) -> Self {
        Self((peer.into_u16() as u64) << 32 | word1 as u64)
    }

    /// Signature the acknowledging RESPONSE to this outbound header will
    /// carry. `None` when the frame requests no acknowledgement; STREAM and
    /// RESPONSE frames never have one.
    pub const fn of_request(header: &HelloHeader) -> Option<RespSig> {
        if !header.ack {
            return None;
        }
        match header.kind {
            HeaderKind::Stream { .. } | HeaderKind::Response { .. } => None,
            _ => Some(Self::pack(header.dst, header.word1())),
        }
    }

    /// Signature carried by an inbound RESPONSE.
    pub const fn of_response(header: &HelloHeader) -> Option<RespSig> {
        match header.kind {
            HeaderKind::Response { echo } => Some(Self::pack(header.src, echo)),
            _ => None,
        }
    }
}
