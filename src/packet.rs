//! Wire header and packet types for R2P2.
//!
//! Every datagram starts with the fixed 8-byte header. Multi-byte fields are
//! little-endian; the type and routing-policy nibbles share one byte.

use bitflags::bitflags;

use crate::error::{Error, Result};

/// Wire header size in bytes.
pub const HDR_SIZE: usize = 8;

/// Magic byte for valid packets.
pub const MAGIC: u8 = 0xC2;

/// Maximum payload carried by a standard packet.
pub const PAYLOAD_SIZE: usize = 1400;

/// Maximum payload carried by the first packet of a multi-packet message.
///
/// Kept small so the first packet stays cheap and the ACK handshake can start
/// before the remainder of the request is transmitted.
pub const MIN_PAYLOAD_SIZE: usize = 256;

/// Maximum packets per message (8-bit packet counter).
pub const MAX_PACKETS: usize = 0xFF;

/// Capacity of one packet buffer (header plus payload).
pub const BUF_CAPACITY: usize = HDR_SIZE + PAYLOAD_SIZE;

/// Largest message a single request or response can carry.
pub const MAX_MSG_SIZE: usize = MIN_PAYLOAD_SIZE + (MAX_PACKETS - 1) * PAYLOAD_SIZE;

// Field offsets within the serialized header.
const OFF_MAGIC: usize = 0;
const OFF_HDR_SIZE: usize = 1;
const OFF_TYPE_POLICY: usize = 2;
const OFF_FLAGS: usize = 3;
const OFF_RID: usize = 4;
const OFF_P_ORDER: usize = 6;

/// Message type (upper nibble of the type/policy byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MsgType {
    /// Request packet.
    Request = 0,
    /// Response packet.
    Response = 1,
    /// Acknowledgement of the first packet of a multi-packet request.
    Ack = 2,
}

impl MsgType {
    /// Packets addressed to a client pair: responses and ACKs.
    #[inline]
    pub fn is_response(&self) -> bool {
        matches!(self, MsgType::Response | MsgType::Ack)
    }
}

impl TryFrom<u8> for MsgType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(MsgType::Request),
            1 => Ok(MsgType::Response),
            2 => Ok(MsgType::Ack),
            _ => Err(Error::BadMsgType(value)),
        }
    }
}

/// Routing policy nibble. Opaque to the engine; carried for the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy(pub u8);

impl Policy {
    /// Load-balanced routing, the usual choice for fresh requests.
    pub const LB_ROUTE: Policy = Policy(0x0);
    /// Pin to one destination. Used for ACKs and responses.
    pub const FIXED_ROUTE: Policy = Policy(0x1);
}

bitflags! {
    /// Flag bits of the wire header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HdrFlags: u8 {
        /// First packet of a message.
        const FIRST = 0x80;
        /// Last packet of a message.
        const LAST = 0x40;
    }
}

/// Parsed wire header.
///
/// `p_order` is overloaded: on the first packet of a message it carries the
/// total packet count, on every later packet the 1-based sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hdr {
    pub msg_type: MsgType,
    pub policy: Policy,
    pub flags: HdrFlags,
    pub rid: u16,
    pub p_order: u8,
}

impl Hdr {
    /// Create a header with no flags set.
    pub fn new(msg_type: MsgType, policy: Policy, rid: u16, p_order: u8) -> Self {
        Self {
            msg_type,
            policy,
            flags: HdrFlags::empty(),
            rid,
            p_order,
        }
    }

    #[inline]
    pub fn is_first(&self) -> bool {
        self.flags.contains(HdrFlags::FIRST)
    }

    #[inline]
    pub fn is_last(&self) -> bool {
        self.flags.contains(HdrFlags::LAST)
    }

    /// Whether this packet is addressed to a client pair.
    #[inline]
    pub fn is_response(&self) -> bool {
        self.msg_type.is_response()
    }

    /// Serialize into the first `HDR_SIZE` bytes of `dst`.
    ///
    /// # Panics
    /// Panics if `dst` is shorter than `HDR_SIZE`.
    pub fn write_to(&self, dst: &mut [u8]) {
        dst[OFF_MAGIC] = MAGIC;
        dst[OFF_HDR_SIZE] = HDR_SIZE as u8;
        dst[OFF_TYPE_POLICY] = ((self.msg_type as u8) << 4) | (self.policy.0 & 0x0F);
        dst[OFF_FLAGS] = self.flags.bits();
        dst[OFF_RID..OFF_RID + 2].copy_from_slice(&self.rid.to_le_bytes());
        dst[OFF_P_ORDER] = self.p_order;
        dst[OFF_P_ORDER + 1] = 0;
    }

    /// Parse and validate a header from the start of a datagram.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HDR_SIZE {
            return Err(Error::TruncatedPacket { len: bytes.len() });
        }
        if bytes[OFF_MAGIC] != MAGIC {
            return Err(Error::BadMagic {
                got: bytes[OFF_MAGIC],
            });
        }
        if bytes[OFF_HDR_SIZE] != HDR_SIZE as u8 {
            return Err(Error::BadHeaderSize {
                got: bytes[OFF_HDR_SIZE],
            });
        }
        let type_policy = bytes[OFF_TYPE_POLICY];
        let msg_type = MsgType::try_from(type_policy >> 4)?;
        Ok(Self {
            msg_type,
            policy: Policy(type_policy & 0x0F),
            flags: HdrFlags::from_bits_retain(bytes[OFF_FLAGS]),
            rid: u16::from_le_bytes([bytes[OFF_RID], bytes[OFF_RID + 1]]),
            p_order: bytes[OFF_P_ORDER],
        })
    }
}

/// Set a flag bit in an already-serialized header.
#[inline]
pub fn set_flag(pkt: &mut [u8], flag: HdrFlags) {
    pkt[OFF_FLAGS] |= flag.bits();
}

/// Overwrite the packet-order field of an already-serialized header.
#[inline]
pub fn set_p_order(pkt: &mut [u8], p_order: u8) {
    pkt[OFF_P_ORDER] = p_order;
}
