//! Frame layout of the radio transport.
//!
//! ```text
//! +------+-------+-----+------+-------------+--------+-----------+
//! | kind | flags | seq | port | destination | source | payload.. |
//! |  1B  |  1B   | 1B  |  1B  |     4B      |   4B   |  0..32B   |
//! +------+-------+-----+------+-------------+--------+-----------+
//! ```
use crate::address::DeviceAddress;
use crate::MAX_APP_PAYLOAD;

use bitflags::bitflags;

pub const HEADER_LENGTH: usize = 12;
pub const MAX_FRAME_LENGTH: usize = HEADER_LENGTH + MAX_APP_PAYLOAD;

/// Port carrying unconnected user datagrams.
pub const UUD_PORT: u8 = 0x7F;
/// Port of network management frames (join, link, ping).
pub const MGMT_PORT: u8 = 0x00;

/// Kind of frame, first byte on the air.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum FrameType {
    Data = 0x01,
    Ack = 0x02,
    JoinRequest = 0x10,
    JoinReply = 0x11,
    LinkRequest = 0x20,
    LinkReply = 0x21,
    PingRequest = 0x30,
    PingReply = 0x31,
}

impl TryFrom<u8> for FrameType {
    type Error = FrameError;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        Ok(match raw {
            0x01 => FrameType::Data,
            0x02 => FrameType::Ack,
            0x10 => FrameType::JoinRequest,
            0x11 => FrameType::JoinReply,
            0x20 => FrameType::LinkRequest,
            0x21 => FrameType::LinkReply,
            0x30 => FrameType::PingRequest,
            0x31 => FrameType::PingReply,
            n => {
                return Err(FrameError::InvalidHeader {
                    context: Some(format!("Unknown frame type {:#04x}.", n)),
                })
            }
        })
    }
}

bitflags! {
    pub struct FrameFlags: u8 {
        /// The sender waits for an [FrameType::Ack].
        const ACK_REQ = 0b0000_0001;
        /// Sent by an access point.
        const FROM_AP = 0b0000_0010;
    }
}

pub type Payload = heapless::Vec<u8, MAX_APP_PAYLOAD>;

/// Full representation of a radio frame.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RadioFrame {
    pub kind: FrameType,
    pub flags: FrameFlags,
    pub seq: u8,
    pub port: u8,
    pub destination: DeviceAddress,
    pub source: DeviceAddress,
    pub payload: Payload,
}

impl RadioFrame {
    pub fn new(
        kind: FrameType,
        destination: DeviceAddress,
        source: DeviceAddress,
        port: u8,
        seq: u8,
        payload: &[u8],
    ) -> Result<Self, FrameError> {
        let payload = Payload::from_slice(payload).map_err(|_| FrameError::TooLong {
            size: payload.len(),
        })?;
        Ok(Self {
            kind,
            flags: FrameFlags::empty(),
            seq,
            port,
            destination,
            source,
            payload,
        })
    }

    pub fn with_flags(mut self, flags: FrameFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Whether this frame targets `address`, directly or by broadcast.
    pub fn is_for(&self, address: DeviceAddress) -> bool {
        self.destination == address || self.destination == DeviceAddress::BROADCAST
    }

    /// First four payload bytes as a big endian token (join and link frames).
    pub fn token(&self) -> Option<u32> {
        match self.payload.get(0..4) {
            Some(raw) => Some(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]])),
            None => None,
        }
    }

    pub fn to_bytes(&self) -> heapless::Vec<u8, MAX_FRAME_LENGTH> {
        let mut bytes = heapless::Vec::new();
        // Header plus a bounded payload always fits.
        let _ = bytes.extend_from_slice(&[self.kind as u8, self.flags.bits(), self.seq, self.port]);
        let _ = bytes.extend_from_slice(&self.destination.bytes());
        let _ = bytes.extend_from_slice(&self.source.bytes());
        let _ = bytes.extend_from_slice(&self.payload);
        bytes
    }

    pub fn try_from_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < HEADER_LENGTH {
            return Err(FrameError::InvalidHeader {
                context: Some(format!("Radio frame too small! ({} bytes)", bytes.len())),
            });
        }
        if bytes.len() > MAX_FRAME_LENGTH {
            return Err(FrameError::TooLong {
                size: bytes.len() - HEADER_LENGTH,
            });
        }
        let kind = FrameType::try_from(bytes[0])?;
        let flags = FrameFlags::from_bits(bytes[1]).ok_or_else(|| FrameError::InvalidHeader {
            context: Some(format!("Unknown flags {:#010b}.", bytes[1])),
        })?;
        let mut destination = [0u8; 4];
        destination.copy_from_slice(&bytes[4..8]);
        let mut source = [0u8; 4];
        source.copy_from_slice(&bytes[8..12]);
        let mut frame = RadioFrame::new(
            kind,
            DeviceAddress::from_wire(destination),
            DeviceAddress::from_wire(source),
            bytes[3],
            bytes[2],
            &bytes[HEADER_LENGTH..],
        )?;
        frame.flags = flags;
        Ok(frame)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Invalid header. Context: {}", .context.as_deref().unwrap_or("<none>"))]
    InvalidHeader { context: Option<String> },

    #[error("Payload is too big to be transmitted (is: {}B, max: {}B)!", .size, MAX_APP_PAYLOAD)]
    TooLong { size: usize },
}
