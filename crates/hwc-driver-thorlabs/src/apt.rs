//! Thorlabs APT binary protocol.
//!
//! Reference: Thorlabs APT Communications Protocol, Issue 37
//!
//! Every message starts with a 6-byte header:
//!
//! ```text
//!  0      1      2        3        4      5
//! +------+------+--------+--------+------+--------+
//! | message id  | param1 | param2 | dest | source |   short message
//! +------+------+--------+--------+------+--------+
//! | message id  | data length     | dest | source |   followed by data
//! +------+------+--------+--------+------+--------+
//! ```
//!
//! Multi-byte fields are little-endian. Bit 0x80 on the destination byte
//! marks a message that carries a data packet. The host is 0x01; a
//! single-channel USB controller answers as 0x50.
//!
//! Line settings: 115200 baud, 8N1, RTS/CTS handshake.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use hwc_core::error::TransportError;
use thiserror::Error;

/// Header length in bytes.
pub const HEADER_LEN: usize = 6;

/// Source/destination address of the host PC.
pub const HOST: u8 = 0x01;

/// Address of a generic single-channel USB controller.
pub const GENERIC_USB: u8 = 0x50;

/// Destination flag for messages followed by a data packet.
pub const DATA_FLAG: u8 = 0x80;

/// Longest data packet accepted while decoding. Nothing in the motor
/// command set comes close; anything longer means the stream lost framing.
pub const MAX_DATA_LEN: usize = 255;

/// Message identifiers.
pub mod id {
    pub const HW_DISCONNECT: u16 = 0x0002;
    pub const HW_REQ_INFO: u16 = 0x0005;
    pub const HW_GET_INFO: u16 = 0x0006;
    pub const HW_STOP_UPDATEMSGS: u16 = 0x0012;
    pub const MOT_MOVE_HOME: u16 = 0x0443;
    pub const MOT_MOVE_HOMED: u16 = 0x0444;
    pub const MOT_MOVE_RELATIVE: u16 = 0x0448;
    pub const MOT_MOVE_ABSOLUTE: u16 = 0x0453;
    pub const MOT_MOVE_COMPLETED: u16 = 0x0464;
    pub const MOT_MOVE_STOP: u16 = 0x0465;
    pub const MOT_MOVE_STOPPED: u16 = 0x0466;
    pub const MOT_REQ_DCSTATUSUPDATE: u16 = 0x0490;
    pub const MOT_GET_DCSTATUSUPDATE: u16 = 0x0491;
    pub const MOT_ACK_DCSTATUSUPDATE: u16 = 0x0492;
}

/// APT framing and payload errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AptError {
    #[error("APT message 0x{id:04X} data too short: expected {expected} bytes, got {got}")]
    Truncated { id: u16, expected: usize, got: usize },

    #[error("APT message 0x{id:04X} announces {len} data bytes, stream out of sync")]
    Oversized { id: u16, len: usize },

    #[error("Expected APT message 0x{expected:04X}, got 0x{got:04X}")]
    Unexpected { expected: u16, got: u16 },
}

impl From<AptError> for TransportError {
    fn from(e: AptError) -> Self {
        let command = match &e {
            AptError::Truncated { id, .. } | AptError::Oversized { id, .. } => {
                format!("APT 0x{:04X}", id)
            }
            AptError::Unexpected { expected, .. } => format!("APT 0x{:04X}", expected),
        };
        TransportError::malformed(command, "<binary>", e.to_string())
    }
}

// =============================================================================
// AptMessage
// =============================================================================

/// What follows the message id in the header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Two parameter bytes in the header itself.
    Params(u8, u8),
    /// A data packet after the header.
    Data(Bytes),
}

/// One APT message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AptMessage {
    pub id: u16,
    pub dest: u8,
    pub source: u8,
    pub payload: Payload,
}

impl AptMessage {
    /// Header-only message from the host to the controller.
    pub fn short(id: u16, param1: u8, param2: u8) -> Self {
        Self {
            id,
            dest: GENERIC_USB,
            source: HOST,
            payload: Payload::Params(param1, param2),
        }
    }

    /// Message with a data packet from the host to the controller.
    pub fn long(id: u16, data: impl Into<Bytes>) -> Self {
        Self {
            id,
            dest: GENERIC_USB,
            source: HOST,
            payload: Payload::Data(data.into()),
        }
    }

    /// Swap source and destination, as a controller's reply would have them.
    pub fn from_controller(mut self) -> Self {
        std::mem::swap(&mut self.dest, &mut self.source);
        self
    }

    pub fn params(&self) -> Option<(u8, u8)> {
        match self.payload {
            Payload::Params(p1, p2) => Some((p1, p2)),
            Payload::Data(_) => None,
        }
    }

    pub fn data(&self) -> Option<&[u8]> {
        match &self.payload {
            Payload::Data(data) => Some(data),
            Payload::Params(..) => None,
        }
    }

    fn data_at_least(&self, len: usize) -> Result<&[u8], AptError> {
        let data = self.data().unwrap_or_default();
        if data.len() < len {
            return Err(AptError::Truncated {
                id: self.id,
                expected: len,
                got: data.len(),
            });
        }
        Ok(data)
    }

    /// Append the wire form to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16_le(self.id);
        match &self.payload {
            Payload::Params(p1, p2) => {
                buf.put_u8(*p1);
                buf.put_u8(*p2);
                buf.put_u8(self.dest & !DATA_FLAG);
            }
            Payload::Data(data) => {
                buf.put_u16_le(data.len() as u16);
                buf.put_u8(self.dest | DATA_FLAG);
            }
        }
        buf.put_u8(self.source);
        if let Payload::Data(data) = &self.payload {
            buf.put_slice(data);
        }
    }

    /// Wire form as a standalone buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.data().map_or(0, <[u8]>::len));
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Take one complete message off the front of `buf`.
    ///
    /// Returns `Ok(None)` and leaves `buf` untouched until a whole message
    /// has arrived. A header announcing more than [`MAX_DATA_LEN`] bytes is
    /// dropped from `buf` before the error is returned, so decoding resumes
    /// at the next header.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Self>, AptError> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let id = u16::from_le_bytes([buf[0], buf[1]]);
        let dest = buf[4];

        if dest & DATA_FLAG == 0 {
            let header = buf.split_to(HEADER_LEN);
            return Ok(Some(Self {
                id,
                dest,
                source: header[5],
                payload: Payload::Params(header[2], header[3]),
            }));
        }

        let len = u16::from_le_bytes([buf[2], buf[3]]) as usize;
        if len > MAX_DATA_LEN {
            buf.advance(HEADER_LEN);
            return Err(AptError::Oversized { id, len });
        }
        if buf.len() < HEADER_LEN + len {
            return Ok(None);
        }
        let header = buf.split_to(HEADER_LEN);
        let data = buf.split_to(len).freeze();
        Ok(Some(Self {
            id,
            dest: dest & !DATA_FLAG,
            source: header[5],
            payload: Payload::Data(data),
        }))
    }

    /// Check the message id.
    pub fn expect(self, expected: u16) -> Result<Self, AptError> {
        if self.id == expected {
            Ok(self)
        } else {
            Err(AptError::Unexpected {
                expected,
                got: self.id,
            })
        }
    }
}

// =============================================================================
// Commands
// =============================================================================

pub fn req_info() -> AptMessage {
    AptMessage::short(id::HW_REQ_INFO, 0, 0)
}

pub fn disconnect() -> AptMessage {
    AptMessage::short(id::HW_DISCONNECT, 0, 0)
}

/// Stop the controller from pushing periodic status updates.
pub fn stop_update_messages() -> AptMessage {
    AptMessage::short(id::HW_STOP_UPDATEMSGS, 0, 0)
}

pub fn move_home(channel: u16) -> AptMessage {
    AptMessage::short(id::MOT_MOVE_HOME, channel as u8, 0)
}

/// Relative move by `counts` encoder counts.
pub fn move_relative(channel: u16, counts: i32) -> AptMessage {
    let mut data = BytesMut::with_capacity(6);
    data.put_u16_le(channel);
    data.put_i32_le(counts);
    AptMessage::long(id::MOT_MOVE_RELATIVE, data)
}

/// Absolute move to `counts` encoder counts.
pub fn move_absolute(channel: u16, counts: i32) -> AptMessage {
    let mut data = BytesMut::with_capacity(6);
    data.put_u16_le(channel);
    data.put_i32_le(counts);
    AptMessage::long(id::MOT_MOVE_ABSOLUTE, data)
}

/// Stop motion, either immediately or with the deceleration profile.
pub fn move_stop(channel: u16, immediate: bool) -> AptMessage {
    AptMessage::short(id::MOT_MOVE_STOP, channel as u8, if immediate { 1 } else { 2 })
}

pub fn req_status(channel: u16) -> AptMessage {
    AptMessage::short(id::MOT_REQ_DCSTATUSUPDATE, channel as u8, 0)
}

/// Server-alive acknowledgement for status updates.
pub fn ack_status() -> AptMessage {
    AptMessage::short(id::MOT_ACK_DCSTATUSUPDATE, 0, 0)
}

// =============================================================================
// Replies
// =============================================================================

/// Status word of a DC servo controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusBits(pub u32);

impl StatusBits {
    pub const MOVING_FORWARD: u32 = 0x10;
    pub const MOVING_REVERSE: u32 = 0x20;
    pub const JOGGING_FORWARD: u32 = 0x40;
    pub const JOGGING_REVERSE: u32 = 0x80;
    pub const HOMING: u32 = 0x200;
    pub const HOMED: u32 = 0x400;

    const MOTION_MASK: u32 = Self::MOVING_FORWARD
        | Self::MOVING_REVERSE
        | Self::JOGGING_FORWARD
        | Self::JOGGING_REVERSE
        | Self::HOMING;

    pub fn is_moving(self) -> bool {
        self.0 & Self::MOTION_MASK != 0
    }

    pub fn is_homing(self) -> bool {
        self.0 & Self::HOMING != 0
    }

    pub fn is_homed(self) -> bool {
        self.0 & Self::HOMED != 0
    }
}

/// Decoded `MOT_GET_DCSTATUSUPDATE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DcStatus {
    pub channel: u16,
    /// Encoder counts
    pub position: i32,
    pub velocity: u16,
    pub status: StatusBits,
}

impl DcStatus {
    pub const DATA_LEN: usize = 14;

    pub fn decode(message: &AptMessage) -> Result<Self, AptError> {
        let mut data = message.data_at_least(Self::DATA_LEN)?;
        let channel = data.get_u16_le();
        let position = data.get_i32_le();
        let velocity = data.get_u16_le();
        let _reserved = data.get_u16_le();
        let status = StatusBits(data.get_u32_le());
        Ok(Self {
            channel,
            position,
            velocity,
            status,
        })
    }

    pub fn encode(&self) -> AptMessage {
        let mut data = BytesMut::with_capacity(Self::DATA_LEN);
        data.put_u16_le(self.channel);
        data.put_i32_le(self.position);
        data.put_u16_le(self.velocity);
        data.put_u16_le(0);
        data.put_u32_le(self.status.0);
        AptMessage::long(id::MOT_GET_DCSTATUSUPDATE, data).from_controller()
    }
}

/// Decoded `HW_GET_INFO`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareInfo {
    pub serial_number: u32,
    pub model: String,
    pub hardware_type: u16,
    /// (major, interim, minor)
    pub firmware: (u8, u8, u8),
    pub channels: u16,
}

impl HardwareInfo {
    pub const DATA_LEN: usize = 84;

    pub fn decode(message: &AptMessage) -> Result<Self, AptError> {
        let data = message.data_at_least(Self::DATA_LEN)?;
        let mut head = &data[..18];
        let serial_number = head.get_u32_le();
        let model_raw = &data[4..12];
        let model = String::from_utf8_lossy(model_raw)
            .trim_end_matches('\0')
            .trim()
            .to_string();
        head.advance(8);
        let hardware_type = head.get_u16_le();
        let (minor, interim, major) = (data[14], data[15], data[16]);
        let channels = u16::from_le_bytes([data[82], data[83]]);
        Ok(Self {
            serial_number,
            model,
            hardware_type,
            firmware: (major, interim, minor),
            channels,
        })
    }

    pub fn encode(&self) -> AptMessage {
        let mut data = BytesMut::with_capacity(Self::DATA_LEN);
        data.put_u32_le(self.serial_number);
        let mut model = [0u8; 8];
        for (slot, b) in model.iter_mut().zip(self.model.bytes()) {
            *slot = b;
        }
        data.put_slice(&model);
        data.put_u16_le(self.hardware_type);
        let (major, interim, minor) = self.firmware;
        data.put_slice(&[minor, interim, major, 0]);
        data.put_bytes(0, 78 - data.len());
        data.put_u16_le(1);
        data.put_u16_le(0);
        data.put_u16_le(self.channels);
        AptMessage::long(id::HW_GET_INFO, data).from_controller()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_message_wire_form() {
        assert_eq!(
            move_home(1).to_bytes().as_ref(),
            &[0x43, 0x04, 0x01, 0x00, 0x50, 0x01]
        );
        assert_eq!(
            move_stop(1, true).to_bytes().as_ref(),
            &[0x65, 0x04, 0x01, 0x01, 0x50, 0x01]
        );
        assert_eq!(move_stop(1, false).params(), Some((1, 2)));
    }

    #[test]
    fn long_message_wire_form() {
        // channel 1, -2000 counts
        assert_eq!(
            move_relative(1, -2000).to_bytes().as_ref(),
            &[0x48, 0x04, 0x06, 0x00, 0xD0, 0x01, 0x01, 0x00, 0x30, 0xF8, 0xFF, 0xFF]
        );
        let abs = move_absolute(1, 0x0102_0304).to_bytes();
        assert_eq!(&abs[..6], &[0x53, 0x04, 0x06, 0x00, 0xD0, 0x01]);
        assert_eq!(&abs[6..], &[0x01, 0x00, 0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn decode_waits_for_whole_message() {
        let status = DcStatus {
            channel: 1,
            position: 123_456,
            velocity: 7,
            status: StatusBits(StatusBits::MOVING_FORWARD | StatusBits::HOMED),
        }
        .encode()
        .to_bytes();
        assert_eq!(status.len(), HEADER_LEN + DcStatus::DATA_LEN);

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&status[..10]);
        assert_eq!(AptMessage::decode(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 10);

        buf.extend_from_slice(&status[10..]);
        buf.extend_from_slice(&[0x64, 0x04, 0x01, 0x00, 0x01, 0x50]);
        let msg = AptMessage::decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.id, id::MOT_GET_DCSTATUSUPDATE);
        assert_eq!(msg.dest, HOST);
        assert_eq!(msg.source, GENERIC_USB);

        let decoded = DcStatus::decode(&msg).unwrap();
        assert_eq!(decoded.position, 123_456);
        assert!(decoded.status.is_moving());
        assert!(decoded.status.is_homed());
        assert!(!decoded.status.is_homing());

        let completed = AptMessage::decode(&mut buf).unwrap().unwrap();
        assert_eq!(completed.id, id::MOT_MOVE_COMPLETED);
        assert_eq!(completed.params(), Some((1, 0)));
        assert!(buf.is_empty());
    }

    #[test]
    fn motion_bits() {
        for bit in [0x10, 0x20, 0x40, 0x80, 0x200] {
            assert!(StatusBits(bit).is_moving(), "0x{bit:x}");
        }
        assert!(!StatusBits(StatusBits::HOMED).is_moving());
        assert!(!StatusBits(0x01 | 0x100).is_moving());
        assert!(StatusBits(0x200).is_homing());
    }

    #[test]
    fn oversized_length_is_error() {
        let mut buf = BytesMut::from(&[0x91, 0x04, 0x00, 0x10, 0x81, 0x50][..]);
        assert_eq!(
            AptMessage::decode(&mut buf),
            Err(AptError::Oversized {
                id: 0x0491,
                len: 0x1000
            })
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn decoding_resumes_after_oversized_header() {
        let status = DcStatus {
            channel: 1,
            position: 34_304,
            velocity: 0,
            status: StatusBits(StatusBits::HOMED),
        };
        let mut buf = BytesMut::from(&[0x91, 0x04, 0x00, 0x10, 0x81, 0x50][..]);
        buf.extend_from_slice(&status.encode().to_bytes());

        assert!(matches!(
            AptMessage::decode(&mut buf),
            Err(AptError::Oversized { .. })
        ));
        let message = AptMessage::decode(&mut buf).unwrap().unwrap();
        assert_eq!(DcStatus::decode(&message).unwrap(), status);
        assert!(buf.is_empty());
    }

    #[test]
    fn truncated_status_is_error() {
        let msg = AptMessage::long(id::MOT_GET_DCSTATUSUPDATE, vec![0u8; 6]);
        assert!(matches!(
            DcStatus::decode(&msg),
            Err(AptError::Truncated { expected: 14, got: 6, .. })
        ));
        let short = AptMessage::short(id::MOT_GET_DCSTATUSUPDATE, 0, 0);
        assert!(DcStatus::decode(&short).is_err());
    }

    #[test]
    fn hardware_info_decodes() {
        let info = HardwareInfo {
            serial_number: 27_000_123,
            model: "KDC101".into(),
            hardware_type: 16,
            firmware: (2, 0, 7),
            channels: 1,
        };
        let msg = info.encode();
        assert_eq!(msg.data().unwrap().len(), HardwareInfo::DATA_LEN);
        assert_eq!(HardwareInfo::decode(&msg).unwrap(), info);
    }

    #[test]
    fn unexpected_id_converts_to_malformed() {
        let err = move_home(1).expect(id::MOT_MOVE_HOMED).unwrap_err();
        let transport: TransportError = err.into();
        assert!(matches!(transport, TransportError::MalformedResponse { .. }));
    }
}
