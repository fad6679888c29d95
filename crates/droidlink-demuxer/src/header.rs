use droidlink_core::buffer::{read_u32_be, read_u64_be};
use droidlink_core::ProtocolError;

/// Size of the header the server writes before every raw packet.
pub const HEADER_LEN: usize = 12;

/// Bit 63: the payload carries codec configuration, not a frame.
pub const PACKET_FLAG_CONFIG: u64 = 1 << 63;
/// Bit 62: the payload is a key frame.
pub const PACKET_FLAG_KEY_FRAME: u64 = 1 << 62;
/// Low 62 bits: presentation timestamp.
pub const PACKET_PTS_MASK: u64 = PACKET_FLAG_KEY_FRAME - 1;

/// Decoded packet header.
///
/// ```text
///  byte 0   byte 1           byte 7    byte 8..12
/// CK...... ........ ... ........  |  payload length u32 BE
/// ^^<------------ PTS ---------->
/// | `- key frame
///  `-- config packet
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub pts_flags: u64,
    pub len: u32,
}

impl PacketHeader {
    pub fn decode(buf: &[u8; HEADER_LEN]) -> Result<Self, ProtocolError> {
        let pts_flags = read_u64_be(buf, 0).unwrap_or_default();
        let len = read_u32_be(buf, 8).unwrap_or_default();
        if len == 0 {
            return Err(ProtocolError::ZeroLengthPacket);
        }
        Ok(Self { pts_flags, len })
    }

    pub fn is_config(&self) -> bool {
        self.pts_flags & PACKET_FLAG_CONFIG != 0
    }

    pub fn is_key_frame(&self) -> bool {
        self.pts_flags & PACKET_FLAG_KEY_FRAME != 0
    }

    /// Timestamp of a media packet; config packets carry none.
    pub fn pts(&self) -> Option<u64> {
        if self.is_config() {
            None
        } else {
            Some(self.pts_flags & PACKET_PTS_MASK)
        }
    }

    pub fn payload_len(&self) -> usize {
        self.len as usize
    }
}
