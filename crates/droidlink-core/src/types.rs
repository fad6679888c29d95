use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::buffer::read_u32_be;
use crate::errors::ProtocolError;

// MARK: - FrameSize

/// Tamanho do frame de vídeo enviado pelo device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl std::fmt::Display for FrameSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}×{}", self.width, self.height)
    }
}

// MARK: - Rect

/// A point on the device screen together with the frame size it was
/// computed against. The server rescales the point if the frame size it
/// currently streams differs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u16,
    pub height: u16,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: u16, height: u16) -> Self {
        Self { x, y, width, height }
    }
}

// MARK: - DeviceMetadata

/// Size of the fixed, NUL-padded device name field.
pub const DEVICE_NAME_FIELD_LENGTH: usize = 64;

/// Full metadata block: name + codec id + width + height.
pub const DEVICE_METADATA_LENGTH: usize = DEVICE_NAME_FIELD_LENGTH + 12;

/// Device information sent once by the server at the head of the video
/// channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceMetadata {
    pub name: String,
    pub frame_size: FrameSize,
}

impl DeviceMetadata {
    /// Decode the metadata block.
    ///
    /// ```text
    /// [0..64]   device name, UTF-8, NUL-padded
    /// [64..68]  codec id (ignored)
    /// [68..72]  initial width  u32 BE
    /// [72..76]  initial height u32 BE
    /// ```
    ///
    /// The name is cut at the first NUL; byte 63 is always treated as a
    /// terminator, so a name that fills the whole field keeps 63 bytes.
    pub fn parse(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < DEVICE_METADATA_LENGTH {
            return Err(ProtocolError::TruncatedMetadata {
                expected: DEVICE_METADATA_LENGTH,
                got: buf.len(),
            });
        }

        let field = &buf[..DEVICE_NAME_FIELD_LENGTH - 1];
        let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
        let name = String::from_utf8_lossy(&field[..end]).into_owned();

        let truncated = || ProtocolError::TruncatedMetadata {
            expected: DEVICE_METADATA_LENGTH,
            got: buf.len(),
        };
        let width = read_u32_be(buf, DEVICE_NAME_FIELD_LENGTH + 4).ok_or_else(truncated)?;
        let height = read_u32_be(buf, DEVICE_NAME_FIELD_LENGTH + 8).ok_or_else(truncated)?;

        Ok(Self { name, frame_size: FrameSize::new(width, height) })
    }
}

// MARK: - AccessUnit

/// One decodable unit handed from the demuxer to a decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessUnit {
    /// Codec configuration (SPS/PPS), no timestamp.
    Config { data: Bytes },
    /// Frame data, possibly prefixed by merged configuration bytes.
    Media { data: Bytes, pts: u64, key_frame: bool },
}

impl AccessUnit {
    pub fn data(&self) -> &Bytes {
        match self {
            Self::Config { data } | Self::Media { data, .. } => data,
        }
    }

    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. })
    }

    pub fn pts(&self) -> Option<u64> {
        match self {
            Self::Config { .. } => None,
            Self::Media { pts, .. } => Some(*pts),
        }
    }

    pub fn is_key_frame(&self) -> bool {
        matches!(self, Self::Media { key_frame: true, .. })
    }
}

// MARK: - ConnectionState

/// Connection establishment phases, in the order the orchestrator walks them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    #[default]
    Idle,
    Pushing,
    EnablingReverseTunnel,
    EnablingForwardTunnel,
    LaunchingServer,
    Running,
    Stopped,
}

impl ConnectionState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Pushing => "pushing server",
            Self::EnablingReverseTunnel => "enabling reverse tunnel",
            Self::EnablingForwardTunnel => "enabling forward tunnel",
            Self::LaunchingServer => "launching server",
            Self::Running => "running",
            Self::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// MARK: - TunnelConfig

/// Prefix of the device-side abstract socket name.
pub const SOCKET_NAME_PREFIX: &str = "scrcpy";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelDirection {
    /// Device connects back to a local listening port.
    Reverse,
    /// Local side connects to a port forwarded to the device socket.
    Forward,
}

/// Port tunnel parameters for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelConfig {
    pub serial: String,
    pub scid: u32,
    pub local_port: u16,
    pub prefer_reverse: bool,
    forward: bool,
}

impl TunnelConfig {
    pub fn new(
        serial: impl Into<String>,
        scid: u32,
        local_port: u16,
        prefer_reverse: bool,
    ) -> Self {
        Self {
            serial: serial.into(),
            scid,
            local_port,
            prefer_reverse,
            forward: !prefer_reverse,
        }
    }

    /// Device-side abstract socket name, e.g. `scrcpy_0000abcd`.
    pub fn socket_name(&self) -> String {
        format!("{}_{:08x}", SOCKET_NAME_PREFIX, self.scid)
    }

    pub fn is_forward(&self) -> bool {
        self.forward
    }

    /// Switch to forward mode after the reverse tunnel could not be set up.
    pub fn use_forward(&mut self) {
        self.forward = true;
    }

    /// Go back to the configured preference (used when a session restarts).
    pub fn reset(&mut self) {
        self.forward = !self.prefer_reverse;
    }

    pub fn direction(&self) -> TunnelDirection {
        if self.forward {
            TunnelDirection::Forward
        } else {
            TunnelDirection::Reverse
        }
    }
}
