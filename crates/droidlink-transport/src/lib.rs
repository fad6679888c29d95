//! droidlink-transport: sockets carried by the device tunnel
//!
//! Each session uses two TCP connections through the adb tunnel:
//!
//! ```text
//! device server ── video   ──► VideoSocket    (blocking reads, demuxer thread)
//! device server ◄── control ── ControlChannel (async writes, orchestration side)
//! ```
//!
//! The video socket starts with a 76-byte device metadata block, read with
//! [`VideoSocket::read_metadata`] before the socket is handed to the demuxer.

pub mod control;
pub mod video_socket;

pub use control::ControlChannel;
pub use video_socket::VideoSocket;

/// Both channels of an established session.
pub struct DeviceChannels {
    pub video: VideoSocket,
    pub control: ControlChannel,
}
