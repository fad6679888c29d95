//! droidlink-demuxer: video stream demultiplexing
//!
//! The device server prefixes every raw H.264 packet with a 12-byte header.
//! This crate reads header + payload pairs from the (blocking) video socket,
//! merges configuration packets into the following frame and hands complete
//! access units to a [`PacketSink`].
//!
//! # Pipeline
//! ```text
//! VideoSocket → Demuxer (header, config merge) → FrameParser → PacketSink → decoder
//! ```
//!
//! The demuxer owns the socket and runs on its own thread
//! ([`Demuxer::spawn`]); shutting the socket down from elsewhere makes it
//! observe end of stream and exit.

pub mod demuxer;
pub mod header;
pub mod parser;
pub mod sink;

pub use demuxer::{DemuxStats, Demuxer, DemuxerHandle};
pub use header::{
    PacketHeader, HEADER_LEN, PACKET_FLAG_CONFIG, PACKET_FLAG_KEY_FRAME, PACKET_PTS_MASK,
};
pub use parser::{contains_idr, CompleteFrameParser, FrameParser};
pub use sink::{ChannelSink, PacketSink};
