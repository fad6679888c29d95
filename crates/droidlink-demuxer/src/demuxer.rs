use std::io::{self, Read};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use droidlink_core::{AccessUnit, DemuxError, FrameSize, ProtocolError};
use tracing::{debug, info, warn};

use crate::header::{PacketHeader, HEADER_LEN};
use crate::parser::{CompleteFrameParser, FrameParser};
use crate::sink::PacketSink;

const STATS_INTERVAL: u64 = 300;

// ── DemuxStats ────────────────────────────────────────────────────────────────

/// Counters for one demuxed stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DemuxStats {
    pub packets: u64,
    pub config_packets: u64,
    pub frames: u64,
    pub bytes: u64,
}

// ── Demuxer ───────────────────────────────────────────────────────────────────

/// Splits the video byte stream into access units.
///
/// Owns the transport for the whole session: it is dropped (closing the
/// socket) before [`PacketSink::on_stream_end`] is raised.
pub struct Demuxer<R> {
    reader: R,
    parser: Box<dyn FrameParser>,
    sink: Box<dyn PacketSink>,
    /// Config bytes waiting for the next media packet. Replaced as a whole on
    /// every merge and emptied after every media packet.
    pending: Option<Bytes>,
    stats: DemuxStats,
    frames_emitted: Arc<AtomicU64>,
    scratch: Vec<AccessUnit>,
    /// Runs right after the reader is dropped, for transports with other handles.
    on_close: Option<Box<dyn FnOnce() + Send>>,
}

impl<R: Read> Demuxer<R> {
    pub fn new(reader: R, sink: impl PacketSink + 'static) -> Self {
        Self {
            reader,
            parser: Box::new(CompleteFrameParser::new()),
            sink: Box::new(sink),
            pending: None,
            stats: DemuxStats::default(),
            frames_emitted: Arc::new(AtomicU64::new(0)),
            scratch: Vec::with_capacity(1),
            on_close: None,
        }
    }

    pub fn with_parser(mut self, parser: impl FrameParser + 'static) -> Self {
        self.parser = Box::new(parser);
        self
    }

    /// Closes the transport for good when the stream ends, e.g. a socket
    /// shutdown when a clone of the socket lives elsewhere.
    pub fn with_close_hook(mut self, on_close: impl FnOnce() + Send + 'static) -> Self {
        self.on_close = Some(Box::new(on_close));
        self
    }

    /// Frame size announced in the device metadata.
    pub fn set_frame_size(&mut self, size: FrameSize) {
        self.parser.set_frame_size(size);
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn stats(&self) -> DemuxStats {
        self.stats
    }

    /// Read and dispatch packets until the stream ends.
    ///
    /// A clean end of stream (short header read) returns `Ok`. The transport
    /// is closed and the sink notified on every path.
    pub fn run(mut self) -> Result<DemuxStats, DemuxError> {
        let result = loop {
            match self.step() {
                Ok(true) => continue,
                Ok(false) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        self.pending = None;

        let Self { reader, mut sink, stats, on_close, .. } = self;
        drop(reader);
        if let Some(on_close) = on_close {
            on_close();
        }

        match &result {
            Ok(()) => debug!(
                "End of frames ({} packets, {} frames, {} bytes)",
                stats.packets, stats.frames, stats.bytes
            ),
            Err(e) => warn!("Demuxer stopped: {}", e),
        }
        sink.on_stream_end(result.as_ref().err());
        result.map(|()| stats)
    }

    /// Process one packet. `Ok(false)` means the stream ended cleanly.
    pub fn step(&mut self) -> Result<bool, DemuxError> {
        let Some((header, payload)) = self.recv_packet()? else {
            return Ok(false);
        };
        self.stats.packets += 1;
        self.stats.bytes += payload.len() as u64;

        let result = self.push_packet(header, payload);
        if result.is_err() {
            self.pending = None;
        }
        result.map(|()| true)
    }

    fn recv_packet(&mut self) -> Result<Option<(PacketHeader, Bytes)>, DemuxError> {
        let mut raw = [0u8; HEADER_LEN];
        if read_full(&mut self.reader, &mut raw)? < HEADER_LEN {
            return Ok(None);
        }
        let header = PacketHeader::decode(&raw)?;

        let len = header.payload_len();
        let mut payload = Vec::new();
        payload
            .try_reserve_exact(len)
            .map_err(|_| DemuxError::AllocationFailed { len })?;
        payload.resize(len, 0);

        let got = read_full(&mut self.reader, &mut payload)?;
        if got < len {
            return Err(ProtocolError::TruncatedPacket { expected: len, got }.into());
        }
        Ok(Some((header, Bytes::from(payload))))
    }

    fn push_packet(&mut self, header: PacketHeader, payload: Bytes) -> Result<(), DemuxError> {
        let is_config = header.is_config();

        let unit_data = if self.pending.is_some() || is_config {
            let merged = merge(self.pending.take(), &payload)?;
            if is_config {
                self.pending = Some(merged);
                payload
            } else {
                merged
            }
        } else {
            payload
        };

        if is_config {
            self.stats.config_packets += 1;
            return self.sink.on_config(AccessUnit::Config { data: unit_data });
        }

        let pts = header.pts().unwrap_or_default();
        self.scratch.clear();
        self.parser.parse(unit_data, pts, header.is_key_frame(), &mut self.scratch)?;
        for unit in self.scratch.drain(..) {
            self.sink.on_frame(unit)?;
            self.stats.frames += 1;
            let n = self.frames_emitted.fetch_add(1, Ordering::Relaxed) + 1;
            if n == 1 {
                info!("First frame demuxed");
            }
            if n % STATS_INTERVAL == 0 {
                info!(
                    "Demuxed {} frames ({} packets, {} config, {} bytes)",
                    n, self.stats.packets, self.stats.config_packets, self.stats.bytes
                );
            }
        }
        Ok(())
    }
}

impl<R: Read + Send + 'static> Demuxer<R> {
    /// Run on a dedicated named thread.
    pub fn spawn(self, name: impl Into<String>) -> io::Result<DemuxerHandle> {
        let frames = Arc::clone(&self.frames_emitted);
        let handle = thread::Builder::new().name(name.into()).spawn(move || self.run())?;
        Ok(DemuxerHandle { handle, frames })
    }
}

/// Fresh buffer holding `pending ‖ payload`.
fn merge(pending: Option<Bytes>, payload: &[u8]) -> Result<Bytes, DemuxError> {
    let head = pending.as_deref().unwrap_or_default();
    let len = head.len() + payload.len();
    let mut merged = Vec::new();
    merged
        .try_reserve_exact(len)
        .map_err(|_| DemuxError::AllocationFailed { len })?;
    merged.extend_from_slice(head);
    merged.extend_from_slice(payload);
    Ok(Bytes::from(merged))
}

/// Fill `buf`, returning fewer bytes only at end of stream.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

// ── DemuxerHandle ─────────────────────────────────────────────────────────────

pub struct DemuxerHandle {
    handle: JoinHandle<Result<DemuxStats, DemuxError>>,
    frames: Arc<AtomicU64>,
}

impl DemuxerHandle {
    /// Frames handed to the sink so far.
    pub fn frames_emitted(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the thread. Close the video socket first or this blocks for
    /// the rest of the stream.
    pub fn join(self) -> Result<DemuxStats, DemuxError> {
        self.handle
            .join()
            .unwrap_or_else(|_| Err(io::Error::other("demuxer thread panicked").into()))
    }
}
