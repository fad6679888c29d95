use droidlink_core::{AccessUnit, DemuxError};
use tokio::sync::mpsc;
use tracing::debug;

/// Consumer of demuxed access units. Called from the demuxer thread.
pub trait PacketSink: Send {
    /// A codec configuration packet was read. The same bytes are later
    /// prepended to the next media unit.
    fn on_config(&mut self, unit: AccessUnit) -> Result<(), DemuxError>;

    fn on_frame(&mut self, unit: AccessUnit) -> Result<(), DemuxError>;

    /// Raised exactly once, after the video socket has been closed.
    fn on_stream_end(&mut self, _error: Option<&DemuxError>) {}
}

// ── ChannelSink ───────────────────────────────────────────────────────────────

/// Forwards every unit to a bounded tokio channel.
///
/// The demuxer thread blocks while the channel is full. The receiver sees
/// `None` once the demuxer exits and drops the sink.
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::Sender<AccessUnit>,
    forward_config: bool,
}

impl ChannelSink {
    /// Forward media units only; config bytes still reach the receiver merged
    /// into the next media unit.
    pub fn new(tx: mpsc::Sender<AccessUnit>) -> Self {
        Self { tx, forward_config: false }
    }

    /// Forward standalone config units as well.
    pub fn with_config(tx: mpsc::Sender<AccessUnit>) -> Self {
        Self { tx, forward_config: true }
    }

    fn send(&self, unit: AccessUnit) -> Result<(), DemuxError> {
        self.tx
            .blocking_send(unit)
            .map_err(|_| DemuxError::Sink { reason: "access unit receiver dropped".into() })
    }
}

impl PacketSink for ChannelSink {
    fn on_config(&mut self, unit: AccessUnit) -> Result<(), DemuxError> {
        if self.forward_config {
            self.send(unit)
        } else {
            Ok(())
        }
    }

    fn on_frame(&mut self, unit: AccessUnit) -> Result<(), DemuxError> {
        self.send(unit)
    }

    fn on_stream_end(&mut self, error: Option<&DemuxError>) {
        match error {
            Some(e) => debug!("channel sink: stream ended with error: {}", e),
            None => debug!("channel sink: stream ended"),
        }
    }
}
