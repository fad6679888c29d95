use bytes::Bytes;
use droidlink_core::{AccessUnit, DemuxError, FrameSize};
use tracing::debug;

/// H.264 NAL unit type of an IDR slice.
const NAL_TYPE_IDR: u8 = 5;

// ── FrameParser ───────────────────────────────────────────────────────────────

/// Elementary-stream framing between the demuxer and a decoder.
///
/// Receives one (possibly config-merged) media payload at a time and pushes
/// the frame-aligned units it yields into `out`.
pub trait FrameParser: Send {
    /// Frame size reported by the device, before the first unit arrives.
    fn set_frame_size(&mut self, _size: FrameSize) {}

    fn parse(
        &mut self,
        data: Bytes,
        pts: u64,
        key_frame: bool,
        out: &mut Vec<AccessUnit>,
    ) -> Result<(), DemuxError>;
}

// ── CompleteFrameParser ───────────────────────────────────────────────────────

/// Parser for a server that always sends whole frames: one payload in, one
/// unit out.
///
/// Payloads are scanned for an IDR slice so that key frames are flagged even
/// when the header did not mark them.
#[derive(Debug, Default)]
pub struct CompleteFrameParser {
    frame_size: FrameSize,
}

impl CompleteFrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frame_size(&self) -> FrameSize {
        self.frame_size
    }
}

impl FrameParser for CompleteFrameParser {
    fn set_frame_size(&mut self, size: FrameSize) {
        debug!("parser frame size {}", size);
        self.frame_size = size;
    }

    fn parse(
        &mut self,
        data: Bytes,
        pts: u64,
        key_frame: bool,
        out: &mut Vec<AccessUnit>,
    ) -> Result<(), DemuxError> {
        let key_frame = key_frame || contains_idr(&data);
        out.push(AccessUnit::Media { data, pts, key_frame });
        Ok(())
    }
}

/// Whether an Annex B byte stream holds an IDR NAL unit.
pub fn contains_idr(data: &[u8]) -> bool {
    nal_unit_types(data).any(|t| t == NAL_TYPE_IDR)
}

/// Types of the NAL units following each `00 00 01` start code.
fn nal_unit_types(data: &[u8]) -> impl Iterator<Item = u8> + '_ {
    data.windows(4)
        .filter(|w| w[0] == 0 && w[1] == 0 && w[2] == 1)
        .map(|w| w[3] & 0x1F)
}
