use droidlink_core::AccessUnit;
use tracing::{debug, info};

/// Log a summary every this many frames.
pub const REPORT_EVERY: u64 = 300;

/// Stands in for a decoder: counts what the demuxer hands over.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UnitStats {
    pub frames: u64,
    pub key_frames: u64,
    pub config_units: u64,
    pub bytes: u64,
    pub last_pts: Option<u64>,
}

impl UnitStats {
    /// Count one unit. Returns `true` when a periodic report is due.
    pub fn record(&mut self, unit: &AccessUnit) -> bool {
        self.bytes += unit.data().len() as u64;
        match unit {
            AccessUnit::Config { .. } => {
                self.config_units += 1;
                false
            }
            AccessUnit::Media { pts, key_frame, .. } => {
                self.frames += 1;
                if *key_frame {
                    self.key_frames += 1;
                }
                self.last_pts = Some(*pts);
                if self.frames <= 5 {
                    debug!(
                        "Frame #{}: {} bytes keyframe={}",
                        self.frames,
                        unit.data().len(),
                        key_frame
                    );
                }
                self.frames % REPORT_EVERY == 0
            }
        }
    }

    pub fn log(&self) {
        info!(
            "Stats: frames={} keyframes={} config={} bytes={} last_pts={:?}",
            self.frames, self.key_frames, self.config_units, self.bytes, self.last_pts
        );
    }
}
