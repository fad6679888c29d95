use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::ConfigError;
use crate::types::TunnelConfig;

/// Environment override for the adb executable.
pub const ADB_PATH_ENV: &str = "DROIDLINK_ADB_PATH";
/// Environment override for the server binary pushed to the device.
pub const SERVER_PATH_ENV: &str = "DROIDLINK_SERVER_PATH";

pub const DEFAULT_SERVER_REMOTE_PATH: &str = "/data/local/tmp/scrcpy-server.jar";
pub const DEFAULT_SERVER_VERSION: &str = "3.1";
pub const DEFAULT_LOCAL_PORT: u16 = 27183;

const SERVER_MAIN_CLASS: &str = "com.genymobile.scrcpy.Server";

// MARK: - CaptureOrientationLock

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureOrientationLock {
    /// Capture follows the device rotation, starting at `capture_orientation`.
    #[default]
    Unlocked,
    /// Capture is locked to `capture_orientation`.
    LockedValue,
    /// Capture is locked to whatever orientation the device has at start.
    LockedInitial,
}

// MARK: - ServerParams

/// Parâmetros de sessão enviados ao servidor no device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerParams {
    /// Device serial passed to `adb -s`; empty means "the only device".
    pub serial: String,
    #[serde(alias = "serverLocalPath")]
    pub server_local_path: PathBuf,
    #[serde(alias = "serverRemotePath")]
    pub server_remote_path: String,
    #[serde(alias = "serverVersion")]
    pub server_version: String,
    #[serde(alias = "bitRate")]
    pub bit_rate: u32,
    /// Longest frame edge, 0 keeps the device resolution.
    #[serde(alias = "maxSize")]
    pub max_size: u16,
    #[serde(alias = "maxFps")]
    pub max_fps: u32,
    #[serde(alias = "captureOrientation")]
    pub capture_orientation: u16,
    #[serde(alias = "captureOrientationLock")]
    pub capture_orientation_lock: CaptureOrientationLock,
    /// `width:height:x:y`, empty for no crop.
    pub crop: String,
    pub control: bool,
    #[serde(alias = "stayAwake")]
    pub stay_awake: bool,
    #[serde(alias = "codecOptions")]
    pub codec_options: String,
    #[serde(alias = "codecName")]
    pub codec_name: String,
    #[serde(alias = "logLevel")]
    pub log_level: String,
    /// Session correlation id; generated when absent.
    pub scid: Option<u32>,
    #[serde(alias = "localPort")]
    pub local_port: u16,
    #[serde(alias = "useReverse")]
    pub use_reverse: bool,
}

impl Default for ServerParams {
    fn default() -> Self {
        Self {
            serial: String::new(),
            server_local_path: PathBuf::from("scrcpy-server"),
            server_remote_path: DEFAULT_SERVER_REMOTE_PATH.into(),
            server_version: DEFAULT_SERVER_VERSION.into(),
            bit_rate: 8_000_000,
            max_size: 720,
            max_fps: 0,
            capture_orientation: 0,
            capture_orientation_lock: CaptureOrientationLock::Unlocked,
            crop: String::new(),
            control: true,
            stay_awake: false,
            codec_options: String::new(),
            codec_name: String::new(),
            log_level: String::new(),
            scid: None,
            local_port: DEFAULT_LOCAL_PORT,
            use_reverse: true,
        }
    }
}

impl ServerParams {
    /// Read parameters from a JSON file. Missing fields keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let params: Self = serde_json::from_str(&text)?;
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.local_port == 0 {
            return Err(ConfigError::Invalid { reason: "local_port must be non-zero".into() });
        }
        if self.bit_rate == 0 {
            return Err(ConfigError::Invalid { reason: "bit_rate must be non-zero".into() });
        }
        if !matches!(self.capture_orientation, 0 | 90 | 180 | 270) {
            return Err(ConfigError::Invalid {
                reason: format!(
                    "capture_orientation {} is not 0/90/180/270",
                    self.capture_orientation
                ),
            });
        }
        if !self.crop.is_empty() && self.crop.split(':').count() != 4 {
            return Err(ConfigError::Invalid {
                reason: format!("crop '{}' is not width:height:x:y", self.crop),
            });
        }
        Ok(())
    }

    /// Fill in a random session correlation id if none was configured.
    pub fn ensure_scid(&mut self) -> u32 {
        *self
            .scid
            .get_or_insert_with(|| (uuid::Uuid::new_v4().as_u128() as u32) & 0x7FFF_FFFF)
    }

    /// Tunnel parameters for this session. Call [`ensure_scid`](Self::ensure_scid) first.
    pub fn tunnel(&self) -> TunnelConfig {
        TunnelConfig::new(
            self.serial.clone(),
            self.scid.unwrap_or_default(),
            self.local_port,
            self.use_reverse,
        )
    }

    /// Arguments for `adb shell` that launch the server on the device.
    ///
    /// Options at their server-side default are omitted; long command lines
    /// crash the shell on some vendor builds.
    pub fn server_args(&self, tunnel_forward: bool) -> Vec<String> {
        let mut args = vec![
            "shell".to_string(),
            format!("CLASSPATH={}", self.server_remote_path),
            "app_process".to_string(),
            "/".to_string(),
            SERVER_MAIN_CLASS.to_string(),
            self.server_version.clone(),
            format!("video_bit_rate={}", self.bit_rate),
        ];
        if !self.log_level.is_empty() {
            args.push(format!("log_level={}", self.log_level));
        }
        if self.max_size > 0 {
            args.push(format!("max_size={}", self.max_size));
        }
        if self.max_fps > 0 {
            args.push(format!("max_fps={}", self.max_fps));
        }
        args.push(match self.capture_orientation_lock {
            CaptureOrientationLock::LockedValue => {
                format!("capture_orientation=@{}", self.capture_orientation)
            }
            CaptureOrientationLock::LockedInitial => "capture_orientation=@".to_string(),
            CaptureOrientationLock::Unlocked => {
                format!("capture_orientation={}", self.capture_orientation)
            }
        });
        if tunnel_forward {
            args.push("tunnel_forward=true".into());
        }
        if !self.crop.is_empty() {
            args.push(format!("crop={}", self.crop));
        }
        if !self.control {
            args.push("control=false".into());
        }
        if self.stay_awake {
            args.push("stay_awake=true".into());
        }
        if !self.codec_options.is_empty() {
            args.push(format!("codec_options={}", self.codec_options));
        }
        if !self.codec_name.is_empty() {
            args.push(format!("encoder_name={}", self.codec_name));
        }
        args.push("audio=false".into());
        if let Some(scid) = self.scid {
            args.push(format!("scid={:08x}", scid));
        }
        args
    }
}

// MARK: - ReverseFallback

/// When a failed `adb reverse` falls back to a forward tunnel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReverseFallback {
    /// Fall back when the command ran and failed; abort when it could not start.
    #[default]
    OnExecError,
    /// Fall back on any failure.
    Always,
    /// Never fall back.
    Never,
}

// MARK: - RetryPolicy

/// Timers and budgets driving connection establishment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Period of the forward-mode connect timer.
    pub connect_interval: Duration,
    /// Failed connect attempts tolerated before the session stops.
    pub connect_attempts: u32,
    /// Automatic restarts from the push step after connect attempts run out.
    pub restart_budget: u32,
    /// How long reverse mode waits for the device to connect back.
    pub accept_timeout: Duration,
    /// Deadline for the metadata block on a fresh video socket.
    pub metadata_timeout: Duration,
    /// Deadline for a single TCP connect / first-byte read in forward mode.
    pub connect_timeout: Duration,
    pub reverse_fallback: ReverseFallback,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            connect_interval: Duration::from_millis(300),
            connect_attempts: 30,
            restart_budget: 1,
            accept_timeout: Duration::from_secs(1),
            metadata_timeout: Duration::from_secs(3),
            connect_timeout: Duration::from_secs(1),
            reverse_fallback: ReverseFallback::OnExecError,
        }
    }
}

// MARK: - ToolPaths

/// Executables resolved once at start and passed down explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    pub adb: PathBuf,
    pub server: PathBuf,
}

impl ToolPaths {
    /// Resolve the adb executable and the server binary.
    ///
    /// For each, the first non-empty candidate naming an existing file wins:
    /// environment override, configured path, file next to the running
    /// executable.
    pub fn resolve(
        configured_adb: Option<&Path>,
        configured_server: &Path,
    ) -> Result<Self, ConfigError> {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf));

        let adb = resolve_candidate(
            "adb executable",
            &[
                std::env::var_os(ADB_PATH_ENV).map(PathBuf::from),
                configured_adb.map(Path::to_path_buf),
                exe_dir.as_ref().map(|d| d.join(adb_file_name())),
            ],
        )?;
        let server = resolve_candidate(
            "server binary",
            &[
                std::env::var_os(SERVER_PATH_ENV).map(PathBuf::from),
                Some(configured_server.to_path_buf()),
                exe_dir.as_ref().map(|d| d.join("scrcpy-server")),
            ],
        )?;

        info!("adb path: {}", adb.display());
        info!("server path: {}", server.display());
        Ok(Self { adb, server })
    }
}

fn adb_file_name() -> &'static str {
    if cfg!(windows) {
        "adb.exe"
    } else {
        "adb"
    }
}

/// First non-empty candidate that names an existing regular file.
pub fn resolve_candidate(
    what: &'static str,
    candidates: &[Option<PathBuf>],
) -> Result<PathBuf, ConfigError> {
    let mut tried = Vec::new();
    for path in candidates.iter().flatten() {
        if path.as_os_str().is_empty() {
            continue;
        }
        if path.is_file() {
            return Ok(path.clone());
        }
        tried.push(path.display().to_string());
    }
    warn!("{} not found", what);
    Err(ConfigError::NotFound { what, tried: tried.join(", ") })
}
