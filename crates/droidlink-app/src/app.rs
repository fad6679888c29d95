use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use droidlink_control::ControlCommand;
use droidlink_core::{AccessUnit, DroidLinkError, RetryPolicy, ServerParams, ToolPaths};
use droidlink_demuxer::{ChannelSink, Demuxer};
use droidlink_server::{
    connect, parse_device_serials, run_to_completion, AdbCommand, Session, TokioAdbRunner,
};
use droidlink_transport::DeviceChannels;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::stats::UnitStats;

/// JSON file with [`ServerParams`]; defaults apply when unset.
const CONFIG_ENV: &str = "DROIDLINK_CONFIG";
const SERIAL_ENV: &str = "DROIDLINK_SERIAL";
const PORT_ENV: &str = "DROIDLINK_PORT";
/// When set, the device screen is switched off once mirroring starts.
const SCREEN_OFF_ENV: &str = "DROIDLINK_SCREEN_OFF";

/// Why the streaming loop stopped.
enum Exit {
    Interrupted,
    StreamEnded,
    ServerEnded(String),
}

/// One mirroring session.
///
/// # Flow
/// 1. Load parameters (file, then environment overrides)
/// 2. Resolve `adb` and the server jar
/// 3. Push, tunnel, launch and connect (`droidlink_server::connect`)
/// 4. Demux the video socket on its own thread, count access units
/// 5. On Ctrl-C, stream end or server exit: close control, shut the video
///    socket, join the demuxer, stop the server
pub async fn run() -> Result<()> {
    let params = load_params()?;
    debug!("Session parameters: {}", serde_json::to_string(&params)?);

    let tools = ToolPaths::resolve(None, &params.server_local_path)?;
    info!("adb: {}  server: {}", tools.adb.display(), tools.server.display());
    let runner = Arc::new(TokioAdbRunner::new(tools.adb.clone()));

    if params.serial.is_empty() {
        match run_to_completion(runner.as_ref(), AdbCommand::devices()).await {
            Ok(report) => match parse_device_serials(&report.stdout).as_slice() {
                [] => warn!("adb lists no device, connecting anyway"),
                [serial] => info!("Using device {}", serial),
                many => warn!("{} devices connected, set {} to pick one", many.len(), SERIAL_ENV),
            },
            Err(e) => warn!("Could not list devices: {}", e),
        }
    }

    let Session { metadata, channels, mut server } =
        connect(params, tools.server, RetryPolicy::default(), runner).await?;
    let DeviceChannels { video, mut control } = channels;
    info!("Streaming from '{}' ({})", metadata.name, metadata.frame_size);

    // ── Demuxer thread ─────────────────────────────────────────────────────
    let video_shutdown = video.try_clone().context("cloning the video socket")?;
    let video_closer = video.try_clone().context("cloning the video socket")?;
    let (unit_tx, mut unit_rx) = mpsc::channel::<AccessUnit>(64);
    let mut demuxer = Demuxer::new(video, ChannelSink::new(unit_tx))
        .with_close_hook(move || video_closer.shutdown());
    demuxer.set_frame_size(metadata.frame_size);
    let demuxer = demuxer.spawn("droidlink-demux").context("starting the demuxer thread")?;

    if env::var_os(SCREEN_OFF_ENV).is_some() {
        if let Err(e) = control.send(&ControlCommand::SetDisplayPower { on: false }).await {
            warn!("Could not turn the device screen off: {}", e);
        }
    }

    // ── Receive loop ───────────────────────────────────────────────────────
    let mut stats = UnitStats::default();
    let exit = loop {
        tokio::select! {
            unit = unit_rx.recv() => match unit {
                Some(unit) => {
                    if stats.record(&unit) {
                        stats.log();
                    }
                }
                None => break Exit::StreamEnded,
            },
            reason = server.ended() => break Exit::ServerEnded(reason),
            _ = tokio::signal::ctrl_c() => break Exit::Interrupted,
        }
    };

    // ── Teardown ───────────────────────────────────────────────────────────
    control.close().await;
    video_shutdown.shutdown();
    drop(unit_rx);

    match tokio::task::spawn_blocking(move || demuxer.join()).await? {
        Ok(demuxed) => info!(
            "Demuxer finished: packets={} config={} frames={} bytes={}",
            demuxed.packets, demuxed.config_packets, demuxed.frames, demuxed.bytes
        ),
        Err(e) => warn!("Demuxer stopped with error: {}", e),
    }
    server.stop().await;
    stats.log();
    info!("{} control messages sent", control.sent());

    match exit {
        Exit::Interrupted => {
            info!("Interrupted, session closed.");
            Ok(())
        }
        Exit::StreamEnded => {
            info!("Video stream ended.");
            Ok(())
        }
        Exit::ServerEnded(reason) => Err(DroidLinkError::SessionEnded { reason }.into()),
    }
}

/// Parameters from `DROIDLINK_CONFIG` (if set), then the serial and port
/// overrides.
fn load_params() -> Result<ServerParams> {
    let mut params = match env::var_os(CONFIG_ENV) {
        Some(path) => {
            let path = PathBuf::from(path);
            let params = ServerParams::load(&path)
                .with_context(|| format!("loading {}", path.display()))?;
            info!("Loaded configuration from {}", path.display());
            params
        }
        None => ServerParams::default(),
    };

    if let Ok(serial) = env::var(SERIAL_ENV) {
        params.serial = serial;
    }
    if let Ok(port) = env::var(PORT_ENV) {
        params.local_port = port
            .parse()
            .with_context(|| format!("invalid {}={}", PORT_ENV, port))?;
    }
    params.validate()?;
    Ok(params)
}
