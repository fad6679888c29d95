//! External process capability: `adb` invocations and their outcomes.

use std::fmt;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use droidlink_core::ProcessError;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

// MARK: - AdbCommand

/// One `adb` invocation against a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdbCommand {
    /// Empty targets whatever single device adb sees.
    pub serial: String,
    pub args: Vec<String>,
}

impl AdbCommand {
    pub fn new(serial: impl Into<String>, args: Vec<String>) -> Self {
        Self { serial: serial.into(), args }
    }

    pub fn push(serial: &str, local: &Path, remote: &str) -> Self {
        Self::new(serial, vec!["push".into(), local.display().to_string(), remote.into()])
    }

    pub fn reverse(serial: &str, socket_name: &str, local_port: u16) -> Self {
        Self::new(
            serial,
            vec![
                "reverse".into(),
                format!("localabstract:{}", socket_name),
                format!("tcp:{}", local_port),
            ],
        )
    }

    pub fn reverse_remove(serial: &str, socket_name: &str) -> Self {
        Self::new(
            serial,
            vec!["reverse".into(), "--remove".into(), format!("localabstract:{}", socket_name)],
        )
    }

    pub fn forward(serial: &str, local_port: u16, socket_name: &str) -> Self {
        Self::new(
            serial,
            vec![
                "forward".into(),
                format!("tcp:{}", local_port),
                format!("localabstract:{}", socket_name),
            ],
        )
    }

    pub fn forward_remove(serial: &str, local_port: u16) -> Self {
        Self::new(serial, vec!["forward".into(), "--remove".into(), format!("tcp:{}", local_port)])
    }

    /// Raw argument list, e.g. the server launch line (which starts with `shell`).
    pub fn shell(serial: &str, args: Vec<String>) -> Self {
        Self::new(serial, args)
    }

    pub fn devices() -> Self {
        Self::new("", vec!["devices".into()])
    }

    pub fn install(serial: &str, apk: &Path) -> Self {
        Self::new(serial, vec!["install".into(), "-r".into(), apk.display().to_string()])
    }

    pub fn remove_path(serial: &str, path: &str) -> Self {
        Self::new(serial, vec!["shell".into(), "rm".into(), path.into()])
    }

    pub fn show_touches(serial: &str, enabled: bool) -> Self {
        Self::new(
            serial,
            ["shell", "settings", "put", "system", "show_touches", if enabled { "1" } else { "0" }]
                .map(String::from)
                .to_vec(),
        )
    }

    /// `ip` query whose output [`parse_device_ip`] understands.
    pub fn wlan_ip(serial: &str) -> Self {
        Self::new(
            serial,
            ["shell", "ip", "-f", "inet", "addr", "show", "wlan0"].map(String::from).to_vec(),
        )
    }

    /// Full argument vector, with `-s <serial>` in front when a serial is set.
    pub fn argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 2);
        if !self.serial.is_empty() {
            argv.push("-s".to_string());
            argv.push(self.serial.clone());
        }
        argv.extend(self.args.iter().cloned());
        argv
    }
}

impl fmt::Display for AdbCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "adb {}", self.argv().join(" "))
    }
}

// MARK: - ProcessResult

/// Outcome reported for a process, in the order they can occur:
/// `SuccessStart` first, then one terminal outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessResult {
    /// The process is running. Not terminal.
    SuccessStart,
    /// Exited with status 0.
    SuccessExec,
    /// Exited with a non-zero status or was killed.
    ErrorExec,
    /// Could not be started or waited on.
    ErrorStart,
    /// The executable does not exist.
    MissingBinary,
}

impl ProcessResult {
    pub fn is_terminal(self) -> bool {
        self != Self::SuccessStart
    }
}

/// What a process reported, with the output captured so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessReport {
    pub result: ProcessResult,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessReport {
    pub fn new(result: ProcessResult) -> Self {
        Self { result, code: None, stdout: String::new(), stderr: String::new() }
    }

    pub fn exited(code: Option<i32>, stdout: String, stderr: String) -> Self {
        let result =
            if code == Some(0) { ProcessResult::SuccessExec } else { ProcessResult::ErrorExec };
        Self { result, code, stdout, stderr }
    }

    /// Map a terminal report to `Ok` only when the process exited cleanly.
    pub fn into_result(self, program: &Path) -> Result<Self, ProcessError> {
        match self.result {
            ProcessResult::SuccessExec | ProcessResult::SuccessStart => Ok(self),
            ProcessResult::ErrorExec => {
                Err(ProcessError::ExecFailed { code: self.code, stderr: self.stderr })
            }
            ProcessResult::MissingBinary => {
                Err(ProcessError::MissingBinary { path: program.to_path_buf() })
            }
            ProcessResult::ErrorStart => Err(ProcessError::StartFailed {
                program: program.display().to_string(),
                reason: self.stderr,
            }),
        }
    }
}

// MARK: - AdbRunner

/// Receives every report of one process.
pub type ReportFn = Box<dyn Fn(ProcessReport) + Send + Sync>;

/// Kill switch of a started process. Dropping it leaves the process running.
#[derive(Debug, Default)]
pub struct ProcessHandle {
    kill: Option<oneshot::Sender<()>>,
}

impl ProcessHandle {
    pub fn new(kill: oneshot::Sender<()>) -> Self {
        Self { kill: Some(kill) }
    }

    /// A handle that controls nothing.
    pub fn detached() -> Self {
        Self::default()
    }

    /// Ask the process to terminate. Idempotent.
    pub fn kill(&mut self) {
        if let Some(tx) = self.kill.take() {
            let _ = tx.send(());
        }
    }
}

/// Starts `adb` commands. Reports are delivered through the callback, never
/// synchronously from inside [`run`](Self::run).
pub trait AdbRunner: Send + Sync {
    /// Executable used for every command.
    fn program(&self) -> &Path;

    fn run(&self, command: AdbCommand, on_report: ReportFn) -> ProcessHandle;
}

/// Run `command` and wait for its terminal report.
pub async fn run_to_completion(
    runner: &dyn AdbRunner,
    command: AdbCommand,
) -> Result<ProcessReport, ProcessError> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _handle = runner.run(
        command,
        Box::new(move |report: ProcessReport| {
            let _ = tx.send(report);
        }),
    );
    while let Some(report) = rx.recv().await {
        if report.result.is_terminal() {
            return report.into_result(runner.program());
        }
    }
    Err(ProcessError::StartFailed {
        program: runner.program().display().to_string(),
        reason: "process reporter went away".into(),
    })
}

// MARK: - TokioAdbRunner

/// Runs commands as child processes on the tokio runtime.
#[derive(Debug, Clone)]
pub struct TokioAdbRunner {
    adb: Arc<PathBuf>,
}

impl TokioAdbRunner {
    pub fn new(adb: impl Into<PathBuf>) -> Self {
        Self { adb: Arc::new(adb.into()) }
    }
}

impl AdbRunner for TokioAdbRunner {
    fn program(&self) -> &Path {
        &self.adb
    }

    fn run(&self, command: AdbCommand, on_report: ReportFn) -> ProcessHandle {
        let (kill_tx, kill_rx) = oneshot::channel();
        let adb = Arc::clone(&self.adb);
        tokio::spawn(supervise(adb, command, on_report, kill_rx));
        ProcessHandle::new(kill_tx)
    }
}

async fn supervise(
    adb: Arc<PathBuf>,
    command: AdbCommand,
    on_report: ReportFn,
    kill_rx: oneshot::Receiver<()>,
) {
    debug!("{} {}", adb.display(), command.argv().join(" "));

    let spawned = Command::new(adb.as_path())
        .args(command.argv())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();

    let mut child = match spawned {
        Ok(child) => child,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            error!("adb not found at {}", adb.display());
            on_report(ProcessReport::new(ProcessResult::MissingBinary));
            return;
        }
        Err(e) => {
            error!("Failed to start {}: {}", command, e);
            let mut report = ProcessReport::new(ProcessResult::ErrorStart);
            report.stderr = e.to_string();
            on_report(report);
            return;
        }
    };
    on_report(ProcessReport::new(ProcessResult::SuccessStart));

    let stdout = child.stdout.take().map(|out| tokio::spawn(collect_lines(out, false)));
    let stderr = child.stderr.take().map(|err| tokio::spawn(collect_lines(err, true)));

    // A dropped handle means "not interested", not "kill".
    let killed = async {
        if kill_rx.await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    let status = tokio::select! {
        status = child.wait() => status,
        _ = killed => {
            debug!("killing: {}", command);
            let _ = child.start_kill();
            child.wait().await
        }
    };

    let stdout = join_output(stdout).await;
    let stderr = join_output(stderr).await;

    match status {
        Ok(status) => {
            debug!("{} returned {:?}", command, status.code());
            on_report(ProcessReport::exited(status.code(), stdout, stderr));
        }
        Err(e) => {
            error!("Waiting on {} failed: {}", command, e);
            let mut report = ProcessReport::new(ProcessResult::ErrorStart);
            report.stdout = stdout;
            report.stderr = e.to_string();
            on_report(report);
        }
    }
}

async fn collect_lines(stream: impl AsyncRead + Unpin, is_stderr: bool) -> String {
    let mut lines = BufReader::new(stream).lines();
    let mut collected = String::new();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if is_stderr {
            warn!("adb err: {}", line);
        } else {
            info!("adb out: {}", line);
        }
        collected.push_str(line);
        collected.push('\n');
    }
    collected
}

async fn join_output(task: Option<tokio::task::JoinHandle<String>>) -> String {
    match task {
        Some(task) => task.await.unwrap_or_default(),
        None => String::new(),
    }
}

// MARK: - Output parsers

/// Serials of devices in the `device` state, from `adb devices` output.
pub fn parse_device_serials(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut fields = line.trim_end().split('\t');
            match (fields.next(), fields.next(), fields.next()) {
                (Some(serial), Some("device"), None) if !serial.is_empty() => {
                    Some(serial.to_string())
                }
                _ => None,
            }
        })
        .collect()
}

/// First IPv4 address following `inet ` in `ip addr` output.
pub fn parse_device_ip(stdout: &str) -> Option<Ipv4Addr> {
    stdout.lines().find_map(|line| {
        let (_, rest) = line.split_once("inet ")?;
        let addr: String = rest.chars().take_while(|c| c.is_ascii_digit() || *c == '.').collect();
        addr.parse().ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tunnel_commands() {
        assert_eq!(
            AdbCommand::reverse("R58M", "scrcpy_0000abcd", 27183).to_string(),
            "adb -s R58M reverse localabstract:scrcpy_0000abcd tcp:27183"
        );
        assert_eq!(
            AdbCommand::reverse_remove("R58M", "scrcpy_0000abcd").argv(),
            vec!["-s", "R58M", "reverse", "--remove", "localabstract:scrcpy_0000abcd"]
        );
        assert_eq!(
            AdbCommand::forward("", 27183, "scrcpy_0000abcd").argv(),
            vec!["forward", "tcp:27183", "localabstract:scrcpy_0000abcd"]
        );
        assert_eq!(
            AdbCommand::forward_remove("", 27183).argv(),
            vec!["forward", "--remove", "tcp:27183"]
        );
    }

    #[test]
    fn device_commands() {
        assert_eq!(
            AdbCommand::push("x", Path::new("scrcpy-server"), "/data/local/tmp/scrcpy-server.jar")
                .args,
            vec!["push", "scrcpy-server", "/data/local/tmp/scrcpy-server.jar"]
        );
        assert_eq!(AdbCommand::devices().argv(), vec!["devices"]);
        assert_eq!(
            AdbCommand::install("x", Path::new("a.apk")).args,
            vec!["install", "-r", "a.apk"]
        );
        assert_eq!(AdbCommand::remove_path("x", "/tmp/f").args, vec!["shell", "rm", "/tmp/f"]);
        assert_eq!(
            AdbCommand::show_touches("x", true).args,
            vec!["shell", "settings", "put", "system", "show_touches", "1"]
        );
    }

    #[test]
    fn parses_devices_output() {
        let out = "List of devices attached\n\
                   R58M123\tdevice\n\
                   emulator-5554\toffline\n\
                   192.168.1.7:5555\tdevice\r\n\
                   P7C02\tunauthorized\n\n";
        assert_eq!(parse_device_serials(out), vec!["R58M123", "192.168.1.7:5555"]);
    }

    #[test]
    fn parses_device_ip() {
        let full = "30: wlan0: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500 qdisc mq state UP\n    \
                    inet 192.168.1.42/24 brd 192.168.1.255 scope global wlan0\n";
        assert_eq!(parse_device_ip(full), Some(Ipv4Addr::new(192, 168, 1, 42)));

        let oneline = "30: wlan0    inet 10.0.0.5/8 brd 10.255.255.255 scope global wlan0";
        assert_eq!(parse_device_ip(oneline), Some(Ipv4Addr::new(10, 0, 0, 5)));

        assert_eq!(parse_device_ip("Device \"wlan0\" does not exist."), None);
    }

    #[test]
    fn reports_map_to_errors() {
        let adb = Path::new("/usr/bin/adb");
        let ok = ProcessReport::exited(Some(0), "1 file pushed".into(), String::new());
        assert_eq!(ok.result, ProcessResult::SuccessExec);
        assert!(ok.into_result(adb).is_ok());

        let failed = ProcessReport::exited(Some(1), String::new(), "more than one device".into());
        assert!(matches!(
            failed.into_result(adb),
            Err(ProcessError::ExecFailed { code: Some(1), .. })
        ));

        let missing = ProcessReport::new(ProcessResult::MissingBinary);
        assert!(matches!(missing.into_result(adb), Err(ProcessError::MissingBinary { .. })));
    }

    #[tokio::test]
    async fn missing_executable_is_reported() {
        let runner = TokioAdbRunner::new("/definitely/not/an/adb");
        let err = run_to_completion(&runner, AdbCommand::devices()).await.unwrap_err();
        assert!(matches!(err, ProcessError::MissingBinary { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_output_and_exit_status() {
        // `echo` stands in for adb: it prints its arguments and exits 0.
        let runner = TokioAdbRunner::new("echo");
        let report = run_to_completion(&runner, AdbCommand::devices()).await.unwrap();
        assert_eq!(report.result, ProcessResult::SuccessExec);
        assert_eq!(report.stdout.trim(), "devices");

        let runner = TokioAdbRunner::new("false");
        let err = run_to_completion(&runner, AdbCommand::devices()).await.unwrap_err();
        assert!(matches!(err, ProcessError::ExecFailed { code: Some(1), .. }));
    }
}
