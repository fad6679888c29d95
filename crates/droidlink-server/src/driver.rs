//! Tokio side of the orchestrator.
//!
//! Every completion (process report, accept, metadata read, timer, connect attempt)
//! is turned into a [`ServerEvent`] and queued on one channel, so machine
//! transitions never run concurrently. Sockets produced along the way are
//! parked here until the machine signals `Started`.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use droidlink_core::{DeviceMetadata, DroidLinkError, RetryPolicy, ServerParams, TransportError};
use droidlink_transport::{ControlChannel, DeviceChannels, VideoSocket};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::adb::{AdbRunner, ProcessHandle, ProcessReport, ProcessResult};
use crate::machine::{Action, ConnectOutcome, ProcessSlot, ServerEvent, ServerMachine, Signal};

// ── Session ───────────────────────────────────────────────────────────────────

/// An established connection to the device server.
pub struct Session {
    pub metadata: DeviceMetadata,
    pub channels: DeviceChannels,
    pub server: ServerHandle,
}

/// Keeps the device server alive; dropping it stops the server.
pub struct ServerHandle {
    events: mpsc::UnboundedSender<DriverEvent>,
    ended: Option<oneshot::Receiver<String>>,
    task: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Resolves once the device server exits on its own, with the reason.
    /// Pending forever after it has resolved once.
    pub async fn ended(&mut self) -> String {
        let Some(rx) = self.ended.as_mut() else {
            return std::future::pending().await;
        };
        let reason = rx.await.unwrap_or_else(|_| "server driver stopped".to_string());
        self.ended = None;
        reason
    }

    /// Kill the server, remove any tunnel left and wait for the driver to exit.
    pub async fn stop(mut self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.events.send(DriverEvent::Stop(Some(ack_tx))).is_ok() {
            let _ = ack_rx.await;
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        let _ = self.events.send(DriverEvent::Stop(None));
    }
}

/// Push, tunnel, launch and connect. Resolves when both channels are up and
/// the device metadata has been read, or when establishment failed for good
/// (retries and restarts included).
pub async fn connect(
    params: ServerParams,
    server_path: PathBuf,
    policy: RetryPolicy,
    runner: Arc<dyn AdbRunner>,
) -> Result<Session, DroidLinkError> {
    let machine = ServerMachine::new(params, server_path, policy);
    info!(
        "Connecting to device '{}' via {:?} tunnel on port {}",
        machine.tunnel().serial,
        machine.tunnel().direction(),
        machine.tunnel().local_port
    );

    let (tx, mut rx) = mpsc::unbounded_channel();
    let (ended_tx, ended_rx) = oneshot::channel();
    let mut driver = Driver::new(machine, runner, tx.clone(), ended_tx);
    driver.handle(DriverEvent::Machine(ServerEvent::Start));

    loop {
        match driver.outcome.take() {
            Some(Ok(())) => break,
            Some(Err(reason)) => return Err(DroidLinkError::ConnectionFailed { reason }),
            None => {}
        }
        let Some(event) = rx.recv().await else {
            return Err(DroidLinkError::ConnectionFailed { reason: "driver channel closed".into() });
        };
        driver.handle(event);
    }

    let (video, metadata) = driver.video.take().ok_or_else(|| DroidLinkError::ConnectionFailed {
        reason: "started without a video channel".into(),
    })?;
    let control = driver.control.take().ok_or_else(|| DroidLinkError::ConnectionFailed {
        reason: "started without a control channel".into(),
    })?;
    info!("Device '{}' connected, frame size {}", metadata.name, metadata.frame_size);

    let task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let DriverEvent::Stop(ack) = event {
                driver.handle(DriverEvent::Machine(ServerEvent::Stop));
                if let Some(ack) = ack {
                    let _ = ack.send(());
                }
                break;
            }
            driver.handle(event);
        }
        debug!("server driver exited");
    });

    Ok(Session {
        metadata,
        channels: DeviceChannels { video, control },
        server: ServerHandle { events: tx, ended: Some(ended_rx), task: Some(task) },
    })
}

// ── Driver ────────────────────────────────────────────────────────────────────

enum DriverEvent {
    Machine(ServerEvent),
    Process { slot: ProcessSlot, generation: u64, result: ProcessResult },
    Accepted(io::Result<TcpStream>),
    VideoMetadata(Result<(VideoSocket, DeviceMetadata), DroidLinkError>),
    Connected(Result<Established, AttemptError>),
    Stop(Option<oneshot::Sender<()>>),
}

struct Established {
    video: VideoSocket,
    control: ControlChannel,
    metadata: DeviceMetadata,
}

struct AttemptError {
    fatal: bool,
    error: DroidLinkError,
}

impl AttemptError {
    fn fatal(error: impl Into<DroidLinkError>) -> Self {
        Self { fatal: true, error: error.into() }
    }

    fn retry(error: impl Into<DroidLinkError>) -> Self {
        Self { fatal: false, error: error.into() }
    }
}

struct Driver {
    machine: ServerMachine,
    policy: RetryPolicy,
    runner: Arc<dyn AdbRunner>,
    events: mpsc::UnboundedSender<DriverEvent>,
    ended: Option<oneshot::Sender<String>>,
    outcome: Option<Result<(), String>>,

    work: Option<ProcessHandle>,
    server: Option<ProcessHandle>,
    work_generation: u64,
    server_generation: u64,

    listener: Option<Arc<TcpListener>>,
    accept_task: Option<JoinHandle<()>>,
    accept_timer: Option<JoinHandle<()>>,
    connect_timer: Option<JoinHandle<()>>,
    connect_task: Option<JoinHandle<()>>,

    accepted: Option<TcpStream>,
    video: Option<(VideoSocket, DeviceMetadata)>,
    control: Option<ControlChannel>,
}

impl Driver {
    fn new(
        machine: ServerMachine,
        runner: Arc<dyn AdbRunner>,
        events: mpsc::UnboundedSender<DriverEvent>,
        ended: oneshot::Sender<String>,
    ) -> Self {
        let policy = machine.policy().clone();
        Self {
            machine,
            policy,
            runner,
            events,
            ended: Some(ended),
            outcome: None,
            work: None,
            server: None,
            work_generation: 0,
            server_generation: 0,
            listener: None,
            accept_task: None,
            accept_timer: None,
            connect_timer: None,
            connect_task: None,
            accepted: None,
            video: None,
            control: None,
        }
    }

    fn handle(&mut self, event: DriverEvent) {
        let Some(event) = self.translate(event) else {
            return;
        };
        for action in self.machine.on_event(event) {
            self.execute(action);
        }
    }

    /// Park whatever the event carries and reduce it to a machine event.
    fn translate(&mut self, event: DriverEvent) -> Option<ServerEvent> {
        match event {
            DriverEvent::Machine(event) => Some(event),
            DriverEvent::Process { slot, generation, result } => {
                let current = match slot {
                    ProcessSlot::Work => self.work_generation,
                    ProcessSlot::Server => self.server_generation,
                };
                if generation != current {
                    debug!("stale {:?} process report {:?} dropped", slot, result);
                    return None;
                }
                Some(ServerEvent::Process { slot, result })
            }
            DriverEvent::Accepted(Ok(stream)) => {
                self.accepted = Some(stream);
                Some(ServerEvent::Accepted)
            }
            DriverEvent::Accepted(Err(e)) => {
                warn!("accept failed: {}", e);
                Some(ServerEvent::AcceptFailed)
            }
            DriverEvent::VideoMetadata(Ok(video)) => {
                self.video = Some(video);
                Some(ServerEvent::MetadataRead { ok: true })
            }
            DriverEvent::VideoMetadata(Err(e)) => {
                warn!("reading video metadata failed: {}", e);
                Some(ServerEvent::MetadataRead { ok: false })
            }
            DriverEvent::Connected(Ok(established)) => {
                self.video = Some((established.video, established.metadata));
                self.control = Some(established.control);
                Some(ServerEvent::ConnectResult(ConnectOutcome::Connected))
            }
            DriverEvent::Connected(Err(AttemptError { fatal, error })) => {
                if fatal {
                    warn!("connect attempt failed: {}", error);
                    Some(ServerEvent::ConnectResult(ConnectOutcome::Fatal))
                } else {
                    debug!("connect attempt failed, will retry: {}", error);
                    Some(ServerEvent::ConnectResult(ConnectOutcome::Retryable))
                }
            }
            DriverEvent::Stop(_) => Some(ServerEvent::Stop),
        }
    }

    fn send(&self, event: DriverEvent) {
        let _ = self.events.send(event);
    }

    fn execute(&mut self, action: Action) {
        match action {
            Action::Run { slot, command } => {
                let generation = match slot {
                    ProcessSlot::Work => {
                        self.work_generation += 1;
                        self.work_generation
                    }
                    ProcessSlot::Server => {
                        self.server_generation += 1;
                        self.server_generation
                    }
                };
                let events = self.events.clone();
                let handle = self.runner.run(
                    command,
                    Box::new(move |report: ProcessReport| {
                        let result = report.result;
                        let _ = events.send(DriverEvent::Process { slot, generation, result });
                    }),
                );
                let previous = match slot {
                    ProcessSlot::Work => self.work.replace(handle),
                    ProcessSlot::Server => self.server.replace(handle),
                };
                if let Some(mut previous) = previous {
                    previous.kill();
                }
            }
            Action::RunDetached(command) => {
                let _ = self.runner.run(command, Box::new(|_: ProcessReport| {}));
            }
            Action::Listen { port, backlog } => match bind_listener(port, backlog) {
                Ok(listener) => {
                    debug!(port, "listening for the device");
                    self.listener = Some(Arc::new(listener));
                    self.send(DriverEvent::Machine(ServerEvent::Listening));
                }
                Err(e) => {
                    warn!("{}", e);
                    self.send(DriverEvent::Machine(ServerEvent::ListenFailed));
                }
            },
            Action::CloseListener => {
                abort(&mut self.accept_task);
                if self.listener.take().is_some() {
                    debug!("listener closed");
                }
            }
            Action::Accept => {
                let Some(listener) = self.listener.clone() else {
                    self.send(DriverEvent::Machine(ServerEvent::AcceptFailed));
                    return;
                };
                let events = self.events.clone();
                self.accept_task = Some(tokio::spawn(async move {
                    let accepted = listener.accept().await.map(|(stream, peer)| {
                        debug!("device connected from {}", peer);
                        stream
                    });
                    let _ = events.send(DriverEvent::Accepted(accepted));
                }));
            }
            Action::ReadMetadata => {
                let Some(stream) = self.accepted.take() else {
                    self.send(DriverEvent::Machine(ServerEvent::MetadataRead { ok: false }));
                    return;
                };
                let events = self.events.clone();
                let timeout = self.policy.metadata_timeout;
                tokio::spawn(async move {
                    let metadata = read_video_metadata(stream, timeout).await;
                    let _ = events.send(DriverEvent::VideoMetadata(metadata));
                });
            }
            Action::AssignControl => {
                self.control = self.accepted.take().map(ControlChannel::new);
            }
            Action::StartAcceptTimer => {
                let events = self.events.clone();
                let timeout = self.policy.accept_timeout;
                replace_task(&mut self.accept_timer, async move {
                    tokio::time::sleep(timeout).await;
                    let _ = events.send(DriverEvent::Machine(ServerEvent::AcceptTimeout));
                });
            }
            Action::StopAcceptTimer => abort(&mut self.accept_timer),
            Action::ArmConnectTimer => {
                let events = self.events.clone();
                let interval = self.policy.connect_interval;
                replace_task(&mut self.connect_timer, async move {
                    tokio::time::sleep(interval).await;
                    let _ = events.send(DriverEvent::Machine(ServerEvent::ConnectTick));
                });
            }
            Action::CancelConnectTimer => {
                abort(&mut self.connect_timer);
                abort(&mut self.connect_task);
            }
            Action::ConnectAttempt { port } => {
                let events = self.events.clone();
                let policy = self.policy.clone();
                replace_task(&mut self.connect_task, async move {
                    let result = connect_attempt(port, &policy).await;
                    let _ = events.send(DriverEvent::Connected(result));
                });
            }
            Action::CloseChannels => {
                self.accepted = None;
                if let Some((video, _)) = self.video.take() {
                    video.shutdown();
                }
                self.control = None;
            }
            Action::KillServer => {
                if let Some(mut server) = self.server.take() {
                    server.kill();
                }
            }
            Action::Signal(Signal::Started) => self.outcome = Some(Ok(())),
            Action::Signal(Signal::Failed { reason }) => {
                warn!("Server start failed: {}", reason);
                self.outcome = Some(Err(reason));
            }
            Action::Signal(Signal::Ended { reason }) => {
                if let Some(ended) = self.ended.take() {
                    let _ = ended.send(reason);
                }
            }
        }
    }
}

impl Drop for Driver {
    /// Runs when `connect()` is cancelled or the session task exits. A machine
    /// already stopped emits nothing here; otherwise the server is killed and
    /// the tunnel removed. Process handles only kill on request, so this is
    /// the last chance to do it.
    fn drop(&mut self) {
        if tokio::runtime::Handle::try_current().is_ok() {
            self.handle(DriverEvent::Machine(ServerEvent::Stop));
        }
        if let Some(mut work) = self.work.take() {
            work.kill();
        }
        if let Some(mut server) = self.server.take() {
            server.kill();
        }
        abort(&mut self.accept_task);
        abort(&mut self.accept_timer);
        abort(&mut self.connect_timer);
        abort(&mut self.connect_task);
    }
}

fn abort(task: &mut Option<JoinHandle<()>>) {
    if let Some(task) = task.take() {
        task.abort();
    }
}

fn replace_task(
    slot: &mut Option<JoinHandle<()>>,
    future: impl std::future::Future<Output = ()> + Send + 'static,
) {
    abort(slot);
    *slot = Some(tokio::spawn(future));
}

// ── Socket helpers ────────────────────────────────────────────────────────────

fn bind_listener(port: u16, backlog: u32) -> Result<TcpListener, TransportError> {
    let bind = || -> io::Result<TcpListener> {
        let socket = TcpSocket::new_v4()?;
        socket.set_reuseaddr(true)?;
        socket.bind(SocketAddr::from((Ipv4Addr::LOCALHOST, port)))?;
        socket.listen(backlog)
    };
    bind().map_err(|source| TransportError::Bind { port, source })
}

async fn open(port: u16, timeout: Duration) -> Result<TcpStream, TransportError> {
    match tokio::time::timeout(timeout, TcpStream::connect((Ipv4Addr::LOCALHOST, port))).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(source)) => Err(TransportError::Connect { port, source }),
        Err(_) => Err(TransportError::Connect {
            port,
            source: io::Error::new(io::ErrorKind::TimedOut, "connect timed out"),
        }),
    }
}

async fn read_video_metadata(
    stream: TcpStream,
    timeout: Duration,
) -> Result<(VideoSocket, DeviceMetadata), DroidLinkError> {
    let mut video = VideoSocket::from_tokio(stream)?;
    tokio::task::spawn_blocking(move || -> Result<_, DroidLinkError> {
        let metadata = video.read_metadata(timeout)?;
        Ok((video, metadata))
    })
    .await
    .map_err(|e| DroidLinkError::Io(io::Error::other(e)))?
}

/// One forward-mode attempt: open both sockets, then wait for the device to
/// speak. adb accepts the TCP connection even before the device server
/// listens, so only the dummy byte on the video socket proves the tunnel
/// reaches it. The control socket carries no such byte.
async fn connect_attempt(port: u16, policy: &RetryPolicy) -> Result<Established, AttemptError> {
    let mut video = open(port, policy.connect_timeout).await.map_err(AttemptError::fatal)?;
    let control = open(port, policy.connect_timeout).await.map_err(AttemptError::fatal)?;

    let mut dummy = [0u8; 1];
    match tokio::time::timeout(policy.connect_timeout, video.read(&mut dummy)).await {
        Ok(Ok(1)) => {}
        Ok(Ok(_)) => return Err(AttemptError::retry(TransportError::ConnectionClosed)),
        Ok(Err(e)) => return Err(AttemptError::retry(e)),
        Err(_) => {
            return Err(AttemptError::retry(TransportError::Timeout {
                ms: policy.connect_timeout.as_millis() as u64,
            }))
        }
    }

    let (video, metadata) = read_video_metadata(video, policy.metadata_timeout)
        .await
        .map_err(AttemptError::retry)?;
    let mut control = ControlChannel::new(control);
    if control.discard_dummy_byte() {
        debug!("dropped a dummy byte on the control socket");
    }

    Ok(Established { video, control, metadata })
}
