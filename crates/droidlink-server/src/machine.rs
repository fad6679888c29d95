//! Connection establishment as a pure state machine.
//!
//! [`ServerMachine::on_event`] consumes one completion event and returns the
//! actions the driver must perform, in order. No I/O happens here, so every
//! path (fallback, retries, restarts) can be replayed deterministically.
//!
//! ```text
//! Idle ─Start─► Pushing ─ok─► EnablingReverseTunnel ─ok─► (listen) ─► LaunchingServer
//!                  │                 │ failed (policy)                       ▲     │
//!                  │                 ▼                                       │  started
//!                  └─ forward ─► EnablingForwardTunnel ─────ok───────────────┘     ▼
//!                                                                               Running
//! ```

use std::path::PathBuf;

use droidlink_core::{
    ConnectionState, ReverseFallback, RetryPolicy, ServerParams, TunnelConfig, TunnelDirection,
};
use tracing::{debug, error, info, warn};

use crate::adb::{AdbCommand, ProcessResult};

/// Pending connections allowed on the reverse-mode listener.
pub const LISTEN_BACKLOG: u32 = 2;

// MARK: - Events

/// Which process a report belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessSlot {
    /// Short-lived setup commands (push, tunnel). One at a time.
    Work,
    /// The long-running device server.
    Server,
}

/// Result of one forward-mode connect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Both sockets open, dummy byte and metadata read.
    Connected,
    /// Sockets open but the device did not answer yet.
    Retryable,
    /// The local tunnel port refused the connection.
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerEvent {
    Start,
    Process { slot: ProcessSlot, result: ProcessResult },
    Listening,
    ListenFailed,
    /// A device connection was accepted on the reverse listener.
    Accepted,
    AcceptFailed,
    /// Metadata read on the first accepted connection finished.
    MetadataRead { ok: bool },
    AcceptTimeout,
    ConnectTick,
    ConnectResult(ConnectOutcome),
    Stop,
}

// MARK: - Actions

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// Both channels are up and the device metadata was read.
    Started,
    /// Establishment failed for good.
    Failed { reason: String },
    /// The device server went away after a successful start.
    Ended { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Start a process; its reports come back as [`ServerEvent::Process`].
    Run { slot: ProcessSlot, command: AdbCommand },
    /// Start a process nobody waits for (tunnel teardown).
    RunDetached(AdbCommand),
    Listen { port: u16, backlog: u32 },
    CloseListener,
    /// Accept one connection on the listener.
    Accept,
    /// Read the metadata block from the connection just accepted.
    ReadMetadata,
    /// The connection just accepted becomes the control channel.
    AssignControl,
    StartAcceptTimer,
    StopAcceptTimer,
    /// Fire [`ServerEvent::ConnectTick`] after the connect interval.
    ArmConnectTimer,
    CancelConnectTimer,
    ConnectAttempt { port: u16 },
    /// Drop every socket not yet handed over.
    CloseChannels,
    KillServer,
    Signal(Signal),
}

// MARK: - ServerMachine

#[derive(Debug)]
pub struct ServerMachine {
    params: ServerParams,
    server_path: PathBuf,
    policy: RetryPolicy,
    tunnel: TunnelConfig,
    state: ConnectionState,
    tunnel_enabled: bool,
    video_ready: bool,
    established: bool,
    failed_attempts: u32,
    restart_count: u32,
}

impl ServerMachine {
    pub fn new(mut params: ServerParams, server_path: PathBuf, policy: RetryPolicy) -> Self {
        params.ensure_scid();
        let tunnel = params.tunnel();
        Self {
            params,
            server_path,
            policy,
            tunnel,
            state: ConnectionState::Idle,
            tunnel_enabled: false,
            video_ready: false,
            established: false,
            failed_attempts: 0,
            restart_count: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn tunnel(&self) -> &TunnelConfig {
        &self.tunnel
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn is_established(&self) -> bool {
        self.established
    }

    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    pub fn restart_count(&self) -> u32 {
        self.restart_count
    }

    pub fn on_event(&mut self, event: ServerEvent) -> Vec<Action> {
        let mut actions = Vec::new();
        match event {
            ServerEvent::Start => self.start(&mut actions),
            ServerEvent::Stop => {
                if self.state != ConnectionState::Stopped {
                    self.stop(&mut actions);
                    self.set_state(ConnectionState::Stopped);
                }
            }
            ServerEvent::Process { slot: ProcessSlot::Work, result } => {
                self.on_work_result(result, &mut actions)
            }
            ServerEvent::Process { slot: ProcessSlot::Server, result } => {
                self.on_server_result(result, &mut actions)
            }
            ServerEvent::Listening => self.on_listening(&mut actions),
            ServerEvent::ListenFailed => {
                if self.state == ConnectionState::EnablingReverseTunnel {
                    error!("Could not listen on port {}", self.tunnel.local_port);
                    self.fail("could not listen on the local port", &mut actions);
                }
            }
            ServerEvent::Accepted => self.on_accepted(&mut actions),
            ServerEvent::AcceptFailed => {
                if self.awaiting_connections() {
                    self.fail("accepting the device connection failed", &mut actions);
                }
            }
            ServerEvent::MetadataRead { ok } => self.on_metadata_read(ok, &mut actions),
            ServerEvent::AcceptTimeout => {
                if self.awaiting_connections()
                    && self.tunnel.direction() == TunnelDirection::Reverse
                {
                    warn!("Device did not connect back within {:?}", self.policy.accept_timeout);
                    self.fail("device did not connect in time", &mut actions);
                }
            }
            ServerEvent::ConnectTick => {
                if self.awaiting_connections() && self.tunnel.is_forward() {
                    actions.push(Action::ConnectAttempt { port: self.tunnel.local_port });
                }
            }
            ServerEvent::ConnectResult(outcome) => self.on_connect_result(outcome, &mut actions),
        }
        actions
    }

    // ── Setup steps ──────────────────────────────────────────────────────────

    fn start(&mut self, actions: &mut Vec<Action>) {
        if !matches!(self.state, ConnectionState::Idle | ConnectionState::Stopped) {
            warn!("start ignored in state {}", self.state);
            return;
        }
        self.tunnel.reset();
        self.tunnel_enabled = false;
        self.video_ready = false;
        self.established = false;
        self.failed_attempts = 0;
        self.set_state(ConnectionState::Pushing);
        actions.push(Action::Run {
            slot: ProcessSlot::Work,
            command: AdbCommand::push(
                &self.tunnel.serial,
                &self.server_path,
                &self.params.server_remote_path,
            ),
        });
    }

    fn on_work_result(&mut self, result: ProcessResult, actions: &mut Vec<Action>) {
        if result == ProcessResult::SuccessStart {
            return;
        }
        match self.state {
            ConnectionState::Pushing => {
                if result == ProcessResult::SuccessExec {
                    if self.tunnel.prefer_reverse {
                        self.enable_reverse(actions);
                    } else {
                        self.tunnel.use_forward();
                        self.enable_forward(actions);
                    }
                } else {
                    error!("adb push failed ({:?})", result);
                    self.fail("pushing the server failed", actions);
                }
            }
            ConnectionState::EnablingReverseTunnel => {
                if result == ProcessResult::SuccessExec {
                    self.tunnel_enabled = true;
                    actions.push(Action::Listen {
                        port: self.tunnel.local_port,
                        backlog: LISTEN_BACKLOG,
                    });
                } else if self.falls_back(result) {
                    warn!("adb reverse failed ({:?}), falling back to forward tunnel", result);
                    self.tunnel.use_forward();
                    self.enable_forward(actions);
                } else {
                    error!("adb reverse failed ({:?})", result);
                    self.fail("enabling the reverse tunnel failed", actions);
                }
            }
            ConnectionState::EnablingForwardTunnel => {
                if result == ProcessResult::SuccessExec {
                    self.tunnel_enabled = true;
                    self.launch(actions);
                } else {
                    error!("adb forward failed ({:?})", result);
                    self.fail("enabling the forward tunnel failed", actions);
                }
            }
            state => debug!("work process {:?} ignored in state {}", result, state),
        }
    }

    fn falls_back(&self, result: ProcessResult) -> bool {
        match self.policy.reverse_fallback {
            ReverseFallback::Always => true,
            ReverseFallback::Never => false,
            ReverseFallback::OnExecError => result == ProcessResult::ErrorExec,
        }
    }

    fn enable_reverse(&mut self, actions: &mut Vec<Action>) {
        self.set_state(ConnectionState::EnablingReverseTunnel);
        actions.push(Action::Run {
            slot: ProcessSlot::Work,
            command: AdbCommand::reverse(
                &self.tunnel.serial,
                &self.tunnel.socket_name(),
                self.tunnel.local_port,
            ),
        });
    }

    fn enable_forward(&mut self, actions: &mut Vec<Action>) {
        self.set_state(ConnectionState::EnablingForwardTunnel);
        actions.push(Action::Run {
            slot: ProcessSlot::Work,
            command: AdbCommand::forward(
                &self.tunnel.serial,
                self.tunnel.local_port,
                &self.tunnel.socket_name(),
            ),
        });
    }

    fn on_listening(&mut self, actions: &mut Vec<Action>) {
        if self.state == ConnectionState::EnablingReverseTunnel {
            self.launch(actions);
        }
    }

    fn launch(&mut self, actions: &mut Vec<Action>) {
        self.set_state(ConnectionState::LaunchingServer);
        actions.push(Action::Run {
            slot: ProcessSlot::Server,
            command: AdbCommand::shell(
                &self.tunnel.serial,
                self.params.server_args(self.tunnel.is_forward()),
            ),
        });
    }

    fn on_server_result(&mut self, result: ProcessResult, actions: &mut Vec<Action>) {
        match self.state {
            ConnectionState::LaunchingServer => match result {
                ProcessResult::SuccessStart => {
                    self.set_state(ConnectionState::Running);
                    if self.tunnel.is_forward() {
                        actions.push(Action::ArmConnectTimer);
                    } else {
                        actions.push(Action::StartAcceptTimer);
                        actions.push(Action::Accept);
                    }
                }
                other => {
                    error!("adb shell start server failed ({:?})", other);
                    self.fail("launching the server failed", actions);
                }
            },
            ConnectionState::Running if result.is_terminal() => {
                if self.established {
                    info!("Device server exited ({:?})", result);
                    self.set_state(ConnectionState::Stopped);
                    let reason = "device server exited".into();
                    actions.push(Action::Signal(Signal::Ended { reason }));
                } else {
                    warn!("Device server exited before connecting ({:?})", result);
                    self.fail("device server exited before connecting", actions);
                }
            }
            state => debug!("server process {:?} ignored in state {}", result, state),
        }
    }

    // ── Reverse mode ─────────────────────────────────────────────────────────

    fn awaiting_connections(&self) -> bool {
        self.state == ConnectionState::Running && !self.established
    }

    fn on_accepted(&mut self, actions: &mut Vec<Action>) {
        if !self.awaiting_connections() {
            return;
        }
        if !self.video_ready {
            actions.push(Action::ReadMetadata);
            return;
        }

        actions.push(Action::AssignControl);
        actions.push(Action::StopAcceptTimer);
        actions.push(Action::CloseListener);
        self.remove_tunnel(actions);
        self.established = true;
        info!("Device connected (reverse tunnel)");
        actions.push(Action::Signal(Signal::Started));
    }

    fn on_metadata_read(&mut self, ok: bool, actions: &mut Vec<Action>) {
        if !self.awaiting_connections() || self.video_ready {
            return;
        }
        if ok {
            self.video_ready = true;
            actions.push(Action::Accept);
        } else {
            warn!("Video connection did not send device metadata");
            self.fail("reading device metadata failed", actions);
        }
    }

    // ── Forward mode ─────────────────────────────────────────────────────────

    fn on_connect_result(&mut self, outcome: ConnectOutcome, actions: &mut Vec<Action>) {
        if !self.awaiting_connections() || !self.tunnel.is_forward() {
            return;
        }
        match outcome {
            ConnectOutcome::Connected => {
                actions.push(Action::CancelConnectTimer);
                self.remove_tunnel(actions);
                self.established = true;
                self.failed_attempts = 0;
                self.restart_count = 0;
                info!("Device connected (forward tunnel)");
                actions.push(Action::Signal(Signal::Started));
            }
            ConnectOutcome::Retryable => {
                self.failed_attempts += 1;
                if self.failed_attempts >= self.policy.connect_attempts {
                    self.exhausted(actions);
                } else {
                    debug!(
                        "connect attempt {}/{} failed, retrying",
                        self.failed_attempts, self.policy.connect_attempts
                    );
                    actions.push(Action::ArmConnectTimer);
                }
            }
            ConnectOutcome::Fatal => {
                warn!("Could not connect to the local tunnel port {}", self.tunnel.local_port);
                self.failed_attempts = self.policy.connect_attempts;
                self.exhausted(actions);
            }
        }
    }

    fn exhausted(&mut self, actions: &mut Vec<Action>) {
        self.stop(actions);
        if self.restart_count < self.policy.restart_budget {
            self.restart_count += 1;
            warn!(
                "Connect attempts exhausted, restarting server ({}/{})",
                self.restart_count, self.policy.restart_budget
            );
            self.set_state(ConnectionState::Stopped);
            self.start(actions);
        } else {
            self.restart_count = 0;
            error!("Connect attempts exhausted, giving up");
            self.set_state(ConnectionState::Stopped);
            let reason = "could not connect to the device server".into();
            actions.push(Action::Signal(Signal::Failed { reason }));
        }
    }

    // ── Teardown ─────────────────────────────────────────────────────────────

    fn remove_tunnel(&mut self, actions: &mut Vec<Action>) {
        if !self.tunnel_enabled {
            return;
        }
        self.tunnel_enabled = false;
        let command = match self.tunnel.direction() {
            TunnelDirection::Reverse => {
                AdbCommand::reverse_remove(&self.tunnel.serial, &self.tunnel.socket_name())
            }
            TunnelDirection::Forward => {
                AdbCommand::forward_remove(&self.tunnel.serial, self.tunnel.local_port)
            }
        };
        actions.push(Action::RunDetached(command));
    }

    /// Release everything the session holds.
    fn stop(&mut self, actions: &mut Vec<Action>) {
        if self.tunnel.is_forward() {
            actions.push(Action::CancelConnectTimer);
        } else {
            actions.push(Action::StopAcceptTimer);
        }
        actions.push(Action::CloseChannels);
        actions.push(Action::KillServer);
        self.remove_tunnel(actions);
        actions.push(Action::CloseListener);
        self.video_ready = false;
    }

    fn fail(&mut self, reason: &str, actions: &mut Vec<Action>) {
        self.stop(actions);
        self.set_state(ConnectionState::Stopped);
        actions.push(Action::Signal(Signal::Failed { reason: reason.to_string() }));
    }

    fn set_state(&mut self, next: ConnectionState) {
        if self.state != next {
            debug!("server state: {} → {}", self.state, next);
            self.state = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn machine(use_reverse: bool, policy: RetryPolicy) -> ServerMachine {
        let params = ServerParams {
            serial: "R58M".into(),
            scid: Some(0xabcd),
            use_reverse,
            ..ServerParams::default()
        };
        ServerMachine::new(params, PathBuf::from("scrcpy-server"), policy)
    }

    fn exec(slot: ProcessSlot, result: ProcessResult) -> ServerEvent {
        ServerEvent::Process { slot, result }
    }

    fn run_commands(actions: &[Action]) -> Vec<String> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Run { command, .. } | Action::RunDetached(command) => {
                    Some(command.args[0].clone())
                }
                _ => None,
            })
            .collect()
    }

    /// Feed events, recording every state the machine passes through.
    fn replay(
        m: &mut ServerMachine,
        events: &[ServerEvent],
        states: &mut Vec<ConnectionState>,
    ) -> Vec<Action> {
        let mut all = Vec::new();
        for event in events {
            all.extend(m.on_event(*event));
            if states.last() != Some(&m.state()) {
                states.push(m.state());
            }
        }
        all
    }

    fn to_forward_running(m: &mut ServerMachine) -> Vec<Action> {
        let mut actions = m.on_event(ServerEvent::Start);
        actions.extend(m.on_event(exec(ProcessSlot::Work, ProcessResult::SuccessStart)));
        actions.extend(m.on_event(exec(ProcessSlot::Work, ProcessResult::SuccessExec)));
        actions.extend(m.on_event(exec(ProcessSlot::Work, ProcessResult::SuccessExec)));
        actions.extend(m.on_event(exec(ProcessSlot::Server, ProcessResult::SuccessStart)));
        actions
    }

    #[test]
    fn reverse_happy_path() {
        let mut m = machine(true, RetryPolicy::default());
        let mut states = vec![m.state()];
        let actions = replay(
            &mut m,
            &[
                ServerEvent::Start,
                exec(ProcessSlot::Work, ProcessResult::SuccessExec),
                exec(ProcessSlot::Work, ProcessResult::SuccessExec),
                ServerEvent::Listening,
                exec(ProcessSlot::Server, ProcessResult::SuccessStart),
                ServerEvent::Accepted,
                ServerEvent::MetadataRead { ok: true },
                ServerEvent::Accepted,
            ],
            &mut states,
        );

        assert_eq!(
            states,
            vec![
                ConnectionState::Idle,
                ConnectionState::Pushing,
                ConnectionState::EnablingReverseTunnel,
                ConnectionState::LaunchingServer,
                ConnectionState::Running,
            ]
        );
        assert!(actions.contains(&Action::Listen { port: 27183, backlog: 2 }));
        assert_eq!(run_commands(&actions), vec!["push", "reverse", "shell", "reverse"]);
        let remove = AdbCommand::reverse_remove("R58M", "scrcpy_0000abcd");
        assert!(actions.contains(&Action::RunDetached(remove)));
        assert_eq!(actions.last(), Some(&Action::Signal(Signal::Started)));
        assert!(m.is_established());

        let launch = actions
            .iter()
            .find_map(|a| match a {
                Action::Run { slot: ProcessSlot::Server, command } => Some(command.clone()),
                _ => None,
            })
            .unwrap();
        assert!(!launch.args.contains(&"tunnel_forward=true".to_string()));
    }

    #[test]
    fn reverse_failure_falls_back_to_forward_once() {
        let mut m = machine(true, RetryPolicy::default());
        let mut states = vec![m.state()];
        let actions = replay(
            &mut m,
            &[
                ServerEvent::Start,
                exec(ProcessSlot::Work, ProcessResult::SuccessExec),
                exec(ProcessSlot::Work, ProcessResult::SuccessStart),
                exec(ProcessSlot::Work, ProcessResult::ErrorExec),
                exec(ProcessSlot::Work, ProcessResult::SuccessStart),
                exec(ProcessSlot::Work, ProcessResult::SuccessExec),
                exec(ProcessSlot::Server, ProcessResult::SuccessStart),
                ServerEvent::ConnectTick,
                ServerEvent::ConnectResult(ConnectOutcome::Retryable),
                ServerEvent::ConnectTick,
                ServerEvent::ConnectResult(ConnectOutcome::Connected),
            ],
            &mut states,
        );

        assert_eq!(
            states,
            vec![
                ConnectionState::Idle,
                ConnectionState::Pushing,
                ConnectionState::EnablingReverseTunnel,
                ConnectionState::EnablingForwardTunnel,
                ConnectionState::LaunchingServer,
                ConnectionState::Running,
            ]
        );
        let visits = |state: ConnectionState| states.iter().filter(|s| **s == state).count();
        assert_eq!(visits(ConnectionState::EnablingForwardTunnel), 1);
        assert_eq!(visits(ConnectionState::EnablingReverseTunnel), 1);
        assert!(m.tunnel().is_forward());
        assert_eq!(run_commands(&actions), vec!["push", "reverse", "forward", "shell", "forward"]);
        assert_eq!(actions.last(), Some(&Action::Signal(Signal::Started)));

        let launch = actions
            .iter()
            .find_map(|a| match a {
                Action::Run { slot: ProcessSlot::Server, command } => Some(command.clone()),
                _ => None,
            })
            .unwrap();
        assert!(launch.args.contains(&"tunnel_forward=true".to_string()));
    }

    #[test]
    fn reverse_fallback_policy() {
        let start_failure = [
            ServerEvent::Start,
            exec(ProcessSlot::Work, ProcessResult::SuccessExec),
            exec(ProcessSlot::Work, ProcessResult::ErrorStart),
        ];

        let mut m = machine(true, RetryPolicy::default());
        let actions = replay(&mut m, &start_failure, &mut Vec::new());
        assert_eq!(m.state(), ConnectionState::Stopped);
        assert!(matches!(actions.last(), Some(Action::Signal(Signal::Failed { .. }))));

        let policy =
            RetryPolicy { reverse_fallback: ReverseFallback::Always, ..RetryPolicy::default() };
        let mut m = machine(true, policy);
        replay(&mut m, &start_failure, &mut Vec::new());
        assert_eq!(m.state(), ConnectionState::EnablingForwardTunnel);

        let policy =
            RetryPolicy { reverse_fallback: ReverseFallback::Never, ..RetryPolicy::default() };
        let mut m = machine(true, policy);
        let actions = replay(
            &mut m,
            &[
                ServerEvent::Start,
                exec(ProcessSlot::Work, ProcessResult::SuccessExec),
                exec(ProcessSlot::Work, ProcessResult::ErrorExec),
            ],
            &mut Vec::new(),
        );
        assert_eq!(m.state(), ConnectionState::Stopped);
        assert!(matches!(actions.last(), Some(Action::Signal(Signal::Failed { .. }))));
    }

    #[test]
    fn forward_retries_then_restarts_once_then_fails() {
        let policy = RetryPolicy {
            connect_attempts: 3,
            restart_budget: 1,
            connect_interval: Duration::from_millis(1),
            ..RetryPolicy::default()
        };
        let mut m = machine(false, policy);

        let setup = to_forward_running(&mut m);
        assert_eq!(run_commands(&setup), vec!["push", "forward", "shell"]);
        assert_eq!(setup.last(), Some(&Action::ArmConnectTimer));
        assert_eq!(m.state(), ConnectionState::Running);

        let attempt = |m: &mut ServerMachine| {
            let tick = m.on_event(ServerEvent::ConnectTick);
            assert_eq!(tick, vec![Action::ConnectAttempt { port: 27183 }]);
            m.on_event(ServerEvent::ConnectResult(ConnectOutcome::Retryable))
        };

        // First round: two retries re-arm the timer, the third stops and restarts.
        assert_eq!(attempt(&mut m), vec![Action::ArmConnectTimer]);
        assert_eq!(attempt(&mut m), vec![Action::ArmConnectTimer]);
        let restart = attempt(&mut m);
        assert_eq!(
            restart,
            vec![
                Action::CancelConnectTimer,
                Action::CloseChannels,
                Action::KillServer,
                Action::RunDetached(AdbCommand::forward_remove("R58M", 27183)),
                Action::CloseListener,
                Action::Run {
                    slot: ProcessSlot::Work,
                    command: AdbCommand::push(
                        "R58M",
                        std::path::Path::new("scrcpy-server"),
                        "/data/local/tmp/scrcpy-server.jar"
                    ),
                },
            ]
        );
        assert_eq!(m.state(), ConnectionState::Pushing);
        assert_eq!(m.restart_count(), 1);

        // Second round exhausts the restart budget.
        to_forward_running(&mut m);
        assert_eq!(m.state(), ConnectionState::Running);
        assert_eq!(attempt(&mut m), vec![Action::ArmConnectTimer]);
        assert_eq!(attempt(&mut m), vec![Action::ArmConnectTimer]);
        let last = attempt(&mut m);
        assert_eq!(&last[..4], &[
            Action::CancelConnectTimer,
            Action::CloseChannels,
            Action::KillServer,
            Action::RunDetached(AdbCommand::forward_remove("R58M", 27183)),
        ]);
        assert!(matches!(last.last(), Some(Action::Signal(Signal::Failed { .. }))));
        assert!(!last.iter().any(|a| matches!(a, Action::Run { .. })));
        assert_eq!(m.state(), ConnectionState::Stopped);
        assert_eq!(m.restart_count(), 0);

        // Nothing moves after the final failure.
        assert!(m.on_event(ServerEvent::ConnectTick).is_empty());
    }

    #[test]
    fn refused_connection_exhausts_the_budget_at_once() {
        let policy = RetryPolicy { restart_budget: 0, ..RetryPolicy::default() };
        let mut m = machine(false, policy);
        to_forward_running(&mut m);
        m.on_event(ServerEvent::ConnectTick);
        let actions = m.on_event(ServerEvent::ConnectResult(ConnectOutcome::Fatal));
        assert!(matches!(actions.last(), Some(Action::Signal(Signal::Failed { .. }))));
        assert_eq!(m.failed_attempts(), 30);
    }

    #[test]
    fn successful_connect_resets_restart_count() {
        let policy =
            RetryPolicy { connect_attempts: 1, restart_budget: 1, ..RetryPolicy::default() };
        let mut m = machine(false, policy);
        to_forward_running(&mut m);
        m.on_event(ServerEvent::ConnectTick);
        m.on_event(ServerEvent::ConnectResult(ConnectOutcome::Retryable));
        assert_eq!(m.restart_count(), 1);

        to_forward_running(&mut m);
        m.on_event(ServerEvent::ConnectTick);
        let actions = m.on_event(ServerEvent::ConnectResult(ConnectOutcome::Connected));
        assert_eq!(
            actions,
            vec![
                Action::CancelConnectTimer,
                Action::RunDetached(AdbCommand::forward_remove("R58M", 27183)),
                Action::Signal(Signal::Started),
            ]
        );
        assert_eq!(m.restart_count(), 0);
    }

    #[test]
    fn listen_failure_rolls_back_reverse_tunnel() {
        let mut m = machine(true, RetryPolicy::default());
        let actions = replay(
            &mut m,
            &[
                ServerEvent::Start,
                exec(ProcessSlot::Work, ProcessResult::SuccessExec),
                exec(ProcessSlot::Work, ProcessResult::SuccessExec),
                ServerEvent::ListenFailed,
            ],
            &mut Vec::new(),
        );
        let remove = AdbCommand::reverse_remove("R58M", "scrcpy_0000abcd");
        assert!(actions.contains(&Action::RunDetached(remove)));
        assert!(matches!(actions.last(), Some(Action::Signal(Signal::Failed { .. }))));
        assert_eq!(m.state(), ConnectionState::Stopped);
    }

    #[test]
    fn accept_timeout_and_bad_metadata_fail_without_restart() {
        let reverse_running = [
            ServerEvent::Start,
            exec(ProcessSlot::Work, ProcessResult::SuccessExec),
            exec(ProcessSlot::Work, ProcessResult::SuccessExec),
            ServerEvent::Listening,
            exec(ProcessSlot::Server, ProcessResult::SuccessStart),
        ];

        let mut m = machine(true, RetryPolicy::default());
        replay(&mut m, &reverse_running, &mut Vec::new());
        let actions = m.on_event(ServerEvent::AcceptTimeout);
        assert!(actions.contains(&Action::KillServer));
        assert!(!actions.iter().any(|a| matches!(a, Action::Run { .. })));
        assert!(matches!(actions.last(), Some(Action::Signal(Signal::Failed { .. }))));

        let mut m = machine(true, RetryPolicy::default());
        replay(&mut m, &reverse_running, &mut Vec::new());
        assert_eq!(m.on_event(ServerEvent::Accepted), vec![Action::ReadMetadata]);
        let actions = m.on_event(ServerEvent::MetadataRead { ok: false });
        assert!(matches!(actions.last(), Some(Action::Signal(Signal::Failed { .. }))));
    }

    #[test]
    fn server_launch_failure_releases_tunnel() {
        let mut m = machine(false, RetryPolicy::default());
        let mut actions = m.on_event(ServerEvent::Start);
        actions.extend(m.on_event(exec(ProcessSlot::Work, ProcessResult::SuccessExec)));
        actions.extend(m.on_event(exec(ProcessSlot::Work, ProcessResult::SuccessExec)));
        let failed = m.on_event(exec(ProcessSlot::Server, ProcessResult::MissingBinary));
        assert!(failed.contains(&Action::RunDetached(AdbCommand::forward_remove("R58M", 27183))));
        assert!(matches!(failed.last(), Some(Action::Signal(Signal::Failed { .. }))));
        assert_eq!(run_commands(&actions), vec!["push", "forward", "shell"]);
    }

    #[test]
    fn server_exit_after_start_ends_session() {
        let mut m = machine(false, RetryPolicy::default());
        to_forward_running(&mut m);
        m.on_event(ServerEvent::ConnectTick);
        m.on_event(ServerEvent::ConnectResult(ConnectOutcome::Connected));

        let actions = m.on_event(exec(ProcessSlot::Server, ProcessResult::ErrorExec));
        assert!(matches!(actions.as_slice(), [Action::Signal(Signal::Ended { .. })]));
        assert_eq!(m.state(), ConnectionState::Stopped);

        // Nothing is left to release once the server has exited.
        let stop = m.on_event(ServerEvent::Stop);
        assert!(stop.is_empty());
    }

    #[test]
    fn stop_while_running_cleans_up_everything() {
        let mut m = machine(false, RetryPolicy::default());
        to_forward_running(&mut m);
        let actions = m.on_event(ServerEvent::Stop);
        assert_eq!(
            actions,
            vec![
                Action::CancelConnectTimer,
                Action::CloseChannels,
                Action::KillServer,
                Action::RunDetached(AdbCommand::forward_remove("R58M", 27183)),
                Action::CloseListener,
            ]
        );
        assert_eq!(m.state(), ConnectionState::Stopped);
        assert!(m.on_event(exec(ProcessSlot::Server, ProcessResult::ErrorExec)).is_empty());
    }
}
