//! droidlink-server: bringing up the device server
//!
//! Pushes the server jar, opens an adb tunnel (reverse first, forward as
//! fallback), launches the server and connects the video and control
//! sockets.
//!
//! # Layers
//! ```text
//! connect() ──► Driver (tokio tasks, sockets, timers)
//!                 │  ServerEvent ▲        │ Action
//!                 ▼              │        ▼
//!               ServerMachine (pure)   AdbRunner ──► adb
//! ```
//!
//! The machine decides, the driver performs. Tests drive the machine
//! directly and swap the [`AdbRunner`] for a scripted one.

pub mod adb;
pub mod driver;
pub mod machine;

pub use adb::{
    parse_device_ip, parse_device_serials, run_to_completion, AdbCommand, AdbRunner, ProcessHandle,
    ProcessReport, ProcessResult, ReportFn, TokioAdbRunner,
};
pub use driver::{connect, ServerHandle, Session};
pub use machine::{
    Action, ConnectOutcome, ProcessSlot, ServerEvent, ServerMachine, Signal, LISTEN_BACKLOG,
};
