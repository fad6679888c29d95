use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DroidLinkError {
    #[error("Connection failed: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Session ended: {reason}")]
    SessionEnded { reason: String },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Demuxer error: {0}")]
    Demux(#[from] DemuxError),

    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Could not listen on port {port}: {source}")]
    Bind { port: u16, source: std::io::Error },

    #[error("Could not connect to port {port}: {source}")]
    Connect { port: u16, source: std::io::Error },

    #[error("Timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Socket I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The remote side sent something this side refuses to guess about.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Packet header announced a zero-length payload")]
    ZeroLengthPacket,

    #[error("Truncated device metadata: expected {expected} bytes, got {got}")]
    TruncatedMetadata { expected: usize, got: usize },

    #[error("Truncated packet: expected {expected} bytes, got {got}")]
    TruncatedPacket { expected: usize, got: usize },
}

#[derive(Error, Debug)]
pub enum DemuxError {
    #[error("Could not allocate {len} bytes for a packet")]
    AllocationFailed { len: usize },

    #[error("Frame parser failed: {reason}")]
    Parser { reason: String },

    #[error("Packet consumer rejected unit: {reason}")]
    Sink { reason: String },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("Video socket error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Executable not found: {path}")]
    MissingBinary { path: PathBuf },

    #[error("Failed to start {program}: {reason}")]
    StartFailed { program: String, reason: String },

    #[error("Command exited with {code:?}: {stderr}")]
    ExecFailed { code: Option<i32>, stderr: String },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No usable {what} found (tried: {tried})")]
    NotFound { what: &'static str, tried: String },

    #[error("Configuration invalid: {reason}")]
    Invalid { reason: String },

    #[error("Could not parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Could not read configuration: {0}")]
    Io(#[from] std::io::Error),
}
