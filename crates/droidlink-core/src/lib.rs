pub mod buffer;
pub mod config;
pub mod errors;
pub mod types;

pub use config::{CaptureOrientationLock, RetryPolicy, ReverseFallback, ServerParams, ToolPaths};
pub use errors::{
    ConfigError, DemuxError, DroidLinkError, ProcessError, ProtocolError, TransportError,
};
pub use types::*;
