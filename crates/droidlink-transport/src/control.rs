use droidlink_control::{ControlCommand, ControlLimits};
use droidlink_core::TransportError;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, warn};

// ── ControlChannel ────────────────────────────────────────────────────────────

/// Write side of the control connection.
///
/// Once a write fails the channel is marked closed and every later
/// [`send`](Self::send) fails fast with [`TransportError::ConnectionClosed`].
#[derive(Debug)]
pub struct ControlChannel {
    stream: TcpStream,
    limits: ControlLimits,
    closed: bool,
    sent: u64,
}

impl ControlChannel {
    pub fn new(stream: TcpStream) -> Self {
        Self::with_limits(stream, ControlLimits::default())
    }

    pub fn with_limits(stream: TcpStream, limits: ControlLimits) -> Self {
        let _ = stream.set_nodelay(true);
        Self { stream, limits, closed: false, sent: 0 }
    }

    /// Serialize `command` and write it in full.
    pub async fn send(&mut self, command: &ControlCommand) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::ConnectionClosed);
        }

        let bytes = command.serialize_with(&self.limits);
        let result = async {
            self.stream.write_all(&bytes).await?;
            self.stream.flush().await
        }
        .await;

        match result {
            Ok(()) => {
                self.sent += 1;
                debug!("control: sent {:?} ({} bytes)", command.message_type(), bytes.len());
                Ok(())
            }
            Err(e) => {
                warn!("control: write failed, closing channel: {}", e);
                self.closed = true;
                Err(TransportError::ConnectionClosed)
            }
        }
    }

    /// Drop the byte a forward-mode server may have written on accept, if it
    /// has already arrived. Never waits; returns whether a byte was dropped.
    pub fn discard_dummy_byte(&mut self) -> bool {
        let mut byte = [0u8; 1];
        matches!(self.stream.try_read(&mut byte), Ok(1))
    }

    pub fn limits(&self) -> &ControlLimits {
        &self.limits
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Number of messages written successfully.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Shut the connection down. Idempotent.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.stream.shutdown().await;
        debug!("control: closed after {} messages", self.sent);
    }
}
