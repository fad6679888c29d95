use std::io::{self, Read};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::{Duration, Instant};

use droidlink_core::{
    DeviceMetadata, DroidLinkError, ProtocolError, TransportError, DEVICE_METADATA_LENGTH,
};
use tracing::{debug, info};

// ── VideoSocket ───────────────────────────────────────────────────────────────

/// Blocking view of the video connection.
///
/// Reads block the calling thread; use it from the demuxer worker thread or
/// from `spawn_blocking`, never from an async task.
#[derive(Debug)]
pub struct VideoSocket {
    stream: TcpStream,
}

impl VideoSocket {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    /// Take over a tokio stream, switching it back to blocking mode.
    pub fn from_tokio(stream: tokio::net::TcpStream) -> io::Result<Self> {
        let stream = stream.into_std()?;
        stream.set_nonblocking(false)?;
        Ok(Self { stream })
    }

    /// Fill `buf` completely, blocking without a deadline.
    ///
    /// Returns the number of bytes read; less than `buf.len()` means the peer
    /// closed the stream.
    pub fn recv_exact(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.set_read_timeout(None)?;
        let mut filled = 0;
        while filled < buf.len() {
            match self.stream.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    /// Read until at least `min` bytes are in `buf` or `timeout` elapses.
    ///
    /// Never reads past `buf.len()`. Returns how many bytes were stored.
    pub fn read_at_least(
        &mut self,
        buf: &mut [u8],
        min: usize,
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        let min = min.min(buf.len());
        let deadline = Instant::now() + timeout;
        let mut filled = 0;

        while filled < min {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::Timeout { ms: timeout.as_millis() as u64 });
            }
            self.stream.set_read_timeout(Some(remaining))?;
            match self.stream.read(&mut buf[filled..]) {
                Ok(0) => {
                    self.stream.set_read_timeout(None)?;
                    return if filled == 0 {
                        Err(TransportError::ConnectionClosed)
                    } else {
                        Ok(filled)
                    };
                }
                Ok(n) => filled += n,
                Err(e) if is_timeout(&e) => {
                    self.stream.set_read_timeout(None)?;
                    return Err(TransportError::Timeout { ms: timeout.as_millis() as u64 });
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        self.stream.set_read_timeout(None)?;
        Ok(filled)
    }

    /// Read whatever is already buffered, without blocking. `Ok(0)` means
    /// nothing was available.
    pub fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.set_nonblocking(true)?;
        let result = match self.stream.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            other => other,
        };
        self.stream.set_nonblocking(false)?;
        result
    }

    /// Read and decode the device metadata block at the head of the stream.
    pub fn read_metadata(&mut self, timeout: Duration) -> Result<DeviceMetadata, DroidLinkError> {
        let started = Instant::now();
        let mut buf = [0u8; DEVICE_METADATA_LENGTH];
        let len = self.read_at_least(&mut buf, DEVICE_METADATA_LENGTH, timeout)?;
        if len < DEVICE_METADATA_LENGTH {
            info!("Could not retrieve device information ({} bytes)", len);
            return Err(ProtocolError::TruncatedMetadata {
                expected: DEVICE_METADATA_LENGTH,
                got: len,
            }
            .into());
        }
        debug!("device metadata read in {:?}", started.elapsed());
        Ok(DeviceMetadata::parse(&buf)?)
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }

    pub fn try_clone(&self) -> io::Result<Self> {
        Ok(Self { stream: self.stream.try_clone()? })
    }

    /// Close both directions; a thread blocked in a read observes end of stream.
    pub fn shutdown(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

impl Read for VideoSocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}
