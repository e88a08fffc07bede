//! Link session with the adapter.
//!
//! A [`LinkSession`] exclusively owns one open [`Port`] and moves whole frames
//! and fixed-length payloads across it. The protocol has no length prefixes or
//! resynchronization markers, so every read asks for an exact byte count and
//! either gets all of it or fails.

use std::io::{ErrorKind, Read};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::{ACK_LEN, AckFrame, CommandFrame};

/// Upper bound for a single blocking port read.
///
/// Long waits are split into slices of this size so the interrupt checker is
/// consulted while the device is silent.
const READ_SLICE: Duration = Duration::from_millis(100);

/// Port timeout used in poll mode.
const POLL_SLICE: Duration = Duration::from_millis(1);

/// Pause after a read that returned no data.
const IDLE_BACKOFF: Duration = Duration::from_millis(1);

/// How long a read may wait for the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadTimeout {
    /// Wait indefinitely.
    Blocking,
    /// Fail once the duration has elapsed without the full byte count.
    After(Duration),
    /// Take whatever is already buffered and fail if it is not enough.
    Poll,
}

impl ReadTimeout {
    /// Build from milliseconds, treating 0 as [`ReadTimeout::Blocking`].
    pub fn from_millis(ms: u64) -> Self {
        if ms == 0 {
            Self::Blocking
        } else {
            Self::After(Duration::from_millis(ms))
        }
    }

    fn port_slice(self) -> Duration {
        match self {
            Self::Blocking => READ_SLICE,
            Self::After(limit) => limit.min(READ_SLICE),
            Self::Poll => POLL_SLICE,
        }
    }
}

impl Default for ReadTimeout {
    fn default() -> Self {
        Self::After(Duration::from_secs(2))
    }
}

/// Session behaviour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionConfig {
    /// Read timeout applied to every exact-length read.
    pub timeout: ReadTimeout,
    /// Reject acknowledgements that are not a verbatim echo of the command.
    pub strict_echo: bool,
}

impl SessionConfig {
    /// Set the read timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: ReadTimeout) -> Self {
        self.timeout = timeout;
        self
    }

    /// Enable or disable strict echo checking.
    #[must_use]
    pub fn with_strict_echo(mut self, strict_echo: bool) -> Self {
        self.strict_echo = strict_echo;
        self
    }
}

/// An open, exclusively owned connection to the adapter.
///
/// The port is closed by [`LinkSession::close`], or on drop if the session
/// was never closed explicitly.
pub struct LinkSession<P: Port> {
    port: P,
    config: SessionConfig,
    closed: bool,
}

#[cfg(feature = "native")]
impl LinkSession<crate::port::NativePort> {
    /// Open the named serial interface.
    ///
    /// Fails with [`Error::DeviceNotFound`] if the interface does not exist and
    /// [`Error::Connection`] if it cannot be configured.
    pub fn open(serial: &crate::port::SerialConfig, config: SessionConfig) -> Result<Self> {
        let port = crate::port::NativePort::open(serial)?;
        Self::with_config(port, config)
    }
}

impl<P: Port> LinkSession<P> {
    /// Wrap an already open port.
    pub fn new(port: P, timeout: ReadTimeout) -> Result<Self> {
        Self::with_config(port, SessionConfig::default().with_timeout(timeout))
    }

    /// Wrap an already open port with full session configuration.
    pub fn with_config(mut port: P, config: SessionConfig) -> Result<Self> {
        port.set_timeout(
            config
                .timeout
                .port_slice(),
        )?;
        // Drop bytes left over from a previous session or a board reset.
        port.clear_buffers()?;
        debug!(
            "Link session on {} ({} baud, {:?})",
            port.name(),
            port.baud_rate(),
            config.timeout
        );
        Ok(Self {
            port,
            config,
            closed: false,
        })
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Change the read timeout.
    pub fn set_timeout(&mut self, timeout: ReadTimeout) -> Result<()> {
        self.port
            .set_timeout(timeout.port_slice())?;
        self.config.timeout = timeout;
        Ok(())
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Get a mutable reference to the underlying port.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Write every byte or fail with [`Error::Write`].
    pub fn write_exact(&mut self, bytes: &[u8]) -> Result<()> {
        self.ensure_open()?;
        trace!("TX {} bytes", bytes.len());
        self.port
            .write_all_bytes(bytes)
    }

    /// Read exactly `len` bytes.
    ///
    /// On timeout the bytes that did arrive are returned inside
    /// [`Error::Timeout`]. End-of-stream from the transport is reported as
    /// [`Error::TruncatedResponse`].
    pub fn read_exact(&mut self, len: usize) -> Result<Vec<u8>> {
        self.ensure_open()?;

        let mut buf = vec![0u8; len];
        let mut filled = 0;
        let deadline = match self.config.timeout {
            ReadTimeout::After(limit) => Some(Instant::now() + limit),
            ReadTimeout::Blocking | ReadTimeout::Poll => None,
        };

        while filled < len {
            if crate::is_interrupted_requested() {
                return Err(Error::Interrupted);
            }

            match self
                .port
                .read(&mut buf[filled..])
            {
                Ok(n) if n > 0 => {
                    filled += n;
                    continue;
                },
                Ok(_) => {},
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                    ) => {},
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                    return Err(Error::TruncatedResponse {
                        expected: len,
                        actual: filled,
                    });
                },
                Err(e) => return Err(Error::Io(e)),
            }

            let expired = match self.config.timeout {
                ReadTimeout::Blocking => false,
                ReadTimeout::Poll => true,
                ReadTimeout::After(_) => deadline.is_some_and(|d| Instant::now() >= d),
            };
            if expired {
                debug!("Read timed out after {filled}/{len} bytes");
                buf.truncate(filled);
                return Err(Error::Timeout {
                    expected: len,
                    received: buf,
                });
            }
            thread::sleep(IDLE_BACKOFF);
        }

        trace!("RX {len} bytes");
        Ok(buf)
    }

    /// Send a command frame and read its acknowledgement.
    pub fn command(&mut self, frame: &CommandFrame) -> Result<AckFrame> {
        trace!("TX frame {frame}");
        self.write_exact(frame.as_bytes())?;
        let raw = self.read_exact(ACK_LEN)?;
        let ack = AckFrame::decode(&raw)?;

        if ack.is_echo_of(frame) {
            trace!("RX ack {ack:?}");
        } else if self.config.strict_echo {
            return Err(Error::Protocol(format!(
                "expected echo of {frame}, got {ack:?}"
            )));
        } else {
            warn!("Acknowledgement {ack:?} does not echo {frame}");
        }
        Ok(ack)
    }

    /// Send a command frame, read its acknowledgement, then read a payload of
    /// exactly `payload_len` bytes.
    pub fn transact(&mut self, frame: &CommandFrame, payload_len: usize) -> Result<Vec<u8>> {
        self.command(frame)?;
        if payload_len == 0 {
            return Ok(Vec::new());
        }
        self.read_exact(payload_len)
    }

    /// Send a command frame, read its acknowledgement, then stream `data` to
    /// the device.
    pub fn send_payload(&mut self, frame: &CommandFrame, data: &[u8]) -> Result<()> {
        self.command(frame)?;
        self.write_exact(data)
    }

    /// Close the underlying port. Further I/O fails with [`Error::Connection`].
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        debug!("Closing link session on {}", self.port.name());
        self.port
            .close()
    }

    /// Whether [`LinkSession::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::Connection(format!(
                "{} is closed",
                self.port.name()
            )));
        }
        Ok(())
    }
}

impl<P: Port> Drop for LinkSession<P> {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.close();
        }
    }
}
