//! Serial Link.
//!
//! `SerialLink` is the trait the rest of the streaming core programs
//! against; [`Port`] is the real `serialport`-backed implementation (only
//! compiled with the `serial` feature), and [`MockLink`] is a
//! deterministic in-memory stand-in always available for controller tests.

use std::collections::VecDeque;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors from the serial link.
#[derive(Debug, Error)]
pub enum PortError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("read/write timed out")]
    Timeout,
    #[error("port is not open")]
    NotOpen,
    #[cfg(feature = "serial")]
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

/// Discovered serial port (only meaningful with the `serial` feature, but the
/// type itself is always available so callers can pass it around uniformly).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortInfo {
    pub name: String,
}

/// Accumulates raw bytes across reads and extracts complete, terminator-split
/// records. Handles `<...>` status payloads interleaved with `ok`/`error`
/// lines correctly because framing only depends on finding the next LF/CR —
/// no special-casing of record shape is needed.
#[derive(Default)]
pub struct LineFramer {
    buf: Vec<u8>,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds newly read bytes and returns every complete line now available,
    /// in arrival order. Partial trailing bytes are retained for next call.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut out = Vec::new();
        loop {
            let Some(pos) = self.buf.iter().position(|&b| b == b'\n' || b == b'\r') else {
                break;
            };
            let line_bytes: Vec<u8> = self.buf.drain(..=pos).collect();
            let mut end = line_bytes.len() - 1; // strip the terminator we matched on
            // Also swallow a following/preceding partner terminator (\r\n or \n\r).
            if end > 0 && matches!(line_bytes[end - 1], b'\n' | b'\r') {
                end -= 1;
            }
            let text = String::from_utf8_lossy(&line_bytes[..end]).into_owned();
            if !text.is_empty() {
                out.push(text);
            }
        }
        out
    }
}

/// The wire-level contract the rest of the streaming core uses. `write_line`
/// appends the LF terminator itself is the *caller's* job — implementations
/// send exactly the bytes given, since callers (source pipeline, controller)
/// already guarantee the trailing `\n` per the line policy.
pub trait SerialLink: Send {
    /// Writes a framed g-code/system line (already newline-terminated).
    /// Blocks until written or `timeout` elapses.
    fn write_line(&mut self, bytes: &[u8], timeout: Duration) -> Result<(), PortError>;
    /// Writes a single real-time byte with no terminator.
    fn write_realtime_byte(&mut self, b: u8) -> Result<(), PortError>;
    /// Blocks until one complete line is available or `timeout` elapses.
    fn read_line(&mut self, timeout: Duration) -> Result<String, PortError>;
    /// Drains any complete lines already buffered without blocking.
    fn try_read_lines(&mut self) -> Result<Vec<String>, PortError>;
}

/// Real serial port, backed by the `serialport` crate. 115200 8-N-1.
#[cfg(feature = "serial")]
pub struct Port {
    inner: Box<dyn serialport::SerialPort>,
    framer: LineFramer,
    pending: VecDeque<String>,
}

#[cfg(feature = "serial")]
impl Port {
    pub fn open(port_name: &str, baud_rate: u32) -> Result<Self, PortError> {
        let inner = serialport::new(port_name, baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .timeout(Duration::from_millis(50))
            .open()?;
        Ok(Self {
            inner,
            framer: LineFramer::new(),
            pending: VecDeque::new(),
        })
    }

    pub fn list_ports() -> Result<Vec<PortInfo>, PortError> {
        Ok(serialport::available_ports()?
            .into_iter()
            .map(|p| PortInfo { name: p.port_name })
            .collect())
    }

    fn read_some(&mut self) -> Result<usize, PortError> {
        let mut buf = [0u8; 256];
        match self.inner.read(&mut buf) {
            Ok(0) => Ok(0),
            Ok(n) => {
                let lines = self.framer.feed(&buf[..n]);
                self.pending.extend(lines);
                Ok(n)
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(PortError::Io(e)),
        }
    }
}

#[cfg(feature = "serial")]
impl SerialLink for Port {
    fn write_line(&mut self, bytes: &[u8], timeout: Duration) -> Result<(), PortError> {
        self.inner.set_timeout(timeout).ok();
        use std::io::Write;
        self.inner.write_all(bytes).map_err(|e| {
            if e.kind() == std::io::ErrorKind::TimedOut {
                PortError::Timeout
            } else {
                PortError::Io(e)
            }
        })
    }

    fn write_realtime_byte(&mut self, b: u8) -> Result<(), PortError> {
        use std::io::Write;
        self.inner.write_all(&[b]).map_err(PortError::Io)
    }

    fn read_line(&mut self, timeout: Duration) -> Result<String, PortError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(line) = self.pending.pop_front() {
                return Ok(line);
            }
            if Instant::now() >= deadline {
                return Err(PortError::Timeout);
            }
            self.read_some()?;
        }
    }

    fn try_read_lines(&mut self) -> Result<Vec<String>, PortError> {
        self.read_some()?;
        Ok(self.pending.drain(..).collect())
    }
}

/// Deterministic in-memory stand-in for [`SerialLink`], used by controller
/// and connection-manager tests. Tests enqueue canned inbound lines with
/// [`MockLink::push_inbound`] and assert against [`MockLink::written_lines`].
#[derive(Default)]
pub struct MockLink {
    pub written_lines: Vec<String>,
    pub written_realtime: Vec<u8>,
    pending: VecDeque<String>,
    pub fail_next_write: bool,
}

impl MockLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_inbound(&mut self, line: impl Into<String>) {
        self.pending.push_back(line.into());
    }
}

impl SerialLink for MockLink {
    fn write_line(&mut self, bytes: &[u8], _timeout: Duration) -> Result<(), PortError> {
        if self.fail_next_write {
            self.fail_next_write = false;
            return Err(PortError::Timeout);
        }
        self.written_lines
            .push(String::from_utf8_lossy(bytes).trim_end_matches('\n').to_string());
        Ok(())
    }

    fn write_realtime_byte(&mut self, b: u8) -> Result<(), PortError> {
        self.written_realtime.push(b);
        Ok(())
    }

    fn read_line(&mut self, _timeout: Duration) -> Result<String, PortError> {
        self.pending.pop_front().ok_or(PortError::Timeout)
    }

    fn try_read_lines(&mut self) -> Result<Vec<String>, PortError> {
        Ok(self.pending.drain(..).collect())
    }
}
