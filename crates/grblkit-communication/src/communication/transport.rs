//! Line framing and the connection handshake
//!
//! GRBL speaks `\n`-terminated UTF-8 lines (answers end in `\r\n`) with
//! single real-time bytes mixed into the host-to-device direction. This module
//! owns the framing in both directions and the reset-and-banner handshake
//! that opens a session.

use super::{is_timeout, ConnectionParams, Connector, SerialLink};
use grblkit_core::{ConnectionError, Result};
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Write half of a link, shared by the writer, the poller and the facade
pub type SharedLink = Arc<Mutex<Box<dyn SerialLink>>>;

/// Frames incoming bytes into lines
pub struct LineReader {
    link: Box<dyn SerialLink>,
    pending: Vec<u8>,
    scratch: [u8; 256],
}

impl LineReader {
    /// Wrap the read half of a link
    pub fn new(link: Box<dyn SerialLink>) -> Self {
        Self {
            link,
            pending: Vec::new(),
            scratch: [0; 256],
        }
    }

    /// Port name
    pub fn name(&self) -> &str {
        self.link.name()
    }

    fn take_line(&mut self) -> Option<String> {
        let end = self.pending.iter().position(|&b| b == b'\n')?;
        let raw: Vec<u8> = self.pending.drain(..=end).collect();
        let line = String::from_utf8_lossy(&raw[..end]);
        Some(line.trim_end_matches('\r').to_string())
    }

    /// Next complete line, or `Ok(None)` if none arrived within the link's
    /// read timeout. Errors other than timeouts mean the link is gone.
    pub fn read_line(&mut self) -> io::Result<Option<String>> {
        loop {
            if let Some(line) = self.take_line() {
                return Ok(Some(line));
            }
            match self.link.read(&mut self.scratch) {
                Ok(0) => return Ok(None),
                Ok(n) => self.pending.extend_from_slice(&self.scratch[..n]),
                Err(e) if is_timeout(&e) => return Ok(None),
                Err(e) => return Err(e),
            }
        }
    }
}

/// Write one line followed by `\n`
pub fn write_line(link: &SharedLink, line: &str) -> io::Result<()> {
    let mut framed = Vec::with_capacity(line.len() + 1);
    framed.extend_from_slice(line.as_bytes());
    framed.push(b'\n');
    link.lock().write_all(&framed)
}

/// Write one unframed real-time byte
pub fn write_realtime(link: &SharedLink, byte: u8) -> io::Result<()> {
    link.lock().write_all(&[byte])
}

/// Handshake parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeConfig {
    /// Text the startup banner must contain
    pub signature: String,
    /// Wait after the reset pulse before talking to the device
    pub settle: Duration,
    /// How long to wait for the banner
    pub timeout: Duration,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            signature: "Grbl".to_string(),
            settle: Duration::from_secs(2),
            timeout: Duration::from_secs(5),
        }
    }
}

/// An open, identified session
pub struct Handshake {
    /// Write half
    pub writer: Box<dyn SerialLink>,
    /// Read half
    pub reader: LineReader,
    /// The banner line that matched the signature
    pub banner: String,
    /// Lines that followed the banner during the handshake, for the decoder
    pub trailing: Vec<String>,
}

fn serial_error(context: &str, e: io::Error) -> ConnectionError {
    ConnectionError::SerialError {
        reason: format!("{}: {}", context, e),
    }
}

/// Open a link, reset the device and wait for its banner.
///
/// Blocking; run it off the async runtime.
pub fn handshake(
    connector: &dyn Connector,
    params: &ConnectionParams,
    config: &HandshakeConfig,
) -> Result<Handshake> {
    let mut link = connector.open(params)?;
    link.clear_buffers()
        .map_err(|e| serial_error("clear buffers", e))?;
    link.pulse_reset()
        .map_err(|e| serial_error("reset pulse", e))?;
    std::thread::sleep(config.settle);
    link.write_all(b"\n")
        .map_err(|e| serial_error("wake-up line", e))?;

    let writer = link
        .try_clone_link()
        .map_err(|e| serial_error("clone port", e))?;
    let mut reader = LineReader::new(link);

    let deadline = Instant::now() + config.timeout;
    let banner = loop {
        match reader.read_line() {
            Ok(Some(line)) if line.contains(&config.signature) => break line,
            Ok(Some(line)) => tracing::debug!("Handshake skipped '{}'", line),
            Ok(None) => {}
            Err(e) => return Err(serial_error("read", e).into()),
        }
        if Instant::now() >= deadline {
            tracing::warn!(
                "No '{}' banner from {} within {:?}",
                config.signature,
                params.port,
                config.timeout
            );
            return Err(ConnectionError::HandshakeFailed {
                port: params.port.clone(),
                signature: config.signature.clone(),
                timeout_ms: config.timeout.as_millis() as u64,
            }
            .into());
        }
    };

    // The wake-up line earns an `ok` that no queued command owns
    let mut trailing = Vec::new();
    loop {
        match reader.read_line() {
            Ok(Some(line)) if line == "ok" => break,
            Ok(Some(line)) => trailing.push(line),
            Ok(None) => break,
            Err(e) => return Err(serial_error("read", e).into()),
        }
    }

    tracing::info!("Connected to {} ({})", params.port, banner);
    Ok(Handshake {
        writer,
        reader,
        banner,
        trailing,
    })
}
