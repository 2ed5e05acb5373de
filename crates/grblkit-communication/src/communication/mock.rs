//! In-memory serial link
//!
//! `MockLink` stands in for a device in tests and demos. Bytes written to it
//! are framed the way GRBL frames them: real-time bytes are picked off
//! immediately and everything else is collected into `\n`-terminated lines.
//! A responder closure sees each framed line and each real-time byte and
//! returns the lines the simulated device answers with.
//!
//! Clones share state, so a test can keep one handle while the controller
//! owns another.

use super::{ConnectionParams, Connector, SerialLink};
use crate::firmware::grbl::realtime::RealtimeCommand;
use grblkit_core::{ConnectionError, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::Duration;

/// What the simulated device just received
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockInput<'a> {
    /// A complete line, CR and LF stripped
    Line(&'a str),
    /// A real-time byte
    Realtime(u8),
}

type Responder = Box<dyn FnMut(MockInput<'_>) -> Vec<String> + Send>;

#[derive(Default)]
struct MockState {
    inbound: VecDeque<u8>,
    partial: Vec<u8>,
    lines: Vec<String>,
    realtime: Vec<u8>,
    banner: Option<String>,
    responder: Option<Responder>,
    refused: Vec<u8>,
    closed: bool,
}

impl MockState {
    fn push_inbound(&mut self, line: &str) {
        self.inbound.extend(line.as_bytes());
        self.inbound.extend(b"\r\n");
    }

    fn respond(&mut self, input: MockInput<'_>) {
        let Some(mut responder) = self.responder.take() else {
            return;
        };
        for reply in responder(input) {
            self.push_inbound(&reply);
        }
        self.responder = Some(responder);
    }

    fn queue_banner(&mut self) {
        if let Some(banner) = self.banner.clone() {
            self.push_inbound(&banner);
        }
    }
}

struct Shared {
    state: Mutex<MockState>,
    readable: Condvar,
}

/// Simulated serial link
#[derive(Clone)]
pub struct MockLink {
    name: String,
    read_timeout: Duration,
    shared: Arc<Shared>,
}

impl MockLink {
    /// Create a silent link
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            read_timeout: Duration::from_millis(20),
            shared: Arc::new(Shared {
                state: Mutex::new(MockState::default()),
                readable: Condvar::new(),
            }),
        }
    }

    /// Line sent after a DTR pulse or a soft reset
    pub fn with_banner(self, banner: impl Into<String>) -> Self {
        self.shared.state.lock().banner = Some(banner.into());
        self
    }

    /// Install the device behaviour
    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(MockInput<'_>) -> Vec<String> + Send + 'static,
    {
        self.shared.state.lock().responder = Some(Box::new(responder));
    }

    /// Inject an unsolicited line from the device
    pub fn push_line(&self, line: &str) {
        self.shared.state.lock().push_inbound(line);
        self.shared.readable.notify_all();
    }

    /// Every line the host has written so far
    pub fn written_lines(&self) -> Vec<String> {
        self.shared.state.lock().lines.clone()
    }

    /// Every real-time byte the host has written so far
    pub fn realtime_bytes(&self) -> Vec<u8> {
        self.shared.state.lock().realtime.clone()
    }

    /// Simulate the cable being pulled: reads and writes fail from now on
    pub fn close(&self) {
        self.shared.state.lock().closed = true;
        self.shared.readable.notify_all();
    }

    /// Fail any write containing `byte`; other traffic keeps flowing
    pub fn refuse_byte(&self, byte: u8) {
        self.shared.state.lock().refused.push(byte);
    }

    fn broken() -> io::Error {
        io::Error::new(io::ErrorKind::BrokenPipe, "mock link closed")
    }
}

impl std::fmt::Debug for MockLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockLink").field("name", &self.name).finish()
    }
}

impl SerialLink for MockLink {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.shared.state.lock();
        if state.inbound.is_empty() && !state.closed {
            self.shared
                .readable
                .wait_for(&mut state, self.read_timeout);
        }
        if state.closed {
            return Err(Self::broken());
        }
        if state.inbound.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(state.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(state.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let mut state = self.shared.state.lock();
        if state.closed {
            return Err(Self::broken());
        }
        if data.iter().any(|b| state.refused.contains(b)) {
            return Err(io::Error::new(io::ErrorKind::Other, "write refused"));
        }
        for &byte in data {
            if RealtimeCommand::is_realtime_byte(byte) {
                state.realtime.push(byte);
                if byte == RealtimeCommand::Reset.byte() {
                    state.partial.clear();
                    state.queue_banner();
                }
                state.respond(MockInput::Realtime(byte));
            } else if byte == b'\n' {
                let raw = std::mem::take(&mut state.partial);
                let line = String::from_utf8_lossy(&raw).trim_end_matches('\r').to_string();
                state.lines.push(line.clone());
                state.respond(MockInput::Line(&line));
            } else {
                state.partial.push(byte);
            }
        }
        drop(state);
        self.shared.readable.notify_all();
        Ok(())
    }

    fn clear_buffers(&mut self) -> io::Result<()> {
        let mut state = self.shared.state.lock();
        state.inbound.clear();
        state.partial.clear();
        Ok(())
    }

    fn pulse_reset(&mut self) -> io::Result<()> {
        let mut state = self.shared.state.lock();
        if state.closed {
            return Err(Self::broken());
        }
        state.partial.clear();
        state.queue_banner();
        drop(state);
        self.shared.readable.notify_all();
        Ok(())
    }

    fn try_clone_link(&self) -> io::Result<Box<dyn SerialLink>> {
        Ok(Box::new(self.clone()))
    }
}

/// Hands out clones of one [`MockLink`]
#[derive(Debug, Clone)]
pub struct MockConnector {
    link: MockLink,
}

impl MockConnector {
    /// Connector that always opens `link`
    pub fn new(link: MockLink) -> Self {
        Self { link }
    }
}

impl Connector for MockConnector {
    fn open(&self, params: &ConnectionParams) -> Result<Box<dyn SerialLink>> {
        if self.link.shared.state.lock().closed {
            return Err(ConnectionError::FailedToOpen {
                port: params.port.clone(),
                reason: "mock link closed".to_string(),
            }
            .into());
        }
        Ok(Box::new(self.link.clone()))
    }
}
