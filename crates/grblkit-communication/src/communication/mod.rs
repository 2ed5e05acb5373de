//! Serial channel abstraction
//!
//! The controller never touches a port directly. It goes through
//! [`SerialLink`], implemented by [`serial::RealSerialPort`] for hardware and
//! by [`mock::MockLink`] for tests, and obtains links from a [`Connector`].

pub mod buffered;
pub mod mock;
pub mod serial;
pub mod transport;

pub use buffered::{
    CommandScheduler, CommandSchedulerConfig, LineOrigin, QueuedLine, RetiredLine,
};
pub use mock::{MockConnector, MockInput, MockLink};
pub use serial::{list_ports, RealSerialPort, SerialConnector, SerialPortInfo};
pub use transport::{handshake, HandshakeConfig, LineReader, SharedLink};

use grblkit_core::Result;
use serde::{Deserialize, Serialize};
use std::io;

/// Serial parity setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SerialParity {
    /// No parity
    #[default]
    None,
    /// Even parity
    Even,
    /// Odd parity
    Odd,
}

/// Parameters for opening a serial link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionParams {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits (5-8)
    pub data_bits: u8,
    /// Stop bits (1 or 2)
    pub stop_bits: u8,
    /// Parity
    pub parity: SerialParity,
    /// Hardware flow control
    pub flow_control: bool,
    /// Read timeout in milliseconds; keeps the reader responsive to shutdown
    pub read_timeout_ms: u64,
}

impl ConnectionParams {
    /// Parameters for a port with GRBL's defaults
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            ..Self::default()
        }
    }
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: 115200,
            data_bits: 8,
            stop_bits: 1,
            parity: SerialParity::None,
            flow_control: false,
            read_timeout_ms: 50,
        }
    }
}

/// A bidirectional byte channel to the device
///
/// `read` returns `Ok(0)` or an `io::ErrorKind::TimedOut` error when no data
/// arrived within the link's read timeout; both mean "try again". Any other
/// error means the link is gone.
pub trait SerialLink: Send {
    /// Port name for logging
    fn name(&self) -> &str;

    /// Read whatever bytes are available
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write every byte
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Discard both input and output buffers
    fn clear_buffers(&mut self) -> io::Result<()>;

    /// Toggle DTR to reset the device
    fn pulse_reset(&mut self) -> io::Result<()>;

    /// Second handle to the same port, so reading and writing can proceed
    /// from different contexts
    fn try_clone_link(&self) -> io::Result<Box<dyn SerialLink>>;
}

/// Opens links
pub trait Connector: Send + Sync {
    /// Open a link with the given parameters
    fn open(&self, params: &ConnectionParams) -> Result<Box<dyn SerialLink>>;
}

/// Whether a read error just means no data arrived in time
pub fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}
