//! # GrblKit Communication
//!
//! Serial transport and GRBL firmware support for GrblKit.
//! The serial channel sits behind the [`SerialLink`] trait so the controller
//! runs unchanged against hardware or the in-memory [`MockLink`].

pub mod communication;
pub mod firmware;

pub use communication::{
    handshake, list_ports, CommandScheduler, CommandSchedulerConfig, ConnectionParams,
    Connector, HandshakeConfig, LineOrigin, MockConnector, MockInput, MockLink, QueuedLine,
    RealSerialPort, RetiredLine, SerialConnector, SerialLink, SerialParity, SerialPortInfo,
};

pub use firmware::grbl::{
    parse_response, ControllerConfig, DecodeError, GrblController, GrblResponse,
    OverrideAdjustment, RealtimeCommand, StatusReport,
};
pub use firmware::{DeviceSettings, FirmwareSetting};
