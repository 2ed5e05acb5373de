//! # GrblKit
//!
//! A controller for CNC machines running GRBL 1.1 firmware over a serial link:
//! - Connection handshake with DTR reset and banner detection
//! - Character-counting style flow control with a line threshold
//! - Program streaming with pause, resume and stop
//! - Live machine status, alarms and device settings
//!
//! ## Architecture
//!
//! GrblKit is organized as a workspace with multiple crates:
//!
//! 1. **grblkit-core** - Data model, errors, the controller trait, the event bus
//! 2. **grblkit-communication** - Serial transport, GRBL protocol, the controller
//! 3. **grblkit-settings** - Configuration files
//! 4. **grblkit** - Command line binary that integrates all crates

pub use grblkit_communication::firmware;

pub use grblkit_core::{
    AlarmCode, CommandOutcome, ConnectionError, ControllerError, ControllerEvent,
    ControllerTrait, Coordinates, Error, ErrorCode, EventBus, EventCategory, EventFilter,
    JobPhase, JobSummary, MachineState, Result, StatusSnapshot, SubscriptionId,
};

pub use grblkit_communication::{
    list_ports, ConnectionParams, ControllerConfig, GrblController, MockConnector, MockLink,
    OverrideAdjustment, RealtimeCommand, SerialParity, SerialPortInfo,
};

pub use grblkit_settings::{Config, ConnectionSettings, ControllerSettings, LoggingSettings};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Initialize logging
///
/// Sets up structured logging on stderr with:
/// - `RUST_LOG` support, falling back to `level`
/// - Pretty or JSON formatting
pub fn init_logging(level: &str, json: bool) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level)?,
    };

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        let fmt_layer = fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_names(true);
        registry.with(fmt_layer).try_init()?;
    } else {
        let fmt_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_level(true)
            .with_thread_names(true)
            .with_line_number(true)
            .pretty();
        registry.with(fmt_layer).try_init()?;
    }

    Ok(())
}

/// One line of console output for an event, or `None` for events that
/// are too frequent to print
pub fn describe_event(event: &ControllerEvent) -> Option<String> {
    match event {
        ControllerEvent::Status(_) => None,
        ControllerEvent::JobCompleted(summary) | ControllerEvent::JobStopped(summary) => {
            Some(format!(
                "{} in {:.1}s",
                event.description(),
                summary.elapsed().num_milliseconds() as f64 / 1000.0
            ))
        }
        other => Some(other.description()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_info() {
        assert!(!VERSION.is_empty());
        assert!(!BUILD_DATE.is_empty());
    }

    #[test]
    fn test_describe_event_skips_status() {
        assert!(describe_event(&ControllerEvent::Status(StatusSnapshot::default())).is_none());
        assert!(describe_event(&ControllerEvent::Message("[MSG:Reset to continue]".into()))
            .is_some_and(|line| line.contains("Reset to continue")));
    }
}
