//! GrblKit Settings Crate
//!
//! Loads, validates and saves the application configuration and turns it into
//! a [`grblkit_communication::ControllerConfig`].

pub mod config;
pub mod error;

pub use config::{Config, ConnectionSettings, ControllerSettings, LoggingSettings};
pub use error::{ConfigError, SettingsError, SettingsResult};
