//! Firmware support
//!
//! Only GRBL 1.1 is implemented. `settings` holds the device's `$n` table as
//! reported by `$$`.

pub mod grbl;
pub mod settings;

pub use settings::{DeviceSettings, FirmwareSetting};
