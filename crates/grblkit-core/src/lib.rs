//! # GrblKit Core
//!
//! Core types, traits, and utilities for GrblKit.
//! Provides the controller abstraction, machine state and status models,
//! the alarm/error taxonomies, errors and the event bus.

pub mod core;
pub mod data;
pub mod error;
pub mod event_bus;

pub use crate::core::{CommandOutcome, ControllerTrait};

pub use data::{
    AlarmCode, Coordinates, ErrorCode, JobPhase, JobSummary, MachineState, Overrides, PinState,
    Position, StatusSnapshot,
};

pub use error::{ConnectionError, ControllerError, Error, Result};

// Re-export event bus for convenience
pub use event_bus::{
    ControllerEvent, EventBus, EventBusConfig, EventCategory, EventFilter, SubscriptionId,
};
