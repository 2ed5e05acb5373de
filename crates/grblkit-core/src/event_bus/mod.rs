//! # Event Bus Module
//!
//! Ordered publish/subscribe registry for controller notifications.
//!
//! - Handlers run synchronously on the publishing thread, in subscription order
//! - A panicking handler is logged and skipped; later handlers still run
//! - Subscriptions filter by [`EventCategory`]
//! - Async consumers can take a broadcast receiver instead
//!
//! ## Usage
//!
//! ```rust,ignore
//! use grblkit_core::event_bus::{ControllerEvent, EventBus, EventCategory, EventFilter};
//!
//! let bus = EventBus::new();
//! let subscription = bus.subscribe(
//!     EventFilter::Categories(vec![EventCategory::Alarm]),
//!     |event| {
//!         if let ControllerEvent::Alarm(code) = event {
//!             eprintln!("alarm: {:?}", code);
//!         }
//!     },
//! );
//!
//! bus.unsubscribe(subscription);
//! ```

mod bus;
mod events;

pub use bus::*;
pub use events::*;
