//! Monitor loop
//!
//! This module handles:
//! - Connecting and reconnecting the device link
//! - Draining lines, answering time requests and persisting readings
//! - Cooperative shutdown at tick boundaries

mod components;
mod runner;

pub use components::{ComponentError, Components};
pub use runner::{Monitor, MonitorSettings, TickOutcome};
