//! Command execution on the device
//!
//! Receives commands from the controller, drives the actuator and builds
//! the replies.

mod executor;

pub use executor::CommandExecutor;
