//! Fingerbot controller service
//!
//! Devices connect over a length-framed TCP stream or a WebSocket; the
//! transport registry tracks which connection currently represents each
//! device. Actions reach devices through the command dispatcher, either on
//! demand over HTTP or from time-of-day schedules armed in the schedule
//! engine.

pub mod command;
pub mod config;
pub mod error;
pub mod http;
pub mod schedule;
pub mod session;

pub use command::{CommandDispatcher, CommandSink, PendingRequests};
pub use config::ServerConfig;
pub use error::{DispatchError, ScheduleError};
pub use schedule::{ScheduleEngine, ScheduleRecord};
pub use session::{DeviceHandle, TransportKind, TransportRegistry};
