//! Time-of-day schedules that fire actions at devices
//!
//! This module handles:
//! - Normalizing persisted schedule records (time of day, repeat pattern)
//! - Computing fire times in one configured zone
//! - Arming, re-arming and disarming one timer per schedule

mod engine;
mod record;
mod recurrence;
mod repeat;
mod state;

pub use engine::ScheduleEngine;
pub use record::{load_records, parse_records, RepeatSpec, Schedule, ScheduleRecord};
pub use recurrence::{next_fire, AnchoredClock, Clock, SystemClock};
pub use repeat::{Repeat, TimeOfDay, WeekdaySet};
pub use state::{TimerEvent, TimerLifecycle, TimerState, TransitionResult};
