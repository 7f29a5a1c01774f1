//! Persisted schedule records and their validated form

use anyhow::{Context, Result};
use fingerbot_shared::Action;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

use super::repeat::{Repeat, TimeOfDay};
use crate::error::ScheduleError;

/// `repeat` as stored: a pattern string or a list of day tokens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RepeatSpec {
    Text(String),
    Days(Vec<String>),
}

impl Default for RepeatSpec {
    fn default() -> Self {
        RepeatSpec::Text(String::new())
    }
}

impl RepeatSpec {
    pub fn normalize(&self) -> Repeat {
        match self {
            RepeatSpec::Text(text) => Repeat::parse(text),
            RepeatSpec::Days(days) => Repeat::from_list(days),
        }
    }
}

/// A schedule as the owning collaborator stores it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleRecord {
    #[serde(default, alias = "schedule_id")]
    pub id: String,
    pub device_id: String,
    pub action: String,
    pub time: String,
    #[serde(default)]
    pub repeat: RepeatSpec,
}

impl ScheduleRecord {
    pub fn new(
        id: impl Into<String>,
        device_id: impl Into<String>,
        action: impl Into<String>,
        time: impl Into<String>,
        repeat: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            device_id: device_id.into(),
            action: action.into(),
            time: time.into(),
            repeat: RepeatSpec::Text(repeat.into()),
        }
    }

    /// Check the record and resolve it into something a timer can run
    pub fn validate(&self) -> Result<Schedule, ScheduleError> {
        let time: TimeOfDay = self.time.parse()?;
        let action = Action::from_name(self.action.trim());
        if !action.is_known() {
            return Err(ScheduleError::UnknownAction(self.action.clone()));
        }

        Ok(Schedule {
            id: self.id.clone(),
            device_id: self.device_id.clone(),
            action,
            time,
            repeat: self.repeat.normalize(),
        })
    }
}

/// A validated schedule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    pub id: String,
    pub device_id: String,
    pub action: Action,
    pub time: TimeOfDay,
    pub repeat: Repeat,
}

/// Parse a schedules document: either an object keyed by schedule id or a
/// plain list of records. Records without an id take their key.
pub fn parse_records(json: &str) -> Result<Vec<ScheduleRecord>, serde_json::Error> {
    let value: Value = serde_json::from_str(json)?;
    match value {
        Value::Array(_) => serde_json::from_value(value),
        _ => {
            let keyed: BTreeMap<String, ScheduleRecord> = serde_json::from_value(value)?;
            Ok(keyed
                .into_iter()
                .map(|(key, mut record)| {
                    if record.id.is_empty() {
                        record.id = key;
                    }
                    record
                })
                .collect())
        }
    }
}

/// Read persisted records from disk
pub fn load_records(path: &Path) -> Result<Vec<ScheduleRecord>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read schedules from {}", path.display()))?;
    parse_records(&text).with_context(|| format!("invalid schedules file {}", path.display()))
}
