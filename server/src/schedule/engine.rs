//! Schedule engine: one cancellable timer task per armed schedule

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use fingerbot_shared::Params;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::record::{Schedule, ScheduleRecord};
use super::recurrence::{self, Clock, SystemClock};
use super::state::{TimerEvent, TimerLifecycle, TimerState, TransitionResult};
use crate::command::CommandSink;
use crate::error::{DispatchError, ScheduleError};

struct TimerEntry {
    generation: u64,
    schedule: Schedule,
    lifecycle: TimerLifecycle,
    next_fire: DateTime<Utc>,
    cancel: CancellationToken,
}

impl TimerEntry {
    fn cancel(&mut self) {
        self.cancel.cancel();
        if let TransitionResult::Invalid { from, event } = self.lifecycle.process_event(TimerEvent::Cancel) {
            debug!(schedule_id = %self.schedule.id, ?from, ?event, "Cancel on inactive timer");
        }
    }
}

struct EngineInner {
    sink: Arc<dyn CommandSink>,
    clock: Arc<dyn Clock>,
    timezone: Tz,
    timers: RwLock<HashMap<String, TimerEntry>>,
    generation: AtomicU64,
    shutdown: CancellationToken,
}

/// Arms, re-arms and disarms schedule timers and dispatches their actions
#[derive(Clone)]
pub struct ScheduleEngine {
    inner: Arc<EngineInner>,
}

impl ScheduleEngine {
    /// Engine evaluating times in `timezone` against the wall clock
    pub fn new(sink: Arc<dyn CommandSink>, timezone: Tz) -> Self {
        Self::with_clock(sink, timezone, Arc::new(SystemClock))
    }

    pub fn with_clock(sink: Arc<dyn CommandSink>, timezone: Tz, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                sink,
                clock,
                timezone,
                timers: RwLock::new(HashMap::new()),
                generation: AtomicU64::new(0),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn timezone(&self) -> Tz {
        self.inner.timezone
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    /// Arm (or re-arm) the timer for a record, replacing any existing timer
    /// for the same schedule id. Returns the first fire time.
    pub async fn arm(&self, record: &ScheduleRecord) -> Result<DateTime<Utc>, ScheduleError> {
        let schedule = record.validate()?;
        let first = recurrence::next_fire(self.now(), schedule.time, &schedule.repeat, self.inner.timezone)
            .ok_or_else(|| ScheduleError::InvalidTime(record.time.clone()))?;

        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let cancel = self.inner.shutdown.child_token();

        let mut lifecycle = TimerLifecycle::new();
        let mut timers = self.inner.timers.write().await;
        // Checked under the lock; shutdown cancels before it clears the table
        if self.inner.shutdown.is_cancelled() {
            debug!(schedule_id = %schedule.id, "Arm after shutdown refused");
            return Err(ScheduleError::Stopped);
        }
        if let Some(mut previous) = timers.remove(&schedule.id) {
            previous.cancel();
            lifecycle = previous.lifecycle;
            debug!(schedule_id = %schedule.id, "Replacing existing timer");
        }
        let event = if schedule.repeat.is_recurring() {
            TimerEvent::ArmRecurring
        } else {
            TimerEvent::ArmOnce
        };
        lifecycle.process_event(event);

        info!(
            schedule_id = %schedule.id,
            device_id = %schedule.device_id,
            action = %schedule.action,
            time = %schedule.time,
            repeat = %schedule.repeat,
            next_fire = %first.with_timezone(&self.inner.timezone),
            "Schedule armed"
        );

        let id = schedule.id.clone();
        timers.insert(
            id.clone(),
            TimerEntry {
                generation,
                schedule,
                lifecycle,
                next_fire: first,
                cancel: cancel.clone(),
            },
        );
        drop(timers);

        tokio::spawn(run_timer(self.inner.clone(), id, generation, cancel, first));
        Ok(first)
    }

    /// Cancel a schedule's timer. Unknown ids are a no-op.
    pub async fn disarm(&self, schedule_id: &str) -> bool {
        let removed = self.inner.timers.write().await.remove(schedule_id);
        match removed {
            Some(mut entry) => {
                entry.cancel();
                info!(schedule_id = %schedule_id, "Schedule disarmed");
                true
            }
            None => {
                debug!(schedule_id = %schedule_id, "Disarm of unarmed schedule");
                false
            }
        }
    }

    /// Arm every persisted record; failures are logged and skipped.
    /// Returns how many were armed.
    pub async fn rebuild<I>(&self, records: I) -> usize
    where
        I: IntoIterator<Item = ScheduleRecord>,
    {
        let mut armed = 0;
        for record in records {
            match self.arm(&record).await {
                Ok(_) => armed += 1,
                Err(e) => warn!(schedule_id = %record.id, error = %e, "Skipping schedule"),
            }
        }
        info!(armed, "Schedules rebuilt");
        armed
    }

    pub async fn next_fire(&self, schedule_id: &str) -> Option<DateTime<Utc>> {
        self.inner.timers.read().await.get(schedule_id).map(|e| e.next_fire)
    }

    /// Current lifecycle state; discarded and unknown schedules are unarmed
    pub async fn state(&self, schedule_id: &str) -> TimerState {
        self.inner
            .timers
            .read()
            .await
            .get(schedule_id)
            .map(|e| e.lifecycle.state())
            .unwrap_or(TimerState::Unarmed)
    }

    pub async fn active_count(&self) -> usize {
        self.inner
            .timers
            .read()
            .await
            .values()
            .filter(|e| e.lifecycle.state().is_armed())
            .count()
    }

    /// Cancel every timer
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let mut timers = self.inner.timers.write().await;
        for entry in timers.values_mut() {
            entry.cancel();
        }
        let count = timers.len();
        timers.clear();
        info!(count, "Schedule engine stopped");
    }
}

async fn run_timer(
    inner: Arc<EngineInner>,
    schedule_id: String,
    generation: u64,
    cancel: CancellationToken,
    mut fire_at: DateTime<Utc>,
) {
    loop {
        let delay = (fire_at - inner.clock.now()).to_std().unwrap_or(Duration::ZERO);
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }

        let schedule = {
            let timers = inner.timers.read().await;
            match timers.get(&schedule_id) {
                Some(entry) if entry.generation == generation && !cancel.is_cancelled() => {
                    entry.schedule.clone()
                }
                _ => return,
            }
        };

        fire(inner.sink.as_ref(), &schedule).await;

        let mut timers = inner.timers.write().await;
        let Some(entry) = timers.get_mut(&schedule_id) else {
            return;
        };
        if entry.generation != generation {
            return;
        }
        entry.lifecycle.process_event(TimerEvent::Fire);

        if entry.lifecycle.state() == TimerState::Fired {
            timers.remove(&schedule_id);
            debug!(schedule_id = %schedule_id, "One-shot schedule discarded");
            return;
        }

        match recurrence::next_fire(fire_at, schedule.time, &schedule.repeat, inner.timezone) {
            Some(next) => {
                entry.next_fire = next;
                fire_at = next;
                debug!(schedule_id = %schedule_id, next_fire = %next.with_timezone(&inner.timezone), "Recurring schedule re-armed");
            }
            None => {
                warn!(schedule_id = %schedule_id, "No further occurrence, dropping schedule");
                if let Some(mut entry) = timers.remove(&schedule_id) {
                    entry.cancel();
                }
                return;
            }
        }
    }
}

/// Dispatch a schedule's action without waiting for any response
async fn fire(sink: &dyn CommandSink, schedule: &Schedule) {
    let mut params = Params::new();
    params.insert("scheduled".into(), Value::Bool(true));

    match sink.deliver(&schedule.device_id, schedule.action.clone(), params).await {
        Ok(()) => info!(
            schedule_id = %schedule.id,
            device_id = %schedule.device_id,
            action = %schedule.action,
            "Scheduled action sent"
        ),
        Err(DispatchError::Offline(_)) => warn!(
            schedule_id = %schedule.id,
            device_id = %schedule.device_id,
            "Scheduled action skipped, device offline"
        ),
        Err(e) => warn!(
            schedule_id = %schedule.id,
            device_id = %schedule.device_id,
            error = %e,
            "Scheduled action failed"
        ),
    }
}
