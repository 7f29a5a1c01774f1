//! Timer lifecycle
//!
//! Defines the valid transitions of a schedule's timer.

use serde::Serialize;

/// Where a schedule's timer is in its life
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerState {
    Unarmed,
    ArmedOnce,
    ArmedRecurring,
    Fired,
    Cancelled,
}

impl TimerState {
    pub fn is_armed(&self) -> bool {
        matches!(self, TimerState::ArmedOnce | TimerState::ArmedRecurring)
    }
}

/// Events that move a timer between states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    /// Armed with a one-shot occurrence
    ArmOnce,
    /// Armed with a recurrence rule
    ArmRecurring,
    /// The timer elapsed and its action was dispatched
    Fire,
    /// Disarmed, replaced or shut down
    Cancel,
}

/// Result of a transition attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    Success(TimerState),
    Invalid { from: TimerState, event: TimerEvent },
}

/// Per-schedule state machine
#[derive(Debug)]
pub struct TimerLifecycle {
    current: TimerState,
}

impl Default for TimerLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerLifecycle {
    pub fn new() -> Self {
        Self {
            current: TimerState::Unarmed,
        }
    }

    pub fn state(&self) -> TimerState {
        self.current
    }

    /// Apply an event; invalid transitions leave the state untouched
    pub fn process_event(&mut self, event: TimerEvent) -> TransitionResult {
        match self.next_state(event) {
            Some(state) => {
                self.current = state;
                TransitionResult::Success(state)
            }
            None => TransitionResult::Invalid {
                from: self.current,
                event,
            },
        }
    }

    fn next_state(&self, event: TimerEvent) -> Option<TimerState> {
        use TimerEvent::*;
        use TimerState::*;

        match (self.current, event) {
            // Re-arming is allowed from anywhere
            (_, ArmOnce) => Some(ArmedOnce),
            (_, ArmRecurring) => Some(ArmedRecurring),

            (ArmedOnce, Fire) => Some(Fired),
            (ArmedRecurring, Fire) => Some(ArmedRecurring),

            (ArmedOnce | ArmedRecurring, Cancel) => Some(Cancelled),

            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_shot_lifecycle() {
        let mut timer = TimerLifecycle::new();
        assert_eq!(timer.state(), TimerState::Unarmed);
        assert_eq!(
            timer.process_event(TimerEvent::ArmOnce),
            TransitionResult::Success(TimerState::ArmedOnce)
        );
        assert_eq!(
            timer.process_event(TimerEvent::Fire),
            TransitionResult::Success(TimerState::Fired)
        );
        // A fired one-shot cannot fire again
        assert!(matches!(
            timer.process_event(TimerEvent::Fire),
            TransitionResult::Invalid { from: TimerState::Fired, .. }
        ));
    }

    #[test]
    fn test_recurring_stays_armed() {
        let mut timer = TimerLifecycle::new();
        timer.process_event(TimerEvent::ArmRecurring);
        for _ in 0..3 {
            timer.process_event(TimerEvent::Fire);
            assert_eq!(timer.state(), TimerState::ArmedRecurring);
        }
        timer.process_event(TimerEvent::Cancel);
        assert_eq!(timer.state(), TimerState::Cancelled);
    }

    #[test]
    fn test_unarmed_cannot_fire_or_cancel() {
        let mut timer = TimerLifecycle::new();
        assert!(matches!(timer.process_event(TimerEvent::Fire), TransitionResult::Invalid { .. }));
        assert!(matches!(timer.process_event(TimerEvent::Cancel), TransitionResult::Invalid { .. }));
        assert_eq!(timer.state(), TimerState::Unarmed);
    }

    #[test]
    fn test_rearm_after_cancel() {
        let mut timer = TimerLifecycle::new();
        timer.process_event(TimerEvent::ArmOnce);
        timer.process_event(TimerEvent::Cancel);
        timer.process_event(TimerEvent::ArmRecurring);
        assert!(timer.state().is_armed());
    }
}
