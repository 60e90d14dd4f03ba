//! Rate-limited sweep poller
//!
//! An explicit Idle/Scheduled/Running state machine behind a single mutex.
//! It enforces a minimum interval between full sweeps and coalesces
//! concurrent trigger requests: any number of triggers while a sweep runs
//! queue exactly one follow-up sweep.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// The poller's phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollPhase {
    /// No sweep running or scheduled
    Idle,
    /// A sweep is deferred to the interval boundary
    Scheduled,
    /// A sweep is in flight; `rerun_queued` holds coalesced triggers
    Running { rerun_queued: bool },
}

struct PollState {
    phase: PollPhase,
    last_sweep_start: Option<Instant>,
}

/// What the caller of `trigger` should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerAction {
    /// Start a sweep now
    Start,
    /// Arm a timer; call `scheduled_fired` when it elapses
    ScheduleIn(Duration),
    /// A sweep is already running or scheduled; nothing to do
    AlreadyPending,
}

/// What the caller of `complete` should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompleteAction {
    /// No follow-up sweep was requested
    Idle,
    /// Coalesced triggers arrived during the sweep; arm a timer for the
    /// next interval boundary (zero if it already passed)
    ScheduleRerunIn(Duration),
}

/// Rate-limited poller guarding sweep admission.
pub struct RateLimitedPoller {
    interval: Duration,
    state: Mutex<PollState>,
}

impl RateLimitedPoller {
    /// Create a poller with the given minimum interval between sweep starts.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            state: Mutex::new(PollState {
                phase: PollPhase::Idle,
                last_sweep_start: None,
            }),
        }
    }

    /// Time left until the interval boundary, None once it has passed.
    fn remaining(&self, last_start: Option<Instant>, now: Instant) -> Option<Duration> {
        let last = last_start?;
        let elapsed = now.checked_duration_since(last)?;
        if elapsed >= self.interval {
            None
        } else {
            Some(self.interval - elapsed)
        }
    }

    /// Request a sweep.
    pub fn trigger(&self, now: Instant) -> TriggerAction {
        let mut state = self.state.lock().expect("poll state lock poisoned");
        match state.phase {
            PollPhase::Running { ref mut rerun_queued } => {
                // The running sweep already covers the latest state; queue
                // at most one follow-up for triggers that raced it.
                *rerun_queued = true;
                TriggerAction::AlreadyPending
            }
            PollPhase::Scheduled => TriggerAction::AlreadyPending,
            PollPhase::Idle => match self.remaining(state.last_sweep_start, now) {
                None => {
                    state.phase = PollPhase::Running {
                        rerun_queued: false,
                    };
                    state.last_sweep_start = Some(now);
                    TriggerAction::Start
                }
                Some(wait) => {
                    state.phase = PollPhase::Scheduled;
                    TriggerAction::ScheduleIn(wait)
                }
            },
        }
    }

    /// A previously armed timer elapsed. Returns true if a sweep should
    /// start now; false means the timer went stale (e.g. after shutdown
    /// reset the state).
    pub fn scheduled_fired(&self, now: Instant) -> bool {
        let mut state = self.state.lock().expect("poll state lock poisoned");
        match state.phase {
            PollPhase::Scheduled => {
                state.phase = PollPhase::Running {
                    rerun_queued: false,
                };
                state.last_sweep_start = Some(now);
                true
            }
            PollPhase::Idle | PollPhase::Running { .. } => false,
        }
    }

    /// A sweep finished, successfully or not.
    pub fn complete(&self, now: Instant) -> CompleteAction {
        let mut state = self.state.lock().expect("poll state lock poisoned");
        match state.phase {
            PollPhase::Running { rerun_queued: true } => {
                state.phase = PollPhase::Scheduled;
                let wait = self
                    .remaining(state.last_sweep_start, now)
                    .unwrap_or(Duration::ZERO);
                CompleteAction::ScheduleRerunIn(wait)
            }
            _ => {
                state.phase = PollPhase::Idle;
                CompleteAction::Idle
            }
        }
    }

    /// Whether a sweep is currently in flight.
    pub fn is_running(&self) -> bool {
        let state = self.state.lock().expect("poll state lock poisoned");
        matches!(state.phase, PollPhase::Running { .. })
    }
}
