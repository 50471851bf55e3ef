//! crates/astrobot_core/src/trial.rs
//!
//! The free-trial gate: a fixed 60-second budget of chat usage per caller
//! identity, persisted so a page reload cannot restart it.
//!
//! The gate itself is a pure state machine over injected clock values; the
//! controller feeds it `now` from the wall clock and persists the records it
//! hands back. The persistence fallback chain (`load_trial`) is the explicit
//! ladder `read(primary) -> on failure -> read(fallback) -> on failure ->
//! absent`; every storage error degrades to "no persisted trial" so storage
//! trouble can never block the chat itself.

use crate::domain::TrialRecord;
use crate::ports::TrialStore;

/// Fixed trial duration.
pub const TRIAL_DURATION_MS: i64 = 60_000;
pub const TRIAL_DURATION_SECS: u32 = 60;

/// Storage key used when IP resolution is unavailable, and the second rung
/// of the read ladder when the primary key is unreadable.
pub const FALLBACK_TRIAL_KEY: &str = "chat_trial_fallback";

/// Storage key for a resolved caller identity.
pub fn trial_storage_key(ip: Option<&str>) -> String {
    match ip {
        Some(ip) => format!("chat_trial_{ip}"),
        None => FALLBACK_TRIAL_KEY.to_string(),
    }
}

/// Where the gate is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialPhase {
    NotStarted,
    Running { started_at_ms: i64 },
    Expired,
}

/// What a 1-second tick observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing to report (timer not running, or already expired).
    Idle,
    /// Countdown in progress; `remaining_secs` is the visible counter.
    Running { remaining_secs: u32 },
    /// The countdown just reached zero. Reported exactly once.
    JustExpired,
}

/// The trial gate state machine.
#[derive(Debug)]
pub struct TrialGate {
    phase: TrialPhase,
    /// Session-local start guard, independent of persisted state, so rapid
    /// re-entry cannot restart or duplicate the timer.
    has_started: bool,
    /// Development override: the gate never blocks and an expiring timer
    /// re-arms to 60 instead of entering `Expired`.
    dev_override: bool,
    record: Option<TrialRecord>,
}

impl TrialGate {
    pub fn new(dev_override: bool) -> Self {
        Self {
            phase: TrialPhase::NotStarted,
            has_started: false,
            dev_override,
            record: None,
        }
    }

    fn remaining_secs(started_at_ms: i64, now_ms: i64) -> u32 {
        let elapsed_secs = ((now_ms - started_at_ms).max(0)) / 1000;
        (TRIAL_DURATION_SECS as i64 - elapsed_secs).max(0) as u32
    }

    /// Resumes from a persisted record. The trial is wall-clock-bound, not
    /// tab-lifetime-bound: the countdown continues from `now - start_time`
    /// rather than resetting.
    pub fn restore(&mut self, record: Option<TrialRecord>, now_ms: i64) {
        if self.dev_override {
            return;
        }
        let Some(record) = record else { return };

        if record.expired || Self::remaining_secs(record.start_time, now_ms) == 0 {
            self.phase = TrialPhase::Expired;
        } else {
            self.phase = TrialPhase::Running {
                started_at_ms: record.start_time,
            };
        }
        self.has_started = true;
        self.record = Some(record);
    }

    /// Arms the countdown on the first user-authored message.
    ///
    /// Returns the record to persist, or `None` when nothing started (already
    /// started, expired, or running under the development override, which
    /// never persists).
    pub fn start(&mut self, now_ms: i64, ip: Option<String>) -> Option<TrialRecord> {
        if self.has_started || self.phase == TrialPhase::Expired {
            return None;
        }
        self.has_started = true;
        self.phase = TrialPhase::Running {
            started_at_ms: now_ms,
        };

        if self.dev_override {
            return None;
        }
        let record = TrialRecord {
            start_time: now_ms,
            ip,
            expired: false,
            expired_at: None,
        };
        self.record = Some(record.clone());
        Some(record)
    }

    /// Advances the countdown. Call once per second.
    pub fn tick(&mut self, now_ms: i64) -> TickOutcome {
        let TrialPhase::Running { started_at_ms } = self.phase else {
            return TickOutcome::Idle;
        };

        let remaining = Self::remaining_secs(started_at_ms, now_ms);
        if remaining > 0 {
            return TickOutcome::Running {
                remaining_secs: remaining,
            };
        }

        if self.dev_override {
            // Re-arm instead of blocking; the next message may start it anew.
            self.phase = TrialPhase::Running {
                started_at_ms: now_ms,
            };
            self.has_started = false;
            return TickOutcome::Running {
                remaining_secs: TRIAL_DURATION_SECS,
            };
        }

        self.phase = TrialPhase::Expired;
        if let Some(record) = &mut self.record {
            record.expired = true;
            record.expired_at = Some(now_ms);
        }
        TickOutcome::JustExpired
    }

    /// Whether new input is permitted.
    pub fn can_send(&self) -> bool {
        self.dev_override || self.phase != TrialPhase::Expired
    }

    /// The visible counter: `None` means the timer has not started.
    pub fn seconds_remaining(&self, now_ms: i64) -> Option<u32> {
        match self.phase {
            TrialPhase::NotStarted => None,
            TrialPhase::Running { started_at_ms } => {
                Some(Self::remaining_secs(started_at_ms, now_ms))
            }
            TrialPhase::Expired => Some(0),
        }
    }

    pub fn phase(&self) -> TrialPhase {
        self.phase
    }

    /// The record as last mutated (start or expiry); what the controller
    /// persists after a `JustExpired` tick.
    pub fn record(&self) -> Option<&TrialRecord> {
        self.record.as_ref()
    }
}

/// The persistence read ladder. Any read or parse failure under the primary
/// key falls back to the fixed fallback key; a failure there concludes
/// "no persisted trial". Errors never escape to the caller.
pub async fn load_trial(
    store: &dyn TrialStore,
    primary_key: &str,
    fallback_key: &str,
) -> Option<TrialRecord> {
    match store.load(primary_key).await {
        Ok(found) => found,
        Err(_) => store.load(fallback_key).await.ok().flatten(),
    }
}
