use crate::clock::MonotonicInstant;
use crate::store::{KeyValueStore, keys};
use chrono::{DateTime, Local, TimeZone};
use std::time::Duration;
use tracing::{info, warn};

/// Default number of consecutive failures before lockout
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default lockout window
pub const DEFAULT_LOCKOUT_DURATION: Duration = Duration::from_secs(5 * 60);

/// Persisted failed-attempt counter and lockout anchor
///
/// `lockout_start` is only ever set once `failed_attempts` has reached the
/// policy maximum. `lockout_wall` is kept for display and never drives an
/// unlock decision.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockoutState {
    pub failed_attempts: u32,
    pub lockout_start: Option<MonotonicInstant>,
    pub lockout_wall: Option<DateTime<Local>>,
}

impl LockoutState {
    /// Load from the store, missing keys read as a clean state
    pub fn load<S: KeyValueStore + ?Sized>(store: &S) -> Self {
        let failed_attempts = store
            .get_u64(keys::LOCKOUT, keys::FAILED_ATTEMPTS)
            .map(|n| n.min(u32::MAX as u64) as u32)
            .unwrap_or(0);
        let lockout_start = store
            .get_u64(keys::LOCKOUT, keys::LOCKOUT_ELAPSED_MONOTONIC)
            .map(MonotonicInstant::from_millis);
        let lockout_wall = store
            .get_u64(keys::LOCKOUT, keys::LOCKOUT_WALL)
            .and_then(|ms| Local.timestamp_millis_opt(ms as i64).single());

        Self {
            failed_attempts,
            lockout_start,
            lockout_wall,
        }
    }

    pub fn save<S: KeyValueStore + ?Sized>(&self, store: &mut S) {
        store.put_u64(keys::LOCKOUT, keys::FAILED_ATTEMPTS, self.failed_attempts as u64);

        match self.lockout_start {
            Some(start) => {
                store.put_u64(keys::LOCKOUT, keys::LOCKOUT_ELAPSED_MONOTONIC, start.as_millis())
            }
            None => store.remove(keys::LOCKOUT, keys::LOCKOUT_ELAPSED_MONOTONIC),
        }

        match self.lockout_wall {
            Some(wall) => store.put_u64(
                keys::LOCKOUT,
                keys::LOCKOUT_WALL,
                wall.timestamp_millis().max(0) as u64,
            ),
            None => store.remove(keys::LOCKOUT, keys::LOCKOUT_WALL),
        }
    }
}

/// Where the lockout state machine currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockoutStatus {
    Unlocked { failed_attempts: u32 },
    LockedOut { remaining: Duration },
}

/// Consecutive-failure lockout, timed on the monotonic clock only
#[derive(Debug, Clone, Copy)]
pub struct LockoutPolicy {
    max_attempts: u32,
    duration: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_LOCKOUT_DURATION)
    }
}

impl LockoutPolicy {
    pub fn new(max_attempts: u32, duration: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            duration,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Attempts left before the next failure triggers lockout
    pub fn attempts_remaining(&self, state: &LockoutState) -> u32 {
        self.max_attempts.saturating_sub(state.failed_attempts)
    }

    /// Read-only view of the state at `now`
    ///
    /// An elapsed window reads as unlocked with a clean counter. A monotonic
    /// reading below the anchor (the epoch restarted) reads as a full window.
    pub fn status(&self, state: &LockoutState, now: MonotonicInstant) -> LockoutStatus {
        let Some(start) = state.lockout_start else {
            return LockoutStatus::Unlocked {
                failed_attempts: state.failed_attempts,
            };
        };

        match now.checked_since(start) {
            Some(elapsed) if elapsed >= self.duration => {
                LockoutStatus::Unlocked { failed_attempts: 0 }
            }
            Some(elapsed) => LockoutStatus::LockedOut {
                remaining: self.duration - elapsed,
            },
            None => LockoutStatus::LockedOut {
                remaining: self.duration,
            },
        }
    }

    /// Bring the persisted state up to date with `now`
    ///
    /// Clears an expired lockout and re-anchors a lockout whose monotonic
    /// epoch restarted, so a reboot can only lengthen the window. Returns
    /// `true` if `state` changed.
    pub fn refresh(&self, state: &mut LockoutState, now: MonotonicInstant) -> bool {
        let Some(start) = state.lockout_start else {
            return false;
        };

        match now.checked_since(start) {
            Some(elapsed) if elapsed >= self.duration => {
                info!("Lockout window elapsed, PIN entry re-enabled");
                *state = LockoutState::default();
                true
            }
            Some(_) => false,
            None => {
                warn!("Monotonic clock restarted during lockout, restarting lockout window");
                state.lockout_start = Some(now);
                true
            }
        }
    }

    /// Count a failed verification
    pub fn record_failure(
        &self,
        state: &mut LockoutState,
        now: MonotonicInstant,
        wall: DateTime<Local>,
    ) -> LockoutStatus {
        state.failed_attempts = state.failed_attempts.saturating_add(1);

        if state.failed_attempts >= self.max_attempts {
            state.lockout_start = Some(now);
            state.lockout_wall = Some(wall);
            warn!(
                "{} consecutive failed PIN attempts, locking out for {}s",
                state.failed_attempts,
                self.duration.as_secs()
            );
            return LockoutStatus::LockedOut {
                remaining: self.duration,
            };
        }

        LockoutStatus::Unlocked {
            failed_attempts: state.failed_attempts,
        }
    }

    /// Count a successful verification
    pub fn record_success(&self, state: &mut LockoutState) {
        *state = LockoutState::default();
    }
}
