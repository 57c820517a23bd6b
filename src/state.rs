use crate::clock::MonotonicInstant;
use crate::credential::PinCredentialStore;
use crate::integrity::tampering_flag;
use crate::lockout::{LockoutPolicy, LockoutState, LockoutStatus};
use crate::restriction::{ContentControls, RestrictionEvaluator, RestrictionSchedule};
use crate::store::KeyValueStore;
use chrono::{DateTime, Local, NaiveTime};
use serde::Serialize;
use std::time::Duration;

/// Read-only snapshot of the parental-control subsystem
///
/// Recomputed from the store on every read; mutating it changes nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParentalControlState {
    pub pin_set: bool,
    pub enabled: bool,

    pub failed_attempts: u32,
    pub attempts_remaining: u32,
    pub locked_out: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lockout_remaining: Option<Duration>,
    /// Wall time the lockout began, for display only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_out_at: Option<DateTime<Local>>,

    pub time_tampering_detected: bool,

    pub is_during_bedtime: bool,
    pub is_over_daily_limit: bool,
    pub usage_today_minutes: u32,
    /// `None` when there is no daily limit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_minutes: Option<u32>,

    pub schedule: RestrictionSchedule,
    pub controls: ContentControls,
}

impl ParentalControlState {
    /// Assemble a snapshot from the persisted entities
    pub(crate) fn assemble<S: KeyValueStore + ?Sized>(
        store: &S,
        policy: &LockoutPolicy,
        mono_now: MonotonicInstant,
        time_of_day: NaiveTime,
    ) -> Self {
        let lockout = LockoutState::load(store);
        let tampering = tampering_flag(store);
        let schedule = RestrictionSchedule::load(store);
        let restrictions = RestrictionEvaluator::evaluate(&schedule, time_of_day, tampering);

        let (failed_attempts, lockout_remaining) = match policy.status(&lockout, mono_now) {
            LockoutStatus::Unlocked { failed_attempts } => (failed_attempts, None),
            LockoutStatus::LockedOut { remaining } => (lockout.failed_attempts, Some(remaining)),
        };

        Self {
            pin_set: PinCredentialStore::is_set(store),
            enabled: PinCredentialStore::is_enabled(store),
            failed_attempts,
            attempts_remaining: policy.max_attempts().saturating_sub(failed_attempts),
            locked_out: lockout_remaining.is_some(),
            lockout_remaining,
            locked_out_at: lockout_remaining.and(lockout.lockout_wall),
            time_tampering_detected: tampering,
            is_during_bedtime: restrictions.is_during_bedtime,
            is_over_daily_limit: restrictions.is_over_daily_limit,
            usage_today_minutes: restrictions.usage_today_minutes,
            remaining_minutes: restrictions.remaining_minutes,
            schedule,
            controls: ContentControls::load(store),
        }
    }

    /// True if the child should currently be blocked from using the device
    pub fn is_restricted(&self) -> bool {
        self.enabled && (self.is_during_bedtime || self.is_over_daily_limit)
    }
}
