//! Wall-clock manipulation detection.
//!
//! Wall time and monotonic time advance in lockstep under normal operation.
//! Between two observations the monitor compares how far each moved; a gap
//! larger than the tolerance means somebody changed the date or time. The
//! tolerance absorbs NTP corrections and DST edges.
//!
//! Power-off time is invisible to the monotonic clock, so a reboot is
//! recognised by a changed boot identity (or, where none is available, by a
//! monotonic reading below the baseline) and only re-baselines. A wall clock
//! that went backwards across a reboot is still flagged.
//!
//! This only works because the monotonic clock cannot be set by the user. On a
//! platform without a system-wide monotonic clock the monitor is built
//! disabled and never flags anything.

use crate::clock::{Clock, MonotonicInstant};
use crate::store::{KeyValueStore, keys};
use chrono::{DateTime, Local, TimeZone};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default allowed divergence between wall and monotonic elapsed time
pub const DEFAULT_TOLERANCE: Duration = Duration::from_secs(5 * 60);

/// Last trusted pair of clock readings plus the sticky tamper flag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeBaseline {
    pub last_wall: DateTime<Local>,
    pub last_monotonic: MonotonicInstant,
    pub boot_id: Option<String>,
    pub tampering_flagged: bool,
}

impl TimeBaseline {
    /// Load the baseline, or `None` if no readings have been recorded yet
    pub fn load<S: KeyValueStore + ?Sized>(store: &S) -> Option<Self> {
        let wall_ms = store.get_u64(keys::TIME_INTEGRITY, keys::LAST_KNOWN_WALL_TIME)?;
        let mono_ms = store.get_u64(keys::TIME_INTEGRITY, keys::LAST_KNOWN_MONOTONIC)?;
        let last_wall = Local.timestamp_millis_opt(wall_ms as i64).single()?;

        Some(Self {
            last_wall,
            last_monotonic: MonotonicInstant::from_millis(mono_ms),
            boot_id: store.get_str(keys::TIME_INTEGRITY, keys::BOOT_ID),
            tampering_flagged: tampering_flag(store),
        })
    }

    pub fn save<S: KeyValueStore + ?Sized>(&self, store: &mut S) {
        store.put_u64(
            keys::TIME_INTEGRITY,
            keys::LAST_KNOWN_WALL_TIME,
            self.last_wall.timestamp_millis().max(0) as u64,
        );
        store.put_u64(
            keys::TIME_INTEGRITY,
            keys::LAST_KNOWN_MONOTONIC,
            self.last_monotonic.as_millis(),
        );
        match &self.boot_id {
            Some(id) => store.put_str(keys::TIME_INTEGRITY, keys::BOOT_ID, id),
            None => store.remove(keys::TIME_INTEGRITY, keys::BOOT_ID),
        }
        store.put_bool(
            keys::TIME_INTEGRITY,
            keys::TIME_TAMPERING_DETECTED,
            self.tampering_flagged,
        );
    }
}

/// Read the persisted flag without probing
pub fn tampering_flag<S: KeyValueStore + ?Sized>(store: &S) -> bool {
    store
        .get_bool(keys::TIME_INTEGRITY, keys::TIME_TAMPERING_DETECTED)
        .unwrap_or(false)
}

/// One observation of both clocks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClockReading {
    pub wall: DateTime<Local>,
    pub monotonic: MonotonicInstant,
    pub boot_id: Option<String>,
}

impl ClockReading {
    pub fn from_clock<C: Clock + ?Sized>(clock: &C) -> Self {
        Self {
            wall: clock.now_wall(),
            monotonic: clock.now_monotonic(),
            boot_id: clock.boot_id(),
        }
    }

    fn baseline(&self, tampering_flagged: bool) -> TimeBaseline {
        TimeBaseline {
            last_wall: self.wall,
            last_monotonic: self.monotonic,
            boot_id: self.boot_id.clone(),
            tampering_flagged,
        }
    }
}

/// Detects wall-clock changes against the monotonic reference
#[derive(Debug, Clone, Copy)]
pub struct TimeIntegrityMonitor {
    tolerance: Duration,
    enabled: bool,
}

impl Default for TimeIntegrityMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_TOLERANCE)
    }
}

impl TimeIntegrityMonitor {
    pub fn new(tolerance: Duration) -> Self {
        Self {
            tolerance,
            enabled: true,
        }
    }

    /// A monitor that never flags, for clocks with no system-wide monotonic source
    pub fn disabled() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            enabled: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn tolerance(&self) -> Duration {
        self.tolerance
    }

    /// Compare current readings against the baseline and update it
    ///
    /// Returns the tamper flag after this observation. While drift persists the
    /// baseline is left untouched so every check keeps reporting it; once the
    /// flag is raised it stays raised until `clear_tampering_flag`.
    pub fn detect_tampering<S: KeyValueStore + ?Sized>(
        &self,
        store: &mut S,
        now: &ClockReading,
    ) -> bool {
        if !self.enabled {
            return tampering_flag(store);
        }

        let Some(baseline) = TimeBaseline::load(store) else {
            debug!("No time baseline yet, recording first observation");
            let flagged = tampering_flag(store);
            now.baseline(flagged).save(store);
            return flagged;
        };

        let wall_delta = (now.wall - baseline.last_wall).num_milliseconds();
        let mono_delta = now.monotonic.signed_millis_since(baseline.last_monotonic);
        let tolerance_ms = self.tolerance.as_millis() as i64;

        let rebooted = match (now.boot_id.as_deref(), baseline.boot_id.as_deref()) {
            (Some(current), Some(recorded)) => current != recorded,
            _ => mono_delta < 0,
        };

        let drifted = if rebooted {
            // Any amount of power-off time is possible, but not negative time
            debug!("Monotonic epoch restarted since the last baseline");
            wall_delta < -tolerance_ms
        } else {
            let drift = wall_delta.saturating_sub(mono_delta).unsigned_abs();
            drift > tolerance_ms as u64 && mono_delta > 0
        };

        if drifted {
            if !baseline.tampering_flagged {
                warn!(
                    wall_delta_ms = wall_delta,
                    mono_delta_ms = mono_delta,
                    rebooted,
                    "Wall clock moved inconsistently with elapsed time, flagging tampering"
                );
            }
            store.put_bool(keys::TIME_INTEGRITY, keys::TIME_TAMPERING_DETECTED, true);
            return true;
        }

        now.baseline(baseline.tampering_flagged).save(store);
        baseline.tampering_flagged
    }

    /// Clear the flag and re-baseline
    ///
    /// Only a proven guardian may reach this; see `EnforcementGate::verify_pin`.
    pub(crate) fn clear_tampering_flag<S: KeyValueStore + ?Sized>(
        &self,
        store: &mut S,
        now: &ClockReading,
    ) {
        if tampering_flag(store) {
            info!("Clock tampering flag cleared by guardian");
        }

        now.baseline(false).save(store);
    }
}
