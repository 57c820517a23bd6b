//! Enforcement gate.
//!
//! The composition root of the subsystem. It owns the store behind a single
//! mutex and the injected clock, and answers two questions for the host
//! application: "is this the guardian?" and "what is restricted right now?".
//!
//! Every operation runs inside a session: the in-process mutex plus the
//! store's own `begin`/`end` bracket, which for a file-backed store is a
//! cross-process lock and a fresh read. Loading, modifying and flushing all
//! happen inside it, so two concurrent failed attempts can never both read
//! the same counter, whether they come from two threads or two processes.
//! The threat cache lives outside the lock.

use crate::clock::Clock;
use crate::config::GuardConfig;
use crate::credential::{PinCredentialStore, validate_pin_format};
use crate::integrity::{ClockReading, TimeIntegrityMonitor};
use crate::lockout::{LockoutPolicy, LockoutState, LockoutStatus};
use crate::restriction::{ContentControls, RestrictionSchedule, SettingsUpdate};
use crate::state::ParentalControlState;
use crate::store::{KeyValueStore, keys};
use crate::threat::{ThreatAssessment, ThreatLevel, ThreatScanner, default_probes};
use crate::{Error, Result};
use chrono::{DateTime, Local};
use parking_lot::{Mutex, MutexGuard};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome of a PIN verification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyResult {
    Success,
    /// No PIN has been set; prompt for setup rather than retry
    NoPinSet,
    Incorrect { attempts_remaining: u32 },
    /// Verification is refused until `remaining` has elapsed
    LockedOut { remaining: Duration },
}

impl VerifyResult {
    pub fn is_success(&self) -> bool {
        matches!(self, VerifyResult::Success)
    }
}

/// Exclusive access to the store for the length of one operation
///
/// Releases the store's `begin` lock and then the mutex when dropped.
struct Session<'a, S: KeyValueStore> {
    store: MutexGuard<'a, S>,
}

impl<S: KeyValueStore> Deref for Session<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        &*self.store
    }
}

impl<S: KeyValueStore> DerefMut for Session<'_, S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut *self.store
    }
}

impl<S: KeyValueStore> Drop for Session<'_, S> {
    fn drop(&mut self) {
        self.store.end();
    }
}

/// Guardian authentication and restriction state over a key-value store
pub struct EnforcementGate<S, C> {
    store: Mutex<S>,
    clock: C,
    scanner: ThreatScanner,
    lockout: LockoutPolicy,
    integrity: TimeIntegrityMonitor,
    max_level_for_sensitive: ThreatLevel,
    developer_bypass: bool,
}

impl<S: KeyValueStore, C: Clock> EnforcementGate<S, C> {
    /// Build a gate with the platform's default threat probes
    pub fn new(store: S, clock: C, config: &GuardConfig) -> Self {
        let scanner = ThreatScanner::new(
            default_probes(config.build.is_production()),
            config.threat.cache_ttl(),
        );
        Self::with_scanner(store, clock, config, scanner)
    }

    pub fn with_scanner(store: S, clock: C, config: &GuardConfig, scanner: ThreatScanner) -> Self {
        let developer_bypass = cfg!(all(feature = "developer-bypass", debug_assertions))
            && !config.build.is_production()
            && config.build.developer_bypass;

        if developer_bypass {
            warn!("Developer verification bypass is enabled; this build must not ship");
        }

        let integrity = if clock.is_system_wide() {
            TimeIntegrityMonitor::new(config.time_integrity.tolerance())
        } else {
            warn!("No system-wide monotonic clock on this platform, clock tamper detection is off");
            TimeIntegrityMonitor::disabled()
        };

        Self {
            store: Mutex::new(store),
            clock,
            scanner,
            lockout: LockoutPolicy::new(config.lockout.max_attempts, config.lockout.duration()),
            integrity,
            max_level_for_sensitive: config.threat.max_level_for_sensitive,
            developer_bypass,
        }
    }

    /// Run `f` against the latest persisted state, for read-only inspection
    pub fn with_store<R>(&self, f: impl FnOnce(&S) -> R) -> Result<R> {
        let store = self.session()?;
        Ok(f(&*store))
    }

    /// Set the guardian PIN, enable controls and clear any lockout
    pub fn set_pin(&self, pin: &str) -> Result<()> {
        let mut store = self.session()?;

        PinCredentialStore::set_pin(&mut *store, pin)?;
        LockoutState::default().save(&mut *store);
        store.flush()?;

        info!("Guardian PIN set, parental controls enabled");
        Ok(())
    }

    pub fn verify_pin(&self, pin: &str) -> Result<VerifyResult> {
        let mut store = self.session()?;
        let result = self.verify_locked(&mut *store, pin);
        store.flush()?;
        Ok(result)
    }

    /// Replace the PIN after verifying the current one through the full gate
    pub fn change_pin(&self, old_pin: &str, new_pin: &str) -> Result<()> {
        // A malformed new PIN must not cost the guardian an attempt
        validate_pin_format(new_pin)?;

        let mut store = self.session()?;
        let verified = self.require_guardian(&mut *store, old_pin);
        if verified.is_ok() {
            PinCredentialStore::set_pin(&mut *store, new_pin)?;
            LockoutState::default().save(&mut *store);
        }
        store.flush()?;
        verified?;

        info!("Guardian PIN changed");
        Ok(())
    }

    /// Verify the guardian and erase every persisted entity of the subsystem
    pub fn remove_controls(&self, pin: &str) -> Result<()> {
        self.enforce_or_fail(self.max_level_for_sensitive)?;

        let mut store = self.session()?;
        let verified = self.require_guardian(&mut *store, pin);
        if verified.is_ok() {
            for namespace in keys::ALL_NAMESPACES {
                store.clear_namespace(namespace);
            }
        }
        store.flush()?;
        verified?;

        info!("Parental controls removed");
        Ok(())
    }

    /// Current snapshot of the subsystem
    ///
    /// Also refreshes the time baseline and starts a new usage day when the
    /// date has changed; no other state is touched.
    pub fn get_state(&self) -> Result<ParentalControlState> {
        let mut store = self.session()?;

        let (tampering, wall) = self.check_clock(&mut *store);

        let mut schedule = RestrictionSchedule::load(&*store);
        if schedule.roll_over(wall.date_naive(), tampering) {
            schedule.save_usage(&mut *store);
        }
        store.flush()?;

        Ok(ParentalControlState::assemble(
            &*store,
            &self.lockout,
            self.clock.now_monotonic(),
            wall.time(),
        ))
    }

    /// Apply a partial settings change
    pub fn update_settings(&self, update: &SettingsUpdate) -> Result<()> {
        if update.is_empty() {
            return Ok(());
        }

        let mut store = self.session()?;

        let mut schedule = RestrictionSchedule::load(&*store);
        let mut controls = ContentControls::load(&*store);
        update.apply(&mut schedule, &mut controls);
        schedule.save(&mut *store);
        controls.save(&mut *store);
        store.flush()?;

        info!("Restriction settings updated");
        debug!("{:?}", update);
        Ok(())
    }

    /// Add `minutes` to today's usage and return the new total
    pub fn record_usage(&self, minutes: u32) -> Result<u32> {
        let mut store = self.session()?;

        let (tampering, wall) = self.check_clock(&mut *store);

        let mut schedule = RestrictionSchedule::load(&*store);
        schedule.record_usage(minutes, wall.date_naive(), tampering);
        schedule.save_usage(&mut *store);
        store.flush()?;

        debug!("Recorded {} minutes of usage, {} today", minutes, schedule.usage_today);
        Ok(schedule.usage_today)
    }

    pub fn is_pin_set(&self) -> Result<bool> {
        Ok(PinCredentialStore::is_set(&*self.session()?))
    }

    pub fn is_enabled(&self) -> Result<bool> {
        Ok(PinCredentialStore::is_enabled(&*self.session()?))
    }

    /// Enable or disable controls; disabling is a sensitive operation
    pub fn set_enabled(&self, enabled: bool, pin: &str) -> Result<()> {
        if !enabled {
            self.enforce_or_fail(self.max_level_for_sensitive)?;
        }

        let mut store = self.session()?;
        let verified = self.require_guardian(&mut *store, pin);
        if verified.is_ok() {
            PinCredentialStore::set_enabled(&mut *store, enabled);
        }
        store.flush()?;
        verified?;

        info!(
            "Parental controls {}",
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(())
    }

    /// Environment threat assessment, from cache unless `force` is set
    pub fn get_security_assessment(&self, force: bool) -> Arc<ThreatAssessment> {
        let now = self.clock.now_monotonic();
        if force {
            self.scanner.assess_fresh(now)
        } else {
            self.scanner.assess(now)
        }
    }

    /// Fail with `ThreatExceeded` if the environment is worse than `max_tolerated`
    pub fn enforce_or_fail(&self, max_tolerated: ThreatLevel) -> Result<Arc<ThreatAssessment>> {
        let assessment = self.get_security_assessment(false);

        if assessment.level > max_tolerated {
            warn!(
                level = %assessment.level,
                max_tolerated = %max_tolerated,
                "Refusing sensitive operation in compromised environment"
            );
            return Err(Error::ThreatExceeded {
                level: assessment.level,
                max_tolerated,
            });
        }

        Ok(assessment)
    }

    /// Whether this gate was built with the test-only bypass
    pub fn developer_bypass_available(&self) -> bool {
        self.developer_bypass
    }

    /// Treat the caller as the guardian without a PIN
    ///
    /// Only exists with the `developer-bypass` feature and only succeeds on a
    /// debug build configured for development. Has the same effects as a
    /// successful verification, including clearing the tamper flag.
    #[cfg(feature = "developer-bypass")]
    pub fn developer_bypass(&self) -> Result<VerifyResult> {
        if !self.developer_bypass {
            return Err(Error::BypassUnavailable);
        }

        let mut store = self.session()?;
        self.grant(&mut *store);
        store.flush()?;

        warn!("Guardian verification bypassed by developer build");
        Ok(VerifyResult::Success)
    }

    fn session(&self) -> Result<Session<'_, S>> {
        let mut store = self.store.lock();
        store.begin()?;
        Ok(Session { store })
    }

    /// Check for clock tampering; returns the flag and the wall reading used
    fn check_clock(&self, store: &mut S) -> (bool, DateTime<Local>) {
        let now = ClockReading::from_clock(&self.clock);
        (self.integrity.detect_tampering(store, &now), now.wall)
    }

    /// Clock check, lockout check, then credential comparison, then side effects
    ///
    /// The clock check only records tampering; a successful verification
    /// clears it again. Mutates the store but leaves flushing to the caller.
    fn verify_locked(&self, store: &mut S, pin: &str) -> VerifyResult {
        self.check_clock(store);

        let mono = self.clock.now_monotonic();

        let mut lockout = LockoutState::load(&*store);
        if self.lockout.refresh(&mut lockout, mono) {
            lockout.save(store);
        }
        if let LockoutStatus::LockedOut { remaining } = self.lockout.status(&lockout, mono) {
            debug!("PIN entry refused, {}s of lockout remaining", remaining.as_secs());
            return VerifyResult::LockedOut { remaining };
        }

        let Some(credential) = PinCredentialStore::load(&*store) else {
            return VerifyResult::NoPinSet;
        };

        if credential.verify_raw(pin) {
            self.grant(store);
            info!("Guardian PIN verified");
            return VerifyResult::Success;
        }

        let status = self
            .lockout
            .record_failure(&mut lockout, self.clock.now_monotonic(), self.clock.now_wall());
        lockout.save(store);

        match status {
            LockoutStatus::LockedOut { remaining } => VerifyResult::LockedOut { remaining },
            LockoutStatus::Unlocked { failed_attempts } => {
                let attempts_remaining = self.lockout.attempts_remaining(&lockout);
                warn!(
                    "Incorrect guardian PIN ({} failed, {} remaining)",
                    failed_attempts, attempts_remaining
                );
                VerifyResult::Incorrect { attempts_remaining }
            }
        }
    }

    /// Effects of proving guardian identity
    fn grant(&self, store: &mut S) {
        let mut lockout = LockoutState::load(&*store);
        self.lockout.record_success(&mut lockout);
        lockout.save(store);
        self.integrity
            .clear_tampering_flag(store, &ClockReading::from_clock(&self.clock));
    }

    fn require_guardian(&self, store: &mut S, pin: &str) -> Result<()> {
        match self.verify_locked(store, pin) {
            VerifyResult::Success => Ok(()),
            VerifyResult::NoPinSet => Err(Error::NoPinSet),
            other => Err(Error::VerificationFailed(other)),
        }
    }
}
