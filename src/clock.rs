//! Time sources.
//!
//! Two clocks are needed: the wall clock, which the device owner can change at
//! will, and a monotonic clock that only moves forward at a fixed rate from an
//! arbitrary epoch. Every security-relevant duration is measured on the
//! monotonic clock; the wall clock is used for display and calendar-day
//! bookkeeping only.

use chrono::{DateTime, Duration as ChronoDuration, Local};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// A reading of the monotonic clock, in milliseconds since an arbitrary epoch.
///
/// The epoch may restart when the device reboots, so a reading can be lower
/// than one persisted before the restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MonotonicInstant(u64);

impl MonotonicInstant {
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// Time elapsed since `earlier`, or `None` if the clock went backwards.
    pub fn checked_since(self, earlier: MonotonicInstant) -> Option<Duration> {
        self.0.checked_sub(earlier.0).map(Duration::from_millis)
    }

    /// Signed difference `self - earlier` in milliseconds.
    pub fn signed_millis_since(self, earlier: MonotonicInstant) -> i64 {
        self.0 as i64 - earlier.0 as i64
    }
}

/// Source of wall-clock and monotonic time.
pub trait Clock: Send + Sync {
    /// User-visible calendar time.
    fn now_wall(&self) -> DateTime<Local>;

    /// Forward-only time, unaffected by date changes.
    fn now_monotonic(&self) -> MonotonicInstant;

    /// Identity of the current boot, if the platform exposes one.
    ///
    /// A change means the monotonic epoch restarted even when the new reading
    /// happens to be higher than one persisted before the restart.
    fn boot_id(&self) -> Option<String> {
        None
    }

    /// Whether monotonic readings are system-wide and comparable across
    /// processes. Tamper detection needs this.
    fn is_system_wide(&self) -> bool {
        true
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now_wall(&self) -> DateTime<Local> {
        (**self).now_wall()
    }

    fn now_monotonic(&self) -> MonotonicInstant {
        (**self).now_monotonic()
    }

    fn boot_id(&self) -> Option<String> {
        (**self).boot_id()
    }

    fn is_system_wide(&self) -> bool {
        (**self).is_system_wide()
    }
}

/// Operating-system clocks.
///
/// Unix reads the kernel uptime clock and Windows reads `GetTickCount64`.
/// Other targets have no system-wide uptime clock; there the monotonic
/// reading is anchored to this process, lockouts only run down while one host
/// process stays alive, and tamper detection is switched off.
#[derive(Debug, Clone)]
pub struct SystemClock {
    #[cfg(not(any(unix, windows)))]
    anchor: std::time::Instant,
    boot_id: Option<String>,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            #[cfg(not(any(unix, windows)))]
            anchor: std::time::Instant::now(),
            boot_id: crate::platform::boot_id(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_wall(&self) -> DateTime<Local> {
        Local::now()
    }

    fn now_monotonic(&self) -> MonotonicInstant {
        #[cfg(unix)]
        {
            MonotonicInstant(read_clock_millis())
        }

        #[cfg(windows)]
        {
            // SAFETY: GetTickCount64 takes no arguments and cannot fail
            MonotonicInstant(unsafe {
                windows_sys::Win32::System::SystemInformation::GetTickCount64()
            })
        }

        #[cfg(not(any(unix, windows)))]
        {
            MonotonicInstant(self.anchor.elapsed().as_millis() as u64)
        }
    }

    fn boot_id(&self) -> Option<String> {
        self.boot_id.clone()
    }

    fn is_system_wide(&self) -> bool {
        cfg!(any(unix, windows))
    }
}

/// Read the kernel's uptime clock.
///
/// `CLOCK_BOOTTIME` keeps counting while the device is suspended, which is what
/// a lockout window should measure.
#[cfg(unix)]
fn read_clock_millis() -> u64 {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    const CLOCK_ID: libc::clockid_t = libc::CLOCK_BOOTTIME;
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    const CLOCK_ID: libc::clockid_t = libc::CLOCK_MONOTONIC;

    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };

    // SAFETY: `ts` is a valid, writable timespec for the duration of the call.
    let result = unsafe { libc::clock_gettime(CLOCK_ID, &mut ts) };
    if result != 0 {
        tracing::warn!("clock_gettime failed: {}", std::io::Error::last_os_error());
        return 0;
    }

    (ts.tv_sec as u64)
        .saturating_mul(1000)
        .saturating_add((ts.tv_nsec as u64) / 1_000_000)
}

/// Manually driven clock for tests and simulations.
///
/// Clones share the same underlying time, so a test can hand one clone to the
/// gate and keep another to move time around.
#[derive(Debug, Clone)]
pub struct ManualClock {
    inner: Arc<Mutex<ManualClockState>>,
}

#[derive(Debug)]
struct ManualClockState {
    wall: DateTime<Local>,
    monotonic: u64,
    boots: u32,
}

impl ManualClock {
    pub fn new(wall: DateTime<Local>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ManualClockState {
                wall,
                monotonic: 1_000_000,
                boots: 0,
            })),
        }
    }

    /// Let real time pass: both clocks advance together.
    pub fn advance(&self, duration: Duration) {
        let mut state = self.inner.lock();
        state.wall += to_chrono(duration);
        state.monotonic = state.monotonic.saturating_add(duration.as_millis() as u64);
    }

    /// Advance only the monotonic clock.
    pub fn advance_monotonic(&self, duration: Duration) {
        let mut state = self.inner.lock();
        state.monotonic = state.monotonic.saturating_add(duration.as_millis() as u64);
    }

    /// Shift the wall clock forwards (or backwards, if negative) without time passing,
    /// as a user changing the date would.
    pub fn shift_wall(&self, delta: ChronoDuration) {
        self.inner.lock().wall += delta;
    }

    /// Simulate a reboot: a new boot identity and a monotonic clock reading
    /// `uptime`. The wall clock is left alone; advance it for the power-off time.
    pub fn reboot(&self, uptime: Duration) {
        let mut state = self.inner.lock();
        state.boots += 1;
        state.monotonic = uptime.as_millis() as u64;
    }
}

impl Clock for ManualClock {
    fn now_wall(&self) -> DateTime<Local> {
        self.inner.lock().wall
    }

    fn now_monotonic(&self) -> MonotonicInstant {
        MonotonicInstant(self.inner.lock().monotonic)
    }

    fn boot_id(&self) -> Option<String> {
        Some(format!("manual-boot-{}", self.inner.lock().boots))
    }
}

fn to_chrono(duration: Duration) -> ChronoDuration {
    ChronoDuration::from_std(duration).unwrap_or(ChronoDuration::MAX)
}
