//! Parental-control trust core.
//!
//! Authenticates a guardian by PIN, locks out repeated failures on the
//! monotonic clock, detects manipulation of the device clock, and scores the
//! runtime environment before sensitive operations. Restriction state (bedtime,
//! daily usage) is derived from the same store and forced to its most
//! restrictive reading while clock tampering is suspected.
//!
//! [`EnforcementGate`] is the entry point:
//!
//! ```no_run
//! use family_guard::{EnforcementGate, FileStore, GuardConfig, SystemClock, VerifyResult};
//!
//! # fn main() -> family_guard::Result<()> {
//! let store = FileStore::open(family_guard::store::get_state_path()?)?;
//! let gate = EnforcementGate::new(store, SystemClock::new(), &GuardConfig::default());
//!
//! if !gate.is_pin_set()? {
//!     gate.set_pin("2468")?;
//! }
//! match gate.verify_pin("2468")? {
//!     VerifyResult::Success => println!("guardian verified"),
//!     other => println!("refused: {:?}", other),
//! }
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod credential;
pub mod error;
pub mod gate;
pub mod integrity;
pub mod lockout;
pub mod platform;
pub mod restriction;
pub mod state;
pub mod store;
pub mod threat;

pub use clock::{Clock, ManualClock, MonotonicInstant, SystemClock};
pub use config::GuardConfig;
pub use error::{Error, Result};
pub use gate::{EnforcementGate, VerifyResult};
pub use restriction::{ContentFilterLevel, SettingsUpdate};
pub use state::ParentalControlState;
pub use store::{FileStore, KeyValueStore, MemoryStore};
pub use threat::{ThreatAssessment, ThreatIndicator, ThreatLevel, ThreatScanner};
