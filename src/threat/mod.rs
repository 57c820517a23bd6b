//! Runtime environment threat scoring.
//!
//! Independent probes each look for one kind of compromise (root, debugger,
//! hooking framework, emulator, build integrity, developer settings). Their
//! findings are combined into a weighted score and a coarse [`ThreatLevel`].
//!
//! A probe that errors or panics counts as "not detected". A broken probe must
//! never lock a legitimate guardian out of their own controls, so the scanner
//! fails open per indicator and logs the failure instead.
//!
//! Assessments are cached for a short TTL since some probes walk `/proc`.

pub mod probes;

pub use probes::default_probes;

use crate::clock::MonotonicInstant;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default assessment cache lifetime
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);

/// One kind of compromise a probe can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatIndicator {
    Root,
    HookFramework,
    IntegrityTampered,
    Debugger,
    Emulator,
    DeveloperMode,
    RemoteDebugBridge,
}

impl ThreatIndicator {
    pub const ALL: [ThreatIndicator; 7] = [
        ThreatIndicator::Root,
        ThreatIndicator::HookFramework,
        ThreatIndicator::IntegrityTampered,
        ThreatIndicator::Debugger,
        ThreatIndicator::Emulator,
        ThreatIndicator::DeveloperMode,
        ThreatIndicator::RemoteDebugBridge,
    ];

    /// Contribution to the threat score
    pub fn weight(self) -> u32 {
        match self {
            ThreatIndicator::Root => 50,
            ThreatIndicator::HookFramework => 60,
            ThreatIndicator::IntegrityTampered => 70,
            ThreatIndicator::Debugger => 40,
            ThreatIndicator::Emulator => 20,
            ThreatIndicator::DeveloperMode => 5,
            ThreatIndicator::RemoteDebugBridge => 10,
        }
    }
}

/// Ordinal classification of a threat score
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ThreatLevel {
    #[default]
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl ThreatLevel {
    pub fn from_score(score: u32) -> Self {
        match score {
            s if s >= 100 => ThreatLevel::Critical,
            s if s >= 50 => ThreatLevel::High,
            s if s >= 20 => ThreatLevel::Medium,
            s if s >= 5 => ThreatLevel::Low,
            _ => ThreatLevel::None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ThreatLevel::None => "none",
            ThreatLevel::Low => "low",
            ThreatLevel::Medium => "medium",
            ThreatLevel::High => "high",
            ThreatLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreatAssessment {
    pub indicators: BTreeSet<ThreatIndicator>,
    pub score: u32,
    pub level: ThreatLevel,
    pub assessed_at: MonotonicInstant,
}

impl ThreatAssessment {
    pub fn from_indicators(
        indicators: BTreeSet<ThreatIndicator>,
        assessed_at: MonotonicInstant,
    ) -> Self {
        let score = indicators.iter().map(|i| i.weight()).sum();
        Self {
            indicators,
            score,
            level: ThreatLevel::from_score(score),
            assessed_at,
        }
    }

    pub fn is_detected(&self, indicator: ThreatIndicator) -> bool {
        self.indicators.contains(&indicator)
    }
}

/// A single environment check
pub trait EnvironmentProbe: Send + Sync {
    /// The indicator this probe reports
    fn indicator(&self) -> ThreatIndicator;

    /// Look for the indicator; errors are treated as "not detected"
    fn detect(&self) -> anyhow::Result<bool>;
}

/// Probe with a fixed answer
///
/// For hosts that run their own environment checks and feed the results in,
/// and for simulating a compromised device.
#[derive(Debug, Clone, Copy)]
pub struct StaticProbe {
    pub indicator: ThreatIndicator,
    pub detected: bool,
}

impl StaticProbe {
    pub fn detected(indicator: ThreatIndicator) -> Self {
        Self {
            indicator,
            detected: true,
        }
    }
}

impl EnvironmentProbe for StaticProbe {
    fn indicator(&self) -> ThreatIndicator {
        self.indicator
    }

    fn detect(&self) -> anyhow::Result<bool> {
        Ok(self.detected)
    }
}

/// Runs probes and caches the combined assessment
pub struct ThreatScanner {
    probes: Vec<Box<dyn EnvironmentProbe>>,
    ttl: Duration,
    cache: RwLock<Option<Arc<ThreatAssessment>>>,
}

impl fmt::Debug for ThreatScanner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreatScanner")
            .field("probes", &self.probes.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl ThreatScanner {
    pub fn new(probes: Vec<Box<dyn EnvironmentProbe>>, ttl: Duration) -> Self {
        Self {
            probes,
            ttl,
            cache: RwLock::new(None),
        }
    }

    /// Cached assessment if still within TTL, otherwise a fresh one
    pub fn assess(&self, now: MonotonicInstant) -> Arc<ThreatAssessment> {
        if let Some(cached) = self.cache.read().as_ref() {
            // A clock that went backwards invalidates the entry
            if let Some(age) = now.checked_since(cached.assessed_at) {
                if age < self.ttl {
                    debug!("Using cached threat assessment ({}ms old)", age.as_millis());
                    return Arc::clone(cached);
                }
            }
        }

        self.assess_fresh(now)
    }

    /// Run every probe now and replace the cached entry
    pub fn assess_fresh(&self, now: MonotonicInstant) -> Arc<ThreatAssessment> {
        let indicators = self
            .probes
            .iter()
            .filter_map(|probe| run_probe(&**probe).then(|| probe.indicator()))
            .collect();

        let assessment = Arc::new(ThreatAssessment::from_indicators(indicators, now));
        if assessment.level > ThreatLevel::None {
            info!(
                score = assessment.score,
                level = %assessment.level,
                "Environment threat indicators present: {:?}",
                assessment.indicators
            );
        }

        *self.cache.write() = Some(Arc::clone(&assessment));
        assessment
    }

    /// Drop the cached assessment
    pub fn invalidate(&self) {
        *self.cache.write() = None;
    }
}

fn run_probe(probe: &dyn EnvironmentProbe) -> bool {
    let indicator = probe.indicator();
    match catch_unwind(AssertUnwindSafe(|| probe.detect())) {
        Ok(Ok(detected)) => detected,
        Ok(Err(e)) => {
            warn!("Threat probe {:?} failed, treating as not detected: {:#}", indicator, e);
            false
        }
        Err(_) => {
            warn!("Threat probe {:?} panicked, treating as not detected", indicator);
            false
        }
    }
}
