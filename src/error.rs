//! Error types

use crate::gate::VerifyResult;
use crate::threat::ThreatLevel;

/// Parental-control errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// PIN is not a digit string within the allowed length range
    #[error(
        "PIN must be {}-{} digits",
        crate::credential::MIN_PIN_LEN,
        crate::credential::MAX_PIN_LEN
    )]
    InvalidPinFormat,

    /// Operation needs a guardian PIN but none has been set
    #[error("No guardian PIN has been set")]
    NoPinSet,

    /// Guardian verification for a protected operation did not succeed
    #[error("Guardian verification failed: {0:?}")]
    VerificationFailed(VerifyResult),

    /// Runtime environment is more compromised than the caller tolerates
    #[error("Threat level {level} exceeds tolerated maximum {max_tolerated}")]
    ThreatExceeded {
        level: ThreatLevel,
        max_tolerated: ThreatLevel,
    },

    /// Developer bypass requested on a gate that was not built to allow it
    #[error("Developer bypass is not available in this build")]
    BypassUnavailable,

    /// Unrecognised content filter tag
    #[error("Unknown content filter level: {0}")]
    UnknownFilterLevel(String),

    /// Configuration error
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;
