//! Error types for the anti-abuse pipeline.
//!
//! Following the taxonomy in the design: configuration errors are typed and
//! returned to the caller (they reject at load, per field, rather than
//! panicking), while per-connection/per-session failures are caught at the
//! pipeline boundary and folded into a [`crate::types::Verdict`] instead of
//! propagating as [`anyhow::Error`].

use thiserror::Error;

/// A problem found while validating or loading a [`crate::config::Config`].
///
/// A `ConfigError` never stops the whole component from starting. Per
/// taxonomy tier (3) in the design, the single offending rule is disabled
/// (logged at `warn!`) and the rest of the configuration loads normally.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid regex in {field}: {source}")]
    InvalidRegex {
        field: &'static str,
        #[source]
        source: regex::Error,
    },
    #[error("invalid CIDR `{value}` in {field}")]
    InvalidCidr { field: &'static str, value: String },
    #[error("{field} must be greater than zero, got {value}")]
    NonPositive { field: &'static str, value: i64 },
    #[error("failed to parse TOML configuration")]
    Toml(#[from] toml::de::Error),
}

/// Internal invariant violation. These are never shown to the front-end;
/// the affected session is terminated and the component continues running.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no such session for player {0}")]
    UnknownSession(uuid::Uuid),
    #[error("virtual world error: {0}")]
    VirtualWorld(String),
    #[error("packet sink rejected write: {0}")]
    SinkRejected(String),
}

/// Why a verification session resolved as `FAIL`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum VerificationError {
    #[error("too few movements ({got} < {min})")]
    TooFewMovements { got: u32, min: u32 },
    #[error("total distance too short ({got:.2} < {min:.2})")]
    DistanceTooShort { got: f64, min: f64 },
    #[error("deadline reached before the grace period elapsed")]
    InsufficientElapsed,
    #[error("movement path is too simple (single-axis / no direction changes)")]
    MovementTooSimple,
    #[error("inter-movement timing is too regular to be human")]
    UnnaturalTiming,
    #[error("virtual world error: {0}")]
    WorldError(String),
}
