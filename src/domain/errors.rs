//! Domain Errors
//!
//! Failures the outbound ports can report back to the application layer.

/// Geolocation lookup failures. Never cached.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GeoLookupError {
    #[error("geolocation provider rate limit exceeded")]
    RateLimited,
    #[error("geolocation request failed: {0}")]
    Transport(String),
    #[error("invalid geolocation response: {0}")]
    Parse(String),
    #[error("local machine location is unknown")]
    LocalUnavailable,
}

/// Enforcement call failures. Logged by the caller, never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnforcementError {
    #[error("default gateway discovery failed: {0}")]
    Gateway(String),
    #[error("enforcement request failed: {0}")]
    Request(String),
    #[error("enforcement rejected with HTTP {0}")]
    Rejected(u16),
}

/// Second-factor provider failures. Always mapped to an indeterminate outcome.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SecondFactorError {
    #[error("unknown second-factor profile {0:?}")]
    UnknownProfile(String),
    #[error("second-factor request failed: {0}")]
    Request(String),
    #[error("second-factor provider returned {stat}: {message}")]
    Provider { stat: String, message: String },
}
