//! Geolocation Provider Port
//!
//! Defines the interface for resolving IP addresses to geographic locations.

use crate::domain::entities::GeolocationRecord;
use crate::domain::errors::GeoLookupError;
use async_trait::async_trait;
use std::net::IpAddr;

/// Address to look up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LookupTarget {
    /// The machine this process runs on, as seen by the provider.
    Local,
    Remote(IpAddr),
}

impl std::fmt::Display for LookupTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Remote(ip) => write!(f, "{}", ip),
        }
    }
}

/// Provider for IP address to geographic location.
///
/// This is an outbound port that abstracts the remote geolocation service.
/// Implementations perform one uncached lookup per call; caching is the
/// resolver's job.
#[async_trait]
pub trait GeoProvider: Send + Sync {
    /// Look up a single address.
    ///
    /// The returned record carries parsed coordinates (`(0, 0)` when the
    /// provider had none) and the time the answer arrived.
    async fn lookup(&self, target: LookupTarget) -> Result<GeolocationRecord, GeoLookupError>;
}
