//! Second-Factor Port
//!
//! Defines the interface for out-of-band push authentication.

use crate::domain::value_objects::AuthOutcome;
use async_trait::async_trait;
use std::net::IpAddr;

/// Push-based second factor.
///
/// The call resolves once the user answered the challenge or the provider
/// gave up. Implementations never fail: provider errors and timeouts are
/// reported as [`AuthOutcome::Indeterminate`].
#[async_trait]
pub trait SecondFactor: Send + Sync {
    /// Challenge the user behind `profile` about a knock from `ip` on `listener`.
    async fn authenticate(&self, listener: &str, profile: &str, ip: IpAddr) -> AuthOutcome;
}
