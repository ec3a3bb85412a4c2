//! Enforcement Port
//!
//! Defines the interface for pushing decisions to the external firewall.

use crate::domain::errors::EnforcementError;
use async_trait::async_trait;
use std::net::IpAddr;

/// Firewall address-list writer.
///
/// An "already present" answer from the firewall counts as success.
#[async_trait]
pub trait Enforcer: Send + Sync {
    /// Add `ip` to `list` for `timeout_secs` seconds.
    async fn add(&self, ip: IpAddr, list: &str, timeout_secs: u32) -> Result<(), EnforcementError>;
}
