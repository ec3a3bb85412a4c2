//! RouterOS Enforcer
//!
//! Implements Enforcer by adding addresses to RouterOS firewall address
//! lists through the REST API.

use crate::adapters::outbound::gateway::discover_default_gateway;
use crate::domain::errors::EnforcementError;
use crate::domain::ports::Enforcer;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// Placeholder in the URL replaced by the default gateway address.
pub const GATEWAY_PLACEHOLDER: &str = "$GATEWAY";

const IP_PLACEHOLDER: &str = "$IP";
const LIST_PLACEHOLDER: &str = "$LIST";
const TIMEOUT_PLACEHOLDER: &str = "$TIMEOUT";

type GatewayDiscovery = fn() -> Result<Ipv4Addr, EnforcementError>;

/// Connection settings for the RouterOS REST API.
#[derive(Debug, Clone)]
pub struct RouterOsSettings {
    /// Endpoint URL, may contain `$GATEWAY`
    pub url: String,
    pub username: String,
    pub password: String,
    /// Request body template with `$IP`, `$LIST` and `$TIMEOUT` placeholders
    pub post_payload: String,
    pub insecure_skip_verify: bool,
    pub timeout: Duration,
}

/// RouterOS address-list client.
///
/// The endpoint URL is resolved lazily: while it still contains
/// `$GATEWAY`, every call tries to discover the default gateway and, once
/// that succeeds, the substituted URL is kept for good.
pub struct RouterOsEnforcer {
    client: reqwest::Client,
    url: RwLock<String>,
    username: String,
    password: String,
    post_payload: String,
    discover_gateway: GatewayDiscovery,
}

impl RouterOsEnforcer {
    pub fn new(settings: RouterOsSettings) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .danger_accept_invalid_certs(settings.insecure_skip_verify)
            .build()?;

        Ok(Self {
            client,
            url: RwLock::new(settings.url),
            username: settings.username,
            password: settings.password,
            post_payload: settings.post_payload,
            discover_gateway: discover_default_gateway,
        })
    }

    /// Replace the gateway discovery routine.
    pub fn with_gateway_discovery(mut self, discover: GatewayDiscovery) -> Self {
        self.discover_gateway = discover;
        self
    }

    /// Current endpoint URL.
    pub fn url(&self) -> String {
        self.url.read().clone()
    }

    /// Fill in the body template.
    pub fn render_payload(&self, ip: IpAddr, list: &str, timeout_secs: u32) -> String {
        self.post_payload
            .replace(IP_PLACEHOLDER, &ip.to_string())
            .replace(LIST_PLACEHOLDER, list)
            .replace(TIMEOUT_PLACEHOLDER, &timeout_secs.to_string())
    }

    fn resolve_url(&self) -> Result<String, EnforcementError> {
        {
            let url = self.url.read();
            if !url.contains(GATEWAY_PLACEHOLDER) {
                return Ok(url.clone());
            }
        }

        let gateway = (self.discover_gateway)()?;
        tracing::info!(gateway = %gateway, "discovered default gateway");

        let mut url = self.url.write();
        *url = url.replace(GATEWAY_PLACEHOLDER, &gateway.to_string());
        Ok(url.clone())
    }

    fn is_accepted(status: reqwest::StatusCode) -> bool {
        // 400 is what RouterOS answers for an address already on the list
        matches!(status.as_u16(), 200 | 201 | 400)
    }
}

#[async_trait]
impl Enforcer for RouterOsEnforcer {
    async fn add(&self, ip: IpAddr, list: &str, timeout_secs: u32) -> Result<(), EnforcementError> {
        if list.is_empty() {
            tracing::warn!(ip = %ip, "empty address list name, nothing to enforce");
            return Ok(());
        }

        let url = self.resolve_url()?;
        let payload = self.render_payload(ip, list, timeout_secs);
        tracing::debug!(url = %url, "enforcement payload: {}", payload);

        let response = self
            .client
            .put(&url)
            .basic_auth(&self.username, Some(&self.password))
            .header("content-type", "application/json")
            .body(payload)
            .send()
            .await
            .map_err(|e| EnforcementError::Request(e.to_string()))?;

        let status = response.status();
        if !Self::is_accepted(status) {
            let body = response.text().await.unwrap_or_default();
            tracing::debug!(ip = %ip, list = %list, "router refused address-list update: {} {}", status, body);
            return Err(EnforcementError::Rejected(status.as_u16()));
        }

        tracing::debug!(ip = %ip, list = %list, "router accepted address-list update: {}", status);
        Ok(())
    }
}
