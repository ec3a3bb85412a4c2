//! IPInfo Geolocation Provider
//!
//! Implements GeoProvider against the ipinfo.io JSON API.

use crate::domain::entities::GeolocationRecord;
use crate::domain::errors::GeoLookupError;
use crate::domain::ports::{GeoProvider, LookupTarget};
use crate::domain::value_objects::Coordinates;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::{Duration, Instant};

pub const DEFAULT_BASE_URL: &str = "https://ipinfo.io";

/// Marker the service puts in the body when the quota is exhausted.
const RATE_LIMIT_MARKER: &str = "Rate limit exceeded";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Response body of `GET /{ip}/json`. Every field may be missing.
#[derive(Debug, Default, Deserialize)]
struct IpInfoResponse {
    #[serde(default)]
    ip: String,
    #[serde(default)]
    hostname: String,
    #[serde(default)]
    city: String,
    #[serde(default)]
    region: String,
    #[serde(default)]
    country: String,
    #[serde(default)]
    loc: String,
    #[serde(default)]
    postal: String,
    #[serde(default)]
    org: String,
}

impl IpInfoResponse {
    fn into_record(self) -> GeolocationRecord {
        GeolocationRecord {
            location: Coordinates::from_loc(&self.loc),
            ip: self.ip,
            hostname: self.hostname,
            city: self.city,
            region: self.region,
            country: self.country,
            postal: self.postal,
            org: self.org,
            resolved_at: Instant::now(),
        }
    }
}

/// ipinfo.io client.
///
/// Performs exactly one HTTP request per lookup; caching happens in the
/// application layer.
pub struct IpInfoProvider {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl IpInfoProvider {
    /// Create a provider for `base_url` (normally [`DEFAULT_BASE_URL`]).
    ///
    /// An empty token means anonymous access.
    pub fn new(base_url: &str, token: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: (!token.is_empty()).then(|| token.to_string()),
        })
    }

    fn url_for(&self, target: LookupTarget) -> String {
        match target {
            LookupTarget::Local => format!("{}/json", self.base_url),
            LookupTarget::Remote(ip) => format!("{}/{}/json", self.base_url, ip),
        }
    }

    fn parse_body(body: &str) -> Result<GeolocationRecord, GeoLookupError> {
        if body.contains(RATE_LIMIT_MARKER) {
            return Err(GeoLookupError::RateLimited);
        }
        let parsed: IpInfoResponse =
            serde_json::from_str(body).map_err(|e| GeoLookupError::Parse(e.to_string()))?;
        Ok(parsed.into_record())
    }
}

#[async_trait]
impl GeoProvider for IpInfoProvider {
    async fn lookup(&self, target: LookupTarget) -> Result<GeolocationRecord, GeoLookupError> {
        let mut request = self
            .client
            .get(self.url_for(target))
            .header("accept", "application/json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        tracing::debug!(addr = %target, "querying ipinfo");
        let response = request
            .send()
            .await
            .map_err(|e| GeoLookupError::Transport(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| GeoLookupError::Transport(e.to_string()))?;

        // the quota message can come with either a 429 or a 200
        if !status.is_success() && !body.contains(RATE_LIMIT_MARKER) {
            return Err(GeoLookupError::Transport(format!("HTTP {}", status.as_u16())));
        }

        Self::parse_body(&body)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn test_url_for_remote_and_local() {
        let provider = IpInfoProvider::new("https://ipinfo.io/", "").unwrap();
        let ip = IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8));

        assert_eq!(provider.url_for(LookupTarget::Remote(ip)), "https://ipinfo.io/8.8.8.8/json");
        assert_eq!(provider.url_for(LookupTarget::Local), "https://ipinfo.io/json");
    }

    #[test]
    fn test_empty_token_is_anonymous() {
        let provider = IpInfoProvider::new(DEFAULT_BASE_URL, "").unwrap();
        assert!(provider.token.is_none());

        let provider = IpInfoProvider::new(DEFAULT_BASE_URL, "secret").unwrap();
        assert_eq!(provider.token.as_deref(), Some("secret"));
    }

    #[test]
    fn test_parse_full_body() {
        let body = r#"{
            "ip": "8.8.8.8",
            "hostname": "dns.google",
            "city": "Mountain View",
            "region": "California",
            "country": "US",
            "loc": "37.4056,-122.0775",
            "postal": "94043",
            "org": "AS15169 Google LLC",
            "timezone": "America/Los_Angeles"
        }"#;

        let record = IpInfoProvider::parse_body(body).unwrap();
        assert_eq!(record.country, "US");
        assert_eq!(record.hostname, "dns.google");
        assert_eq!(record.location, Coordinates::new(37.4056, -122.0775));
    }

    #[test]
    fn test_parse_missing_fields() {
        let record = IpInfoProvider::parse_body(r#"{"ip": "10.0.0.1", "bogon": true}"#).unwrap();
        assert_eq!(record.ip, "10.0.0.1");
        assert!(record.country.is_empty());
        assert!(record.location.is_unknown());
    }

    #[test]
    fn test_parse_rate_limited() {
        let body = r#"{"status": 429, "error": {"title": "Rate limit exceeded"}}"#;
        assert_eq!(IpInfoProvider::parse_body(body).unwrap_err(), GeoLookupError::RateLimited);
    }

    #[test]
    fn test_parse_garbage() {
        let err = IpInfoProvider::parse_body("<html>oops</html>").unwrap_err();
        assert!(matches!(err, GeoLookupError::Parse(_)));
    }
}
