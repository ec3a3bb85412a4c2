//! Duo Push Authenticator
//!
//! Implements SecondFactor with the Duo Auth API v2: a `check` call to
//! validate the integration, then a blocking `auth` call with a push to
//! the user's enrolled device.

use crate::domain::errors::SecondFactorError;
use crate::domain::ports::SecondFactor;
use crate::domain::value_objects::AuthOutcome;
use async_trait::async_trait;
use base64::Engine;
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Deserialize;
use sha1::Sha1;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

type HmacSha1 = Hmac<Sha1>;

/// Everything outside the RFC 3986 unreserved set gets escaped.
const DUO_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.').remove(b'~');

const CHECK_PATH: &str = "/auth/v2/check";
const AUTH_PATH: &str = "/auth/v2/auth";

/// Push type shown on the device when the listener has no name.
pub const DEFAULT_PUSH_TYPE: &str = "knockgate";

/// The auth call blocks until the user answers the push (about a minute).
const REQUEST_TIMEOUT: Duration = Duration::from_secs(90);

/// One Duo Auth API integration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuoCredentials {
    /// User the push is sent to
    pub username: String,
    /// Integration key
    pub integration: String,
    /// Secret key
    pub secret: String,
    /// API hostname, e.g. `api-XXXXXXXX.duosecurity.com`
    pub hostname: String,
}

#[derive(Debug, Deserialize)]
struct DuoEnvelope<T> {
    stat: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    message_detail: Option<String>,
    response: Option<T>,
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    #[serde(default)]
    result: String,
    #[serde(default)]
    status_msg: String,
}

/// Duo Auth API client keyed by credential set name.
pub struct DuoAuthenticator {
    client: reqwest::Client,
    credentials: HashMap<String, DuoCredentials>,
    scheme: String,
}

impl DuoAuthenticator {
    pub fn new(credentials: HashMap<String, DuoCredentials>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            credentials,
            scheme: "https".to_string(),
        })
    }

    /// Talk to the API over another scheme (plain `http` against a local stand-in).
    pub fn with_scheme(mut self, scheme: &str) -> Self {
        self.scheme = scheme.to_string();
        self
    }

    async fn push(&self, listener: &str, profile: &str, ip: IpAddr) -> Result<AuthOutcome, SecondFactorError> {
        let creds = self
            .credentials
            .get(profile)
            .ok_or_else(|| SecondFactorError::UnknownProfile(profile.to_string()))?;

        let check: DuoEnvelope<serde_json::Value> = self.call(creds, "GET", CHECK_PATH, &[]).await?;
        if check.stat != "OK" {
            return Err(provider_error(&check));
        }

        let push_type = if listener.is_empty() { DEFAULT_PUSH_TYPE } else { listener };
        let display = format!("From IP: {}", ip);
        let params = [
            ("username", creds.username.as_str()),
            ("factor", "push"),
            ("device", "auto"),
            ("display_username", display.as_str()),
            ("type", push_type),
        ];
        let auth: DuoEnvelope<AuthResponse> = self.call(creds, "POST", AUTH_PATH, &params).await?;
        if auth.stat != "OK" {
            return Err(provider_error(&auth));
        }

        let Some(response) = auth.response else {
            return Ok(AuthOutcome::Indeterminate);
        };
        tracing::debug!(ip = %ip, "duo answered {}: {}", response.result, response.status_msg);

        Ok(classify(&response))
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        creds: &DuoCredentials,
        method: &str,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<DuoEnvelope<T>, SecondFactorError> {
        let date = chrono::Utc::now().format("%a, %d %b %Y %H:%M:%S %z").to_string();
        let query = canonical_params(params);
        let canon = canonical_request(&date, method, &creds.hostname, path, &query);
        let authorization = authorization_header(&creds.integration, &creds.secret, &canon)?;

        let base = format!("{}://{}{}", self.scheme, creds.hostname, path);
        let request = match method {
            "POST" => self
                .client
                .post(&base)
                .header("content-type", "application/x-www-form-urlencoded")
                .body(query),
            _ if query.is_empty() => self.client.get(&base),
            _ => self.client.get(format!("{}?{}", base, query)),
        };

        let response = request
            .header("date", date)
            .header("authorization", authorization)
            .send()
            .await
            .map_err(|e| SecondFactorError::Request(e.to_string()))?;

        // failures still come back as a JSON envelope with a 4xx/5xx status
        let body = response
            .text()
            .await
            .map_err(|e| SecondFactorError::Request(e.to_string()))?;
        serde_json::from_str(&body).map_err(|e| SecondFactorError::Request(format!("bad response: {}", e)))
    }
}

#[async_trait]
impl SecondFactor for DuoAuthenticator {
    async fn authenticate(&self, listener: &str, profile: &str, ip: IpAddr) -> AuthOutcome {
        match self.push(listener, profile, ip).await {
            Ok(outcome) => {
                tracing::info!(ip = %ip, listener = %listener, "duo push outcome: {:?}", outcome);
                outcome
            }
            Err(e) => {
                tracing::error!(ip = %ip, listener = %listener, profile = %profile, "duo error: {}", e);
                AuthOutcome::Indeterminate
            }
        }
    }
}

fn classify(response: &AuthResponse) -> AuthOutcome {
    match response.result.as_str() {
        "allow" => AuthOutcome::Allow,
        "deny" if !response.status_msg.contains("timed out") => AuthOutcome::Deny,
        _ => AuthOutcome::Indeterminate,
    }
}

fn provider_error<T>(envelope: &DuoEnvelope<T>) -> SecondFactorError {
    let message = match (&envelope.message, &envelope.message_detail) {
        (Some(m), Some(d)) => format!("{} ({})", m, d),
        (Some(m), None) => m.clone(),
        _ => String::new(),
    };
    SecondFactorError::Provider {
        stat: envelope.stat.clone(),
        message,
    }
}

fn encode_component(value: &str) -> String {
    utf8_percent_encode(value, DUO_ENCODE_SET).to_string()
}

/// Parameters sorted by key and joined as `k=v&k=v`.
fn canonical_params(params: &[(&str, &str)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (encode_component(k), encode_component(v)))
        .collect();
    encoded.sort();
    encoded
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

fn canonical_request(date: &str, method: &str, host: &str, path: &str, params: &str) -> String {
    [
        date.to_string(),
        method.to_uppercase(),
        host.to_lowercase(),
        path.to_string(),
        params.to_string(),
    ]
    .join("\n")
}

fn authorization_header(ikey: &str, skey: &str, canon: &str) -> Result<String, SecondFactorError> {
    let mut mac = HmacSha1::new_from_slice(skey.as_bytes())
        .map_err(|e| SecondFactorError::Request(e.to_string()))?;
    mac.update(canon.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());

    let token = base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", ikey, signature));
    Ok(format!("Basic {}", token))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_encode_component() {
        assert_eq!(encode_component("abc-_.~XYZ09"), "abc-_.~XYZ09");
        assert_eq!(encode_component("From IP: 1.2.3.4"), "From%20IP%3A%201.2.3.4");
        assert_eq!(encode_component("a+b/c"), "a%2Bb%2Fc");
        assert_eq!(encode_component("é"), "%C3%A9");
        assert_eq!(encode_component("a*b"), "a%2Ab");
    }

    #[test]
    fn test_envelope_without_response() {
        let check: DuoEnvelope<serde_json::Value> = serde_json::from_str(
            r#"{"stat":"FAIL","code":40101,"message":"Missing request credentials"}"#,
        )
        .unwrap();
        assert_eq!(check.stat, "FAIL");
        assert!(check.response.is_none());

        let auth: DuoEnvelope<AuthResponse> = serde_json::from_str(r#"{"stat":"OK"}"#).unwrap();
        assert!(auth.response.is_none());

        let auth: DuoEnvelope<AuthResponse> =
            serde_json::from_str(r#"{"stat":"OK","response":{"result":"allow"}}"#).unwrap();
        assert_eq!(auth.response.unwrap().result, "allow");
    }

    #[test]
    fn test_canonical_params_sorted() {
        let params = [("username", "alice"), ("factor", "push"), ("device", "auto")];
        assert_eq!(canonical_params(&params), "device=auto&factor=push&username=alice");
        assert_eq!(canonical_params(&[]), "");
    }

    #[test]
    fn test_canonical_request_layout() {
        let canon = canonical_request(
            "Tue, 21 Aug 2012 17:29:18 -0000",
            "post",
            "API-XXXXXXXX.duosecurity.com",
            "/accounts/v1/account/list",
            "realname=First%20Last&username=root",
        );

        assert_eq!(
            canon,
            "Tue, 21 Aug 2012 17:29:18 -0000\nPOST\napi-xxxxxxxx.duosecurity.com\n/accounts/v1/account/list\nrealname=First%20Last&username=root"
        );
    }

    #[test]
    fn test_authorization_header_known_vector() {
        let canon = "Tue, 21 Aug 2012 17:29:18 -0000\nPOST\napi-xxxxxxxx.duosecurity.com\n/accounts/v1/account/list\nrealname=First%20Last&username=root";
        let header = authorization_header(
            "DIWJ8X6AEYOR5OMC6TQ1",
            "Zh5eGmUq9zpfQnyUIu5OL9iWoMMv5ZNmk3zLJ4Ep",
            canon,
        )
        .unwrap();

        let token = header.strip_prefix("Basic ").unwrap();
        let decoded = base64::engine::general_purpose::STANDARD.decode(token).unwrap();
        let decoded = String::from_utf8(decoded).unwrap();
        assert_eq!(decoded, "DIWJ8X6AEYOR5OMC6TQ1:2d97d6166319781b5a3a07af39d366f491234edc");
    }

    #[test]
    fn test_classify() {
        let response = |result: &str, msg: &str| AuthResponse {
            result: result.to_string(),
            status_msg: msg.to_string(),
        };

        assert_eq!(classify(&response("allow", "Success. Logging you in...")), AuthOutcome::Allow);
        assert_eq!(classify(&response("deny", "Login request denied.")), AuthOutcome::Deny);
        assert_eq!(
            classify(&response("deny", "Login request timed out.")),
            AuthOutcome::Indeterminate
        );
        assert_eq!(classify(&response("waiting", "")), AuthOutcome::Indeterminate);
    }

    #[tokio::test]
    async fn test_unknown_profile_is_indeterminate() {
        let authenticator = DuoAuthenticator::new(HashMap::new()).unwrap();
        let ip = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7));

        assert_eq!(authenticator.authenticate("ssh", "missing", ip).await, AuthOutcome::Indeterminate);
        assert_eq!(authenticator.authenticate("ssh", "", ip).await, AuthOutcome::Indeterminate);
    }
}
