//! Configuration
//!
//! YAML file plus a handful of environment overrides. Loading validates
//! everything up front; any error here is fatal at startup.

use crate::adapters::outbound::{DuoCredentials, RouterOsSettings, DEFAULT_BASE_URL};
use crate::application::CacheSettings;
use crate::domain::entities::{GeoRule, ListTarget, ListenerProfile, RuleSet};
use crate::domain::value_objects::{Coordinates, FieldMatcher, Protocol};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid YAML: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("routeros.url is required")]
    MissingRouterUrl,
    #[error("duoCreds {0:?}: username, secret, integration and hostname are all required")]
    IncompleteDuoCreds(String),
    #[error("listener {listener:?}: invalid protocol {proto:?} (expected TCP or UDP)")]
    InvalidProtocol { listener: String, proto: String },
    #[error("listener {listener:?}: invalid port {port}")]
    InvalidPort { listener: String, port: i64 },
    #[error("listener {0:?}: allowListName is required")]
    MissingAllowList(String),
    #[error("listener {0:?}: needs geo rules or a duoName")]
    NoRules(String),
    #[error("listener {listener:?}: unknown duoName {name:?}")]
    UnknownDuoCreds { listener: String, name: String },
    #[error("listener {listener:?}: geo rule #{index} has no criteria")]
    EmptyGeoRule { listener: String, index: usize },
    #[error("invalid {key}: {value:?}")]
    InvalidOverride { key: &'static str, value: String },
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,
    #[serde(default = "default_max_concurrent_evaluations")]
    pub max_concurrent_evaluations: usize,
    #[serde(default)]
    pub debug: bool,
    pub routeros: RouterOsConfig,
    #[serde(default)]
    pub ipinfo: IpInfoConfig,
    #[serde(default)]
    pub duo_creds: HashMap<String, DuoCredsConfig>,
    #[serde(default)]
    pub listeners: Vec<ListenerConfig>,
}

#[derive(Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RouterOsConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub post_payload: String,
    #[serde(default)]
    pub insecure_skip_verify: bool,
    #[serde(default = "default_routeros_timeout_secs")]
    pub timeout_secs: u64,
}

impl std::fmt::Debug for RouterOsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterOsConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("post_payload", &self.post_payload)
            .field("insecure_skip_verify", &self.insecure_skip_verify)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct IpInfoConfig {
    #[serde(default)]
    pub token: String,
    /// Seconds a lookup stays cached
    #[serde(default = "default_cache_time")]
    pub cache_time: u64,
    #[serde(default = "default_cache_max_count")]
    pub cache_max_count: usize,
    #[serde(default = "default_ipinfo_base_url")]
    pub base_url: String,
}

impl Default for IpInfoConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            cache_time: default_cache_time(),
            cache_max_count: default_cache_max_count(),
            base_url: default_ipinfo_base_url(),
        }
    }
}

impl std::fmt::Debug for IpInfoConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpInfoConfig")
            .field("token", &if self.token.is_empty() { "" } else { "<redacted>" })
            .field("cache_time", &self.cache_time)
            .field("cache_max_count", &self.cache_max_count)
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[derive(Deserialize, Clone, Default)]
pub struct DuoCredsConfig {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub integration: String,
    #[serde(default)]
    pub hostname: String,
}

impl DuoCredsConfig {
    fn is_complete(&self) -> bool {
        !self.username.is_empty()
            && !self.secret.is_empty()
            && !self.integration.is_empty()
            && !self.hostname.is_empty()
    }
}

impl std::fmt::Debug for DuoCredsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuoCredsConfig")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .field("integration", &self.integration)
            .field("hostname", &self.hostname)
            .finish()
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListenerConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub proto: String,
    #[serde(default)]
    pub port: i64,
    #[serde(default)]
    pub duo_name: String,
    #[serde(default)]
    pub allow_list_name: String,
    #[serde(default)]
    pub allow_list_timeout: u32,
    #[serde(default)]
    pub deny_list_name: String,
    #[serde(default)]
    pub deny_list_timeout: u32,
    #[serde(default)]
    pub geos: Vec<GeoConfig>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct GeoConfig {
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub postal: String,
    #[serde(default)]
    pub org: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub lat: f64,
    #[serde(default)]
    pub lon: f64,
    /// Kilometers; `0` disables the distance check
    #[serde(default)]
    pub distance: f64,
}

impl GeoConfig {
    fn to_rule(&self) -> GeoRule {
        GeoRule {
            country: FieldMatcher::parse(&self.country),
            region: FieldMatcher::parse(&self.region),
            city: FieldMatcher::parse(&self.city),
            postal: FieldMatcher::parse(&self.postal),
            org: FieldMatcher::parse(&self.org),
            hostname: FieldMatcher::parse(&self.hostname),
            distance_km: self.distance,
            reference: Coordinates::new(self.lat, self.lon),
        }
    }
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_max_concurrent_evaluations() -> usize {
    64
}

fn default_routeros_timeout_secs() -> u64 {
    10
}

fn default_cache_time() -> u64 {
    3600
}

fn default_cache_max_count() -> usize {
    1000
}

fn default_ipinfo_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

impl Config {
    /// Parse a YAML document without touching the environment.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Apply overrides from `env`, a lookup such as `std::env::var(..).ok()`.
    pub fn apply_env_overrides<F>(&mut self, env: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if env("DEBUG").is_some() {
            self.debug = true;
        }

        if let Some(value) = env("KNOCKGATE_BIND_ADDR") {
            self.bind_address = value.parse().map_err(|_| ConfigError::InvalidOverride {
                key: "KNOCKGATE_BIND_ADDR",
                value,
            })?;
        }

        if let Some(value) = env("KNOCKGATE_MAX_CONCURRENT_EVALUATIONS") {
            self.max_concurrent_evaluations = value.parse().map_err(|_| ConfigError::InvalidOverride {
                key: "KNOCKGATE_MAX_CONCURRENT_EVALUATIONS",
                value,
            })?;
        }

        Ok(())
    }

    /// Check every constraint the runtime relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.routeros.url.is_empty() {
            return Err(ConfigError::MissingRouterUrl);
        }

        let mut cred_names: Vec<&String> = self.duo_creds.keys().collect();
        cred_names.sort();
        for name in cred_names {
            if !self.duo_creds[name].is_complete() {
                return Err(ConfigError::IncompleteDuoCreds(name.clone()));
            }
        }

        for listener in &self.listeners {
            self.validate_listener(listener)?;
        }

        Ok(())
    }

    fn validate_listener(&self, listener: &ListenerConfig) -> Result<(), ConfigError> {
        let name = listener.name.clone();

        if Protocol::parse(&listener.proto).is_none() {
            return Err(ConfigError::InvalidProtocol {
                listener: name,
                proto: listener.proto.clone(),
            });
        }
        if !(1..=i64::from(u16::MAX)).contains(&listener.port) {
            return Err(ConfigError::InvalidPort {
                listener: name,
                port: listener.port,
            });
        }
        if listener.allow_list_name.is_empty() {
            return Err(ConfigError::MissingAllowList(name));
        }
        if listener.geos.is_empty() && listener.duo_name.is_empty() {
            return Err(ConfigError::NoRules(name));
        }
        if !listener.duo_name.is_empty() && !self.duo_creds.contains_key(&listener.duo_name) {
            return Err(ConfigError::UnknownDuoCreds {
                listener: name,
                name: listener.duo_name.clone(),
            });
        }
        if let Some(index) = listener.geos.iter().position(|g| g.to_rule().is_empty()) {
            return Err(ConfigError::EmptyGeoRule {
                listener: name,
                index,
            });
        }

        Ok(())
    }

    /// Domain view of every listener.
    ///
    /// Call on a validated config; listeners that fail validation are skipped.
    pub fn listener_profiles(&self) -> Vec<ListenerProfile> {
        self.listeners
            .iter()
            .filter_map(|l| {
                let protocol = Protocol::parse(&l.proto)?;
                let port = u16::try_from(l.port).ok()?;
                Some(ListenerProfile {
                    name: l.name.clone(),
                    protocol,
                    port,
                    second_factor: (!l.duo_name.is_empty()).then(|| l.duo_name.clone()),
                    allow: ListTarget {
                        name: l.allow_list_name.clone(),
                        timeout_secs: l.allow_list_timeout,
                    },
                    deny: ListTarget {
                        name: l.deny_list_name.clone(),
                        timeout_secs: l.deny_list_timeout,
                    },
                    rules: RuleSet::new(l.geos.iter().map(GeoConfig::to_rule).collect()),
                })
            })
            .collect()
    }

    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            ttl: Duration::from_secs(self.ipinfo.cache_time),
            max_entries: self.ipinfo.cache_max_count,
        }
    }

    pub fn routeros_settings(&self) -> RouterOsSettings {
        RouterOsSettings {
            url: self.routeros.url.clone(),
            username: self.routeros.username.clone(),
            password: self.routeros.password.clone(),
            post_payload: self.routeros.post_payload.clone(),
            insecure_skip_verify: self.routeros.insecure_skip_verify,
            timeout: Duration::from_secs(self.routeros.timeout_secs),
        }
    }

    pub fn duo_credentials(&self) -> HashMap<String, DuoCredentials> {
        self.duo_creds
            .iter()
            .map(|(name, c)| {
                (
                    name.clone(),
                    DuoCredentials {
                        username: c.username.clone(),
                        integration: c.integration.clone(),
                        secret: c.secret.clone(),
                        hostname: c.hostname.clone(),
                    },
                )
            })
            .collect()
    }
}

/// Read, override from the process environment and validate.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let mut cfg = Config::from_yaml(&yaml)?;
    cfg.apply_env_overrides(|key| std::env::var(key).ok())?;
    cfg.validate()?;
    Ok(cfg)
}
