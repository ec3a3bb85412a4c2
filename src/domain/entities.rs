//! Domain Entities - Core business objects
//!
//! These entities represent the core concepts of the knock gateway.
//! They have no external dependencies and contain only business logic.

use crate::domain::value_objects::{Coordinates, FieldMatcher, Protocol};
use std::time::Instant;

/// Geographic information resolved for an address.
///
/// Produced by the geolocation resolver and never mutated afterwards;
/// the cache hands out clones while the record is fresh.
#[derive(Debug, Clone)]
pub struct GeolocationRecord {
    /// Address the provider reported (the machine's own public IP for local lookups)
    pub ip: String,
    pub hostname: String,
    pub city: String,
    pub region: String,
    /// Country code (ISO 3166-1 alpha-2)
    pub country: String,
    pub postal: String,
    /// Owning organization, usually "AS<number> <name>"
    pub org: String,
    pub location: Coordinates,
    /// When the provider answered
    pub resolved_at: Instant,
}

impl GeolocationRecord {
    /// Whether this record is still usable under the given TTL.
    pub fn is_fresh(&self, ttl: std::time::Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.resolved_at) < ttl
    }
}

/// A single geographic criterion set.
///
/// Every populated field must pass for the rule to match.
#[derive(Debug, Clone, Default)]
pub struct GeoRule {
    pub country: Option<FieldMatcher>,
    pub region: Option<FieldMatcher>,
    pub city: Option<FieldMatcher>,
    pub postal: Option<FieldMatcher>,
    pub org: Option<FieldMatcher>,
    pub hostname: Option<FieldMatcher>,
    /// Maximum distance in kilometers; `0` disables the check
    pub distance_km: f64,
    /// Explicit reference point; `(0, 0)` means "this machine's location"
    pub reference: Coordinates,
}

impl GeoRule {
    /// Whether the rule constrains anything at all.
    pub fn is_empty(&self) -> bool {
        self.country.is_none()
            && self.region.is_none()
            && self.city.is_none()
            && self.postal.is_none()
            && self.org.is_none()
            && self.hostname.is_none()
            && self.distance_km <= 0.0
    }

    /// Whether the distance check must fall back to the local machine's coordinates.
    pub fn needs_local_reference(&self) -> bool {
        self.distance_km > 0.0 && self.reference.is_unknown()
    }
}

/// Ordered rules for one listener, combined with logical OR.
///
/// An empty set places no geographic restriction.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<GeoRule>,
}

impl RuleSet {
    pub fn new(rules: Vec<GeoRule>) -> Self {
        Self { rules }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rules(&self) -> &[GeoRule] {
        &self.rules
    }

    pub fn needs_local_reference(&self) -> bool {
        self.rules.iter().any(GeoRule::needs_local_reference)
    }
}

/// Target address list and its timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListTarget {
    pub name: String,
    pub timeout_secs: u32,
}

/// Everything the access pipeline needs to know about one listener.
#[derive(Debug, Clone)]
pub struct ListenerProfile {
    pub name: String,
    pub protocol: Protocol,
    pub port: u16,
    /// Name of the second-factor credential set, if any
    pub second_factor: Option<String>,
    pub allow: ListTarget,
    pub deny: ListTarget,
    pub rules: RuleSet,
}

impl ListenerProfile {
    pub fn allow_decision(&self) -> AccessDecision {
        AccessDecision::new(self.allow.name.clone(), self.allow.timeout_secs)
    }

    pub fn deny_decision(&self) -> AccessDecision {
        AccessDecision::new(self.deny.name.clone(), self.deny.timeout_secs)
    }
}

/// An enforcement instruction: add the source to `list_name` for `timeout_secs`.
///
/// An empty list name means no action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessDecision {
    pub list_name: String,
    pub timeout_secs: u32,
}

impl AccessDecision {
    pub fn new(list_name: String, timeout_secs: u32) -> Self {
        Self {
            list_name,
            timeout_secs,
        }
    }

    pub fn is_actionable(&self) -> bool {
        !self.list_name.is_empty()
    }
}

/// What happened to a single `evaluate` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvaluationOutcome {
    /// Another evaluation for the same source was already running.
    Duplicate,
    /// The pipeline produced a decision (possibly not actionable).
    Decided(AccessDecision),
    /// The pipeline could not decide; nothing was enforced.
    NoDecision,
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::time::Duration;

    fn record_at(resolved_at: Instant) -> GeolocationRecord {
        GeolocationRecord {
            ip: "8.8.8.8".to_string(),
            hostname: "dns.google".to_string(),
            city: "Mountain View".to_string(),
            region: "California".to_string(),
            country: "US".to_string(),
            postal: "94043".to_string(),
            org: "AS15169 Google LLC".to_string(),
            location: Coordinates::new(37.4056, -122.0775),
            resolved_at,
        }
    }

    // ===== GeolocationRecord Tests =====

    #[test]
    fn test_record_fresh_within_ttl() {
        let now = Instant::now();
        let record = record_at(now - Duration::from_secs(10));
        assert!(record.is_fresh(Duration::from_secs(60), now));
    }

    #[test]
    fn test_record_stale_after_ttl() {
        let now = Instant::now();
        let record = record_at(now - Duration::from_secs(61));
        assert!(!record.is_fresh(Duration::from_secs(60), now));
    }

    #[test]
    fn test_zero_ttl_is_never_fresh() {
        let now = Instant::now();
        assert!(!record_at(now).is_fresh(Duration::ZERO, now));
    }

    // ===== GeoRule Tests =====

    #[test]
    fn test_default_rule_is_empty() {
        assert!(GeoRule::default().is_empty());
    }

    #[test]
    fn test_rule_with_distance_is_not_empty() {
        let rule = GeoRule {
            distance_km: 50.0,
            ..Default::default()
        };
        assert!(!rule.is_empty());
        assert!(rule.needs_local_reference());
    }

    #[test]
    fn test_explicit_reference_does_not_need_local() {
        let rule = GeoRule {
            distance_km: 50.0,
            reference: Coordinates::new(0.0, 2.35),
            ..Default::default()
        };
        assert!(!rule.needs_local_reference());
    }

    #[test]
    fn test_rule_set_needs_local_if_any_rule_does() {
        let set = RuleSet::new(vec![
            GeoRule {
                country: FieldMatcher::parse("FR"),
                ..Default::default()
            },
            GeoRule {
                distance_km: 10.0,
                ..Default::default()
            },
        ]);
        assert_eq!(set.rules().len(), 2);
        assert!(set.needs_local_reference());
    }

    // ===== AccessDecision Tests =====

    #[test]
    fn test_decision_actionable() {
        assert!(AccessDecision::new("allow-ssh".to_string(), 3600).is_actionable());
        assert!(!AccessDecision::new(String::new(), 3600).is_actionable());
    }

    #[test]
    fn test_profile_decisions() {
        let profile = ListenerProfile {
            name: "ssh".to_string(),
            protocol: Protocol::Tcp,
            port: 2222,
            second_factor: None,
            allow: ListTarget {
                name: "allowed".to_string(),
                timeout_secs: 3600,
            },
            deny: ListTarget {
                name: "blocked".to_string(),
                timeout_secs: 86400,
            },
            rules: RuleSet::default(),
        };

        assert_eq!(
            profile.allow_decision(),
            AccessDecision::new("allowed".to_string(), 3600)
        );
        assert_eq!(
            profile.deny_decision(),
            AccessDecision::new("blocked".to_string(), 86400)
        );
    }
}
