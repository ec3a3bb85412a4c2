//! Geo Fence Service
//!
//! Pure domain logic for matching a resolved location against geo rules.
//! This service has NO external dependencies - it's pure Rust.

use crate::domain::entities::{GeoRule, GeolocationRecord, RuleSet};
use crate::domain::value_objects::{Coordinates, FieldMatcher};

/// Geo fence evaluator.
///
/// A rule matches when every populated criterion passes:
/// 1. Textual fields (country, region, city, postal, org, hostname)
/// 2. Great-circle distance to a reference point
///
/// A rule set matches when any of its rules does.
pub struct GeoFence;

impl GeoFence {
    /// Check a record against a whole rule set.
    ///
    /// # Arguments
    /// * `record` - Resolved location of the source address
    /// * `rules` - Rules configured for the listener
    /// * `local` - This machine's coordinates, if known; used by distance
    ///   rules without an explicit reference point
    pub fn matches_set(record: &GeolocationRecord, rules: &RuleSet, local: Option<Coordinates>) -> bool {
        if rules.is_empty() {
            return true;
        }
        rules
            .rules()
            .iter()
            .any(|rule| Self::matches_rule(record, rule, local))
    }

    /// Check a record against a single rule.
    pub fn matches_rule(record: &GeolocationRecord, rule: &GeoRule, local: Option<Coordinates>) -> bool {
        let fields: [(&Option<FieldMatcher>, &str); 6] = [
            (&rule.country, &record.country),
            (&rule.region, &record.region),
            (&rule.city, &record.city),
            (&rule.postal, &record.postal),
            (&rule.org, &record.org),
            (&rule.hostname, &record.hostname),
        ];

        let fields_pass = fields.into_iter().all(|(matcher, value)| match matcher {
            Some(m) => m.matches(value),
            None => true,
        });
        if !fields_pass {
            return false;
        }

        if rule.distance_km > 0.0 {
            return Self::within_distance(record, rule, local);
        }

        true
    }

    fn within_distance(record: &GeolocationRecord, rule: &GeoRule, local: Option<Coordinates>) -> bool {
        if record.location.is_unknown() {
            tracing::debug!(ip = %record.ip, "no coordinates for remote address, failing distance check");
            return false;
        }

        let reference = if rule.reference.is_unknown() {
            match local {
                Some(c) if !c.is_unknown() => c,
                _ => {
                    tracing::debug!("local coordinates unavailable, failing distance check");
                    return false;
                }
            }
        } else {
            rule.reference
        };

        let distance = reference.distance_km(&record.location);
        if distance > rule.distance_km {
            tracing::debug!(
                ip = %record.ip,
                "distance {:.1} km exceeds maximum {:.1} km",
                distance,
                rule.distance_km
            );
            return false;
        }

        true
    }
}
