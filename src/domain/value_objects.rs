//! Value Objects - Immutable domain primitives
//!
//! Value objects are identified by their value rather than identity.
//! They are immutable and can be freely shared.

use serde::{Deserialize, Serialize};

/// Mean equatorial Earth radius used by the distance check, in meters.
pub const EARTH_RADIUS_METERS: f64 = 6_378_100.0;

/// A latitude/longitude pair in degrees.
///
/// `(0, 0)` doubles as "unknown": the geolocation provider yields it for
/// a missing or malformed location string, and every distance check
/// against an unknown point fails closed.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Parse a combined `"lat,lon"` location string.
    ///
    /// Anything that is not two comma separated floats yields `(0, 0)`.
    ///
    /// # Examples
    /// ```
    /// use knockgate::domain::value_objects::Coordinates;
    ///
    /// assert_eq!(Coordinates::from_loc("48.8534,2.3488"), Coordinates::new(48.8534, 2.3488));
    /// assert!(Coordinates::from_loc("garbage").is_unknown());
    /// ```
    pub fn from_loc(loc: &str) -> Self {
        let mut parts = loc.split(',');
        let (Some(lat), Some(lon), None) = (parts.next(), parts.next(), parts.next()) else {
            return Self::default();
        };
        match (lat.trim().parse::<f64>(), lon.trim().parse::<f64>()) {
            (Ok(lat), Ok(lon)) => Self { lat, lon },
            _ => Self::default(),
        }
    }

    /// Whether this is the `(0, 0)` "unknown location" marker.
    pub fn is_unknown(&self) -> bool {
        self.lat == 0.0 && self.lon == 0.0
    }

    /// Great-circle distance to `other` in kilometers (haversine formula).
    pub fn distance_km(&self, other: &Coordinates) -> f64 {
        let la1 = self.lat.to_radians();
        let la2 = other.lat.to_radians();
        let dlat = la2 - la1;
        let dlon = (other.lon - self.lon).to_radians();

        let h = (dlat / 2.0).sin().powi(2) + la1.cos() * la2.cos() * (dlon / 2.0).sin().powi(2);

        2.0 * EARTH_RADIUS_METERS * h.sqrt().asin() / 1000.0
    }
}

impl std::fmt::Display for Coordinates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{}", self.lat, self.lon)
    }
}

/// Matcher for a single textual geolocation field.
///
/// Comparison is case-insensitive; the needle is stored uppercased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldMatcher {
    /// Field must equal the value.
    Exact(String),
    /// Field must contain the value.
    Contains(String),
}

impl FieldMatcher {
    /// Wildcard sentinel that turns a rule value into a substring match.
    pub const WILDCARD: char = '*';

    /// Parse a rule value as written in configuration.
    ///
    /// Empty means "no constraint" and yields `None`. A leading `*` selects
    /// substring matching on the remainder.
    ///
    /// # Examples
    /// ```
    /// use knockgate::domain::value_objects::FieldMatcher;
    ///
    /// assert_eq!(FieldMatcher::parse(""), None);
    /// assert_eq!(FieldMatcher::parse("us"), Some(FieldMatcher::Exact("US".into())));
    /// assert_eq!(FieldMatcher::parse("*eu"), Some(FieldMatcher::Contains("EU".into())));
    /// ```
    pub fn parse(value: &str) -> Option<Self> {
        if value.is_empty() {
            return None;
        }
        match value.strip_prefix(Self::WILDCARD) {
            Some(rest) => Some(Self::Contains(rest.to_uppercase())),
            None => Some(Self::Exact(value.to_uppercase())),
        }
    }

    pub fn matches(&self, field: &str) -> bool {
        let field = field.to_uppercase();
        match self {
            Self::Exact(expected) => field == *expected,
            Self::Contains(needle) => field.contains(needle.as_str()),
        }
    }
}

impl std::fmt::Display for FieldMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exact(v) => write!(f, "{}", v),
            Self::Contains(v) => write!(f, "{}{}", Self::WILDCARD, v),
        }
    }
}

/// Transport a listener binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    /// Parse a protocol name, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "TCP" => Some(Self::Tcp),
            "UDP" => Some(Self::Udp),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "TCP",
            Self::Udp => "UDP",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of a push second-factor challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Allow,
    Deny,
    /// Timed out, provider error or no profile: take no action.
    Indeterminate,
}
