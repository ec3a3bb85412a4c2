//! knockgate Library
//!
//! Passive port-knock gateway: listeners turn inbound connections into
//! access evaluations (geo fence, push second factor) whose outcome is
//! written to firewall address lists. Exposed as a library for the
//! integration tests.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

// Re-export commonly used types
pub use adapters::inbound::{Dispatcher, KnockListener, ListenerManager};
pub use application::{AccessController, CacheSettings, GeoLocator};
pub use config::{load_config, Config, ConfigError};
pub use domain::entities::{AccessDecision, EvaluationOutcome, GeoRule, GeolocationRecord, ListenerProfile, RuleSet};
pub use domain::ports::{Enforcer, GeoProvider, LookupTarget, SecondFactor};
pub use domain::services::GeoFence;
pub use domain::value_objects::{AuthOutcome, Coordinates, FieldMatcher, Protocol};
pub use infrastructure::ShutdownController;
