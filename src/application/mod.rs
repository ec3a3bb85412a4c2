//! Application Layer
//!
//! Use cases that orchestrate the domain through its ports.

mod access_controller;
mod geo_locator;

pub use access_controller::{AccessController, InFlightGuard};
pub use geo_locator::{CacheSettings, GeoLocator};
