mod enforcer;
mod geo_provider;
mod second_factor;

pub use enforcer::Enforcer;
pub use geo_provider::{GeoProvider, LookupTarget};
pub use second_factor::SecondFactor;
