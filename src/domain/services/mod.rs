mod geo_fence;

pub use geo_fence::GeoFence;
