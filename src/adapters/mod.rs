//! Adapters
//!
//! Inbound adapters accept knocks from the network; outbound adapters talk
//! to the geolocation service, the second-factor provider and the router.

pub mod inbound;
pub mod outbound;
