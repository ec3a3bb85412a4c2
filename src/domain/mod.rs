//! Domain Layer
//!
//! Entities, value objects, outbound ports and pure services.
//! Nothing here performs I/O.

pub mod entities;
pub mod errors;
pub mod ports;
pub mod services;
pub mod value_objects;
