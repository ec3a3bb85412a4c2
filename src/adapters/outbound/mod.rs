mod duo_authenticator;
mod gateway;
mod ipinfo_provider;
mod routeros_enforcer;

pub use duo_authenticator::{DuoAuthenticator, DuoCredentials, DEFAULT_PUSH_TYPE};
pub use gateway::{discover_default_gateway, parse_default_gateway};
pub use ipinfo_provider::{IpInfoProvider, DEFAULT_BASE_URL};
pub use routeros_enforcer::{RouterOsEnforcer, RouterOsSettings, GATEWAY_PLACEHOLDER};
