//! Default Gateway Discovery
//!
//! Reads the IPv4 default route from the kernel routing table.

use crate::domain::errors::EnforcementError;
use std::net::Ipv4Addr;

const ROUTE_TABLE: &str = "/proc/net/route";

const RTF_UP: u16 = 0x0001;
const RTF_GATEWAY: u16 = 0x0002;

/// Extract the default gateway from the contents of `/proc/net/route`.
///
/// Addresses in that file are hex encoded in host (little-endian) order.
pub fn parse_default_gateway(table: &str) -> Option<Ipv4Addr> {
    table.lines().skip(1).find_map(|line| {
        let cols: Vec<&str> = line.split_whitespace().collect();
        if cols.len() < 8 {
            return None;
        }
        let destination = u32::from_str_radix(cols[1], 16).ok()?;
        let gateway = u32::from_str_radix(cols[2], 16).ok()?;
        let flags = u16::from_str_radix(cols[3], 16).ok()?;
        let mask = u32::from_str_radix(cols[7], 16).ok()?;

        let is_default = destination == 0 && mask == 0;
        let is_up_gateway = flags & (RTF_UP | RTF_GATEWAY) == (RTF_UP | RTF_GATEWAY);
        (is_default && is_up_gateway && gateway != 0).then(|| Ipv4Addr::from(gateway.to_le_bytes()))
    })
}

/// Look up this machine's default IPv4 gateway.
pub fn discover_default_gateway() -> Result<Ipv4Addr, EnforcementError> {
    let table = std::fs::read_to_string(ROUTE_TABLE)
        .map_err(|e| EnforcementError::Gateway(format!("{}: {}", ROUTE_TABLE, e)))?;
    parse_default_gateway(&table)
        .ok_or_else(|| EnforcementError::Gateway("no default route".to_string()))
}
