//! IPv4 helpers for the `ip` / `ip_int` pair

use std::net::Ipv4Addr;

pub fn ip_to_int(ip: Ipv4Addr) -> u32 {
    u32::from(ip)
}

pub fn int_to_ip(value: u32) -> Ipv4Addr {
    Ipv4Addr::from(value)
}

/// Parse a strict dotted-quad address
pub fn parse_ipv4(value: &str) -> Option<Ipv4Addr> {
    value.trim().parse().ok()
}
