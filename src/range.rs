use anyhow::Result;
use if_addrs::{get_if_addrs, IfAddr};
use ipnet::Ipv4Net;
use std::collections::HashSet;
use std::net::Ipv4Addr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeError {
    #[error("invalid CIDR address: {range} ({reason})")]
    InvalidRange { range: String, reason: String },
}

/// Hosts gathered from a comma-separated range list, plus the items that failed to parse.
#[derive(Debug, Default)]
pub struct RangeExpansion {
    pub hosts: Vec<Ipv4Addr>,
    pub invalid: Vec<RangeError>,
}

/// Expand a CIDR string into its usable host addresses, ascending.
///
/// A /32 yields the single host. Any other prefix drops the network and
/// broadcast addresses, so a /31 yields nothing.
pub fn enumerate_hosts(cidr: &str) -> Result<Vec<Ipv4Addr>, RangeError> {
    let trimmed = cidr.trim();
    let net: Ipv4Net = trimmed.parse().map_err(|e: ipnet::AddrParseError| {
        RangeError::InvalidRange {
            range: trimmed.to_string(),
            reason: e.to_string(),
        }
    })?;
    Ok(expand_ipv4net_hosts(net.trunc()))
}

/// Expand every range of a comma-separated list, in list order.
///
/// Malformed items are collected in `invalid` and contribute no hosts.
pub fn parse_range_list(list: &str) -> RangeExpansion {
    let mut out = RangeExpansion::default();
    for item in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match enumerate_hosts(item) {
            Ok(hosts) => out.hosts.extend(hosts),
            Err(e) => out.invalid.push(e),
        }
    }
    out
}

/// Detect local non-loopback IPv4 addresses and convert each to a default /24 network.
///
/// For example, an interface IP `192.168.1.42` becomes `192.168.1.0/24`.
/// Duplicates are removed.
pub fn detect_local_ranges() -> Result<Vec<Ipv4Net>> {
    let mut set = HashSet::<Ipv4Net>::new();
    for iface in get_if_addrs()? {
        if let IfAddr::V4(v4) = iface.addr {
            if v4.ip.is_loopback() {
                continue;
            }
            set.insert(ipv4_to_default_cidr(v4.ip));
        }
    }
    let mut nets: Vec<Ipv4Net> = set.into_iter().collect();
    // Sort for stable output
    nets.sort_by_key(|n| (u32::from(n.network()), n.prefix_len()));
    Ok(nets)
}

/// Helper: convert an IPv4 address into its default /24 network.
pub fn ipv4_to_default_cidr(ip: Ipv4Addr) -> Ipv4Net {
    let o = ip.octets();
    let net = Ipv4Addr::new(o[0], o[1], o[2], 0);
    Ipv4Net::new(net, 24).unwrap_or_else(|_| Ipv4Net::from(net))
}

fn expand_ipv4net_hosts(net: Ipv4Net) -> Vec<Ipv4Addr> {
    let start = u32::from(net.network());
    let end = u32::from(net.broadcast());
    if start == end {
        return vec![net.network()];
    }
    (start + 1..end).map(Ipv4Addr::from).collect()
}
