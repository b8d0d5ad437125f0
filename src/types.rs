use std::net::Ipv4Addr;

use serde::Serialize;
use time::OffsetDateTime;

/// Value of `host_dns` when the probe connected by bare address only.
pub const NO_DNS: &str = "-";

/// One host/port pair about to be probed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanTarget {
    /// Reverse-DNS name, or the address itself when none is known.
    pub display_name: String,
    pub connect_addr: Ipv4Addr,
    pub port: u16,
}

impl ScanTarget {
    pub fn new(display_name: impl Into<String>, connect_addr: Ipv4Addr, port: u16) -> Self {
        Self {
            display_name: display_name.into(),
            connect_addr,
            port,
        }
    }

    /// Target without a distinct hostname: the address doubles as display name.
    pub fn bare(connect_addr: Ipv4Addr, port: u16) -> Self {
        Self::new(connect_addr.to_string(), connect_addr, port)
    }

    /// True when no hostname other than the address itself is known.
    pub fn is_bare_ip(&self) -> bool {
        self.display_name == self.connect_addr.to_string()
    }
}

/// Certificate presented by one host:port, as reported to the operator.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct CertificateRecord {
    #[serde(rename = "hostnameVerified")]
    pub hostname_verified: bool,
    #[serde(rename = "subjectCommonName")]
    pub subject_common_name: String,
    #[serde(rename = "dnsNames")]
    pub dns_names: Vec<String>,
    #[serde(rename = "ipAddresses")]
    pub ip_addresses: Vec<String>,
    pub issuer: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expiry: OffsetDateTime,
    pub expired: bool,
    #[serde(rename = "hostDNS")]
    pub host_dns: String,
    #[serde(rename = "hostIP")]
    pub host_ip: String,
    #[serde(rename = "hostPort")]
    pub host_port: String,
    #[serde(rename = "sniVerified")]
    pub sni_verified: bool,
}

/// Sort records so the earliest-expiring certificate comes first.
pub fn sort_by_expiry(records: &mut [CertificateRecord]) {
    records.sort_by_key(|r| r.expiry);
}
