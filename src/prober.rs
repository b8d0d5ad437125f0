use std::io::{self, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::net::TcpStream;
use tokio_native_tls::TlsConnector;
use tracing::{debug, trace, warn};
use x509_parser::extensions::GeneralName;
use x509_parser::parse_x509_certificate;

use crate::types::{CertificateRecord, ScanTarget, NO_DNS};

/// Error fragments that mean "nothing listening here", as opposed to a protocol anomaly.
const ABSENCE_MARKERS: &[&str] = &[
    "network is unreachable",
    "host is unreachable",
    "no route to host",
    "connection refused",
    "timed out",
    "i/o timeout",
    "no such host",
];

/// Result of probing one host:port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Found(CertificateRecord),
    /// Unreachable, refused, timed out, or no certificate presented.
    Absent,
    /// Something answered but no certificate could be obtained (already logged).
    Failed(String),
}

impl ProbeOutcome {
    /// The record worth reporting, if any. Records without an issuer are dropped.
    pub fn into_record(self) -> Option<CertificateRecord> {
        match self {
            ProbeOutcome::Found(r) if !r.issuer.is_empty() => Some(r),
            _ => None,
        }
    }
}

/// Something able to fetch the certificate of a single target.
#[async_trait]
pub trait CertProber: Send + Sync {
    async fn probe(&self, target: &ScanTarget) -> ProbeOutcome;
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("i/o timeout after {0:?}")]
    Timeout(Duration),
    #[error("connect failed: {0}")]
    Connect(#[from] io::Error),
    #[error("tls handshake failed: {0}")]
    Tls(#[from] native_tls::Error),
    #[error("no peer certificate presented")]
    NoPeerCertificate,
    #[error("certificate could not be parsed: {0}")]
    Certificate(String),
    #[error("certificate is not valid for {0}")]
    HostnameMismatch(String),
}

impl ProbeError {
    /// Whether this failure just means no TLS service is reachable at the target.
    pub fn is_expected_absence(&self) -> bool {
        match self {
            ProbeError::Timeout(_) | ProbeError::NoPeerCertificate => true,
            ProbeError::Connect(e) => {
                matches!(
                    e.kind(),
                    io::ErrorKind::ConnectionRefused | io::ErrorKind::TimedOut
                ) || has_absence_marker(&e.to_string())
            }
            ProbeError::Tls(e) => has_absence_marker(&e.to_string()),
            ProbeError::Certificate(_) | ProbeError::HostnameMismatch(_) => false,
        }
    }
}

fn has_absence_marker(msg: &str) -> bool {
    let msg = msg.to_ascii_lowercase();
    ABSENCE_MARKERS.iter().any(|m| msg.contains(m))
}

/// Trust state of a handshake attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Full chain verification, hostname checked when one is known.
    Strict,
    /// Any certificate accepted, no SNI.
    Relaxed,
}

#[derive(Debug, Clone)]
pub struct ProbeOptions {
    /// Bounds TCP connect and TLS handshake together.
    pub timeout: Duration,
    /// Also fall back to the relaxed phase for targets without a hostname.
    pub relax_bare_ip: bool,
    /// Print a `.` on stderr after every probe.
    pub progress: bool,
    /// PEM-encoded CA certificates trusted by the strict phase in addition to the system store.
    pub extra_roots: Vec<Vec<u8>>,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1),
            relax_bare_ip: false,
            progress: false,
            extra_roots: Vec::new(),
        }
    }
}

/// Fields read from the leaf certificate of a handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafCertificate {
    pub common_name: String,
    pub dns_names: Vec<String>,
    pub ip_addresses: Vec<IpAddr>,
    pub issuer: String,
    pub not_after: OffsetDateTime,
}

impl LeafCertificate {
    pub fn from_der(der: &[u8]) -> Result<Self, ProbeError> {
        let (_, x509) =
            parse_x509_certificate(der).map_err(|e| ProbeError::Certificate(e.to_string()))?;

        let common_name = x509
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .unwrap_or("")
            .to_string();

        let mut dns_names = Vec::new();
        let mut ip_addresses = Vec::new();
        if let Ok(Some(ext)) = x509.subject_alternative_name() {
            for name in ext.value.general_names.iter() {
                match name {
                    GeneralName::DNSName(d) => dns_names.push(d.to_string()),
                    GeneralName::IPAddress(raw) => {
                        if let Some(ip) = ip_from_octets(raw) {
                            ip_addresses.push(ip);
                        }
                    }
                    _ => {}
                }
            }
        }

        Ok(Self {
            common_name,
            dns_names,
            ip_addresses,
            issuer: x509.issuer().to_string(),
            not_after: x509.validity().not_after.to_datetime(),
        })
    }

    /// Exact match of `host` against the CN or any DNS SAN, as done after a relaxed handshake.
    pub fn names_host(&self, host: &str) -> bool {
        self.common_name == host || self.dns_names.iter().any(|d| d == host)
    }
}

fn ip_from_octets(raw: &[u8]) -> Option<IpAddr> {
    match raw.len() {
        4 => {
            let o: [u8; 4] = raw.try_into().ok()?;
            Some(IpAddr::V4(Ipv4Addr::from(o)))
        }
        16 => {
            let o: [u8; 16] = raw.try_into().ok()?;
            Some(IpAddr::V6(Ipv6Addr::from(o)))
        }
        _ => None,
    }
}

/// Check that the leaf is valid for `host`.
///
/// IP literals only match IP SANs. Names match DNS SANs case-insensitively,
/// a `*.` wildcard covering exactly one left-most label.
pub fn verify_hostname(leaf: &LeafCertificate, host: &str) -> Result<(), ProbeError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        if leaf.ip_addresses.contains(&ip) {
            return Ok(());
        }
        return Err(ProbeError::HostnameMismatch(host.to_string()));
    }
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    if leaf.dns_names.iter().any(|pattern| dns_name_matches(pattern, &host)) {
        Ok(())
    } else {
        Err(ProbeError::HostnameMismatch(host))
    }
}

fn dns_name_matches(pattern: &str, host: &str) -> bool {
    let pattern = pattern.trim_end_matches('.').to_ascii_lowercase();
    match pattern.strip_prefix("*.") {
        Some(suffix) => match host.split_once('.') {
            Some((label, rest)) => !label.is_empty() && rest == suffix,
            None => false,
        },
        None => pattern == host,
    }
}

/// Build the reported record for a retrieved leaf certificate.
pub fn build_record(
    target: &ScanTarget,
    leaf: LeafCertificate,
    hostname_verified: bool,
    sni_verified: bool,
    now: OffsetDateTime,
) -> CertificateRecord {
    let host_dns = if target.is_bare_ip() {
        NO_DNS.to_string()
    } else {
        target.display_name.clone()
    };
    CertificateRecord {
        hostname_verified,
        subject_common_name: leaf.common_name,
        dns_names: leaf.dns_names,
        ip_addresses: leaf.ip_addresses.iter().map(IpAddr::to_string).collect(),
        issuer: leaf.issuer,
        expired: leaf.not_after < now,
        expiry: leaf.not_after,
        host_dns,
        host_ip: target.connect_addr.to_string(),
        host_port: target.port.to_string(),
        sni_verified,
    }
}

/// Certificate prober speaking TLS through the platform's native stack.
pub struct TlsProber {
    opts: ProbeOptions,
    strict_named: TlsConnector,
    strict_bare: TlsConnector,
    relaxed: TlsConnector,
}

impl TlsProber {
    pub fn new(opts: ProbeOptions) -> Result<Self, ProbeError> {
        let roots = opts
            .extra_roots
            .iter()
            .map(|pem| native_tls::Certificate::from_pem(pem))
            .collect::<Result<Vec<_>, _>>()?;

        let mut named = native_tls::TlsConnector::builder();
        // Hostname is checked explicitly after the handshake for bare addresses.
        let mut bare = native_tls::TlsConnector::builder();
        bare.danger_accept_invalid_hostnames(true);
        for root in &roots {
            named.add_root_certificate(root.clone());
            bare.add_root_certificate(root.clone());
        }
        let strict_named = named.build()?;
        let strict_bare = bare.build()?;
        let relaxed = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .use_sni(false)
            .build()?;
        Ok(Self {
            opts,
            strict_named: strict_named.into(),
            strict_bare: strict_bare.into(),
            relaxed: relaxed.into(),
        })
    }

    fn fallback_allowed(&self, target: &ScanTarget) -> bool {
        !target.is_bare_ip() || self.opts.relax_bare_ip
    }

    async fn handshake(
        &self,
        target: &ScanTarget,
        phase: Phase,
    ) -> Result<LeafCertificate, ProbeError> {
        let bare = target.is_bare_ip();
        let (connector, domain) = match phase {
            Phase::Strict if !bare => (&self.strict_named, target.display_name.clone()),
            Phase::Strict => (&self.strict_bare, target.connect_addr.to_string()),
            Phase::Relaxed => (&self.relaxed, target.connect_addr.to_string()),
        };
        let addr = SocketAddr::new(IpAddr::V4(target.connect_addr), target.port);

        let attempt = async {
            let tcp = TcpStream::connect(addr).await?;
            let tls = connector.connect(&domain, tcp).await?;
            let cert = tls
                .get_ref()
                .peer_certificate()?
                .ok_or(ProbeError::NoPeerCertificate)?;
            LeafCertificate::from_der(&cert.to_der()?)
        };
        tokio::time::timeout(self.opts.timeout, attempt)
            .await
            .map_err(|_| ProbeError::Timeout(self.opts.timeout))?
    }

    async fn run(&self, target: &ScanTarget) -> ProbeOutcome {
        let (leaf, hostname_verified, sni_verified) =
            match self.handshake(target, Phase::Strict).await {
                Ok(leaf) if target.is_bare_ip() => {
                    match verify_hostname(&leaf, &target.display_name) {
                        Ok(()) => (leaf, true, true),
                        Err(e) => {
                            warn!(
                                host = %target.connect_addr,
                                port = target.port,
                                error = %e,
                                "hostname doesn't match certificate"
                            );
                            (leaf, false, false)
                        }
                    }
                }
                Ok(leaf) => (leaf, true, true),
                Err(e) if !self.fallback_allowed(target) => {
                    return classify(target, Phase::Strict, e)
                }
                Err(e) => {
                    debug!(
                        host = %target.display_name,
                        port = target.port,
                        error = %e,
                        "strict handshake failed, retrying with relaxed trust"
                    );
                    match self.handshake(target, Phase::Relaxed).await {
                        Ok(leaf) => {
                            let matched = leaf.names_host(&target.display_name);
                            (leaf, matched, false)
                        }
                        Err(e) => return classify(target, Phase::Relaxed, e),
                    }
                }
            };
        ProbeOutcome::Found(build_record(
            target,
            leaf,
            hostname_verified,
            sni_verified,
            OffsetDateTime::now_utc(),
        ))
    }
}

#[async_trait]
impl CertProber for TlsProber {
    async fn probe(&self, target: &ScanTarget) -> ProbeOutcome {
        let outcome = self.run(target).await;
        if self.opts.progress {
            let mut err = io::stderr();
            let _ = write!(err, ".");
            let _ = err.flush();
        }
        outcome
    }
}

fn classify(target: &ScanTarget, phase: Phase, err: ProbeError) -> ProbeOutcome {
    if err.is_expected_absence() {
        trace!(host = %target.connect_addr, port = target.port, ?phase, error = %err, "no certificate");
        ProbeOutcome::Absent
    } else {
        warn!(
            host = %target.connect_addr,
            port = target.port,
            ?phase,
            error = %err,
            "server doesn't support SSL certificate retrieval"
        );
        ProbeOutcome::Failed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn leaf(cn: &str, dns: &[&str], ips: &[IpAddr]) -> LeafCertificate {
        LeafCertificate {
            common_name: cn.to_string(),
            dns_names: dns.iter().map(|s| s.to_string()).collect(),
            ip_addresses: ips.to_vec(),
            issuer: "CN=Test CA".to_string(),
            not_after: datetime!(2030-01-01 0:00 UTC),
        }
    }

    #[test]
    fn refused_and_timeouts_are_expected_absence() {
        let refused = ProbeError::Connect(io::Error::from(io::ErrorKind::ConnectionRefused));
        assert!(refused.is_expected_absence());
        assert!(ProbeError::Timeout(Duration::from_secs(1)).is_expected_absence());
        let unreachable = ProbeError::Connect(io::Error::new(
            io::ErrorKind::Other,
            "No route to host (os error 113)",
        ));
        assert!(unreachable.is_expected_absence());
    }

    #[test]
    fn protocol_errors_are_unexpected() {
        let odd = ProbeError::Connect(io::Error::new(io::ErrorKind::Other, "wrong version number"));
        assert!(!odd.is_expected_absence());
        assert!(!ProbeError::Certificate("bad der".into()).is_expected_absence());
    }

    #[test]
    fn ip_host_matches_ip_san_only() {
        let ip: IpAddr = "10.0.0.5".parse().unwrap();
        let l = leaf("10.0.0.5", &["10.0.0.5"], &[ip]);
        assert!(verify_hostname(&l, "10.0.0.5").is_ok());
        let no_san = leaf("10.0.0.5", &["10.0.0.5"], &[]);
        assert!(verify_hostname(&no_san, "10.0.0.5").is_err());
    }

    #[test]
    fn wildcard_covers_one_label() {
        let l = leaf("example.com", &["*.example.com"], &[]);
        assert!(verify_hostname(&l, "www.Example.com").is_ok());
        assert!(verify_hostname(&l, "a.b.example.com").is_err());
        assert!(verify_hostname(&l, "example.com").is_err());
    }

    #[test]
    fn relaxed_match_is_exact_on_cn_or_san() {
        let l = leaf("host.lan", &["alt.lan"], &[]);
        assert!(l.names_host("host.lan"));
        assert!(l.names_host("alt.lan"));
        assert!(!l.names_host("other.lan"));
    }

    #[test]
    fn bare_target_gets_dns_sentinel() {
        let t = ScanTarget::bare(Ipv4Addr::new(10, 0, 0, 5), 443);
        let r = build_record(&t, leaf("x", &[], &[]), false, false, datetime!(2025-01-01 0:00 UTC));
        assert_eq!(r.host_dns, NO_DNS);
        assert_eq!(r.host_ip, "10.0.0.5");
        assert_eq!(r.host_port, "443");
    }

    #[test]
    fn named_target_keeps_name_and_expiry_is_strict() {
        let t = ScanTarget::new("web.lan", Ipv4Addr::new(10, 0, 0, 6), 8443);
        let l = leaf("web.lan", &["web.lan"], &[]);
        let at_expiry = build_record(&t, l.clone(), true, true, l.not_after);
        assert_eq!(at_expiry.host_dns, "web.lan");
        assert!(!at_expiry.expired);
        let after = build_record(&t, l.clone(), true, true, datetime!(2030-01-01 0:00:01 UTC));
        assert!(after.expired);
    }

    #[test]
    fn records_without_issuer_are_not_reported() {
        let t = ScanTarget::bare(Ipv4Addr::new(10, 0, 0, 7), 443);
        let mut l = leaf("x", &[], &[]);
        l.issuer.clear();
        let r = build_record(&t, l, false, false, datetime!(2025-01-01 0:00 UTC));
        assert_eq!(ProbeOutcome::Found(r).into_record(), None);
        assert_eq!(ProbeOutcome::Absent.into_record(), None);
    }
}
