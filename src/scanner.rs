use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::gate::AdmissionGate;
use crate::prober::{CertProber, ProbeError, ProbeOptions, TlsProber};
use crate::range::{parse_range_list, RangeError};
use crate::resolver::{NameResolver, NoLookup, SystemResolver};
use crate::types::{sort_by_expiry, CertificateRecord, ScanTarget};

/// Above this many hosts the local ARP table may overflow.
pub const ARP_WARN_THRESHOLD: usize = 1024;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("scan cancelled")]
    Cancelled,
    #[error("worker failed: {0}")]
    Worker(String),
    #[error(transparent)]
    Probe(#[from] ProbeError),
}

#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Comma-separated CIDR ranges.
    pub ranges: String,
    pub ports: Vec<u16>,
    /// Skip hosts without a reverse-DNS name.
    pub skip_no_dns: bool,
    /// Perform reverse lookups at all.
    pub resolve_names: bool,
    /// Maximum number of hosts probed at once.
    pub concurrency: usize,
    pub dial_timeout: Duration,
    pub relax_bare_ip: bool,
    pub progress: bool,
    /// Extra PEM trust anchors for the strict phase.
    pub extra_roots: Vec<Vec<u8>>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            ranges: String::new(),
            ports: vec![443, 636, 587, 8443],
            skip_no_dns: false,
            resolve_names: true,
            concurrency: 128,
            dial_timeout: Duration::from_secs(1),
            relax_bare_ip: false,
            progress: false,
            extra_roots: Vec::new(),
        }
    }
}

/// Outcome of a completed scan, records ordered by expiry.
#[derive(Debug)]
pub struct ScanReport {
    pub records: Vec<CertificateRecord>,
    pub hosts: usize,
    pub ports: usize,
    pub invalid_ranges: Vec<RangeError>,
    pub elapsed: Duration,
}

/// Scan the configured ranges with the system resolver and the native TLS prober.
pub async fn tls_scan(config: &ScanConfig, cancel: CancellationToken) -> Result<ScanReport, ScanError> {
    let resolver: Arc<dyn NameResolver> = if config.resolve_names {
        Arc::new(SystemResolver::new(config.dial_timeout.max(Duration::from_secs(1))))
    } else {
        Arc::new(NoLookup)
    };
    let prober = Arc::new(TlsProber::new(ProbeOptions {
        timeout: config.dial_timeout,
        relax_bare_ip: config.relax_bare_ip,
        progress: config.progress,
        extra_roots: config.extra_roots.clone(),
    })?);
    run_scan(config, resolver, prober, cancel).await
}

/// Probe every host of the configured ranges on every configured port.
///
/// - One unit of work per host, admitted through an `AdmissionGate` of `concurrency` slots.
/// - Records go into a channel sized for the worst case (hosts x ports), so sends never wait.
/// - The channel is drained once every unit has finished; records are then sorted by expiry.
/// - A unit failure or `cancel` aborts the run and no partial result is returned.
pub async fn run_scan(
    config: &ScanConfig,
    resolver: Arc<dyn NameResolver>,
    prober: Arc<dyn CertProber>,
    cancel: CancellationToken,
) -> Result<ScanReport, ScanError> {
    let start = Instant::now();

    let expansion = parse_range_list(&config.ranges);
    for e in &expansion.invalid {
        warn!(error = %e, "skipping range");
    }
    let hosts = expansion.hosts;
    let ports: Arc<[u16]> = config.ports.clone().into();

    if hosts.len() > ARP_WARN_THRESHOLD {
        warn!(
            hosts = hosts.len(),
            "this may be too many hosts to scan due to ARP thresholds"
        );
    }
    info!(ranges = %config.ranges, hosts = hosts.len(), ports = ?config.ports, "scanning");

    let run_cancel = cancel.child_token();
    let gate = AdmissionGate::new(config.concurrency);
    let (tx, mut rx) = mpsc::channel::<CertificateRecord>((hosts.len() * ports.len()).max(1));
    let mut set: JoinSet<Result<(), ScanError>> = JoinSet::new();
    let mut failure: Option<ScanError> = None;

    'admit: for &ip in &hosts {
        // Watch finished units while waiting, so a failed or panicked one stops admission.
        let permit = loop {
            tokio::select! {
                biased;
                Some(joined) = set.join_next(), if !set.is_empty() => {
                    if let Err(e) = joined.unwrap_or_else(|e| Err(ScanError::Worker(e.to_string()))) {
                        run_cancel.cancel();
                        record_failure(&mut failure, e);
                        break 'admit;
                    }
                }
                admitted = gate.admit(&run_cancel) => match admitted {
                    Ok(p) => break p,
                    Err(e) => {
                        record_failure(&mut failure, e);
                        break 'admit;
                    }
                },
            }
        };
        let tx = tx.clone();
        let resolver = resolver.clone();
        let prober = prober.clone();
        let ports = ports.clone();
        let cancel = run_cancel.clone();
        let skip_no_dns = config.skip_no_dns;

        set.spawn(async move {
            let _permit = permit; // keep permit until the host is done
            let res = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(ScanError::Cancelled),
                res = scan_host(ip, &ports, skip_no_dns, resolver.as_ref(), prober.as_ref(), &tx) => res,
            };
            if res.is_err() {
                cancel.cancel();
            }
            res
        });
    }
    drop(tx);

    while let Some(joined) = set.join_next().await {
        let res = joined.unwrap_or_else(|e| Err(ScanError::Worker(e.to_string())));
        if let Err(e) = res {
            run_cancel.cancel();
            record_failure(&mut failure, e);
        }
    }
    if let Some(e) = failure {
        return Err(e);
    }

    let mut records = Vec::new();
    while let Some(record) = rx.recv().await {
        records.push(record);
    }
    sort_by_expiry(&mut records);

    let elapsed = start.elapsed();
    info!(certs = records.len(), elapsed = ?elapsed, "scan finished");
    Ok(ScanReport {
        records,
        hosts: hosts.len(),
        ports: ports.len(),
        invalid_ranges: expansion.invalid,
        elapsed,
    })
}

/// Keep the first root cause; a later real error replaces a bare `Cancelled`.
fn record_failure(failure: &mut Option<ScanError>, e: ScanError) {
    let replace = match failure {
        None => true,
        Some(ScanError::Cancelled) => !matches!(e, ScanError::Cancelled),
        Some(_) => false,
    };
    if replace {
        *failure = Some(e);
    }
}

/// Resolve one host once, then probe its ports in order.
async fn scan_host(
    ip: Ipv4Addr,
    ports: &[u16],
    skip_no_dns: bool,
    resolver: &dyn NameResolver,
    prober: &dyn CertProber,
    tx: &mpsc::Sender<CertificateRecord>,
) -> Result<(), ScanError> {
    let display_name = match resolver.resolve(ip).await {
        Some(name) => name,
        None if skip_no_dns => {
            debug!(%ip, "no reverse DNS name, skipping host");
            return Ok(());
        }
        None => ip.to_string(),
    };

    for &port in ports {
        let target = ScanTarget::new(display_name.clone(), ip, port);
        if let Some(record) = prober.probe(&target).await.into_record() {
            tx.send(record)
                .await
                .map_err(|e| ScanError::Worker(format!("result buffer closed: {e}")))?;
        }
    }
    Ok(())
}
