use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;

use cert_scan_rs::output::{self, TableStyle};
use cert_scan_rs::scanner::{self, ScanConfig, ScanReport};
use cert_scan_rs::{logging, ports, range};

const GIT_SHA: Option<&str> = option_env!("CERT_SCAN_GIT_SHA");
const BUILD_TIME: Option<&str> = option_env!("CERT_SCAN_BUILD_TIME");

/// cert-scan-rs — inventory TLS certificates (issuer, expiry, hostname match) across IPv4 ranges.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "cert-scan-rs",
    about = "Inventory TLS certificates (issuer, expiry, hostname match) across IPv4 ranges.",
    long_about = None,
    disable_version_flag = true
)]
struct Cli {
    /// Comma-separated CIDR list (e.g., 192.168.10.0/24,10.0.0.5/32). If omitted, auto-detect local /24s.
    #[arg(long)]
    cidr: Option<String>,

    /// Comma-separated TCP ports or ranges to probe.
    #[arg(long, default_value = ports::DEFAULT_PORTS)]
    ports: String,

    /// Skip hosts that have no reverse-DNS name.
    #[arg(long = "skipnodns", default_value_t = false)]
    skip_no_dns: bool,

    /// Do not perform reverse-DNS lookups; probe by address only.
    #[arg(long = "no-dns", default_value_t = false)]
    no_dns: bool,

    /// Max hosts probed concurrently.
    #[arg(long = "conc", default_value_t = 128)]
    concurrency: usize,

    /// Connect + handshake timeout in seconds.
    #[arg(long = "timeout", default_value_t = 1)]
    timeout_secs: u64,

    /// Also retry bare-address targets with relaxed trust when strict verification fails.
    #[arg(long = "relax-bare-ip", default_value_t = false)]
    relax_bare_ip: bool,

    /// PEM file of a CA certificate to trust in addition to the system store (repeatable).
    #[arg(long = "ca-file")]
    ca_files: Vec<PathBuf>,

    /// Verbose diagnostics.
    #[arg(long, default_value_t = false)]
    debug: bool,

    /// Disable coloured table output.
    #[arg(long = "no-color", default_value_t = false)]
    no_color: bool,

    /// Write an HTML report to this path.
    #[arg(long)]
    html: Option<PathBuf>,

    /// Write a JSON report to this path.
    #[arg(long)]
    json: Option<PathBuf>,

    /// Print version and build information, then exit.
    #[arg(short = 'v', long = "version", default_value_t = false)]
    version: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!("version: {}", env!("CARGO_PKG_VERSION"));
        println!("sha: {}", GIT_SHA.unwrap_or("unknown"));
        println!("build time: {}", BUILD_TIME.unwrap_or("unknown"));
        return Ok(());
    }

    logging::initialize_logging(cli.debug)?;

    if cli.no_dns && cli.skip_no_dns {
        bail!("--skipnodns together with --no-dns would skip every host");
    }
    let ports = ports::parse_port_list(&cli.ports).context("invalid --ports")?;
    let ranges = match cli.cidr.as_deref() {
        Some(c) => c.to_string(),
        None => detected_ranges()?,
    };

    let extra_roots = cli
        .ca_files
        .iter()
        .map(|p| std::fs::read(p).with_context(|| format!("failed to read --ca-file {}", p.display())))
        .collect::<Result<Vec<_>>>()?;

    let config = ScanConfig {
        ranges,
        ports,
        skip_no_dns: cli.skip_no_dns,
        resolve_names: !cli.no_dns,
        concurrency: cli.concurrency,
        dial_timeout: Duration::from_secs(cli.timeout_secs.max(1)),
        relax_bare_ip: cli.relax_bare_ip,
        progress: true,
        extra_roots,
    };

    println!(
        "Scanning CIDRs:{} [ports:{}] [concurrency:{}], please wait",
        config.ranges, cli.ports, config.concurrency
    );

    // Ctrl-C cancels the scan.
    let cancel = CancellationToken::new();
    let cancel_ctrlc = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        cancel_ctrlc.cancel();
    });

    let report = scanner::tls_scan(&config, cancel)
        .await
        .context("scan aborted")?;
    present(&cli, &report);
    Ok(())
}

fn detected_ranges() -> Result<String> {
    let nets = range::detect_local_ranges().context("failed to detect local networks")?;
    if nets.is_empty() {
        bail!("no local IPv4 network detected; pass --cidr");
    }
    Ok(nets
        .iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(","))
}

fn present(cli: &Cli, report: &ScanReport) {
    let elapsed = Duration::from_secs(report.elapsed.as_secs_f64().round() as u64);
    eprintln!();
    println!(
        "Found {} TLS Certs in {:?} [hosts:{}] [ports:{}]",
        report.records.len(),
        elapsed,
        report.hosts,
        report.ports
    );

    print!(
        "{}",
        output::render_table(&report.records, TableStyle { color: !cli.no_color })
    );

    if let Some(path) = cli.html.as_deref() {
        match output::write_html(path, &report.records) {
            Ok(()) => println!("Output file created: {}", path.display()),
            Err(e) => eprintln!("Failed to write HTML to {}: {e:#}", path.display()),
        }
    }
    if let Some(path) = cli.json.as_deref() {
        match output::write_json(path, &report.records) {
            Ok(()) => println!("Output file created: {}", path.display()),
            Err(e) => eprintln!("Failed to write JSON to {}: {e:#}", path.display()),
        }
    }
}
