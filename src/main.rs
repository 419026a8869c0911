use std::fs::File;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use apcups_scan::config::{ClientConfig, DisplayZone, DEFAULT_PORT};
use apcups_scan::types::{OutcomeReport, QueryOutcome};
use apcups_scan::{client, logging, netdetect, scanner};
use clap::Parser;
use time::{macros::format_description, UtcOffset};
use tracing::{error, info};

/// apcups-scan — query apcupsd daemons and summarize power, charge and backup time.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "apcups-scan",
    version,
    about = "Query apcupsd daemons and summarize power, charge and backup time.",
    long_about = None
)]
struct Cli {
    /// Host to query at --port (ignored when --network is given).
    #[arg(long, default_value = "localhost")]
    target: String,

    /// apcupsd network information server port.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// CIDR to scan (e.g., 192.168.1.0/24), or `auto` for each local IPv4 /24.
    #[arg(long)]
    network: Option<String>,

    /// Connect timeout in milliseconds, for queries and scan attempts.
    #[arg(long = "timeout-ms", default_value_t = 5000)]
    timeout_ms: u64,

    /// Deadline in milliseconds for reading one status response.
    #[arg(long = "read-timeout-ms", default_value_t = 10_000)]
    read_timeout_ms: u64,

    /// Max concurrent connection attempts.
    #[arg(long, default_value_t = 1000)]
    concurrency: usize,

    /// Fixed offset for outage timestamps, as ±HHMM. Defaults to the host's
    /// local zone, resolved for each timestamp.
    #[arg(long = "utc-offset", value_parser = parse_offset)]
    utc_offset: Option<UtcOffset>,

    /// Only list responsive endpoints; do not query them.
    #[arg(long = "scan-only", default_value_t = false)]
    scan_only: bool,

    /// Write outcomes as pretty JSON to this path (optional).
    #[arg(long)]
    output: Option<PathBuf>,
}

fn parse_offset(s: &str) -> Result<UtcOffset, String> {
    UtcOffset::parse(
        s,
        format_description!("[offset_hour sign:mandatory][offset_minute]"),
    )
    .map_err(|e| format!("expected ±HHMM: {e}"))
}

impl Cli {
    fn config(&self) -> ClientConfig {
        let mut cfg = ClientConfig::default()
            .with_port(self.port)
            .with_dial_timeout(Duration::from_millis(self.timeout_ms))
            .with_read_timeout(Duration::from_millis(self.read_timeout_ms))
            .with_max_concurrency(self.concurrency);
        if let Some(offset) = self.utc_offset {
            cfg = cfg.with_display_zone(DisplayZone::Fixed(offset));
        }
        cfg
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init()?;
    let config = cli.config();
    run(cli, config).await
}

async fn run(cli: Cli, config: ClientConfig) -> Result<()> {
    let targets = match cli.network.as_deref() {
        None => vec![format!("{}:{}", cli.target, config.port)],
        Some(network) => {
            let targets = discover(network, &config).await?;
            if targets.is_empty() {
                bail!("no targets found in --network={network:?}");
            }
            targets
        }
    };

    if cli.scan_only {
        for t in &targets {
            println!("{t}");
        }
        return Ok(());
    }

    let outcomes = client::query_all(&targets, &config).await;
    for o in &outcomes {
        if let Err(e) = &o.result {
            error!("{}", e);
        }
    }
    print_results_table(&outcomes);

    if let Some(path) = cli.output.as_deref() {
        write_results_json(path, &outcomes)
            .with_context(|| format!("failed to write JSON to {}", path.display()))?;
        info!("wrote JSON results to {}", path.display());
    }
    Ok(())
}

async fn discover(network: &str, config: &ClientConfig) -> Result<Vec<String>> {
    if network.trim() != "auto" {
        return Ok(scanner::scan(network, config).await);
    }
    let cidrs = netdetect::detect_local_cidrs().context("failed to detect local networks")?;
    let mut found = Vec::new();
    for cidr in cidrs {
        info!("auto-detected {}", cidr);
        found.extend(scanner::scan(&cidr.to_string(), config).await);
    }
    Ok(found)
}

fn print_results_table(outcomes: &[QueryOutcome]) {
    let ok: Vec<_> = outcomes
        .iter()
        .filter_map(|o| o.result.as_ref().ok().map(|s| (o.target.as_str(), s)))
        .collect();

    let mut target_w = "target".len();
    let mut name_w = "name".len();
    for (t, s) in &ok {
        target_w = target_w.max(t.len());
        name_w = name_w.max(s.name.len());
    }

    println!(
        "\nUPS units: {} (queried: {})",
        ok.len(),
        outcomes.len()
    );
    println!(
        "{:<target_w$}  {:<name_w$}  {:<7}  {:>7}  {:>8}  {:>8}  {:>6}  {:>5}  last outage",
        "target", "name", "status", "power_w", "charge_wh", "backup_m", "line_v", "xfers",
    );
    for (t, s) in ok {
        let status = match (s.offline, s.charged) {
            (true, _) => "ONBATT",
            (false, true) => "ONLINE",
            (false, false) => "CHARGE",
        };
        let outage = match (&s.last_outage, &s.outage_lasted) {
            (Some(when), Some(lasted)) => format!("{when} ({lasted})"),
            (Some(when), None) => when.clone(),
            _ => "-".to_string(),
        };
        println!(
            "{:<target_w$}  {:<name_w$}  {:<7}  {:>7}  {:>8}  {:>8}  {:>6.1}  {:>5}  {}",
            t, s.name, status, s.power, s.charge, s.backup_minutes, s.line_voltage, s.transfer_count, outage,
        );
    }
}

fn write_results_json(path: &std::path::Path, outcomes: &[QueryOutcome]) -> Result<()> {
    let reports: Vec<OutcomeReport<'_>> = outcomes.iter().map(QueryOutcome::report).collect();
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, &reports)?;
    Ok(())
}
