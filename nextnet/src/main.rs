use anyhow::Result;
use clap::Parser;
use netbios_probe::NetbiosProbe;
use nextnet_core::{Pipeline, RateLimiter};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod output;

const DEFAULT_RATE: u32 = 1000;

#[derive(Debug, Parser)]
#[command(name = "nextnet", version, about = "Probes a list of networks for potential pivot points")]
struct Cli {
    /// CIDRs (10.0.0.0/24), bare addresses or start-end ranges to probe
    targets: Vec<String>,
    /// Maximum packets per second; bursts of up to three times this are allowed
    #[arg(long)]
    rate: Option<u32>,
    /// Also write every result as one JSON array to this file
    #[arg(long, value_name = "FILE")]
    out: Option<PathBuf>,
    /// Optional config file (YAML). If omitted, loads ./nextnet.yaml if present.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Log more to stderr (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let loaded_cfg = config::load_config(cli.config.as_deref())?.unwrap_or_default();
    let rate = cli.rate.or(loaded_cfg.rate).unwrap_or(DEFAULT_RATE);
    let out = cli.out.clone().or_else(|| loaded_cfg.out.clone());
    let netbios = loaded_cfg.netbios();

    let sink = output::JsonSink::new(std::io::stdout(), out.as_deref())?;
    if cli.targets.is_empty() {
        warn!("no targets given, nothing will be probed");
    }

    let rt = tokio::runtime::Runtime::new()?;
    let started = Instant::now();
    let (summary, _) = rt.block_on(async move {
        let mut pipeline = Pipeline::new(RateLimiter::new(rate));
        pipeline.register(Box::new(NetbiosProbe::new(netbios)));
        pipeline.run(&cli.targets, sink).await
    })?;

    info!(
        addresses = summary.addresses,
        results = summary.results,
        skipped = summary.skipped,
        "done in {} ms (core {})",
        started.elapsed().as_millis(),
        nextnet_core::version()
    );
    Ok(())
}
