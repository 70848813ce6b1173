//! rustsdam - cluster topology tooling
//!
//! Usage:
//!     rustsdam --config <path> --validate
//!     rustsdam --config <path> --replay <scenario>
//!
//! See --help for more options.

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use rustsdam::config::{Config, load_config};
use rustsdam::replay::{load_scenario, run_scenario};
use rustsdam::util::init_logging;

/// Validate cluster settings and replay topology scenarios offline.
#[derive(Parser, Debug)]
#[command(name = "rustsdam")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,

    /// Replay a scenario file through the topology reducers
    #[arg(long, value_name = "SCENARIO")]
    replay: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli.config).with_context(|| {
        format!(
            "failed to load configuration from '{}'",
            cli.config.display()
        )
    })?;

    // CLI overrides config
    let log_level = cli
        .log_level
        .as_deref()
        .unwrap_or(&config.global.log_level);
    init_logging(log_level, &config.global.log_format);

    if cli.validate {
        info!("Configuration is valid");
        print_summary(&config);
        return Ok(());
    }

    match &cli.replay {
        Some(path) => replay(&config, path),
        None => {
            print_summary(&config);
            warn!("nothing to do, pass --validate or --replay");
            Ok(())
        }
    }
}

fn print_summary(config: &Config) {
    let settings = &config.cluster;
    println!("Configuration is valid.");
    println!("  Kind: {:?}", settings.cluster_kind());
    println!("  Scheme: {:?}", settings.scheme);
    println!("  Endpoints:");
    for endpoint in &settings.endpoints {
        println!("    - {endpoint}");
    }
    if let Some(name) = &settings.replica_set_name {
        println!("  Replica set: {name}");
    }
    println!(
        "  Server selection timeout: {}",
        humantime::format_duration(settings.server_selection_timeout)
    );
    println!(
        "  Heartbeat: {} (min {})",
        humantime::format_duration(settings.heartbeat_interval),
        humantime::format_duration(settings.min_heartbeat_interval)
    );
}

fn replay(config: &Config, path: &Path) -> Result<()> {
    let scenario = load_scenario(path)
        .with_context(|| format!("failed to load scenario from '{}'", path.display()))?;
    info!(scenario = %path.display(), phases = scenario.phases.len(), "replaying scenario");

    let report = run_scenario(&scenario, &config.cluster).context("scenario replay failed")?;
    for phase in &report.phases {
        print!("{phase}");
    }

    if !report.is_success() {
        bail!("{} outcome mismatches", report.mismatch_count());
    }
    println!("All {} phases matched.", report.phases.len());
    Ok(())
}
