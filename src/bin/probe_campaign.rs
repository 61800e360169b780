//! Consistency campaign runner
//!
//! Starts the node fleet, waits for it to answer, runs the write/read-back
//! campaign, then shuts the fleet down.
//!
//! Usage: probe-campaign [--config FILE] [--binary PATH] [--nodes N] [--rounds N] ...
//!
//! Example for the stock five-node mesh on 127.0.0.1:8080-8084:
//!   probe-campaign --binary ./replicaStorage --rounds 20
//!
//! Exit status is non-zero when more probes time out than `--max-timeouts` allows.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use replica_probe::config::ReadinessKind;
use replica_probe::{
    Campaign, CampaignSettings, ConsistencyProber, HarnessConfig, LaunchOptions, NodeConfig,
    NodeFleet, ReadinessGate, ReplicaClient, ShutdownPolicy, Topology,
};

/// Write/read-back convergence campaign against a replicated node fleet.
#[derive(Parser, Debug)]
#[command(name = "probe-campaign", version, about)]
struct CliArgs {
    /// TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Node binary to launch
    #[arg(short, long, value_name = "PATH")]
    binary: Option<PathBuf>,

    /// Replace the configured topology with an N-node full mesh on 127.0.0.1:8080+
    #[arg(long, value_name = "N")]
    nodes: Option<usize>,

    /// Number of rounds
    #[arg(short, long)]
    rounds: Option<usize>,

    /// RNG seed for reproducible origin/sink choices
    #[arg(long)]
    seed: Option<u64>,

    /// Probe deadline in milliseconds
    #[arg(long, value_name = "MS")]
    deadline_ms: Option<u64>,

    /// Delay between snapshot reads in milliseconds (0 = busy poll)
    #[arg(long, value_name = "MS")]
    poll_interval_ms: Option<u64>,

    /// Use a fixed warm-up delay instead of the readiness probe
    #[arg(long, value_name = "MS")]
    warmup_ms: Option<u64>,

    /// Maximum tolerated probe timeouts
    #[arg(long)]
    max_timeouts: Option<usize>,

    /// Do not wait for the operator before teardown
    #[arg(long)]
    no_pause: bool,

    /// Log filter when RUST_LOG is unset
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

impl CliArgs {
    fn load_config(&self) -> Result<HarnessConfig> {
        let mut config = match &self.config {
            Some(path) => HarnessConfig::from_file(path)?,
            None => HarnessConfig::default(),
        };

        if let Some(binary) = &self.binary {
            config.node_binary = binary.clone();
        }
        if let Some(n) = self.nodes {
            config.nodes = NodeConfig::full_mesh(n, "127.0.0.1", 8080);
        }
        if let Some(rounds) = self.rounds {
            config.campaign.rounds = rounds;
        }
        if self.seed.is_some() {
            config.campaign.seed = self.seed;
        }
        if let Some(ms) = self.deadline_ms {
            config.probe.deadline_ms = ms;
        }
        if let Some(ms) = self.poll_interval_ms {
            config.probe.poll_interval_ms = ms;
        }
        if let Some(ms) = self.warmup_ms {
            config.readiness.mode = ReadinessKind::Warmup;
            config.readiness.warmup_ms = ms;
        }
        if let Some(max) = self.max_timeouts {
            config.campaign.max_timeouts = max;
        }
        if self.no_pause {
            config.campaign.pause_before_teardown = false;
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        Ok(config)
    }
}

fn init_tracing(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("Failed to parse log filter")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))
}

fn wait_for_operator() {
    print!("Continue?");
    let _ = io::stdout().flush();
    let mut line = String::new();
    if let Err(e) = io::stdin().lock().read_line(&mut line) {
        warn!(error = %e, "cannot read from stdin, continuing");
    }
}

// Teardown must still run if the prompt task dies.
async fn pause_before_teardown<F>(prompt: F)
where
    F: FnOnce() + Send + 'static,
{
    if let Err(e) = tokio::task::spawn_blocking(prompt).await {
        warn!(error = %e, "operator prompt failed, tearing down");
    }
}

async fn run(config: HarnessConfig) -> Result<bool> {
    let topology = Topology::new(config.nodes.clone()).context("invalid topology")?;
    let client = ReplicaClient::new(&config.client).context("failed to build HTTP client")?;

    println!("Starting up servers:");
    let mut fleet = NodeFleet::start_all(&topology, &LaunchOptions::from_config(&config)).await?;
    for spec in topology.list_nodes() {
        println!("  Started \"{}\" on {}", spec.name, spec.address);
    }

    let ready = ReadinessGate::from_config(&config.readiness)
        .wait(&client, &topology)
        .await;
    let outcome = match ready {
        Ok(()) => {
            fleet.mark_ready();
            let prober = ConsistencyProber::from_config(&config.probe);
            let settings = CampaignSettings::from_config(&config.campaign);
            let mut campaign = Campaign::new(topology, client, prober, settings);
            let report = campaign.run().await;

            let crashed = fleet.reap_exited();
            if !crashed.is_empty() {
                warn!(nodes = ?crashed, "nodes exited during the campaign");
            }

            print!("{}", report);
            if config.campaign.pause_before_teardown {
                pause_before_teardown(wait_for_operator).await;
            }
            Ok(report.passed(config.campaign.max_timeouts))
        }
        Err(e) => Err(e.into()),
    };

    println!("Killing servers:");
    let shutdown = fleet
        .stop_all(ShutdownPolicy::from_config(&config.shutdown))
        .await;
    for name in &shutdown.stragglers {
        println!("  Server \"{}\" survived SIGKILL", name);
    }
    println!("Testing finished.");

    outcome
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    let config = match args.load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {:#}", e);
            return ExitCode::from(2);
        }
    };

    if args.print_config {
        match toml::to_string_pretty(&config) {
            Ok(text) => {
                println!("{}", text);
                return ExitCode::SUCCESS;
            }
            Err(e) => {
                eprintln!("error: cannot render config: {}", e);
                return ExitCode::from(2);
            }
        }
    }

    if let Err(e) = init_tracing(&config.logging.level) {
        eprintln!("error: {:#}", e);
        return ExitCode::from(2);
    }

    info!(nodes = config.nodes.len(), rounds = config.campaign.rounds, "starting campaign");
    match run(config).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => {
            error!("too many probes timed out");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!(error = %format!("{:#}", e), "campaign aborted");
            ExitCode::from(2)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn test_pause_returns_after_prompt() {
        let answered = Arc::new(AtomicBool::new(false));
        let flag = answered.clone();
        pause_before_teardown(move || flag.store(true, Ordering::SeqCst)).await;
        assert!(answered.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_pause_survives_panicking_prompt() {
        pause_before_teardown(|| panic!("stdin went away")).await;
    }

    #[test]
    fn test_cli_overrides_config() {
        let args = CliArgs::parse_from([
            "probe-campaign",
            "--nodes",
            "3",
            "--warmup-ms",
            "250",
            "--no-pause",
        ]);
        let config = args.load_config().unwrap();
        assert_eq!(config.nodes.len(), 3);
        assert_eq!(config.readiness.mode, ReadinessKind::Warmup);
        assert_eq!(config.readiness.warmup_ms, 250);
        assert!(!config.campaign.pause_before_teardown);
    }
}
