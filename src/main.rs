mod chain;
mod config;
mod multiplexer;
mod poller;
mod recovery;
mod retry;
mod signals;
mod staleness;
mod watchdog;

use chain::api_info;
use chain::lotus::LotusClient;
use clap::Parser;
use config::{ConfigError, HealthConfig};
use multiplexer::{ExitStatus, Multiplexer};
use poller::HeadPoller;
use recovery::{RecoveryDispatcher, SystemdController};
use retry::AttemptBudget;
use staleness::StalenessDetector;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use watchdog::{SyncGate, Watchdog};

/// Watch a Lotus node's chain head and restart the daemon once it stalls.
///
/// Single-shot: exits after one restart attempt or on SIGTERM/SIGINT,
/// and is expected to be relaunched by its own supervisor.
#[derive(Parser, Debug)]
#[command(name = "lotus-health", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "lotus-health.toml")]
    config: PathBuf,

    /// Unchanged head observations before restarting (overrides config)
    #[arg(long)]
    threshold: Option<u32>,

    /// Seconds between head observations (overrides config)
    #[arg(long)]
    interval: Option<u64>,

    /// Systemd unit to restart (overrides config)
    #[arg(long, alias = "systemd-unit")]
    managed_unit: Option<String>,

    /// Seconds per chain API attempt (overrides config)
    #[arg(long)]
    api_timeout: Option<u64>,

    /// Extra chain API attempts per observation (overrides config)
    #[arg(long)]
    api_retries: Option<u32>,

    /// Node JSON-RPC URL, e.g. http://127.0.0.1:1234/rpc/v0
    #[arg(long)]
    api_url: Option<String>,

    /// Node API token
    #[arg(long)]
    api_token: Option<String>,

    /// Lotus repo path holding the `api` and `token` files
    #[arg(long, env = "LOTUS_PATH")]
    repo: Option<PathBuf>,

    /// Start monitoring immediately instead of waiting for the node to sync
    #[arg(long)]
    no_sync_wait: bool,

    /// Validate config and print resolved settings, don't run
    #[arg(long)]
    dry_run: bool,

    /// Extra logging (every poll and counter change)
    #[arg(short, long)]
    verbose: bool,

    /// Only warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

impl Cli {
    /// Apply command-line overrides on top of the file config.
    fn apply(&self, config: &mut HealthConfig) {
        if let Some(threshold) = self.threshold {
            config.watchdog.threshold = threshold;
        }
        if let Some(interval) = self.interval {
            config.watchdog.interval_secs = Some(interval);
        }
        if let Some(unit) = &self.managed_unit {
            config.recovery.managed_unit = unit.clone();
        }
        if let Some(timeout) = self.api_timeout {
            config.chain.api_timeout_secs = Some(timeout);
        }
        if let Some(retries) = self.api_retries {
            config.chain.api_retries = retries;
        }
        if let Some(url) = &self.api_url {
            config.chain.api_url = Some(url.clone());
        }
        if let Some(token) = &self.api_token {
            config.chain.api_token = Some(token.clone());
        }
        if let Some(repo) = &self.repo {
            config.chain.repo = repo.clone();
        }
        if self.no_sync_wait {
            config.watchdog.wait_for_sync = false;
        }
    }

    fn log_filter(&self) -> &'static str {
        if self.verbose {
            "lotus_health=debug"
        } else if self.quiet {
            "lotus_health=warn"
        } else {
            "lotus_health=info"
        }
    }
}

fn load_config(cli: &Cli) -> Result<HealthConfig, ConfigError> {
    // An explicitly named config file must exist; the default one may not.
    let required = cli.config != PathBuf::from("lotus-health.toml");
    let mut config = HealthConfig::load(&cli.config, required)?;
    cli.apply(&mut config);
    config.validate()?;
    Ok(config)
}

fn print_resolved(config: &HealthConfig, api: &api_info::ApiInfo) {
    println!("lotus-health v{}", env!("CARGO_PKG_VERSION"));
    println!("  api url:          {}", api.url);
    println!(
        "  api token:        {}",
        if api.token.is_some() { "set" } else { "none" }
    );
    println!("  threshold:        {}", config.watchdog.threshold);
    println!("  interval:         {}s", config.interval().as_secs());
    println!("  api timeout:      {}s", config.api_timeout().as_secs());
    println!("  api retries:      {}", config.chain.api_retries);
    println!("  unreachable:      {:?}", config.watchdog.unreachable_policy);
    println!(
        "  wait for sync:    {} (up to {}s)",
        config.watchdog.wait_for_sync,
        config.sync_timeout().as_secs()
    );
    println!("  managed unit:     {}", config.recovery.managed_unit);
    println!(
        "  restart command:  {} {}",
        config.recovery.command,
        config.recovery.args.join(" ")
    );
    println!("  restart timeout:  {}s", config.restart_timeout().as_secs());
}

/// Run one watchdog cycle and return the process exit code.
async fn run(cli: Cli) -> i32 {
    let config = match load_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "configuration error");
            return ExitStatus::ConfigError.code();
        }
    };

    let env_api_info = std::env::var(api_info::API_INFO_ENV).ok();
    let info = match api_info::resolve(
        config.chain.api_url.as_deref(),
        config.chain.api_token.as_deref(),
        env_api_info.as_deref(),
        &config.chain.repo,
    ) {
        Ok(info) => info,
        Err(e) => {
            tracing::error!(error = %e, "cannot locate node API");
            return ExitStatus::ConfigError.code();
        }
    };

    if cli.dry_run {
        print_resolved(&config, &info);
        return 0;
    }

    let client = match LotusClient::new(info) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            tracing::error!(error = %e, "failed to build chain API client");
            return ExitStatus::ConfigError.code();
        }
    };
    tracing::info!(url = %client.url(), unit = %config.recovery.managed_unit, "lotus-health starting");

    let budget = AttemptBudget::new(config.chain.api_retries, config.api_timeout())
        .with_backoff(config.retry_backoff());
    let sync_gate = config.watchdog.wait_for_sync.then(|| SyncGate {
        max_lag: config.block_delay(),
        poll_every: config.sync_poll(),
        deadline: config.sync_timeout(),
    });
    let watchdog = Watchdog::new(
        HeadPoller::new(client, budget),
        StalenessDetector::new(config.watchdog.threshold, config.watchdog.unreachable_policy),
        config.interval(),
        sync_gate,
    );

    let dispatcher = RecoveryDispatcher::new(
        SystemdController::from_config(&config.recovery),
        config.recovery.managed_unit.clone(),
        config.restart_timeout(),
    );
    let mut multiplexer = Multiplexer::new(dispatcher);

    let (alert_tx, alert_rx) = mpsc::channel(1);
    let pipeline = tokio::spawn(watchdog.run(alert_tx));

    let status = multiplexer.run(alert_rx, signals::termination()).await;
    pipeline.abort();
    tracing::info!(?status, code = status.code(), "lotus-health exiting");
    status.code()
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log_filter())),
        )
        .with_target(false)
        .with_thread_ids(false)
        .init();

    tracing::debug!(?cli, "parsed CLI arguments");

    let code = run(cli).await;
    std::process::exit(code);
}
