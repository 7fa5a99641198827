//! # Roundchain
//!
//! Command-line entry point: runs an in-process network of consensus nodes and
//! manages the `roundchain.toml` configuration file.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use roundchain::Simulation;
use roundchain_config::Config;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Roundchain consensus node tools
#[derive(Parser, Debug)]
#[command(name = "roundchain")]
#[command(author = "Roundchain Team")]
#[command(version)]
#[command(about = "Threshold random beacon round consensus")]
#[command(long_about = None)]
struct Cli {
    /// Enable verbose logging (can be repeated for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log format: text, json, or compact (defaults to [logging].format)
    #[arg(long)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum LogFormat {
    Text,
    Json,
    Compact,
}

impl LogFormat {
    fn from_config(format: &str) -> Self {
        match format.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Text,
        }
    }
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run several nodes in-process until they finalize a number of rounds
    Simulate {
        /// Configuration file path (defaults apply when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Number of nodes (overrides [simulation].nodes)
        #[arg(long)]
        nodes: Option<usize>,

        /// Rounds to finalize (overrides [simulation].rounds)
        #[arg(long)]
        rounds: Option<u64>,

        /// Network model seed (overrides [simulation].seed)
        #[arg(long)]
        seed: Option<u64>,

        /// Percentage of dropped messages (overrides [simulation].drop_percent)
        #[arg(long)]
        drop_percent: Option<u8>,

        /// Deal threshold keys centrally instead of running the DKG
        #[arg(long)]
        trusted_dealer: bool,
    },

    /// Write the default configuration
    InitConfig {
        /// Output file
        #[arg(short, long, default_value = "roundchain.toml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate {
            ref config,
            nodes,
            rounds,
            seed,
            drop_percent,
            trusted_dealer,
        } => {
            let mut config = match config {
                Some(path) => Config::load(path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => Config::default(),
            };
            if let Some(nodes) = nodes {
                config.simulation.nodes = nodes;
            }
            if let Some(rounds) = rounds {
                config.simulation.rounds = rounds;
            }
            if let Some(seed) = seed {
                config.simulation.seed = seed;
            }
            if let Some(drop_percent) = drop_percent {
                config.simulation.drop_percent = drop_percent;
            }
            config.dkg.trusted_dealer |= trusted_dealer;

            init_tracing(&cli, &config)?;
            info!(version = env!("CARGO_PKG_VERSION"), "Starting Roundchain");
            handle_simulate(config).await
        }
        Commands::InitConfig { ref output, force } => {
            init_tracing(&cli, &Config::default())?;
            handle_init_config(output, force)
        }
        Commands::Version => handle_version(),
    }
}

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` wins; otherwise the `-v` count, then `[logging].level`, picks the filter.
fn init_tracing(cli: &Cli, config: &Config) -> Result<()> {
    let filter = match cli.verbose {
        0 => format!("{},roundchain={}", config.logging.level, config.logging.level),
        1 => "info,roundchain=debug,roundchain_consensus=debug".to_string(),
        2 => "debug".to_string(),
        _ => "trace".to_string(),
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    let format = cli
        .log_format
        .unwrap_or_else(|| LogFormat::from_config(&config.logging.format));

    match format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_target(true))
                .with(env_filter)
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(env_filter)
                .init();
        }
        LogFormat::Compact => {
            tracing_subscriber::registry()
                .with(fmt::layer().compact())
                .with(env_filter)
                .init();
        }
    }

    Ok(())
}

/// Handle the `simulate` command
async fn handle_simulate(config: Config) -> Result<()> {
    let simulation = Simulation::new(config)?;
    let report = simulation.run().await?;

    let Some(chain) = report.common_chain() else {
        for (party, chain) in &report.chains {
            println!("party {}: {} finalized", party, chain.len());
        }
        bail!("nodes disagree on the finalized chain");
    };

    println!("Finalized chain ({} nodes agree):", report.chains.len());
    for (round, hash) in chain {
        println!("  round {:>4}  {}", round, hash);
    }
    println!(
        "Messages: {} delivered, {} dropped; elapsed {:.2}s",
        report.delivered,
        report.dropped,
        report.elapsed.as_secs_f64()
    );
    Ok(())
}

/// Handle the `init-config` command
fn handle_init_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", output.display());
    }
    Config::default().save(output)?;
    info!(path = %output.display(), "Wrote default configuration");
    println!("Wrote {}", output.display());
    Ok(())
}

/// Handle the `version` command
fn handle_version() -> Result<()> {
    println!("roundchain {}", env!("CARGO_PKG_VERSION"));
    println!("  Rust: {}", env!("CARGO_PKG_RUST_VERSION"));
    Ok(())
}
