//! Main configuration module for Roundchain
//!
//! All node settings live in one `roundchain.toml` file. Every section and every
//! field has a default, so an empty file is a valid configuration.

use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Main configuration struct containing all Roundchain settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Chain identity
    pub chain: ChainConfig,

    /// Round pipeline parameters
    pub consensus: ConsensusConfig,

    /// Distributed key generation
    pub dkg: DkgConfig,

    /// Inbound message routing and retry
    pub router: RouterConfig,

    /// Logging settings
    pub logging: LoggingConfig,

    /// In-process simulation settings
    pub simulation: SimulationConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// use roundchain_config::Config;
    /// use std::path::Path;
    ///
    /// let config = Config::load(Path::new("roundchain.toml"))?;
    /// ```
    pub fn load(path: &Path) -> ConfigResult<Self> {
        info!("Loading configuration from {:?}", path);

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content)?;

        debug!("Configuration parsed successfully, validating...");
        config.validate()?;

        info!(
            chain_id = %config.chain.chain_id,
            nodes = config.simulation.nodes,
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Load configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> ConfigResult<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every section plus the cross-section constraints.
    pub fn validate(&self) -> ConfigResult<()> {
        self.chain.validate()?;
        self.consensus.validate()?;
        self.dkg.validate()?;
        self.router.validate()?;
        self.logging.validate()?;
        self.simulation.validate()?;

        if self.consensus.num_generators > self.simulation.nodes {
            return Err(ConfigError::TooFewParticipants {
                required: self.consensus.num_generators,
                actual: self.simulation.nodes,
            });
        }

        debug!("Configuration validation passed");
        Ok(())
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = self.to_toml()?;
        std::fs::write(path, content).map_err(|e| ConfigError::FileWrite {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(())
    }

    /// Render the configuration as pretty TOML.
    pub fn to_toml(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

fn require_positive(name: &'static str, value: u64) -> ConfigResult<()> {
    if value == 0 {
        return Err(ConfigError::InvalidTimeout { name, value });
    }
    Ok(())
}

// =============================================================================
// Chain Configuration
// =============================================================================

/// Chain identity configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Chain identifier mixed into every signature domain
    pub chain_id: String,
}

impl ChainConfig {
    /// Reject an empty chain identifier.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.chain_id.trim().is_empty() {
            return Err(ConfigError::InvalidChainId);
        }
        Ok(())
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            chain_id: "roundchain-devnet".to_string(),
        }
    }
}

// =============================================================================
// Consensus Configuration
// =============================================================================

/// Where verification tickets are sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketDelivery {
    /// Broadcast to every participant
    #[default]
    Broadcast,
    /// Send only to the block's proposer
    Proposer,
}

/// How ticket quorum is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuorumRuleKind {
    /// Count distinct verifiers
    #[default]
    Count,
    /// Sum verifier stake
    Stake,
}

/// Round pipeline parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Proposal collection window before verification starts (milliseconds)
    pub collection_window_ms: u64,

    /// Number of top-ranked parties allowed to propose
    pub num_generators: usize,

    /// Ticket delivery mode
    pub ticket_delivery: TicketDelivery,

    /// Quorum measurement
    pub quorum_rule: QuorumRuleKind,

    /// Quorum fraction numerator
    pub quorum_numerator: u64,

    /// Quorum fraction denominator
    pub quorum_denominator: u64,

    /// Verify beacon shares against public key shares
    pub verify_beacon_shares: bool,

    /// Proposals wait until at least this many transactions are available
    pub min_block_transactions: usize,

    /// Maximum transactions per block
    pub max_block_transactions: usize,

    /// Delay before retrying a proposal that lacked transactions (milliseconds)
    pub proposal_retry_ms: u64,

    /// Soft timeout for a round to notarize (milliseconds)
    pub round_timeout_ms: u64,

    /// Soft timeouts before an un-notarized round restarts its beacon
    pub max_soft_timeouts: u32,

    /// Finalized rounds kept in memory behind the finalized head
    pub retained_rounds: u64,

    /// Finalized rounds whose transactions are still checked for double inclusion
    pub committed_retention_rounds: u64,
}

impl ConsensusConfig {
    /// Validate timeouts, the quorum fraction and block size bounds.
    pub fn validate(&self) -> ConfigResult<()> {
        require_positive("collection_window_ms", self.collection_window_ms)?;
        require_positive("proposal_retry_ms", self.proposal_retry_ms)?;
        require_positive("round_timeout_ms", self.round_timeout_ms)?;

        if self.num_generators == 0 {
            return Err(ConfigError::ZeroCount {
                name: "num_generators",
            });
        }

        if self.quorum_numerator == 0
            || self.quorum_denominator == 0
            || self.quorum_numerator > self.quorum_denominator
        {
            return Err(ConfigError::InvalidQuorum {
                numerator: self.quorum_numerator,
                denominator: self.quorum_denominator,
            });
        }

        if self.max_block_transactions == 0 {
            return Err(ConfigError::ZeroCount {
                name: "max_block_transactions",
            });
        }
        if self.committed_retention_rounds == 0 {
            return Err(ConfigError::ZeroCount {
                name: "committed_retention_rounds",
            });
        }
        if self.min_block_transactions > self.max_block_transactions {
            return Err(ConfigError::InvalidBlockSize {
                min: self.min_block_transactions,
                max: self.max_block_transactions,
            });
        }

        Ok(())
    }

    /// Collection window as a duration.
    pub fn collection_window(&self) -> Duration {
        Duration::from_millis(self.collection_window_ms)
    }

    /// Round soft timeout as a duration.
    pub fn round_timeout(&self) -> Duration {
        Duration::from_millis(self.round_timeout_ms)
    }

    /// Proposal retry delay as a duration.
    pub fn proposal_retry(&self) -> Duration {
        Duration::from_millis(self.proposal_retry_ms)
    }
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            collection_window_ms: 300,
            num_generators: 1,
            ticket_delivery: TicketDelivery::Broadcast,
            quorum_rule: QuorumRuleKind::Count,
            quorum_numerator: 2,
            quorum_denominator: 3,
            verify_beacon_shares: true,
            min_block_transactions: 1,
            max_block_transactions: 100,
            proposal_retry_ms: 100,
            round_timeout_ms: 2000,
            max_soft_timeouts: 5,
            retained_rounds: 4,
            committed_retention_rounds: 256,
        }
    }
}

// =============================================================================
// DKG Configuration
// =============================================================================

/// Distributed key generation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DkgConfig {
    /// Threshold as a percentage of participants, rounded up
    pub threshold_percent: u8,

    /// Wait for shares from every party; false accepts any `t`
    pub require_all_shares: bool,

    /// Check received shares against the sender's commitment
    pub verify_shares: bool,

    /// Expected one-way network delay (milliseconds)
    pub network_delta_ms: u64,

    /// Rebroadcast interval in multiples of `network_delta_ms`
    pub rebroadcast_factor: u64,

    /// Rebroadcast attempts before giving up
    pub max_rebroadcasts: u32,

    /// Skip the DKG and deal shares from a trusted dealer (simulation only)
    pub trusted_dealer: bool,
}

impl DkgConfig {
    /// Validate the threshold and rebroadcast timing.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.threshold_percent == 0 || self.threshold_percent > 100 {
            return Err(ConfigError::InvalidThreshold(self.threshold_percent));
        }
        require_positive("network_delta_ms", self.network_delta_ms)?;
        require_positive("rebroadcast_factor", self.rebroadcast_factor)?;
        if self.max_rebroadcasts == 0 {
            return Err(ConfigError::ZeroCount {
                name: "max_rebroadcasts",
            });
        }
        Ok(())
    }

    /// Interval between rebroadcasts.
    pub fn rebroadcast_interval(&self) -> Duration {
        Duration::from_millis(self.network_delta_ms.saturating_mul(self.rebroadcast_factor))
    }
}

impl Default for DkgConfig {
    fn default() -> Self {
        Self {
            threshold_percent: 67,
            require_all_shares: true,
            verify_shares: true,
            network_delta_ms: 200,
            rebroadcast_factor: 5,
            max_rebroadcasts: 10,
            trusted_dealer: false,
        }
    }
}

// =============================================================================
// Router Configuration
// =============================================================================

/// Retry delay growth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    /// base * attempt
    Linear,
    /// base * 2^(attempt - 1)
    #[default]
    Exponential,
}

/// Inbound message routing parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// First retry delay (milliseconds)
    pub retry_base_ms: u64,

    /// Retry delay ceiling (milliseconds)
    pub retry_max_ms: u64,

    /// Attempts before a message is dropped
    pub max_attempts: u32,

    /// Delay growth
    pub backoff: BackoffKind,

    /// Random jitter as a fraction of the delay
    pub jitter_percent: f64,

    /// Inbound queue capacity
    pub inbound_capacity: usize,
}

impl RouterConfig {
    /// Validate delays, attempts and queue capacity.
    pub fn validate(&self) -> ConfigResult<()> {
        require_positive("retry_base_ms", self.retry_base_ms)?;
        if self.retry_max_ms < self.retry_base_ms {
            return Err(ConfigError::InvalidRetryRange {
                base: self.retry_base_ms,
                max: self.retry_max_ms,
            });
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::ZeroCount {
                name: "max_attempts",
            });
        }
        if !(0.0..=1.0).contains(&self.jitter_percent) {
            return Err(ConfigError::InvalidJitter(self.jitter_percent));
        }
        if self.inbound_capacity == 0 {
            return Err(ConfigError::ZeroCount {
                name: "inbound_capacity",
            });
        }
        Ok(())
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            retry_base_ms: 50,
            retry_max_ms: 2000,
            max_attempts: 8,
            backoff: BackoffKind::Exponential,
            jitter_percent: 0.1,
            inbound_capacity: 1024,
        }
    }
}

// =============================================================================
// Logging Configuration
// =============================================================================

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json, compact)
    pub format: String,
}

impl LoggingConfig {
    /// Accept only known levels and formats, case-insensitively.
    pub fn validate(&self) -> ConfigResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.level.clone()));
        }

        let valid_formats = ["text", "json", "compact"];
        if !valid_formats.contains(&self.format.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogFormat(self.format.clone()));
        }

        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

// =============================================================================
// Simulation Configuration
// =============================================================================

/// In-process multi-node simulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Number of simulated nodes
    pub nodes: usize,

    /// Rounds to finalize before stopping
    pub rounds: u64,

    /// Minimum one-way message latency (milliseconds)
    pub min_latency_ms: u64,

    /// Maximum one-way message latency (milliseconds)
    pub max_latency_ms: u64,

    /// Percentage of messages dropped
    pub drop_percent: u8,

    /// Seed for the latency and drop model
    pub seed: u64,
}

impl SimulationConfig {
    /// Validate node count, latency range and drop rate.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.nodes == 0 {
            return Err(ConfigError::TooFewParticipants {
                required: 1,
                actual: 0,
            });
        }
        if self.rounds == 0 {
            return Err(ConfigError::ZeroCount { name: "rounds" });
        }
        if self.min_latency_ms > self.max_latency_ms {
            return Err(ConfigError::InvalidLatencyRange {
                min: self.min_latency_ms,
                max: self.max_latency_ms,
            });
        }
        if self.drop_percent > 100 {
            return Err(ConfigError::InvalidPercentage {
                name: "drop_percent",
                value: self.drop_percent,
            });
        }
        Ok(())
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            nodes: 4,
            rounds: 5,
            min_latency_ms: 5,
            max_latency_ms: 30,
            drop_percent: 0,
            seed: 42,
        }
    }
}
