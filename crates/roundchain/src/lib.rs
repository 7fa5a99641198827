//! # Roundchain
//!
//! Node tooling for the Roundchain consensus engine.
//!
//! The library wires [`roundchain_consensus::ConsensusEngine`] to in-memory
//! collaborators and runs several nodes in one process:
//!
//! - [`LocalNetwork`] - lossy, reordering transport between simulated nodes
//! - [`TxnPool`] - synthetic transaction source
//! - [`MemoryBlockStore`] and [`HashStateApplier`] - storage and state transition
//! - [`Simulation`] - key generation, engine start-up and the finalized-chain report
//!
//! ## Example
//!
//! ```rust,no_run
//! use roundchain::Simulation;
//! use roundchain_config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = Config::default();
//!     config.simulation.nodes = 4;
//!     config.simulation.rounds = 3;
//!
//!     let report = Simulation::new(config)?.run().await?;
//!     assert!(report.agreed());
//!     Ok(())
//! }
//! ```

pub mod network;
pub mod pool;
pub mod settings;
pub mod simulation;
pub mod store;

pub use network::{LocalNetwork, LocalPeers, NetworkModel, NetworkStats};
pub use pool::{PoolStats, TxnPool};
pub use simulation::{ChainRecorder, SimulatedNode, Simulation, SimulationReport};
pub use store::{HashStateApplier, MemoryBlockStore};
