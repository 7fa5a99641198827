//! # Roundchain Configuration
//!
//! Configuration parsing for Roundchain nodes. All settings are defined in one
//! `roundchain.toml` file; every field has a default.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use roundchain_config::Config;
//! use std::path::Path;
//!
//! let config = Config::load(Path::new("roundchain.toml"))?;
//! println!("Chain ID: {}", config.chain.chain_id);
//! println!("Collection window: {}ms", config.consensus.collection_window_ms);
//! ```
//!
//! ## Configuration Sections
//!
//! - `[chain]` - Chain identity used in signature domains
//! - `[consensus]` - Round pipeline (collection window, quorum rule, generators, timeouts)
//! - `[dkg]` - Key generation threshold and rebroadcast timing
//! - `[router]` - Retry backoff and inbound queue capacity
//! - `[logging]` - Log level and format
//! - `[simulation]` - Node count and network model for `roundchain simulate`

mod config;
mod error;

pub use config::*;
pub use error::*;
