//! Configuration module for Post-Harvester
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use post_harvester::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvester.toml")).unwrap();
//! for target in &config.targets {
//!     println!("{} every {}s", target.name, target.interval_secs);
//! }
//! ```

mod parser;
mod types;
mod validation;

pub use types::{
    Config, CredentialEntry, ProviderConfig, RateLimitConfig, RetryConfig, StorageConfig,
    TargetEntry,
};

pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
pub use validation::{MAX_CHILD_DEPTH, MAX_INTERVAL_SECS, MAX_ITEMS_CEILING, MIN_INTERVAL_SECS};
