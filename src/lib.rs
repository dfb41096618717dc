//! Post-Harvester: a rate-limited post and comment harvester
//!
//! This crate polls a social content platform's API for posts and their
//! comments, one schedule per configured target, keeps every API credential
//! inside its quota, and merges what it fetches into a SQLite store without
//! duplicating records across runs.

pub mod config;
pub mod harvest;
pub mod output;
pub mod provider;
pub mod ratelimit;
pub mod state;
pub mod storage;

use thiserror::Error;

/// Main error type for Post-Harvester operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Provider error: {0}")]
    Provider(#[from] provider::ProviderError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown target: {0}")]
    UnknownTarget(String),

    #[error("Unknown credential: {0}")]
    UnknownCredential(String),

    #[error("Target {0} is not active")]
    TargetInactive(String),

    #[error("Run of {0} ended abnormally: {1}")]
    RunAborted(String, String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for Post-Harvester operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use harvest::{FetchExecutor, MergeEngine, MergeReport, Scheduler};
pub use ratelimit::RateLimitTracker;
pub use state::{RunOutcome, RunPhase};
