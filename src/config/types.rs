use crate::provider::{Listing, TimeWindow};
use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Post-Harvester
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub provider: ProviderConfig,
    #[serde(rename = "rate-limit", default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    pub storage: StorageConfig,
    #[serde(rename = "credential", default)]
    pub credentials: Vec<CredentialEntry>,
    #[serde(rename = "target", default)]
    pub targets: Vec<TargetEntry>,
}

impl Config {
    /// Looks up a credential set by its configured id
    pub fn credential(&self, id: &str) -> Option<&CredentialEntry> {
        self.credentials.iter().find(|c| c.id == id)
    }

    /// Looks up a target by name
    pub fn target(&self, name: &str) -> Option<&TargetEntry> {
        self.targets.iter().find(|t| t.name == name)
    }
}

/// Provider endpoint configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// OAuth token endpoint
    #[serde(rename = "auth-url", default = "default_auth_url")]
    pub auth_url: String,

    /// Base URL for authenticated API calls
    #[serde(rename = "api-url", default = "default_api_url")]
    pub api_url: String,

    /// User agent sent with every request
    #[serde(rename = "user-agent")]
    pub user_agent: String,

    /// Per-request timeout (seconds)
    #[serde(rename = "request-timeout-secs", default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl ProviderConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_auth_url() -> String {
    "https://www.reddit.com/api/v1/access_token".to_string()
}

fn default_api_url() -> String {
    "https://oauth.reddit.com".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

/// Quota gate behavior
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Calls are held back once remaining quota drops to this value
    #[serde(rename = "min-remaining", default = "default_min_remaining")]
    pub min_remaining: u32,

    /// Added to every wait to absorb clock skew (milliseconds)
    #[serde(rename = "safety-margin-ms", default = "default_safety_margin")]
    pub safety_margin_ms: u64,

    /// Longest single sleep before the gate is re-checked (milliseconds)
    #[serde(rename = "max-single-sleep-ms", default = "default_max_single_sleep")]
    pub max_single_sleep_ms: u64,

    /// Pause between successive provider calls in one run (milliseconds)
    #[serde(rename = "call-pacing-ms", default = "default_call_pacing")]
    pub call_pacing_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            min_remaining: default_min_remaining(),
            safety_margin_ms: default_safety_margin(),
            max_single_sleep_ms: default_max_single_sleep(),
            call_pacing_ms: default_call_pacing(),
        }
    }
}

fn default_min_remaining() -> u32 {
    50
}

fn default_safety_margin() -> u64 {
    10_000
}

fn default_max_single_sleep() -> u64 {
    30_000
}

fn default_call_pacing() -> u64 {
    500
}

/// Retry policy for transient provider failures
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per call, including the first
    #[serde(rename = "max-attempts", default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry (milliseconds)
    #[serde(rename = "initial-delay-ms", default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Ceiling for the exponential delay (milliseconds)
    #[serde(rename = "max-delay-ms", default = "default_max_delay")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> u64 {
    1_000
}

fn default_max_delay() -> u64 {
    30_000
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

/// One API credential set with its own quota
#[derive(Debug, Clone, Deserialize)]
pub struct CredentialEntry {
    /// Name targets use to refer to this credential set
    pub id: String,

    #[serde(rename = "client-id")]
    pub client_id: String,

    #[serde(rename = "client-secret")]
    pub client_secret: String,

    pub username: String,

    pub password: String,
}

/// One content collection to poll
#[derive(Debug, Clone, Deserialize)]
pub struct TargetEntry {
    /// Collection name on the provider (e.g. a subreddit without the "r/")
    pub name: String,

    /// Id of the credential set used for this target
    pub credential: String,

    #[serde(default)]
    pub listing: Listing,

    #[serde(rename = "time-window", default)]
    pub time_window: TimeWindow,

    /// Seconds between scheduled runs
    #[serde(rename = "interval-secs", default = "default_interval")]
    pub interval_secs: u64,

    #[serde(rename = "max-items-per-run", default = "default_max_items")]
    pub max_items_per_run: u32,

    #[serde(rename = "fetch-children", default = "default_true")]
    pub fetch_children: bool,

    #[serde(rename = "max-children-per-item", default = "default_max_children")]
    pub max_children_per_item: u32,

    /// Deepest reply level to keep; 0 keeps top-level children only
    #[serde(rename = "max-child-depth", default)]
    pub max_child_depth: u32,

    #[serde(default = "default_true")]
    pub active: bool,
}

impl TargetEntry {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

fn default_interval() -> u64 {
    24 * 60 * 60
}

fn default_max_items() -> u32 {
    100
}

fn default_max_children() -> u32 {
    500
}

fn default_true() -> bool {
    true
}
