use crate::config::types::{
    Config, CredentialEntry, ProviderConfig, RateLimitConfig, RetryConfig, StorageConfig,
    TargetEntry,
};
use crate::ConfigError;
use std::collections::HashSet;
use url::Url;

/// Largest listing the provider will page through for one query
pub const MAX_ITEMS_CEILING: u32 = 1000;

/// Shortest allowed interval between runs of one target (seconds)
pub const MIN_INTERVAL_SECS: u64 = 60;

/// Longest allowed interval between runs of one target (seconds)
pub const MAX_INTERVAL_SECS: u64 = 365 * 24 * 60 * 60;

/// Deepest reply level fetched below a top-level child
pub const MAX_CHILD_DEPTH: u32 = 10;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_provider_config(&config.provider)?;
    validate_rate_limit_config(&config.rate_limit)?;
    validate_retry_config(&config.retry)?;
    validate_storage_config(&config.storage)?;
    validate_credentials(&config.credentials)?;
    validate_targets(&config.targets, &config.credentials)?;
    Ok(())
}

/// Validates provider endpoints and identification
fn validate_provider_config(config: &ProviderConfig) -> Result<(), ConfigError> {
    validate_http_url("auth-url", &config.auth_url)?;
    validate_http_url("api-url", &config.api_url)?;

    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user-agent cannot be empty".to_string(),
        ));
    }

    if config.request_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "request-timeout-secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_http_url(field: &str, value: &str) -> Result<(), ConfigError> {
    let url = Url::parse(value)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid {}: {}", field, e)))?;

    if url.scheme() != "https" && url.scheme() != "http" {
        return Err(ConfigError::InvalidUrl(format!(
            "{} must use http or https, got '{}'",
            field,
            url.scheme()
        )));
    }

    Ok(())
}

fn validate_rate_limit_config(config: &RateLimitConfig) -> Result<(), ConfigError> {
    if config.max_single_sleep_ms == 0 {
        return Err(ConfigError::Validation(
            "max-single-sleep-ms must be >= 1".to_string(),
        ));
    }
    Ok(())
}

fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    if config.max_attempts < 1 || config.max_attempts > 10 {
        return Err(ConfigError::Validation(format!(
            "max-attempts must be between 1 and 10, got {}",
            config.max_attempts
        )));
    }

    if config.initial_delay_ms > config.max_delay_ms {
        return Err(ConfigError::Validation(format!(
            "initial-delay-ms ({}) cannot exceed max-delay-ms ({})",
            config.initial_delay_ms, config.max_delay_ms
        )));
    }

    Ok(())
}

fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }
    Ok(())
}

/// Validates credential entries
fn validate_credentials(credentials: &[CredentialEntry]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();

    for entry in credentials {
        if entry.id.is_empty() {
            return Err(ConfigError::Validation(
                "credential id cannot be empty".to_string(),
            ));
        }

        if !seen.insert(entry.id.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Duplicate credential id '{}'",
                entry.id
            )));
        }

        if entry.client_id.is_empty() || entry.username.is_empty() {
            return Err(ConfigError::Validation(format!(
                "Credential '{}' needs both client-id and username",
                entry.id
            )));
        }
    }

    Ok(())
}

/// Validates target entries against the known credentials
fn validate_targets(
    targets: &[TargetEntry],
    credentials: &[CredentialEntry],
) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();

    for entry in targets {
        validate_target_name(&entry.name)?;

        if !seen.insert(entry.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Duplicate target '{}'",
                entry.name
            )));
        }

        if !credentials.iter().any(|c| c.id == entry.credential) {
            return Err(ConfigError::Validation(format!(
                "Target '{}' refers to unknown credential '{}'",
                entry.name, entry.credential
            )));
        }

        if entry.interval_secs < MIN_INTERVAL_SECS || entry.interval_secs > MAX_INTERVAL_SECS {
            return Err(ConfigError::Validation(format!(
                "Target '{}': interval-secs must be between {} and {}, got {}",
                entry.name, MIN_INTERVAL_SECS, MAX_INTERVAL_SECS, entry.interval_secs
            )));
        }

        if entry.max_items_per_run < 1 || entry.max_items_per_run > MAX_ITEMS_CEILING {
            return Err(ConfigError::Validation(format!(
                "Target '{}': max-items-per-run must be between 1 and {}, got {}",
                entry.name, MAX_ITEMS_CEILING, entry.max_items_per_run
            )));
        }

        if entry.fetch_children && entry.max_children_per_item < 1 {
            return Err(ConfigError::Validation(format!(
                "Target '{}': max-children-per-item must be >= 1 when fetch-children is set",
                entry.name
            )));
        }

        if entry.max_child_depth > MAX_CHILD_DEPTH {
            return Err(ConfigError::Validation(format!(
                "Target '{}': max-child-depth must be <= {}, got {}",
                entry.name, MAX_CHILD_DEPTH, entry.max_child_depth
            )));
        }
    }

    Ok(())
}

/// Target names are provider collection names: letters, digits and underscores
fn validate_target_name(name: &str) -> Result<(), ConfigError> {
    if name.is_empty() {
        return Err(ConfigError::Validation(
            "Target name cannot be empty".to_string(),
        ));
    }

    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ConfigError::Validation(format!(
            "Target name '{}' may only contain letters, digits and underscores",
            name
        )));
    }

    Ok(())
}
