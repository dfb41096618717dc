//! Statistics generation from the harvest database
//!
//! This module provides functionality for extracting and displaying
//! harvest statistics from the storage layer.

use crate::state::RateLimitState;
use crate::storage::{RunRecord, Storage, TargetRecord};
use crate::HarvestError;
use chrono::{DateTime, Utc};

/// Stored totals for one target
#[derive(Debug, Clone)]
pub struct TargetStatistics {
    pub target: TargetRecord,
    pub items: i64,
    pub children: i64,
}

/// Harvest statistics summary
#[derive(Debug, Clone)]
pub struct HarvestStatistics {
    /// Every target in the store, by name
    pub targets: Vec<TargetStatistics>,

    /// Total number of items stored
    pub total_items: i64,

    /// Total number of children stored
    pub total_children: i64,

    /// Most recent runs across all targets, newest first
    pub recent_runs: Vec<RunRecord>,

    /// Recorded quota state per credential fingerprint, sorted by key
    pub rate_limits: Vec<(String, RateLimitState)>,
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - The storage backend to query
/// * `run_limit` - How many recent runs to include
///
/// # Returns
///
/// * `Ok(HarvestStatistics)` - Successfully loaded statistics
/// * `Err(HarvestError)` - Failed to query statistics
pub fn load_statistics(
    storage: &dyn Storage,
    run_limit: u32,
) -> Result<HarvestStatistics, HarvestError> {
    let mut targets = Vec::new();
    for target in storage.list_targets()? {
        let items = storage.count_items(Some(&target.name))?;
        let children = storage.count_children(Some(&target.name))?;
        targets.push(TargetStatistics {
            target,
            items,
            children,
        });
    }

    let mut rate_limits: Vec<_> = storage.load_rate_limits()?.into_iter().collect();
    rate_limits.sort_by(|a, b| a.0.cmp(&b.0));

    Ok(HarvestStatistics {
        targets,
        total_items: storage.count_items(None)?,
        total_children: storage.count_children(None)?,
        recent_runs: storage.recent_runs(None, run_limit)?,
        rate_limits,
    })
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &HarvestStatistics) {
    let now = Utc::now();

    println!("=== Harvest Statistics ===\n");

    println!("Overview:");
    println!("  Targets: {}", stats.targets.len());
    println!("  Items stored: {}", stats.total_items);
    println!("  Children stored: {}", stats.total_children);
    println!();

    println!("Targets:");
    for entry in &stats.targets {
        let target = &entry.target;
        let mut flags = Vec::new();
        if !target.active {
            flags.push("inactive");
        }
        if target.needs_attention {
            flags.push("NEEDS ATTENTION");
        }
        let flags = if flags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", flags.join(", "))
        };

        println!(
            "  {}{}: {} items, {} children",
            target.name, flags, entry.items, entry.children
        );
        println!(
            "    {} {} every {}s, last run {}, next run {}",
            target.listing,
            target.time_window,
            target.interval_secs,
            format_time(target.last_run),
            format_time(target.next_run)
        );
    }
    println!();

    if !stats.recent_runs.is_empty() {
        println!("Recent Runs:");
        for run in &stats.recent_runs {
            println!(
                "  #{} {} {} at {} ({}s): items +{} ~{} ={} !{}, children +{} ~{} ={} !{}, invalid {}",
                run.id,
                run.target,
                run.outcome,
                run.finished_at.format("%Y-%m-%d %H:%M:%S"),
                (run.finished_at - run.started_at).num_seconds(),
                run.items.inserted,
                run.items.updated,
                run.items.skipped,
                run.items.failed,
                run.children.inserted,
                run.children.updated,
                run.children.skipped,
                run.children.failed,
                run.skipped_invalid
            );
            if let Some(error) = &run.error {
                println!("      error: {}", error);
            }
        }
        println!();
    }

    if !stats.rate_limits.is_empty() {
        println!("Rate Limits:");
        for (key, state) in &stats.rate_limits {
            let status = if state.is_stale(now) {
                "reset passed".to_string()
            } else {
                format!("resets in {}s", state.time_until_reset(now).as_secs())
            };
            println!(
                "  {}: {}/{} remaining ({})",
                key, state.remaining, state.limit_total, status
            );
        }
    }
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    match time {
        Some(time) => time.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => "never".to_string(),
    }
}
