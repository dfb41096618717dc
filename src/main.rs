//! Post-Harvester main entry point
//!
//! This is the command-line interface for the Post-Harvester.

use clap::Parser;
use post_harvester::config::{load_config_with_hash, Config};
use post_harvester::harvest::Harvester;
use post_harvester::output::{load_forest, load_statistics, print_statistics};
use post_harvester::storage::{open_storage, Storage};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Post-Harvester: a rate-limited post and comment harvester
///
/// Post-Harvester polls configured targets on their own schedules, keeps
/// every API credential inside its quota, and merges posts and comments
/// into a SQLite database without duplicating them across runs.
#[derive(Parser, Debug)]
#[command(name = "post-harvester")]
#[command(version)]
#[command(about = "A rate-limited post and comment harvester", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show what would be harvested without calling the API
    #[arg(long, conflicts_with_all = ["stats", "once", "tree", "activate", "deactivate"])]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with_all = ["dry_run", "once", "tree", "activate", "deactivate"])]
    stats: bool,

    /// Run one target immediately, print the run record, and exit
    #[arg(long, value_name = "TARGET", conflicts_with_all = ["dry_run", "stats", "tree", "activate", "deactivate"])]
    once: Option<String>,

    /// Print the stored reply forest of an item as JSON and exit
    #[arg(long, value_name = "ITEM_ID", conflicts_with_all = ["dry_run", "stats", "once", "activate", "deactivate"])]
    tree: Option<String>,

    /// Re-enable a deactivated target and exit
    #[arg(long, value_name = "TARGET", conflicts_with_all = ["dry_run", "stats", "once", "tree", "deactivate"])]
    activate: Option<String>,

    /// Stop scheduling a target (its data is kept) and exit
    #[arg(long, value_name = "TARGET", conflicts_with_all = ["dry_run", "stats", "once", "tree", "activate"])]
    deactivate: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let config = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            cfg
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    // Handle different modes
    if cli.dry_run {
        handle_dry_run(&config)?;
    } else if cli.stats {
        handle_stats(&config)?;
    } else if let Some(item_id) = &cli.tree {
        handle_tree(&config, item_id)?;
    } else if let Some(target) = &cli.once {
        handle_once(config, target).await?;
    } else if let Some(target) = &cli.activate {
        handle_set_active(config, target, true)?;
    } else if let Some(target) = &cli.deactivate {
        handle_set_active(config, target, false)?;
    } else {
        handle_harvest(config).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("post_harvester=info,warn"),
            1 => EnvFilter::new("post_harvester=debug,info"),
            2 => EnvFilter::new("post_harvester=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: validates config and shows what would be harvested
fn handle_dry_run(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Post-Harvester Dry Run ===\n");

    println!("Provider:");
    println!("  Auth URL: {}", config.provider.auth_url);
    println!("  API URL: {}", config.provider.api_url);
    println!("  User agent: {}", config.provider.user_agent);
    println!("  Request timeout: {}s", config.provider.request_timeout_secs);

    println!("\nRate Limiting:");
    println!("  Min remaining: {}", config.rate_limit.min_remaining);
    println!("  Safety margin: {}ms", config.rate_limit.safety_margin_ms);
    println!("  Max single sleep: {}ms", config.rate_limit.max_single_sleep_ms);
    println!("  Call pacing: {}ms", config.rate_limit.call_pacing_ms);

    println!("\nRetry:");
    println!("  Max attempts: {}", config.retry.max_attempts);
    println!(
        "  Backoff: {}ms - {}ms",
        config.retry.initial_delay_ms, config.retry.max_delay_ms
    );

    println!("\nStorage:");
    println!("  Database: {}", config.storage.database_path);

    println!("\nCredentials ({}):", config.credentials.len());
    for credential in &config.credentials {
        println!("  - {} (user {})", credential.id, credential.username);
    }

    println!("\nTargets ({}):", config.targets.len());
    for target in &config.targets {
        println!(
            "  - {}{} via {}: {} {} every {}s, up to {} items",
            target.name,
            if target.active { "" } else { " [inactive]" },
            target.credential,
            target.listing,
            target.time_window,
            target.interval_secs,
            target.max_items_per_run
        );
        if target.fetch_children {
            println!(
                "    * children: up to {} per item, depth {}",
                target.max_children_per_item, target.max_child_depth
            );
        }
    }

    println!("\n✓ Configuration is valid");
    println!(
        "✓ Would schedule {} of {} targets",
        config.targets.iter().filter(|t| t.active).count(),
        config.targets.len()
    );

    Ok(())
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    println!("Database: {}\n", config.storage.database_path);

    let storage = open_storage(Path::new(&config.storage.database_path))?;
    let stats = load_statistics(&storage, 20)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the --tree mode: prints an item's reply forest as JSON
fn handle_tree(config: &Config, item_id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let storage = open_storage(Path::new(&config.storage.database_path))?;

    if storage.get_item(item_id)?.is_none() {
        tracing::warn!("Item {} is not stored; showing any children found", item_id);
    }

    let forest = load_forest(&storage, item_id)?;
    println!("{}", serde_json::to_string_pretty(&forest)?);

    Ok(())
}

/// Handles the --once mode: runs a single target now
async fn handle_once(config: Config, target: &str) -> Result<(), Box<dyn std::error::Error>> {
    let harvester = Harvester::from_config(config)?;

    match harvester.scheduler().run_target(target).await? {
        Some(run) => {
            println!(
                "Run #{} of {}: {} ({} items stored, {} children stored, {} invalid)",
                run.id,
                run.target,
                run.outcome,
                run.items.stored(),
                run.children.stored(),
                run.skipped_invalid
            );
            if let Some(error) = &run.error {
                println!("  error: {}", error);
            }
        }
        None => println!("{} is already running", target),
    }

    Ok(())
}

/// Handles --activate / --deactivate
fn handle_set_active(
    config: Config,
    target: &str,
    active: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let harvester = Harvester::from_config(config)?;
    harvester.scheduler().set_active(target, active)?;

    println!(
        "✓ {} {}",
        target,
        if active { "activated" } else { "deactivated" }
    );

    Ok(())
}

/// Handles the main harvest operation
async fn handle_harvest(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(
        "Targets: {} ({} active), credentials: {}",
        config.targets.len(),
        config.targets.iter().filter(|t| t.active).count(),
        config.credentials.len()
    );

    let harvester = Harvester::from_config(config)?;
    match harvester.run().await {
        Ok(()) => {
            tracing::info!("Harvester stopped");
            Ok(())
        }
        Err(e) => {
            tracing::error!("Harvester failed: {}", e);
            Err(e.into())
        }
    }
}
