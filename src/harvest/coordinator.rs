//! Harvester coordinator - startup wiring and the long-running harvest
//!
//! Opens the store, brings the stored targets in line with the
//! configuration, restores recorded quota state, and hands everything to
//! the scheduler.

use crate::config::Config;
use crate::harvest::executor::{ExecutorOptions, FetchExecutor};
use crate::harvest::progress::{LogProgress, ProgressSink};
use crate::harvest::scheduler::Scheduler;
use crate::provider::{Credential, Provider, RedditProvider};
use crate::ratelimit::RateLimitTracker;
use crate::storage::{open_storage, SqliteStorage, Storage, StorageError, TargetRecord};
use crate::Result;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

/// Main harvester structure
pub struct Harvester {
    config: Arc<Config>,
    storage: Arc<Mutex<SqliteStorage>>,
    scheduler: Scheduler,
}

impl Harvester {
    /// Creates a harvester over the given provider
    ///
    /// # Arguments
    ///
    /// * `config` - Validated configuration
    /// * `provider` - Provider every target fetches from
    /// * `progress` - Receives progress of every run
    ///
    /// # Returns
    ///
    /// * `Ok(Harvester)` - Store opened and targets synchronised; nothing scheduled yet
    /// * `Err(HarvestError)` - Failed to open or synchronise the store
    pub fn new(
        config: Config,
        provider: Arc<dyn Provider>,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<Self> {
        let mut storage = open_storage(Path::new(&config.storage.database_path))?;

        let targets = sync_targets(&mut storage, &config)?;

        let tracker =
            RateLimitTracker::new(Duration::from_millis(config.rate_limit.safety_margin_ms));
        let restored = storage.load_rate_limits()?;
        debug!("Restoring {} recorded rate limit states", restored.len());
        tracker.restore(restored);

        let credentials: HashMap<String, Credential> = config
            .credentials
            .iter()
            .map(|entry| (entry.id.clone(), Credential::from_entry(entry)))
            .collect();

        let executor = FetchExecutor::new(provider, tracker, ExecutorOptions::from_config(&config));
        let storage = Arc::new(Mutex::new(storage));
        let scheduler = Scheduler::new(
            targets,
            credentials,
            executor,
            Arc::clone(&storage),
            progress,
        );

        Ok(Self {
            config: Arc::new(config),
            storage,
            scheduler,
        })
    }

    /// Creates a harvester talking to the configured provider API
    pub fn from_config(config: Config) -> Result<Self> {
        let provider = RedditProvider::new(&config.provider)?;
        Self::new(config, Arc::new(provider), Arc::new(LogProgress))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn storage(&self) -> Arc<Mutex<SqliteStorage>> {
        Arc::clone(&self.storage)
    }

    /// Runs every target on its schedule until Ctrl-C
    pub async fn run(&self) -> Result<()> {
        self.scheduler.start();
        info!("Harvesting {} targets; press Ctrl-C to stop", self.config.targets.len());

        tokio::signal::ctrl_c().await?;
        info!("Interrupt received, stopping");

        self.scheduler.stop().await;
        Ok(())
    }
}

/// Upserts every configured target and returns them with stored bookkeeping
///
/// Configuration fields come from the file; schedule bookkeeping and the
/// activation flag of existing rows come from the store.
pub fn sync_targets<S: Storage>(storage: &mut S, config: &Config) -> Result<Vec<TargetRecord>> {
    let mut targets = Vec::with_capacity(config.targets.len());

    for entry in &config.targets {
        storage.upsert_target_config(&TargetRecord::from_entry(entry))?;
        let stored = storage
            .get_target(&entry.name)?
            .ok_or_else(|| StorageError::TargetNotFound(entry.name.clone()))?;
        debug!(
            target_name = %stored.name,
            active = stored.active,
            next_run = ?stored.next_run,
            "Target synchronised"
        );
        targets.push(stored);
    }

    Ok(targets)
}

/// Runs the harvester with the configured provider until interrupted
///
/// # Example
///
/// ```no_run
/// use post_harvester::config::load_config;
/// use post_harvester::harvest::run_harvest;
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = load_config(Path::new("harvester.toml"))?;
/// run_harvest(config).await?;
/// # Ok(())
/// # }
/// ```
pub async fn run_harvest(config: Config) -> Result<()> {
    let harvester = Harvester::from_config(config)?;
    harvester.run().await
}
