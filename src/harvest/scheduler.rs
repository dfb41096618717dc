//! Per-target scheduler
//!
//! Each target owns a state slot and a timer task. A slot moves through
//! `Idle -> Due -> Running -> Idle`; claiming a slot for a run flips it to
//! `Running` under the slot's lock, which is what keeps runs of one target
//! from overlapping. Targets never wait on each other.

use crate::harvest::cancel::CancelToken;
use crate::harvest::executor::{FetchError, FetchExecutor, FetchResult};
use crate::harvest::merge::{MergeEngine, MergeReport};
use crate::harvest::progress::ProgressSink;
use crate::provider::Credential;
use crate::ratelimit::RateLimitTracker;
use crate::state::{RunOutcome, RunPhase};
use crate::storage::{RunRecord, SqliteStorage, Storage, TargetRecord};
use crate::{HarvestError, Result};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Scheduler-side view of one target
#[derive(Debug, Clone)]
pub struct TargetState {
    pub record: TargetRecord,
    pub phase: RunPhase,
    pub successes: u64,
    /// Partial and failed runs
    pub failures: u64,
    pub last_outcome: Option<RunOutcome>,
    pub last_error: Option<String>,
}

/// Result of a manual trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// The target was marked due and its timer woken
    Scheduled,
    /// A run is already in flight; nothing changed
    AlreadyRunning,
}

struct TargetSlot {
    state: Mutex<TargetState>,
    wake: Notify,
}

impl TargetSlot {
    fn new(record: TargetRecord) -> Self {
        Self {
            state: Mutex::new(TargetState {
                record,
                phase: RunPhase::Idle,
                successes: 0,
                failures: 0,
                last_outcome: None,
                last_error: None,
            }),
            wake: Notify::new(),
        }
    }

    // A panic mid-update leaves whole fields behind, never torn ones.
    fn lock(&self) -> MutexGuard<'_, TargetState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// How long until the timer should try to run; `None` means sleep until woken
    fn next_wakeup(&self, now: DateTime<Utc>) -> Option<Duration> {
        let state = self.lock();
        match state.phase {
            RunPhase::Running => None,
            RunPhase::Due => Some(Duration::ZERO),
            RunPhase::Idle if !state.record.active => None,
            RunPhase::Idle => Some(match state.record.next_run {
                Some(next) => (next - now).to_std().unwrap_or(Duration::ZERO),
                None => Duration::ZERO,
            }),
        }
    }

    /// Claims a scheduled run if the target is still due
    fn claim_scheduled(&self, now: DateTime<Utc>) -> Option<TargetRecord> {
        let mut state = self.lock();
        let due = match state.phase {
            RunPhase::Running => false,
            RunPhase::Due => state.record.active,
            RunPhase::Idle => state.record.is_due(now),
        };
        if !due {
            if state.phase == RunPhase::Due {
                state.phase = RunPhase::Idle;
            }
            return None;
        }
        state.phase = RunPhase::Running;
        Some(state.record.clone())
    }
}

/// Hands a claimed slot back to `Idle` if its run never finished
struct Claim {
    slot: Arc<TargetSlot>,
    finished: bool,
}

impl Drop for Claim {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        {
            let mut state = self.slot.lock();
            if state.phase == RunPhase::Running {
                state.phase = RunPhase::Idle;
            }
        }
        self.slot.wake.notify_one();
        warn!("Run ended without recording an outcome; target released");
    }
}

struct SchedulerInner {
    slots: BTreeMap<String, Arc<TargetSlot>>,
    credentials: HashMap<String, Credential>,
    executor: FetchExecutor,
    merger: MergeEngine<SqliteStorage>,
    storage: Arc<Mutex<SqliteStorage>>,
    progress: Arc<dyn ProgressSink>,
    shutdown: CancelToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Runs every target on its own timer
///
/// Cheap to clone; clones control the same targets.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    /// Creates a scheduler for the given targets
    ///
    /// # Arguments
    ///
    /// * `targets` - Target records with their stored bookkeeping
    /// * `credentials` - Credential sets by configured id
    /// * `executor` - Fetch executor shared by all targets
    /// * `storage` - Store for merged data and bookkeeping
    /// * `progress` - Receives progress of every run
    pub fn new(
        targets: Vec<TargetRecord>,
        credentials: HashMap<String, Credential>,
        executor: FetchExecutor,
        storage: Arc<Mutex<SqliteStorage>>,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        let slots = targets
            .into_iter()
            .map(|record| (record.name.clone(), Arc::new(TargetSlot::new(record))))
            .collect();

        Self {
            inner: Arc::new(SchedulerInner {
                slots,
                credentials,
                executor,
                merger: MergeEngine::new(Arc::clone(&storage)),
                storage,
                progress,
                shutdown: CancelToken::new(),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Spawns one timer task per target
    ///
    /// Calling this twice spawns a second set of timers; claims still keep
    /// runs from overlapping, but there is no reason to.
    pub fn start(&self) {
        let mut tasks = self.inner.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        for (name, slot) in &self.inner.slots {
            debug!(target_name = %name, "Starting target timer");
            let inner = Arc::clone(&self.inner);
            let slot = Arc::clone(slot);
            tasks.push(tokio::spawn(target_loop(inner, slot)));
        }
        info!("Scheduler started with {} targets", self.inner.slots.len());
    }

    /// Cancels in-flight runs and waits for every timer to exit
    ///
    /// Cancelled runs end as partial with whatever they had fetched.
    pub async fn stop(&self) {
        self.inner.shutdown.cancel();
        let tasks: Vec<_> = self
            .inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in tasks {
            if let Err(e) = task.await {
                error!("Target timer ended abnormally: {}", e);
            }
        }
        info!("Scheduler stopped");
    }

    /// Makes a target due now, regardless of its next run time
    ///
    /// The started timer picks the run up. Inactive targets are refused.
    pub fn trigger(&self, name: &str) -> Result<TriggerOutcome> {
        let slot = self.slot(name)?;
        {
            let mut state = slot.lock();
            if state.phase.is_running() {
                return Ok(TriggerOutcome::AlreadyRunning);
            }
            if !state.record.active {
                return Err(HarvestError::TargetInactive(name.to_string()));
            }
            state.phase = RunPhase::Due;
        }
        slot.wake.notify_one();
        info!(target_name = %name, "Manual trigger");
        Ok(TriggerOutcome::Scheduled)
    }

    /// Runs a target right now and waits for its run record
    ///
    /// Returns `Ok(None)` if a run of this target is already in flight. The
    /// run itself happens on its own task, so dropping the returned future
    /// stops the wait, not the run.
    pub async fn run_target(&self, name: &str) -> Result<Option<RunRecord>> {
        let slot = self.slot(name)?;
        let record = {
            let mut state = slot.lock();
            if state.phase.is_running() {
                return Ok(None);
            }
            if !state.record.active {
                return Err(HarvestError::TargetInactive(name.to_string()));
            }
            state.phase = RunPhase::Running;
            state.record.clone()
        };

        let inner = Arc::clone(&self.inner);
        let run = tokio::spawn(async move {
            let mut claim = Claim {
                slot,
                finished: false,
            };
            let run = inner.execute(&claim.slot, record).await;
            claim.finished = true;
            run
        });

        match run.await {
            Ok(run) => Ok(Some(run)),
            Err(e) => {
                error!(target_name = %name, "Run ended abnormally: {}", e);
                Err(HarvestError::RunAborted(name.to_string(), e.to_string()))
            }
        }
    }

    /// Soft-enables or soft-disables a target
    ///
    /// An in-flight run is allowed to finish.
    pub fn set_active(&self, name: &str, active: bool) -> Result<()> {
        let slot = self.slot(name)?;
        self.inner
            .storage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .set_target_active(name, active)?;

        {
            let mut state = slot.lock();
            state.record.active = active;
            if !active && state.phase == RunPhase::Due {
                state.phase = RunPhase::Idle;
            }
        }
        slot.wake.notify_one();
        info!(target_name = %name, active, "Target activation changed");
        Ok(())
    }

    /// Current state of one target
    pub fn state(&self, name: &str) -> Option<TargetState> {
        self.inner.slots.get(name).map(|slot| slot.lock().clone())
    }

    /// Current state of every target, by name
    pub fn states(&self) -> Vec<TargetState> {
        self.inner
            .slots
            .values()
            .map(|slot| slot.lock().clone())
            .collect()
    }

    /// Quota state shared by every target
    pub fn tracker(&self) -> &RateLimitTracker {
        self.inner.executor.tracker()
    }

    fn slot(&self, name: &str) -> Result<Arc<TargetSlot>> {
        self.inner
            .slots
            .get(name)
            .cloned()
            .ok_or_else(|| HarvestError::UnknownTarget(name.to_string()))
    }
}

async fn target_loop(inner: Arc<SchedulerInner>, slot: Arc<TargetSlot>) {
    loop {
        if inner.shutdown.is_cancelled() {
            break;
        }

        match slot.next_wakeup(Utc::now()) {
            Some(delay) if delay.is_zero() => {
                if let Some(record) = slot.claim_scheduled(Utc::now()) {
                    inner.execute(&slot, record).await;
                }
            }
            Some(delay) => {
                tokio::select! {
                    _ = inner.shutdown.cancelled() => break,
                    _ = slot.wake.notified() => {}
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            None => {
                tokio::select! {
                    _ = inner.shutdown.cancelled() => break,
                    _ = slot.wake.notified() => {}
                }
            }
        }
    }
}

impl SchedulerInner {
    /// Runs a claimed target to completion and records the outcome
    async fn execute(&self, slot: &TargetSlot, record: TargetRecord) -> RunRecord {
        let started_at = Utc::now();
        info!(target_name = %record.name, "Run started");

        let credential = self.credentials.get(&record.credential);
        let (fetch, merge) = match credential {
            Some(credential) => {
                let fetch = self
                    .executor
                    .run(&record, credential, &self.shutdown, self.progress.as_ref())
                    .await;
                let merge = self.merger.merge(&fetch.items, &fetch.children_by_item);
                (fetch, merge)
            }
            None => {
                warn!(target_name = %record.name, credential = %record.credential, "Unknown credential");
                let fetch = FetchResult {
                    partial: true,
                    ..Default::default()
                };
                (fetch, MergeReport::default())
            }
        };

        let finished_at = Utc::now();
        let outcome = decide_outcome(&fetch, &merge);
        let error = if let Some(e) = &fetch.error {
            Some(e.to_string())
        } else if credential.is_none() {
            Some(HarvestError::UnknownCredential(record.credential.clone()).to_string())
        } else if outcome == RunOutcome::Failed {
            Some("most records failed to store".to_string())
        } else {
            None
        };

        let auth_failed = fetch.error.as_ref().is_some_and(FetchError::is_auth);
        let needs_attention = if auth_failed {
            true
        } else if outcome == RunOutcome::Success {
            false
        } else {
            record.needs_attention
        };
        if auth_failed {
            error!(
                target_name = %record.name,
                credential = %record.credential,
                "Credential rejected, target needs operator attention"
            );
        }

        let next_run = next_run_after(finished_at, record.interval());

        let mut run = RunRecord {
            id: 0,
            target: record.name.clone(),
            started_at,
            finished_at,
            outcome,
            items: merge.items,
            children: merge.children,
            skipped_invalid: fetch.skipped_invalid,
            error,
        };

        self.persist(&mut run, &record, next_run, needs_attention);

        {
            let mut state = slot.lock();
            state.record.last_run = Some(finished_at);
            state.record.next_run = Some(next_run);
            state.record.needs_attention = needs_attention;
            state.phase = RunPhase::Idle;
            state.last_outcome = Some(outcome);
            state.last_error = run.error.clone();
            if outcome.is_failure() {
                state.failures += 1;
            } else {
                state.successes += 1;
            }
        }
        slot.wake.notify_one();

        self.progress.run_finished(&run);
        run
    }

    // Bookkeeping failures are logged; they must not take the scheduler down.
    fn persist(
        &self,
        run: &mut RunRecord,
        record: &TargetRecord,
        next_run: DateTime<Utc>,
        needs_attention: bool,
    ) {
        let mut storage = self.storage.lock().unwrap_or_else(PoisonError::into_inner);

        match storage.insert_run(run) {
            Ok(id) => run.id = id,
            Err(e) => error!(target_name = %record.name, "Failed to record run: {}", e),
        }

        if let Err(e) =
            storage.record_target_schedule(&record.name, run.finished_at, next_run, needs_attention)
        {
            error!(target_name = %record.name, "Failed to record schedule: {}", e);
        }

        if let Some(credential) = self.credentials.get(&record.credential) {
            if let Some(state) = self.executor.tracker().get(&credential.key) {
                if let Err(e) = storage.save_rate_limit(&credential.key, &state) {
                    error!(credential = %credential.id, "Failed to save rate limit: {}", e);
                }
            }
        }
    }
}

/// When a target that finished at `finished_at` is due again
///
/// An interval past what the calendar can represent falls back to a year.
fn next_run_after(finished_at: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(interval)
        .ok()
        .and_then(|step| finished_at.checked_add_signed(step))
        .or_else(|| finished_at.checked_add_signed(chrono::Duration::days(365)))
        .unwrap_or(finished_at)
}

/// Classifies a finished run
///
/// A fetch error leaves a run partial when something was gathered and failed
/// when nothing was; a cancelled run is always partial. Losing most records
/// at the store fails the run regardless.
pub fn decide_outcome(fetch: &FetchResult, merge: &MergeReport) -> RunOutcome {
    if merge.is_majority_failure() {
        return RunOutcome::Failed;
    }
    match &fetch.error {
        None if fetch.partial => RunOutcome::Failed,
        None => RunOutcome::Success,
        Some(FetchError::Cancelled) => RunOutcome::Partial,
        Some(_) if fetch.has_data() => RunOutcome::Partial,
        Some(_) => RunOutcome::Failed,
    }
}
