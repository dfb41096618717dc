//! Fetch executor
//!
//! Performs one bounded fetch for one target: pages of items, then the
//! children of each item. Every provider call goes through the same gate:
//!
//! 1. Wait while the credential's quota is below the threshold (cancellable,
//!    each sleep capped at the configured maximum, then re-checked)
//! 2. Pace successive calls within a run
//! 3. Retry transient failures with exponential backoff
//! 4. Feed the response's quota headers back into the tracker
//!
//! A quota refusal from the provider is recorded as an empty quota and the
//! call goes back through the gate; it is never surfaced to the caller.

use crate::config::Config;
use crate::harvest::cancel::CancelToken;
use crate::harvest::progress::ProgressSink;
use crate::harvest::translate::{translate_child, translate_item};
use crate::provider::{
    ChildrenRequest, Credential, ListingRequest, Provider, ProviderError, ProviderResponse,
    ProviderResult, MAX_PAGE_SIZE,
};
use crate::ratelimit::RateLimitTracker;
use crate::storage::{ChildRecord, ItemRecord, TargetRecord};
use backon::{ExponentialBuilder, Retryable};
use chrono::Utc;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Shortest wait assumed after a quota refusal without reset information
const MIN_QUOTA_BACKOFF: Duration = Duration::from_secs(1);

/// Why a fetch stopped early
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Run cancelled")]
    Cancelled,
}

impl FetchError {
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Provider(e) if e.is_auth())
    }
}

/// Everything one run gathered
#[derive(Debug, Default)]
pub struct FetchResult {
    pub items: Vec<ItemRecord>,
    pub children_by_item: BTreeMap<String, Vec<ChildRecord>>,
    /// The run stopped before finishing; `error` says why
    pub partial: bool,
    pub error: Option<FetchError>,
    /// Provider records dropped during translation
    pub skipped_invalid: u32,
    /// Provider calls that returned a response
    pub calls: u32,
}

impl FetchResult {
    pub fn has_data(&self) -> bool {
        !self.items.is_empty() || self.children_by_item.values().any(|c| !c.is_empty())
    }

    pub fn child_count(&self) -> usize {
        self.children_by_item.values().map(Vec::len).sum()
    }

    fn stop(&mut self, error: FetchError) {
        self.partial = true;
        self.error = Some(error);
    }
}

/// Gate and retry settings
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Calls are held back while remaining quota is at or below this
    pub min_remaining: u32,
    pub max_single_sleep: Duration,
    pub call_pacing: Duration,
    /// Total attempts per call, including the first
    pub max_attempts: u32,
    pub initial_retry_delay: Duration,
    pub max_retry_delay: Duration,
}

impl ExecutorOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            min_remaining: config.rate_limit.min_remaining,
            max_single_sleep: Duration::from_millis(config.rate_limit.max_single_sleep_ms),
            call_pacing: Duration::from_millis(config.rate_limit.call_pacing_ms),
            max_attempts: config.retry.max_attempts,
            initial_retry_delay: Duration::from_millis(config.retry.initial_delay_ms),
            max_retry_delay: Duration::from_millis(config.retry.max_delay_ms),
        }
    }
}

/// Runs bounded fetches against a provider
#[derive(Clone)]
pub struct FetchExecutor {
    provider: Arc<dyn Provider>,
    tracker: RateLimitTracker,
    options: ExecutorOptions,
}

impl FetchExecutor {
    pub fn new(provider: Arc<dyn Provider>, tracker: RateLimitTracker, options: ExecutorOptions) -> Self {
        Self {
            provider,
            tracker,
            options,
        }
    }

    pub fn tracker(&self) -> &RateLimitTracker {
        &self.tracker
    }

    /// Fetches items (and optionally children) for one target
    ///
    /// Never fails as a whole: whatever was gathered before an error or a
    /// cancellation is returned along with the error.
    ///
    /// # Arguments
    ///
    /// * `target` - Target to fetch; only its configuration fields are read
    /// * `credential` - Credential set the calls are made with
    /// * `cancel` - Aborts waits and in-flight calls
    /// * `progress` - Receives progress increments
    pub async fn run(
        &self,
        target: &TargetRecord,
        credential: &Credential,
        cancel: &CancelToken,
        progress: &dyn ProgressSink,
    ) -> FetchResult {
        let mut result = FetchResult::default();
        let fetched_at = Utc::now();

        let limit = target.max_items_per_run;
        let mut seen = 0u32;
        let mut after: Option<String> = None;

        while seen < limit {
            let request = ListingRequest {
                target: target.name.clone(),
                listing: target.listing,
                window: target.time_window,
                limit: (limit - seen).min(MAX_PAGE_SIZE),
                after: after.take(),
            };

            let page = match self
                .call(&target.name, credential, cancel, progress, &mut result, || {
                    self.provider.list_items(credential, &request)
                })
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    result.stop(e);
                    return result;
                }
            };

            let page_len = page.items.len() as u32;
            for raw in page.items.into_iter().take((limit - seen) as usize) {
                match translate_item(raw, &target.name, fetched_at) {
                    Ok(item) => result.items.push(item),
                    Err(e) => {
                        debug!(target_name = %target.name, error = %e, "Skipping item");
                        result.skipped_invalid += 1;
                    }
                }
            }
            seen = seen.saturating_add(page_len).min(limit);
            progress.items_fetched(&target.name, seen, limit);

            match page.after {
                Some(cursor) if page_len > 0 => after = Some(cursor),
                _ => break,
            }
        }

        if !target.fetch_children {
            return result;
        }

        let item_ids: Vec<String> = result.items.iter().map(|item| item.id.clone()).collect();
        let total = item_ids.len() as u32;

        for (done, item_id) in item_ids.into_iter().enumerate() {
            let request = ChildrenRequest {
                item_id: item_id.clone(),
                limit: target.max_children_per_item,
                max_depth: target.max_child_depth,
            };

            let raws = match self
                .call(&target.name, credential, cancel, progress, &mut result, || {
                    self.provider.list_children(credential, &request)
                })
                .await
            {
                Ok(raws) => raws,
                // The item vanished or its thread is unreadable; the rest of the run is fine.
                Err(FetchError::Provider(
                    e @ (ProviderError::InvalidTarget(_) | ProviderError::Malformed(_)),
                )) => {
                    warn!(target_name = %target.name, item = %item_id, error = %e, "Skipping children");
                    result.skipped_invalid += 1;
                    continue;
                }
                Err(e) => {
                    result.stop(e);
                    return result;
                }
            };

            let mut children = Vec::with_capacity(raws.len());
            for raw in raws.into_iter().take(target.max_children_per_item as usize) {
                match translate_child(raw, &item_id, &target.name, fetched_at) {
                    Ok(child) => children.push(child),
                    Err(e) => {
                        debug!(target_name = %target.name, item = %item_id, error = %e, "Skipping child");
                        result.skipped_invalid += 1;
                    }
                }
            }

            progress.children_fetched(
                &target.name,
                &item_id,
                children.len() as u32,
                done as u32 + 1,
                total,
            );
            result.children_by_item.insert(item_id, children);
        }

        result
    }

    /// Issues one gated, paced, retried provider call
    async fn call<T, F, Fut>(
        &self,
        target: &str,
        credential: &Credential,
        cancel: &CancelToken,
        progress: &dyn ProgressSink,
        result: &mut FetchResult,
        mut op: F,
    ) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProviderResult<ProviderResponse<T>>>,
    {
        if result.calls > 0 && !cancel.sleep(self.options.call_pacing).await {
            return Err(FetchError::Cancelled);
        }

        loop {
            self.wait_for_quota(target, credential, cancel, progress).await?;

            let attempt = (&mut op)
                .retry(self.backoff())
                .when(ProviderError::is_retryable)
                .notify(|e: &ProviderError, delay: Duration| {
                    warn!(
                        target_name = %target,
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Provider call failed, retrying"
                    );
                });

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                outcome = attempt => outcome,
            };

            match outcome {
                Ok(response) => {
                    result.calls += 1;
                    if let Some(report) = response.rate_limit {
                        self.tracker.record(
                            &credential.key,
                            report.remaining,
                            report.reset_at,
                            report.limit_total,
                        );
                    }
                    return Ok(response.body);
                }
                Err(ProviderError::QuotaExceeded { reset_after }) => {
                    let reset_after = reset_after.unwrap_or(MIN_QUOTA_BACKOFF).max(MIN_QUOTA_BACKOFF);
                    let now = Utc::now();
                    let reset_at = now
                        + chrono::Duration::from_std(reset_after)
                            .unwrap_or_else(|_| chrono::Duration::seconds(1));
                    let limit_total = self
                        .tracker
                        .get(&credential.key)
                        .map_or(0, |state| state.limit_total);

                    warn!(
                        target_name = %target,
                        credential = %credential.id,
                        reset_in_ms = reset_after.as_millis() as u64,
                        "Provider refused call for quota, deferring"
                    );
                    self.tracker.record(&credential.key, 0, reset_at, limit_total);
                }
                Err(e) => return Err(FetchError::Provider(e)),
            }
        }
    }

    async fn wait_for_quota(
        &self,
        target: &str,
        credential: &Credential,
        cancel: &CancelToken,
        progress: &dyn ProgressSink,
    ) -> Result<(), FetchError> {
        loop {
            let wait = self
                .tracker
                .wait_duration(&credential.key, self.options.min_remaining);
            if wait.is_zero() {
                return Ok(());
            }

            let nap = wait.min(self.options.max_single_sleep);
            progress.waiting_for_quota(target, wait);
            debug!(
                target_name = %target,
                credential = %credential.id,
                nap_ms = nap.as_millis() as u64,
                "Quota low, holding calls"
            );
            if !cancel.sleep(nap).await {
                return Err(FetchError::Cancelled);
            }
        }
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.options.initial_retry_delay)
            .with_max_delay(self.options.max_retry_delay)
            .with_max_times(self.options.max_attempts.saturating_sub(1) as usize)
            .with_jitter()
    }
}
