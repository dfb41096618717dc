//! Scripted provider and fixtures shared by the harvest unit tests

use crate::config::CredentialEntry;
use crate::provider::{
    ChildrenRequest, Credential, ItemPage, ListingRequest, Provider, ProviderError,
    ProviderResponse, ProviderResult, RateLimitReport, RawChild, RawItem,
};
use crate::storage::TargetRecord;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

type PageReply = ProviderResult<ProviderResponse<ItemPage>>;
type ChildrenReply = ProviderResult<ProviderResponse<Vec<RawChild>>>;

/// Provider that replays queued replies in order
///
/// An exhausted page queue answers with an empty page; an item without
/// queued children answers with no children.
#[derive(Default)]
pub(crate) struct ScriptedProvider {
    pages: Mutex<VecDeque<PageReply>>,
    children: Mutex<HashMap<String, VecDeque<ChildrenReply>>>,
    calls: Mutex<Vec<(Instant, String)>>,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call takes at least this long
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn push_page(&self, reply: PageReply) {
        self.pages.lock().unwrap().push_back(reply);
    }

    pub fn push_children(&self, item_id: &str, reply: ChildrenReply) {
        self.children
            .lock()
            .unwrap()
            .entry(item_id.to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn call_log(&self) -> Vec<(Instant, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self, label: String) {
        self.calls.lock().unwrap().push((Instant::now(), label));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn list_items(
        &self,
        _credential: &Credential,
        request: &ListingRequest,
    ) -> ProviderResult<ProviderResponse<ItemPage>> {
        self.enter(format!("items:{}", request.target)).await;
        let reply = self
            .pages
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(plain(ItemPage::default())));
        self.leave();
        reply
    }

    async fn list_children(
        &self,
        _credential: &Credential,
        request: &ChildrenRequest,
    ) -> ProviderResult<ProviderResponse<Vec<RawChild>>> {
        self.enter(format!("children:{}", request.item_id)).await;
        let reply = self
            .children
            .lock()
            .unwrap()
            .get_mut(&request.item_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Ok(plain(Vec::new())));
        self.leave();
        reply
    }
}

pub(crate) fn plain<T>(body: T) -> ProviderResponse<T> {
    ProviderResponse {
        body,
        rate_limit: None,
    }
}

pub(crate) fn limited<T>(body: T, remaining: i64, reset_in: Duration) -> ProviderResponse<T> {
    ProviderResponse {
        body,
        rate_limit: Some(RateLimitReport {
            remaining,
            reset_at: Utc::now() + chrono::Duration::from_std(reset_in).unwrap(),
            limit_total: 600,
        }),
    }
}

pub(crate) fn page(items: Vec<RawItem>, after: Option<&str>) -> ItemPage {
    ItemPage {
        items,
        after: after.map(str::to_string),
    }
}

pub(crate) fn raw_item(id: &str, score: i64) -> RawItem {
    RawItem {
        id: Some(id.to_string()),
        title: Some(format!("Post {}", id)),
        author: Some("poster".to_string()),
        score: Some(score),
        upvote_ratio: Some(0.5),
        num_comments: Some(1),
        created_utc: Some(1_700_000_000.0),
        ..Default::default()
    }
}

pub(crate) fn raw_child(id: &str, item_id: &str, parent: Option<&str>) -> RawChild {
    RawChild {
        id: Some(id.to_string()),
        parent_id: Some(match parent {
            Some(parent) => format!("t1_{}", parent),
            None => format!("t3_{}", item_id),
        }),
        body: Some(format!("comment {}", id)),
        author: Some("commenter".to_string()),
        score: Some(1),
        depth: Some(if parent.is_some() { 1 } else { 0 }),
        created_utc: Some(1_700_000_500.0),
        ..Default::default()
    }
}

pub(crate) fn transient() -> ProviderError {
    ProviderError::Transient("503 Service Unavailable".to_string())
}

pub(crate) fn credential() -> Credential {
    Credential::from_entry(&CredentialEntry {
        id: "main".to_string(),
        client_id: "client".to_string(),
        client_secret: "secret".to_string(),
        username: "bot".to_string(),
        password: "pw".to_string(),
    })
}

pub(crate) fn target(name: &str, max_items: u32) -> TargetRecord {
    TargetRecord {
        name: name.to_string(),
        credential: "main".to_string(),
        listing: Default::default(),
        time_window: Default::default(),
        interval_secs: 3600,
        max_items_per_run: max_items,
        fetch_children: true,
        max_children_per_item: 10,
        max_child_depth: 0,
        active: true,
        last_run: None,
        next_run: None,
        needs_attention: false,
    }
}
