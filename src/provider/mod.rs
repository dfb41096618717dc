//! Content provider interface
//!
//! The harvester talks to the platform only through the [`Provider`] trait.
//! [`RedditProvider`] is the HTTP implementation; tests drive the executor
//! with scripted providers instead.

mod reddit;
mod types;

pub use reddit::RedditProvider;
pub use types::{
    ChildrenRequest, ItemPage, Listing, ListingRequest, ProviderResponse, RateLimitReport,
    RawChild, RawItem, TimeWindow,
};

use crate::config::CredentialEntry;
use crate::ratelimit::credential_fingerprint;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Largest page the provider serves per listing call
pub const MAX_PAGE_SIZE: u32 = 100;

/// Errors a provider call can end with
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Network trouble or a 5xx; worth retrying
    #[error("Transient provider error: {0}")]
    Transient(String),

    /// The provider refused the call for quota reasons
    #[error("Quota exceeded (resets in {reset_after:?})")]
    QuotaExceeded { reset_after: Option<Duration> },

    /// Credentials rejected or revoked
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Target does not exist, is private or banned
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    /// Response could not be decoded
    #[error("Malformed provider response: {0}")]
    Malformed(String),
}

impl ProviderError {
    /// Only transient failures go through backoff; quota is handled by the gate
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}

/// Result type for provider calls
pub type ProviderResult<T> = Result<T, ProviderError>;

/// One API credential set, resolved from configuration
#[derive(Clone)]
pub struct Credential {
    /// Configured id, used in logs and to cache the access token
    pub id: String,
    /// Quota key shared by every alias of the same account
    pub key: String,
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
}

impl Credential {
    pub fn from_entry(entry: &CredentialEntry) -> Self {
        Self {
            id: entry.id.clone(),
            key: credential_fingerprint(&entry.client_id, &entry.username),
            client_id: entry.client_id.clone(),
            client_secret: entry.client_secret.clone(),
            username: entry.username.clone(),
            password: entry.password.clone(),
        }
    }
}

// Secrets stay out of logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// A source of items and children
#[async_trait]
pub trait Provider: Send + Sync {
    /// Fetches one page of a target's listing
    async fn list_items(
        &self,
        credential: &Credential,
        request: &ListingRequest,
    ) -> ProviderResult<ProviderResponse<ItemPage>>;

    /// Fetches the children of one item, flattened in tree order
    async fn list_children(
        &self,
        credential: &Credential,
        request: &ChildrenRequest,
    ) -> ProviderResult<ProviderResponse<Vec<RawChild>>>;
}
