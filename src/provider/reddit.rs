//! HTTP provider for the Reddit API
//!
//! This module handles all HTTP traffic for the harvester, including:
//! - Building the HTTP client with the configured user agent and timeouts
//! - Password-grant OAuth tokens, cached per configured credential
//! - Listing and comment requests
//! - Reading quota headers off every response
//! - Classifying failures into [`ProviderError`] variants

use super::{
    ChildrenRequest, Credential, ItemPage, Listing, ListingRequest, Provider, ProviderError,
    ProviderResponse, ProviderResult, RateLimitReport, RawChild, RawItem, MAX_PAGE_SIZE,
};
use crate::config::ProviderConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{redirect::Policy, Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Tokens are refreshed this long before the provider says they expire
const TOKEN_EXPIRY_SLACK: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<u64>,
    error: Option<String>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

/// Provider backed by the Reddit OAuth API
pub struct RedditProvider {
    client: Client,
    auth_url: String,
    api_url: String,
    /// Tokens by credential id; aliases of one account carry their own secrets
    tokens: Mutex<HashMap<String, CachedToken>>,
}

impl RedditProvider {
    /// Builds a provider with its own HTTP client
    ///
    /// # Arguments
    ///
    /// * `config` - Provider endpoints, user agent and timeout
    ///
    /// # Returns
    ///
    /// * `Ok(RedditProvider)` - Ready to use; no request is made yet
    /// * `Err(reqwest::Error)` - The HTTP client could not be built
    pub fn new(config: &ProviderConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_http_client(config)?,
            auth_url: config.auth_url.clone(),
            api_url: config.api_url.trim_end_matches('/').to_string(),
            tokens: Mutex::new(HashMap::new()),
        })
    }

    async fn access_token(&self, credential: &Credential) -> ProviderResult<String> {
        let mut tokens = self.tokens.lock().await;
        if let Some(token) = tokens.get(&credential.id) {
            if token.expires_at > Instant::now() {
                return Ok(token.access_token.clone());
            }
        }

        let token = self.request_token(credential).await?;
        let access_token = token.access_token.clone();
        tokens.insert(credential.id.clone(), token);
        Ok(access_token)
    }

    async fn forget_token(&self, credential: &Credential) {
        self.tokens.lock().await.remove(&credential.id);
    }

    async fn request_token(&self, credential: &Credential) -> ProviderResult<CachedToken> {
        debug!(credential = %credential.id, "Requesting access token");

        let response = self
            .client
            .post(&self.auth_url)
            .basic_auth(&credential.client_id, Some(&credential.client_secret))
            .form(&[
                ("grant_type", "password"),
                ("username", credential.username.as_str()),
                ("password", credential.password.as_str()),
            ])
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ProviderError::Auth(format!(
                "token endpoint returned {} for {}",
                status, credential.id
            )));
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::QuotaExceeded {
                reset_after: quota_reset_after(response.headers()),
            });
        }
        if status.is_server_error() {
            return Err(ProviderError::Transient(format!(
                "token endpoint returned {}",
                status
            )));
        }
        if !status.is_success() {
            return Err(ProviderError::Auth(format!(
                "token endpoint returned {} for {}",
                status, credential.id
            )));
        }

        let body: TokenResponse = response.json().await.map_err(classify_transport)?;

        // Bad passwords come back as 200 with an error field.
        if let Some(error) = body.error {
            return Err(ProviderError::Auth(format!("{} ({})", error, credential.id)));
        }

        let access_token = body
            .access_token
            .ok_or_else(|| ProviderError::Malformed("token response without access_token".into()))?;
        let lifetime = Duration::from_secs(body.expires_in.unwrap_or(3600));

        Ok(CachedToken {
            access_token,
            expires_at: Instant::now() + lifetime.saturating_sub(TOKEN_EXPIRY_SLACK),
        })
    }

    async fn send_authorized(
        &self,
        credential: &Credential,
        url: &str,
        query: &[(&str, String)],
    ) -> ProviderResult<Response> {
        let token = self.access_token(credential).await?;
        self.client
            .get(url)
            .bearer_auth(token)
            .query(query)
            .send()
            .await
            .map_err(classify_transport)
    }

    /// Issues an authorized GET and decodes the JSON body
    ///
    /// A rejected access token is dropped and the call repeated once with a
    /// fresh token before it counts as an auth failure.
    async fn get_json(
        &self,
        credential: &Credential,
        path: &str,
        query: &[(&str, String)],
    ) -> ProviderResult<ProviderResponse<Value>> {
        let url = format!("{}{}", self.api_url, path);

        let mut response = self.send_authorized(credential, &url, query).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            debug!(credential = %credential.id, "Access token rejected, re-authenticating");
            self.forget_token(credential).await;
            response = self.send_authorized(credential, &url, query).await?;
        }

        let rate_limit = parse_rate_limit(response.headers(), Utc::now());
        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, &url, response.headers()));
        }

        let body = response.json::<Value>().await.map_err(classify_transport)?;
        Ok(ProviderResponse { body, rate_limit })
    }
}

#[async_trait]
impl Provider for RedditProvider {
    async fn list_items(
        &self,
        credential: &Credential,
        request: &ListingRequest,
    ) -> ProviderResult<ProviderResponse<ItemPage>> {
        let path = format!("/r/{}/{}", request.target, request.listing.to_db_string());

        let mut query = vec![
            ("limit", request.limit.clamp(1, MAX_PAGE_SIZE).to_string()),
            ("raw_json", "1".to_string()),
        ];
        if request.listing == Listing::Top {
            query.push(("t", request.window.to_db_string().to_string()));
        }
        if let Some(after) = &request.after {
            query.push(("after", after.clone()));
        }

        let response = self.get_json(credential, &path, &query).await?;
        let page = parse_item_page(&response.body)?;

        Ok(ProviderResponse {
            body: page,
            rate_limit: response.rate_limit,
        })
    }

    async fn list_children(
        &self,
        credential: &Credential,
        request: &ChildrenRequest,
    ) -> ProviderResult<ProviderResponse<Vec<RawChild>>> {
        let path = format!("/comments/{}", request.item_id);
        let query = vec![
            ("depth", request.max_depth.saturating_add(1).to_string()),
            ("limit", request.limit.to_string()),
            ("sort", "top".to_string()),
            ("raw_json", "1".to_string()),
        ];

        let response = self.get_json(credential, &path, &query).await?;
        let children = parse_children(&response.body, request.max_depth, request.limit as usize)?;

        Ok(ProviderResponse {
            body: children,
            rate_limit: response.rate_limit,
        })
    }
}

/// Builds an HTTP client with the configured user agent
///
/// Redirects are not followed: the API answers an unknown target with a
/// redirect to its search page.
pub(crate) fn build_http_client(config: &ProviderConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(config.request_timeout())
        .connect_timeout(Duration::from_secs(10))
        .redirect(Policy::none())
        .gzip(true)
        .build()
}

fn classify_transport(error: reqwest::Error) -> ProviderError {
    if error.is_decode() {
        ProviderError::Malformed(error.to_string())
    } else {
        ProviderError::Transient(error.to_string())
    }
}

fn classify_status(status: StatusCode, url: &str, headers: &HeaderMap) -> ProviderError {
    match status.as_u16() {
        401 => ProviderError::Auth(format!("{} rejected the access token", url)),
        429 => ProviderError::QuotaExceeded {
            reset_after: quota_reset_after(headers),
        },
        408 => ProviderError::Transient(format!("{} timed out", url)),
        403 => ProviderError::InvalidTarget(format!("{} is private or banned", url)),
        404 => ProviderError::InvalidTarget(format!("{} does not exist", url)),
        300..=399 => ProviderError::InvalidTarget(format!(
            "{} redirected ({}), target likely missing",
            url, status
        )),
        500..=599 => ProviderError::Transient(format!("{} returned {}", url, status)),
        _ => ProviderError::InvalidTarget(format!("{} returned {}", url, status)),
    }
}

fn header_f64(headers: &HeaderMap, name: &str) -> Option<f64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

/// Reads the provider's quota headers, if all present
///
/// Remaining is sent as a float (e.g. `"598.0"`) and reset as seconds from now.
fn parse_rate_limit(headers: &HeaderMap, now: DateTime<Utc>) -> Option<RateLimitReport> {
    let remaining = header_f64(headers, "x-ratelimit-remaining")?;
    let reset_secs = header_f64(headers, "x-ratelimit-reset")?;
    let used = header_f64(headers, "x-ratelimit-used").unwrap_or(0.0);

    let reset_at = now + chrono::Duration::milliseconds((reset_secs.max(0.0) * 1000.0) as i64);
    Some(RateLimitReport {
        remaining: remaining.floor() as i64,
        reset_at,
        limit_total: (remaining.max(0.0) + used.max(0.0)).round() as u32,
    })
}

fn quota_reset_after(headers: &HeaderMap) -> Option<Duration> {
    header_f64(headers, "x-ratelimit-reset")
        .or_else(|| header_f64(headers, RETRY_AFTER.as_str()))
        .map(|secs| Duration::from_secs_f64(secs.max(0.0)))
}

fn parse_item_page(body: &Value) -> ProviderResult<ItemPage> {
    let data = body
        .get("data")
        .ok_or_else(|| ProviderError::Malformed("listing without data".into()))?;
    let things = data
        .get("children")
        .and_then(Value::as_array)
        .ok_or_else(|| ProviderError::Malformed("listing without children".into()))?;

    let mut items = Vec::with_capacity(things.len());
    for thing in things {
        if thing.get("kind").and_then(Value::as_str) != Some("t3") {
            continue;
        }
        let Some(raw) = thing.get("data") else {
            continue;
        };
        match serde_json::from_value::<RawItem>(raw.clone()) {
            Ok(item) => items.push(item),
            Err(e) => {
                warn!(error = %e, "Undecodable item, counting as invalid");
                items.push(RawItem::default());
            }
        }
    }

    let after = data
        .get("after")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    Ok(ItemPage { items, after })
}

/// Flattens the comment tree of a `/comments/{id}` response
///
/// The body is `[item_listing, comment_listing]`. Children come out in
/// depth-first order so a reply always follows its parent. "more" stubs are
/// not expanded.
fn parse_children(body: &Value, max_depth: u32, limit: usize) -> ProviderResult<Vec<RawChild>> {
    let listing = body
        .as_array()
        .and_then(|parts| parts.get(1))
        .ok_or_else(|| ProviderError::Malformed("comment response is not a two-part array".into()))?;

    let mut children = Vec::new();
    collect_children(listing, 0, max_depth, limit, &mut children);
    Ok(children)
}

fn collect_children(
    listing: &Value,
    depth: u32,
    max_depth: u32,
    limit: usize,
    out: &mut Vec<RawChild>,
) {
    let Some(things) = listing.pointer("/data/children").and_then(Value::as_array) else {
        return;
    };

    for thing in things {
        if out.len() >= limit {
            return;
        }
        if thing.get("kind").and_then(Value::as_str) != Some("t1") {
            continue;
        }
        let Some(raw) = thing.get("data") else {
            continue;
        };

        let mut child = serde_json::from_value::<RawChild>(raw.clone()).unwrap_or_else(|e| {
            warn!(error = %e, "Undecodable child, counting as invalid");
            RawChild::default()
        });
        child.depth.get_or_insert(depth);
        out.push(child);

        if depth < max_depth {
            if let Some(replies) = raw.get("replies") {
                collect_children(replies, depth + 1, max_depth, limit, out);
            }
        }
    }
}
