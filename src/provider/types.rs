//! Provider-facing data types
//!
//! Raw records mirror the provider's JSON closely and keep every field
//! optional; turning them into stored records is the harvest module's job.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fmt;

/// Which listing of a target to poll
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Listing {
    /// Highest ranked within a time window
    #[default]
    Top,

    /// Newest first; the time window is ignored
    New,
}

impl Listing {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Top => "top",
            Self::New => "new",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "top" => Some(Self::Top),
            "new" => Some(Self::New),
            _ => None,
        }
    }
}

impl fmt::Display for Listing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

/// Ranking window for the `top` listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeWindow {
    Hour,
    #[default]
    Day,
    Week,
    Month,
    Year,
    All,
}

impl TimeWindow {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
            Self::Year => "year",
            Self::All => "all",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "hour" => Some(Self::Hour),
            "day" => Some(Self::Day),
            "week" => Some(Self::Week),
            "month" => Some(Self::Month),
            "year" => Some(Self::Year),
            "all" => Some(Self::All),
            _ => None,
        }
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

/// One page request against a target's listing
#[derive(Debug, Clone, PartialEq)]
pub struct ListingRequest {
    pub target: String,
    pub listing: Listing,
    pub window: TimeWindow,
    /// Page size; the provider caps this at [`MAX_PAGE_SIZE`](super::MAX_PAGE_SIZE)
    pub limit: u32,
    /// Cursor returned by the previous page
    pub after: Option<String>,
}

/// Request for the children of one item
#[derive(Debug, Clone, PartialEq)]
pub struct ChildrenRequest {
    pub item_id: String,
    pub limit: u32,
    /// Deepest reply level to return; 0 means top-level only
    pub max_depth: u32,
}

/// One page of items plus the cursor for the next page
#[derive(Debug, Clone, Default)]
pub struct ItemPage {
    pub items: Vec<RawItem>,
    pub after: Option<String>,
}

/// Quota information attached to a provider response
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitReport {
    /// May be reported below zero; the tracker floors it
    pub remaining: i64,
    pub reset_at: DateTime<Utc>,
    pub limit_total: u32,
}

/// A provider response body with whatever quota headers came with it
#[derive(Debug, Clone)]
pub struct ProviderResponse<T> {
    pub body: T,
    pub rate_limit: Option<RateLimitReport>,
}

/// A post as the provider returns it
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RawItem {
    pub id: Option<String>,
    pub subreddit: Option<String>,
    pub title: Option<String>,
    pub selftext: Option<String>,
    pub author: Option<String>,
    pub score: Option<i64>,
    pub upvote_ratio: Option<f64>,
    pub num_comments: Option<i64>,
    pub created_utc: Option<f64>,
    pub url: Option<String>,
    pub permalink: Option<String>,
    pub domain: Option<String>,
    pub is_self: Option<bool>,
    pub is_video: Option<bool>,
    pub over_18: Option<bool>,
    pub spoiler: Option<bool>,
    pub stickied: Option<bool>,
    pub locked: Option<bool>,
    pub archived: Option<bool>,
    /// `false` or the edit timestamp
    pub edited: Option<serde_json::Value>,
    pub gilded: Option<i64>,
    pub distinguished: Option<String>,
    pub link_flair_text: Option<String>,
    pub post_hint: Option<String>,
    pub thumbnail: Option<String>,
}

/// A comment as the provider returns it, already flattened out of its tree
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RawChild {
    pub id: Option<String>,
    /// Fullname of the parent: `t3_<item>` for top-level, `t1_<child>` for replies
    pub parent_id: Option<String>,
    pub link_id: Option<String>,
    pub body: Option<String>,
    pub author: Option<String>,
    pub score: Option<i64>,
    pub created_utc: Option<f64>,
    pub edited: Option<serde_json::Value>,
    pub is_submitter: Option<bool>,
    pub stickied: Option<bool>,
    pub gilded: Option<i64>,
    pub distinguished: Option<String>,
    pub depth: Option<u32>,
    pub permalink: Option<String>,
}
