//! Provider records to stored records
//!
//! Missing numeric and text fields become zero values. Only records that
//! cannot be stored meaningfully are rejected.

use crate::provider::{RawChild, RawItem};
use crate::storage::{ChildRecord, ItemRecord};
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

/// Author shown for accounts that no longer exist
pub const DELETED_AUTHOR: &str = "[deleted]";

const REMOVED_BODIES: [&str; 2] = ["[deleted]", "[removed]"];

/// Why a single provider record was skipped
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("record has no id")]
    MissingId,

    #[error("child {0} was deleted or removed")]
    Removed(String),
}

/// Translates a provider item into an [`ItemRecord`]
pub fn translate_item(
    raw: RawItem,
    target: &str,
    fetched_at: DateTime<Utc>,
) -> Result<ItemRecord, ValidationError> {
    let id = non_empty(raw.id).ok_or(ValidationError::MissingId)?;

    Ok(ItemRecord {
        id,
        target: target.to_string(),
        title: raw.title.unwrap_or_default(),
        body: raw.selftext.unwrap_or_default(),
        author: author_or_deleted(raw.author),
        url: raw.url.unwrap_or_default(),
        permalink: raw.permalink.unwrap_or_default(),
        domain: raw.domain.unwrap_or_default(),
        score: raw.score.unwrap_or(0),
        ratio: raw.upvote_ratio.unwrap_or(0.0),
        num_comments: raw.num_comments.unwrap_or(0),
        is_self: raw.is_self.unwrap_or(false),
        is_video: raw.is_video.unwrap_or(false),
        over_18: raw.over_18.unwrap_or(false),
        spoiler: raw.spoiler.unwrap_or(false),
        stickied: raw.stickied.unwrap_or(false),
        locked: raw.locked.unwrap_or(false),
        archived: raw.archived.unwrap_or(false),
        edited: was_edited(raw.edited.as_ref()),
        gilded: raw.gilded.unwrap_or(0),
        distinguished: raw.distinguished,
        flair: raw.link_flair_text,
        post_hint: raw.post_hint,
        thumbnail: raw.thumbnail,
        created_at: epoch_seconds(raw.created_utc),
        fetched_at,
    })
}

/// Translates a provider child of `item_id` into a [`ChildRecord`]
///
/// `parent_child_id` is set only when the immediate parent is another child.
pub fn translate_child(
    raw: RawChild,
    item_id: &str,
    target: &str,
    fetched_at: DateTime<Utc>,
) -> Result<ChildRecord, ValidationError> {
    let id = non_empty(raw.id).ok_or(ValidationError::MissingId)?;

    let body = raw.body.unwrap_or_default();
    if REMOVED_BODIES.contains(&body.as_str()) {
        return Err(ValidationError::Removed(id));
    }

    let parent_child_id = raw
        .parent_id
        .as_deref()
        .and_then(|parent| parent.strip_prefix("t1_"))
        .map(str::to_string);

    Ok(ChildRecord {
        id,
        item_id: item_id.to_string(),
        parent_child_id,
        depth: raw.depth.unwrap_or(0),
        target: target.to_string(),
        body,
        author: author_or_deleted(raw.author),
        score: raw.score.unwrap_or(0),
        edited: was_edited(raw.edited.as_ref()),
        is_submitter: raw.is_submitter.unwrap_or(false),
        stickied: raw.stickied.unwrap_or(false),
        gilded: raw.gilded.unwrap_or(0),
        distinguished: raw.distinguished,
        permalink: raw.permalink.unwrap_or_default(),
        created_at: epoch_seconds(raw.created_utc),
        fetched_at,
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn author_or_deleted(author: Option<String>) -> String {
    non_empty(author).unwrap_or_else(|| DELETED_AUTHOR.to_string())
}

// `edited` is `false` or the edit time in epoch seconds.
fn was_edited(edited: Option<&Value>) -> bool {
    match edited {
        Some(Value::Bool(edited)) => *edited,
        Some(Value::Number(n)) => n.as_f64().map_or(false, |t| t > 0.0),
        _ => false,
    }
}

fn epoch_seconds(seconds: Option<f64>) -> DateTime<Utc> {
    seconds
        .filter(|s| s.is_finite())
        .and_then(|s| DateTime::from_timestamp_millis((s * 1000.0) as i64))
        .unwrap_or_default()
}
