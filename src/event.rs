//! Canonical event model and the tag vocabulary shared with remote sources.
//!
//! Tag names and kind numbers are part of the wire contract with existing
//! event sources and must not change.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event kind discriminants.
pub mod kind {
    pub const REACTION: u32 = 7;
    pub const POST: u32 = 11;
    pub const LABEL: u32 = 1985;
    pub const SCOPE_DEFINITION: u32 = 10222;
    pub const MEMBER_LIST: u32 = 30000;
}

/// Tag names.
pub mod tag {
    /// Community scope.
    pub const SCOPE: &str = "h";
    /// Topic tag; carries `forum:<slug>` on posts and label values on reports.
    pub const TOPIC: &str = "t";
    /// Target reference: `["e", id, location hint, relation]`.
    pub const TARGET: &str = "e";
    pub const TITLE: &str = "title";
    pub const REASON: &str = "reason";
    /// List identifier on addressable lists.
    pub const LIST_ID: &str = "d";
    /// List member.
    pub const MEMBER: &str = "p";
    /// Kind permitted in a scope section.
    pub const PERMITTED_KIND: &str = "k";
    /// Address reference `<kind>:<author>:<d-tag>`.
    pub const ADDRESS: &str = "a";
}

pub const FORUM_SLUG_PREFIX: &str = "forum:";
pub const DEFAULT_FORUM_SLUG: &str = "general";
pub const RELATION_ROOT: &str = "root";
pub const RELATION_REPLY: &str = "reply";

pub type Tag = Vec<String>;

/// Event as it arrives from a remote source. Nothing about its shape is
/// trusted until it has passed the normalizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawEvent(pub Value);

impl RawEvent {
    pub fn id(&self) -> Option<&str> {
        self.0.get("id").and_then(Value::as_str)
    }

    /// Integral kinds only; `11.0` is accepted, `11.5` is not.
    pub fn kind(&self) -> Option<u32> {
        let value = self.0.get("kind")?;
        if let Some(k) = value.as_u64() {
            return u32::try_from(k).ok();
        }
        value
            .as_f64()
            .filter(|k| k.is_finite() && k.fract() == 0.0)
            .filter(|k| (0.0..=f64::from(u32::MAX)).contains(k))
            .map(|k| k as u32)
    }

    pub fn author(&self) -> Option<&str> {
        self.0.get("pubkey").and_then(Value::as_str)
    }

    /// `created_at`, falling back to `createdAt`; only finite numbers count.
    pub fn created_at(&self) -> Option<i64> {
        ["created_at", "createdAt"]
            .iter()
            .filter_map(|key| self.0.get(*key))
            .find_map(finite_seconds)
    }

    pub fn content(&self) -> &str {
        self.0.get("content").and_then(Value::as_str).unwrap_or("")
    }

    /// Array-shaped tags only; non-string elements become empty strings.
    pub fn tags(&self) -> Vec<Tag> {
        let Some(Value::Array(tags)) = self.0.get("tags") else {
            return Vec::new();
        };
        tags.iter()
            .filter_map(Value::as_array)
            .map(|tag| {
                tag.iter()
                    .map(|item| item.as_str().unwrap_or_default().to_string())
                    .collect()
            })
            .collect()
    }
}

fn finite_seconds(value: &Value) -> Option<i64> {
    if let Some(v) = value.as_i64() {
        return Some(v);
    }
    value
        .as_f64()
        .filter(|v| v.is_finite())
        .map(|v| v.trunc() as i64)
}

impl From<SignedEvent> for RawEvent {
    fn from(event: SignedEvent) -> Self {
        RawEvent(serde_json::to_value(event).unwrap_or(Value::Null))
    }
}

/// Event built locally, before the signer assigns id and signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnsignedEvent {
    pub kind: u32,
    pub pubkey: String,
    pub created_at: i64,
    pub tags: Vec<Tag>,
    pub content: String,
}

/// Event carrying the signer's content-derived id and signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedEvent {
    pub id: String,
    pub kind: u32,
    pub pubkey: String,
    pub created_at: i64,
    pub tags: Vec<Tag>,
    pub content: String,
    pub sig: String,
}

impl SignedEvent {
    pub fn from_unsigned(event: UnsignedEvent, id: impl Into<String>, sig: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: event.kind,
            pubkey: event.pubkey,
            created_at: event.created_at,
            tags: event.tags,
            content: event.content,
            sig: sig.into(),
        }
    }
}

/// Canonical stored event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub kind: u32,
    pub author: String,
    pub created_at: i64,
    pub scope: String,
    pub forum_slug: String,
    pub root_id: String,
    pub content: String,
    pub tags: Vec<Tag>,
}

impl Event {
    pub fn title(&self) -> Option<&str> {
        first_tag_value(&self.tags, tag::TITLE)
    }

    /// First target reference, the object of reactions and labels.
    pub fn target_id(&self) -> Option<&str> {
        first_tag_value(&self.tags, tag::TARGET)
    }
}

/// Values at position 1 of every tag named `name`, skipping empty ones.
pub fn tag_values<'a>(tags: &'a [Tag], name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
    tags.iter()
        .filter(move |tag| tag.first().map(String::as_str) == Some(name))
        .filter_map(|tag| tag.get(1))
        .map(String::as_str)
        .filter(|value| !value.is_empty())
}

pub fn first_tag_value<'a>(tags: &'a [Tag], name: &'a str) -> Option<&'a str> {
    tag_values(tags, name).next()
}

/// Slug from the first `forum:` topic tag, lowercased; `general` when absent
/// or blank.
pub fn forum_slug(tags: &[Tag]) -> String {
    tag_values(tags, tag::TOPIC)
        .find_map(|value| value.strip_prefix(FORUM_SLUG_PREFIX))
        .map(|slug| slug.trim().to_lowercase())
        .filter(|slug| !slug.is_empty())
        .unwrap_or_else(|| DEFAULT_FORUM_SLUG.to_string())
}

/// Thread root of an event: itself without target references, else the
/// reference marked `root`, else the first reference.
pub fn root_id(event_id: &str, tags: &[Tag]) -> String {
    let targets: Vec<&Tag> = tags
        .iter()
        .filter(|tag| {
            tag.first().map(String::as_str) == Some(tag::TARGET)
                && tag.get(1).is_some_and(|v| !v.is_empty())
        })
        .collect();

    let Some(first) = targets.first() else {
        return event_id.to_string();
    };
    targets
        .iter()
        .find(|tag| tag.get(3).map(String::as_str) == Some(RELATION_ROOT))
        .unwrap_or(first)[1]
        .clone()
}

/// Normalizes user-supplied forum slugs the same way tags are read back.
pub fn normalize_slug_input(slug: Option<&str>) -> String {
    slug.map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_FORUM_SLUG.to_string())
}

pub fn scope_tag(scope: &str) -> Tag {
    vec![tag::SCOPE.to_string(), scope.to_string()]
}

pub fn forum_tag(slug: &str) -> Tag {
    vec![tag::TOPIC.to_string(), format!("{FORUM_SLUG_PREFIX}{slug}")]
}

pub fn target_tag(target_id: &str, relation: Option<&str>) -> Tag {
    match relation {
        Some(relation) => vec![
            tag::TARGET.to_string(),
            target_id.to_string(),
            String::new(),
            relation.to_string(),
        ],
        None => vec![tag::TARGET.to_string(), target_id.to_string()],
    }
}
