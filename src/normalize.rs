//! Parse-or-reject boundary between remote payloads and the event store.

use std::collections::HashSet;
use std::fmt;

use tracing::trace;

use crate::event::{self, first_tag_value, tag, Event, RawEvent};

/// Why a raw candidate was dropped. Rejections are expected traffic and are
/// never surfaced as errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    MissingId,
    MissingKind,
    MissingAuthor,
    InvalidCreatedAt,
    ScopeMismatch { found: Option<String> },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::MissingId => write!(f, "missing id"),
            Rejection::MissingKind => write!(f, "missing kind"),
            Rejection::MissingAuthor => write!(f, "missing author"),
            Rejection::InvalidCreatedAt => write!(f, "created_at is not a finite number"),
            Rejection::ScopeMismatch { found: Some(scope) } => {
                write!(f, "scope tag {scope} does not match")
            }
            Rejection::ScopeMismatch { found: None } => write!(f, "no scope tag"),
        }
    }
}

/// Turns a raw candidate into a canonical event for `expected_scope`.
pub fn normalize(raw: &RawEvent, expected_scope: &str) -> Result<Event, Rejection> {
    let id = raw
        .id()
        .filter(|id| !id.is_empty())
        .ok_or(Rejection::MissingId)?;
    let kind = raw.kind().ok_or(Rejection::MissingKind)?;
    let author = raw
        .author()
        .filter(|author| !author.is_empty())
        .ok_or(Rejection::MissingAuthor)?;
    let created_at = raw.created_at().ok_or(Rejection::InvalidCreatedAt)?;

    let tags = raw.tags();
    match first_tag_value(&tags, tag::SCOPE) {
        Some(scope) if scope == expected_scope => {}
        found => {
            return Err(Rejection::ScopeMismatch {
                found: found.map(str::to_string),
            })
        }
    }

    Ok(Event {
        id: id.to_string(),
        kind,
        author: author.to_string(),
        created_at,
        scope: expected_scope.to_string(),
        forum_slug: event::forum_slug(&tags),
        root_id: event::root_id(id, &tags),
        content: raw.content().to_string(),
        tags,
    })
}

/// Normalizes a fetched batch, dropping rejects and keeping the first
/// occurrence of every id.
pub fn normalize_batch(raw: &[RawEvent], expected_scope: &str) -> Vec<Event> {
    let mut seen = HashSet::new();
    raw.iter()
        .filter_map(|candidate| match normalize(candidate, expected_scope) {
            Ok(event) => Some(event),
            Err(rejection) => {
                trace!(id = ?candidate.id(), %rejection, "dropping raw event");
                None
            }
        })
        .filter(|event| seen.insert(event.id.clone()))
        .collect()
}
