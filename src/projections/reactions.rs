use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use super::by_time_then_id;
use crate::event::{first_tag_value, kind, tag, Event};

/// One reaction as stored in the aggregate-source table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionRecord {
    pub event_id: String,
    pub target_id: String,
    pub author: String,
    pub scope: String,
    pub value: String,
    pub created_at: i64,
}

impl ReactionRecord {
    fn order_key(&self) -> (i64, &str) {
        (self.created_at, self.event_id.as_str())
    }

    /// Reads a reaction event; `None` unless it has a target, a scope tag and
    /// non-blank content.
    pub fn from_event(event: &Event) -> Option<Self> {
        if event.kind != kind::REACTION {
            return None;
        }
        let target_id = first_tag_value(&event.tags, tag::TARGET)?;
        let scope = first_tag_value(&event.tags, tag::SCOPE)?;
        let value = event.content.trim();
        if value.is_empty() {
            return None;
        }
        Some(Self {
            event_id: event.id.clone(),
            target_id: target_id.to_string(),
            author: event.author.clone(),
            scope: scope.to_string(),
            value: value.to_string(),
            created_at: event.created_at,
        })
    }
}

/// target id → reaction value → count.
pub type ReactionCounts = BTreeMap<String, BTreeMap<String, u64>>;

pub fn normalize_reactions(events: &[Event], scope: Option<&str>) -> Vec<ReactionRecord> {
    events
        .iter()
        .filter_map(ReactionRecord::from_event)
        .filter(|r| scope.map_or(true, |scope| r.scope == scope))
        .collect()
}

/// Keeps one reaction per (target, author): the greatest (created_at, id).
pub fn dedupe_latest_reactions(reactions: &[ReactionRecord]) -> Vec<ReactionRecord> {
    let mut latest: HashMap<(&str, &str), &ReactionRecord> = HashMap::new();
    for reaction in reactions {
        let key = (reaction.target_id.as_str(), reaction.author.as_str());
        let newer = latest.get(&key).map_or(true, |existing| {
            by_time_then_id(existing.order_key(), reaction.order_key()).is_lt()
        });
        if newer {
            latest.insert(key, reaction);
        }
    }

    let mut deduped: Vec<ReactionRecord> = latest.into_values().cloned().collect();
    deduped.sort_by(|a, b| by_time_then_id(a.order_key(), b.order_key()));
    deduped
}

pub fn aggregate_reaction_counts(reactions: &[ReactionRecord]) -> ReactionCounts {
    let mut counts = ReactionCounts::new();
    for reaction in reactions {
        *counts
            .entry(reaction.target_id.clone())
            .or_default()
            .entry(reaction.value.clone())
            .or_default() += 1;
    }
    counts
}

pub fn project_reaction_counts(events: &[Event], scope: Option<&str>) -> ReactionCounts {
    aggregate_reaction_counts(&dedupe_latest_reactions(&normalize_reactions(events, scope)))
}
