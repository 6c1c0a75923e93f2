use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::by_time_then_id;
use crate::event::{first_tag_value, kind, tag, tag_values, Event};

/// One label value applied by a label event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelRecord {
    /// `<event id>:<label>`, unique even when one event carries several labels.
    pub id: String,
    pub event_id: String,
    pub target_id: String,
    pub author: String,
    pub scope: String,
    pub label: String,
    pub reason: Option<String>,
    pub created_at: i64,
}

impl LabelRecord {
    /// Expands a label event into one record per label value.
    pub fn from_event(event: &Event) -> Vec<Self> {
        if event.kind != kind::LABEL {
            return Vec::new();
        }
        let (Some(target_id), Some(scope)) = (
            first_tag_value(&event.tags, tag::TARGET),
            first_tag_value(&event.tags, tag::SCOPE),
        ) else {
            return Vec::new();
        };
        let reason = first_tag_value(&event.tags, tag::REASON).map(str::to_string);

        tag_values(&event.tags, tag::TOPIC)
            .map(|label| Self {
                id: format!("{}:{}", event.id, label),
                event_id: event.id.clone(),
                target_id: target_id.to_string(),
                author: event.author.clone(),
                scope: scope.to_string(),
                label: label.to_string(),
                reason: reason.clone(),
                created_at: event.created_at,
            })
            .collect()
    }
}

/// target id → label → records in (created_at, id) order.
pub type LabelsByTarget = BTreeMap<String, BTreeMap<String, Vec<LabelRecord>>>;

pub fn normalize_labels(events: &[Event], scope: Option<&str>) -> Vec<LabelRecord> {
    let mut labels: Vec<LabelRecord> = events
        .iter()
        .flat_map(LabelRecord::from_event)
        .filter(|l| scope.map_or(true, |scope| l.scope == scope))
        .collect();
    labels.sort_by(|a, b| {
        by_time_then_id((a.created_at, a.event_id.as_str()), (b.created_at, b.event_id.as_str()))
            .then_with(|| a.label.cmp(&b.label))
    });
    labels
}

pub fn group_labels(labels: &[LabelRecord]) -> LabelsByTarget {
    let mut grouped = LabelsByTarget::new();
    for label in labels {
        grouped
            .entry(label.target_id.clone())
            .or_default()
            .entry(label.label.clone())
            .or_default()
            .push(label.clone());
    }
    grouped
}

pub fn project_labels(events: &[Event], scope: Option<&str>) -> LabelsByTarget {
    group_labels(&normalize_labels(events, scope))
}
