use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use super::by_time_then_id;
use crate::event::{kind, Event};

const TITLE_MAX_CHARS: usize = 80;

/// Summary of a thread: its root post plus the reply set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadHead {
    pub root_id: String,
    pub scope: String,
    pub forum_slug: String,
    pub title: String,
    pub author: String,
    pub last_activity_at: i64,
    pub reply_count: i64,
}

/// Explicit `title` tag, else the first 80 characters of the trimmed content,
/// else a name derived from the root id.
pub fn thread_title(title_tag: Option<&str>, content: &str, root_id: &str) -> String {
    if let Some(title) = title_tag {
        return title.to_string();
    }
    let content = content.trim();
    if !content.is_empty() {
        return content.chars().take(TITLE_MAX_CHARS).collect();
    }
    format!("Thread {}", root_id.chars().take(8).collect::<String>())
}

/// Derives every thread head of `scope` from the posts in `events`.
///
/// Output is ordered by last activity, newest first, then by root id.
pub fn project_thread_heads(events: &[Event], scope: &str) -> Vec<ThreadHead> {
    let mut by_id: HashMap<&str, &Event> = HashMap::new();
    for event in events
        .iter()
        .filter(|e| e.kind == kind::POST && e.scope == scope)
    {
        let keep = match by_id.get(event.id.as_str()) {
            Some(existing) => {
                by_time_then_id(
                    (existing.created_at, existing.id.as_str()),
                    (event.created_at, event.id.as_str()),
                )
                .is_lt()
            }
            None => true,
        };
        if keep {
            by_id.insert(event.id.as_str(), event);
        }
    }

    let mut by_root: BTreeMap<&str, Vec<&Event>> = BTreeMap::new();
    for event in by_id.into_values() {
        by_root.entry(event.root_id.as_str()).or_default().push(event);
    }

    let mut heads: Vec<ThreadHead> = by_root
        .into_iter()
        .map(|(root_id, mut group)| {
            group.sort_by(|a, b| {
                by_time_then_id((a.created_at, a.id.as_str()), (b.created_at, b.id.as_str()))
            });
            let explicit_root = group.iter().copied().find(|e| e.id == root_id);
            let root = explicit_root.unwrap_or(group[0]);
            let last = group[group.len() - 1];
            let reply_count = group.len() as i64 - i64::from(explicit_root.is_some());

            ThreadHead {
                root_id: root_id.to_string(),
                scope: scope.to_string(),
                forum_slug: root.forum_slug.clone(),
                title: thread_title(root.title(), &root.content, root_id),
                author: root.author.clone(),
                last_activity_at: last.created_at,
                reply_count: reply_count.max(0),
            }
        })
        .collect();

    sort_heads(&mut heads);
    heads
}

pub(crate) fn sort_heads(heads: &mut [ThreadHead]) {
    heads.sort_by(|a, b| {
        b.last_activity_at
            .cmp(&a.last_activity_at)
            .then_with(|| a.root_id.cmp(&b.root_id))
    });
}
