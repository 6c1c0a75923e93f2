use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::Serialize;

use super::cursors::{cursors_for_scope, CursorState};
use super::events::events_for_root;
use super::pending::{pending_for_scope, PendingStatus, PendingWrite};
use super::projections::{labels_for_scope, labels_for_targets, reactions_for_targets, thread_heads_for_scope};
use super::Store;
use crate::error::Result;
use crate::event::{kind, Event};
use crate::live::{watch, Subscription};
use crate::projections::{
    aggregate_reaction_counts, dedupe_latest_reactions, group_labels, LabelRecord, LabelsByTarget,
    ReactionCounts, ThreadHead,
};

/// Everything a thread page shows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThreadDetail {
    /// The event whose id equals the root id, else the earliest post.
    pub root: Option<Event>,
    pub replies: Vec<Event>,
    pub reactions: ReactionCounts,
    pub labels: LabelsByTarget,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncState {
    /// Most recent cursor update in the scope, in milliseconds.
    pub last_sync_at: Option<i64>,
    pub cursors: Vec<CursorState>,
}

impl Store {
    /// Thread heads of one forum, most recently active first. `None` lists
    /// every forum in the scope.
    pub fn thread_list(&self, scope: &str, forum_slug: Option<&str>) -> Result<Vec<ThreadHead>> {
        let heads = self.read(|conn| thread_heads_for_scope(conn, scope))?;
        Ok(match forum_slug {
            Some(slug) => heads.into_iter().filter(|h| h.forum_slug == slug).collect(),
            None => heads,
        })
    }

    pub fn thread_detail(&self, scope: &str, root_id: &str) -> Result<ThreadDetail> {
        self.read(|conn| {
            let posts: Vec<Event> = events_for_root(conn, scope, root_id)?
                .into_iter()
                .filter(|e| e.kind == kind::POST)
                .collect();

            let root_index = posts
                .iter()
                .position(|e| e.id == root_id)
                .or(if posts.is_empty() { None } else { Some(0) });
            let mut replies = posts;
            let root = root_index.map(|i| replies.remove(i));

            let targets: Vec<String> = root
                .iter()
                .chain(replies.iter())
                .map(|e| e.id.clone())
                .collect();
            let reactions = reactions_for_targets(conn, scope, &targets)?;
            let labels = labels_for_targets(conn, scope, &targets)?;

            Ok(ThreadDetail {
                root,
                replies,
                reactions: aggregate_reaction_counts(&dedupe_latest_reactions(&reactions)),
                labels: group_labels(&labels),
            })
        })
    }

    /// Label rows of `scope`, newest first.
    pub fn moderation_labels(&self, scope: &str) -> Result<Vec<LabelRecord>> {
        self.read(|conn| labels_for_scope(conn, scope))
    }

    /// Pending writes of `scope`, most recently updated first.
    pub fn pending_writes(&self, scope: &str) -> Result<Vec<PendingWrite>> {
        self.read(|conn| pending_for_scope(conn, scope))
    }

    /// Latest write status per event id.
    pub fn write_status_by_event(&self, scope: &str) -> Result<BTreeMap<String, PendingStatus>> {
        let writes = self.pending_writes(scope)?;
        let mut seen = HashSet::new();
        Ok(writes
            .into_iter()
            .filter(|w| seen.insert(w.event_id.clone()))
            .map(|w| (w.event_id, w.status))
            .collect())
    }

    pub fn sync_state(&self, scope: &str) -> Result<SyncState> {
        let cursors = self.read(|conn| cursors_for_scope(conn, scope))?;
        Ok(SyncState {
            last_sync_at: cursors.iter().map(|c| c.updated_at).max(),
            cursors,
        })
    }

    pub fn watch_thread_list<C>(self: &Arc<Self>, scope: &str, forum_slug: Option<&str>, callback: C) -> Subscription
    where
        C: Fn(Vec<ThreadHead>) + Send + Sync + 'static,
    {
        let (scope_owned, slug) = (scope.to_string(), forum_slug.map(str::to_string));
        watch(
            self,
            scope,
            move |store| store.thread_list(&scope_owned, slug.as_deref()),
            callback,
        )
    }

    pub fn watch_thread_detail<C>(self: &Arc<Self>, scope: &str, root_id: &str, callback: C) -> Subscription
    where
        C: Fn(ThreadDetail) + Send + Sync + 'static,
    {
        let (scope_owned, root_id) = (scope.to_string(), root_id.to_string());
        watch(
            self,
            scope,
            move |store| store.thread_detail(&scope_owned, &root_id),
            callback,
        )
    }

    pub fn watch_moderation_labels<C>(self: &Arc<Self>, scope: &str, callback: C) -> Subscription
    where
        C: Fn(Vec<LabelRecord>) + Send + Sync + 'static,
    {
        let scope_owned = scope.to_string();
        watch(self, scope, move |store| store.moderation_labels(&scope_owned), callback)
    }

    pub fn watch_pending_writes<C>(self: &Arc<Self>, scope: &str, callback: C) -> Subscription
    where
        C: Fn(Vec<PendingWrite>) + Send + Sync + 'static,
    {
        let scope_owned = scope.to_string();
        watch(self, scope, move |store| store.pending_writes(&scope_owned), callback)
    }

    pub fn watch_sync_state<C>(self: &Arc<Self>, scope: &str, callback: C) -> Subscription
    where
        C: Fn(SyncState) + Send + Sync + 'static,
    {
        let scope_owned = scope.to_string();
        watch(self, scope, move |store| store.sync_state(&scope_owned), callback)
    }
}
