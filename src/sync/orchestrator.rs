use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::fetcher::{FetchRequest, Fetcher};
use super::SyncStats;
use crate::error::{CacheError, PairFailure, SyncError};
use crate::event::kind;
use crate::normalize::normalize_batch;
use crate::projections::{normalize_labels, normalize_reactions, project_thread_heads};
use crate::store::{
    events_in_scope, get_cursor, insert_label_records, insert_new_events, insert_reaction_records,
    replace_thread_heads, set_cursor, upsert_member_list, MemberList, Store,
};

/// Which feeds one sync pass covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    pub scope: String,
    pub sources: Vec<String>,
    pub streams: Vec<String>,
}

/// What a post-ingest hook sees for one (source, stream) batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestContext<'a> {
    pub source: &'a str,
    pub stream: &'a str,
    pub scope: &'a str,
    pub since: i64,
    pub next_cursor: i64,
    pub new_event_count: usize,
}

/// Runs inside the ingest transaction just before the cursor advances. An
/// error rolls back the whole batch.
pub type PostIngestHook = Arc<dyn Fn(&IngestContext<'_>) -> anyhow::Result<()> + Send + Sync>;

/// Reconciles remote fetch results into the local store.
pub struct SyncOrchestrator {
    store: Arc<Store>,
    hook: Option<PostIngestHook>,
}

struct PairOutcome {
    fetched: usize,
    inserted: usize,
}

impl SyncOrchestrator {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store, hook: None }
    }

    pub fn with_post_ingest_hook(mut self, hook: PostIngestHook) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Sync every (source, stream) pair of `options` in order.
    ///
    /// Each pair commits or rolls back on its own; a failed pair is recorded
    /// and the pass moves on. There is no retry here.
    pub async fn sync(
        &self,
        fetcher: &dyn Fetcher,
        options: &SyncOptions,
    ) -> std::result::Result<SyncStats, SyncError> {
        let mut stats = SyncStats::default();
        if !self.store.is_available() {
            debug!("Store unavailable, skipping sync of {}", options.scope);
            return Ok(stats);
        }

        let mut failures = Vec::new();
        for source in &options.sources {
            for stream in &options.streams {
                stats.requests += 1;
                match self.sync_pair(fetcher, &options.scope, source, stream).await {
                    Ok(outcome) => {
                        stats.fetched_events += outcome.fetched as u64;
                        stats.new_events += outcome.inserted as u64;
                        stats.cursor_updates += 1;
                    }
                    Err((fetched, error)) => {
                        stats.fetched_events += fetched as u64;
                        warn!(
                            "Sync of {}/{} for scope {} failed: {}",
                            source, stream, options.scope, error
                        );
                        failures.push(PairFailure {
                            source: source.clone(),
                            stream: stream.clone(),
                            error,
                        });
                    }
                }
            }
        }

        if failures.is_empty() {
            Ok(stats)
        } else {
            Err(SyncError { stats, failures })
        }
    }

    async fn sync_pair(
        &self,
        fetcher: &dyn Fetcher,
        scope: &str,
        source: &str,
        stream: &str,
    ) -> std::result::Result<PairOutcome, (usize, CacheError)> {
        let since = self
            .store
            .read(|conn| get_cursor(conn, source, scope, stream))
            .map_err(|e| (0, e))?;
        let request = FetchRequest {
            source: source.to_string(),
            scope: scope.to_string(),
            stream: stream.to_string(),
            since,
        };

        let batch = fetcher
            .fetch(&request)
            .await
            .map_err(|e| (0, CacheError::Internal(e)))?;
        let fetched = batch.events.len();

        let events = normalize_batch(&batch.events, scope);
        let next_cursor = batch.next_cursor.unwrap_or_else(|| {
            events
                .iter()
                .map(|e| e.created_at)
                .fold(since, i64::max)
        });
        debug!(
            "Fetched {} events ({} valid) from {}/{} since {}",
            fetched,
            events.len(),
            source,
            stream,
            since
        );

        let inserted = self
            .store
            .write(scope, |conn| {
                let inserted = insert_new_events(conn, &events)?;
                for list in inserted.iter().filter(|e| e.kind == kind::MEMBER_LIST) {
                    if let Some(list) = MemberList::from_event(list) {
                        upsert_member_list(conn, &list)?;
                    }
                }
                let inserted = inserted.len();

                let posts = events_in_scope(conn, scope, kind::POST)?;
                replace_thread_heads(conn, scope, &project_thread_heads(&posts, scope))?;
                insert_reaction_records(conn, &normalize_reactions(&events, Some(scope)))?;
                insert_label_records(conn, &normalize_labels(&events, Some(scope)))?;

                if let Some(hook) = &self.hook {
                    hook(&IngestContext {
                        source,
                        stream,
                        scope,
                        since,
                        next_cursor,
                        new_event_count: inserted,
                    })
                    .map_err(CacheError::Hook)?;
                }

                set_cursor(conn, source, scope, stream, next_cursor, Utc::now().timestamp_millis())?;
                Ok(inserted)
            })
            .map_err(|e| (fetched, e))?;

        info!(
            "Committed {} new events from {}/{} for scope {}, cursor {} -> {}",
            inserted, source, stream, scope, since, next_cursor
        );
        Ok(PairOutcome { fetched, inserted })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::RawEvent;
    use crate::sync::FetchBatch;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Serves a fixed batch per (source, stream) and records every request.
    #[derive(Default)]
    struct MockFetcher {
        batches: HashMap<(String, String), FetchBatch>,
        requests: Mutex<Vec<FetchRequest>>,
        failing: Vec<String>,
    }

    impl MockFetcher {
        fn with_batch(mut self, source: &str, stream: &str, events: Vec<RawEvent>, next: Option<i64>) -> Self {
            self.batches.insert(
                (source.to_string(), stream.to_string()),
                FetchBatch {
                    events,
                    next_cursor: next,
                },
            );
            self
        }
    }

    #[async_trait]
    impl Fetcher for MockFetcher {
        async fn fetch(&self, request: &FetchRequest) -> anyhow::Result<FetchBatch> {
            self.requests.lock().unwrap().push(request.clone());
            if self.failing.contains(&request.source) {
                anyhow::bail!("source {} offline", request.source);
            }
            Ok(self
                .batches
                .get(&(request.source.clone(), request.stream.clone()))
                .cloned()
                .unwrap_or_default())
        }
    }

    fn post(id: &str, root: Option<&str>, created_at: i64) -> RawEvent {
        let mut tags = vec![json!(["h", "c1"]), json!(["t", "forum:general"])];
        if let Some(root) = root {
            tags.push(json!(["e", root, "", "root"]));
        }
        RawEvent(json!({
            "id": id,
            "kind": 11,
            "pubkey": "alice",
            "created_at": created_at,
            "content": format!("post {id}"),
            "tags": tags,
        }))
    }

    fn options(sources: &[&str], streams: &[&str]) -> SyncOptions {
        SyncOptions {
            scope: "c1".to_string(),
            sources: sources.iter().map(|s| s.to_string()).collect(),
            streams: streams.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_sync_commits_events_heads_and_cursor() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let fetcher = MockFetcher::default().with_batch(
            "relay-1",
            "forum",
            vec![post("r", None, 1000), post("a", Some("r"), 1100), post("b", Some("r"), 1200)],
            None,
        );
        let stats = SyncOrchestrator::new(store.clone())
            .sync(&fetcher, &options(&["relay-1"], &["forum"]))
            .await
            .unwrap();

        assert_eq!(
            stats,
            SyncStats {
                requests: 1,
                fetched_events: 3,
                new_events: 3,
                cursor_updates: 1
            }
        );
        let heads = store.thread_heads("c1").unwrap();
        assert_eq!(heads.len(), 1);
        assert_eq!(heads[0].reply_count, 2);
        assert_eq!(heads[0].last_activity_at, 1200);
        assert_eq!(store.cursor("relay-1", "c1", "forum").unwrap(), 1200);
    }

    #[tokio::test]
    async fn test_second_pass_passes_cursor_and_prefers_hint() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let fetcher = MockFetcher::default().with_batch("relay-1", "forum", vec![post("r", None, 1000)], Some(5000));
        let orchestrator = SyncOrchestrator::new(store.clone());
        let opts = options(&["relay-1"], &["forum"]);

        orchestrator.sync(&fetcher, &opts).await.unwrap();
        let stats = orchestrator.sync(&fetcher, &opts).await.unwrap();

        assert_eq!(stats.new_events, 0);
        let requests = fetcher.requests.lock().unwrap();
        assert_eq!(requests[0].since, 0);
        assert_eq!(requests[1].since, 5000);
        assert_eq!(requests[1].filter_since(), Some(5001));
    }

    #[tokio::test]
    async fn test_empty_batch_keeps_cursor() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store.set_cursor("relay-1", "c1", "forum", 700).unwrap();
        let fetcher = MockFetcher::default();
        let stats = SyncOrchestrator::new(store.clone())
            .sync(&fetcher, &options(&["relay-1"], &["forum"]))
            .await
            .unwrap();
        assert_eq!(stats.cursor_updates, 1);
        assert_eq!(store.cursor("relay-1", "c1", "forum").unwrap(), 700);
    }

    #[tokio::test]
    async fn test_hook_failure_rolls_back_pair_only() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let fetcher = MockFetcher::default()
            .with_batch("relay-1", "forum", vec![post("r1", None, 1000)], None)
            .with_batch("relay-2", "forum", vec![post("r2", None, 2000)], None);
        let hook: PostIngestHook = Arc::new(|ctx: &IngestContext<'_>| {
            if ctx.source == "relay-1" {
                anyhow::bail!("hook rejected batch");
            }
            Ok(())
        });

        let err = SyncOrchestrator::new(store.clone())
            .with_post_ingest_hook(hook)
            .sync(&fetcher, &options(&["relay-1", "relay-2"], &["forum"]))
            .await
            .unwrap_err();

        assert_eq!(err.failures.len(), 1);
        assert_eq!(err.failures[0].source, "relay-1");
        assert!(matches!(err.failures[0].error, CacheError::Hook(_)));
        assert_eq!(err.stats.cursor_updates, 1);
        assert_eq!(err.stats.fetched_events, 2);

        assert!(store.event("r1").unwrap().is_none());
        assert!(store.event("r2").unwrap().is_some());
        assert_eq!(store.cursor("relay-1", "c1", "forum").unwrap(), 0);
        assert_eq!(store.cursor("relay-2", "c1", "forum").unwrap(), 2000);
    }

    #[tokio::test]
    async fn test_fetch_failure_is_recorded() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let fetcher = MockFetcher {
            failing: vec!["relay-1".to_string()],
            ..Default::default()
        };
        let err = SyncOrchestrator::new(store)
            .sync(&fetcher, &options(&["relay-1"], &["forum", "general"]))
            .await
            .unwrap_err();
        assert_eq!(err.failures.len(), 2);
        assert_eq!(err.stats.requests, 2);
        assert_eq!(err.stats.cursor_updates, 0);
    }

    #[tokio::test]
    async fn test_unavailable_store_is_a_noop() {
        let store = Arc::new(Store::unavailable());
        let fetcher = MockFetcher::default();
        let stats = SyncOrchestrator::new(store)
            .sync(&fetcher, &options(&["relay-1"], &["forum"]))
            .await
            .unwrap();
        assert_eq!(stats, SyncStats::default());
        assert!(fetcher.requests.lock().unwrap().is_empty());
    }
}
