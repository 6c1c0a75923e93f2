use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::event::{kind, tag, RawEvent};

/// One incremental fetch against a (source, scope, stream) feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub source: String,
    pub scope: String,
    pub stream: String,
    /// Stored cursor; 0 means full backfill.
    pub since: i64,
}

impl FetchRequest {
    /// Lower bound for a source filter. The cursor event itself was already
    /// seen, so the bound starts one past it.
    pub fn filter_since(&self) -> Option<i64> {
        (self.since > 0).then(|| self.since + 1)
    }
}

#[derive(Debug, Clone, Default)]
pub struct FetchBatch {
    pub events: Vec<RawEvent>,
    /// Explicit cursor hint; when absent the orchestrator derives one.
    pub next_cursor: Option<i64>,
}

/// Source of raw events. Transport details live behind this trait.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> anyhow::Result<FetchBatch>;
}

/// Event kinds requested per stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamKinds {
    #[serde(default)]
    pub streams: BTreeMap<String, Vec<u32>>,
    #[serde(default = "default_fallback_kinds")]
    pub fallback: Vec<u32>,
}

fn default_fallback_kinds() -> Vec<u32> {
    vec![kind::POST, kind::REACTION, kind::LABEL]
}

impl Default for StreamKinds {
    fn default() -> Self {
        let mut streams = BTreeMap::new();
        streams.insert("forum".to_string(), vec![kind::POST]);
        streams.insert("general".to_string(), vec![1111, kind::REACTION, kind::LABEL]);
        Self {
            streams,
            fallback: default_fallback_kinds(),
        }
    }
}

impl StreamKinds {
    /// Configured kinds for `stream`, else the fallback set. Empty entries
    /// count as unconfigured.
    pub fn resolve(&self, stream: &str) -> Vec<u32> {
        match self.streams.get(stream) {
            Some(kinds) if !kinds.is_empty() => kinds.clone(),
            _ if !self.fallback.is_empty() => self.fallback.clone(),
            _ => default_fallback_kinds(),
        }
    }
}

/// Serves events from a JSON array on disk, filtered the way a remote source
/// would filter them: by stream kinds, scope tag and lower time bound.
#[derive(Debug, Clone)]
pub struct JsonFileFetcher {
    path: PathBuf,
    kinds: StreamKinds,
}

impl JsonFileFetcher {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            kinds: StreamKinds::default(),
        }
    }

    pub fn with_stream_kinds(mut self, kinds: StreamKinds) -> Self {
        self.kinds = kinds;
        self
    }

    fn load(&self) -> anyhow::Result<Vec<RawEvent>> {
        let text = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let events = serde_json::from_str(&text)
            .with_context(|| format!("{} is not a JSON array of events", self.path.display()))?;
        Ok(events)
    }
}

#[async_trait]
impl Fetcher for JsonFileFetcher {
    async fn fetch(&self, request: &FetchRequest) -> anyhow::Result<FetchBatch> {
        let kinds = self.kinds.resolve(&request.stream);
        let since = request.filter_since();
        let events: Vec<RawEvent> = self
            .load()?
            .into_iter()
            .filter(|e| e.kind().is_some_and(|k| kinds.contains(&k)))
            .filter(|e| {
                e.tags().iter().any(|t| {
                    t.first().map(String::as_str) == Some(tag::SCOPE)
                        && t.get(1) == Some(&request.scope)
                })
            })
            .filter(|e| match since {
                Some(since) => e.created_at().is_some_and(|at| at >= since),
                None => true,
            })
            .collect();
        Ok(FetchBatch {
            events,
            next_cursor: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn request(stream: &str, since: i64) -> FetchRequest {
        FetchRequest {
            source: "file".to_string(),
            scope: "c1".to_string(),
            stream: stream.to_string(),
            since,
        }
    }

    #[test]
    fn test_filter_since_skips_boundary() {
        assert_eq!(request("forum", 0).filter_since(), None);
        assert_eq!(request("forum", 1000).filter_since(), Some(1001));
    }

    #[test]
    fn test_stream_kinds_resolution() {
        let kinds = StreamKinds::default();
        assert_eq!(kinds.resolve("forum"), vec![11]);
        assert_eq!(kinds.resolve("general"), vec![1111, 7, 1985]);
        assert_eq!(kinds.resolve("other"), vec![11, 7, 1985]);

        let mut custom = StreamKinds::default();
        custom.streams.insert("forum".to_string(), Vec::new());
        custom.fallback = Vec::new();
        assert_eq!(custom.resolve("forum"), vec![11, 7, 1985]);
    }

    #[tokio::test]
    async fn test_json_file_fetcher_filters() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.json");
        let events = json!([
            {"id": "a", "kind": 11, "pubkey": "p", "created_at": 100, "tags": [["h", "c1"]], "content": "x"},
            {"id": "b", "kind": 11, "pubkey": "p", "created_at": 200, "tags": [["h", "c1"]], "content": "y"},
            {"id": "c", "kind": 7, "pubkey": "p", "created_at": 300, "tags": [["h", "c1"]], "content": "+"},
            {"id": "d", "kind": 11, "pubkey": "p", "created_at": 300, "tags": [["h", "c2"]], "content": "z"}
        ]);
        std::fs::write(&path, events.to_string()).unwrap();
        let fetcher = JsonFileFetcher::new(&path);

        let all = fetcher.fetch(&request("forum", 0)).await.unwrap();
        let ids: Vec<_> = all.events.iter().filter_map(|e| e.id()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        let after = fetcher.fetch(&request("forum", 100)).await.unwrap();
        let ids: Vec<_> = after.events.iter().filter_map(|e| e.id()).collect();
        assert_eq!(ids, vec!["b"]);
        assert_eq!(after.next_cursor, None);
    }

    #[tokio::test]
    async fn test_json_file_fetcher_missing_file() {
        let dir = tempdir().unwrap();
        let fetcher = JsonFileFetcher::new(dir.path().join("missing.json"));
        assert!(fetcher.fetch(&request("forum", 0)).await.is_err());
    }
}
