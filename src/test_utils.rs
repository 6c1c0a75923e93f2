//! In-memory collaborators for tests and local tooling.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use tokio::sync::Notify;

use crate::event::{RawEvent, SignedEvent, UnsignedEvent};
use crate::sync::{FetchBatch, FetchRequest, Fetcher};
use crate::write::{Clock, DestinationPublisher, Publisher, Signer};

/// Signs with sequential ids and remembers every event it signed.
#[derive(Debug, Default)]
pub struct MockSigner {
    counter: AtomicU64,
    signed: Mutex<Vec<SignedEvent>>,
    failure: Mutex<Option<String>>,
}

impl MockSigner {
    pub fn fail_with(&self, message: &str) {
        if let Ok(mut failure) = self.failure.lock() {
            *failure = Some(message.to_string());
        }
    }

    pub fn signed(&self) -> Vec<SignedEvent> {
        self.signed.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Signer for MockSigner {
    async fn sign(&self, event: UnsignedEvent) -> anyhow::Result<SignedEvent> {
        if let Some(message) = self.failure.lock().ok().and_then(|f| f.clone()) {
            bail!(message);
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("{n:016x}");
        let signed = SignedEvent::from_unsigned(event, id.clone(), format!("sig-{id}"));
        if let Ok(mut all) = self.signed.lock() {
            all.push(signed.clone());
        }
        Ok(signed)
    }
}

/// Publisher whose verdict can be switched at runtime and which can be held
/// mid-publish until released.
#[derive(Debug, Default)]
pub struct GatedPublisher {
    rejection: Mutex<Option<String>>,
    published: Mutex<Vec<SignedEvent>>,
    gate: Option<Arc<Notify>>,
    entered: Arc<Notify>,
}

impl GatedPublisher {
    pub fn accepting() -> Self {
        Self::default()
    }

    /// Every publish waits for [`GatedPublisher::release`] before resolving.
    pub fn held() -> Self {
        Self {
            gate: Some(Arc::new(Notify::new())),
            ..Self::default()
        }
    }

    pub fn reject_with(&self, message: &str) {
        if let Ok(mut rejection) = self.rejection.lock() {
            *rejection = Some(message.to_string());
        }
    }

    pub fn accept(&self) {
        if let Ok(mut rejection) = self.rejection.lock() {
            *rejection = None;
        }
    }

    /// Let one held publish resolve.
    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.notify_one();
        }
    }

    /// Resolves once a publish call has started.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Every event handed to `publish`, in call order.
    pub fn published(&self) -> Vec<SignedEvent> {
        self.published.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Publisher for GatedPublisher {
    async fn publish(&self, event: &SignedEvent, _destinations: &[String]) -> anyhow::Result<()> {
        if let Ok(mut published) = self.published.lock() {
            published.push(event.clone());
        }
        self.entered.notify_one();
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        match self.rejection.lock().ok().and_then(|r| r.clone()) {
            Some(message) => Err(anyhow!(message)),
            None => Ok(()),
        }
    }
}

/// Destination publisher that records what it received, rejects the
/// destinations it was told to reject and never answers stalled ones.
#[derive(Debug, Default)]
pub struct RecordingDestinations {
    rejected: BTreeMap<String, String>,
    stalled: BTreeSet<String>,
    received: Mutex<Vec<(String, String)>>,
}

impl RecordingDestinations {
    pub fn stalling(mut self, destination: &str) -> Self {
        self.stalled.insert(destination.to_string());
        self
    }

    pub fn rejecting(mut self, destination: &str, message: &str) -> Self {
        self.rejected.insert(destination.to_string(), message.to_string());
        self
    }

    /// (destination, event id) pairs accepted so far.
    pub fn received(&self) -> Vec<(String, String)> {
        self.received.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl DestinationPublisher for RecordingDestinations {
    async fn publish_to(&self, destination: &str, event: &SignedEvent) -> anyhow::Result<()> {
        if self.stalled.contains(destination) {
            std::future::pending::<()>().await;
        }
        if let Some(message) = self.rejected.get(destination) {
            bail!(message.clone());
        }
        if let Ok(mut received) = self.received.lock() {
            received.push((destination.to_string(), event.id.clone()));
        }
        Ok(())
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct FixedClock(AtomicI64);

impl FixedClock {
    pub fn new(now_ms: i64) -> Self {
        Self(AtomicI64::new(now_ms))
    }

    pub fn advance(&self, ms: i64) {
        self.0.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_ms(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Fetcher serving a fixed batch per (source, stream), recording requests.
#[derive(Debug, Default)]
pub struct ScriptedFetcher {
    batches: HashMap<(String, String), FetchBatch>,
    requests: Mutex<Vec<FetchRequest>>,
}

impl ScriptedFetcher {
    pub fn with_batch(mut self, source: &str, stream: &str, events: Vec<RawEvent>) -> Self {
        self.batches.insert(
            (source.to_string(), stream.to_string()),
            FetchBatch {
                events,
                next_cursor: None,
            },
        );
        self
    }

    pub fn requests(&self) -> Vec<FetchRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: &FetchRequest) -> anyhow::Result<FetchBatch> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        let batch = self
            .batches
            .get(&(request.source.clone(), request.stream.clone()))
            .cloned()
            .unwrap_or_default();
        Ok(batch)
    }
}
