//! External collaborators of the write flow: signing, publishing and time.

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};

use crate::event::{SignedEvent, UnsignedEvent};

/// Adds the content-derived id and signature to a locally built event.
#[async_trait]
pub trait Signer: Send + Sync {
    async fn sign(&self, event: UnsignedEvent) -> anyhow::Result<SignedEvent>;
}

/// Sends a signed event to a set of destinations. Failing destinations may be
/// folded into a single error message.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, event: &SignedEvent, destinations: &[String]) -> anyhow::Result<()>;
}

/// Sends a signed event to exactly one destination.
#[async_trait]
pub trait DestinationPublisher: Send + Sync {
    async fn publish_to(&self, destination: &str, event: &SignedEvent) -> anyhow::Result<()>;
}

pub trait Clock: Send + Sync {
    /// Milliseconds since the epoch.
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

const NO_SIGNER_MESSAGE: &str = "no signer configured; supply one with WriteFlowService::with_signer";
const NO_PUBLISHER_MESSAGE: &str =
    "no publisher configured; supply one with WriteFlowService::with_publisher";

/// Signer used until a real one is configured. Always fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSigner;

#[async_trait]
impl Signer for NoopSigner {
    async fn sign(&self, _event: UnsignedEvent) -> anyhow::Result<SignedEvent> {
        Err(anyhow!(NO_SIGNER_MESSAGE))
    }
}

/// Publisher used until a real one is configured. Always fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPublisher;

#[async_trait]
impl Publisher for NoopPublisher {
    async fn publish(&self, _event: &SignedEvent, _destinations: &[String]) -> anyhow::Result<()> {
        Err(anyhow!(NO_PUBLISHER_MESSAGE))
    }
}

/// Publishes to every destination concurrently and succeeds as soon as one
/// of them accepted the event.
pub struct FanoutPublisher {
    inner: Arc<dyn DestinationPublisher>,
}

impl FanoutPublisher {
    pub fn new(inner: Arc<dyn DestinationPublisher>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Publisher for FanoutPublisher {
    async fn publish(&self, event: &SignedEvent, destinations: &[String]) -> anyhow::Result<()> {
        if destinations.is_empty() {
            return Err(anyhow!("no destinations configured"));
        }
        let mut attempts: FuturesUnordered<_> = destinations
            .iter()
            .enumerate()
            .map(|(index, destination)| async move {
                (index, self.inner.publish_to(destination, event).await)
            })
            .collect();
        let mut errors = Vec::new();
        while let Some((index, result)) = attempts.next().await {
            match result {
                Ok(()) => return Ok(()),
                Err(e) => errors.push((index, format!("{}: {}", destinations[index], e))),
            }
        }
        errors.sort_by_key(|(index, _)| *index);
        let messages: Vec<String> = errors.into_iter().map(|(_, message)| message).collect();
        Err(anyhow!(messages.join(" | ")))
    }
}
