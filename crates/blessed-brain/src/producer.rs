//! External signal producers.
//!
//! Producers are collaborators outside the core: the orchestrator only
//! knows the fetch interface and never awaits one without a deadline.
//! Timed-out or failing fetches contribute nothing to the cycle – partial
//! producer results are discarded, and repeated failures surface as
//! `producer_health.*` events.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;
use tracing::warn;

use blessed_store_core::EventDraft;

/// A domain adapter that turns external data into signal drafts.
#[async_trait]
pub trait SignalProducer: Send + Sync {
    /// Producer name, used as the event `source`.
    fn name(&self) -> &str;

    /// Producer domain (`ta`, `onchain`, …).
    fn domain(&self) -> &str;

    /// Fetch fresh signal drafts for the given assets.
    async fn fetch(&self, assets: &[String]) -> anyhow::Result<Vec<EventDraft>>;
}

/// Outcome of one deadline-bounded fetch.
#[derive(Debug)]
pub enum FetchOutcome {
    /// Drafts ready to append.
    Produced(Vec<EventDraft>),
    /// The producer errored.
    Failed(String),
    /// The deadline elapsed; any partial result was discarded.
    TimedOut,
}

/// Fetch from one producer under a deadline.
pub async fn fetch_with_deadline(
    producer: &dyn SignalProducer,
    assets: &[String],
    deadline: Duration,
) -> FetchOutcome {
    match timeout(deadline, producer.fetch(assets)).await {
        Ok(Ok(drafts)) => FetchOutcome::Produced(drafts),
        Ok(Err(e)) => {
            warn!(producer = producer.name(), error = %e, "producer fetch failed");
            FetchOutcome::Failed(e.to_string())
        }
        Err(_) => {
            warn!(producer = producer.name(), ?deadline, "producer fetch timed out");
            FetchOutcome::TimedOut
        }
    }
}
