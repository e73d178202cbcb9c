//! The append-only journal contract implemented by storage drivers.

use async_trait::async_trait;
use tokio::sync::broadcast;

use blessed_types::NodeId;

use crate::chain::EventHash;
use crate::error::StoreError;
use crate::{Event, EventDraft};

/// Tuning knobs shared by every journal driver.
#[derive(Debug, Clone)]
pub struct JournalConfig {
    /// Append a signed `system.checkpoint.v1` every this many events.
    pub checkpoint_interval: u64,
    /// Maximum number of drafts accepted in one `append_batch` transaction.
    pub max_batch: usize,
    /// Optional hard cap on journal length; appends beyond it fail with
    /// [`StoreError::StoreFull`].
    pub max_events: Option<u64>,
    /// Buffer size of the committed-event broadcast channel.
    pub broadcast_capacity: usize,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval: 1_000,
            max_batch: 256,
            max_events: None,
            broadcast_capacity: 1_024,
        }
    }
}

/// Abstraction over a single-writer, append-only, hash-chained journal.
///
/// Exactly one process may hold the write lease; drivers fail fast with
/// [`StoreError::WriterBusy`] when it is taken. Readers are unbounded and
/// observe a snapshot consistent with the last committed `seq`. All reads
/// iterate by `seq`, never by timestamp.
#[async_trait]
pub trait EventJournal: Send + Sync {
    /// Append a single event.
    ///
    /// The driver assigns `seq`, reads `prev_hash` inside the write
    /// transaction (never from a cached value alone), computes the hash,
    /// invokes the signer, and commits. Drivers append a signed checkpoint
    /// event each time `seq` crosses the configured interval.
    async fn append(&self, draft: EventDraft) -> Result<Event, StoreError>;

    /// Append a batch atomically: either every draft commits in order or
    /// none do. Batches longer than the configured transaction limit fail
    /// with [`StoreError::BatchTooLarge`] without a partial commit.
    async fn append_batch(&self, drafts: Vec<EventDraft>) -> Result<Vec<Event>, StoreError>;

    /// Sequence number and hash of the newest committed event, or `None`
    /// for an empty journal (only possible before genesis is written).
    async fn head(&self) -> Result<Option<(u64, EventHash)>, StoreError>;

    /// Fetch the event at `seq`.
    async fn event(&self, seq: u64) -> Result<Option<Event>, StoreError>;

    /// Events with `from <= seq <= to`, ordered by `seq`.
    async fn scan(&self, from: u64, to: u64) -> Result<Vec<Event>, StoreError>;

    /// Events whose kind starts with `prefix`, restricted to
    /// `from <= seq <= to`, ordered by `seq`.
    async fn events_of_kind(
        &self,
        prefix: &str,
        from: u64,
        to: u64,
    ) -> Result<Vec<Event>, StoreError>;

    /// Newest event of exactly `kind` with `seq <= max_seq`.
    ///
    /// `max_seq` lets phase code read against a snapshot captured at cycle
    /// start instead of the live tip.
    async fn latest_of_kind(&self, kind: &str, max_seq: u64)
        -> Result<Option<Event>, StoreError>;

    /// Total number of committed events. A healthy journal always satisfies
    /// `count() == head_seq + 1`; a shortfall means rows were removed out
    /// from under the chain.
    async fn count(&self) -> Result<u64, StoreError>;

    /// Identity this journal signs with.
    fn node_id(&self) -> NodeId;

    /// Subscribe to the stream of committed events. Subscribers that fall
    /// behind the buffer miss events; the journal itself is the source of
    /// truth, the stream is a convenience tail.
    fn subscribe(&self) -> broadcast::Receiver<Event>;
}
