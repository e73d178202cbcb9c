#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **blessed-store-memory** – In-memory journal driver for the Blessed
//! ledger.
//!
//! This crate provides a fast, non-persistent journal suitable for tests,
//! development, and replay sandboxes. It enforces the same chain semantics
//! as the durable driver – signed genesis, gap-free sequencing, dedupe
//! uniqueness, atomic batches, periodic checkpoints – but everything lives
//! in process memory and is lost on drop.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::debug;

use blessed_store_core::chain::EventHash;
use blessed_store_core::seal::{checkpoint_draft, seal_draft, seal_genesis};
use blessed_store_core::{Event, EventDraft, EventJournal, JournalConfig, Signer, StoreError};
use blessed_types::NodeId;

struct Inner {
    events: Vec<Event>,
    dedupe: HashMap<(String, String), u64>,
    last_checkpoint_at: u64,
}

/// An in-memory, non-persistent event journal.
///
/// Appends are serialized by an internal mutex standing in for the durable
/// driver's write lease; reads go through an `RwLock` snapshot. A broadcast
/// channel tails committed events for live subscribers.
pub struct MemoryJournal {
    signer: Arc<dyn Signer>,
    config: JournalConfig,
    inner: Arc<RwLock<Inner>>,
    write_lock: Mutex<()>,
    broadcast_tx: broadcast::Sender<Event>,
}

impl MemoryJournal {
    /// Open a fresh journal, writing the genesis event.
    pub async fn open(
        signer: Arc<dyn Signer>,
        config: JournalConfig,
    ) -> Result<Self, StoreError> {
        let (broadcast_tx, _) = broadcast::channel(config.broadcast_capacity);
        let genesis = seal_genesis(signer.as_ref(), Utc::now())?;
        debug!(node_id = %signer.node_id(), "opened in-memory journal");
        Ok(Self {
            signer,
            config,
            inner: Arc::new(RwLock::new(Inner {
                events: vec![genesis],
                dedupe: HashMap::new(),
                last_checkpoint_at: 0,
            })),
            write_lock: Mutex::new(()),
            broadcast_tx,
        })
    }

    /// Seal and stage one draft against the staged tip. Shared by single
    /// appends and batches so both paths apply identical checks.
    fn stage(
        &self,
        inner: &Inner,
        staged: &mut Vec<Event>,
        draft: &EventDraft,
    ) -> Result<Event, StoreError> {
        let tip = staged.last().or_else(|| inner.events.last());
        let (seq, prev_hash) = match tip {
            Some(event) => (event.seq + 1, event.hash),
            None => return Err(StoreError::GenesisMismatch("journal has no genesis".into())),
        };
        if let Some(limit) = self.config.max_events {
            if seq >= limit {
                return Err(StoreError::StoreFull { limit });
            }
        }
        if let Some(key) = &draft.dedupe_key {
            let dedupe_key = (draft.kind.clone(), key.clone());
            let staged_hit = staged
                .iter()
                .any(|e| e.kind == draft.kind && e.dedupe_key.as_deref() == Some(key.as_str()));
            if staged_hit || inner.dedupe.contains_key(&dedupe_key) {
                return Err(StoreError::DuplicateDedupeKey {
                    kind: draft.kind.clone(),
                    key: key.clone(),
                });
            }
        }
        let event = seal_draft(draft, seq, prev_hash, Utc::now(), self.signer.as_ref())?;
        staged.push(event.clone());
        Ok(event)
    }

    /// Commit staged events, then append a checkpoint if the interval was
    /// crossed. Holding the write guard keeps the checkpoint adjacent.
    async fn commit(&self, staged: Vec<Event>) -> Result<Vec<Event>, StoreError> {
        let mut inner = self.inner.write().await;
        for event in &staged {
            if let Some(key) = &event.dedupe_key {
                inner
                    .dedupe
                    .insert((event.kind.clone(), key.clone()), event.seq);
            }
            inner.events.push(event.clone());
        }
        drop(inner);

        for event in &staged {
            let _ = self.broadcast_tx.send(event.clone());
        }

        self.maybe_checkpoint().await?;
        Ok(staged)
    }

    async fn maybe_checkpoint(&self) -> Result<(), StoreError> {
        let draft = {
            let inner = self.inner.read().await;
            let head = match inner.events.last() {
                Some(event) => event,
                None => return Ok(()),
            };
            if head.seq < inner.last_checkpoint_at + self.config.checkpoint_interval {
                return Ok(());
            }
            checkpoint_draft(head.seq, &head.hash, self.signer.node_id())?
        };

        let mut staged = Vec::with_capacity(1);
        {
            let inner = self.inner.read().await;
            self.stage(&inner, &mut staged, &draft)?;
        }
        let mut inner = self.inner.write().await;
        for event in &staged {
            inner.events.push(event.clone());
            inner.last_checkpoint_at = event.seq;
        }
        drop(inner);
        for event in &staged {
            let _ = self.broadcast_tx.send(event.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl EventJournal for MemoryJournal {
    async fn append(&self, draft: EventDraft) -> Result<Event, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut staged = Vec::with_capacity(1);
        {
            let inner = self.inner.read().await;
            self.stage(&inner, &mut staged, &draft)?;
        }
        let mut committed = self.commit(staged).await?;
        Ok(committed.remove(0))
    }

    async fn append_batch(&self, drafts: Vec<EventDraft>) -> Result<Vec<Event>, StoreError> {
        if drafts.len() > self.config.max_batch {
            return Err(StoreError::BatchTooLarge {
                len: drafts.len(),
                max: self.config.max_batch,
            });
        }
        let _guard = self.write_lock.lock().await;
        let mut staged = Vec::with_capacity(drafts.len());
        {
            let inner = self.inner.read().await;
            for draft in &drafts {
                // Any failure here discards the whole staged prefix; the
                // journal itself is untouched.
                self.stage(&inner, &mut staged, draft)?;
            }
        }
        self.commit(staged).await
    }

    async fn head(&self) -> Result<Option<(u64, EventHash)>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.events.last().map(|e| (e.seq, e.hash)))
    }

    async fn event(&self, seq: u64) -> Result<Option<Event>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.events.get(seq as usize).cloned())
    }

    async fn scan(&self, from: u64, to: u64) -> Result<Vec<Event>, StoreError> {
        let inner = self.inner.read().await;
        let len = inner.events.len() as u64;
        if from >= len {
            return Ok(Vec::new());
        }
        let to = to.min(len.saturating_sub(1));
        Ok(inner.events[from as usize..=to as usize].to_vec())
    }

    async fn events_of_kind(
        &self,
        prefix: &str,
        from: u64,
        to: u64,
    ) -> Result<Vec<Event>, StoreError> {
        let events = self.scan(from, to).await?;
        Ok(events
            .into_iter()
            .filter(|e| e.kind.starts_with(prefix))
            .collect())
    }

    async fn latest_of_kind(
        &self,
        kind: &str,
        max_seq: u64,
    ) -> Result<Option<Event>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .events
            .iter()
            .rev()
            .filter(|e| e.seq <= max_seq)
            .find(|e| e.kind == kind)
            .cloned())
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.events.len() as u64)
    }

    fn node_id(&self) -> NodeId {
        self.signer.node_id().clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.broadcast_tx.subscribe()
    }
}
