#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **blessed-store-sqlite** – SQLite-backed journal driver for the Blessed
//! ledger.
//!
//! The journal file is the authoritative record: one row per event, hash
//! chain enforced at append time, payloads stored in their canonical byte
//! form so the database never re-serializes the compatibility surface.
//!
//! Single-writer discipline is enforced twice: an advisory `fs2` lock on a
//! sidecar lease file fails a second process fast with `WriterBusy`, and an
//! in-process mutex serializes appends within the owning process. Readers
//! are unbounded and see a snapshot consistent with the last committed
//! sequence number.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ed25519_dalek::Signature;
use fs2::FileExt;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use blessed_store_core::canonical::canonical_payload_bytes;
use blessed_store_core::chain::EventHash;
use blessed_store_core::payloads::{from_value, GenesisPayload};
use blessed_store_core::seal::{checkpoint_draft, seal_draft, seal_genesis};
use blessed_store_core::{Event, EventDraft, EventJournal, JournalConfig, Signer, StoreError};
use blessed_types::{NodeId, KIND_CHECKPOINT, KIND_GENESIS};

/// Suffix of the sidecar file carrying the advisory write lease.
const LEASE_SUFFIX: &str = "lock";

//─────────────────────────────
//  SQLite journal
//─────────────────────────────

/// A durable, single-writer journal on SQLite.
pub struct SqliteJournal {
    pool: SqlitePool,
    signer: Arc<dyn Signer>,
    config: JournalConfig,
    /// Cached tip; the authoritative value is re-read inside every write
    /// transaction and cross-checked against this cache.
    tip: RwLock<(u64, EventHash)>,
    last_checkpoint_at: RwLock<u64>,
    write_lock: Mutex<()>,
    broadcast_tx: broadcast::Sender<Event>,
    /// Held for the lifetime of the journal; dropping releases the lease.
    _lease: Option<File>,
    writable: bool,
}

impl std::fmt::Debug for SqliteJournal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteJournal")
            .field("writable", &self.writable)
            .finish_non_exhaustive()
    }
}

impl SqliteJournal {
    /// Open (or create) the journal at `path` in write mode.
    ///
    /// Acquires the exclusive write lease, probes the database with an
    /// immediate transaction, writes genesis if the journal is empty, and
    /// refuses journals whose genesis is bound to a different key.
    pub async fn open(
        path: impl AsRef<Path>,
        signer: Arc<dyn Signer>,
        config: JournalConfig,
    ) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let lease = acquire_lease(path)?;

        let database_url = format!("sqlite://{}?mode=rwc", path.display());
        let pool = SqlitePool::connect(&database_url)
            .await
            .map_err(backend)?;

        // WAL journaling plus full sync: commits survive power loss and
        // readers never block the writer.
        sqlx::query("PRAGMA journal_mode=WAL")
            .fetch_optional(&pool)
            .await
            .map_err(backend)?;
        sqlx::query("PRAGMA synchronous=FULL")
            .execute(&pool)
            .await
            .map_err(backend)?;

        // IMMEDIATE-equivalent probe: surfaces a database locked by another
        // writer even when the lease file was bypassed.
        {
            let mut conn = pool.acquire().await.map_err(backend)?;
            sqlx::query("BEGIN IMMEDIATE")
                .execute(&mut *conn)
                .await
                .map_err(|e| StoreError::WriterBusy(format!("write probe failed: {e}")))?;
            sqlx::query("COMMIT")
                .execute(&mut *conn)
                .await
                .map_err(backend)?;
        }

        migrate(&pool).await?;

        let journal = Self {
            pool,
            signer,
            broadcast_tx: broadcast::channel(config.broadcast_capacity).0,
            config,
            tip: RwLock::new((0, [0u8; 32])),
            last_checkpoint_at: RwLock::new(0),
            write_lock: Mutex::new(()),
            _lease: Some(lease),
            writable: true,
        };
        journal.bootstrap().await?;
        Ok(journal)
    }

    /// Open the journal read-only. No lease is taken; appends fail.
    pub async fn open_read_only(
        path: impl AsRef<Path>,
        signer: Arc<dyn Signer>,
        config: JournalConfig,
    ) -> Result<Self, StoreError> {
        let database_url = format!("sqlite://{}?mode=ro", path.as_ref().display());
        let pool = SqlitePool::connect(&database_url)
            .await
            .map_err(backend)?;
        let journal = Self {
            pool,
            signer,
            broadcast_tx: broadcast::channel(config.broadcast_capacity).0,
            config,
            tip: RwLock::new((0, [0u8; 32])),
            last_checkpoint_at: RwLock::new(0),
            write_lock: Mutex::new(()),
            _lease: None,
            writable: false,
        };
        journal.restore_tip().await?;
        Ok(journal)
    }

    /// Write genesis on first open, restore and validate state otherwise.
    async fn bootstrap(&self) -> Result<(), StoreError> {
        let count: i64 = sqlx::query("SELECT COUNT(*) AS n FROM events")
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?
            .get("n");

        if count == 0 {
            let genesis = seal_genesis(self.signer.as_ref(), Utc::now())?;
            let mut tx = self.pool.begin().await.map_err(backend)?;
            insert_event(&mut tx, &genesis).await?;
            tx.commit().await.map_err(backend)?;
            *self.tip.write().await = (genesis.seq, genesis.hash);
            info!(node_id = %self.signer.node_id(), "journal initialized with genesis");
            let _ = self.broadcast_tx.send(genesis);
            return Ok(());
        }

        // Existing journal: the genesis must be bound to our key.
        let genesis = self
            .event(0)
            .await?
            .ok_or_else(|| StoreError::GenesisMismatch("no event at seq 0".into()))?;
        if genesis.kind != KIND_GENESIS {
            return Err(StoreError::GenesisMismatch(format!(
                "first event has kind {}",
                genesis.kind
            )));
        }
        let payload: GenesisPayload = from_value(&genesis.payload)?;
        let our_key = hex::encode(self.signer.verifying_key().as_bytes());
        if payload.public_key != our_key {
            return Err(StoreError::GenesisMismatch(
                "journal genesis is bound to a different public key".into(),
            ));
        }
        self.restore_tip().await?;

        let tip = *self.tip.read().await;
        debug!(head_seq = tip.0, "journal reopened");
        Ok(())
    }

    async fn restore_tip(&self) -> Result<(), StoreError> {
        let row = sqlx::query("SELECT seq, hash FROM events ORDER BY seq DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        if let Some(row) = row {
            let seq: i64 = row.get("seq");
            let hash: Vec<u8> = row.get("hash");
            *self.tip.write().await = (seq as u64, to_hash(&hash, seq as u64)?);
        }
        let cp = sqlx::query("SELECT seq FROM events WHERE type = ? ORDER BY seq DESC LIMIT 1")
            .bind(KIND_CHECKPOINT)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        if let Some(row) = cp {
            let seq: i64 = row.get("seq");
            *self.last_checkpoint_at.write().await = seq as u64;
        }
        Ok(())
    }

    /// Append a run of drafts inside one transaction. The tip is read from
    /// the database inside the transaction, never trusted from the cache;
    /// the cache only cross-checks for out-of-band mutation.
    async fn append_run(&self, drafts: &[EventDraft]) -> Result<Vec<Event>, StoreError> {
        if !self.writable {
            return Err(StoreError::WriterBusy("journal opened read-only".into()));
        }
        let committed = {
            let _guard = self.write_lock.lock().await;
            self.append_run_locked(drafts).await?
        };
        self.maybe_checkpoint().await?;
        Ok(committed)
    }

    async fn append_run_locked(&self, drafts: &[EventDraft]) -> Result<Vec<Event>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let row = sqlx::query("SELECT seq, hash FROM events ORDER BY seq DESC LIMIT 1")
            .fetch_optional(&mut *tx)
            .await
            .map_err(backend)?
            .ok_or_else(|| StoreError::GenesisMismatch("journal has no genesis".into()))?;
        let tip_seq: i64 = row.get("seq");
        let tip_hash: Vec<u8> = row.get("hash");
        let mut seq = tip_seq as u64;
        let mut prev_hash = to_hash(&tip_hash, seq)?;

        let cached = *self.tip.read().await;
        if cached.0 != seq || cached.1 != prev_hash {
            return Err(StoreError::Conflict(format!(
                "journal tip moved out from under the writer (cached seq {}, stored seq {seq})",
                cached.0
            )));
        }

        let mut committed = Vec::with_capacity(drafts.len());
        for draft in drafts {
            seq += 1;
            if let Some(limit) = self.config.max_events {
                if seq >= limit {
                    return Err(StoreError::StoreFull { limit });
                }
            }
            if let Some(key) = &draft.dedupe_key {
                let hit = sqlx::query("SELECT 1 FROM events WHERE type = ? AND dedupe_key = ?")
                    .bind(&draft.kind)
                    .bind(key)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(backend)?;
                let staged_hit = committed
                    .iter()
                    .any(|e: &Event| e.kind == draft.kind && e.dedupe_key.as_deref() == Some(key.as_str()));
                if hit.is_some() || staged_hit {
                    return Err(StoreError::DuplicateDedupeKey {
                        kind: draft.kind.clone(),
                        key: key.clone(),
                    });
                }
            }
            let event = seal_draft(draft, seq, prev_hash, Utc::now(), self.signer.as_ref())?;
            insert_event(&mut tx, &event).await?;
            prev_hash = event.hash;
            committed.push(event);
        }

        tx.commit().await.map_err(backend)?;

        if let Some(last) = committed.last() {
            *self.tip.write().await = (last.seq, last.hash);
        }
        for event in &committed {
            let _ = self.broadcast_tx.send(event.clone());
        }
        Ok(committed)
    }

    async fn maybe_checkpoint(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        // Re-read under the guard: a concurrent append may have already
        // placed the checkpoint for this interval.
        let (head_seq, head_hash) = *self.tip.read().await;
        let last = *self.last_checkpoint_at.read().await;
        if head_seq < last + self.config.checkpoint_interval {
            return Ok(());
        }
        let draft = checkpoint_draft(head_seq, &head_hash, self.signer.node_id())?;
        let committed = self.append_run_locked(std::slice::from_ref(&draft)).await?;
        if let Some(cp) = committed.first() {
            *self.last_checkpoint_at.write().await = cp.seq;
            debug!(checkpoint_seq = cp.seq, anchored_seq = head_seq, "checkpoint appended");
        }
        Ok(())
    }
}

#[async_trait]
impl EventJournal for SqliteJournal {
    async fn append(&self, draft: EventDraft) -> Result<Event, StoreError> {
        let mut committed = self.append_run(std::slice::from_ref(&draft)).await?;
        Ok(committed.remove(0))
    }

    async fn append_batch(&self, drafts: Vec<EventDraft>) -> Result<Vec<Event>, StoreError> {
        if drafts.len() > self.config.max_batch {
            return Err(StoreError::BatchTooLarge {
                len: drafts.len(),
                max: self.config.max_batch,
            });
        }
        self.append_run(&drafts).await
    }

    async fn head(&self) -> Result<Option<(u64, EventHash)>, StoreError> {
        let row = sqlx::query("SELECT seq, hash FROM events ORDER BY seq DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        match row {
            Some(row) => {
                let seq: i64 = row.get("seq");
                let hash: Vec<u8> = row.get("hash");
                Ok(Some((seq as u64, to_hash(&hash, seq as u64)?)))
            }
            None => Ok(None),
        }
    }

    async fn event(&self, seq: u64) -> Result<Option<Event>, StoreError> {
        let row = sqlx::query("SELECT * FROM events WHERE seq = ?")
            .bind(seq as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.map(|r| row_to_event(&r)).transpose()
    }

    async fn scan(&self, from: u64, to: u64) -> Result<Vec<Event>, StoreError> {
        let rows = sqlx::query("SELECT * FROM events WHERE seq BETWEEN ? AND ? ORDER BY seq")
            .bind(from as i64)
            .bind(to.min(i64::MAX as u64) as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows.iter().map(row_to_event).collect()
    }

    async fn events_of_kind(
        &self,
        prefix: &str,
        from: u64,
        to: u64,
    ) -> Result<Vec<Event>, StoreError> {
        // Kinds are validated dotted identifiers, so a GLOB pattern cannot
        // be confused by wildcard characters the way LIKE underscores can.
        let pattern = format!("{prefix}*");
        let rows = sqlx::query(
            "SELECT * FROM events WHERE type GLOB ? AND seq BETWEEN ? AND ? ORDER BY seq",
        )
        .bind(&pattern)
        .bind(from as i64)
        .bind(to.min(i64::MAX as u64) as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.iter().map(row_to_event).collect()
    }

    async fn latest_of_kind(
        &self,
        kind: &str,
        max_seq: u64,
    ) -> Result<Option<Event>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM events WHERE type = ? AND seq <= ? ORDER BY seq DESC LIMIT 1",
        )
        .bind(kind)
        .bind(max_seq.min(i64::MAX as u64) as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.map(|r| row_to_event(&r)).transpose()
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM events")
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;
        let n: i64 = row.get("n");
        Ok(n as u64)
    }

    fn node_id(&self) -> NodeId {
        self.signer.node_id().clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.broadcast_tx.subscribe()
    }
}

//─────────────────────────────
//  Schema & row mapping
//─────────────────────────────

async fn migrate(pool: &SqlitePool) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS events (
            seq INTEGER PRIMARY KEY,
            event_id BLOB NOT NULL UNIQUE,
            ts INTEGER NOT NULL,
            type TEXT NOT NULL,
            schema_version TEXT NOT NULL,
            source TEXT,
            trace_id TEXT,
            dedupe_key TEXT,
            payload BLOB NOT NULL,
            prev_hash BLOB NOT NULL UNIQUE,
            hash BLOB NOT NULL UNIQUE,
            signer TEXT NOT NULL,
            signature BLOB NOT NULL
        ) STRICT
        "#,
    )
    .execute(pool)
    .await
    .map_err(backend)?;

    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_events_dedupe \
         ON events(type, dedupe_key) WHERE dedupe_key IS NOT NULL",
    )
    .execute(pool)
    .await
    .map_err(backend)?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_type ON events(type, seq)")
        .execute(pool)
        .await
        .map_err(backend)?;

    // Convenience view over the newest kill-switch transition; projections
    // carry no correctness weight, the events table is the record.
    sqlx::query(
        "CREATE VIEW IF NOT EXISTS kill_switch AS \
         SELECT seq, ts, payload FROM events \
         WHERE type = 'system.kill_switch.v1' ORDER BY seq DESC LIMIT 1",
    )
    .execute(pool)
    .await
    .map_err(backend)?;

    Ok(())
}

async fn insert_event(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    event: &Event,
) -> Result<(), StoreError> {
    let payload_bytes = canonical_payload_bytes(&event.payload)?;
    let ts_nanos = event.ts_nanos()?;
    let result = sqlx::query(
        r#"
        INSERT INTO events
        (seq, event_id, ts, type, schema_version, source, trace_id, dedupe_key,
         payload, prev_hash, hash, signer, signature)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(event.seq as i64)
    .bind(event.event_id.as_bytes().as_slice())
    .bind(ts_nanos)
    .bind(&event.kind)
    .bind(&event.schema_version)
    .bind(event.source.as_deref())
    .bind(event.trace_id.as_deref())
    .bind(event.dedupe_key.as_deref())
    .bind(payload_bytes)
    .bind(event.prev_hash.as_slice())
    .bind(event.hash.as_slice())
    .bind(event.signer.as_str())
    .bind(event.signature.to_bytes().as_slice())
    .execute(&mut **tx)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(db)) if db.message().contains("idx_events_dedupe") => {
            Err(StoreError::DuplicateDedupeKey {
                kind: event.kind.clone(),
                key: event.dedupe_key.clone().unwrap_or_default(),
            })
        }
        Err(sqlx::Error::Database(db)) if db.message().contains("UNIQUE constraint") => {
            Err(StoreError::Conflict(db.message().to_string()))
        }
        Err(e) => Err(backend(e)),
    }
}

fn row_to_event(row: &SqliteRow) -> Result<Event, StoreError> {
    let seq: i64 = row.get("seq");
    let seq = seq as u64;
    let event_id: Vec<u8> = row.get("event_id");
    let ts_nanos: i64 = row.get("ts");
    let payload_bytes: Vec<u8> = row.get("payload");
    let prev_hash: Vec<u8> = row.get("prev_hash");
    let hash: Vec<u8> = row.get("hash");
    let signature: Vec<u8> = row.get("signature");

    let signature: [u8; 64] = signature
        .try_into()
        .map_err(|_| StoreError::Backend(format!("malformed signature at seq {seq}")))?;

    Ok(Event {
        event_id: Uuid::from_slice(&event_id)
            .map_err(|e| StoreError::Backend(format!("malformed event_id at seq {seq}: {e}")))?,
        seq,
        ts: DateTime::<Utc>::from_timestamp_nanos(ts_nanos),
        kind: row.get("type"),
        schema_version: row.get("schema_version"),
        source: row.get("source"),
        trace_id: row.get("trace_id"),
        dedupe_key: row.get("dedupe_key"),
        payload: serde_json::from_slice(&payload_bytes)
            .map_err(|e| StoreError::Backend(format!("malformed payload at seq {seq}: {e}")))?,
        prev_hash: to_hash(&prev_hash, seq)?,
        hash: to_hash(&hash, seq)?,
        signer: NodeId(row.get("signer")),
        signature: Signature::from_bytes(&signature),
    })
}

fn to_hash(bytes: &[u8], seq: u64) -> Result<EventHash, StoreError> {
    bytes
        .try_into()
        .map_err(|_| StoreError::Backend(format!("malformed hash at seq {seq}")))
}

fn backend(e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(e.to_string())
}

//─────────────────────────────
//  Write lease
//─────────────────────────────

fn lease_path(journal_path: &Path) -> PathBuf {
    let mut name = journal_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "journal".to_string());
    name.push('.');
    name.push_str(LEASE_SUFFIX);
    journal_path.with_file_name(name)
}

fn acquire_lease(journal_path: &Path) -> Result<File, StoreError> {
    let path = lease_path(journal_path);
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(&path)
        .map_err(|e| StoreError::Backend(format!("lease file {}: {e}", path.display())))?;
    file.try_lock_exclusive().map_err(|e| {
        warn!(path = %path.display(), "write lease is held elsewhere");
        StoreError::WriterBusy(format!("lease {} is held: {e}", path.display()))
    })?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use blessed_identity::NodeSigner;
    use blessed_store_core::{verify_chain, VerifyMode};
    use serde_json::json;
    use tempfile::tempdir;

    fn signer(seed: u8) -> Arc<dyn Signer> {
        Arc::new(NodeSigner::dev(seed))
    }

    fn signal_draft(n: u64) -> EventDraft {
        EventDraft::new("signal.ta.rsi.v1", json!({"asset": "BTC", "n": n}))
    }

    #[tokio::test]
    async fn cold_start_writes_genesis() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.db");
        let journal = SqliteJournal::open(&path, signer(1), JournalConfig::default())
            .await
            .unwrap();
        let genesis = journal.event(0).await.unwrap().unwrap();
        assert_eq!(genesis.seq, 0);
        assert_eq!(genesis.kind, KIND_GENESIS);
        let payload: GenesisPayload = from_value(&genesis.payload).unwrap();
        assert_eq!(
            payload.public_key,
            hex::encode(journal.signer.verifying_key().as_bytes())
        );
    }

    #[tokio::test]
    async fn chain_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.db");
        {
            let journal = SqliteJournal::open(&path, signer(1), JournalConfig::default())
                .await
                .unwrap();
            for n in 0..10 {
                journal.append(signal_draft(n)).await.unwrap();
            }
        }
        let journal = SqliteJournal::open(&path, signer(1), JournalConfig::default())
            .await
            .unwrap();
        assert_eq!(journal.head().await.unwrap().unwrap().0, 10);
        verify_chain(&journal, VerifyMode::Full).await.unwrap();
        // New appends keep chaining from the restored tip.
        let next = journal.append(signal_draft(99)).await.unwrap();
        assert_eq!(next.seq, 11);
    }

    #[tokio::test]
    async fn wrong_identity_is_genesis_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.db");
        {
            SqliteJournal::open(&path, signer(1), JournalConfig::default())
                .await
                .unwrap();
        }
        let err = SqliteJournal::open(&path, signer(2), JournalConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::GenesisMismatch(_)));
    }

    #[tokio::test]
    async fn second_writer_fails_fast() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.db");
        let _first = SqliteJournal::open(&path, signer(1), JournalConfig::default())
            .await
            .unwrap();
        let err = SqliteJournal::open(&path, signer(1), JournalConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::WriterBusy(_)));
    }

    #[tokio::test]
    async fn lease_released_on_drop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.db");
        {
            let journal = SqliteJournal::open(&path, signer(1), JournalConfig::default())
                .await
                .unwrap();
            journal.pool.close().await;
        }
        SqliteJournal::open(&path, signer(1), JournalConfig::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn read_only_sees_data_but_cannot_append() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.db");
        let writer = SqliteJournal::open(&path, signer(1), JournalConfig::default())
            .await
            .unwrap();
        writer.append(signal_draft(1)).await.unwrap();

        let reader = SqliteJournal::open_read_only(&path, signer(1), JournalConfig::default())
            .await
            .unwrap();
        assert_eq!(reader.count().await.unwrap(), 2);
        let err = reader.append(signal_draft(2)).await.unwrap_err();
        assert!(matches!(err, StoreError::WriterBusy(_)));
    }

    #[tokio::test]
    async fn batch_commits_in_order_or_not_at_all() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.db");
        let journal = SqliteJournal::open(&path, signer(1), JournalConfig::default())
            .await
            .unwrap();
        journal
            .append(signal_draft(0).with_dedupe_key("taken"))
            .await
            .unwrap();
        let head_before = journal.head().await.unwrap();

        let drafts = vec![
            signal_draft(1),
            signal_draft(2),
            signal_draft(3).with_dedupe_key("taken"),
        ];
        let err = journal.append_batch(drafts).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateDedupeKey { .. }));
        assert_eq!(journal.head().await.unwrap(), head_before);
        assert_eq!(journal.count().await.unwrap(), 2);

        let ok = journal
            .append_batch(vec![signal_draft(4), signal_draft(5)])
            .await
            .unwrap();
        assert_eq!(ok[0].seq + 1, ok[1].seq);
        assert_eq!(ok[1].prev_hash, ok[0].hash);
    }

    /// Signer that dies after a fixed number of signatures, standing in
    /// for power loss mid-batch.
    struct FailingSigner {
        inner: NodeSigner,
        remaining: std::sync::atomic::AtomicU32,
    }

    impl FailingSigner {
        fn after(n: u32) -> Arc<Self> {
            Arc::new(Self {
                inner: NodeSigner::dev(1),
                remaining: std::sync::atomic::AtomicU32::new(n),
            })
        }
    }

    impl Signer for FailingSigner {
        fn node_id(&self) -> &blessed_types::NodeId {
            self.inner.node_id()
        }
        fn verifying_key(&self) -> ed25519_dalek::VerifyingKey {
            self.inner.verifying_key()
        }
        fn try_sign(
            &self,
            msg: &[u8],
        ) -> Result<ed25519_dalek::Signature, blessed_store_core::SignerError> {
            use std::sync::atomic::Ordering;
            self.remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1))
                .map_err(|_| blessed_store_core::SignerError::Unavailable)?;
            self.inner.try_sign(msg)
        }
    }

    #[tokio::test]
    async fn interrupted_batch_leaves_no_partial_suffix() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.db");

        // 3 committed events (genesis + 2 signals), then a batch of 10
        // that dies between its 7th and 8th element.
        {
            let journal = SqliteJournal::open(&path, signer(1), JournalConfig::default())
                .await
                .unwrap();
            journal.append(signal_draft(1)).await.unwrap();
            journal.append(signal_draft(2)).await.unwrap();
            journal.pool.close().await;
        }
        {
            // Genesis validation costs no signature on reopen; 7 of the
            // batch's 10 drafts sign before the failure.
            let journal = SqliteJournal::open(&path, FailingSigner::after(7), JournalConfig::default())
                .await
                .unwrap();
            let drafts: Vec<_> = (10..20).map(signal_draft).collect();
            let err = journal.append_batch(drafts).await.unwrap_err();
            assert!(matches!(err, StoreError::SignerUnavailable));
            journal.pool.close().await;
        }

        // Reopen: the tip is the last fully-committed event before the
        // batch, no partial suffix exists, and the chain verifies.
        let journal = SqliteJournal::open(&path, signer(1), JournalConfig::default())
            .await
            .unwrap();
        assert_eq!(journal.head().await.unwrap().unwrap().0, 2);
        assert_eq!(journal.count().await.unwrap(), 3);
        verify_chain(&journal, VerifyMode::Full).await.unwrap();
    }

    #[tokio::test]
    async fn checkpoints_and_fast_verify() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.db");
        let config = JournalConfig {
            checkpoint_interval: 20,
            ..Default::default()
        };
        let journal = SqliteJournal::open(&path, signer(1), config).await.unwrap();
        for n in 0..60 {
            journal.append(signal_draft(n)).await.unwrap();
        }
        let checkpoints = journal
            .events_of_kind(KIND_CHECKPOINT, 0, u64::MAX)
            .await
            .unwrap();
        assert!(checkpoints.len() >= 2);

        let report = verify_chain(&journal, VerifyMode::Fast { window: 10 })
            .await
            .unwrap();
        assert_eq!(report.checkpoints_verified, 1);
        assert_eq!(report.events_checked, 10);
    }

    #[tokio::test]
    async fn truncated_middle_fails_fast_verify() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.db");
        let config = JournalConfig {
            checkpoint_interval: 50,
            ..Default::default()
        };
        {
            let journal = SqliteJournal::open(&path, signer(1), config.clone()).await.unwrap();
            for n in 0..200 {
                journal.append(signal_draft(n)).await.unwrap();
            }
            journal.pool.close().await;
        }

        // Attack: carve events out of the middle of the file.
        {
            let url = format!("sqlite://{}?mode=rw", path.display());
            let pool = SqlitePool::connect(&url).await.unwrap();
            sqlx::query("DELETE FROM events WHERE seq BETWEEN 40 AND 150")
                .execute(&pool)
                .await
                .unwrap();
            pool.close().await;
        }

        let journal = SqliteJournal::open_read_only(&path, signer(1), config)
            .await
            .unwrap();
        let err = verify_chain(&journal, VerifyMode::Fast { window: 10 })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ChainBroken { .. }));
    }

    #[tokio::test]
    async fn kill_switch_view_exists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.db");
        let journal = SqliteJournal::open(&path, signer(1), JournalConfig::default())
            .await
            .unwrap();
        journal
            .append(EventDraft::new(
                blessed_types::KIND_KILL_SWITCH,
                json!({"from": "L0_NOMINAL", "to": "L2_DEFENSIVE", "reason": "drill", "actor": "auto"}),
            ))
            .await
            .unwrap();
        let row = sqlx::query("SELECT seq FROM kill_switch")
            .fetch_one(&journal.pool)
            .await
            .unwrap();
        let seq: i64 = row.get("seq");
        assert_eq!(seq, 1);
    }
}
