//! End-to-end cycle behaviour over an in-memory journal: gating, regime
//! transitions, exits, karma isolation, and deadline handling.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use blessed_brain::{Brain, BrainConfig, CycleAction, SignalProducer};
use blessed_identity::NodeSigner;
use blessed_karma::KarmaConfig;
use blessed_killswitch::{AutoTriggers, KillSwitch};
use blessed_store_core::{EventDraft, EventJournal, JournalConfig};
use blessed_store_memory::MemoryJournal;
use blessed_types::{
    KillLevel, TradeMode, KIND_CYCLE_PARTIAL, KIND_INTENT_CLOSE, KIND_INTENT_OPEN,
    KIND_KARMA_INTENT, KIND_KILL_SWITCH, KIND_REGIME_CHANGED,
};

async fn journal() -> Arc<MemoryJournal> {
    // RUST_LOG=debug surfaces phase traces when a test goes sideways.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    Arc::new(
        MemoryJournal::open(Arc::new(NodeSigner::dev(1)), JournalConfig::default())
            .await
            .unwrap(),
    )
}

fn btc_config() -> BrainConfig {
    BrainConfig {
        assets: vec!["BTC".to_string()],
        ..Default::default()
    }
}

async fn append_signal(journal: &MemoryJournal, domain: &str, score: f64, price: f64) {
    journal
        .append(EventDraft::new(
            format!("signal.{domain}.auto.v1"),
            json!({"asset": "BTC", "score": score, "price": price}),
        ))
        .await
        .unwrap();
}

async fn append_strong_signals(journal: &MemoryJournal, price: f64) {
    append_signal(journal, "ta", 0.9, price).await;
    append_signal(journal, "onchain", 0.85, price).await;
    append_signal(journal, "sentiment", 0.8, price).await;
}

async fn append_weak_signals(journal: &MemoryJournal, price: f64) {
    append_signal(journal, "ta", 0.1, price).await;
    append_signal(journal, "onchain", 0.15, price).await;
    append_signal(journal, "sentiment", 0.2, price).await;
}

async fn events_of(journal: &MemoryJournal, kind: &str) -> usize {
    journal
        .events_of_kind(kind, 0, u64::MAX)
        .await
        .unwrap()
        .len()
}

#[tokio::test]
async fn strong_signals_open_a_position_at_nominal() {
    let journal = journal().await;
    append_strong_signals(&journal, 50_000.0).await;

    let mut brain = Brain::new(journal.clone(), btc_config());
    let result = brain.run_cycle(true).await.unwrap();

    assert!(!result.partial);
    assert_eq!(result.kill_level, KillLevel::Nominal);
    assert!(matches!(
        result.outcomes[0].action,
        CycleAction::Opened { .. }
    ));
    assert!(result.outcomes[0].conviction >= 0.7);
    assert_eq!(events_of(&journal, KIND_INTENT_OPEN).await, 1);
    // First classification is a transition from nothing.
    assert_eq!(events_of(&journal, KIND_REGIME_CHANGED).await, 1);
}

#[tokio::test]
async fn regime_transition_emitted_only_once() {
    let journal = journal().await;
    append_strong_signals(&journal, 50_000.0).await;

    let mut brain = Brain::new(journal.clone(), btc_config());
    brain.run_cycle(true).await.unwrap();
    // Same conditions: no second transition event, and no second open for
    // the already-open position.
    append_strong_signals(&journal, 50_100.0).await;
    brain.run_cycle(true).await.unwrap();

    assert_eq!(events_of(&journal, KIND_REGIME_CHANGED).await, 1);
    assert_eq!(events_of(&journal, KIND_INTENT_OPEN).await, 1);
}

#[tokio::test]
async fn defensive_level_blocks_entries() {
    let journal = journal().await;
    append_strong_signals(&journal, 50_000.0).await;

    // Raise to L2 before the cycle.
    let ks = KillSwitch::restore(journal.as_ref(), u64::MAX, AutoTriggers::default())
        .await
        .unwrap();
    journal
        .append(
            ks.escalate_draft(KillLevel::Defensive, "drill", "auto")
                .unwrap(),
        )
        .await
        .unwrap();

    let mut brain = Brain::new(journal.clone(), btc_config());
    let result = brain.run_cycle(true).await.unwrap();

    assert_eq!(result.kill_level, KillLevel::Defensive);
    assert!(matches!(
        result.outcomes[0].action,
        CycleAction::Skipped { .. }
    ));
    assert_eq!(events_of(&journal, KIND_INTENT_OPEN).await, 0);
}

#[tokio::test]
async fn collapsed_conviction_closes_and_paper_mode_creates_no_karma() {
    let journal = journal().await;
    append_strong_signals(&journal, 50_000.0).await;

    // Karma enabled, but the system runs on paper.
    let mut config = btc_config();
    config.karma = KarmaConfig {
        enabled: true,
        percentage: 0.1,
        destination: "dest".into(),
    };
    config.mode = TradeMode::Paper;

    let mut brain = Brain::new(journal.clone(), config);
    brain.run_cycle(true).await.unwrap();
    assert_eq!(events_of(&journal, KIND_INTENT_OPEN).await, 1);

    // Conviction collapses at a higher price: the long closes profitably.
    append_weak_signals(&journal, 52_000.0).await;
    let result = brain.run_cycle(true).await.unwrap();
    assert!(matches!(
        result.outcomes[0].action,
        CycleAction::Closed { .. }
    ));
    assert_eq!(events_of(&journal, KIND_INTENT_CLOSE).await, 1);

    // Paper mode: no karma intents, ever.
    assert_eq!(events_of(&journal, KIND_KARMA_INTENT).await, 0);
}

#[tokio::test]
async fn live_profit_creates_karma_intent() {
    let journal = journal().await;
    append_strong_signals(&journal, 50_000.0).await;

    let mut config = btc_config();
    config.karma = KarmaConfig {
        enabled: true,
        percentage: 0.1,
        destination: "dest".into(),
    };
    config.mode = TradeMode::Live;

    let mut brain = Brain::new(journal.clone(), config);
    brain.run_cycle(true).await.unwrap();

    append_weak_signals(&journal, 52_000.0).await;
    let result = brain.run_cycle(true).await.unwrap();
    assert!(matches!(
        result.outcomes[0].action,
        CycleAction::Closed { .. }
    ));
    assert_eq!(events_of(&journal, KIND_KARMA_INTENT).await, 1);
}

#[tokio::test]
async fn crisis_auto_escalates_and_refuses_intents() {
    let journal = journal().await;
    // Disorderly conditions: high volatility, destroyed sentiment, strong
    // scores nowhere.
    append_signal(&journal, "vol", 0.95, 50_000.0).await;
    append_signal(&journal, "sentiment", 0.1, 50_000.0).await;
    append_signal(&journal, "ta", 0.9, 50_000.0).await;
    append_signal(&journal, "onchain", 0.9, 50_000.0).await;

    let mut brain = Brain::new(journal.clone(), btc_config());
    let result = brain.run_cycle(true).await.unwrap();

    // Crisis classification escalates to lockdown inside the same cycle,
    // and the decision phase honors the escalated level.
    assert_eq!(result.kill_level, KillLevel::Lockdown);
    assert_eq!(events_of(&journal, KIND_KILL_SWITCH).await, 1);
    assert_eq!(events_of(&journal, KIND_INTENT_OPEN).await, 0);

    // The escalated level survives into a fresh state machine (restart).
    let restored = KillSwitch::restore(journal.as_ref(), u64::MAX, AutoTriggers::default())
        .await
        .unwrap();
    assert_eq!(restored.level(), KillLevel::Lockdown);
}

struct SlowProducer;

#[async_trait]
impl SignalProducer for SlowProducer {
    fn name(&self) -> &str {
        "slow"
    }
    fn domain(&self) -> &str {
        "ta"
    }
    async fn fetch(&self, _assets: &[String]) -> anyhow::Result<Vec<EventDraft>> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(vec![])
    }
}

#[tokio::test(start_paused = true)]
async fn deadline_produces_partial_cycle() {
    let journal = journal().await;
    append_strong_signals(&journal, 50_000.0).await;

    let mut config = btc_config();
    config.cycle_deadline_ms = 100;
    config.phase_deadline_ms = 50;

    let mut brain = Brain::new(journal.clone(), config).with_producers(vec![
        Arc::new(SlowProducer),
        Arc::new(SlowProducer),
        Arc::new(SlowProducer),
    ]);
    // Two timed-out refreshes burn the whole budget; the third never runs.
    let result = brain.run_cycle(true).await.unwrap();

    assert!(result.partial);
    assert!(result.outcomes.is_empty());
    assert_eq!(events_of(&journal, KIND_CYCLE_PARTIAL).await, 1);
    assert_eq!(events_of(&journal, KIND_INTENT_OPEN).await, 0);
}

#[tokio::test]
async fn weight_adjustment_suppressed_during_cold_start() {
    let journal = journal().await;
    let brain = Brain::new(journal.clone(), btc_config());
    let result = brain
        .adjust_weights(BTreeMap::from([("ta".to_string(), 0.35)]), "weekly")
        .await
        .unwrap();
    // The journal was born moments ago.
    assert!(result.is_none());
}
