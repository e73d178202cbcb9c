#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **blessed-brain** – Brain-cycle orchestrator for the Blessed ledger.
//!
//! One cycle is a single cooperative pass over a snapshot of the log:
//! collection → quality → synthesis → regime → conviction → decision.
//! Every phase reads events at or below the sequence number captured at
//! cycle start; the kill-switch level is read from that same snapshot (and
//! from any escalation this cycle itself appended), so a disarm racing the
//! decision phase cannot slip an intent through. Cycles carry a hard
//! deadline: on expiry the current asset is finished, a
//! `cycle.partial.v1` is appended, and nothing is retried automatically.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use blessed_karma::{intent_for_close, KarmaError};
use blessed_killswitch::{AutoTriggers, KillSwitch, KillSwitchError, KillSwitchPayload};
use blessed_projections::positions::{CloseIntentPayload, OpenIntentPayload};
use blessed_projections::weights::{WEIGHT_DELTA_MAX, WEIGHT_MAX, WEIGHT_MIN};
use blessed_projections::{
    replay, PositionsProjection, Projection, ProjectionError, RegimeProjection, UpcasterRegistry,
    WeightsProjection,
};
use blessed_store_core::payloads::to_value;
use blessed_store_core::{Event, EventDraft, EventJournal, StoreError};
use blessed_types::{
    is_signal_kind, Direction, KillLevel, Regime, KIND_CYCLE_PARTIAL, KIND_INTENT_CLOSE,
    KIND_INTENT_OPEN, KIND_KILL_SWITCH, KIND_REGIME_CHANGED, KIND_WEIGHTS_ADJUSTED, SIGNAL_PREFIX,
};

pub mod config;
pub mod cycle;
pub mod producer;

pub use config::BrainConfig;
pub use cycle::{classify_regime, collect, conviction, quality, regime_features, synthesize};
pub use producer::{fetch_with_deadline, FetchOutcome, SignalProducer};

//─────────────────────────────
//  Errors
//─────────────────────────────

/// Orchestrator errors. Deadline expiry is *not* an error – it produces a
/// partial cycle result.
#[derive(Debug, thiserror::Error)]
pub enum BrainError {
    /// Journal failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Kill-switch state could not be read; the cycle refuses to run.
    #[error(transparent)]
    KillSwitch(#[from] KillSwitchError),
    /// Karma policy failure.
    #[error(transparent)]
    Karma(#[from] KarmaError),
    /// Projection rebuild failure.
    #[error(transparent)]
    Projection(#[from] ProjectionError),
}

//─────────────────────────────
//  Cycle result
//─────────────────────────────

/// What the decision phase did for one asset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum CycleAction {
    /// An opening intent was appended.
    Opened {
        /// New position id.
        position_id: String,
    },
    /// A closing intent was appended.
    Closed {
        /// Closed position id.
        position_id: String,
    },
    /// Nothing met a threshold.
    Held,
    /// The asset could not be evaluated.
    Skipped {
        /// Why.
        reason: String,
    },
}

/// Per-asset cycle outcome.
#[derive(Debug, Clone, Serialize)]
pub struct AssetOutcome {
    /// Asset symbol.
    pub asset: String,
    /// Per-Component Score, when synthesis produced one.
    pub pcs: Option<f64>,
    /// Counter-thesis score.
    pub cts: f64,
    /// Final conviction.
    pub conviction: f64,
    /// Decision taken.
    pub action: CycleAction,
}

/// Summary of one cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleResult {
    /// Cycle identifier.
    pub cycle_id: Uuid,
    /// Snapshot sequence the cycle read against.
    pub snapshot_seq: u64,
    /// Kill-switch level that gated the decision phase.
    pub kill_level: KillLevel,
    /// Regime classified this cycle.
    pub regime: Regime,
    /// Classifier confidence.
    pub regime_confidence: f64,
    /// Whether the cycle hit its deadline and stopped early.
    pub partial: bool,
    /// Per-asset outcomes, in configuration order.
    pub outcomes: Vec<AssetOutcome>,
    /// Sequence numbers of every event this cycle appended.
    pub emitted_seqs: Vec<u64>,
}

//─────────────────────────────
//  Orchestrator
//─────────────────────────────

/// The cycle orchestrator.
///
/// A single cooperative task inside the writer process: constructed once
/// with its immutable configuration and injected collaborators, then
/// driven on a schedule or by explicit operator invocation.
pub struct Brain {
    journal: Arc<dyn EventJournal>,
    config: BrainConfig,
    triggers: AutoTriggers,
    upcasters: Arc<UpcasterRegistry>,
    producers: Vec<Arc<dyn SignalProducer>>,
    failure_counts: HashMap<String, u32>,
}

impl Brain {
    /// Construct an orchestrator over a journal.
    pub fn new(journal: Arc<dyn EventJournal>, config: BrainConfig) -> Self {
        Self {
            journal,
            config,
            triggers: AutoTriggers::default(),
            upcasters: Arc::new(UpcasterRegistry::new()),
            producers: Vec::new(),
            failure_counts: HashMap::new(),
        }
    }

    /// Attach external signal producers.
    pub fn with_producers(mut self, producers: Vec<Arc<dyn SignalProducer>>) -> Self {
        self.producers = producers;
        self
    }

    /// Override the automatic kill-switch triggers.
    pub fn with_triggers(mut self, triggers: AutoTriggers) -> Self {
        self.triggers = triggers;
        self
    }

    /// Attach a schema upcaster registry for projection rebuilds.
    pub fn with_upcasters(mut self, upcasters: Arc<UpcasterRegistry>) -> Self {
        self.upcasters = upcasters;
        self
    }

    /// Run one cycle. `full` replays the entire signal history during
    /// collection instead of the recent window.
    pub async fn run_cycle(&mut self, full: bool) -> Result<CycleResult, BrainError> {
        let started = Instant::now();
        let deadline = self.config.cycle_deadline();
        let cycle_id = Uuid::new_v4();
        let mut emitted_seqs = Vec::new();

        // Producer refresh happens before the snapshot so fresh signals are
        // visible to this cycle, not the next one.
        self.refresh_producers(started, &mut emitted_seqs).await?;

        let (snapshot_seq, _) = self
            .journal
            .head()
            .await?
            .ok_or_else(|| StoreError::GenesisMismatch("journal is empty".into()))?;
        let now = Utc::now();
        debug!(%cycle_id, snapshot_seq, "cycle snapshot captured");

        // Rebuild the views this cycle reads, bounded by the snapshot.
        let mut positions = PositionsProjection::new();
        let mut regime_view = RegimeProjection::new();
        let mut weights_view =
            WeightsProjection::with_defaults(self.config.default_weights.clone());
        replay(
            self.journal.as_ref(),
            0,
            snapshot_seq,
            self.upcasters.as_ref(),
            &mut [&mut positions, &mut regime_view, &mut weights_view],
        )
        .await?;

        // Collection.
        let collection_from = if full {
            0
        } else {
            snapshot_seq.saturating_sub(self.config.collection_window_events)
        };
        let signal_events = self
            .journal
            .events_of_kind(SIGNAL_PREFIX, collection_from, snapshot_seq)
            .await?;
        let observations = collect(&signal_events);

        // Quality.
        let report = quality(observations, now, &self.config);
        for stale in &report.stale {
            let draft = EventDraft::new(
                "producer_health.stale.v1",
                json!({
                    "domain": stale.domain,
                    "source": stale.source,
                    "age_secs": stale.age_secs,
                }),
            )
            .with_trace_id(cycle_id.to_string());
            emitted_seqs.push(self.journal.append(draft).await?.seq);
        }

        // Synthesis and conviction per asset.
        let weights = weights_view.current().clone();
        let mut evaluations = Vec::new();
        for asset in &self.config.assets {
            let synthesis = synthesize(asset, &report.accepted, &weights);
            let convictions = synthesis
                .as_ref()
                .map(|s| conviction(s, &weights, self.config.cts_trigger));
            evaluations.push((asset.clone(), synthesis, convictions));
        }

        // Regime.
        let features = regime_features(&report.accepted);
        let (regime, regime_confidence) = classify_regime(features);
        if regime_view.current().map(|(r, _)| r) != Some(regime) {
            let draft = EventDraft::new(
                KIND_REGIME_CHANGED,
                json!({
                    "regime": regime,
                    "confidence": regime_confidence,
                    "features": features,
                }),
            )
            .with_trace_id(cycle_id.to_string());
            let event = self.journal.append(draft).await?;
            info!(seq = event.seq, regime = %regime, "regime transition");
            emitted_seqs.push(event.seq);
        }

        // Kill switch: restore at the snapshot, then fold in any automatic
        // escalation this cycle warrants. The gate level is the maximum of
        // both, so a concurrent disarm cannot widen this cycle's authority.
        let ks = KillSwitch::restore(self.journal.as_ref(), snapshot_seq, self.triggers.clone())
            .await?;
        let today = now.format("%Y-%m-%d").to_string();
        let mut gate_level = ks.level();
        if let Some((target, reason)) =
            ks.evaluate_auto(&positions, &today, Some((regime, regime_confidence)))
        {
            let draft = ks.escalate_draft(target, reason.clone(), "auto")?;
            let event = self.journal.append(draft).await?;
            warn!(seq = event.seq, level = %target, %reason, "automatic kill-switch escalation");
            emitted_seqs.push(event.seq);
            gate_level = target;
        }

        // Decision, under the cycle deadline.
        let mut outcomes = Vec::new();
        let mut partial = false;
        for (asset, synthesis, convictions) in evaluations {
            if started.elapsed() >= deadline {
                partial = true;
                let draft = EventDraft::new(
                    KIND_CYCLE_PARTIAL,
                    json!({
                        "cycle_id": cycle_id.to_string(),
                        "phase": "decision",
                        "completed_assets": outcomes
                            .iter()
                            .map(|o: &AssetOutcome| o.asset.clone())
                            .collect::<Vec<_>>(),
                    }),
                );
                emitted_seqs.push(self.journal.append(draft).await?.seq);
                break;
            }
            let outcome = self
                .decide(
                    &asset,
                    synthesis.as_ref(),
                    convictions.as_ref(),
                    &features,
                    regime,
                    gate_level,
                    &positions,
                    cycle_id,
                    &mut emitted_seqs,
                )
                .await?;
            outcomes.push(outcome);
        }

        Ok(CycleResult {
            cycle_id,
            snapshot_seq,
            kill_level: gate_level,
            regime,
            regime_confidence,
            partial,
            outcomes,
            emitted_seqs,
        })
    }

    /// Fetch from each producer under a deadline and append what arrived.
    async fn refresh_producers(
        &mut self,
        started: Instant,
        emitted_seqs: &mut Vec<u64>,
    ) -> Result<(), BrainError> {
        let producers = self.producers.clone();
        for producer in producers {
            let remaining = self
                .config
                .cycle_deadline()
                .saturating_sub(started.elapsed());
            if remaining.is_zero() {
                warn!("cycle budget exhausted before all producers were refreshed");
                break;
            }
            let fetch_deadline = self.config.phase_deadline().min(remaining);
            match fetch_with_deadline(producer.as_ref(), &self.config.assets, fetch_deadline).await
            {
                FetchOutcome::Produced(drafts) => {
                    self.failure_counts.remove(producer.name());
                    let valid: Vec<EventDraft> = drafts
                        .into_iter()
                        .filter(|draft| {
                            let ok = is_signal_kind(&draft.kind);
                            if !ok {
                                warn!(producer = producer.name(), kind = %draft.kind,
                                      "producer emitted a non-signal kind; dropped");
                            }
                            ok
                        })
                        .collect();
                    if !valid.is_empty() {
                        for event in self.journal.append_batch(valid).await? {
                            emitted_seqs.push(event.seq);
                        }
                    }
                }
                FetchOutcome::Failed(_) | FetchOutcome::TimedOut => {
                    let count = self
                        .failure_counts
                        .entry(producer.name().to_string())
                        .and_modify(|c| *c += 1)
                        .or_insert(1);
                    if *count >= self.config.max_consecutive_failures {
                        let draft = EventDraft::new(
                            "producer_health.failing.v1",
                            json!({
                                "producer": producer.name(),
                                "domain": producer.domain(),
                                "consecutive_failures": *count,
                            }),
                        );
                        emitted_seqs.push(self.journal.append(draft).await?.seq);
                    }
                }
            }
        }
        Ok(())
    }

    /// The decision phase for one asset.
    #[allow(clippy::too_many_arguments)]
    async fn decide(
        &self,
        asset: &str,
        synthesis: Option<&cycle::Synthesis>,
        convictions: Option<&cycle::Conviction>,
        features: &cycle::RegimeFeatures,
        regime: Regime,
        gate_level: KillLevel,
        positions: &PositionsProjection,
        cycle_id: Uuid,
        emitted_seqs: &mut Vec<u64>,
    ) -> Result<AssetOutcome, BrainError> {
        let (pcs, cts, conviction_value) = match convictions {
            Some(c) => (Some(c.pcs), c.cts, c.value),
            None => (None, 0.0, 0.0),
        };
        let mut outcome = AssetOutcome {
            asset: asset.to_string(),
            pcs,
            cts,
            conviction: conviction_value,
            action: CycleAction::Held,
        };

        if let Some(position) = positions.open_for_asset(asset) {
            // Exits are permitted below lockdown.
            if conviction_value < self.config.exit_threshold {
                if !gate_level.allows_exits() {
                    outcome.action = CycleAction::Skipped {
                        reason: format!("exit blocked at {gate_level}"),
                    };
                    return Ok(outcome);
                }
                let exit = synthesis.and_then(|s| s.price).unwrap_or(position.entry);
                let direction_sign = match position.direction {
                    Direction::Long => 1.0,
                    Direction::Short => -1.0,
                };
                let realized_pnl = if position.entry != 0.0 {
                    direction_sign * (exit - position.entry) / position.entry * position.size
                } else {
                    0.0
                };
                let payload = CloseIntentPayload {
                    position_id: position.id.clone(),
                    exit,
                    realized_pnl,
                    reason: format!("conviction {conviction_value:.2} below exit threshold"),
                };
                let draft = EventDraft::new(KIND_INTENT_CLOSE, to_value(&payload)?)
                    .with_trace_id(cycle_id.to_string());
                let close_event = self.journal.append(draft).await?;
                emitted_seqs.push(close_event.seq);
                outcome.action = CycleAction::Closed {
                    position_id: payload.position_id.clone(),
                };

                // Realized live gains may create a karma obligation.
                if let Some(karma_draft) =
                    intent_for_close(&self.config.karma, self.config.mode, &close_event)?
                {
                    emitted_seqs.push(self.journal.append(karma_draft).await?.seq);
                }
            }
            return Ok(outcome);
        }

        // Entries require nominal level and a conviction above threshold.
        if conviction_value < self.config.entry_threshold {
            return Ok(outcome);
        }
        if !gate_level.allows_entries() {
            outcome.action = CycleAction::Skipped {
                reason: format!("entry blocked at {gate_level}"),
            };
            return Ok(outcome);
        }
        let Some(price) = synthesis.and_then(|s| s.price) else {
            outcome.action = CycleAction::Skipped {
                reason: "no reference price".to_string(),
            };
            return Ok(outcome);
        };

        let size = self.config.base_size
            * conviction_value
            * self.config.regime_leverage_cap(regime);
        if size <= 0.0 {
            outcome.action = CycleAction::Skipped {
                reason: format!("regime {regime} caps size to zero"),
            };
            return Ok(outcome);
        }

        // Stop and target from the volatility band around the entry.
        let band = price * (0.02 + 0.08 * features.volatility);
        let direction = if features.trend >= 0.5 {
            Direction::Long
        } else {
            Direction::Short
        };
        let (stop, target) = match direction {
            Direction::Long => (
                price - band * self.config.stop_band_mult,
                price + band * self.config.target_band_mult,
            ),
            Direction::Short => (
                price + band * self.config.stop_band_mult,
                price - band * self.config.target_band_mult,
            ),
        };
        let payload = OpenIntentPayload {
            position_id: Uuid::new_v4().to_string(),
            asset: asset.to_string(),
            direction,
            entry: price,
            size,
            stop,
            target,
            conviction: conviction_value,
        };
        let draft = EventDraft::new(KIND_INTENT_OPEN, to_value(&payload)?)
            .with_trace_id(cycle_id.to_string());
        let event = self.journal.append(draft).await?;
        info!(seq = event.seq, asset, conviction = conviction_value, "opening intent emitted");
        emitted_seqs.push(event.seq);
        outcome.action = CycleAction::Opened {
            position_id: payload.position_id,
        };
        Ok(outcome)
    }

    /// Propose a weekly weight adjustment.
    ///
    /// Cold-start journals (younger than the configured threshold) suppress
    /// adjustment entirely; warm journals halve the permitted step. Each
    /// domain moves at most the permitted delta from its current value and
    /// stays inside the global band.
    pub async fn adjust_weights(
        &self,
        proposed: BTreeMap<String, f64>,
        reason: &str,
    ) -> Result<Option<Event>, BrainError> {
        let genesis = self
            .journal
            .event(0)
            .await?
            .ok_or_else(|| StoreError::GenesisMismatch("no genesis".into()))?;
        let age_days = (Utc::now() - genesis.ts).num_days();
        if age_days < self.config.weight_cold_start_days {
            info!(age_days, "weight adjustment suppressed during cold start");
            return Ok(None);
        }
        let delta_cap = if age_days < self.config.weight_warm_days {
            WEIGHT_DELTA_MAX / 2.0
        } else {
            WEIGHT_DELTA_MAX
        };

        let mut weights_view =
            WeightsProjection::with_defaults(self.config.default_weights.clone());
        for event in self
            .journal
            .events_of_kind(KIND_WEIGHTS_ADJUSTED, 0, u64::MAX)
            .await?
        {
            weights_view.apply(&event);
        }
        let current = weights_view.current().clone();

        let adjusted = clamp_adjustment(&current, &proposed, delta_cap);
        let draft = EventDraft::new(
            KIND_WEIGHTS_ADJUSTED,
            json!({"weights": adjusted, "reason": reason}),
        );
        Ok(Some(self.journal.append(draft).await?))
    }

    /// Read the kill-switch payload of the latest transition, if any.
    /// Convenience for operators inspecting gate state.
    pub async fn kill_switch_status(&self) -> Result<Option<KillSwitchPayload>, BrainError> {
        let event = self
            .journal
            .latest_of_kind(KIND_KILL_SWITCH, u64::MAX)
            .await?;
        match event {
            Some(event) => Ok(Some(blessed_store_core::payloads::from_value(
                &event.payload,
            )?)),
            None => Ok(None),
        }
    }
}

/// Clamp a proposed weight vector: each domain moves at most `delta_cap`
/// from its current value and stays inside the global band.
fn clamp_adjustment(
    current: &BTreeMap<String, f64>,
    proposed: &BTreeMap<String, f64>,
    delta_cap: f64,
) -> BTreeMap<String, f64> {
    proposed
        .iter()
        .map(|(domain, &want)| {
            let base = current
                .get(domain)
                .copied()
                .unwrap_or_else(|| want.clamp(WEIGHT_MIN, WEIGHT_MAX));
            let stepped = want
                .clamp(base - delta_cap, base + delta_cap)
                .clamp(WEIGHT_MIN, WEIGHT_MAX);
            (domain.clone(), stepped)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adjustment_steps_are_bounded() {
        let current = BTreeMap::from([("ta".to_string(), 0.30), ("onchain".to_string(), 0.20)]);
        let proposed = BTreeMap::from([
            ("ta".to_string(), 0.40),      // wants +0.10
            ("onchain".to_string(), 0.19), // wants -0.01
        ]);
        let adjusted = clamp_adjustment(&current, &proposed, WEIGHT_DELTA_MAX);
        assert!((adjusted["ta"] - 0.32).abs() < 1e-12);
        assert!((adjusted["onchain"] - 0.19).abs() < 1e-12);
    }

    #[test]
    fn adjustment_respects_global_band() {
        let current = BTreeMap::from([("ta".to_string(), 0.40)]);
        let proposed = BTreeMap::from([("ta".to_string(), 0.42)]);
        let adjusted = clamp_adjustment(&current, &proposed, WEIGHT_DELTA_MAX);
        assert_eq!(adjusted["ta"], WEIGHT_MAX);

        let current = BTreeMap::from([("ta".to_string(), 0.05)]);
        let proposed = BTreeMap::from([("ta".to_string(), 0.01)]);
        let adjusted = clamp_adjustment(&current, &proposed, WEIGHT_DELTA_MAX);
        assert_eq!(adjusted["ta"], WEIGHT_MIN);
    }

    #[test]
    fn new_domains_enter_clamped_without_step_limit() {
        let current = BTreeMap::new();
        let proposed = BTreeMap::from([("fresh".to_string(), 0.25)]);
        let adjusted = clamp_adjustment(&current, &proposed, WEIGHT_DELTA_MAX);
        assert_eq!(adjusted["fresh"], 0.25);
    }
}
