//! Calibrated reputation scoring.
//!
//! The score is not a submission count. Raw inputs – submissions,
//! acceptance, realized outcomes, Brier calibration of conviction, cloning
//! penalty – are folded as exponentially decayed accumulators with a
//! 30-day half-life, shrunk toward a neutral prior while the sample is
//! small, and smoothed with an EWMA so no single trade can whipsaw a
//! contributor's standing. The denominator of the acceptance term is what
//! was *submitted*, which closes the obvious selection-bias exploit.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use blessed_projections::Projection;
use blessed_store_core::payloads::from_value;
use blessed_store_core::Event;
use blessed_types::{KIND_ATTRIBUTION, KIND_ATTRIBUTION_OUTCOME};

use crate::attribution::{AttributionPayload, OutcomePayload, SignalOutcome};

/// Scoring weights and decay parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Half-life of contribution decay, in days.
    pub half_life_days: f64,
    /// EWMA smoothing factor applied to successive composite scores.
    pub smoothing_alpha: f64,
    /// Shrinkage sample size: scores move from the prior toward the raw
    /// composite as decayed submissions approach this count.
    pub shrinkage_k: f64,
    /// Neutral prior score.
    pub prior: f64,
    /// Weight of the acceptance fraction.
    pub w_acceptance: f64,
    /// Weight of the realized-outcome fraction.
    pub w_outcome: f64,
    /// Weight of the calibration term (`1 - brier`).
    pub w_calibration: f64,
    /// Weight of the signal-diversity term.
    pub w_diversity: f64,
    /// Penalty per decayed cloned submission, subtracted from the
    /// composite.
    pub clone_penalty: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            half_life_days: 30.0,
            smoothing_alpha: 0.2,
            shrinkage_k: 10.0,
            prior: 0.5,
            w_acceptance: 0.35,
            w_outcome: 0.25,
            w_calibration: 0.25,
            w_diversity: 0.15,
            clone_penalty: 0.05,
        }
    }
}

/// Decayed accumulators for one contributor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RawStats {
    submitted: f64,
    accepted: f64,
    realized: f64,
    profitable: f64,
    brier_sum: f64,
    brier_n: f64,
    clones: f64,
    kinds: BTreeSet<String>,
    as_of: Option<DateTime<Utc>>,
    smoothed: Option<f64>,
}

impl RawStats {
    /// Decay every accumulator forward to `now`.
    fn decay_to(&mut self, now: DateTime<Utc>, half_life_days: f64) {
        let Some(as_of) = self.as_of else {
            self.as_of = Some(now);
            return;
        };
        let elapsed_days = (now - as_of).num_seconds().max(0) as f64 / 86_400.0;
        if elapsed_days > 0.0 {
            let factor = 0.5_f64.powf(elapsed_days / half_life_days);
            self.submitted *= factor;
            self.accepted *= factor;
            self.realized *= factor;
            self.profitable *= factor;
            self.brier_sum *= factor;
            self.brier_n *= factor;
            self.clones *= factor;
        }
        self.as_of = Some(now);
    }
}

/// A contributor's published standing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContributorScore {
    /// Contributor id.
    pub contributor_id: String,
    /// Smoothed composite score in `[0, 1]`.
    pub score: f64,
    /// Decayed submission count.
    pub submitted: f64,
    /// Decayed accepted count.
    pub accepted: f64,
    /// Decayed realized-outcome count.
    pub realized: f64,
    /// Decayed profitable-outcome count.
    pub profitable: f64,
    /// Calibration term (`1 - mean brier`), when outcomes exist.
    pub calibration: Option<f64>,
    /// Distinct signal kinds ever submitted.
    pub distinct_kinds: usize,
}

/// Leaderboard view: calibrated scores per contributor, folded from
/// attribution and outcome events.
#[derive(Debug, Default)]
pub struct ScoreBoard {
    config: ScoringConfig,
    stats: BTreeMap<String, RawStats>,
}

impl ScoreBoard {
    /// Board with the given scoring parameters.
    pub fn new(config: ScoringConfig) -> Self {
        Self {
            config,
            stats: BTreeMap::new(),
        }
    }

    /// Current score for a contributor.
    pub fn score(&self, contributor_id: &str) -> Option<ContributorScore> {
        let raw = self.stats.get(contributor_id)?;
        Some(self.render(contributor_id, raw))
    }

    /// All scores, best first; ties broken by contributor id for
    /// deterministic output.
    pub fn leaderboard(&self) -> Vec<ContributorScore> {
        let mut scores: Vec<ContributorScore> = self
            .stats
            .iter()
            .map(|(id, raw)| self.render(id, raw))
            .collect();
        scores.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.contributor_id.cmp(&b.contributor_id))
        });
        scores
    }

    fn render(&self, id: &str, raw: &RawStats) -> ContributorScore {
        ContributorScore {
            contributor_id: id.to_string(),
            score: raw.smoothed.unwrap_or(self.config.prior),
            submitted: raw.submitted,
            accepted: raw.accepted,
            realized: raw.realized,
            profitable: raw.profitable,
            calibration: (raw.brier_n > 0.0).then(|| 1.0 - raw.brier_sum / raw.brier_n),
            distinct_kinds: raw.kinds.len(),
        }
    }

    fn update(&mut self, contributor_id: &str, ts: DateTime<Utc>, f: impl FnOnce(&mut RawStats)) {
        let config = self.config.clone();
        let raw = self.stats.entry(contributor_id.to_string()).or_default();
        raw.decay_to(ts, config.half_life_days);
        f(raw);

        // Shrink toward the prior while the decayed sample is small, then
        // smooth so one event cannot swing the published score.
        let raw_composite = composite(&config, raw);
        let confidence = raw.submitted / (raw.submitted + config.shrinkage_k);
        let shrunk = config.prior + (raw_composite - config.prior) * confidence;
        raw.smoothed = Some(match raw.smoothed {
            Some(previous) => previous + config.smoothing_alpha * (shrunk - previous),
            None => shrunk,
        });
    }
}

/// Composite of the decayed accumulators, before shrinkage/smoothing.
fn composite(c: &ScoringConfig, raw: &RawStats) -> f64 {
    let acceptance = if raw.submitted > 0.0 {
        raw.accepted / raw.submitted
    } else {
        c.prior
    };
    let outcome = if raw.realized > 0.0 {
        raw.profitable / raw.realized
    } else {
        c.prior
    };
    let calibration = if raw.brier_n > 0.0 {
        1.0 - raw.brier_sum / raw.brier_n
    } else {
        c.prior
    };
    let diversity = (raw.kinds.len() as f64 / 3.0).min(1.0);
    let clone_rate = if raw.submitted > 0.0 {
        raw.clones / raw.submitted
    } else {
        0.0
    };

    let score = c.w_acceptance * acceptance
        + c.w_outcome * outcome
        + c.w_calibration * calibration
        + c.w_diversity * diversity
        - c.clone_penalty * clone_rate * 10.0;
    score.clamp(0.0, 1.0)
}

impl Projection for ScoreBoard {
    fn name(&self) -> &'static str {
        "leaderboard"
    }

    fn apply(&mut self, event: &Event) {
        match event.kind.as_str() {
            k if k == KIND_ATTRIBUTION => {
                let payload: AttributionPayload = match from_value(&event.payload) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(seq = event.seq, error = %e, "skipping malformed attribution");
                        return;
                    }
                };
                self.update(&payload.contributor_id, event.ts, |raw| {
                    raw.submitted += 1.0;
                    if payload.accepted {
                        raw.accepted += 1.0;
                    }
                    if payload.clone_of.is_some() {
                        raw.clones += 1.0;
                    }
                    raw.kinds.insert(payload.kind.clone());
                });
            }
            k if k == KIND_ATTRIBUTION_OUTCOME => {
                let payload: OutcomePayload = match from_value(&event.payload) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(seq = event.seq, error = %e, "skipping malformed outcome");
                        return;
                    }
                };
                let target = match payload.outcome {
                    SignalOutcome::Profitable => 1.0,
                    SignalOutcome::Unprofitable => 0.0,
                };
                let brier = (payload.conviction - target).powi(2);
                self.update(&payload.contributor_id, event.ts, |raw| {
                    raw.realized += 1.0;
                    if matches!(payload.outcome, SignalOutcome::Profitable) {
                        raw.profitable += 1.0;
                    }
                    raw.brier_sum += brier;
                    raw.brier_n += 1.0;
                });
            }
            _ => {}
        }
    }

    fn reset(&mut self) {
        self.stats.clear();
    }

    fn state(&self) -> serde_json::Value {
        json!({ "leaderboard": self.leaderboard() })
    }
}
