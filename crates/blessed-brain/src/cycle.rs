//! Pure phase computations: collection parsing, quality filtering,
//! synthesis (PCS), regime classification, and counter-thesis scoring.
//!
//! Everything here is deterministic over its inputs; the orchestrator in
//! `lib.rs` owns journal access, deadlines and event emission.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use blessed_store_core::Event;
use blessed_types::{signal_domain, Regime};

use crate::config::BrainConfig;

//─────────────────────────────
//  Collection
//─────────────────────────────

/// One parsed signal observation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalObs {
    /// Sequence number of the signal event.
    pub seq: u64,
    /// Commit timestamp of the signal event.
    pub ts: DateTime<Utc>,
    /// Producer domain parsed from the kind.
    pub domain: String,
    /// Full event kind.
    pub kind: String,
    /// Producer identifier, when the event carried one.
    pub source: Option<String>,
    /// Asset the signal speaks about.
    pub asset: String,
    /// Normalized score in `[0, 1]`, when present.
    pub score: Option<f64>,
    /// Reference price, when present.
    pub price: Option<f64>,
}

/// Parse `signal.*` events into observations. Events without an `asset`
/// field or an extractable domain are dropped here; they cannot feed any
/// later phase.
pub fn collect(events: &[Event]) -> Vec<SignalObs> {
    events
        .iter()
        .filter_map(|event| {
            let domain = signal_domain(&event.kind)?.to_string();
            let asset = event.payload.get("asset")?.as_str()?.to_string();
            let score = event
                .payload
                .get("score")
                .and_then(|v| v.as_f64())
                .filter(|s| (0.0..=1.0).contains(s));
            let price = event.payload.get("price").and_then(|v| v.as_f64());
            Some(SignalObs {
                seq: event.seq,
                ts: event.ts,
                domain,
                kind: event.kind.clone(),
                source: event.source.clone(),
                asset,
                score,
                price,
            })
        })
        .collect()
}

//─────────────────────────────
//  Quality
//─────────────────────────────

/// A producer whose newest signal exceeded its freshness window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StaleProducer {
    /// Producer domain.
    pub domain: String,
    /// Producer identifier, when known.
    pub source: Option<String>,
    /// Age of the newest observation, in seconds.
    pub age_secs: i64,
}

/// Outcome of the quality phase.
#[derive(Debug, Default)]
pub struct QualityReport {
    /// Observations admitted into synthesis.
    pub accepted: Vec<SignalObs>,
    /// Producers excluded for staleness.
    pub stale: Vec<StaleProducer>,
}

/// Apply staleness thresholds. Of each `(asset, domain, source)` stream
/// only the newest observation is considered; it is admitted when its age
/// at cycle start is inside the domain's freshness window.
pub fn quality(observations: Vec<SignalObs>, now: DateTime<Utc>, config: &BrainConfig) -> QualityReport {
    let mut newest: BTreeMap<(String, String, Option<String>), SignalObs> = BTreeMap::new();
    for obs in observations {
        let key = (obs.asset.clone(), obs.domain.clone(), obs.source.clone());
        match newest.get(&key) {
            Some(existing) if existing.seq >= obs.seq => {}
            _ => {
                newest.insert(key, obs);
            }
        }
    }

    let mut report = QualityReport::default();
    for obs in newest.into_values() {
        let age_secs = (now - obs.ts).num_seconds();
        let window = config.freshness_for(&obs.domain) as i64;
        if age_secs > window {
            report.stale.push(StaleProducer {
                domain: obs.domain,
                source: obs.source,
                age_secs,
            });
        } else {
            report.accepted.push(obs);
        }
    }
    report
}

//─────────────────────────────
//  Synthesis (PCS)
//─────────────────────────────

/// Per-asset synthesis output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Synthesis {
    /// Per-Component Score: weighted sum over domain scores, in `[0, 1]`.
    pub pcs: f64,
    /// Mean score per contributing domain.
    pub domain_scores: BTreeMap<String, f64>,
    /// Newest reference price across the asset's observations.
    pub price: Option<f64>,
}

/// Compute the PCS for one asset from accepted observations.
///
/// Weights are normalized over the domains actually present, so a missing
/// producer narrows the evidence base instead of silently deflating the
/// score. Returns `None` when no scored observation exists for the asset.
pub fn synthesize(
    asset: &str,
    accepted: &[SignalObs],
    weights: &BTreeMap<String, f64>,
) -> Option<Synthesis> {
    let mut sums: BTreeMap<String, (f64, f64)> = BTreeMap::new();
    let mut price: Option<(u64, f64)> = None;
    for obs in accepted.iter().filter(|o| o.asset == asset) {
        if let Some(score) = obs.score {
            let entry = sums.entry(obs.domain.clone()).or_insert((0.0, 0.0));
            entry.0 += score;
            entry.1 += 1.0;
        }
        if let Some(p) = obs.price {
            if price.map_or(true, |(seq, _)| obs.seq > seq) {
                price = Some((obs.seq, p));
            }
        }
    }
    if sums.is_empty() {
        return None;
    }

    let domain_scores: BTreeMap<String, f64> = sums
        .into_iter()
        .map(|(domain, (total, n))| (domain, total / n))
        .collect();

    let mut weighted = 0.0;
    let mut weight_total = 0.0;
    for (domain, score) in &domain_scores {
        let w = weights.get(domain).copied().unwrap_or(0.0);
        weighted += w * score;
        weight_total += w;
    }
    if weight_total == 0.0 {
        return None;
    }
    Some(Synthesis {
        pcs: (weighted / weight_total).clamp(0.0, 1.0),
        domain_scores,
        price: price.map(|(_, p)| p),
    })
}

//─────────────────────────────
//  Regime classification
//─────────────────────────────

/// Portfolio-level feature vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RegimeFeatures {
    /// Trend strength, mean `ta` score.
    pub trend: f64,
    /// Basis / funding proxy, mean `basis` score.
    pub basis: f64,
    /// Volatility level, mean `vol` score.
    pub volatility: f64,
    /// Sentiment, mean `sentiment` score.
    pub sentiment: f64,
}

/// Derive the feature vector from all accepted observations. Missing
/// domains default to a neutral 0.5.
pub fn regime_features(accepted: &[SignalObs]) -> RegimeFeatures {
    let mean_of = |domain: &str| -> f64 {
        let scores: Vec<f64> = accepted
            .iter()
            .filter(|o| o.domain == domain)
            .filter_map(|o| o.score)
            .collect();
        if scores.is_empty() {
            0.5
        } else {
            scores.iter().sum::<f64>() / scores.len() as f64
        }
    };
    RegimeFeatures {
        trend: mean_of("ta"),
        basis: mean_of("basis"),
        volatility: mean_of("vol"),
        sentiment: mean_of("sentiment"),
    }
}

/// Deterministic rule-table classification.
pub fn classify_regime(f: RegimeFeatures) -> (Regime, f64) {
    if f.volatility >= 0.75 && f.sentiment <= 0.35 {
        let confidence = (0.6 + (f.volatility - 0.75) + (0.35 - f.sentiment)).clamp(0.0, 1.0);
        return (Regime::Crisis, confidence);
    }
    if f.trend >= 0.65 && f.basis >= 0.55 {
        let confidence = (0.5 + (f.trend - 0.65) + (f.basis - 0.55)).clamp(0.0, 1.0);
        return (Regime::Bull, confidence);
    }
    if f.trend >= 0.55 {
        return (Regime::EarlyBull, (0.5 + (f.trend - 0.55)).clamp(0.0, 1.0));
    }
    if f.trend <= 0.35 {
        return (Regime::Bear, (0.5 + (0.35 - f.trend)).clamp(0.0, 1.0));
    }
    (Regime::Chop, 0.5)
}

//─────────────────────────────
//  Conviction (CTS)
//─────────────────────────────

/// Counter-thesis scoring output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Conviction {
    /// PCS input.
    pub pcs: f64,
    /// Counter-thesis score subtracted from the PCS.
    pub cts: f64,
    /// Final conviction, `clamp(pcs - cts, 0, 1)`.
    pub value: f64,
    /// Opposing domains and their contribution to the CTS.
    pub counter_factors: BTreeMap<String, f64>,
}

/// Apply counter-thesis scoring: above the trigger, every domain scoring
/// below neutral contributes its weighted distance from 0.5 as explicit
/// opposing evidence.
pub fn conviction(
    synthesis: &Synthesis,
    weights: &BTreeMap<String, f64>,
    cts_trigger: f64,
) -> Conviction {
    if synthesis.pcs < cts_trigger {
        return Conviction {
            pcs: synthesis.pcs,
            cts: 0.0,
            value: synthesis.pcs.clamp(0.0, 1.0),
            counter_factors: BTreeMap::new(),
        };
    }

    let weight_total: f64 = synthesis
        .domain_scores
        .keys()
        .map(|d| weights.get(d).copied().unwrap_or(0.0))
        .sum();
    let mut counter_factors = BTreeMap::new();
    let mut cts = 0.0;
    if weight_total > 0.0 {
        for (domain, score) in &synthesis.domain_scores {
            if *score < 0.5 {
                let w = weights.get(domain).copied().unwrap_or(0.0) / weight_total;
                let contribution = (0.5 - score) * w;
                counter_factors.insert(domain.clone(), contribution);
                cts += contribution;
            }
        }
    }
    Conviction {
        pcs: synthesis.pcs,
        cts,
        value: (synthesis.pcs - cts).clamp(0.0, 1.0),
        counter_factors,
    }
}
