//! Domain-weight view: the synthesis weight vector as a fold over
//! adjustment events.
//!
//! The vector itself is derived state; the brain proposes adjustments as
//! `weights.adjusted.v1` events and this view folds them, clamping into the
//! permitted band so the invariant holds even against historical payloads.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use blessed_store_core::payloads::from_value;
use blessed_store_core::Event;
use blessed_types::KIND_WEIGHTS_ADJUSTED;

use crate::Projection;

/// Lower clamp for any domain weight.
pub const WEIGHT_MIN: f64 = 0.05;
/// Upper clamp for any domain weight.
pub const WEIGHT_MAX: f64 = 0.40;
/// Largest permitted per-domain change in one weekly adjustment.
pub const WEIGHT_DELTA_MAX: f64 = 0.02;

/// Payload of `weights.adjusted.v1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightsAdjustedPayload {
    /// Full weight vector after the adjustment, keyed by producer domain.
    pub weights: BTreeMap<String, f64>,
    /// Why the adjustment was made.
    pub reason: String,
}

/// The current weight vector plus its adjustment history.
#[derive(Debug, Default)]
pub struct WeightsProjection {
    defaults: BTreeMap<String, f64>,
    current: Option<BTreeMap<String, f64>>,
    history: Vec<(u64, BTreeMap<String, f64>)>,
}

impl WeightsProjection {
    /// View with a default vector used until the first adjustment event.
    pub fn with_defaults(defaults: BTreeMap<String, f64>) -> Self {
        Self {
            defaults: clamp_vector(defaults),
            current: None,
            history: Vec::new(),
        }
    }

    /// The weight vector in effect.
    pub fn current(&self) -> &BTreeMap<String, f64> {
        self.current.as_ref().unwrap_or(&self.defaults)
    }

    /// Weight for a domain; absent domains weigh nothing.
    pub fn weight(&self, domain: &str) -> f64 {
        self.current().get(domain).copied().unwrap_or(0.0)
    }

    /// Adjustment history in seq order.
    pub fn history(&self) -> &[(u64, BTreeMap<String, f64>)] {
        &self.history
    }
}

fn clamp_vector(weights: BTreeMap<String, f64>) -> BTreeMap<String, f64> {
    weights
        .into_iter()
        .map(|(domain, weight)| (domain, weight.clamp(WEIGHT_MIN, WEIGHT_MAX)))
        .collect()
}

impl Projection for WeightsProjection {
    fn name(&self) -> &'static str {
        "weights"
    }

    fn apply(&mut self, event: &Event) {
        if event.kind != KIND_WEIGHTS_ADJUSTED {
            return;
        }
        let payload: WeightsAdjustedPayload = match from_value(&event.payload) {
            Ok(p) => p,
            Err(e) => {
                warn!(seq = event.seq, error = %e, "skipping malformed weight adjustment");
                return;
            }
        };
        let clamped = clamp_vector(payload.weights);
        self.history.push((event.seq, clamped.clone()));
        self.current = Some(clamped);
    }

    fn reset(&mut self) {
        self.current = None;
        self.history.clear();
    }

    fn state(&self) -> serde_json::Value {
        json!({
            "defaults": self.defaults,
            "current": self.current,
            "history": self.history,
        })
    }
}
