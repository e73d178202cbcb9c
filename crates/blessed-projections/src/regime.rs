//! Regime view: the current market-state label and its transition history.

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use blessed_store_core::payloads::from_value;
use blessed_store_core::Event;
use blessed_types::{Regime, KIND_REGIME_CHANGED};

use crate::Projection;

/// Payload of `regime.changed.v1`, emitted only on transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeChangedPayload {
    /// New regime label.
    pub regime: Regime,
    /// Classifier confidence in `[0, 1]`.
    pub confidence: f64,
    /// Feature vector the classification was made from.
    pub features: serde_json::Value,
}

/// One historical transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeTransition {
    /// Sequence number of the transition event.
    pub changed_seq: u64,
    /// Regime entered.
    pub regime: Regime,
    /// Classifier confidence at the transition.
    pub confidence: f64,
}

/// Current regime plus transition history, folded from transition events.
#[derive(Debug, Default)]
pub struct RegimeProjection {
    history: Vec<RegimeTransition>,
}

impl RegimeProjection {
    /// Empty view.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current regime with its confidence, or `None` before the first
    /// classification.
    pub fn current(&self) -> Option<(Regime, f64)> {
        self.history.last().map(|t| (t.regime, t.confidence))
    }

    /// Sequence number of the last transition.
    pub fn changed_seq(&self) -> Option<u64> {
        self.history.last().map(|t| t.changed_seq)
    }

    /// Full transition history in seq order.
    pub fn history(&self) -> &[RegimeTransition] {
        &self.history
    }
}

impl Projection for RegimeProjection {
    fn name(&self) -> &'static str {
        "regime"
    }

    fn apply(&mut self, event: &Event) {
        if event.kind != KIND_REGIME_CHANGED {
            return;
        }
        let payload: RegimeChangedPayload = match from_value(&event.payload) {
            Ok(p) => p,
            Err(e) => {
                warn!(seq = event.seq, error = %e, "skipping malformed regime transition");
                return;
            }
        };
        self.history.push(RegimeTransition {
            changed_seq: event.seq,
            regime: payload.regime,
            confidence: payload.confidence,
        });
    }

    fn reset(&mut self) {
        self.history.clear();
    }

    fn state(&self) -> serde_json::Value {
        json!({ "history": self.history })
    }
}
