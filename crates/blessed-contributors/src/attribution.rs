//! Signal provenance: every accepted submission appends two linked events,
//! the signal itself and an `attribution.v1` record tying it to its
//! contributor. Realized outcomes arrive later as
//! `attribution.outcome.v1` once the position a signal fed into closes.

use serde::{Deserialize, Serialize};

use blessed_store_core::payloads::to_value;
use blessed_store_core::{EventDraft, StoreError};
use blessed_types::{is_signal_kind, KIND_ATTRIBUTION, KIND_ATTRIBUTION_OUTCOME};

use crate::ContributorError;

/// Payload of `attribution.v1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributionPayload {
    /// Stable attribution id.
    pub attribution_id: String,
    /// Contributor the signal came from.
    pub contributor_id: String,
    /// Event id of the attributed signal.
    pub event_id: String,
    /// Signal kind, denormalized for scoring without a second lookup.
    pub kind: String,
    /// Whether the quality phase accepted the signal into synthesis.
    pub accepted: bool,
    /// Attribution id of the original submission this payload duplicated,
    /// when the duplicate detector flagged it; feeds the cloning penalty.
    #[serde(default)]
    pub clone_of: Option<String>,
}

/// Realized outcome of an attributed signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalOutcome {
    /// The position the signal fed into closed with a gain.
    Profitable,
    /// The position closed flat or with a loss.
    Unprofitable,
}

/// Payload of `attribution.outcome.v1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomePayload {
    /// Attribution being evaluated.
    pub attribution_id: String,
    /// Contributor the attribution belongs to.
    pub contributor_id: String,
    /// Realized outcome.
    pub outcome: SignalOutcome,
    /// Conviction the decision phase held when acting on the signal,
    /// scored for calibration.
    pub conviction: f64,
}

/// Build the linked `(signal, attribution)` draft pair for one submission.
///
/// The pair is appended as one atomic batch; the attribution references the
/// signal's pre-allocated event id, so the link survives any interleaving.
/// The caller allocates `attribution_id` up front (the ingress boundary
/// feeds it to the duplicate detector before drafting).
pub fn submission_drafts(
    attribution_id: &str,
    contributor_id: &str,
    kind: &str,
    payload: serde_json::Value,
    source: Option<&str>,
    clone_of: Option<String>,
) -> Result<(EventDraft, EventDraft), ContributorError> {
    if !is_signal_kind(kind) {
        return Err(ContributorError::InvalidSignalKind(kind.to_string()));
    }
    let mut signal = EventDraft::new(kind, payload);
    if let Some(source) = source {
        signal = signal.with_source(source);
    }

    // A detected clone is still written (the submitted denominator must see
    // it) but enters synthesis rejected and penalized.
    let accepted = clone_of.is_none();
    let attribution_payload = AttributionPayload {
        attribution_id: attribution_id.to_string(),
        contributor_id: contributor_id.to_string(),
        event_id: signal.event_id.to_string(),
        kind: kind.to_string(),
        accepted,
        clone_of,
    };
    let attribution = attribution_draft(&attribution_payload)
        .map_err(|_| ContributorError::InvalidSignalKind(kind.to_string()))?;
    Ok((signal, attribution))
}

fn attribution_draft(payload: &AttributionPayload) -> Result<EventDraft, StoreError> {
    Ok(EventDraft::new(KIND_ATTRIBUTION, to_value(payload)?)
        .with_dedupe_key(payload.attribution_id.clone()))
}

/// Build an outcome draft for a resolved attribution.
pub fn outcome_draft(payload: &OutcomePayload) -> Result<EventDraft, StoreError> {
    Ok(EventDraft::new(KIND_ATTRIBUTION_OUTCOME, to_value(payload)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn submission_pair_is_linked() {
        let (signal, attribution) = submission_drafts(
            "attr-1",
            "c1",
            "signal.ta.rsi.v1",
            json!({"rsi": 24.1}),
            Some("ta"),
            None,
        )
        .unwrap();
        assert_eq!(signal.kind, "signal.ta.rsi.v1");
        assert_eq!(attribution.kind, KIND_ATTRIBUTION);
        assert_eq!(
            attribution.payload["event_id"],
            signal.event_id.to_string()
        );
        assert_eq!(attribution.payload["attribution_id"], "attr-1");
        assert_eq!(attribution.payload["contributor_id"], "c1");
        assert_eq!(attribution.payload["accepted"], true);
    }

    #[test]
    fn clone_submission_is_written_but_rejected() {
        let (_, attribution) = submission_drafts(
            "attr-2",
            "c2",
            "signal.ta.rsi.v1",
            json!({"rsi": 24.1}),
            None,
            Some("attr-original".into()),
        )
        .unwrap();
        assert_eq!(attribution.payload["accepted"], false);
        assert_eq!(attribution.payload["clone_of"], "attr-original");
    }

    #[test]
    fn non_signal_kind_rejected() {
        let err = submission_drafts("attr-1", "c1", "system.genesis.v1", json!({}), None, None)
            .unwrap_err();
        assert!(matches!(err, ContributorError::InvalidSignalKind(_)));
        assert_eq!(err.code(), "invalid_type");
    }
}
