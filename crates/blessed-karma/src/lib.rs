#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **blessed-karma** – Karma intent generation and settlement ledger for
//! the Blessed ledger.
//!
//! Karma is a voluntary profit-share obligation: when a live position
//! closes with a realized gain, the system may create a
//! `karma.intent.v1` carrying `amount = percentage × profit`. Intents are
//! settled atomically in batches by `karma.settle.v1`; half-settlement is
//! impossible by construction. Karma is disabled by default, paper-mode
//! fills never create intents, and settlement parameters freeze after the
//! first settlement unless an elevated `karma.policy_change.v1` reopens
//! them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use blessed_auth::{permissions, Claims};
use blessed_projections::positions::CloseIntentPayload;
use blessed_projections::Projection;
use blessed_store_core::payloads::{from_value, to_value};
use blessed_store_core::{Event, EventDraft, StoreError};
use blessed_types::{
    TradeMode, KIND_INTENT_CLOSE, KIND_KARMA_INTENT, KIND_KARMA_POLICY_CHANGE, KIND_KARMA_SETTLE,
};

//─────────────────────────────
//  Configuration
//─────────────────────────────

/// Karma policy. Disabled unless configuration deliberately enables it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KarmaConfig {
    /// Master switch; off by default.
    pub enabled: bool,
    /// Fraction of realized profit pledged per intent.
    pub percentage: f64,
    /// Settlement destination (venue-specific address or account).
    pub destination: String,
}

impl Default for KarmaConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            percentage: 0.10,
            destination: String::new(),
        }
    }
}

//─────────────────────────────
//  Errors
//─────────────────────────────

/// Karma policy errors.
#[derive(Debug, thiserror::Error)]
pub enum KarmaError {
    /// Settlement referenced an intent that does not exist.
    #[error("unknown karma intent {0}")]
    UnknownIntent(String),
    /// Settlement referenced an intent that is already settled.
    #[error("karma intent {0} is already settled")]
    AlreadySettled(String),
    /// Settlement batch was empty.
    #[error("settlement requires at least one intent")]
    EmptySettlement,
    /// Policy is frozen after first settlement; elevated authorization
    /// required to change it.
    #[error("settlement policy is immutable; {0} required")]
    PolicyLocked(&'static str),
    /// The presented capability lacks the required permission.
    #[error("capability lacks {0}")]
    Unauthorized(&'static str),
    /// Payload encode/decode failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

//─────────────────────────────
//  Event payloads
//─────────────────────────────

/// Payload of `karma.intent.v1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KarmaIntentPayload {
    /// Stable intent id.
    pub intent_id: String,
    /// Position whose realized profit created the obligation.
    pub position_id: String,
    /// Realized profit (equity fraction).
    pub profit: f64,
    /// Pledged amount, `percentage × profit`.
    pub amount: f64,
}

/// Payload of `karma.settle.v1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KarmaSettlePayload {
    /// Intents closed by this settlement, all-or-nothing.
    pub intent_ids: Vec<String>,
    /// Venue transaction reference.
    pub tx_hash: String,
    /// Operator who settled.
    pub actor: String,
}

/// Payload of `karma.policy_change.v1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KarmaPolicyPayload {
    /// New pledge percentage.
    pub percentage: f64,
    /// New settlement destination.
    pub destination: String,
    /// Operator who changed the policy.
    pub actor: String,
}

//─────────────────────────────
//  Ledger view
//─────────────────────────────

/// One pending or settled obligation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KarmaIntent {
    /// Stable intent id.
    pub id: String,
    /// Position whose profit created it.
    pub position_id: String,
    /// Realized profit.
    pub profit: f64,
    /// Pledged amount.
    pub amount: f64,
    /// Sequence number of the intent event.
    pub created_seq: u64,
    /// Sequence number of the settlement event, once settled.
    pub settled_seq: Option<u64>,
    /// Settlement transaction reference, once settled.
    pub receipt_ref: Option<String>,
}

/// The karma ledger, folded from intent / settle / policy events.
#[derive(Debug, Default)]
pub struct KarmaLedger {
    intents: BTreeMap<String, KarmaIntent>,
    settled_count: u64,
    policy_overrides: Vec<(u64, KarmaPolicyPayload)>,
}

impl KarmaLedger {
    /// Empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an intent.
    pub fn intent(&self, id: &str) -> Option<&KarmaIntent> {
        self.intents.get(id)
    }

    /// All open (unsettled) intents.
    pub fn open_intents(&self) -> impl Iterator<Item = &KarmaIntent> {
        self.intents.values().filter(|i| i.settled_seq.is_none())
    }

    /// Total pledged and not yet settled.
    pub fn outstanding(&self) -> f64 {
        self.open_intents().map(|i| i.amount).sum()
    }

    /// True once any settlement has been recorded; the policy freezes at
    /// that point.
    pub fn policy_locked(&self) -> bool {
        self.settled_count > 0
    }

    /// Policy override history (elevated changes after the freeze).
    pub fn policy_overrides(&self) -> &[(u64, KarmaPolicyPayload)] {
        &self.policy_overrides
    }
}

impl Projection for KarmaLedger {
    fn name(&self) -> &'static str {
        "karma"
    }

    fn apply(&mut self, event: &Event) {
        match event.kind.as_str() {
            k if k == KIND_KARMA_INTENT => {
                let payload: KarmaIntentPayload = match from_value(&event.payload) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(seq = event.seq, error = %e, "skipping malformed karma intent");
                        return;
                    }
                };
                self.intents.insert(
                    payload.intent_id.clone(),
                    KarmaIntent {
                        id: payload.intent_id,
                        position_id: payload.position_id,
                        profit: payload.profit,
                        amount: payload.amount,
                        created_seq: event.seq,
                        settled_seq: None,
                        receipt_ref: None,
                    },
                );
            }
            k if k == KIND_KARMA_SETTLE => {
                let payload: KarmaSettlePayload = match from_value(&event.payload) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(seq = event.seq, error = %e, "skipping malformed settlement");
                        return;
                    }
                };
                for id in &payload.intent_ids {
                    match self.intents.get_mut(id) {
                        Some(intent) => {
                            intent.settled_seq = Some(event.seq);
                            intent.receipt_ref = Some(payload.tx_hash.clone());
                        }
                        None => {
                            warn!(seq = event.seq, intent_id = %id, "settlement names unknown intent")
                        }
                    }
                }
                self.settled_count += 1;
            }
            k if k == KIND_KARMA_POLICY_CHANGE => {
                match from_value::<KarmaPolicyPayload>(&event.payload) {
                    Ok(payload) => self.policy_overrides.push((event.seq, payload)),
                    Err(e) => warn!(seq = event.seq, error = %e, "skipping malformed policy change"),
                }
            }
            _ => {}
        }
    }

    fn reset(&mut self) {
        self.intents.clear();
        self.settled_count = 0;
        self.policy_overrides.clear();
    }

    fn state(&self) -> serde_json::Value {
        json!({
            "intents": self.intents,
            "settled_count": self.settled_count,
            "policy_overrides": self.policy_overrides,
        })
    }
}

//─────────────────────────────
//  Draft builders
//─────────────────────────────

/// Build a karma intent for a realized-profit close, when policy permits.
///
/// Returns `Ok(None)` – intentionally not an error – when karma is
/// disabled, the system runs in paper mode, or the close realized no gain.
pub fn intent_for_close(
    config: &KarmaConfig,
    mode: TradeMode,
    close_event: &Event,
) -> Result<Option<EventDraft>, KarmaError> {
    if close_event.kind != KIND_INTENT_CLOSE {
        return Ok(None);
    }
    if !config.enabled || mode != TradeMode::Live {
        return Ok(None);
    }
    let close: CloseIntentPayload = from_value(&close_event.payload)?;
    if close.realized_pnl <= 0.0 {
        return Ok(None);
    }
    let payload = KarmaIntentPayload {
        intent_id: Uuid::new_v4().to_string(),
        position_id: close.position_id,
        profit: close.realized_pnl,
        amount: config.percentage * close.realized_pnl,
    };
    debug!(position_id = %payload.position_id, amount = payload.amount, "karma intent created");
    Ok(Some(
        EventDraft::new(KIND_KARMA_INTENT, to_value(&payload)?)
            .with_trace_id(close_event.event_id.to_string()),
    ))
}

/// Build an atomic settlement draft over `intent_ids`.
///
/// Every named intent must exist and be open; any failure rejects the
/// whole settlement, so a half-settled batch cannot be expressed.
pub fn settle_draft(
    ledger: &KarmaLedger,
    intent_ids: &[String],
    tx_hash: &str,
    claims: &Claims,
) -> Result<EventDraft, KarmaError> {
    if !claims.has_permission(permissions::KARMA_SETTLE) {
        return Err(KarmaError::Unauthorized(permissions::KARMA_SETTLE));
    }
    if intent_ids.is_empty() {
        return Err(KarmaError::EmptySettlement);
    }
    for id in intent_ids {
        match ledger.intent(id) {
            None => return Err(KarmaError::UnknownIntent(id.clone())),
            Some(intent) if intent.settled_seq.is_some() => {
                return Err(KarmaError::AlreadySettled(id.clone()))
            }
            Some(_) => {}
        }
    }
    let payload = KarmaSettlePayload {
        intent_ids: intent_ids.to_vec(),
        tx_hash: tx_hash.to_string(),
        actor: claims.sub.clone(),
    };
    Ok(EventDraft::new(KIND_KARMA_SETTLE, to_value(&payload)?)
        .with_dedupe_key(tx_hash.to_string()))
}

/// Build a policy-change draft.
///
/// Before the first settlement an operator may adjust the policy freely;
/// afterwards the elevated `karma.policy` permission is required.
pub fn policy_change_draft(
    ledger: &KarmaLedger,
    percentage: f64,
    destination: &str,
    claims: &Claims,
) -> Result<EventDraft, KarmaError> {
    if ledger.policy_locked() && !claims.has_permission(permissions::KARMA_POLICY) {
        return Err(KarmaError::PolicyLocked(permissions::KARMA_POLICY));
    }
    let payload = KarmaPolicyPayload {
        percentage,
        destination: destination.to_string(),
        actor: claims.sub.clone(),
    };
    Ok(EventDraft::new(KIND_KARMA_POLICY_CHANGE, to_value(&payload)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use blessed_auth::default_permissions;
    use blessed_types::Role;
    use chrono::Utc;

    fn event_of(seq: u64, kind: &str, payload: serde_json::Value) -> Event {
        let draft = EventDraft::new(kind, payload);
        Event {
            event_id: draft.event_id,
            seq,
            ts: Utc::now(),
            kind: draft.kind,
            schema_version: draft.schema_version,
            source: None,
            trace_id: None,
            dedupe_key: None,
            payload: draft.payload,
            prev_hash: [0u8; 32],
            hash: [0u8; 32],
            signer: blessed_types::NodeId("n".into()),
            signature: ed25519_dalek::Signature::from_bytes(&[0u8; 64]),
        }
    }

    fn close_event(seq: u64, pnl: f64) -> Event {
        event_of(
            seq,
            KIND_INTENT_CLOSE,
            json!({
                "position_id": "p1",
                "exit": 52000.0,
                "realized_pnl": pnl,
                "reason": "target",
            }),
        )
    }

    fn live_config() -> KarmaConfig {
        KarmaConfig {
            enabled: true,
            percentage: 0.10,
            destination: "dest-1".into(),
        }
    }

    fn operator_claims(extra: &[&str]) -> Claims {
        let mut permissions = default_permissions(Role::Operator);
        permissions.extend(extra.iter().map(|p| p.to_string()));
        Claims {
            sub: "op-1".into(),
            node: "n1".into(),
            permissions,
            iat: 0,
            exp: u64::MAX,
            jti: "t".into(),
        }
    }

    #[test]
    fn disabled_by_default_creates_nothing() {
        let config = KarmaConfig::default();
        assert!(!config.enabled);
        let draft = intent_for_close(&config, TradeMode::Live, &close_event(5, 0.04)).unwrap();
        assert!(draft.is_none());
    }

    #[test]
    fn paper_mode_never_creates_intents() {
        let draft =
            intent_for_close(&live_config(), TradeMode::Paper, &close_event(5, 0.04)).unwrap();
        assert!(draft.is_none());
    }

    #[test]
    fn losses_create_nothing() {
        let draft =
            intent_for_close(&live_config(), TradeMode::Live, &close_event(5, -0.02)).unwrap();
        assert!(draft.is_none());
    }

    #[test]
    fn live_profit_creates_proportional_intent() {
        let draft = intent_for_close(&live_config(), TradeMode::Live, &close_event(5, 0.04))
            .unwrap()
            .unwrap();
        assert_eq!(draft.kind, KIND_KARMA_INTENT);
        let payload: KarmaIntentPayload = from_value(&draft.payload).unwrap();
        assert!((payload.amount - 0.004).abs() < 1e-12);
        assert_eq!(payload.position_id, "p1");
    }

    #[test]
    fn settlement_is_all_or_nothing() {
        let mut ledger = KarmaLedger::new();
        ledger.apply(&event_of(
            10,
            KIND_KARMA_INTENT,
            json!({"intent_id": "k1", "position_id": "p1", "profit": 0.04, "amount": 0.004}),
        ));
        let claims = operator_claims(&[]);

        // A batch naming an unknown intent fails entirely.
        let err = settle_draft(
            &ledger,
            &["k1".into(), "ghost".into()],
            "0xabc",
            &claims,
        )
        .unwrap_err();
        assert!(matches!(err, KarmaError::UnknownIntent(_)));

        // A valid batch settles; folding it closes the intent.
        let draft = settle_draft(&ledger, &["k1".into()], "0xabc", &claims).unwrap();
        ledger.apply(&event_of(11, KIND_KARMA_SETTLE, draft.payload));
        assert_eq!(ledger.open_intents().count(), 0);
        assert_eq!(ledger.intent("k1").unwrap().receipt_ref.as_deref(), Some("0xabc"));

        // Settling again is refused.
        let err = settle_draft(&ledger, &["k1".into()], "0xdef", &claims).unwrap_err();
        assert!(matches!(err, KarmaError::AlreadySettled(_)));
    }

    #[test]
    fn settlement_requires_permission() {
        let ledger = KarmaLedger::new();
        let agent = Claims {
            sub: "a1".into(),
            node: "n1".into(),
            permissions: default_permissions(Role::Agent),
            iat: 0,
            exp: u64::MAX,
            jti: "t".into(),
        };
        let err = settle_draft(&ledger, &["k1".into()], "0xabc", &agent).unwrap_err();
        assert!(matches!(err, KarmaError::Unauthorized(_)));
    }

    #[test]
    fn policy_freezes_after_first_settlement() {
        let mut ledger = KarmaLedger::new();
        let routine = operator_claims(&[]);

        // Open policy before any settlement.
        assert!(policy_change_draft(&ledger, 0.05, "dest-2", &routine).is_ok());

        ledger.apply(&event_of(
            10,
            KIND_KARMA_INTENT,
            json!({"intent_id": "k1", "position_id": "p1", "profit": 0.04, "amount": 0.004}),
        ));
        let settle = settle_draft(&ledger, &["k1".into()], "0xabc", &routine).unwrap();
        ledger.apply(&event_of(11, KIND_KARMA_SETTLE, settle.payload));

        // Frozen now: routine operator refused, elevated accepted.
        let err = policy_change_draft(&ledger, 0.05, "dest-2", &routine).unwrap_err();
        assert!(matches!(err, KarmaError::PolicyLocked(_)));
        let elevated = operator_claims(&[permissions::KARMA_POLICY]);
        assert!(policy_change_draft(&ledger, 0.05, "dest-2", &elevated).is_ok());
    }

    #[test]
    fn outstanding_sums_open_amounts() {
        let mut ledger = KarmaLedger::new();
        for (i, amount) in [0.004, 0.002].iter().enumerate() {
            ledger.apply(&event_of(
                10 + i as u64,
                KIND_KARMA_INTENT,
                json!({
                    "intent_id": format!("k{i}"),
                    "position_id": "p1",
                    "profit": amount * 10.0,
                    "amount": amount,
                }),
            ));
        }
        assert!((ledger.outstanding() - 0.006).abs() < 1e-12);
    }
}
