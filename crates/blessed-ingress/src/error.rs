//! Wire-format error envelope.
//!
//! Core errors translate to `{error: {code, message, detail?}}` with
//! stable codes usable for automation. No secret material ever enters the
//! envelope; details are sanitized before logging at the boundary.

use serde::Serialize;
use serde_json::json;

use blessed_brain::BrainError;
use blessed_contributors::ContributorError;
use blessed_karma::KarmaError;
use blessed_killswitch::KillSwitchError;
use blessed_store_core::StoreError;
use blessed_types::KillLevel;

/// Boundary error with a stable code.
#[derive(Debug, Clone, Serialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct WireError {
    /// Stable machine-readable code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Optional structured detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

impl WireError {
    /// Construct from a code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            detail: None,
        }
    }

    /// Attach structured detail.
    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }

    /// Capability token failed validation.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("unauthorized", message)
    }

    /// The caller's role does not permit the operation.
    pub fn role_forbidden(role: &str, action: &str) -> Self {
        Self::new(
            "role_forbidden",
            format!("role {role} may not perform {action}"),
        )
    }

    /// The kill switch refuses the operation at the current level.
    pub fn kill_switch_active(level: KillLevel) -> Self {
        Self::new(
            "kill_switch_active",
            format!("kill switch at {level} refuses this operation"),
        )
        .with_detail(json!({"level": level.label()}))
    }

    /// Render the wire envelope.
    pub fn envelope(&self) -> serde_json::Value {
        json!({ "error": self })
    }
}

impl From<StoreError> for WireError {
    fn from(e: StoreError) -> Self {
        Self::new(e.code(), e.to_string())
    }
}

impl From<ContributorError> for WireError {
    fn from(e: ContributorError) -> Self {
        Self::new(e.code(), e.to_string())
    }
}

impl From<KillSwitchError> for WireError {
    fn from(e: KillSwitchError) -> Self {
        let code = match &e {
            KillSwitchError::NonMonotonic { .. } => "non_monotonic_transition",
            KillSwitchError::Unauthorized(_) => "role_forbidden",
            KillSwitchError::NoOp(_) => "non_monotonic_transition",
            KillSwitchError::StateUnreadable(_) => "chain_broken",
        };
        Self::new(code, e.to_string())
    }
}

impl From<KarmaError> for WireError {
    fn from(e: KarmaError) -> Self {
        let code = match &e {
            KarmaError::UnknownIntent(_) => "unknown_intent",
            KarmaError::AlreadySettled(_) => "already_settled",
            KarmaError::EmptySettlement => "invalid_payload",
            KarmaError::PolicyLocked(_) => "policy_locked",
            KarmaError::Unauthorized(_) => "role_forbidden",
            KarmaError::Store(inner) => inner.code(),
        };
        Self::new(code, e.to_string())
    }
}

impl From<BrainError> for WireError {
    fn from(e: BrainError) -> Self {
        match e {
            BrainError::Store(inner) => inner.into(),
            BrainError::KillSwitch(inner) => inner.into(),
            BrainError::Karma(inner) => inner.into(),
            BrainError::Projection(inner) => Self::new("projection_error", inner.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_shape() {
        let err = WireError::new("rate_limited", "slow down")
            .with_detail(json!({"retry_after_secs": 30}));
        let envelope = err.envelope();
        assert_eq!(envelope["error"]["code"], "rate_limited");
        assert_eq!(envelope["error"]["message"], "slow down");
        assert_eq!(envelope["error"]["detail"]["retry_after_secs"], 30);
    }

    #[test]
    fn store_errors_keep_stable_codes() {
        let wire: WireError = StoreError::SignerUnavailable.into();
        assert_eq!(wire.code, "signer_unavailable");
        let wire: WireError = StoreError::DuplicateDedupeKey {
            kind: "a.b".into(),
            key: "k".into(),
        }
        .into();
        assert_eq!(wire.code, "duplicate_dedupe_key");
    }

    #[test]
    fn kill_switch_active_carries_level() {
        let wire = WireError::kill_switch_active(KillLevel::Defensive);
        assert_eq!(wire.code, "kill_switch_active");
        assert_eq!(wire.detail.unwrap()["level"], "L2_DEFENSIVE");
    }
}
