#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **blessed-killswitch** – Monotonic kill-switch state machine for the
//! Blessed ledger.
//!
//! The kill switch is a safety level in `L0..L4` persisted purely as
//! `system.kill_switch.v1` events. Escalation can be automatic (computed
//! against portfolio projections); de-escalation never is – only an
//! operator event carrying the elevated `kill_switch.lower` capability may
//! reduce the level. A freshly started process restores whatever level the
//! log last recorded; there is no in-memory default that could silently
//! reset a lockdown.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use blessed_auth::{permissions, Claims};
use blessed_projections::{PortfolioStats, PositionsProjection};
use blessed_store_core::payloads::{from_value, to_value};
use blessed_store_core::{Event, EventDraft, EventJournal, StoreError};
use blessed_types::{KillLevel, Regime, KIND_KILL_SWITCH};

//─────────────────────────────
//  Errors
//─────────────────────────────

/// Kill-switch policy and persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum KillSwitchError {
    /// A transition would lower the level without elevated authorization.
    #[error("non-monotonic transition {from} -> {to} requires elevated authorization")]
    NonMonotonic {
        /// Current level.
        from: KillLevel,
        /// Requested level.
        to: KillLevel,
    },
    /// The presented capability lacks the required permission.
    #[error("capability lacks {0}")]
    Unauthorized(&'static str),
    /// A transition event targets the level already in effect.
    #[error("transition to current level {0} is a no-op")]
    NoOp(KillLevel),
    /// The persisted state could not be read. Fatal: the orchestrator
    /// refuses to run until the level is recoverable.
    #[error("kill-switch state unreadable: {0}")]
    StateUnreadable(#[from] StoreError),
}

//─────────────────────────────
//  Event payload
//─────────────────────────────

/// Payload of `system.kill_switch.v1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KillSwitchPayload {
    /// Level before the transition.
    pub from: KillLevel,
    /// Level after the transition.
    pub to: KillLevel,
    /// Why the transition happened.
    pub reason: String,
    /// `auto` for trigger-driven escalation, otherwise the operator id.
    pub actor: String,
}

//─────────────────────────────
//  Automatic escalation triggers
//─────────────────────────────

/// Thresholds for automatic escalation, evaluated against projections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoTriggers {
    /// L1 when daily realized PnL falls to or below this fraction.
    pub daily_loss_l1: f64,
    /// L2 when portfolio heat reaches this fraction.
    pub heat_l2: f64,
    /// L3 when the regime is CRISIS with at least this confidence.
    pub crisis_confidence_l3: f64,
    /// L4 when lifetime drawdown reaches this fraction.
    pub drawdown_l4: f64,
}

impl Default for AutoTriggers {
    fn default() -> Self {
        Self {
            daily_loss_l1: -0.03,
            heat_l2: 0.06,
            crisis_confidence_l3: 0.8,
            drawdown_l4: 0.30,
        }
    }
}

//─────────────────────────────
//  State machine
//─────────────────────────────

/// The kill-switch level, restored from and advanced through events.
#[derive(Debug, Clone)]
pub struct KillSwitch {
    level: KillLevel,
    triggers: AutoTriggers,
}

impl KillSwitch {
    /// Restore the level from the newest transition event at or below
    /// `max_seq`. A journal with no transition yet is at L0.
    ///
    /// Any journal failure is fatal here: running with an unknown safety
    /// level is worse than not running.
    pub async fn restore(
        journal: &dyn EventJournal,
        max_seq: u64,
        triggers: AutoTriggers,
    ) -> Result<Self, KillSwitchError> {
        let level = Self::level_at(journal, max_seq).await?;
        info!(level = %level, "kill switch restored");
        Ok(Self { level, triggers })
    }

    /// Read the level in effect at `max_seq` without constructing a state
    /// machine. Used by the decision phase against its cycle snapshot.
    pub async fn level_at(
        journal: &dyn EventJournal,
        max_seq: u64,
    ) -> Result<KillLevel, KillSwitchError> {
        let event = journal.latest_of_kind(KIND_KILL_SWITCH, max_seq).await?;
        match event {
            Some(event) => {
                let payload: KillSwitchPayload = from_value(&event.payload)?;
                Ok(payload.to)
            }
            None => Ok(KillLevel::Nominal),
        }
    }

    /// Level currently in effect.
    pub fn level(&self) -> KillLevel {
        self.level
    }

    /// Fold a committed transition event into the cached level.
    pub fn apply(&mut self, event: &Event) {
        if event.kind != KIND_KILL_SWITCH {
            return;
        }
        match from_value::<KillSwitchPayload>(&event.payload) {
            Ok(payload) => self.level = payload.to,
            Err(e) => warn!(seq = event.seq, error = %e, "malformed kill-switch event ignored"),
        }
    }

    /// Build an escalation draft. Escalations are monotonic: the target
    /// must be strictly above the current level.
    pub fn escalate_draft(
        &self,
        to: KillLevel,
        reason: impl Into<String>,
        actor: impl Into<String>,
    ) -> Result<EventDraft, KillSwitchError> {
        if to == self.level {
            return Err(KillSwitchError::NoOp(to));
        }
        if to < self.level {
            return Err(KillSwitchError::NonMonotonic {
                from: self.level,
                to,
            });
        }
        self.transition_draft(to, reason.into(), actor.into())
    }

    /// Build a de-escalation draft. Requires an operator capability
    /// carrying the elevated `kill_switch.lower` permission; the routine
    /// operator token is deliberately insufficient.
    pub fn lower_draft(
        &self,
        to: KillLevel,
        reason: impl Into<String>,
        claims: &Claims,
    ) -> Result<EventDraft, KillSwitchError> {
        if to >= self.level {
            return Err(KillSwitchError::NoOp(to));
        }
        if !claims.has_permission(permissions::KILL_SWITCH_LOWER) {
            return Err(KillSwitchError::Unauthorized(permissions::KILL_SWITCH_LOWER));
        }
        self.transition_draft(to, reason.into(), claims.sub.clone())
    }

    /// Evaluate the automatic triggers against projections; returns the
    /// target level and reason when escalation is warranted. The result is
    /// always at or above the current level (P7: automation never lowers).
    pub fn evaluate_auto(
        &self,
        positions: &PositionsProjection,
        today: &str,
        regime: Option<(Regime, f64)>,
    ) -> Option<(KillLevel, String)> {
        let stats: &PortfolioStats = positions.stats();
        let mut target = self.level;
        let mut reason = String::new();

        let daily = stats.daily_pnl(today);
        if daily <= self.triggers.daily_loss_l1 && target < KillLevel::Caution {
            target = KillLevel::Caution;
            reason = format!("daily realized pnl {daily:.4} breached {}", self.triggers.daily_loss_l1);
        }
        let heat = positions.heat();
        if heat >= self.triggers.heat_l2 && target < KillLevel::Defensive {
            target = KillLevel::Defensive;
            reason = format!("portfolio heat {heat:.4} breached {}", self.triggers.heat_l2);
        }
        if let Some((Regime::Crisis, confidence)) = regime {
            if confidence >= self.triggers.crisis_confidence_l3 && target < KillLevel::Lockdown {
                target = KillLevel::Lockdown;
                reason = format!("crisis regime at confidence {confidence:.2}");
            }
        }
        let drawdown = stats.drawdown();
        if drawdown >= self.triggers.drawdown_l4 && target < KillLevel::Emergency {
            target = KillLevel::Emergency;
            reason = format!("lifetime drawdown {drawdown:.4} breached {}", self.triggers.drawdown_l4);
        }

        if target > self.level {
            Some((target, reason))
        } else {
            None
        }
    }

    fn transition_draft(
        &self,
        to: KillLevel,
        reason: String,
        actor: String,
    ) -> Result<EventDraft, KillSwitchError> {
        let payload = KillSwitchPayload {
            from: self.level,
            to,
            reason,
            actor,
        };
        let value = to_value(&payload)?;
        Ok(EventDraft::new(KIND_KILL_SWITCH, value))
    }
}
