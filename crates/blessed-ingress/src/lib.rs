#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **blessed-ingress** – Core-facing ingress API for the Blessed ledger.
//!
//! Every operation follows the same shape: validate input, authenticate
//! the capability token, authorize against the role matrix, dispatch, and
//! return either the committed event(s) or a wire error with a stable
//! code. Boundary log lines pass through the secret sanitizer; the raw
//! capability string never reaches a log record.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use blessed_auth::{permissions as perm, Claims, TokenValidator};
use blessed_brain::{Brain, BrainConfig, CycleResult};
use blessed_contributors::{
    submission_drafts, ContributorRegistry, DuplicateDetector, RateLimitConfig, RateLimiter,
    RegisterPayload,
};
use blessed_karma::{policy_change_draft, settle_draft, KarmaLedger};
use blessed_killswitch::{AutoTriggers, KillSwitch};
use blessed_projections::{replay, PositionsProjection, Projection, UpcasterRegistry};
use blessed_store_core::{Event, EventDraft, EventJournal};
use blessed_types::{KillLevel, Role};

pub mod error;
pub mod permissions;
pub mod sanitize;

pub use error::WireError;
pub use permissions::{role_permits, Action};
pub use sanitize::sanitize;

//─────────────────────────────
//  Request / response types
//─────────────────────────────

/// A signal submission.
#[derive(Debug, Clone)]
pub struct SubmitSignalRequest {
    /// Registered contributor submitting the signal.
    pub contributor_id: String,
    /// Signal kind; must live under `signal.*`.
    pub kind: String,
    /// Signal payload.
    pub payload: serde_json::Value,
    /// Optional producer identifier recorded as the event source.
    pub source: Option<String>,
}

/// Receipt for an accepted submission.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitReceipt {
    /// Event id of the committed signal.
    pub event_id: String,
    /// Attribution record id.
    pub attribution_id: String,
    /// Sequence numbers of the two committed events, in order.
    pub seqs: Vec<u64>,
}

//─────────────────────────────
//  Ingress facade
//─────────────────────────────

/// The authoritative entry point into the core.
pub struct Ingress {
    journal: Arc<dyn EventJournal>,
    validator: Arc<dyn TokenValidator>,
    config: BrainConfig,
    brain: Mutex<Brain>,
    limiter: RateLimiter,
    detector: DuplicateDetector,
    upcasters: Arc<UpcasterRegistry>,
}

impl Ingress {
    /// Build the facade over a journal and token validator.
    pub fn new(
        journal: Arc<dyn EventJournal>,
        validator: Arc<dyn TokenValidator>,
        config: BrainConfig,
    ) -> Self {
        let brain = Brain::new(journal.clone(), config.clone());
        Self {
            journal,
            validator,
            config,
            brain: Mutex::new(brain),
            limiter: RateLimiter::new(),
            detector: DuplicateDetector::default(),
            upcasters: Arc::new(UpcasterRegistry::new()),
        }
    }

    /// Replace the brain, e.g. to attach producers or custom triggers.
    pub fn with_brain(mut self, brain: Brain) -> Self {
        self.brain = Mutex::new(brain);
        self
    }

    //───────────────────── operations ─────────────────────

    /// Append an event outside the attributed signal path. Operator only.
    pub async fn append_event(
        &self,
        capability: &str,
        kind: &str,
        payload: serde_json::Value,
        source: Option<String>,
        trace_id: Option<String>,
        dedupe_key: Option<String>,
    ) -> Result<Event, WireError> {
        let claims = self.authenticate(capability).await?;
        self.authorize(&claims, Action::AppendEvent).await?;

        let mut draft = EventDraft::new(kind, payload);
        draft.source = source;
        draft.trace_id = trace_id;
        draft.dedupe_key = dedupe_key;
        let event = self.journal.append(draft).await?;
        info!(seq = event.seq, kind = %event.kind, actor = %claims.sub, "event appended");
        Ok(event)
    }

    /// Register a contributor. Operator only; duplicate node ids refused.
    pub async fn register_contributor(
        &self,
        capability: &str,
        payload: RegisterPayload,
    ) -> Result<Event, WireError> {
        let claims = self.authenticate(capability).await?;
        self.authorize(&claims, Action::RegisterContributor).await?;

        let registry = self.registry().await?;
        let draft = registry.register_draft(&payload)?;
        let event = self.journal.append(draft).await?;
        info!(
            seq = event.seq,
            contributor_id = %event.event_id,
            role = %payload.role,
            "contributor registered"
        );
        Ok(event)
    }

    /// Submit an attributed signal: two linked events in one atomic batch.
    pub async fn submit_signal(
        &self,
        capability: &str,
        request: SubmitSignalRequest,
    ) -> Result<SubmitReceipt, WireError> {
        let claims = self.authenticate(capability).await?;

        let registry = self.registry().await?;
        let contributor = registry.require(&request.contributor_id)?.clone();

        // The token subject must be the submitting contributor, unless an
        // operator capability is submitting on a contributor's behalf.
        if claims.sub != contributor.id && !self.is_operator(&claims) {
            return Err(WireError::unauthorized(
                "capability subject does not match contributor",
            ));
        }
        if !role_permits(contributor.role, Action::SubmitSignal) {
            return Err(WireError::role_forbidden(
                contributor.role.as_str(),
                Action::SubmitSignal.as_str(),
            ));
        }

        let now = Utc::now();
        self.limiter.check(
            &contributor.id,
            RateLimitConfig::for_role(contributor.role),
            now,
        )?;

        let attribution_id = Uuid::new_v4().to_string();
        let clone_of =
            self.detector
                .observe(&contributor.id, &attribution_id, &request.payload, now);
        if clone_of.is_some() {
            warn!(
                contributor_id = %contributor.id,
                detail = %sanitize(&request.payload),
                "duplicate payload across contributors"
            );
        }
        let (signal, attribution) = submission_drafts(
            &attribution_id,
            &contributor.id,
            &request.kind,
            request.payload,
            request.source.as_deref(),
            clone_of,
        )?;
        let signal_event_id = signal.event_id.to_string();
        let committed = self.journal.append_batch(vec![signal, attribution]).await?;

        Ok(SubmitReceipt {
            event_id: signal_event_id,
            attribution_id,
            seqs: committed.iter().map(|e| e.seq).collect(),
        })
    }

    /// Trigger a brain cycle. Operator only.
    ///
    /// Above level zero the cycle can only do exit work; when nothing is
    /// open to exit, the call is refused outright with
    /// `kill_switch_active`. At lockdown and above every cycle is refused.
    pub async fn run_cycle(&self, capability: &str, full: bool) -> Result<CycleResult, WireError> {
        let claims = self.authenticate(capability).await?;
        self.authorize(&claims, Action::TriggerCycle).await?;

        let head_seq = self.head_seq().await?;
        let level = KillSwitch::level_at(self.journal.as_ref(), head_seq)
            .await
            .map_err(WireError::from)?;
        if level >= KillLevel::Lockdown {
            return Err(WireError::kill_switch_active(level));
        }
        if level > KillLevel::Nominal {
            let mut positions = PositionsProjection::new();
            replay(
                self.journal.as_ref(),
                0,
                head_seq,
                self.upcasters.as_ref(),
                &mut [&mut positions],
            )
            .await
            .map_err(|e| WireError::new("projection_error", e.to_string()))?;
            if positions.open_positions().count() == 0 {
                return Err(WireError::kill_switch_active(level));
            }
        }

        let mut brain = self.brain.lock().await;
        let result = brain.run_cycle(full).await?;
        info!(
            cycle_id = %result.cycle_id,
            snapshot_seq = result.snapshot_seq,
            partial = result.partial,
            "cycle finished"
        );
        Ok(result)
    }

    /// Raise or lower the kill switch.
    ///
    /// Raising needs the routine `kill_switch.raise` permission; lowering
    /// needs the elevated `kill_switch.lower` one, which default operator
    /// tokens do not carry.
    pub async fn set_kill_switch(
        &self,
        capability: &str,
        level: KillLevel,
        reason: &str,
    ) -> Result<Event, WireError> {
        let claims = self.authenticate(capability).await?;
        self.authorize(&claims, Action::SetKillSwitch).await?;

        let head_seq = self.head_seq().await?;
        let ks = KillSwitch::restore(self.journal.as_ref(), head_seq, AutoTriggers::default())
            .await
            .map_err(WireError::from)?;

        let draft = if level > ks.level() {
            if !claims.has_permission(perm::KILL_SWITCH_RAISE) {
                return Err(WireError::role_forbidden(
                    "operator",
                    perm::KILL_SWITCH_RAISE,
                ));
            }
            ks.escalate_draft(level, reason, claims.sub.clone())?
        } else {
            ks.lower_draft(level, reason, &claims)?
        };
        let event = self.journal.append(draft).await?;
        info!(seq = event.seq, level = %level, actor = %claims.sub, "kill switch set");
        Ok(event)
    }

    /// Settle karma intents atomically. Operator only.
    pub async fn settle_karma(
        &self,
        capability: &str,
        intent_ids: &[String],
        tx_hash: &str,
    ) -> Result<Event, WireError> {
        let claims = self.authenticate(capability).await?;
        self.authorize(&claims, Action::SettleKarma).await?;

        let ledger = self.karma_ledger().await?;
        let draft = settle_draft(&ledger, intent_ids, tx_hash, &claims)?;
        let event = self.journal.append(draft).await?;
        info!(seq = event.seq, intents = intent_ids.len(), "karma settled");
        Ok(event)
    }

    /// Change karma settlement policy; elevated once frozen.
    pub async fn change_karma_policy(
        &self,
        capability: &str,
        percentage: f64,
        destination: &str,
    ) -> Result<Event, WireError> {
        let claims = self.authenticate(capability).await?;
        self.authorize(&claims, Action::ChangeKarmaPolicy).await?;

        let ledger = self.karma_ledger().await?;
        let draft = policy_change_draft(&ledger, percentage, destination, &claims)?;
        let event = self.journal.append(draft).await?;
        info!(seq = event.seq, "karma policy changed");
        Ok(event)
    }

    //───────────────────── internals ─────────────────────

    async fn authenticate(&self, capability: &str) -> Result<Claims, WireError> {
        self.validator
            .validate(capability)
            .await
            .map_err(|e| WireError::unauthorized(e.to_string()))
    }

    /// Operator authority is defined by capability, not registration:
    /// a token carrying `cycle.run` is an operator token.
    fn is_operator(&self, claims: &Claims) -> bool {
        claims.has_permission(perm::RUN_CYCLE)
    }

    /// Authorize a non-submission action: operators by capability,
    /// registered contributors by the role matrix.
    async fn authorize(&self, claims: &Claims, action: Action) -> Result<Role, WireError> {
        if self.is_operator(claims) {
            return Ok(Role::Operator);
        }
        let registry = self.registry().await?;
        let role = registry
            .contributor(&claims.sub)
            .map(|c| c.role)
            .ok_or_else(|| WireError::unauthorized("unknown capability subject"))?;
        if !role_permits(role, action) {
            return Err(WireError::role_forbidden(role.as_str(), action.as_str()));
        }
        Ok(role)
    }

    async fn head_seq(&self) -> Result<u64, WireError> {
        Ok(self
            .journal
            .head()
            .await
            .map_err(WireError::from)?
            .map(|(seq, _)| seq)
            .unwrap_or(0))
    }

    async fn registry(&self) -> Result<ContributorRegistry, WireError> {
        let mut registry = ContributorRegistry::new();
        self.rebuild(&mut registry).await?;
        Ok(registry)
    }

    async fn karma_ledger(&self) -> Result<KarmaLedger, WireError> {
        let mut ledger = KarmaLedger::new();
        self.rebuild(&mut ledger).await?;
        Ok(ledger)
    }

    async fn rebuild(&self, projection: &mut dyn Projection) -> Result<(), WireError> {
        let head_seq = self.head_seq().await?;
        replay(
            self.journal.as_ref(),
            0,
            head_seq,
            self.upcasters.as_ref(),
            &mut [projection],
        )
        .await
        .map_err(|e| WireError::new("projection_error", e.to_string()))?;
        Ok(())
    }

    /// Paper/live mode this node runs in.
    pub fn mode(&self) -> blessed_types::TradeMode {
        self.config.mode
    }
}
