#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **blessed-types** – Shared primitive data structures for the Blessed ledger.
//!
//! The crate is dependency-light and sits at the very bottom of the crate
//! graph so that *every* other crate can depend on it without causing cycles.
//! It intentionally makes no assumptions about I/O, cryptography, or storage.

use serde::{Deserialize, Serialize};

//─────────────────────────────
//  Size limits
//─────────────────────────────

/// Maximum canonical payload size to prevent memory exhaustion via oversized events.
pub const MAX_PAYLOAD_BYTES: usize = 1_048_576; // 1MB

/// Maximum length of a dotted event kind tag.
pub const MAX_KIND_LEN: usize = 128;

/// Maximum length of the optional `source` field.
pub const MAX_SOURCE_LEN: usize = 256;

/// Maximum length of the optional `trace_id` field.
pub const MAX_TRACE_ID_LEN: usize = 128;

/// Maximum length of the optional `dedupe_key` field.
pub const MAX_DEDUPE_KEY_LEN: usize = 256;

/// Maximum length of a contributor display name.
pub const MAX_CONTRIBUTOR_NAME_LEN: usize = 256;

//─────────────────────────────
//  Well-known event kinds
//─────────────────────────────

/// First event of every journal; binds the chain to the node key.
pub const KIND_GENESIS: &str = "system.genesis.v1";
/// Periodic signed `{seq, hash}` commitment used by fast verification.
pub const KIND_CHECKPOINT: &str = "system.checkpoint.v1";
/// Kill-switch level transition.
pub const KIND_KILL_SWITCH: &str = "system.kill_switch.v1";
/// Signed projection snapshot emitted alongside the log.
pub const KIND_SNAPSHOT: &str = "system.snapshot.v1";
/// Regime classification change.
pub const KIND_REGIME_CHANGED: &str = "regime.changed.v1";
/// Cycle terminated early at a deadline.
pub const KIND_CYCLE_PARTIAL: &str = "cycle.partial.v1";
/// Position-opening intent.
pub const KIND_INTENT_OPEN: &str = "intent.open.v1";
/// Position-closing intent.
pub const KIND_INTENT_CLOSE: &str = "intent.close.v1";
/// Pending profit-share obligation.
pub const KIND_KARMA_INTENT: &str = "karma.intent.v1";
/// Atomic settlement of karma intents.
pub const KIND_KARMA_SETTLE: &str = "karma.settle.v1";
/// Settlement-policy change under elevated authorization.
pub const KIND_KARMA_POLICY_CHANGE: &str = "karma.policy_change.v1";
/// Contributor registration.
pub const KIND_CONTRIBUTOR_REGISTER: &str = "contributor.register.v1";
/// Link between a signal event and its contributor.
pub const KIND_ATTRIBUTION: &str = "attribution.v1";
/// Realized outcome of an attributed signal.
pub const KIND_ATTRIBUTION_OUTCOME: &str = "attribution.outcome.v1";
/// Domain-weight adjustment.
pub const KIND_WEIGHTS_ADJUSTED: &str = "weights.adjusted.v1";
/// Prefix shared by all producer signal events.
pub const SIGNAL_PREFIX: &str = "signal.";
/// Prefix for producer health notices emitted by the quality phase.
pub const PRODUCER_HEALTH_PREFIX: &str = "producer_health.";

//─────────────────────────────
//  Node identity
//─────────────────────────────

/// Stable identifier of a signing node, derived from its public key.
///
/// Every event carries the `NodeId` of the identity that signed it; the
/// genesis event commits the chain to exactly one of these.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    /// Borrow the inner identifier string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

//─────────────────────────────
//  Event kind validation
//─────────────────────────────

/// Errors raised by primitive-level validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Kind tag is not a well-formed dotted identifier.
    #[error("invalid event kind: {0}")]
    InvalidKind(String),
    /// A bounded field exceeded its maximum length.
    #[error("{field} exceeds maximum length ({len} > {max})")]
    TooLong {
        /// Name of the offending field.
        field: &'static str,
        /// Observed length.
        len: usize,
        /// Allowed maximum.
        max: usize,
    },
    /// A field that must be non-empty was empty.
    #[error("{0} must not be empty")]
    Empty(&'static str),
}

/// Validate a dotted event kind tag such as `signal.ta.rsi.v1`.
///
/// Kinds are lowercase `[a-z0-9_]` segments joined by single dots, at least
/// two segments, bounded by [`MAX_KIND_LEN`]. The canonical header encoding
/// relies on kinds never containing separator bytes, so this check is load
/// bearing for hashing, not just hygiene.
pub fn validate_kind(kind: &str) -> Result<(), ValidationError> {
    if kind.is_empty() {
        return Err(ValidationError::Empty("kind"));
    }
    if kind.len() > MAX_KIND_LEN {
        return Err(ValidationError::TooLong {
            field: "kind",
            len: kind.len(),
            max: MAX_KIND_LEN,
        });
    }
    let segments: Vec<&str> = kind.split('.').collect();
    if segments.len() < 2 {
        return Err(ValidationError::InvalidKind(kind.to_string()));
    }
    for segment in &segments {
        if segment.is_empty()
            || !segment
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
        {
            return Err(ValidationError::InvalidKind(kind.to_string()));
        }
    }
    Ok(())
}

/// True when `kind` names a producer signal (`signal.*`).
pub fn is_signal_kind(kind: &str) -> bool {
    kind.starts_with(SIGNAL_PREFIX)
}

/// Extract the producer domain from a signal kind (`signal.ta.rsi.v1` → `ta`).
pub fn signal_domain(kind: &str) -> Option<&str> {
    kind.strip_prefix(SIGNAL_PREFIX)?.split('.').next()
}

//─────────────────────────────
//  Kill-switch levels
//─────────────────────────────

/// Monotonic safety level gating intent emission.
///
/// Levels only ever rise automatically; lowering requires an operator event
/// carrying elevated authorization.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum KillLevel {
    /// Normal operation; entries and exits allowed.
    #[serde(rename = "L0_NOMINAL")]
    Nominal = 0,
    /// Elevated caution; new entries blocked at the ingress boundary.
    #[serde(rename = "L1_CAUTION")]
    Caution = 1,
    /// Defensive posture; only exits are allowed.
    #[serde(rename = "L2_DEFENSIVE")]
    Defensive = 2,
    /// Lockdown; all intents refused.
    #[serde(rename = "L3_LOCKDOWN")]
    Lockdown = 3,
    /// Emergency stop; all intents refused, operator intervention expected.
    #[serde(rename = "L4_EMERGENCY")]
    Emergency = 4,
}

impl KillLevel {
    /// Numeric level, `0..=4`.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Parse a numeric level.
    pub fn from_u8(level: u8) -> Option<Self> {
        match level {
            0 => Some(Self::Nominal),
            1 => Some(Self::Caution),
            2 => Some(Self::Defensive),
            3 => Some(Self::Lockdown),
            4 => Some(Self::Emergency),
            _ => None,
        }
    }

    /// Wire label, e.g. `L2_DEFENSIVE`.
    pub fn label(self) -> &'static str {
        match self {
            Self::Nominal => "L0_NOMINAL",
            Self::Caution => "L1_CAUTION",
            Self::Defensive => "L2_DEFENSIVE",
            Self::Lockdown => "L3_LOCKDOWN",
            Self::Emergency => "L4_EMERGENCY",
        }
    }

    /// Parse a wire label.
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "L0_NOMINAL" => Some(Self::Nominal),
            "L1_CAUTION" => Some(Self::Caution),
            "L2_DEFENSIVE" => Some(Self::Defensive),
            "L3_LOCKDOWN" => Some(Self::Lockdown),
            "L4_EMERGENCY" => Some(Self::Emergency),
            _ => None,
        }
    }

    /// New position entries are permitted only at level zero.
    pub fn allows_entries(self) -> bool {
        self == Self::Nominal
    }

    /// Exits remain permitted below lockdown.
    pub fn allows_exits(self) -> bool {
        self < Self::Lockdown
    }
}

impl std::fmt::Display for KillLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

//─────────────────────────────
//  Contributor roles
//─────────────────────────────

/// Role assigned to a registered contributor; drives the permission matrix
/// enforced at the ingress boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Full control: cycles, kill switch (elevated), settlement.
    Operator,
    /// Automated signal producer.
    Agent,
    /// Human signal curator.
    Curator,
    /// Rate-limited trial contributor.
    Tester,
}

impl Role {
    /// Wire name of the role.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Operator => "operator",
            Self::Agent => "agent",
            Self::Curator => "curator",
            Self::Tester => "tester",
        }
    }

    /// Parse a wire role name.
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "operator" => Some(Self::Operator),
            "agent" => Some(Self::Agent),
            "curator" => Some(Self::Curator),
            "tester" => Some(Self::Tester),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

//─────────────────────────────
//  Market regime
//─────────────────────────────

/// Coarse market-state label produced by the regime phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Regime {
    /// Early uptrend, breadth improving.
    #[serde(rename = "EARLY_BULL")]
    EarlyBull,
    /// Established uptrend.
    #[serde(rename = "BULL")]
    Bull,
    /// Directionless, mean-reverting conditions.
    #[serde(rename = "CHOP")]
    Chop,
    /// Established downtrend.
    #[serde(rename = "BEAR")]
    Bear,
    /// Disorderly conditions; risk controls dominate.
    #[serde(rename = "CRISIS")]
    Crisis,
}

impl Regime {
    /// Wire label, e.g. `EARLY_BULL`.
    pub fn label(self) -> &'static str {
        match self {
            Self::EarlyBull => "EARLY_BULL",
            Self::Bull => "BULL",
            Self::Chop => "CHOP",
            Self::Bear => "BEAR",
            Self::Crisis => "CRISIS",
        }
    }

    /// Parse a wire label.
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "EARLY_BULL" => Some(Self::EarlyBull),
            "BULL" => Some(Self::Bull),
            "CHOP" => Some(Self::Chop),
            "BEAR" => Some(Self::Bear),
            "CRISIS" => Some(Self::Crisis),
            _ => None,
        }
    }
}

impl std::fmt::Display for Regime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

//─────────────────────────────
//  Position direction
//─────────────────────────────

/// Direction of a position intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Long exposure.
    Long,
    /// Short exposure.
    Short,
}

//─────────────────────────────
//  Trade mode
//─────────────────────────────

/// Whether intents settle against a paper book or a live venue.
///
/// Karma intents are generated only in [`TradeMode::Live`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeMode {
    /// Simulated fills; no real obligations are created.
    Paper,
    /// Real venue; realized gains create karma obligations when enabled.
    Live,
}

impl Default for TradeMode {
    fn default() -> Self {
        Self::Paper
    }
}
