//! Role permission matrix enforced at the ingress boundary.

use blessed_types::Role;

/// Operations the ingress boundary mediates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Submit an attributed producer signal.
    SubmitSignal,
    /// Trigger a brain cycle.
    TriggerCycle,
    /// Raise or (with elevation) lower the kill switch.
    SetKillSwitch,
    /// Settle karma intents.
    SettleKarma,
    /// Change karma settlement policy.
    ChangeKarmaPolicy,
    /// Append an arbitrary event outside the attributed signal path.
    AppendEvent,
    /// Register a new contributor.
    RegisterContributor,
}

impl Action {
    /// Stable name used in error messages and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SubmitSignal => "submit_signal",
            Self::TriggerCycle => "run_cycle",
            Self::SetKillSwitch => "set_kill_switch",
            Self::SettleKarma => "settle_karma",
            Self::ChangeKarmaPolicy => "change_karma_policy",
            Self::AppendEvent => "append_event",
            Self::RegisterContributor => "register_contributor",
        }
    }
}

/// Whether `role` may perform `action` at all. Elevated checks (lowering
/// the kill switch, unlocking settlement policy) are enforced on top of
/// this matrix by the capability's permission claims.
pub fn role_permits(role: Role, action: Action) -> bool {
    match role {
        Role::Operator => true,
        Role::Agent | Role::Curator | Role::Tester => matches!(action, Action::SubmitSignal),
    }
}
