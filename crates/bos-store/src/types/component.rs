//! The component record: one node's reconciliation state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bos_core::{derive_status, Action, BootArtifacts, Phase, Status, Tenant};

/// A component's declared goal state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DesiredState {
    /// The image identity the node should be booted into. Empty artifacts
    /// mean the goal is powered off.
    #[serde(default)]
    pub boot_artifacts: BootArtifacts,
    /// Configuration-framework configuration to apply after boot; empty
    /// for none.
    #[serde(default)]
    pub configuration: String,
    /// Referral token handed to the boot-script service for this desired
    /// state, set by the power-on operator.
    #[serde(default)]
    pub bss_token: String,
}

impl DesiredState {
    /// True when nothing is desired (artifacts, configuration and token
    /// all unset).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.boot_artifacts.is_empty() && self.configuration.is_empty() && self.bss_token.is_empty()
    }
}

/// The last identity a node was observed booted into.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActualState {
    /// Observed boot artifacts.
    #[serde(default)]
    pub boot_artifacts: BootArtifacts,
    /// Referral token the node reported booting with.
    #[serde(default)]
    pub bss_token: String,
    /// When this observation was recorded. `None` until first report.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl ActualState {
    /// True when no boot state has been observed (or it has been cleared).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.boot_artifacts.is_empty() && self.bss_token.is_empty()
    }
}

/// A pending update applied only by an explicit apply-staged call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StagedState {
    /// Staged boot artifacts.
    #[serde(default)]
    pub boot_artifacts: BootArtifacts,
    /// Staged configuration.
    #[serde(default)]
    pub configuration: String,
    /// The session that staged this state.
    #[serde(default)]
    pub session: String,
}

impl StagedState {
    /// True when nothing is staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.boot_artifacts.is_empty() && self.configuration.is_empty() && self.session.is_empty()
    }
}

/// The last action an operator took against this component.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LastAction {
    /// What was done.
    #[serde(default)]
    pub action: Action,
    /// How many times this action has been attempted.
    #[serde(default)]
    pub num_attempts: u32,
    /// When the action was last recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    /// True once the retry budget for this action is exhausted.
    #[serde(default)]
    pub failed: bool,
}

/// Stored status fields. The externally visible status is derived; see
/// [`Component::status`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusFields {
    /// Current reconciliation phase.
    #[serde(default)]
    pub phase: Phase,
    /// Status override, for states that cannot be derived from internal
    /// fields alone (observed power, failed configuration).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_override: Option<Status>,
}

/// Attempt counters, one per power action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventStats {
    /// Power-on requests issued.
    #[serde(default)]
    pub power_on_attempts: u32,
    /// Graceful power-off requests issued.
    #[serde(default)]
    pub power_off_graceful_attempts: u32,
    /// Forceful power-off requests issued.
    #[serde(default)]
    pub power_off_forceful_attempts: u32,
}

/// One node's reconciliation record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Component {
    /// Node identifier (hardware name).
    pub id: String,
    /// Owning tenant; empty for the untenanted bucket.
    #[serde(default)]
    pub tenant: Tenant,
    /// Disabled components are skipped by every operator.
    #[serde(default)]
    pub enabled: bool,
    /// Declared goal.
    #[serde(default)]
    pub desired_state: DesiredState,
    /// Last observed reality.
    #[serde(default)]
    pub actual_state: ActualState,
    /// Pending update, applied via apply-staged.
    #[serde(default, skip_serializing_if = "StagedState::is_empty")]
    pub staged_state: StagedState,
    /// Last recorded operator action.
    #[serde(default)]
    pub last_action: LastAction,
    /// Stored status fields.
    #[serde(default)]
    pub status: StatusFields,
    /// Most recent reconciliation error, empty when clear.
    #[serde(default)]
    pub error: String,
    /// Session currently owning this component, empty when unowned.
    #[serde(default)]
    pub session: String,
    /// Per-component retry limit; `None` falls back to the
    /// `default_retry_policy` option. `-1` disables the limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<i64>,
    /// Attempt counters.
    #[serde(default)]
    pub event_stats: EventStats,
}

impl Component {
    /// A fresh, disabled component with empty states.
    #[must_use]
    pub fn new(id: impl Into<String>, tenant: Tenant) -> Self {
        Self {
            id: id.into(),
            tenant,
            ..Self::default()
        }
    }

    /// The store key for this component.
    #[must_use]
    pub fn key(&self) -> String {
        self.tenant.key_for(&self.id)
    }

    /// The derived, externally visible status.
    #[must_use]
    pub fn status(&self) -> Status {
        derive_status(
            self.status.phase,
            self.last_action.action,
            self.status.status_override,
        )
    }

    /// True when the observed boot artifacts equal the desired ones.
    #[must_use]
    pub fn boot_artifacts_match(&self) -> bool {
        self.desired_state.boot_artifacts == self.actual_state.boot_artifacts
    }

    /// True when the desired state is "powered off" (no kernel set).
    #[must_use]
    pub fn desired_boot_state_is_off(&self) -> bool {
        !self.desired_state.boot_artifacts.has_kernel()
    }

    /// True when no configuration is desired.
    #[must_use]
    pub fn desired_configuration_is_none(&self) -> bool {
        self.desired_state.configuration.is_empty()
    }

    /// The effective retry limit given the configured default. `None`
    /// means unlimited.
    #[must_use]
    pub fn retry_limit(&self, default_retry_policy: i64) -> Option<u32> {
        let limit = self.retry_policy.unwrap_or(default_retry_policy);
        u32::try_from(limit).ok()
    }

    /// Seconds since the last recorded action, or `None` when no action
    /// has a timestamp yet.
    #[must_use]
    pub fn seconds_since_last_action(&self, now: DateTime<Utc>) -> Option<i64> {
        self.last_action
            .last_updated
            .map(|at| (now - at).num_seconds())
    }

    /// Record an action: bump the per-action attempt counter and reset the
    /// failed flag. Idempotence note: operators call this once per
    /// external request actually issued.
    pub fn record_action(&mut self, action: Action, now: DateTime<Utc>) {
        if self.last_action.action == action {
            self.last_action.num_attempts += 1;
        } else {
            self.last_action.action = action;
            self.last_action.num_attempts = 1;
        }
        self.last_action.last_updated = Some(now);
        self.last_action.failed = false;
        match action {
            Action::PowerOn => self.event_stats.power_on_attempts += 1,
            Action::PowerOffGracefully => self.event_stats.power_off_graceful_attempts += 1,
            Action::PowerOffForcefully => self.event_stats.power_off_forceful_attempts += 1,
            _ => {}
        }
    }
}

/// A boot-script referral token and the artifacts it was issued for.
///
/// The boot-script service maps the token back to these artifacts when the
/// node network-boots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BssTokenRecord {
    /// The opaque token.
    pub token: String,
    /// Kernel the token refers to.
    pub kernel: String,
    /// Kernel parameters the token refers to.
    pub kernel_parameters: String,
    /// Initrd the token refers to.
    pub initrd: String,
}
