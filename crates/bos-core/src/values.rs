//! State-machine vocabulary for component reconciliation.
//!
//! Components move between boot states through phases; the externally
//! visible status is derived from the phase, the last recorded action and
//! an optional override. See [`derive_status`] for the derivation rules.

use serde::{Deserialize, Serialize};

/// The reconciliation phase a component is currently in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// No phase; the component is settled.
    #[default]
    #[serde(rename = "")]
    None,
    /// The component needs to be (or is being) powered on.
    PoweringOn,
    /// The component needs to be (or is being) powered off.
    PoweringOff,
    /// The component is booted and waiting on configuration.
    Configuring,
}

impl Phase {
    /// True for the empty phase.
    #[must_use]
    pub fn is_none(self) -> bool {
        self == Self::None
    }
}

/// The last action an operator recorded against a component.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// No action recorded yet.
    #[default]
    #[serde(rename = "")]
    None,
    /// Power-on was requested from the power control service.
    PowerOn,
    /// Graceful power-off was requested.
    PowerOffGracefully,
    /// Forceful power-off was requested.
    PowerOffForcefully,
    /// A shutdown is queued but not yet requested.
    ShutdownPending,
    /// Staged state was promoted to desired state.
    ApplyStaged,
    /// A session claimed this component and wrote its desired state.
    SessionSetup,
    /// The discovery operator created this record.
    NewlyDiscovered,
}

/// The externally visible component status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Desired and actual state agree; nothing to do.
    #[default]
    Stable,
    /// Powered on with no pending work.
    On,
    /// Powered off with no pending work.
    Off,
    /// Waiting for the power-on operator.
    PowerOnPending,
    /// Power-on has been requested.
    PowerOnCalled,
    /// Waiting for the graceful power-off operator.
    PowerOffPending,
    /// Graceful power-off has been requested.
    PowerOffGracefullyCalled,
    /// Forceful power-off has been requested.
    PowerOffForcefullyCalled,
    /// Booted, configuration in progress.
    Configuring,
    /// Reconciliation gave up on this component.
    Failed,
}

impl Status {
    /// Parse a status from its wire form. Unknown strings return `None`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "stable" => Some(Self::Stable),
            "on" => Some(Self::On),
            "off" => Some(Self::Off),
            "power_on_pending" => Some(Self::PowerOnPending),
            "power_on_called" => Some(Self::PowerOnCalled),
            "power_off_pending" => Some(Self::PowerOffPending),
            "power_off_gracefully_called" => Some(Self::PowerOffGracefullyCalled),
            "power_off_forcefully_called" => Some(Self::PowerOffForcefullyCalled),
            "configuring" => Some(Self::Configuring),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Derive the visible status from stored fields.
///
/// A non-empty override always wins. Otherwise the phase selects the
/// family and the last action distinguishes pending from called:
///
/// | phase | last action | status |
/// |---|---|---|
/// | powering_on | power_on | `power_on_called` |
/// | powering_on | anything else | `power_on_pending` |
/// | powering_off | power_off_gracefully | `power_off_gracefully_called` |
/// | powering_off | power_off_forcefully | `power_off_forcefully_called` |
/// | powering_off | anything else | `power_off_pending` |
/// | configuring | — | `configuring` |
/// | none | — | `stable` |
#[must_use]
pub fn derive_status(phase: Phase, last_action: Action, status_override: Option<Status>) -> Status {
    if let Some(overridden) = status_override {
        return overridden;
    }
    match phase {
        Phase::PoweringOn => {
            if last_action == Action::PowerOn {
                Status::PowerOnCalled
            } else {
                Status::PowerOnPending
            }
        }
        Phase::PoweringOff => match last_action {
            Action::PowerOffGracefully => Status::PowerOffGracefullyCalled,
            Action::PowerOffForcefully => Status::PowerOffForcefullyCalled,
            _ => Status::PowerOffPending,
        },
        Phase::Configuring => Status::Configuring,
        Phase::None => Status::Stable,
    }
}

/// The identity of a booted image: kernel, initrd and kernel parameters.
///
/// Two components running the same artifacts are, from the orchestrator's
/// point of view, booted identically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BootArtifacts {
    /// Object-store path of the kernel.
    #[serde(default)]
    pub kernel: String,
    /// Kernel command-line parameters.
    #[serde(default)]
    pub kernel_parameters: String,
    /// Object-store path of the initrd.
    #[serde(default)]
    pub initrd: String,
}

impl BootArtifacts {
    /// True when no artifact field is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.kernel.is_empty() && self.kernel_parameters.is_empty() && self.initrd.is_empty()
    }

    /// True when a kernel is set, i.e. the desired state is "booted".
    #[must_use]
    pub fn has_kernel(&self) -> bool {
        !self.kernel.is_empty()
    }
}
