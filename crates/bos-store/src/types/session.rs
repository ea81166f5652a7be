//! Session records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bos_core::Tenant;

/// What a session does to its target nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Power nodes on into the template's artifacts.
    Boot,
    /// Power off, then boot into the template's artifacts.
    Reboot,
    /// Power nodes off.
    Shutdown,
}

impl Operation {
    /// Parse an operation from its wire form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "boot" => Some(Self::Boot),
            "reboot" => Some(Self::Reboot),
            "shutdown" => Some(Self::Shutdown),
            _ => None,
        }
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Created, not yet picked up by the session-setup operator.
    #[default]
    Pending,
    /// Components claimed; reconciliation in progress.
    Running,
    /// All eligible components settled (or failed).
    Complete,
}

/// Session status block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStatus {
    /// Lifecycle state.
    #[serde(default)]
    pub status: SessionState,
    /// When the session was created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    /// When the session completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Setup error, if the session failed during setup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// An activation of a session template against a set of nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Session name, unique per tenant.
    pub name: String,
    /// Owning tenant.
    #[serde(default)]
    pub tenant: Tenant,
    /// The template this session instantiates.
    pub template_name: String,
    /// The operation to perform.
    pub operation: Operation,
    /// Node selector restricting the template's effective set; empty or
    /// `*` for no restriction.
    #[serde(default)]
    pub limit: String,
    /// Write to staged state instead of desired state.
    #[serde(default)]
    pub stage: bool,
    /// Include components that are disabled.
    #[serde(default)]
    pub include_disabled: bool,
    /// Resolved component ids, comma-joined, recorded at setup time. Not
    /// authoritative; the component records are.
    #[serde(default)]
    pub components: String,
    /// Status block.
    #[serde(default)]
    pub status: SessionStatus,
}

impl Session {
    /// The store key for this session.
    #[must_use]
    pub fn key(&self) -> String {
        self.tenant.key_for(&self.name)
    }

    /// True when the session limit imposes no restriction.
    #[must_use]
    pub fn limit_is_unrestricted(&self) -> bool {
        self.limit.is_empty() || self.limit == "*" || self.limit == "all"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_wire_names() {
        assert_eq!(Operation::parse("boot"), Some(Operation::Boot));
        assert_eq!(Operation::parse("reboot"), Some(Operation::Reboot));
        assert_eq!(Operation::parse("shutdown"), Some(Operation::Shutdown));
        assert_eq!(Operation::parse("restart"), None);

        let wire = serde_json::to_string(&Operation::Shutdown).unwrap();
        assert_eq!(wire, "\"shutdown\"");
    }

    #[test]
    fn limit_wildcards() {
        let mut session = Session {
            name: "s1".into(),
            tenant: Tenant::untenanted(),
            template_name: "t1".into(),
            operation: Operation::Boot,
            limit: String::new(),
            stage: false,
            include_disabled: false,
            components: String::new(),
            status: SessionStatus::default(),
        };
        assert!(session.limit_is_unrestricted());
        session.limit = "*".into();
        assert!(session.limit_is_unrestricted());
        session.limit = "x1,x2".into();
        assert!(!session.limit_is_unrestricted());
    }
}
