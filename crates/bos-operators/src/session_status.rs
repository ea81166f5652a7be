//! Session-status aggregation.
//!
//! Derives session-level progress from the component records owning the
//! session. Aggregation is pure: it reads components by paged scan and
//! computes percentages; repeated aggregation over a quiescent set
//! returns identical values.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bos_core::{Phase, Status};
use bos_store::types::{Component, Operation, Session, SessionState};
use bos_store::{kind, Store};

use crate::error::Result;

/// Most component ids listed per distinct error before truncation.
const MAX_COMPONENTS_IN_ERROR_DETAILS: usize = 10;

/// Per-phase share of the session's components.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhasePercentages {
    /// Share of components that finished (successfully or not).
    pub percent_complete: f64,
    /// Share currently powering on.
    pub percent_powering_on: f64,
    /// Share currently powering off.
    pub percent_powering_off: f64,
    /// Share currently configuring.
    pub percent_configuring: f64,
}

/// The components that reported one distinct error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorSummary {
    /// How many components reported it.
    pub count: usize,
    /// Comma-joined component ids, truncated past
    /// [`MAX_COMPONENTS_IN_ERROR_DETAILS`].
    pub list: String,
}

/// Session timing block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Timing {
    /// When the session was created.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    /// When the session completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Elapsed seconds, to completion or to now.
    pub duration: String,
}

/// The aggregated status of one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStatusReport {
    /// The session's lifecycle state.
    pub status: SessionState,
    /// Owned plus staged component count.
    pub managed_components_count: usize,
    /// Per-phase shares.
    pub phases: PhasePercentages,
    /// Share of components holding this session staged.
    pub percent_staged: f64,
    /// Share of eligible components that settled successfully.
    pub percent_successful: f64,
    /// Share of eligible components that failed.
    pub percent_failed: f64,
    /// Distinct errors and the components reporting them.
    pub error_summary: BTreeMap<String, ErrorSummary>,
    /// Timing block.
    pub timing: Timing,
}

/// True when a component has reached a terminal state for the given
/// operation: settled for boot flows, off for shutdowns, or failed.
#[must_use]
pub fn component_is_terminal(component: &Component, operation: Operation) -> bool {
    match component.status() {
        Status::Failed => true,
        Status::Stable => !matches!(operation, Operation::Shutdown),
        Status::Off => true,
        _ => false,
    }
}

/// True when every eligible (enabled) component is terminal. A session
/// with no eligible components left is terminal by definition.
#[must_use]
pub fn session_is_terminal(components: &[Component], operation: Operation) -> bool {
    components
        .iter()
        .filter(|c| c.enabled)
        .all(|c| component_is_terminal(c, operation))
}

fn percentage(count: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let raw = (count as f64 / denominator as f64) * 100.0;
    (raw * 100.0).round() / 100.0
}

/// Components currently owned by the session.
///
/// # Errors
///
/// Fails when the store is unavailable.
pub fn owned_components<S: Store>(store: &S, session: &Session) -> Result<Vec<Component>> {
    let name = session.name.clone();
    let pages = store.scan(
        kind::COMPONENTS,
        &session.tenant.key_prefix(),
        |c: &Component| c.session == name,
        0,
    )?;
    Ok(pages.into_iter().flatten().collect())
}

/// Components holding this session in their staged state.
///
/// # Errors
///
/// Fails when the store is unavailable.
pub fn staged_components<S: Store>(store: &S, session: &Session) -> Result<Vec<Component>> {
    let name = session.name.clone();
    let pages = store.scan(
        kind::COMPONENTS,
        &session.tenant.key_prefix(),
        |c: &Component| c.staged_state.session == name,
        0,
    )?;
    Ok(pages.into_iter().flatten().collect())
}

/// Aggregate the session's status from its component records.
///
/// # Errors
///
/// Fails when the store is unavailable.
pub fn session_status<S: Store>(
    store: &S,
    session: &Session,
    now: DateTime<Utc>,
) -> Result<SessionStatusReport> {
    let owned = owned_components(store, session)?;
    let staged = staged_components(store, session)?;

    let eligible = owned.len();
    let settled = owned
        .iter()
        .filter(|c| matches!(c.status(), Status::Stable | Status::Off))
        .count();
    let failed = owned
        .iter()
        .filter(|c| c.status() == Status::Failed)
        .count();
    let non_failed = eligible - failed;

    let phase_count = |phase: Phase| {
        owned
            .iter()
            .filter(|c| c.status() != Status::Failed && c.status.phase == phase)
            .count()
    };

    let mut error_summary: BTreeMap<String, ErrorSummary> = BTreeMap::new();
    let mut errors_by_text: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for component in &owned {
        if !component.error.is_empty() {
            errors_by_text
                .entry(component.error.as_str())
                .or_default()
                .insert(component.id.as_str());
        }
    }
    for (error, ids) in errors_by_text {
        let mut list = ids
            .iter()
            .take(MAX_COMPONENTS_IN_ERROR_DETAILS)
            .copied()
            .collect::<Vec<_>>()
            .join(",");
        if ids.len() > MAX_COMPONENTS_IN_ERROR_DETAILS {
            list.push_str("...");
        }
        error_summary.insert(
            error.to_string(),
            ErrorSummary {
                count: ids.len(),
                list,
            },
        );
    }
    if let Some(session_error) = &session.status.error {
        error_summary
            .entry(session_error.clone())
            .or_insert(ErrorSummary {
                count: 1,
                list: String::new(),
            });
    }

    let duration = match (session.status.start_time, session.status.end_time) {
        (Some(start), Some(end)) => format!("{}s", (end - start).num_seconds().max(0)),
        (Some(start), None) => format!("{}s", (now - start).num_seconds().max(0)),
        _ => String::new(),
    };

    Ok(SessionStatusReport {
        status: session.status.status,
        managed_components_count: owned.len() + staged.len(),
        phases: PhasePercentages {
            percent_complete: percentage(settled + failed, eligible),
            percent_powering_on: percentage(phase_count(Phase::PoweringOn), non_failed),
            percent_powering_off: percentage(phase_count(Phase::PoweringOff), non_failed),
            percent_configuring: percentage(phase_count(Phase::Configuring), non_failed),
        },
        percent_staged: percentage(staged.len(), owned.len() + staged.len()),
        percent_successful: percentage(settled, eligible),
        percent_failed: percentage(failed, eligible),
        error_summary,
        timing: Timing {
            start_time: session.status.start_time,
            end_time: session.status.end_time,
            duration,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bos_core::{current_timestamp, Tenant};
    use bos_store::types::SessionStatus;
    use bos_store::RocksStore;
    use tempfile::TempDir;

    fn store() -> (RocksStore, TempDir) {
        let dir = TempDir::new().unwrap();
        (RocksStore::open(dir.path()).unwrap(), dir)
    }

    fn session(tenant: &Tenant) -> Session {
        Session {
            name: "s1".into(),
            tenant: tenant.clone(),
            template_name: "t1".into(),
            operation: Operation::Boot,
            limit: String::new(),
            stage: false,
            include_disabled: false,
            components: String::new(),
            status: SessionStatus {
                start_time: Some(current_timestamp()),
                ..SessionStatus::default()
            },
        }
    }

    fn put_component(store: &RocksStore, tenant: &Tenant, id: &str, f: impl FnOnce(&mut Component)) {
        let mut component = Component::new(id, tenant.clone());
        component.enabled = true;
        component.session = "s1".into();
        f(&mut component);
        store
            .put(kind::COMPONENTS, &component.key(), &component)
            .unwrap();
    }

    #[test]
    fn all_stable_is_one_hundred_percent() {
        let (store, _dir) = store();
        let tenant = Tenant::untenanted();
        for id in ["x1", "x2"] {
            put_component(&store, &tenant, id, |_| {});
        }

        let report = session_status(&store, &session(&tenant), current_timestamp()).unwrap();
        assert_eq!(report.managed_components_count, 2);
        assert_eq!(report.percent_successful, 100.0);
        assert_eq!(report.percent_failed, 0.0);
        assert_eq!(report.phases.percent_complete, 100.0);
        assert!(report.error_summary.is_empty());
    }

    #[test]
    fn failed_components_are_counted_and_excluded_from_phases() {
        let (store, _dir) = store();
        let tenant = Tenant::untenanted();
        put_component(&store, &tenant, "x1", |c| {
            c.status.phase = Phase::PoweringOn;
        });
        put_component(&store, &tenant, "x2", |c| {
            c.status.status_override = Some(Status::Failed);
            c.error = "power controller fault".into();
        });

        let report = session_status(&store, &session(&tenant), current_timestamp()).unwrap();
        assert_eq!(report.percent_failed, 50.0);
        // The one non-failed component is powering on: 100% of phases.
        assert_eq!(report.phases.percent_powering_on, 100.0);
        assert_eq!(report.error_summary["power controller fault"].count, 1);
        assert_eq!(report.error_summary["power controller fault"].list, "x2");
    }

    #[test]
    fn aggregation_is_idempotent() {
        let (store, _dir) = store();
        let tenant = Tenant::untenanted();
        put_component(&store, &tenant, "x1", |c| {
            c.status.phase = Phase::Configuring;
        });

        let s = session(&tenant);
        let now = current_timestamp();
        let first = session_status(&store, &s, now).unwrap();
        let second = session_status(&store, &s, now).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn tenancy_bounds_the_aggregation() {
        let (store, _dir) = store();
        let blue = Tenant::from("blue");
        let red = Tenant::from("red");
        put_component(&store, &blue, "n1", |_| {});
        put_component(&store, &red, "n1", |c| {
            c.status.status_override = Some(Status::Failed);
        });

        let report = session_status(&store, &session(&blue), current_timestamp()).unwrap();
        assert_eq!(report.managed_components_count, 1);
        assert_eq!(report.percent_failed, 0.0);
    }

    #[test]
    fn session_error_appears_in_summary() {
        let (store, _dir) = store();
        let tenant = Tenant::untenanted();
        put_component(&store, &tenant, "good", |_| {});
        let mut s = session(&tenant);
        s.status.error = Some("unknown component ids: bogus".into());

        let report = session_status(&store, &s, current_timestamp()).unwrap();
        assert!(report.error_summary.contains_key("unknown component ids: bogus"));
    }

    #[test]
    fn terminal_rules_follow_the_operation() {
        let mut stable = Component::new("x1", Tenant::untenanted());
        stable.enabled = true;
        let mut off = Component::new("x2", Tenant::untenanted());
        off.enabled = true;
        off.status.status_override = Some(Status::Off);
        let mut pending = Component::new("x3", Tenant::untenanted());
        pending.enabled = true;
        pending.status.phase = Phase::PoweringOn;

        assert!(session_is_terminal(
            &[stable.clone(), off.clone()],
            Operation::Boot
        ));
        assert!(!session_is_terminal(
            &[stable.clone(), pending],
            Operation::Boot
        ));
        // A shutdown is not done while components sit "stable" (booted).
        assert!(!session_is_terminal(&[stable], Operation::Shutdown));
        assert!(session_is_terminal(&[off], Operation::Shutdown));
    }

    #[test]
    fn staged_components_dilute_managed_count() {
        let (store, _dir) = store();
        let tenant = Tenant::untenanted();
        put_component(&store, &tenant, "x1", |_| {});
        let mut staged = Component::new("x2", tenant.clone());
        staged.enabled = true;
        staged.staged_state.session = "s1".into();
        staged.staged_state.configuration = "cfg".into();
        store.put(kind::COMPONENTS, &staged.key(), &staged).unwrap();

        let report = session_status(&store, &session(&tenant), current_timestamp()).unwrap();
        assert_eq!(report.managed_components_count, 2);
        assert_eq!(report.percent_staged, 50.0);
    }
}
