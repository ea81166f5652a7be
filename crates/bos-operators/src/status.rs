//! Status operator.
//!
//! Observes every enabled component — power state from the power control
//! service, configuration state from the configuration framework — and
//! moves its phase/status accordingly. This is the only operator that
//! declares success (`stable`), settles shutdowns (`off`), or gives up
//! on a component (`failed`).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use bos_clients::cfs::{CfsComponent, ConfigurationStatus};
use bos_clients::pcs::PowerState;
use bos_core::{current_timestamp, Action, Phase, Status};
use bos_store::types::{ActualState, Component, LastAction, OptionsSnapshot};
use bos_store::{kind, Store};

use crate::env::Env;
use crate::error::Result;
use crate::framework::{chunk_ids, seconds_since, Operator};

/// What a status check decided for one component.
#[derive(Debug, Clone, Default, PartialEq)]
struct StatusVerdict {
    phase: Phase,
    status_override: Option<Status>,
    error: Option<String>,
    mark_action_failed: bool,
    /// Settled successfully: clear action, attempts and error.
    settle: bool,
    /// Clear the observed boot state (node is powered off).
    clear_actual_state: bool,
}

/// Drives phase/status transitions from observed state.
#[derive(Debug, Default)]
pub struct StatusOperator;

impl StatusOperator {
    /// Create the operator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

/// Evaluate the transition table for one component.
///
/// Rules are evaluated in order; the first match wins. A component with
/// no observed power state keeps its prior status untouched.
fn check_status(
    component: &Component,
    power: Option<PowerState>,
    cfs: Option<&CfsComponent>,
    opts: &OptionsSnapshot,
    now: DateTime<Utc>,
) -> Option<StatusVerdict> {
    // A component that exhausted its retries stays failed until a new
    // session resets its budget; re-deriving would resurrect it.
    if component.last_action.failed && component.status.status_override == Some(Status::Failed) {
        return None;
    }

    let power = match power {
        Some(observed @ (PowerState::On | PowerState::Off)) => observed,
        // No answer for this component; leave it as it is rather than
        // clobbering known state with unknown.
        Some(PowerState::Undefined) | None => return None,
    };

    let mut verdict = StatusVerdict::default();
    match power {
        PowerState::Off => {
            verdict.clear_actual_state = !component.actual_state.is_empty();
            if component.desired_boot_state_is_off() {
                // Goal reached for shutdown flows.
                verdict.phase = Phase::None;
                verdict.status_override = Some(Status::Off);
                verdict.settle = true;
            } else {
                verdict.phase = Phase::PoweringOn;
            }
        }
        PowerState::On => {
            if component.desired_boot_state_is_off() {
                verdict.phase = Phase::PoweringOff;
            } else if component.boot_artifacts_match() {
                return Some(check_configuration(component, cfs, verdict));
            } else {
                return check_boot_mismatch(component, opts, now, verdict);
            }
        }
        PowerState::Undefined => unreachable!("filtered above"),
    }
    Some(verdict)
}

/// Booted into the right artifacts; status now depends on configuration.
fn check_configuration(
    component: &Component,
    cfs: Option<&CfsComponent>,
    mut verdict: StatusVerdict,
) -> StatusVerdict {
    if component.desired_configuration_is_none() {
        verdict.phase = Phase::None;
        verdict.settle = true;
        return verdict;
    }
    let Some(cfs) = cfs else {
        // The framework has no record yet; stay in configuring without
        // declaring anything.
        verdict.phase = Phase::Configuring;
        return verdict;
    };
    if cfs.desired_config != component.desired_state.configuration {
        // The configuration operator has not caught up yet.
        verdict.phase = Phase::Configuring;
        return verdict;
    }
    match cfs.configuration_status {
        ConfigurationStatus::Configured => {
            verdict.phase = Phase::None;
            verdict.settle = true;
        }
        ConfigurationStatus::Pending => {
            verdict.phase = Phase::Configuring;
        }
        ConfigurationStatus::Failed => {
            verdict.phase = Phase::Configuring;
            verdict.status_override = Some(Status::Failed);
            verdict.mark_action_failed = true;
            verdict.error = Some("configuration framework reported failure".to_string());
        }
        ConfigurationStatus::Unknown => {
            verdict.phase = Phase::Configuring;
            verdict.status_override = Some(Status::Failed);
            verdict.mark_action_failed = true;
            verdict.error = Some(
                "configuration framework is not reporting a valid status for this component"
                    .to_string(),
            );
        }
    }
    verdict
}

/// Powered on with the wrong artifacts: either a boot still in its grace
/// window, a reboot that has not powered off yet, or a failed attempt.
fn check_boot_mismatch(
    component: &Component,
    opts: &OptionsSnapshot,
    now: DateTime<Utc>,
    mut verdict: StatusVerdict,
) -> Option<StatusVerdict> {
    let within_grace = component.last_action.action == Action::PowerOn
        && component
            .last_action
            .last_updated
            .is_some_and(|at| seconds_since(now, at) < opts.max_power_on_wait_time);
    if within_grace {
        verdict.phase = Phase::PoweringOn;
        return Some(verdict);
    }

    let exhausted = component
        .retry_limit(opts.default_retry_policy)
        .is_some_and(|limit| component.event_stats.power_on_attempts >= limit);
    if exhausted {
        verdict.phase = component.status.phase;
        verdict.status_override = Some(Status::Failed);
        verdict.mark_action_failed = true;
        verdict.error = Some(format!(
            "node booted with artifacts that do not match its desired state after {} attempts",
            component.event_stats.power_on_attempts
        ));
    } else {
        // Power off and try again.
        verdict.phase = Phase::PoweringOff;
    }
    Some(verdict)
}

fn apply_verdict(component: &mut Component, verdict: &StatusVerdict) {
    component.status.phase = verdict.phase;
    component.status.status_override = verdict.status_override;
    if verdict.mark_action_failed {
        component.last_action.failed = true;
    }
    if let Some(error) = &verdict.error {
        component.error.clone_from(error);
    }
    if verdict.settle {
        component.last_action = LastAction::default();
        component.error.clear();
    }
    if verdict.clear_actual_state {
        component.actual_state = ActualState::default();
    }
}

fn verdict_changes_component(component: &Component, verdict: &StatusVerdict) -> bool {
    let mut updated = component.clone();
    apply_verdict(&mut updated, verdict);
    updated != *component
}

#[async_trait]
impl<S: Store> Operator<S> for StatusOperator {
    fn name(&self) -> &'static str {
        "status"
    }

    async fn run_pass(&self, env: &Env<S>, opts: &OptionsSnapshot) -> Result<()> {
        let pages = env.store.scan(
            kind::COMPONENTS,
            "",
            |c: &Component| c.enabled,
            opts.max_component_batch_size,
        )?;
        let now = current_timestamp();

        for page in pages {
            let ids: Vec<String> = page.iter().map(|c| c.id.clone()).collect();
            let power_states = env
                .clients
                .pcs
                .power_status(&ids, Duration::from_secs(opts.pcs_read_timeout))
                .await?;
            let cfs_states = self
                .configuration_states(env, &page, opts)
                .await?;

            let mut updates = 0usize;
            for component in &page {
                let verdict = check_status(
                    component,
                    power_states.get(&component.id).copied(),
                    cfs_states.get(&component.id),
                    opts,
                    now,
                );
                let Some(verdict) = verdict else { continue };
                if !verdict_changes_component(component, &verdict) {
                    continue;
                }
                env.store
                    .patch(kind::COMPONENTS, &component.key(), |c: &mut Component| {
                        apply_verdict(c, &verdict);
                    })?;
                updates += 1;
            }
            if updates > 0 {
                tracing::info!(updates, "components required status updates");
            }
        }
        Ok(())
    }
}

impl StatusOperator {
    /// Configuration state for the components in the page that actually
    /// desire a configuration; others never need the call.
    async fn configuration_states<S: Store>(
        &self,
        env: &Env<S>,
        page: &[Component],
        opts: &OptionsSnapshot,
    ) -> Result<HashMap<String, CfsComponent>> {
        let ids: Vec<String> = page
            .iter()
            .filter(|c| !c.desired_configuration_is_none())
            .map(|c| c.id.clone())
            .collect();
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let timeout = Duration::from_secs(opts.cfs_read_timeout);
        let mut states = HashMap::new();
        for batch in chunk_ids(&ids, opts.max_component_batch_size) {
            states.extend(env.clients.cfs.components(&batch, timeout).await?);
        }
        Ok(states)
    }
}
