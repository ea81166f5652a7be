//! Forceful power-off operator.
//!
//! Escalation path: components that were asked to power off gracefully
//! but are still up after the configured wait get a forceful power-off.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use bos_clients::pcs::PowerOperation;
use bos_core::{current_timestamp, Action, Phase, Status};
use bos_store::types::{Component, OptionsSnapshot};
use bos_store::{kind, Store};

use crate::env::Env;
use crate::error::Result;
use crate::framework::{
    fail_exhausted_components, retain_hsm_enabled, seconds_since, split_retry_exhausted, Operator,
};

/// Escalates stuck graceful power-offs to forceful ones.
#[derive(Debug, Default)]
pub struct ForcefulPowerOffOperator;

impl ForcefulPowerOffOperator {
    /// Create the operator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn wait_elapsed(component: &Component, now: DateTime<Utc>, wait: u64) -> bool {
    match component.last_action.last_updated {
        Some(at) => seconds_since(now, at) >= wait,
        // No timestamp to wait on; escalate rather than wait forever.
        None => true,
    }
}

#[async_trait]
impl<S: Store> Operator<S> for ForcefulPowerOffOperator {
    fn name(&self) -> &'static str {
        "power_off_forceful"
    }

    async fn run_pass(&self, env: &Env<S>, opts: &OptionsSnapshot) -> Result<()> {
        let now = current_timestamp();
        let wait = opts.max_power_off_wait_time;
        let pages = env.store.scan(
            kind::COMPONENTS,
            "",
            |c: &Component| {
                c.enabled
                    && matches!(
                        c.status(),
                        Status::PowerOffGracefullyCalled | Status::PowerOffForcefullyCalled
                    )
                    && wait_elapsed(c, now, wait)
            },
            opts.max_component_batch_size,
        )?;

        for page in pages {
            let (eligible, exhausted) =
                split_retry_exhausted(page, opts.default_retry_policy, |c| {
                    c.event_stats.power_off_forceful_attempts
                });
            fail_exhausted_components(env, &exhausted)?;
            if eligible.is_empty() {
                continue;
            }

            let eligible = retain_hsm_enabled(env, eligible, opts).await?;
            if eligible.is_empty() {
                continue;
            }

            let ids: Vec<String> = eligible.iter().map(|c| c.id.clone()).collect();
            let rejected = env
                .clients
                .pcs
                .transition(
                    PowerOperation::ForceOff,
                    &ids,
                    Duration::from_secs(opts.pcs_read_timeout),
                )
                .await?;

            let now = current_timestamp();
            for component in &eligible {
                let error = rejected.get(&component.id).cloned();
                env.store
                    .patch(kind::COMPONENTS, &component.key(), |c: &mut Component| {
                        c.record_action(Action::PowerOffForcefully, now);
                        c.status.phase = Phase::PoweringOff;
                        c.status.status_override = None;
                        c.error = error.clone().unwrap_or_default();
                    })?;
            }
            tracing::info!(
                requested = eligible.len(),
                rejected = rejected.len(),
                "escalated to forceful power-off"
            );
        }
        Ok(())
    }
}
