//! Graceful power-off operator.
//!
//! Requests an OS-assisted power-off for components whose phase says
//! they should go down and for which no power-off has been called yet.
//! Escalation to a forceful power-off is a separate operator.

use std::time::Duration;

use async_trait::async_trait;

use bos_clients::pcs::PowerOperation;
use bos_core::{current_timestamp, Action, Phase, Status};
use bos_store::types::{Component, OptionsSnapshot};
use bos_store::{kind, Store};

use crate::env::Env;
use crate::error::Result;
use crate::framework::{
    fail_exhausted_components, retain_hsm_enabled, split_retry_exhausted, Operator,
};

/// Requests graceful power-off for components that need it.
#[derive(Debug, Default)]
pub struct GracefulPowerOffOperator;

impl GracefulPowerOffOperator {
    /// Create the operator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl<S: Store> Operator<S> for GracefulPowerOffOperator {
    fn name(&self) -> &'static str {
        "power_off_graceful"
    }

    async fn run_pass(&self, env: &Env<S>, opts: &OptionsSnapshot) -> Result<()> {
        let pages = env.store.scan(
            kind::COMPONENTS,
            "",
            |c: &Component| c.enabled && c.status() == Status::PowerOffPending,
            opts.max_component_batch_size,
        )?;

        for page in pages {
            let (eligible, exhausted) =
                split_retry_exhausted(page, opts.default_retry_policy, |c| {
                    c.event_stats.power_off_graceful_attempts
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
                    PowerOperation::SoftOff,
                    &ids,
                    Duration::from_secs(opts.pcs_read_timeout),
                )
                .await?;

            let now = current_timestamp();
            for component in &eligible {
                let error = rejected.get(&component.id).cloned();
                env.store
                    .patch(kind::COMPONENTS, &component.key(), |c: &mut Component| {
                        c.record_action(Action::PowerOffGracefully, now);
                        c.status.phase = Phase::PoweringOff;
                        c.status.status_override = None;
                        c.error = error.clone().unwrap_or_default();
                    })?;
            }
            tracing::info!(
                requested = eligible.len(),
                rejected = rejected.len(),
                "requested graceful power-off"
            );
        }
        Ok(())
    }
}
