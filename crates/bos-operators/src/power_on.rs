//! Power-on operator.
//!
//! For components waiting to power on, first registers boot parameters
//! with the boot script service (one referral token per distinct
//! artifact tuple), records each token, then requests power-on from the
//! power control service. Per-node rejections land on the component's
//! error field; the batch carries on.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use bos_clients::pcs::PowerOperation;
use bos_core::{current_timestamp, Action, BootArtifacts, Phase, Status};
use bos_store::types::{BssTokenRecord, Component, OptionsSnapshot};
use bos_store::{kind, Store};

use crate::env::Env;
use crate::error::Result;
use crate::framework::{
    fail_exhausted_components, retain_hsm_enabled, split_retry_exhausted, Operator,
};

/// Requests power-on for components that need it.
#[derive(Debug, Default)]
pub struct PowerOnOperator;

impl PowerOnOperator {
    /// Create the operator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Register boot parameters per distinct artifact tuple and record
    /// the issued tokens, both in the token kind and on each component's
    /// desired state.
    async fn set_boot_script_tokens<S: Store>(
        &self,
        env: &Env<S>,
        components: &[Component],
        opts: &OptionsSnapshot,
    ) -> Result<()> {
        let timeout = Duration::from_secs(opts.bss_read_timeout);
        let mut by_artifacts: HashMap<BootArtifacts, Vec<&Component>> = HashMap::new();
        for component in components {
            by_artifacts
                .entry(component.desired_state.boot_artifacts.clone())
                .or_default()
                .push(component);
        }

        for (artifacts, group) in by_artifacts {
            let nodes: Vec<String> = group.iter().map(|c| c.id.clone()).collect();
            let token = match env
                .clients
                .bss
                .set_boot_params(
                    &nodes,
                    &artifacts.kernel,
                    &artifacts.initrd,
                    &artifacts.kernel_parameters,
                    timeout,
                )
                .await
            {
                Ok(token) => token,
                Err(e) => {
                    tracing::error!(error = %e, nodes = nodes.len(),
                        "failed to register boot parameters");
                    for component in &group {
                        env.store.patch(
                            kind::COMPONENTS,
                            &component.key(),
                            |c: &mut Component| {
                                c.error = format!("boot script registration failed: {e}");
                            },
                        )?;
                    }
                    continue;
                }
            };

            for component in &group {
                let record = BssTokenRecord {
                    token: token.clone(),
                    kernel: artifacts.kernel.clone(),
                    kernel_parameters: artifacts.kernel_parameters.clone(),
                    initrd: artifacts.initrd.clone(),
                };
                env.store
                    .put(kind::BSS_TOKENS, &component.tenant.key_for(&token), &record)?;
                let token = token.clone();
                env.store
                    .patch(kind::COMPONENTS, &component.key(), move |c: &mut Component| {
                        c.desired_state.bss_token.clone_from(&token);
                    })?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<S: Store> Operator<S> for PowerOnOperator {
    fn name(&self) -> &'static str {
        "power_on"
    }

    async fn run_pass(&self, env: &Env<S>, opts: &OptionsSnapshot) -> Result<()> {
        let pages = env.store.scan(
            kind::COMPONENTS,
            "",
            |c: &Component| {
                c.enabled
                    && !c.desired_state.boot_artifacts.is_empty()
                    && matches!(c.status(), Status::Off | Status::PowerOnPending)
            },
            opts.max_component_batch_size,
        )?;

        for page in pages {
            let (eligible, exhausted) =
                split_retry_exhausted(page, opts.default_retry_policy, |c| {
                    c.event_stats.power_on_attempts
                });
            fail_exhausted_components(env, &exhausted)?;
            if eligible.is_empty() {
                continue;
            }

            // Only act on nodes the hardware manager agrees are usable.
            let eligible = retain_hsm_enabled(env, eligible, opts).await?;
            if eligible.is_empty() {
                continue;
            }

            self.set_boot_script_tokens(env, &eligible, opts).await?;

            let ids: Vec<String> = eligible.iter().map(|c| c.id.clone()).collect();
            let rejected = env
                .clients
                .pcs
                .transition(
                    PowerOperation::On,
                    &ids,
                    Duration::from_secs(opts.pcs_read_timeout),
                )
                .await?;

            let now = current_timestamp();
            for component in &eligible {
                let error = rejected.get(&component.id).cloned();
                env.store
                    .patch(kind::COMPONENTS, &component.key(), |c: &mut Component| {
                        c.record_action(Action::PowerOn, now);
                        c.status.phase = Phase::PoweringOn;
                        c.status.status_override = None;
                        c.error = error.clone().unwrap_or_default();
                    })?;
            }
            tracing::info!(
                requested = eligible.len(),
                rejected = rejected.len(),
                "requested power-on"
            );
        }
        Ok(())
    }
}
