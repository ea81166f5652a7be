//! Configuration operator.
//!
//! Pushes each component's desired configuration into the configuration
//! framework when the framework does not have it yet. Components already
//! booted into their desired artifacts are enabled for immediate
//! configuration; the rest are registered disabled and picked up after
//! their reboot.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use bos_core::Phase;
use bos_store::types::{Component, OptionsSnapshot};
use bos_store::{kind, Store};

use crate::env::Env;
use crate::error::Result;
use crate::framework::Operator;

/// Synchronizes desired configuration into the configuration framework.
#[derive(Debug, Default)]
pub struct ConfigurationOperator;

impl ConfigurationOperator {
    /// Create the operator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl<S: Store> Operator<S> for ConfigurationOperator {
    fn name(&self) -> &'static str {
        "configuration"
    }

    async fn run_pass(&self, env: &Env<S>, opts: &OptionsSnapshot) -> Result<()> {
        let pages = env.store.scan(
            kind::COMPONENTS,
            "",
            |c: &Component| c.enabled && !c.desired_configuration_is_none(),
            opts.max_component_batch_size,
        )?;
        let timeout = Duration::from_secs(opts.cfs_read_timeout);

        for page in pages {
            let ids: Vec<String> = page.iter().map(|c| c.id.clone()).collect();
            let cfs_states = env.clients.cfs.components(&ids, timeout).await?;

            // Only components whose desired configuration the framework
            // does not already have.
            let out_of_sync: Vec<&Component> = page
                .iter()
                .filter(|c| {
                    cfs_states
                        .get(&c.id)
                        .map_or(true, |cfs| cfs.desired_config != c.desired_state.configuration)
                })
                .collect();
            if out_of_sync.is_empty() {
                continue;
            }

            // Group by (configuration, configure-now, owning session) so
            // each framework call is one homogeneous batch.
            let mut groups: HashMap<(String, bool, String), Vec<String>> = HashMap::new();
            for component in &out_of_sync {
                let configure_now = component.boot_artifacts_match();
                groups
                    .entry((
                        component.desired_state.configuration.clone(),
                        configure_now,
                        component.session.clone(),
                    ))
                    .or_default()
                    .push(component.id.clone());
            }

            for ((configuration, configure_now, session), ids) in groups {
                env.clients
                    .cfs
                    .set_desired_config(&ids, &configuration, configure_now, &session, timeout)
                    .await?;
                tracing::info!(
                    configuration = %configuration,
                    components = ids.len(),
                    configure_now,
                    "registered desired configuration"
                );
            }

            for component in out_of_sync {
                if component.boot_artifacts_match() {
                    env.store
                        .patch(kind::COMPONENTS, &component.key(), |c: &mut Component| {
                            c.status.phase = Phase::Configuring;
                        })?;
                }
            }
        }
        Ok(())
    }
}
