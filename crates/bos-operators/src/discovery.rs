//! Discovery operator.
//!
//! Periodically reconciles the component set against the hardware state
//! manager's node list. Nodes the store does not know get a fresh,
//! disabled component record. Nothing is ever deleted here: transient
//! inventory loss or a hardware swap must not destroy reconciliation
//! history.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;

use bos_core::{current_timestamp, Action, Tenant};
use bos_store::types::{Component, OptionsSnapshot};
use bos_store::{kind, Store};

use crate::env::Env;
use crate::error::Result;
use crate::framework::Operator;

/// Creates component records for newly discovered hardware.
#[derive(Debug, Default)]
pub struct DiscoveryOperator;

impl DiscoveryOperator {
    /// Create the operator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl<S: Store> Operator<S> for DiscoveryOperator {
    fn name(&self) -> &'static str {
        "discovery"
    }

    fn frequency(&self, opts: &OptionsSnapshot) -> Duration {
        Duration::from_secs(opts.discovery_frequency)
    }

    async fn run_pass(&self, env: &Env<S>, opts: &OptionsSnapshot) -> Result<()> {
        let timeout = Duration::from_secs(opts.hsm_read_timeout);
        let reported = env.clients.hsm.node_ids(timeout).await?;

        // Known ids across every tenant; discovery never duplicates a
        // node a session already created under a tenant.
        let known: HashSet<String> = env
            .store
            .list_keys(kind::COMPONENTS, "")?
            .into_iter()
            .filter_map(|key| bos_core::split_key(&key).map(|(_, id)| id.to_string()))
            .collect();

        let mut missing: Vec<&String> = reported.iter().filter(|id| !known.contains(*id)).collect();
        if missing.is_empty() {
            tracing::debug!("no new components discovered");
            return Ok(());
        }
        missing.sort();

        let now = current_timestamp();
        for id in &missing {
            let mut component = Component::new(id.as_str(), Tenant::untenanted());
            component.last_action.action = Action::NewlyDiscovered;
            component.last_action.num_attempts = 1;
            component.last_action.last_updated = Some(now);
            env.store
                .put(kind::COMPONENTS, &component.key(), &component)?;
        }
        tracing::info!(count = missing.len(), "added newly discovered components");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::test_env;
    use bos_store::types::Arch;

    #[tokio::test]
    async fn new_nodes_are_created_disabled() {
        let (env, mocks, _dir) = test_env();
        mocks.hsm.add_node("x1", true, Arch::X86);
        mocks.hsm.add_node("x2", true, Arch::X86);

        let operator = DiscoveryOperator::new();
        let opts = OptionsSnapshot::default();
        operator.run_pass(&env, &opts).await.unwrap();

        let component: Component = env
            .store
            .get(kind::COMPONENTS, &Tenant::untenanted().key_for("x1"))
            .unwrap()
            .unwrap();
        assert!(!component.enabled);
        assert_eq!(component.last_action.action, Action::NewlyDiscovered);
        assert!(component.desired_state.is_empty());
    }

    #[tokio::test]
    async fn existing_components_survive() {
        let (env, mocks, _dir) = test_env();
        mocks.hsm.add_node("x1", true, Arch::X86);

        let mut existing = Component::new("x1", Tenant::untenanted());
        existing.enabled = true;
        existing.session = "live-session".into();
        env.store
            .put(kind::COMPONENTS, &existing.key(), &existing)
            .unwrap();

        let operator = DiscoveryOperator::new();
        operator
            .run_pass(&env, &OptionsSnapshot::default())
            .await
            .unwrap();

        let component: Component = env
            .store
            .get(kind::COMPONENTS, &existing.key())
            .unwrap()
            .unwrap();
        assert!(component.enabled);
        assert_eq!(component.session, "live-session");
    }

    #[tokio::test]
    async fn tenanted_components_are_not_duplicated() {
        let (env, mocks, _dir) = test_env();
        mocks.hsm.add_node("x1", true, Arch::X86);

        let tenanted = Component::new("x1", Tenant::from("blue"));
        env.store
            .put(kind::COMPONENTS, &tenanted.key(), &tenanted)
            .unwrap();

        let operator = DiscoveryOperator::new();
        operator
            .run_pass(&env, &OptionsSnapshot::default())
            .await
            .unwrap();

        assert!(!env
            .store
            .contains(kind::COMPONENTS, &Tenant::untenanted().key_for("x1"))
            .unwrap());
    }
}
