//! Actual-state cleanup operator.
//!
//! A node that stops reporting (management network down, kernel panic,
//! an OS without the reporting agent) eventually has a boot record that
//! can no longer be trusted. This operator zeroes the observed state of
//! components whose last report is older than the configured TTL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use bos_core::{current_timestamp, parse_duration};
use bos_store::types::{ActualState, Component, OptionsSnapshot};
use bos_store::{kind, Store};

use crate::env::Env;
use crate::error::Result;
use crate::framework::Operator;

/// Expires stale observed boot state.
#[derive(Debug, Default)]
pub struct ActualStateCleanupOperator;

impl ActualStateCleanupOperator {
    /// Create the operator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn is_stale(component: &Component, cutoff: DateTime<Utc>) -> bool {
    if !component.enabled || component.actual_state.is_empty() {
        return false;
    }
    // A populated state with no timestamp cannot be trusted either.
    component
        .actual_state
        .last_updated
        .is_none_or(|at| at < cutoff)
}

#[async_trait]
impl<S: Store> Operator<S> for ActualStateCleanupOperator {
    fn name(&self) -> &'static str {
        "actual_state_cleanup"
    }

    async fn run_pass(&self, env: &Env<S>, opts: &OptionsSnapshot) -> Result<()> {
        let ttl = match parse_duration(&opts.component_actual_state_ttl) {
            Ok(ttl) if !ttl.is_zero() => ttl,
            Ok(_) => return Ok(()),
            Err(e) => {
                tracing::warn!(
                    value = %opts.component_actual_state_ttl,
                    error = %e,
                    "unparsable component_actual_state_ttl, skipping cleanup"
                );
                return Ok(());
            }
        };
        let cutoff = current_timestamp() - ttl;

        let pages = env.store.scan(
            kind::COMPONENTS,
            "",
            |c: &Component| is_stale(c, cutoff),
            opts.max_component_batch_size,
        )?;

        let mut expired = 0usize;
        for component in pages.into_iter().flatten() {
            env.store
                .patch(kind::COMPONENTS, &component.key(), |c: &mut Component| {
                    c.actual_state = ActualState::default();
                })?;
            expired += 1;
        }
        if expired > 0 {
            tracing::info!(expired, "cleared stale actual state");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::test_env;
    use bos_core::Tenant;
    use chrono::Duration as ChronoDuration;

    #[tokio::test]
    async fn stale_state_is_cleared() {
        let (env, _mocks, _dir) = test_env();
        let mut component = Component::new("x1", Tenant::untenanted());
        component.enabled = true;
        component.actual_state.boot_artifacts.kernel = "k".into();
        component.actual_state.last_updated =
            Some(current_timestamp() - ChronoDuration::hours(5));
        env.store
            .put(kind::COMPONENTS, &component.key(), &component)
            .unwrap();

        ActualStateCleanupOperator::new()
            .run_pass(&env, &OptionsSnapshot::default())
            .await
            .unwrap();

        let component: Component = env
            .store
            .get(kind::COMPONENTS, &component.key())
            .unwrap()
            .unwrap();
        assert!(component.actual_state.is_empty());
        assert!(component.actual_state.last_updated.is_none());
    }

    #[tokio::test]
    async fn fresh_state_is_kept() {
        let (env, _mocks, _dir) = test_env();
        let mut component = Component::new("x1", Tenant::untenanted());
        component.enabled = true;
        component.actual_state.boot_artifacts.kernel = "k".into();
        component.actual_state.last_updated =
            Some(current_timestamp() - ChronoDuration::minutes(10));
        env.store
            .put(kind::COMPONENTS, &component.key(), &component)
            .unwrap();

        ActualStateCleanupOperator::new()
            .run_pass(&env, &OptionsSnapshot::default())
            .await
            .unwrap();

        let component: Component = env
            .store
            .get(kind::COMPONENTS, &component.key())
            .unwrap()
            .unwrap();
        assert!(!component.actual_state.is_empty());
    }

    #[tokio::test]
    async fn unstamped_state_is_treated_as_stale() {
        let (env, _mocks, _dir) = test_env();
        let mut component = Component::new("x1", Tenant::untenanted());
        component.enabled = true;
        component.actual_state.boot_artifacts.kernel = "k".into();
        env.store
            .put(kind::COMPONENTS, &component.key(), &component)
            .unwrap();

        ActualStateCleanupOperator::new()
            .run_pass(&env, &OptionsSnapshot::default())
            .await
            .unwrap();

        let component: Component = env
            .store
            .get(kind::COMPONENTS, &component.key())
            .unwrap()
            .unwrap();
        assert!(component.actual_state.is_empty());
    }

    #[tokio::test]
    async fn disabled_components_are_left_alone() {
        let (env, _mocks, _dir) = test_env();
        let mut component = Component::new("x1", Tenant::untenanted());
        component.actual_state.boot_artifacts.kernel = "k".into();
        component.actual_state.last_updated =
            Some(current_timestamp() - ChronoDuration::days(30));
        env.store
            .put(kind::COMPONENTS, &component.key(), &component)
            .unwrap();

        ActualStateCleanupOperator::new()
            .run_pass(&env, &OptionsSnapshot::default())
            .await
            .unwrap();

        let component: Component = env
            .store
            .get(kind::COMPONENTS, &component.key())
            .unwrap()
            .unwrap();
        assert!(!component.actual_state.is_empty());
    }
}
