//! The operator framework: the trait every control loop implements and
//! the driver that hosts it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;

use bos_store::types::{Component, OptionsSnapshot};
use bos_store::{kind, Store};

use crate::env::Env;
use crate::error::Result;
use crate::logging::LevelHandle;

/// A single reconciliation loop.
///
/// Implementations select their own candidates from the store, act on
/// them through the environment's clients, and patch results back. A
/// pass must never fail because one component failed; those errors go on
/// the component record.
#[async_trait]
pub trait Operator<S: Store>: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Seconds between passes, drawn from the options snapshot. Most
    /// operators run at the shared polling frequency.
    fn frequency(&self, opts: &OptionsSnapshot) -> Duration {
        Duration::from_secs(opts.polling_frequency)
    }

    /// One pass of detecting and acting on matching records.
    async fn run_pass(&self, env: &Env<S>, opts: &OptionsSnapshot) -> Result<()>;
}

/// Host an operator until shutdown is signalled.
///
/// Per iteration: load a fresh options snapshot, apply the runtime log
/// level, touch the liveness file, run the pass, then sleep out the
/// remainder of the operator's frequency. The sleep is the cancellation
/// point; a pass in flight finishes its current batch.
pub async fn run_operator<S: Store + 'static>(
    operator: Arc<dyn Operator<S>>,
    env: Env<S>,
    level: Option<Arc<LevelHandle>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let started = Instant::now();
        let opts = env.options.load();
        if let Some(level) = &level {
            level.apply(&opts.logging_level);
        }
        env.liveness.touch();

        if let Err(e) = operator.run_pass(&env, &opts).await {
            tracing::error!(operator = operator.name(), error = %e, "operator pass failed");
        }

        let sleep_for = operator.frequency(&opts).saturating_sub(started.elapsed());
        tokio::select! {
            () = tokio::time::sleep(sleep_for) => {}
            _ = shutdown.changed() => {}
        }
        if *shutdown.borrow() {
            tracing::info!(operator = operator.name(), "shutting down");
            return;
        }
    }
}

/// Split ids into batches of at most `batch_cap`. A cap of zero yields
/// the whole list as one batch.
#[must_use]
pub fn chunk_ids(ids: &[String], batch_cap: usize) -> Vec<Vec<String>> {
    if ids.is_empty() {
        return Vec::new();
    }
    let size = if batch_cap == 0 { ids.len() } else { batch_cap };
    ids.chunks(size).map(<[String]>::to_vec).collect()
}

/// Partition components into those still within their retry budget and
/// those that have exhausted it.
///
/// `attempts` selects the counter this operator budgets against — each
/// power operator tracks its own `event_stats` counter, which unlike
/// `last_action.num_attempts` survives the action changing hands across
/// a reboot cycle.
#[must_use]
pub fn split_retry_exhausted<F>(
    components: Vec<Component>,
    default_retry_policy: i64,
    attempts: F,
) -> (Vec<Component>, Vec<Component>)
where
    F: Fn(&Component) -> u32,
{
    components.into_iter().partition(|c| {
        match c.retry_limit(default_retry_policy) {
            Some(limit) => attempts(c) < limit,
            // Negative policy: never give up.
            None => true,
        }
    })
}

/// Mark components that exhausted their retry budget as failed.
///
/// Sets the status override, the last-action failed flag, and a default
/// error when none was recorded. Reapplying the patch is a no-op.
pub fn fail_exhausted_components<S: Store>(env: &Env<S>, exhausted: &[Component]) -> Result<()> {
    for component in exhausted {
        env.store
            .patch(kind::COMPONENTS, &component.key(), |c: &mut Component| {
                c.status.status_override = Some(bos_core::Status::Failed);
                c.last_action.failed = true;
                if c.error.is_empty() {
                    c.error = "the retry limit has been hit for this component, but no services \
                               have reported specific errors"
                        .to_string();
                }
            })?;
        tracing::info!(
            component = %component.id,
            attempts = component.last_action.num_attempts,
            "component exceeded its retry limit"
        );
    }
    Ok(())
}

/// Shared helper: seconds elapsed since a timestamp, saturating at zero.
#[must_use]
pub fn seconds_since(now: DateTime<Utc>, then: DateTime<Utc>) -> u64 {
    u64::try_from((now - then).num_seconds()).unwrap_or(0)
}

/// Keep only components the hardware state manager reports enabled.
///
/// Components the manager does not know at all are disabled in the
/// store (never deleted): acting on vanished hardware is pointless, and
/// keeping the record preserves its history for when the node returns.
pub async fn retain_hsm_enabled<S: Store>(
    env: &Env<S>,
    components: Vec<Component>,
    opts: &OptionsSnapshot,
) -> Result<Vec<Component>> {
    if components.is_empty() {
        return Ok(components);
    }
    let ids: Vec<String> = components.iter().map(|c| c.id.clone()).collect();
    let states = env
        .clients
        .hsm
        .node_states(&ids, std::time::Duration::from_secs(opts.hsm_read_timeout))
        .await?;

    let mut kept = Vec::with_capacity(components.len());
    for component in components {
        match states.get(&component.id) {
            Some(true) => kept.push(component),
            Some(false) => {
                tracing::debug!(component = %component.id,
                    "skipping component disabled in the hardware inventory");
            }
            None => {
                tracing::warn!(component = %component.id,
                    "disabling component unknown to the hardware state manager");
                env.store
                    .patch(kind::COMPONENTS, &component.key(), |c: &mut Component| {
                        c.enabled = false;
                        c.error =
                            "component is not present in the hardware inventory".to_string();
                    })?;
            }
        }
    }
    Ok(kept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bos_core::Tenant;

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn chunking_respects_cap() {
        let list = ids(&["a", "b", "c", "d", "e"]);
        let chunks = chunk_ids(&list, 2);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 2);
        assert_eq!(chunks[2].len(), 1);
    }

    #[test]
    fn zero_cap_is_one_batch() {
        let list = ids(&["a", "b", "c"]);
        let chunks = chunk_ids(&list, 0);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len(), 3);
    }

    #[test]
    fn empty_list_yields_no_batches() {
        assert!(chunk_ids(&[], 5).is_empty());
    }

    #[test]
    fn retry_partition() {
        let mut within = Component::new("x1", Tenant::untenanted());
        within.event_stats.power_on_attempts = 2;
        let mut exhausted = Component::new("x2", Tenant::untenanted());
        exhausted.event_stats.power_on_attempts = 3;
        let mut unlimited = Component::new("x3", Tenant::untenanted());
        unlimited.event_stats.power_on_attempts = 99;
        unlimited.retry_policy = Some(-1);

        let (eligible, failed) = split_retry_exhausted(vec![within, exhausted, unlimited], 3, |c| {
            c.event_stats.power_on_attempts
        });
        let eligible_ids: Vec<_> = eligible.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(eligible_ids, vec!["x1", "x3"]);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, "x2");
    }
}
