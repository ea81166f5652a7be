//! Session-cleanup operator.
//!
//! Deletes completed sessions older than the configured retention and
//! detaches them from any components still pointing at them. A TTL of
//! zero disables cleanup entirely.

use async_trait::async_trait;

use bos_core::{current_timestamp, parse_duration};
use bos_store::types::{Component, OptionsSnapshot, Session, SessionState};
use bos_store::{kind, Store};

use crate::env::Env;
use crate::error::Result;
use crate::framework::Operator;

/// Removes expired completed sessions.
#[derive(Debug, Default)]
pub struct SessionCleanupOperator;

impl SessionCleanupOperator {
    /// Create the operator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl<S: Store> Operator<S> for SessionCleanupOperator {
    fn name(&self) -> &'static str {
        "session_cleanup"
    }

    async fn run_pass(&self, env: &Env<S>, opts: &OptionsSnapshot) -> Result<()> {
        let ttl = match parse_duration(&opts.cleanup_completed_session_ttl) {
            Ok(ttl) if !ttl.is_zero() => ttl,
            Ok(_) => return Ok(()),
            Err(e) => {
                tracing::warn!(
                    value = %opts.cleanup_completed_session_ttl,
                    error = %e,
                    "unparsable cleanup_completed_session_ttl, skipping cleanup"
                );
                return Ok(());
            }
        };
        let cutoff = current_timestamp() - ttl;

        let pages = env.store.scan(
            kind::SESSIONS,
            "",
            |s: &Session| {
                s.status.status == SessionState::Complete
                    && s.status.end_time.is_some_and(|end| end < cutoff)
            },
            0,
        )?;
        let expired: Vec<Session> = pages.into_iter().flatten().collect();
        if expired.is_empty() {
            return Ok(());
        }

        let mut names: Vec<&str> = expired.iter().map(|s| s.name.as_str()).collect();
        names.sort_unstable();
        tracing::info!(sessions = ?names, "cleaning up completed sessions");

        for session in &expired {
            // Detach components that still reference the session.
            let name = session.name.clone();
            let owned = env.store.scan(
                kind::COMPONENTS,
                &session.tenant.key_prefix(),
                |c: &Component| c.session == name,
                0,
            )?;
            for component in owned.into_iter().flatten() {
                env.store
                    .patch(kind::COMPONENTS, &component.key(), |c: &mut Component| {
                        c.session.clear();
                    })?;
            }

            env.store.delete(kind::SESSIONS, &session.key())?;
            if env.store.contains(kind::SESSION_STATUS, &session.key())? {
                env.store.delete(kind::SESSION_STATUS, &session.key())?;
            }
        }
        Ok(())
    }
}
