//! Session-completion operator.
//!
//! Marks running sessions complete when every eligible component they
//! own has reached a terminal state, and saves a snapshot of the
//! aggregated status so the record survives component churn.

use async_trait::async_trait;

use bos_core::current_timestamp;
use bos_store::types::{OptionsSnapshot, Session, SessionState};
use bos_store::{kind, Store};

use crate::env::Env;
use crate::error::Result;
use crate::framework::Operator;
use crate::session_status::{owned_components, session_is_terminal, session_status, staged_components};

/// Completes sessions whose components are all settled.
#[derive(Debug, Default)]
pub struct SessionCompletionOperator;

impl SessionCompletionOperator {
    /// Create the operator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl<S: Store> Operator<S> for SessionCompletionOperator {
    fn name(&self) -> &'static str {
        "session_completion"
    }

    async fn run_pass(&self, env: &Env<S>, _opts: &OptionsSnapshot) -> Result<()> {
        let pages = env.store.scan(
            kind::SESSIONS,
            "",
            |s: &Session| s.status.status == SessionState::Running,
            0,
        )?;

        for session in pages.into_iter().flatten() {
            let owned = owned_components(env.store.as_ref(), &session)?;
            if !session_is_terminal(&owned, session.operation) {
                continue;
            }
            // Components still holding this session staged keep it open;
            // their apply-staged has not happened yet.
            if !staged_components(env.store.as_ref(), &session)?.is_empty() {
                continue;
            }

            let now = current_timestamp();
            let completed: Session =
                env.store
                    .patch(kind::SESSIONS, &session.key(), move |s: &mut Session| {
                        s.status.status = SessionState::Complete;
                        if s.status.end_time.is_none() {
                            s.status.end_time = Some(now);
                        }
                    })?;

            // Snapshot the aggregation at completion time.
            let report = session_status(env.store.as_ref(), &completed, now)?;
            env.store
                .put(kind::SESSION_STATUS, &completed.key(), &report)?;

            tracing::info!(session = %completed.name, tenant = %completed.tenant,
                "session is complete");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::test_env;
    use crate::session_status::SessionStatusReport;
    use bos_core::{Phase, Status, Tenant};
    use bos_store::types::{Component, Operation, SessionStatus};
    use bos_store::RocksStore;

    fn seed_session(env: &Env<RocksStore>, operation: Operation) -> Session {
        let session = Session {
            name: "s1".into(),
            tenant: Tenant::untenanted(),
            template_name: "t1".into(),
            operation,
            limit: String::new(),
            stage: false,
            include_disabled: false,
            components: "x1".into(),
            status: SessionStatus {
                status: SessionState::Running,
                start_time: Some(current_timestamp()),
                ..SessionStatus::default()
            },
        };
        env.store
            .put(kind::SESSIONS, &session.key(), &session)
            .unwrap();
        session
    }

    fn seed_component(env: &Env<RocksStore>, id: &str, f: impl FnOnce(&mut Component)) {
        let mut component = Component::new(id, Tenant::untenanted());
        component.enabled = true;
        component.session = "s1".into();
        f(&mut component);
        env.store
            .put(kind::COMPONENTS, &component.key(), &component)
            .unwrap();
    }

    #[tokio::test]
    async fn stable_components_complete_the_session() {
        let (env, _mocks, _dir) = test_env();
        let session = seed_session(&env, Operation::Boot);
        seed_component(&env, "x1", |_| {});

        SessionCompletionOperator::new()
            .run_pass(&env, &OptionsSnapshot::default())
            .await
            .unwrap();

        let session: Session = env.store.get(kind::SESSIONS, &session.key()).unwrap().unwrap();
        assert_eq!(session.status.status, SessionState::Complete);
        assert!(session.status.end_time.is_some());

        let snapshot: SessionStatusReport = env
            .store
            .get(kind::SESSION_STATUS, &session.key())
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.percent_successful, 100.0);
        assert_eq!(snapshot.status, SessionState::Complete);
    }

    #[tokio::test]
    async fn in_flight_components_keep_the_session_running() {
        let (env, _mocks, _dir) = test_env();
        let session = seed_session(&env, Operation::Boot);
        seed_component(&env, "x1", |c| {
            c.status.phase = Phase::PoweringOn;
        });

        SessionCompletionOperator::new()
            .run_pass(&env, &OptionsSnapshot::default())
            .await
            .unwrap();

        let session: Session = env.store.get(kind::SESSIONS, &session.key()).unwrap().unwrap();
        assert_eq!(session.status.status, SessionState::Running);
    }

    #[tokio::test]
    async fn all_failed_completes_the_session() {
        let (env, _mocks, _dir) = test_env();
        let session = seed_session(&env, Operation::Boot);
        seed_component(&env, "x1", |c| {
            c.status.status_override = Some(Status::Failed);
            c.error = "boot failed".into();
        });

        SessionCompletionOperator::new()
            .run_pass(&env, &OptionsSnapshot::default())
            .await
            .unwrap();

        let session: Session = env.store.get(kind::SESSIONS, &session.key()).unwrap().unwrap();
        assert_eq!(session.status.status, SessionState::Complete);

        let snapshot: SessionStatusReport = env
            .store
            .get(kind::SESSION_STATUS, &session.key())
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.percent_failed, 100.0);
    }

    #[tokio::test]
    async fn shutdown_completes_when_components_are_off() {
        let (env, _mocks, _dir) = test_env();
        let session = seed_session(&env, Operation::Shutdown);
        seed_component(&env, "x1", |c| {
            c.status.status_override = Some(Status::Off);
        });

        SessionCompletionOperator::new()
            .run_pass(&env, &OptionsSnapshot::default())
            .await
            .unwrap();

        let session: Session = env.store.get(kind::SESSIONS, &session.key()).unwrap().unwrap();
        assert_eq!(session.status.status, SessionState::Complete);
    }

    #[tokio::test]
    async fn staged_components_hold_the_session_open() {
        let (env, _mocks, _dir) = test_env();
        let session = seed_session(&env, Operation::Boot);
        let mut staged = Component::new("x9", Tenant::untenanted());
        staged.staged_state.session = "s1".into();
        staged.staged_state.configuration = "cfg".into();
        env.store
            .put(kind::COMPONENTS, &staged.key(), &staged)
            .unwrap();

        SessionCompletionOperator::new()
            .run_pass(&env, &OptionsSnapshot::default())
            .await
            .unwrap();

        let session: Session = env.store.get(kind::SESSIONS, &session.key()).unwrap().unwrap();
        assert_eq!(session.status.status, SessionState::Running);
    }
}
