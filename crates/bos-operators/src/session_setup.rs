//! Session-setup operator.
//!
//! Turns pending sessions into claimed components: resolves each boot
//! set's node selectors against the hardware inventory, filters the set
//! down to nodes the session may act on, computes the desired state from
//! the boot set's image manifest, and patches every resolved component.
//! Finally the session transitions to running.
//!
//! Failures split two ways: anything transient (store, hardware manager,
//! object store outages) leaves the session pending for the next pass;
//! anything structural (missing template, invalid limit, rejected
//! selectors) fails the session outright.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use bos_clients::hsm::Inventory;
use bos_clients::ims::image_id_from_manifest_path;
use bos_clients::s3::parse_manifest;
use bos_core::{current_timestamp, Action, BootArtifacts};
use bos_store::types::{
    ActualState, BootSet, Component, DesiredState, EventStats, LastAction, OptionsSnapshot,
    Operation, Session, SessionState, SessionTemplate, StagedState,
};
use bos_store::{kind, Store};

use crate::env::Env;
use crate::error::{OperatorError, Result};
use crate::framework::Operator;

/// Size cap for image manifests and boot-parameter files.
const MANIFEST_SIZE_CAP: usize = 1024 * 1024;

/// Rootfs provider name that triggers image projection tagging.
const SBPS_PROVIDER: &str = "sbps";

/// Why a session could not be set up.
enum SetupError {
    /// The session itself is invalid; mark it failed.
    Fatal(String),
    /// The world is broken; leave the session pending and retry later.
    Retry(OperatorError),
}

impl From<bos_store::StoreError> for SetupError {
    fn from(err: bos_store::StoreError) -> Self {
        Self::Retry(err.into())
    }
}

impl From<bos_clients::ClientError> for SetupError {
    fn from(err: bos_clients::ClientError) -> Self {
        Self::Retry(err.into())
    }
}

/// The state a boot set resolves to.
struct ResolvedState {
    boot_artifacts: BootArtifacts,
    configuration: String,
}

/// Claims components for pending sessions.
#[derive(Debug, Default)]
pub struct SessionSetupOperator;

impl SessionSetupOperator {
    /// Create the operator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl<S: Store> Operator<S> for SessionSetupOperator {
    fn name(&self) -> &'static str {
        "session_setup"
    }

    async fn run_pass(&self, env: &Env<S>, opts: &OptionsSnapshot) -> Result<()> {
        let pages = env.store.scan(
            kind::SESSIONS,
            "",
            |s: &Session| s.status.status == SessionState::Pending,
            0,
        )?;
        let sessions: Vec<Session> = pages.into_iter().flatten().collect();
        if sessions.is_empty() {
            return Ok(());
        }
        tracing::info!(count = sessions.len(), "sessions require setup");

        // One inventory snapshot serves every session in the pass.
        let inventory = env
            .clients
            .hsm
            .inventory(Duration::from_secs(opts.hsm_read_timeout))
            .await?;

        for session in sessions {
            match setup_session(env, opts, &inventory, &session).await {
                Ok(()) => {}
                Err(SetupError::Fatal(reason)) => {
                    tracing::warn!(session = %session.name, tenant = %session.tenant, %reason,
                        "session setup failed");
                    fail_session(env, &session, &reason)?;
                }
                Err(SetupError::Retry(e)) => {
                    tracing::error!(session = %session.name, error = %e,
                        "session setup hit a transient failure, will retry");
                }
            }
        }
        Ok(())
    }
}

async fn setup_session<S: Store>(
    env: &Env<S>,
    opts: &OptionsSnapshot,
    inventory: &Inventory,
    session: &Session,
) -> std::result::Result<(), SetupError> {
    let template_key = session.tenant.key_for(&session.template_name);
    let template: SessionTemplate = env
        .store
        .get(kind::SESSION_TEMPLATES, &template_key)?
        .ok_or_else(|| {
            SetupError::Fatal(format!(
                "session template '{}' does not exist",
                session.template_name
            ))
        })?;

    if opts.session_limit_required && session.limit.is_empty() {
        return Err(SetupError::Fatal(
            "sessions must specify a limit (session_limit_required is set)".to_string(),
        ));
    }

    let now = current_timestamp();
    let mut all_ids: Vec<String> = Vec::new();
    let mut warnings: Vec<String> = Vec::new();

    for (name, boot_set) in &template.boot_sets {
        check_nid_selectors(opts, session, boot_set)?;

        let nodes = resolve_boot_set_nodes(env, opts, inventory, session, boot_set).await?;
        if nodes.is_empty() {
            tracing::warn!(session = %session.name, boot_set = %name,
                "no nodes were found to act on");
            continue;
        }

        tag_sbps_image(env, opts, session, boot_set, &mut warnings).await?;

        let state = resolve_state(env, opts, session, &template, boot_set).await?;
        let (claimed, unknown) =
            claim_components(env, opts, session, &nodes, &state, now)?;
        if !unknown.is_empty() {
            warnings.push(format!("unknown component ids: {}", unknown.join(",")));
        }
        all_ids.extend(claimed);
    }

    all_ids.sort();
    all_ids.dedup();
    mark_running(env, session, &all_ids, &warnings, now)?;
    tracing::info!(session = %session.name, components = all_ids.len(), "session is running");
    Ok(())
}

/// Selector sanity: with `reject_nids` set, bare numeric ids (and
/// `nid`-prefixed names) in node lists or limits fail the session.
fn check_nid_selectors(
    opts: &OptionsSnapshot,
    session: &Session,
    boot_set: &BootSet,
) -> std::result::Result<(), SetupError> {
    if !opts.reject_nids {
        return Ok(());
    }
    let looks_like_nid = |s: &str| -> bool {
        let trimmed = s.trim_start_matches(['&', '!']);
        trimmed.parse::<u64>().is_ok() || trimmed.starts_with("nid")
    };
    let offender = boot_set
        .node_list
        .iter()
        .map(String::as_str)
        .chain(session.limit.split(',').filter(|s| !s.is_empty()))
        .find(|s| looks_like_nid(s));
    match offender {
        Some(s) => Err(SetupError::Fatal(format!(
            "selector '{s}' looks like a NID; node names are required (reject_nids is set)"
        ))),
        None => Ok(()),
    }
}

/// Union the boot set's selectors, then filter by architecture, limit,
/// hardware locks and tenant ownership.
async fn resolve_boot_set_nodes<S: Store>(
    env: &Env<S>,
    opts: &OptionsSnapshot,
    inventory: &Inventory,
    session: &Session,
    boot_set: &BootSet,
) -> std::result::Result<Vec<String>, SetupError> {
    let mut nodes: HashSet<String> = boot_set.node_list.iter().cloned().collect();
    for group in boot_set.node_groups.iter().chain(&boot_set.node_roles_groups) {
        match inventory.members(group) {
            Some(members) => nodes.extend(members.iter().cloned()),
            None => {
                tracing::warn!(session = %session.name, selector = %group,
                    "no hardware matching selector");
            }
        }
    }
    if nodes.is_empty() {
        return Ok(Vec::new());
    }

    let hsm_timeout = Duration::from_secs(opts.hsm_read_timeout);
    let node_vec: Vec<String> = nodes.iter().cloned().collect();

    // Architecture filter; hardware with no reported architecture is
    // admitted rather than silently dropped.
    let archs = env.clients.hsm.node_archs(&node_vec, hsm_timeout).await?;
    nodes.retain(|id| {
        boot_set.arch.admits(
            archs
                .get(id)
                .copied()
                .unwrap_or(bos_store::types::Arch::Unknown),
        )
    });

    // Session limit.
    if !session.limit_is_unrestricted() {
        let allowed = apply_limit(&session.limit, &nodes, inventory);
        nodes = nodes.intersection(&allowed).cloned().collect();
    }
    if nodes.is_empty() {
        return Ok(Vec::new());
    }

    // Hardware locks.
    let node_vec: Vec<String> = nodes.iter().cloned().collect();
    let locked = env.clients.hsm.locked_nodes(&node_vec, hsm_timeout).await?;
    nodes.retain(|id| !locked.contains(id));

    // Tenant ownership.
    if !session.tenant.is_untenanted() {
        let owned = env
            .clients
            .tenants
            .tenant_component_set(&session.tenant, hsm_timeout)
            .await?;
        nodes.retain(|id| owned.contains(id));
    }

    let mut sorted: Vec<String> = nodes.into_iter().collect();
    sorted.sort();
    Ok(sorted)
}

/// Evaluate the limit grammar: comma-separated selectors combined left
/// to right, `&` intersecting, `!` subtracting, plain terms unioning. A
/// term names a group, a role, a node, or the `*`/`all` wildcard.
fn apply_limit(
    limit: &str,
    nodes: &HashSet<String>,
    inventory: &Inventory,
) -> HashSet<String> {
    let mut allowed: HashSet<String> = HashSet::new();
    for raw in limit.split(',').filter(|s| !s.is_empty()) {
        let (term, op) = match raw.as_bytes()[0] {
            b'&' => (&raw[1..], Op::Intersect),
            b'!' => (&raw[1..], Op::Subtract),
            _ => (raw, Op::Union),
        };
        let members: HashSet<String> = if term == "*" || term == "all" {
            nodes.clone()
        } else if let Some(members) = inventory.members(term) {
            members.clone()
        } else {
            HashSet::from([term.to_string()])
        };
        allowed = match op {
            Op::Union => allowed.union(&members).cloned().collect(),
            Op::Intersect => allowed.intersection(&members).cloned().collect(),
            Op::Subtract => allowed.difference(&members).cloned().collect(),
        };
    }
    allowed
}

enum Op {
    Union,
    Intersect,
    Subtract,
}

/// Tag SBPS-rooted images for projection; honor the IMS strictness
/// options for images the service cannot resolve.
async fn tag_sbps_image<S: Store>(
    env: &Env<S>,
    opts: &OptionsSnapshot,
    session: &Session,
    boot_set: &BootSet,
    warnings: &mut Vec<String>,
) -> std::result::Result<(), SetupError> {
    if session.operation == Operation::Shutdown {
        return Ok(());
    }
    let Some(image_id) = image_id_from_manifest_path(&boot_set.path) else {
        return Ok(());
    };
    let timeout = Duration::from_secs(opts.ims_read_timeout);
    match env.clients.ims.get_image(image_id, timeout).await {
        Ok(Some(_)) => {
            if boot_set.rootfs_provider == SBPS_PROVIDER {
                if let Err(e) = env
                    .clients
                    .ims
                    .tag_image(image_id, "sbps-project", "true", timeout)
                    .await
                {
                    if opts.ims_errors_fatal {
                        return Err(SetupError::Fatal(format!(
                            "failed to tag image {image_id} for projection: {e}"
                        )));
                    }
                    tracing::warn!(image = image_id, error = %e, "failed to tag image");
                }
            }
            Ok(())
        }
        Ok(None) => {
            if opts.ims_images_must_exist {
                warnings.push(format!("image {image_id} is not known to the image service"));
            }
            Ok(())
        }
        Err(e) => {
            if opts.ims_errors_fatal {
                return Err(SetupError::Fatal(format!(
                    "image service error for image {image_id}: {e}"
                )));
            }
            tracing::warn!(image = image_id, error = %e, "image service error ignored");
            Ok(())
        }
    }
}

/// Compute the state a boot set asks for. A shutdown's goal is simply
/// "off"; anything else reads the image manifest for its artifacts and
/// assembles the kernel command line.
async fn resolve_state<S: Store>(
    env: &Env<S>,
    opts: &OptionsSnapshot,
    session: &Session,
    template: &SessionTemplate,
    boot_set: &BootSet,
) -> std::result::Result<ResolvedState, SetupError> {
    if session.operation == Operation::Shutdown {
        return Ok(ResolvedState {
            boot_artifacts: BootArtifacts::default(),
            configuration: String::new(),
        });
    }

    let timeout = Duration::from_secs(opts.ims_read_timeout);
    let bytes = env
        .clients
        .objects
        .get_object(&boot_set.path, &boot_set.etag, MANIFEST_SIZE_CAP, timeout)
        .await?;
    let manifest = parse_manifest(&bytes)
        .map_err(|e| SetupError::Fatal(format!("invalid image manifest {}: {e}", boot_set.path)))?;

    let mut pieces: Vec<String> = Vec::new();
    if let Some(link) = &manifest.boot_parameters {
        match env
            .clients
            .objects
            .get_object(&link.path, &link.etag, MANIFEST_SIZE_CAP, timeout)
            .await
        {
            Ok(bytes) => {
                let image_params = String::from_utf8_lossy(&bytes);
                pieces.extend(image_params.split_whitespace().map(ToString::to_string));
            }
            Err(e) => {
                tracing::warn!(path = %link.path, error = %e,
                    "unable to read image boot parameters, continuing without them");
            }
        }
    }
    if !boot_set.kernel_parameters.is_empty() {
        pieces.push(boot_set.kernel_parameters.clone());
    }
    if let Some(rootfs) = rootfs_kernel_arg(boot_set, &manifest) {
        pieces.push(rootfs);
    }
    pieces.push(format!("bos_session_id={}", session.name));

    Ok(ResolvedState {
        boot_artifacts: BootArtifacts {
            kernel: manifest.kernel.path.clone(),
            kernel_parameters: pieces.join(" "),
            initrd: manifest.initrd.path.clone(),
        },
        configuration: template.configuration_for(boot_set),
    })
}

/// The `root=` kernel argument for the boot set's rootfs provider.
fn rootfs_kernel_arg(
    boot_set: &BootSet,
    manifest: &bos_clients::s3::BootImageManifest,
) -> Option<String> {
    if boot_set.rootfs_provider.is_empty() {
        if boot_set.rootfs_provider_passthrough.is_empty() {
            return None;
        }
        return Some(format!("root={}", boot_set.rootfs_provider_passthrough));
    }
    let rootfs = manifest.rootfs.as_ref()?;
    let mut arg = format!(
        "root={}-s3:{}:{}",
        boot_set.rootfs_provider, rootfs.path, rootfs.etag
    );
    if !boot_set.rootfs_provider_passthrough.is_empty() {
        arg.push(':');
        arg.push_str(&boot_set.rootfs_provider_passthrough);
    }
    Some(arg)
}

/// Patch every resolved component: claim it for the session and write
/// the desired (or staged) state. Returns claimed and unknown ids.
fn claim_components<S: Store>(
    env: &Env<S>,
    opts: &OptionsSnapshot,
    session: &Session,
    nodes: &[String],
    state: &ResolvedState,
    now: DateTime<Utc>,
) -> std::result::Result<(Vec<String>, Vec<String>), SetupError> {
    let keys: Vec<String> = nodes.iter().map(|id| session.tenant.key_for(id)).collect();
    let known: std::collections::HashMap<String, Component> =
        env.store.get_multi(kind::COMPONENTS, &keys)?;

    let mut claimed = Vec::new();
    let mut unknown = Vec::new();
    for id in nodes {
        let key = session.tenant.key_for(id);
        let Some(component) = known.get(&key) else {
            unknown.push(id.clone());
            continue;
        };
        if !component.enabled && !session.include_disabled {
            tracing::debug!(component = %id, "skipping disabled component");
            continue;
        }

        let stage = session.stage;
        let clear_stage = opts.clear_stage;
        let operation = session.operation;
        let session_name = session.name.clone();
        let state_artifacts = state.boot_artifacts.clone();
        let state_configuration = state.configuration.clone();
        env.store
            .patch(kind::COMPONENTS, &key, move |c: &mut Component| {
                if stage {
                    c.staged_state = StagedState {
                        boot_artifacts: state_artifacts.clone(),
                        configuration: state_configuration.clone(),
                        session: session_name.clone(),
                    };
                    return;
                }
                c.session.clone_from(&session_name);
                c.enabled = true;
                c.desired_state = DesiredState {
                    boot_artifacts: state_artifacts.clone(),
                    configuration: state_configuration.clone(),
                    bss_token: String::new(),
                };
                c.last_action = LastAction {
                    action: Action::SessionSetup,
                    num_attempts: 1,
                    last_updated: Some(now),
                    failed: false,
                };
                c.error.clear();
                c.event_stats = EventStats::default();
                c.status.status_override = None;
                if clear_stage {
                    c.staged_state = StagedState::default();
                }
                if matches!(operation, Operation::Boot | Operation::Reboot)
                    && c.actual_state.boot_artifacts != state_artifacts
                {
                    c.actual_state = ActualState::default();
                }
            })?;
        claimed.push(id.clone());
    }
    Ok((claimed, unknown))
}

fn mark_running<S: Store>(
    env: &Env<S>,
    session: &Session,
    ids: &[String],
    warnings: &[String],
    now: DateTime<Utc>,
) -> std::result::Result<(), SetupError> {
    let joined = ids.join(",");
    let warning = if warnings.is_empty() {
        None
    } else {
        Some(warnings.join("; "))
    };
    env.store
        .patch(kind::SESSIONS, &session.key(), move |s: &mut Session| {
            s.status.status = SessionState::Running;
            s.components.clone_from(&joined);
            s.status.error.clone_from(&warning);
            if s.status.start_time.is_none() {
                s.status.start_time = Some(now);
            }
        })?;
    Ok(())
}

fn fail_session<S: Store>(env: &Env<S>, session: &Session, reason: &str) -> Result<()> {
    let now = current_timestamp();
    let reason = reason.to_string();
    env.store
        .patch(kind::SESSIONS, &session.key(), move |s: &mut Session| {
            s.status.status = SessionState::Complete;
            s.status.error = Some(reason.clone());
            s.status.end_time = Some(now);
        })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::test_env;
    use bos_core::Tenant;
    use bos_store::types::{Arch, SessionStatus};
    use bos_store::RocksStore;
    use std::collections::BTreeMap;

    const MANIFEST: &str = r#"{
        "artifacts": [
            {"type": "application/vnd.cray.image.kernel",
             "link": {"path": "s3://boot-images/img/kernel", "etag": "k1"}},
            {"type": "application/vnd.cray.image.initrd",
             "link": {"path": "s3://boot-images/img/initrd", "etag": "i1"}},
            {"type": "application/vnd.cray.image.rootfs.squashfs",
             "link": {"path": "s3://boot-images/img/rootfs", "etag": "r1"}}
        ]
    }"#;

    fn seed_world(env: &Env<RocksStore>, mocks: &crate::env::testing::Mocks, tenant: &Tenant) {
        for id in ["x1", "x2"] {
            mocks.hsm.add_node(id, true, Arch::X86);
            let mut component = Component::new(id, tenant.clone());
            component.enabled = true;
            env.store
                .put(kind::COMPONENTS, &component.key(), &component)
                .unwrap();
        }
        mocks
            .objects
            .put_object("s3://boot-images/img/manifest.json", "m1", MANIFEST.as_bytes());

        let mut boot_sets = BTreeMap::new();
        boot_sets.insert(
            "compute".to_string(),
            BootSet {
                name: "compute".into(),
                node_list: vec!["x1".into(), "x2".into()],
                arch: Arch::X86,
                path: "s3://boot-images/img/manifest.json".into(),
                etag: "m1".into(),
                kernel_parameters: "console=ttyS0".into(),
                rootfs_provider: "sbps".into(),
                ..BootSet::default()
            },
        );
        let template = SessionTemplate {
            name: "nightly".into(),
            tenant: tenant.clone(),
            enable_cfs: true,
            cfs: Some(bos_store::types::CfsParameters {
                configuration: "compute-config".into(),
            }),
            boot_sets,
            ..SessionTemplate::default()
        };
        env.store
            .put(kind::SESSION_TEMPLATES, &template.key(), &template)
            .unwrap();
    }

    fn seed_session(env: &Env<RocksStore>, tenant: &Tenant, operation: Operation) -> Session {
        let session = Session {
            name: "s1".into(),
            tenant: tenant.clone(),
            template_name: "nightly".into(),
            operation,
            limit: String::new(),
            stage: false,
            include_disabled: false,
            components: String::new(),
            status: SessionStatus::default(),
        };
        env.store
            .put(kind::SESSIONS, &session.key(), &session)
            .unwrap();
        session
    }

    fn reload_session(env: &Env<RocksStore>, session: &Session) -> Session {
        env.store.get(kind::SESSIONS, &session.key()).unwrap().unwrap()
    }

    fn reload_component(env: &Env<RocksStore>, tenant: &Tenant, id: &str) -> Component {
        env.store
            .get(kind::COMPONENTS, &tenant.key_for(id))
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn boot_session_claims_components() {
        let (env, mocks, _dir) = test_env();
        let tenant = Tenant::untenanted();
        seed_world(&env, &mocks, &tenant);
        let session = seed_session(&env, &tenant, Operation::Boot);

        SessionSetupOperator::new()
            .run_pass(&env, &OptionsSnapshot::default())
            .await
            .unwrap();

        let session = reload_session(&env, &session);
        assert_eq!(session.status.status, SessionState::Running);
        assert_eq!(session.components, "x1,x2");

        let component = reload_component(&env, &tenant, "x1");
        assert_eq!(component.session, "s1");
        assert_eq!(
            component.desired_state.boot_artifacts.kernel,
            "s3://boot-images/img/kernel"
        );
        assert_eq!(component.desired_state.configuration, "compute-config");
        assert_eq!(component.last_action.action, Action::SessionSetup);
        let params = &component.desired_state.boot_artifacts.kernel_parameters;
        assert!(params.contains("console=ttyS0"));
        assert!(params.contains("root=sbps-s3:s3://boot-images/img/rootfs:r1"));
        assert!(params.ends_with("bos_session_id=s1"));
    }

    #[tokio::test]
    async fn shutdown_session_clears_desired_state() {
        let (env, mocks, _dir) = test_env();
        let tenant = Tenant::untenanted();
        seed_world(&env, &mocks, &tenant);

        let mut booted = reload_component(&env, &tenant, "x1");
        booted.desired_state.boot_artifacts.kernel = "old-kernel".into();
        env.store
            .put(kind::COMPONENTS, &booted.key(), &booted)
            .unwrap();

        let session = seed_session(&env, &tenant, Operation::Shutdown);
        SessionSetupOperator::new()
            .run_pass(&env, &OptionsSnapshot::default())
            .await
            .unwrap();

        let component = reload_component(&env, &tenant, "x1");
        assert!(component.desired_state.boot_artifacts.is_empty());
        assert!(component.desired_state.configuration.is_empty());
        assert_eq!(reload_session(&env, &session).status.status, SessionState::Running);
    }

    #[tokio::test]
    async fn missing_template_fails_the_session() {
        let (env, _mocks, _dir) = test_env();
        let tenant = Tenant::untenanted();
        let session = seed_session(&env, &tenant, Operation::Boot);

        SessionSetupOperator::new()
            .run_pass(&env, &OptionsSnapshot::default())
            .await
            .unwrap();

        let session = reload_session(&env, &session);
        assert_eq!(session.status.status, SessionState::Complete);
        assert!(session.status.error.as_deref().unwrap().contains("does not exist"));
    }

    #[tokio::test]
    async fn limit_restricts_the_effective_set() {
        let (env, mocks, _dir) = test_env();
        let tenant = Tenant::untenanted();
        seed_world(&env, &mocks, &tenant);
        let mut session = seed_session(&env, &tenant, Operation::Boot);
        session.limit = "x1".into();
        env.store
            .put(kind::SESSIONS, &session.key(), &session)
            .unwrap();

        SessionSetupOperator::new()
            .run_pass(&env, &OptionsSnapshot::default())
            .await
            .unwrap();

        let session = reload_session(&env, &session);
        assert_eq!(session.components, "x1");
        assert!(reload_component(&env, &tenant, "x2").session.is_empty());
    }

    #[tokio::test]
    async fn unknown_ids_become_a_session_warning() {
        let (env, mocks, _dir) = test_env();
        let tenant = Tenant::untenanted();
        seed_world(&env, &mocks, &tenant);
        env.store
            .delete(kind::COMPONENTS, &tenant.key_for("x2"))
            .unwrap();

        let session = seed_session(&env, &tenant, Operation::Boot);
        SessionSetupOperator::new()
            .run_pass(&env, &OptionsSnapshot::default())
            .await
            .unwrap();

        let session = reload_session(&env, &session);
        assert_eq!(session.status.status, SessionState::Running);
        assert_eq!(session.components, "x1");
        assert!(session
            .status
            .error
            .as_deref()
            .unwrap()
            .contains("unknown component ids: x2"));
    }

    #[tokio::test]
    async fn staging_writes_staged_state_only() {
        let (env, mocks, _dir) = test_env();
        let tenant = Tenant::untenanted();
        seed_world(&env, &mocks, &tenant);
        let mut session = seed_session(&env, &tenant, Operation::Reboot);
        session.stage = true;
        env.store
            .put(kind::SESSIONS, &session.key(), &session)
            .unwrap();

        SessionSetupOperator::new()
            .run_pass(&env, &OptionsSnapshot::default())
            .await
            .unwrap();

        let component = reload_component(&env, &tenant, "x1");
        assert!(component.desired_state.is_empty());
        assert!(component.session.is_empty());
        assert_eq!(component.staged_state.session, "s1");
        assert_eq!(
            component.staged_state.boot_artifacts.kernel,
            "s3://boot-images/img/kernel"
        );
    }

    #[tokio::test]
    async fn tenant_sessions_only_touch_owned_nodes() {
        let (env, mocks, _dir) = test_env();
        let blue = Tenant::from("blue");
        seed_world(&env, &mocks, &blue);
        mocks.tenants.add_tenant(&blue, &["x1"]);

        let session = seed_session(&env, &blue, Operation::Boot);
        SessionSetupOperator::new()
            .run_pass(&env, &OptionsSnapshot::default())
            .await
            .unwrap();

        let session = reload_session(&env, &session);
        assert_eq!(session.components, "x1");
        assert!(reload_component(&env, &blue, "x2").session.is_empty());
    }

    #[tokio::test]
    async fn locked_nodes_are_excluded() {
        let (env, mocks, _dir) = test_env();
        let tenant = Tenant::untenanted();
        seed_world(&env, &mocks, &tenant);
        mocks.hsm.lock_node("x2");

        let session = seed_session(&env, &tenant, Operation::Boot);
        SessionSetupOperator::new()
            .run_pass(&env, &OptionsSnapshot::default())
            .await
            .unwrap();

        assert_eq!(reload_session(&env, &session).components, "x1");
    }

    #[tokio::test]
    async fn reject_nids_fails_numeric_selectors() {
        let (env, mocks, _dir) = test_env();
        let tenant = Tenant::untenanted();
        seed_world(&env, &mocks, &tenant);
        let mut session = seed_session(&env, &tenant, Operation::Boot);
        session.limit = "1234".into();
        env.store
            .put(kind::SESSIONS, &session.key(), &session)
            .unwrap();

        let opts = OptionsSnapshot {
            reject_nids: true,
            ..OptionsSnapshot::default()
        };
        SessionSetupOperator::new().run_pass(&env, &opts).await.unwrap();

        let session = reload_session(&env, &session);
        assert_eq!(session.status.status, SessionState::Complete);
        assert!(session.status.error.as_deref().unwrap().contains("NID"));
    }

    #[tokio::test]
    async fn session_limit_required_is_enforced() {
        let (env, mocks, _dir) = test_env();
        let tenant = Tenant::untenanted();
        seed_world(&env, &mocks, &tenant);
        let session = seed_session(&env, &tenant, Operation::Boot);

        let opts = OptionsSnapshot {
            session_limit_required: true,
            ..OptionsSnapshot::default()
        };
        SessionSetupOperator::new().run_pass(&env, &opts).await.unwrap();

        let session = reload_session(&env, &session);
        assert_eq!(session.status.status, SessionState::Complete);
        assert!(session
            .status
            .error
            .as_deref()
            .unwrap()
            .contains("session_limit_required"));
    }

    #[tokio::test]
    async fn sbps_images_are_tagged() {
        let (env, mocks, _dir) = test_env();
        let tenant = Tenant::untenanted();
        seed_world(&env, &mocks, &tenant);
        mocks.ims.add_image(bos_clients::ims::Image {
            id: "img".into(),
            name: "compute".into(),
            arch: Arch::X86,
        });

        seed_session(&env, &tenant, Operation::Boot);
        SessionSetupOperator::new()
            .run_pass(&env, &OptionsSnapshot::default())
            .await
            .unwrap();

        let tags = mocks.ims.tags();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0], ("img".to_string(), "sbps-project".to_string(), "true".to_string()));
    }

    #[test]
    fn limit_grammar() {
        let inventory = {
            let mut inv = Inventory::default();
            inv.groups
                .insert("compute".into(), ["x1", "x2", "x3"].iter().map(ToString::to_string).collect());
            inv
        };
        let nodes: HashSet<String> =
            ["x1", "x2", "x3", "x4"].iter().map(ToString::to_string).collect();

        let allowed = apply_limit("compute,!x2", &nodes, &inventory);
        assert!(allowed.contains("x1") && allowed.contains("x3"));
        assert!(!allowed.contains("x2"));

        let allowed = apply_limit("*,&compute", &nodes, &inventory);
        assert_eq!(allowed.len(), 3);

        let allowed = apply_limit("x4", &nodes, &inventory);
        assert_eq!(allowed.len(), 1);
        assert!(allowed.contains("x4"));
    }
}
