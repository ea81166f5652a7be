//! Hardware state manager client.
//!
//! The orchestrator uses the hardware state manager four ways: discovery
//! (the full node list), eligibility filtering (enabled / locked nodes),
//! group and role membership for boot-set resolution, and per-node
//! architecture lookup.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;

use bos_store::types::Arch;

use crate::error::Result;
use crate::retry::{retry_transient, status_error, transport_error};
use crate::{ensure_not_empty, ClientError};

const SERVICE: &str = "hsm";

/// Group and role membership, cached once per session-setup pass.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    /// Group name → member node ids.
    pub groups: HashMap<String, HashSet<String>>,
    /// Role name → member node ids.
    pub roles: HashMap<String, HashSet<String>>,
}

impl Inventory {
    /// Members of a named group or role, if either exists. Groups win on
    /// a name collision.
    #[must_use]
    pub fn members(&self, name: &str) -> Option<&HashSet<String>> {
        self.groups.get(name).or_else(|| self.roles.get(name))
    }
}

/// Client contract for the hardware state manager.
#[async_trait]
pub trait HardwareState: Send + Sync {
    /// All node ids known to the hardware state manager.
    ///
    /// # Errors
    ///
    /// Fails on exhausted retries or terminal HTTP errors.
    async fn node_ids(&self, timeout: Duration) -> Result<HashSet<String>>;

    /// Inventory state for the given nodes: id → enabled flag. Nodes
    /// the hardware manager does not know are absent from the map.
    ///
    /// # Errors
    ///
    /// Fails on empty input, exhausted retries, or terminal HTTP errors.
    async fn node_states(&self, ids: &[String], timeout: Duration)
        -> Result<HashMap<String, bool>>;

    /// Which of the given nodes are locked and must not be acted on.
    ///
    /// # Errors
    ///
    /// Fails on empty input, exhausted retries, or terminal HTTP errors.
    async fn locked_nodes(&self, ids: &[String], timeout: Duration) -> Result<HashSet<String>>;

    /// Group and role membership for boot-set resolution.
    ///
    /// # Errors
    ///
    /// Fails on exhausted retries or terminal HTTP errors.
    async fn inventory(&self, timeout: Duration) -> Result<Inventory>;

    /// Reported architecture for each of the given nodes. Nodes the
    /// service does not know are absent from the map.
    ///
    /// # Errors
    ///
    /// Fails on empty input, exhausted retries, or terminal HTTP errors.
    async fn node_archs(&self, ids: &[String], timeout: Duration)
        -> Result<HashMap<String, Arch>>;
}

#[derive(Debug, Deserialize)]
struct ComponentsResponse {
    #[serde(rename = "Components", default)]
    components: Vec<HsmComponent>,
}

#[derive(Debug, Deserialize)]
struct HsmComponent {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Enabled", default)]
    enabled: bool,
    #[serde(rename = "Arch", default)]
    arch: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GroupsResponse(Vec<GroupEntry>);

#[derive(Debug, Deserialize)]
struct GroupEntry {
    label: String,
    #[serde(default)]
    members: GroupMembers,
}

#[derive(Debug, Default, Deserialize)]
struct GroupMembers {
    #[serde(default)]
    ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct LocksResponse {
    #[serde(rename = "Components", default)]
    components: Vec<LockEntry>,
}

#[derive(Debug, Deserialize)]
struct LockEntry {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Locked", default)]
    locked: bool,
}

/// HTTP client for the hardware state manager.
#[derive(Debug, Clone)]
pub struct HttpHardwareState {
    client: reqwest::Client,
    base_url: String,
}

impl HttpHardwareState {
    /// Create a client against the given base URL.
    #[must_use]
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        operation: &'static str,
        url: String,
        query: Vec<(&'static str, String)>,
        timeout: Duration,
    ) -> Result<T> {
        retry_transient(operation, || async {
            let response = self
                .client
                .get(&url)
                .query(&query)
                .timeout(timeout)
                .send()
                .await
                .map_err(|e| transport_error(SERVICE, &e))?;
            if !response.status().is_success() {
                return Err(status_error(SERVICE, response).await);
            }
            response.json().await.map_err(|e| ClientError::Decode {
                service: SERVICE,
                message: e.to_string(),
            })
        })
        .await
    }

    async fn node_components(
        &self,
        ids: &[String],
        timeout: Duration,
    ) -> Result<Vec<HsmComponent>> {
        let mut query = vec![("type", "Node".to_string())];
        query.extend(ids.iter().map(|id| ("id", id.clone())));
        let response: ComponentsResponse = self
            .get_json(
                "hsm state_components",
                format!("{}/State/Components", self.base_url),
                query,
                timeout,
            )
            .await?;
        Ok(response.components)
    }
}

fn parse_arch(reported: Option<&str>) -> Arch {
    match reported {
        Some(value) => Arch::parse(value).unwrap_or(Arch::Other),
        None => Arch::Unknown,
    }
}

#[async_trait]
impl HardwareState for HttpHardwareState {
    async fn node_ids(&self, timeout: Duration) -> Result<HashSet<String>> {
        let components = self.node_components(&[], timeout).await?;
        Ok(components.into_iter().map(|c| c.id).collect())
    }

    async fn node_states(
        &self,
        ids: &[String],
        timeout: Duration,
    ) -> Result<HashMap<String, bool>> {
        ensure_not_empty(ids, "node_states")?;
        let components = self.node_components(ids, timeout).await?;
        Ok(components.into_iter().map(|c| (c.id, c.enabled)).collect())
    }

    async fn locked_nodes(&self, ids: &[String], timeout: Duration) -> Result<HashSet<String>> {
        ensure_not_empty(ids, "locked_nodes")?;
        let mut query: Vec<(&'static str, String)> = Vec::with_capacity(ids.len());
        query.extend(ids.iter().map(|id| ("id", id.clone())));
        let response: LocksResponse = self
            .get_json(
                "hsm locks",
                format!("{}/locks/status", self.base_url),
                query,
                timeout,
            )
            .await?;
        Ok(response
            .components
            .into_iter()
            .filter(|c| c.locked)
            .map(|c| c.id)
            .collect())
    }

    async fn inventory(&self, timeout: Duration) -> Result<Inventory> {
        let groups: GroupsResponse = self
            .get_json(
                "hsm groups",
                format!("{}/groups", self.base_url),
                Vec::new(),
                timeout,
            )
            .await?;
        let roles: GroupsResponse = self
            .get_json(
                "hsm roles",
                format!("{}/roles", self.base_url),
                Vec::new(),
                timeout,
            )
            .await?;

        let collect = |entries: GroupsResponse| {
            entries
                .0
                .into_iter()
                .map(|entry| (entry.label, entry.members.ids.into_iter().collect()))
                .collect()
        };
        Ok(Inventory {
            groups: collect(groups),
            roles: collect(roles),
        })
    }

    async fn node_archs(
        &self,
        ids: &[String],
        timeout: Duration,
    ) -> Result<HashMap<String, Arch>> {
        ensure_not_empty(ids, "node_archs")?;
        let components = self.node_components(ids, timeout).await?;
        Ok(components
            .into_iter()
            .map(|c| {
                let arch = parse_arch(c.arch.as_deref());
                (c.id, arch)
            })
            .collect())
    }
}

/// In-memory hardware state for tests.
#[derive(Debug, Default)]
pub struct MockHardwareState {
    nodes: Mutex<HashMap<String, MockNode>>,
    inventory: Mutex<Inventory>,
}

#[derive(Debug, Clone)]
struct MockNode {
    enabled: bool,
    locked: bool,
    arch: Arch,
}

impl MockHardwareState {
    /// Create an empty mock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node with the given properties.
    pub fn add_node(&self, id: &str, enabled: bool, arch: Arch) {
        self.nodes.lock().insert(
            id.to_string(),
            MockNode {
                enabled,
                locked: false,
                arch,
            },
        );
    }

    /// Mark a node as locked.
    pub fn lock_node(&self, id: &str) {
        if let Some(node) = self.nodes.lock().get_mut(id) {
            node.locked = true;
        }
    }

    /// Define a group with the given members.
    pub fn add_group(&self, label: &str, members: &[&str]) {
        self.inventory.lock().groups.insert(
            label.to_string(),
            members.iter().map(ToString::to_string).collect(),
        );
    }

    /// Define a role with the given members.
    pub fn add_role(&self, label: &str, members: &[&str]) {
        self.inventory.lock().roles.insert(
            label.to_string(),
            members.iter().map(ToString::to_string).collect(),
        );
    }
}

#[async_trait]
impl HardwareState for MockHardwareState {
    async fn node_ids(&self, _timeout: Duration) -> Result<HashSet<String>> {
        Ok(self.nodes.lock().keys().cloned().collect())
    }

    async fn node_states(
        &self,
        ids: &[String],
        _timeout: Duration,
    ) -> Result<HashMap<String, bool>> {
        ensure_not_empty(ids, "node_states")?;
        let nodes = self.nodes.lock();
        Ok(ids
            .iter()
            .filter_map(|id| nodes.get(id).map(|n| (id.clone(), n.enabled)))
            .collect())
    }

    async fn locked_nodes(&self, ids: &[String], _timeout: Duration) -> Result<HashSet<String>> {
        ensure_not_empty(ids, "locked_nodes")?;
        let nodes = self.nodes.lock();
        Ok(ids
            .iter()
            .filter(|id| nodes.get(*id).is_some_and(|n| n.locked))
            .cloned()
            .collect())
    }

    async fn inventory(&self, _timeout: Duration) -> Result<Inventory> {
        Ok(self.inventory.lock().clone())
    }

    async fn node_archs(
        &self,
        ids: &[String],
        _timeout: Duration,
    ) -> Result<HashMap<String, Arch>> {
        ensure_not_empty(ids, "node_archs")?;
        let nodes = self.nodes.lock();
        Ok(ids
            .iter()
            .filter_map(|id| nodes.get(id).map(|n| (id.clone(), n.arch)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_tracks_eligibility() {
        let hsm = MockHardwareState::new();
        hsm.add_node("x1", true, Arch::X86);
        hsm.add_node("x2", false, Arch::X86);
        hsm.add_node("x3", true, Arch::ARM);
        hsm.lock_node("x3");

        let ids: Vec<String> = ["x1", "x2", "x3", "ghost"]
            .iter()
            .map(ToString::to_string)
            .collect();
        let timeout = Duration::from_secs(1);

        let states = hsm.node_states(&ids, timeout).await.unwrap();
        assert!(states["x1"]);
        assert!(!states["x2"]);
        // Unknown hardware is absent, not reported disabled.
        assert!(!states.contains_key("ghost"));

        let locked = hsm.locked_nodes(&ids, timeout).await.unwrap();
        assert_eq!(locked.len(), 1);
        assert!(locked.contains("x3"));

        let archs = hsm.node_archs(&ids, timeout).await.unwrap();
        assert_eq!(archs["x1"], Arch::X86);
        assert_eq!(archs["x3"], Arch::ARM);
    }

    #[tokio::test]
    async fn inventory_membership_lookup() {
        let hsm = MockHardwareState::new();
        hsm.add_group("compute", &["x1", "x2"]);
        hsm.add_role("Management", &["x3"]);

        let inventory = hsm.inventory(Duration::from_secs(1)).await.unwrap();
        assert!(inventory.members("compute").unwrap().contains("x1"));
        assert!(inventory.members("Management").unwrap().contains("x3"));
        assert!(inventory.members("storage").is_none());
    }

    #[test]
    fn arch_parsing_falls_back() {
        assert_eq!(parse_arch(Some("X86")), Arch::X86);
        assert_eq!(parse_arch(Some("RISC-V")), Arch::Other);
        assert_eq!(parse_arch(None), Arch::Unknown);
    }
}
