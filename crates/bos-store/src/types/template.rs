//! Session template records.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use bos_core::Tenant;

/// Node architecture a boot set targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Arch {
    /// x86-64 nodes (the default when unspecified).
    #[default]
    X86,
    /// AArch64 nodes.
    ARM,
    /// Hardware reporting another architecture.
    Other,
    /// Hardware whose architecture is not reported.
    Unknown,
}

impl Arch {
    /// Parse an architecture from its wire form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "X86" => Some(Self::X86),
            "ARM" => Some(Self::ARM),
            "Other" => Some(Self::Other),
            "Unknown" => Some(Self::Unknown),
            _ => None,
        }
    }

    /// True when a node of architecture `reported` may boot a set
    /// targeting `self`. Unknown hardware is always allowed through.
    #[must_use]
    pub fn admits(self, reported: Self) -> bool {
        reported == Self::Unknown || self == reported
    }
}

/// Configuration-framework parameters on a template or boot set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CfsParameters {
    /// Name of the configuration to apply.
    #[serde(default)]
    pub configuration: String,
}

/// A boot set: a node selector bound to boot artifacts and configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BootSet {
    /// Boot set name; must equal its key in the template map.
    #[serde(default)]
    pub name: String,
    /// Explicitly selected nodes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub node_list: Vec<String>,
    /// Hardware groups whose members are selected.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub node_groups: Vec<String>,
    /// Hardware roles whose members are selected.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub node_roles_groups: Vec<String>,
    /// Architecture filter for the selected nodes.
    #[serde(default)]
    pub arch: Arch,
    /// Object-store path of the image manifest.
    pub path: String,
    /// Expected etag of the manifest object; empty to skip the check.
    #[serde(default)]
    pub etag: String,
    /// Extra kernel parameters for this boot set.
    #[serde(default)]
    pub kernel_parameters: String,
    /// Root filesystem provider (e.g. `sbps`).
    #[serde(default)]
    pub rootfs_provider: String,
    /// Provider-specific string appended to the rootfs kernel argument.
    #[serde(default)]
    pub rootfs_provider_passthrough: String,
    /// Boot-set level configuration override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cfs: Option<CfsParameters>,
}

impl BootSet {
    /// True when at least one hardware specifier field is populated.
    #[must_use]
    pub fn has_hardware_specifier(&self) -> bool {
        !self.node_list.is_empty()
            || !self.node_groups.is_empty()
            || !self.node_roles_groups.is_empty()
    }
}

/// A session template: one or more boot sets plus shared configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionTemplate {
    /// Template name, unique per tenant.
    pub name: String,
    /// Owning tenant.
    #[serde(default)]
    pub tenant: Tenant,
    /// Free-form description.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Whether configuration is applied after boot.
    #[serde(default)]
    pub enable_cfs: bool,
    /// Template-level configuration parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cfs: Option<CfsParameters>,
    /// Boot sets by name. BTreeMap keeps the wire form canonical.
    #[serde(default)]
    pub boot_sets: BTreeMap<String, BootSet>,
}

impl SessionTemplate {
    /// The store key for this template.
    #[must_use]
    pub fn key(&self) -> String {
        self.tenant.key_for(&self.name)
    }

    /// The configuration a boot set should use: the boot-set override if
    /// present, else the template-level configuration, else empty. Only
    /// meaningful when `enable_cfs` is set.
    #[must_use]
    pub fn configuration_for(&self, boot_set: &BootSet) -> String {
        if !self.enable_cfs {
            return String::new();
        }
        boot_set
            .cfs
            .as_ref()
            .or(self.cfs.as_ref())
            .map(|cfs| cfs.configuration.clone())
            .unwrap_or_default()
    }
}
