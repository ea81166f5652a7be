//! Tenant namespace type.
//!
//! Every record kind in the store is keyed under a tenant. The empty
//! tenant is a valid value and represents the untenanted bucket, so this
//! type never distinguishes "no tenant" from "empty tenant".

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Separator between the tenant prefix and the record id in store keys.
///
/// Ids are rejected at the API boundary if they contain this character,
/// which is what makes tenant prefix scans collision-free.
pub const KEY_SEPARATOR: char = '/';

/// Errors produced when validating a tenant name.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TenantError {
    /// The tenant name contains the reserved key separator.
    #[error("tenant name must not contain '{KEY_SEPARATOR}'")]
    ReservedCharacter,
}

/// A tenant namespace.
///
/// Wraps the value of the `Cray-Tenant-Name` header. An absent header and
/// an empty header are equivalent, both mapping to [`Tenant::untenanted`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tenant(String);

impl Tenant {
    /// The untenanted bucket.
    #[must_use]
    pub fn untenanted() -> Self {
        Self(String::new())
    }

    /// Create a tenant, validating that the name is usable in store keys.
    ///
    /// # Errors
    ///
    /// Returns an error if the name contains the key separator.
    pub fn new(name: impl Into<String>) -> Result<Self, TenantError> {
        let name = name.into();
        if name.contains(KEY_SEPARATOR) {
            return Err(TenantError::ReservedCharacter);
        }
        Ok(Self(name))
    }

    /// The tenant name; empty for the untenanted bucket.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when this is the untenanted bucket.
    #[must_use]
    pub fn is_untenanted(&self) -> bool {
        self.0.is_empty()
    }

    /// Build the store key for an id under this tenant: `<tenant>/<id>`.
    #[must_use]
    pub fn key_for(&self, id: &str) -> String {
        format!("{}{KEY_SEPARATOR}{id}", self.0)
    }

    /// The prefix that matches every key under this tenant.
    #[must_use]
    pub fn key_prefix(&self) -> String {
        format!("{}{KEY_SEPARATOR}", self.0)
    }
}

impl From<&str> for Tenant {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for Tenant {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl fmt::Display for Tenant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, "<untenanted>")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Split a store key into its tenant and id halves.
///
/// Returns `None` when the key does not contain the separator.
#[must_use]
pub fn split_key(key: &str) -> Option<(Tenant, &str)> {
    key.split_once(KEY_SEPARATOR)
        .map(|(tenant, id)| (Tenant::from(tenant), id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untenanted_key_layout() {
        let tenant = Tenant::untenanted();
        assert!(tenant.is_untenanted());
        assert_eq!(tenant.key_for("x1000c0s0b0n0"), "/x1000c0s0b0n0");
        assert_eq!(tenant.key_prefix(), "/");
    }

    #[test]
    fn tenanted_key_layout() {
        let tenant = Tenant::from("blue");
        assert_eq!(tenant.key_for("x1"), "blue/x1");
        assert_eq!(tenant.key_prefix(), "blue/");
    }

    #[test]
    fn keys_never_collide_across_tenants() {
        let a = Tenant::from("a").key_for("n1");
        let b = Tenant::from("b").key_for("n1");
        assert_ne!(a, b);
        assert!(a.starts_with(&Tenant::from("a").key_prefix()));
        assert!(!b.starts_with(&Tenant::from("a").key_prefix()));
    }

    #[test]
    fn split_round_trip() {
        let tenant = Tenant::from("blue");
        let key = tenant.key_for("x1c0s0b0n0");
        let (parsed, id) = split_key(&key).unwrap();
        assert_eq!(parsed, tenant);
        assert_eq!(id, "x1c0s0b0n0");
    }

    #[test]
    fn reserved_character_rejected() {
        assert_eq!(
            Tenant::new("a/b").unwrap_err(),
            TenantError::ReservedCharacter
        );
        assert!(Tenant::new("fine-name").is_ok());
    }
}
