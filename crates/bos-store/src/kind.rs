//! Record kinds and their column families.
//!
//! Each kind maps to one RocksDB column family. Keys within a kind are
//! `<tenant>/<id>`; see [`bos_core::Tenant`].

/// Per-node reconciliation records, keyed by `<tenant>/<component id>`.
pub const COMPONENTS: &str = "components";

/// Session records, keyed by `<tenant>/<session name>`.
pub const SESSIONS: &str = "sessions";

/// Saved session-status snapshots for completed sessions, keyed like
/// sessions.
pub const SESSION_STATUS: &str = "session_status";

/// Session templates, keyed by `<tenant>/<template name>`.
pub const SESSION_TEMPLATES: &str = "session_templates";

/// The single mutable options record, keyed by [`OPTIONS_KEY`].
pub const OPTIONS: &str = "options";

/// Boot-script referral tokens mapped to the artifacts they were issued
/// for, keyed by `<tenant>/<token>`.
pub const BSS_TOKENS: &str = "bss_tokens";

/// Store metadata, currently just the format version under
/// [`VERSION_KEY`].
pub const META: &str = "meta";

/// Key of the options record within the [`OPTIONS`] kind.
pub const OPTIONS_KEY: &str = "global";

/// Key of the format-version record within the [`META`] kind.
pub const VERSION_KEY: &str = "store_version";

/// Returns every kind, for database initialization.
#[must_use]
pub fn all_kinds() -> Vec<&'static str> {
    vec![
        COMPONENTS,
        SESSIONS,
        SESSION_STATUS,
        SESSION_TEMPLATES,
        OPTIONS,
        BSS_TOKENS,
        META,
    ]
}
