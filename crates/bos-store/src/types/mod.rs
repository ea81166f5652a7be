//! Domain records persisted in the store.

pub mod component;
pub mod options;
pub mod session;
pub mod template;

pub use component::{
    ActualState, BssTokenRecord, Component, DesiredState, EventStats, LastAction, StagedState,
    StatusFields,
};
pub use options::{OptionsData, OptionsSnapshot};
pub use session::{Operation, Session, SessionState, SessionStatus};
pub use template::{Arch, BootSet, CfsParameters, SessionTemplate};

use serde::{Deserialize, Serialize};

/// The store format version record, kept under `meta/store_version`.
///
/// Startup refuses to run against a store whose version it does not know
/// how to read; see the server's migration pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreVersion {
    /// Format version number.
    pub version: u32,
}

/// The format version this build reads and writes.
pub const CURRENT_STORE_VERSION: u32 = 2;
