//! REST API server for the boot orchestration service.
//!
//! Exposes the v2 surface: CRUD over components, sessions, session
//! templates and options, the session-status aggregation endpoint, and
//! the apply-staged flow. The server validates input, computes nothing
//! reconciliation-related itself, and writes the initial records the
//! operators act on.
//!
//! Tenancy rides on the `Cray-Tenant-Name` header; an absent header is
//! the untenanted bucket. On startup the store is migrated: the format
//! version is checked and invalid records are repaired or deleted.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod handlers;
pub mod migration;
pub mod routes;
pub mod state;
pub mod tenant;
pub mod validation;

pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
pub use tenant::TenantHeader;
