//! Core types and utilities for the boot orchestration service.
//!
//! This crate provides the foundational vocabulary used throughout the
//! workspace:
//!
//! - **Tenant**: the namespace every stored record is keyed under
//! - **Values**: the phase, status and action enums of the component
//!   state machine, and the boot-artifact identity type
//! - **Time**: RFC3339 timestamp helpers and option-style duration parsing
//!
//! # Example
//!
//! ```
//! use bos_core::{Tenant, BootArtifacts};
//!
//! let tenant = Tenant::from("vcluster-blue");
//! assert!(!tenant.is_untenanted());
//!
//! let artifacts = BootArtifacts::default();
//! assert!(artifacts.is_empty());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod tenant;
pub mod time;
pub mod values;

pub use tenant::{split_key, Tenant, TenantError};
pub use time::{current_timestamp, parse_age, parse_duration, DurationError};
pub use values::{derive_status, Action, BootArtifacts, Phase, Status};
