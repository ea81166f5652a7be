//! Reconciliation control loops for the boot orchestration service.
//!
//! Each operator is an independent periodic loop that selects components
//! (or sessions) matching a state predicate, acts on them through the
//! external-service clients in bounded batches, and records the outcome
//! with atomic per-record patches. Operators share no in-memory state;
//! the store is their only medium.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      operator driver                        │
//! │   options snapshot → liveness touch → pass → sleep/shutdown │
//! └─────────────────────────────────────────────────────────────┘
//!    │ discovery │ session_setup │ configuration │ power_on │ …
//!                  │                    │             │
//!                  ▼                    ▼             ▼
//!          ┌──────────┐        ┌─────────────┐  ┌──────────┐
//!          │  Store   │        │    CFS      │  │ PCS/HSM/ │
//!          │ (RocksDB)│        │             │  │ BSS/IMS  │
//!          └──────────┘        └─────────────┘  └──────────┘
//! ```
//!
//! Correctness rests on two rules: every patch is a pure function of the
//! record it read (the store serializes concurrent patches per key), and
//! per-component failures are recorded on the component and never abort
//! a pass.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod actual_state_cleanup;
pub mod configuration;
pub mod discovery;
pub mod env;
pub mod error;
pub mod framework;
pub mod liveness;
pub mod logging;
pub mod options;
pub mod power_off_forceful;
pub mod power_off_graceful;
pub mod power_on;
pub mod session_cleanup;
pub mod session_completion;
pub mod session_setup;
pub mod session_status;
pub mod status;

pub use env::{Clients, Env};
pub use error::{OperatorError, Result};
pub use framework::{chunk_ids, run_operator, split_retry_exhausted, Operator};
pub use session_status::{session_is_terminal, session_status, SessionStatusReport};
