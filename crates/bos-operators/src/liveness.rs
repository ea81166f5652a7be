//! Liveness probe file.
//!
//! The driver touches a timestamp file once per iteration; an external
//! probe treats a stale file as a dead daemon. With no path configured
//! the touch is a no-op (local development, tests).

use std::path::PathBuf;

use bos_core::current_timestamp;

/// Touches a timestamp file to signal liveness.
#[derive(Debug, Clone, Default)]
pub struct Liveness {
    path: Option<PathBuf>,
}

impl Liveness {
    /// A probe writing to the given path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// A disabled probe.
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Write the current timestamp. Failures are logged, never fatal;
    /// missing a heartbeat is exactly what the probe is for.
    pub fn touch(&self) {
        let Some(path) = &self.path else { return };
        let stamp = current_timestamp().to_rfc3339();
        if let Err(e) = std::fs::write(path, stamp) {
            tracing::warn!(path = %path.display(), error = %e, "failed to touch liveness file");
        }
    }
}
