//! Runtime log-level control.
//!
//! The `logging_level` option can be changed while the daemon runs; the
//! driver applies it once per iteration through a reloadable filter.

use parking_lot::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter, Registry};

/// Handle for changing the log level at runtime.
pub struct LevelHandle {
    handle: reload::Handle<EnvFilter, Registry>,
    current: Mutex<String>,
}

impl LevelHandle {
    /// Apply a level if it differs from the one currently in effect.
    /// Unparsable levels are logged and ignored.
    pub fn apply(&self, level: &str) {
        let mut current = self.current.lock();
        if current.eq_ignore_ascii_case(level) {
            return;
        }
        match level.parse::<EnvFilter>() {
            Ok(filter) => {
                if let Err(e) = self.handle.reload(filter) {
                    tracing::warn!(error = %e, "failed to reload log filter");
                    return;
                }
                tracing::info!(from = %*current, to = level, "logging level changed");
                *current = level.to_string();
            }
            Err(e) => {
                tracing::warn!(level, error = %e, "invalid logging level, keeping current");
            }
        }
    }

}

/// Initialize tracing with a reloadable level filter.
///
/// The initial level comes from `RUST_LOG` when set, falling back to the
/// given default.
#[must_use]
pub fn init(default_level: &str) -> LevelHandle {
    let initial = std::env::var("RUST_LOG").unwrap_or_else(|_| default_level.to_string());
    let filter = EnvFilter::try_new(&initial).unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter, handle) = reload::Layer::new(filter);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    LevelHandle {
        handle,
        current: Mutex::new(initial),
    }
}
