//! Service options.
//!
//! A single mutable record of tunable scalars, stored partially: only the
//! values an administrator has set are persisted, and reads merge them
//! over typed defaults. Operators take an [`OptionsSnapshot`] by value
//! once per iteration.

use serde::{Deserialize, Serialize};

macro_rules! options {
    ($( $(#[$doc:meta])* $name:ident : $ty:ty = $default:expr ),+ $(,)?) => {
        /// The partial, persisted options record. Unset fields fall back
        /// to the defaults in [`OptionsSnapshot`].
        #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
        pub struct OptionsData {
            $(
                $(#[$doc])*
                #[serde(default, skip_serializing_if = "Option::is_none")]
                pub $name: Option<$ty>,
            )+
        }

        /// A complete, merged view of the options record.
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        pub struct OptionsSnapshot {
            $(
                $(#[$doc])*
                pub $name: $ty,
            )+
        }

        impl Default for OptionsSnapshot {
            fn default() -> Self {
                Self {
                    $( $name: $default, )+
                }
            }
        }

        impl OptionsSnapshot {
            /// Merge stored overrides over the defaults.
            #[must_use]
            pub fn from_data(data: &OptionsData) -> Self {
                let mut snapshot = Self::default();
                $(
                    if let Some(value) = &data.$name {
                        snapshot.$name = value.clone();
                    }
                )+
                snapshot
            }
        }

        impl OptionsData {
            /// Overlay another partial record onto this one (PATCH
            /// semantics: set fields win, unset fields are kept).
            pub fn merge(&mut self, patch: &OptionsData) {
                $(
                    if let Some(value) = &patch.$name {
                        self.$name = Some(value.clone());
                    }
                )+
            }
        }
    };
}

options! {
    /// Read timeout for boot-script service calls, seconds.
    bss_read_timeout: u64 = 20,
    /// Read timeout for configuration-framework calls, seconds.
    cfs_read_timeout: u64 = 20,
    /// Read timeout for hardware-state-manager calls, seconds.
    hsm_read_timeout: u64 = 20,
    /// Read timeout for image-service calls, seconds.
    ims_read_timeout: u64 = 20,
    /// Read timeout for power-control calls, seconds.
    pcs_read_timeout: u64 = 20,
    /// Age before a completed session is deleted; `"0"` disables cleanup.
    cleanup_completed_session_ttl: String = "7d".to_string(),
    /// Clear staged state once applied.
    clear_stage: bool = false,
    /// Age after which an unreported actual state is no longer trusted.
    component_actual_state_ttl: String = "4h".to_string(),
    /// Retry limit for components without their own `retry_policy`.
    default_retry_policy: i64 = 3,
    /// Seconds between discovery passes.
    discovery_frequency: u64 = 300,
    /// Fail session setup outright when the image service errors.
    ims_errors_fatal: bool = false,
    /// Reject templates whose referenced image cannot be found.
    ims_images_must_exist: bool = false,
    /// Runtime logging level for the operator daemon.
    logging_level: String = "info".to_string(),
    /// Seconds a node may take to boot before the attempt is suspect.
    max_boot_wait_time: u64 = 1200,
    /// Largest component list handed to any external call; 0 = unbounded.
    max_component_batch_size: usize = 2800,
    /// Seconds after a graceful power-off before escalating to forceful.
    max_power_off_wait_time: u64 = 300,
    /// Grace window after a power-on call before a mismatch is a failure.
    max_power_on_wait_time: u64 = 120,
    /// Seconds between operator passes.
    polling_frequency: u64 = 15,
    /// Reject session selectors that parse as bare numeric node ids.
    reject_nids: bool = false,
    /// Require every session to carry an explicit limit.
    session_limit_required: bool = false,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let snapshot = OptionsSnapshot::default();
        assert_eq!(snapshot.polling_frequency, 15);
        assert_eq!(snapshot.discovery_frequency, 300);
        assert_eq!(snapshot.default_retry_policy, 3);
        assert_eq!(snapshot.max_component_batch_size, 2800);
        assert_eq!(snapshot.cleanup_completed_session_ttl, "7d");
        assert_eq!(snapshot.component_actual_state_ttl, "4h");
        assert!(!snapshot.reject_nids);
        assert!(!snapshot.session_limit_required);
    }

    #[test]
    fn overrides_win_over_defaults() {
        let data = OptionsData {
            polling_frequency: Some(60),
            reject_nids: Some(true),
            ..OptionsData::default()
        };
        let snapshot = OptionsSnapshot::from_data(&data);
        assert_eq!(snapshot.polling_frequency, 60);
        assert!(snapshot.reject_nids);
        // Untouched fields keep their defaults.
        assert_eq!(snapshot.max_power_off_wait_time, 300);
    }

    #[test]
    fn patch_merge_keeps_unset_fields() {
        let mut stored = OptionsData {
            polling_frequency: Some(60),
            ..OptionsData::default()
        };
        let patch = OptionsData {
            default_retry_policy: Some(5),
            ..OptionsData::default()
        };
        stored.merge(&patch);
        assert_eq!(stored.polling_frequency, Some(60));
        assert_eq!(stored.default_retry_policy, Some(5));
    }

    #[test]
    fn partial_record_wire_form_is_sparse() {
        let data = OptionsData {
            logging_level: Some("debug".into()),
            ..OptionsData::default()
        };
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json.as_object().unwrap().len(), 1);
        assert_eq!(json["logging_level"], "debug");
    }
}
