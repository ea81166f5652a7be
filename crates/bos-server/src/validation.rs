//! Request validation shared across handlers.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

use bos_store::types::{SessionTemplate, OptionsSnapshot};

use crate::error::ApiError;

/// Longest accepted resource name.
pub const MAX_NAME_LENGTH: usize = 127;

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9._-]+$").expect("valid name pattern"))
}

/// Validate a session, template or component name.
///
/// # Errors
///
/// Returns a 400-mapped error for empty, overlong, or ill-charactered
/// names.
pub fn validate_name(kind: &str, name: &str) -> Result<(), ApiError> {
    if name.is_empty() {
        return Err(ApiError::BadRequest(format!("{kind} name must not be empty")));
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(ApiError::BadRequest(format!(
            "{kind} name must be at most {MAX_NAME_LENGTH} characters"
        )));
    }
    if !name_pattern().is_match(name) {
        return Err(ApiError::BadRequest(format!(
            "{kind} name may only contain letters, digits, '.', '_' and '-'"
        )));
    }
    Ok(())
}

/// Structural validation of a session template: boot sets exist, each
/// names hardware, and boot-set names agree with their map keys (an
/// empty name is filled in from the key).
///
/// # Errors
///
/// Returns a 400-mapped error describing the first violation.
pub fn validate_template(template: &mut SessionTemplate) -> Result<(), ApiError> {
    validate_name("session template", &template.name)?;
    if template.boot_sets.is_empty() {
        return Err(ApiError::BadRequest(format!(
            "session template '{}' must have one or more boot sets",
            template.name
        )));
    }
    for (key, boot_set) in &mut template.boot_sets {
        if boot_set.name.is_empty() {
            boot_set.name.clone_from(key);
        } else if boot_set.name != *key {
            return Err(ApiError::BadRequest(format!(
                "boot set name '{}' does not match its key '{key}'",
                boot_set.name
            )));
        }
        if !boot_set.has_hardware_specifier() {
            return Err(ApiError::BadRequest(format!(
                "boot set '{key}' must specify hardware via node_list, node_groups or \
                 node_roles_groups"
            )));
        }
        if boot_set.path.is_empty() {
            return Err(ApiError::BadRequest(format!(
                "boot set '{key}' must reference an image manifest path"
            )));
        }
    }
    Ok(())
}

/// Deep validation of a template's boot artifacts: the manifest and the
/// image it names must resolve. Used by the validate endpoint and, when
/// `ims_images_must_exist` is set, by session creation.
///
/// # Errors
///
/// Returns a 400-mapped error naming the unresolvable artifact.
pub async fn validate_template_artifacts<S: bos_store::Store>(
    state: &crate::state::AppState<S>,
    template: &SessionTemplate,
    opts: &OptionsSnapshot,
) -> Result<(), ApiError> {
    let timeout = Duration::from_secs(opts.ims_read_timeout);
    for (name, boot_set) in &template.boot_sets {
        state
            .objects
            .head(&boot_set.path, &boot_set.etag, timeout)
            .await
            .map_err(|e| {
                ApiError::BadRequest(format!(
                    "boot set '{name}' could not locate its image manifest: {e}"
                ))
            })?;

        if opts.ims_images_must_exist {
            if let Some(image_id) = bos_clients::ims::image_id_from_manifest_path(&boot_set.path) {
                let image = state.ims.get_image(image_id, timeout).await?;
                if image.is_none() {
                    return Err(ApiError::BadRequest(format!(
                        "boot set '{name}' references image {image_id}, which is not known \
                         to the image service"
                    )));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bos_store::types::BootSet;
    use std::collections::BTreeMap;

    #[test]
    fn name_rules() {
        assert!(validate_name("session", "nightly-compute_v1.2").is_ok());
        assert!(validate_name("session", "").is_err());
        assert!(validate_name("session", &"x".repeat(128)).is_err());
        assert!(validate_name("session", "has space").is_err());
        assert!(validate_name("session", "has/slash").is_err());
    }

    fn template(boot_set: BootSet) -> SessionTemplate {
        let mut boot_sets = BTreeMap::new();
        boot_sets.insert("compute".to_string(), boot_set);
        SessionTemplate {
            name: "t1".into(),
            boot_sets,
            ..SessionTemplate::default()
        }
    }

    #[test]
    fn boot_set_must_name_hardware() {
        let mut t = template(BootSet {
            path: "s3://boot-images/img/manifest.json".into(),
            ..BootSet::default()
        });
        assert!(validate_template(&mut t).is_err());

        let mut t = template(BootSet {
            node_list: vec!["x1".into()],
            path: "s3://boot-images/img/manifest.json".into(),
            ..BootSet::default()
        });
        assert!(validate_template(&mut t).is_ok());
    }

    #[test]
    fn boot_set_name_is_filled_from_key() {
        let mut t = template(BootSet {
            node_list: vec!["x1".into()],
            path: "s3://boot-images/img/manifest.json".into(),
            ..BootSet::default()
        });
        validate_template(&mut t).unwrap();
        assert_eq!(t.boot_sets["compute"].name, "compute");
    }

    #[test]
    fn mismatched_boot_set_name_is_rejected() {
        let mut t = template(BootSet {
            name: "storage".into(),
            node_list: vec!["x1".into()],
            path: "s3://boot-images/img/manifest.json".into(),
            ..BootSet::default()
        });
        assert!(validate_template(&mut t).is_err());
    }

    #[test]
    fn templates_need_boot_sets() {
        let mut t = SessionTemplate {
            name: "t1".into(),
            ..SessionTemplate::default()
        };
        assert!(validate_template(&mut t).is_err());
    }
}
