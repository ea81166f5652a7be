//! Request handlers for the v2 surface.

pub mod components;
pub mod meta;
pub mod options;
pub mod sessions;
pub mod sessiontemplates;

use serde_json::Value;

/// Merge a JSON patch into a base document: objects merge recursively,
/// everything else is replaced by the patch value.
pub(crate) fn merge_json(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (key, patch_value) in patch_map {
                merge_json(
                    base_map.entry(key.clone()).or_insert(Value::Null),
                    patch_value,
                );
            }
        }
        (base_slot, patch_value) => {
            *base_slot = patch_value.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_objects_merge() {
        let mut base = json!({"a": {"b": 1, "c": 2}, "d": 3});
        merge_json(&mut base, &json!({"a": {"b": 9}, "e": 4}));
        assert_eq!(base, json!({"a": {"b": 9, "c": 2}, "d": 3, "e": 4}));
    }

    #[test]
    fn arrays_and_scalars_replace() {
        let mut base = json!({"list": [1, 2, 3], "s": "old"});
        merge_json(&mut base, &json!({"list": [9], "s": "new"}));
        assert_eq!(base, json!({"list": [9], "s": "new"}));
    }
}
