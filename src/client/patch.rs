//! # JSON Merge Patches
//!
//! Two-way merge patch creation (RFC 7386) used by the status updater, plus the
//! matching apply used by the in-memory store.

use serde_json::{Map, Value};

/// Patch turning `original` into `modified`; `None` when they are equal
///
/// Objects are diffed key by key; removed keys become `null`. Any other value
/// (arrays included) is replaced wholesale.
#[must_use]
pub fn create_merge_patch(original: &Value, modified: &Value) -> Option<Value> {
    if original == modified {
        return None;
    }
    match (original, modified) {
        (Value::Object(orig), Value::Object(modi)) => {
            let mut patch = Map::new();
            for (key, new_value) in modi {
                match orig.get(key) {
                    Some(old_value) => {
                        if let Some(sub) = create_merge_patch(old_value, new_value) {
                            patch.insert(key.clone(), sub);
                        }
                    }
                    None => {
                        patch.insert(key.clone(), new_value.clone());
                    }
                }
            }
            for key in orig.keys() {
                if !modi.contains_key(key) {
                    patch.insert(key.clone(), Value::Null);
                }
            }
            if patch.is_empty() {
                None
            } else {
                Some(Value::Object(patch))
            }
        }
        _ => Some(modified.clone()),
    }
}

/// Apply a merge patch in place
pub fn apply_merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                let entry = target_map.entry(key.clone()).or_insert(Value::Null);
                apply_merge_patch(entry, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_equal_documents_produce_no_patch() {
        let doc = json!({"a": 1, "b": {"c": [1, 2]}});
        assert_eq!(create_merge_patch(&doc, &doc), None);
    }

    #[test]
    fn test_patch_contains_only_changes() {
        let original = json!({"replicas": 1, "readyReplicas": 1, "updateRevision": "r1"});
        let modified = json!({"replicas": 2, "readyReplicas": 1});
        let patch = create_merge_patch(&original, &modified).unwrap();
        assert_eq!(patch, json!({"replicas": 2, "updateRevision": null}));

        let mut applied = original.clone();
        apply_merge_patch(&mut applied, &patch);
        assert_eq!(applied, modified);
    }

    #[test]
    fn test_arrays_are_replaced_wholesale() {
        let original = json!({"pauseConditions": [{"reason": "a"}]});
        let modified = json!({"pauseConditions": [{"reason": "a"}, {"reason": "b"}]});
        let patch = create_merge_patch(&original, &modified).unwrap();
        assert_eq!(patch, modified);
    }
}
