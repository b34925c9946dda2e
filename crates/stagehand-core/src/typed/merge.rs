//! Payload / custom property merge.

use std::collections::BTreeMap;

use serde_json::Value;

use super::task::MergePolicy;

/// Merge a JSON object patch into `current`.
///
/// `null` patch fields are skipped. A non-object patch is ignored.
pub fn merge_payload(current: &mut Value, patch: &Value, policy: fn(&str) -> MergePolicy) {
    let Some(fields) = patch.as_object() else {
        return;
    };
    if !current.is_object() {
        *current = Value::Object(serde_json::Map::new());
    }
    let Some(target) = current.as_object_mut() else {
        return;
    };

    for (name, value) in fields {
        if value.is_null() {
            continue;
        }
        let present = target.get(name).is_some_and(|v| !v.is_null());
        match policy(name) {
            MergePolicy::OnlyIfAbsent if present => {}
            _ => {
                target.insert(name.clone(), value.clone());
            }
        }
    }
}

/// Key-by-key merge; the patch wins.
pub fn merge_properties(current: &mut BTreeMap<String, String>, patch: &BTreeMap<String, String>) {
    for (k, v) in patch {
        current.insert(k.clone(), v.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn owner_is_sticky(field: &str) -> MergePolicy {
        if field == "owner" {
            MergePolicy::OnlyIfAbsent
        } else {
            MergePolicy::Overwrite
        }
    }

    #[test]
    fn null_fields_do_not_erase() {
        let mut current = json!({ "label": "a", "count": 1 });
        merge_payload(
            &mut current,
            &json!({ "label": null, "count": 2 }),
            owner_is_sticky,
        );
        assert_eq!(current, json!({ "label": "a", "count": 2 }));
    }

    #[test]
    fn only_if_absent_keeps_first_value() {
        let mut current = json!({});
        merge_payload(&mut current, &json!({ "owner": "x" }), owner_is_sticky);
        merge_payload(&mut current, &json!({ "owner": "y" }), owner_is_sticky);
        assert_eq!(current["owner"], "x");
    }

    #[test]
    fn non_object_patch_is_ignored() {
        let mut current = json!({ "label": "a" });
        merge_payload(&mut current, &Value::Null, owner_is_sticky);
        assert_eq!(current, json!({ "label": "a" }));
    }

    #[test]
    fn properties_merge_patch_wins() {
        let mut current = BTreeMap::from([("a".to_string(), "1".to_string())]);
        let patch = BTreeMap::from([
            ("a".to_string(), "2".to_string()),
            ("b".to_string(), "3".to_string()),
        ]);
        merge_properties(&mut current, &patch);
        assert_eq!(current["a"], "2");
        assert_eq!(current["b"], "3");
    }
}
