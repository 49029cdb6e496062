use serde_json::{Map, Value};

/// Fields under any `metadata` map that the server owns.
pub const SERVER_METADATA_FIELDS: &[&str] = &[
    "managedFields",
    "resourceVersion",
    "uid",
    "creationTimestamp",
    "generation",
    "selfLink",
];

/// Strips server-populated fields from a document root so it can be
/// resubmitted as desired state.
///
/// Removes `status` from the root, `managedFields` at any depth, and the
/// [`SERVER_METADATA_FIELDS`] under every `metadata` map, including maps
/// nested in lists. Idempotent.
pub fn sanitize(root: &mut Map<String, Value>) {
    root.remove("status");
    visit_map(root);
}

fn visit(value: &mut Value) {
    match value {
        Value::Object(map) => visit_map(map),
        Value::Array(items) => items.iter_mut().for_each(visit),
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => {}
    }
}

fn visit_map(map: &mut Map<String, Value>) {
    map.remove("managedFields");

    if let Some(Value::Object(metadata)) = map.get_mut("metadata") {
        for field in SERVER_METADATA_FIELDS {
            metadata.remove(*field);
        }
    }

    map.values_mut().for_each(visit);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sanitized(value: Value) -> Value {
        let mut map = value.as_object().unwrap().clone();
        sanitize(&mut map);
        Value::Object(map)
    }

    #[test]
    fn test_strips_root_metadata_and_status() {
        let out = sanitized(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": "cm",
                "namespace": "default",
                "labels": {"app": "x"},
                "uid": "123",
                "resourceVersion": "9",
                "generation": 3,
                "creationTimestamp": "2024-01-01T00:00:00Z",
                "selfLink": "/api/v1/namespaces/default/configmaps/cm",
                "managedFields": [{"manager": "kubectl"}]
            },
            "status": {"phase": "Active"},
            "data": {"k": "v"}
        }));

        assert_eq!(
            out,
            json!({
                "apiVersion": "v1",
                "kind": "ConfigMap",
                "metadata": {"name": "cm", "namespace": "default", "labels": {"app": "x"}},
                "data": {"k": "v"}
            })
        );
    }

    #[test]
    fn test_strips_nested_metadata_in_templates_and_lists() {
        let out = sanitized(json!({
            "kind": "List",
            "items": [
                {"metadata": {"name": "a", "uid": "1", "managedFields": []}, "status": {}}
            ],
            "spec": {"template": {"metadata": {"generation": 1, "labels": {"x": "y"}}}}
        }));

        assert_eq!(out["items"][0]["metadata"], json!({"name": "a"}));
        // Only the root status is removed.
        assert_eq!(out["items"][0]["status"], json!({}));
        assert_eq!(
            out["spec"]["template"]["metadata"],
            json!({"labels": {"x": "y"}})
        );
    }

    #[test]
    fn test_managed_fields_removed_outside_metadata() {
        let out = sanitized(json!({"spec": {"deep": {"managedFields": 1, "keep": 2}}}));
        assert_eq!(out["spec"]["deep"], json!({"keep": 2}));
    }

    #[test]
    fn test_idempotent_and_tolerates_absent_fields() {
        let input = json!({"kind": "X", "metadata": "not-a-map", "data": [1, null]});
        let once = sanitized(input.clone());
        assert_eq!(once, input);
        assert_eq!(sanitized(once.clone()), once);
    }
}
