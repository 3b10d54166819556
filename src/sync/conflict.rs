//! Conflict reporting and auto-merge
//!
//! The auto-merge only resolves non-overlapping edits: a field present on one
//! side, or equal on both, passes through. Any field with differing values on
//! both sides makes the merge fail and the conflict goes to manual resolution.

use serde_json::{Map, Value};

use super::types::{ConflictReport, ConflictResolution, MutationEnvelope, ResourceRecord};

/// Field-by-field union of two payloads of the same resource type
pub fn auto_merge(client: &Value, server: &Value) -> Option<Value> {
    let (Value::Object(client_map), Value::Object(server_map)) = (client, server) else {
        // Non-object payloads merge only when identical
        return (client == server).then(|| client.clone());
    };

    let mut merged: Map<String, Value> = server_map.clone();
    for (field, client_value) in client_map {
        match server_map.get(field) {
            Some(server_value) if server_value != client_value => return None,
            Some(_) => {}
            None => {
                merged.insert(field.clone(), client_value.clone());
            }
        }
    }

    Some(Value::Object(merged))
}

/// Fields present on both sides with different values
pub fn overlapping_fields(client: &Value, server: &Value) -> Vec<String> {
    match (client, server) {
        (Value::Object(a), Value::Object(b)) => a
            .iter()
            .filter(|(k, v)| b.get(k.as_str()).is_some_and(|other| other != *v))
            .map(|(k, _)| k.clone())
            .collect(),
        _ => Vec::new(),
    }
}

/// Build the report for a conflict between an envelope and a server record
pub fn report(
    envelope: &MutationEnvelope,
    server: &ResourceRecord,
    resolution: ConflictResolution,
    merged_payload: Option<Value>,
) -> ConflictReport {
    ConflictReport {
        item_id: envelope.id.clone(),
        resource_type: envelope.resource_type,
        client_payload: envelope.payload.clone(),
        server_payload: server.payload.clone(),
        resolution,
        merged_payload,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_disjoint_fields() {
        let server = json!({"a": 1, "b": 2});
        let client = json!({"a": 1, "c": 3});

        let merged = auto_merge(&client, &server).unwrap();
        assert_eq!(merged, json!({"a": 1, "b": 2, "c": 3}));
    }

    #[test]
    fn test_merge_fails_on_differing_field() {
        let server = json!({"title": "Quiz", "color": "red"});
        let client = json!({"title": "Quiz v2"});

        assert!(auto_merge(&client, &server).is_none());
        assert_eq!(overlapping_fields(&client, &server), vec!["title".to_string()]);
    }

    #[test]
    fn test_merge_nested_values_compared_whole() {
        let server = json!({"settings": {"timer": 30}});
        let client = json!({"settings": {"timer": 30, "shuffle": true}});

        assert!(auto_merge(&client, &server).is_none());
    }

    #[test]
    fn test_merge_non_objects() {
        assert_eq!(auto_merge(&json!(5), &json!(5)), Some(json!(5)));
        assert!(auto_merge(&json!([1]), &json!([2])).is_none());
        assert!(auto_merge(&json!({"a": 1}), &Value::Null).is_none());
    }

    #[test]
    fn test_identical_payloads() {
        let payload = json!({"title": "Quiz"});
        assert_eq!(auto_merge(&payload, &payload), Some(payload.clone()));
        assert!(overlapping_fields(&payload, &payload).is_empty());
    }
}
