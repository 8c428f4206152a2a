//! Clinical data snapshot used for trigger evaluation and report generation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// FHIR resources loaded for one patient session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClinicalData {
    pub resources: Vec<Value>,
}

impl ClinicalData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, resource: Value) {
        self.resources.push(resource);
    }

    /// Adds every `entry[].resource` of a search bundle.
    pub fn extend_from_bundle(&mut self, bundle: &Value) {
        if let Some(entries) = bundle.get("entry").and_then(Value::as_array) {
            self.resources
                .extend(entries.iter().filter_map(|e| e.get("resource")).cloned());
        }
    }

    pub fn resources_of_type<'a>(&'a self, resource_type: &'a str) -> impl Iterator<Item = &'a Value> {
        self.resources
            .iter()
            .filter(move |r| r.get("resourceType").and_then(Value::as_str) == Some(resource_type))
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

/// Collects the string values reachable from `resource` through a dotted
/// element path (without the leading resource type).
///
/// Arrays are flattened at every step. A segment that names a choice element
/// (`value`, `onset`) also matches its typed variants (`valueCodeableConcept`).
pub fn values_at_path<'a>(resource: &'a Value, segments: &[&str]) -> Vec<&'a str> {
    let mut out = Vec::new();
    for node in nodes_at_path(resource, segments) {
        match node {
            Value::String(s) => out.push(s.as_str()),
            Value::Array(items) => out.extend(items.iter().filter_map(Value::as_str)),
            _ => {}
        }
    }
    out
}

/// Collects the JSON nodes reachable through a dotted element path.
pub fn nodes_at_path<'a>(resource: &'a Value, segments: &[&str]) -> Vec<&'a Value> {
    let mut current = vec![resource];
    for segment in segments {
        let mut next = Vec::new();
        for node in current {
            collect_children(node, segment, &mut next);
        }
        current = next;
    }
    current
}

fn collect_children<'a>(node: &'a Value, segment: &str, out: &mut Vec<&'a Value>) {
    match node {
        Value::Array(items) => {
            for item in items {
                collect_children(item, segment, out);
            }
        }
        Value::Object(map) => {
            if let Some(child) = map.get(segment) {
                push_flattened(child, out);
                return;
            }
            for (key, child) in map {
                if is_choice_variant(key, segment) {
                    push_flattened(child, out);
                }
            }
        }
        _ => {}
    }
}

fn push_flattened<'a>(value: &'a Value, out: &mut Vec<&'a Value>) {
    match value {
        Value::Array(items) => out.extend(items.iter()),
        other => out.push(other),
    }
}

fn is_choice_variant(key: &str, segment: &str) -> bool {
    key.len() > segment.len()
        && key.starts_with(segment)
        && key[segment.len()..].starts_with(|c: char| c.is_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extend_from_bundle() {
        let bundle = json!({
            "resourceType": "Bundle",
            "entry": [
                {"resource": {"resourceType": "Condition", "id": "c1"}},
                {"resource": {"resourceType": "Observation", "id": "o1"}},
                {"fullUrl": "urn:uuid:no-resource"}
            ]
        });
        let mut data = ClinicalData::new();
        data.extend_from_bundle(&bundle);
        assert_eq!(data.len(), 2);
        assert_eq!(data.resources_of_type("Condition").count(), 1);
    }

    #[test]
    fn test_values_at_path_flattens_arrays() {
        let condition = json!({
            "resourceType": "Condition",
            "code": {"coding": [
                {"system": "http://snomed.info/sct", "code": "840539006"},
                {"system": "http://hl7.org/fhir/sid/icd-10-cm", "code": "U07.1"}
            ]}
        });
        let codes = values_at_path(&condition, &["code", "coding", "code"]);
        assert_eq!(codes, vec!["840539006", "U07.1"]);
    }

    #[test]
    fn test_values_at_path_resolves_choice_elements() {
        let observation = json!({
            "resourceType": "Observation",
            "valueCodeableConcept": {"coding": [{"code": "260373001"}]}
        });
        let codes = values_at_path(&observation, &["value", "coding", "code"]);
        assert_eq!(codes, vec!["260373001"]);
        assert!(values_at_path(&observation, &["val", "coding", "code"]).is_empty());
    }
}
