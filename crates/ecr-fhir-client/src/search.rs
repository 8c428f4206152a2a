use serde_json::Value;

/// Search request for one resource type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchCriteria {
    pub resource_type: String,
    pub params: Vec<(String, String)>,
}

impl SearchCriteria {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            params: Vec::new(),
        }
    }

    /// Searches `resource_type` scoped to one patient.
    pub fn for_patient(resource_type: impl Into<String>, patient_id: &str) -> Self {
        Self::new(resource_type).param("patient", patient_id)
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    pub fn count(self, page_size: u32) -> Self {
        self.param("_count", page_size.to_string())
    }
}

/// URL of the `next` link of a search bundle, if any.
pub fn next_link(bundle: &Value) -> Option<&str> {
    bundle
        .get("link")?
        .as_array()?
        .iter()
        .find(|l| l.get("relation").and_then(Value::as_str) == Some("next"))?
        .get("url")?
        .as_str()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_for_patient_params() {
        let criteria = SearchCriteria::for_patient("Condition", "p-1").count(50);
        assert_eq!(
            criteria.params,
            vec![
                ("patient".to_string(), "p-1".to_string()),
                ("_count".to_string(), "50".to_string())
            ]
        );
    }

    #[test]
    fn test_next_link() {
        let bundle = json!({
            "resourceType": "Bundle",
            "link": [
                {"relation": "self", "url": "http://ehr/fhir/Condition?patient=1"},
                {"relation": "next", "url": "http://ehr/fhir/Condition?patient=1&page=2"}
            ]
        });
        assert_eq!(
            next_link(&bundle),
            Some("http://ehr/fhir/Condition?patient=1&page=2")
        );
        assert_eq!(next_link(&json!({"resourceType": "Bundle"})), None);
    }
}
