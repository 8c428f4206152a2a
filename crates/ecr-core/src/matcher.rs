//! Trigger code matching.
//!
//! A [`TriggerCatalog`] lists rules of the form "codes at `path` that belong to
//! code set `code_set` (version `code_set_version`)". The [`TriggerMatcher`]
//! walks clinical data for each rule and records hits on a
//! [`MatchTriggerStatus`]. Matching is total: malformed or missing elements
//! simply produce no hits.
//!
//! # Catalog format
//!
//! ```json
//! {
//!   "rules": [
//!     {
//!       "path": "Condition.code.coding.code",
//!       "codeSet": "http://hl7.org/fhir/us/ecr/ValueSet/dxtc",
//!       "codeSetVersion": "2.1.0",
//!       "codes": ["840539006", "http://snomed.info/sct|840539006"]
//!     }
//!   ]
//! }
//! ```
//!
//! Rule codes may be bare codes or `system|code` pairs. When the path ends in
//! a `code` element, both forms are checked against each coding.

use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clinical::{ClinicalData, nodes_at_path, values_at_path};
use crate::error::{CoreError, Result};
use crate::trigger::MatchTriggerStatus;

/// One trigger rule: a code set applied at a resource element path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerRule {
    /// Dotted path starting with the resource type, e.g. `Condition.code.coding.code`.
    pub path: String,
    pub code_set: String,
    #[serde(default)]
    pub code_set_version: String,
    pub codes: HashSet<String>,
}

impl TriggerRule {
    pub fn resource_type(&self) -> &str {
        self.path.split('.').next().unwrap_or_default()
    }

    fn element_segments(&self) -> Vec<&str> {
        self.path.split('.').skip(1).collect()
    }
}

/// Collection of trigger rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerCatalog {
    #[serde(default)]
    pub rules: Vec<TriggerRule>,
}

impl TriggerCatalog {
    pub fn new(rules: Vec<TriggerRule>) -> Result<Self> {
        let catalog = Self { rules };
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let catalog: TriggerCatalog = serde_json::from_str(json)?;
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    fn validate(&self) -> Result<()> {
        for rule in &self.rules {
            if rule.path.split('.').count() < 2 {
                return Err(CoreError::InvalidCatalog(format!(
                    "path '{}' must name a resource type and an element",
                    rule.path
                )));
            }
            if rule.code_set.is_empty() {
                return Err(CoreError::InvalidCatalog(format!(
                    "rule at '{}' has no code set",
                    rule.path
                )));
            }
        }
        Ok(())
    }

    /// Resource types referenced by at least one rule, in first-seen order.
    pub fn resource_types(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for rule in &self.rules {
            let rt = rule.resource_type();
            if !seen.contains(&rt) {
                seen.push(rt);
            }
        }
        seen
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Evaluates a trigger catalog against clinical data.
#[derive(Debug, Clone, Default)]
pub struct TriggerMatcher {
    catalog: TriggerCatalog,
}

impl TriggerMatcher {
    pub fn new(catalog: TriggerCatalog) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &TriggerCatalog {
        &self.catalog
    }

    /// Records every rule hit on `status` and returns whether anything matched.
    pub fn evaluate(&self, data: &ClinicalData, status: &mut MatchTriggerStatus) -> bool {
        for rule in &self.catalog.rules {
            let hits = self.rule_hits(rule, data);
            if hits.is_empty() {
                continue;
            }
            tracing::debug!(
                path = %rule.path,
                code_set = %rule.code_set,
                count = hits.len(),
                "Trigger codes matched"
            );
            status.add_matched_codes(hits, &rule.code_set, &rule.path, &rule.code_set_version);
        }
        status.trigger_match_status
    }

    fn rule_hits(&self, rule: &TriggerRule, data: &ClinicalData) -> BTreeSet<String> {
        let segments = rule.element_segments();
        let mut hits = BTreeSet::new();
        for resource in data.resources_of_type(rule.resource_type()) {
            for candidate in candidate_codes(resource, &segments) {
                if rule.codes.contains(&candidate) {
                    hits.insert(candidate);
                }
            }
        }
        hits
    }
}

fn candidate_codes(resource: &Value, segments: &[&str]) -> Vec<String> {
    let Some((last, parents)) = segments.split_last() else {
        return Vec::new();
    };
    if *last != "code" {
        return values_at_path(resource, segments)
            .into_iter()
            .map(str::to_string)
            .collect();
    }

    let mut out = Vec::new();
    for coding in nodes_at_path(resource, parents) {
        let Some(code) = coding.get("code").and_then(Value::as_str) else {
            continue;
        };
        out.push(code.to_string());
        if let Some(system) = coding.get("system").and_then(Value::as_str) {
            out.push(format!("{system}|{code}"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn covid_catalog() -> TriggerCatalog {
        TriggerCatalog::from_json_str(
            r#"{
                "rules": [
                    {
                        "path": "Condition.code.coding.code",
                        "codeSet": "urn:oid:2.16.840.1.113762.1.4.1146.1123",
                        "codeSetVersion": "1",
                        "codes": ["840539006"]
                    },
                    {
                        "path": "Observation.value.coding.code",
                        "codeSet": "urn:oid:2.16.840.1.113762.1.4.1146.1124",
                        "codeSetVersion": "1",
                        "codes": ["http://snomed.info/sct|260373001"]
                    }
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_condition_code_matches() {
        let mut data = ClinicalData::new();
        data.push(json!({
            "resourceType": "Condition",
            "code": {"coding": [{"system": "http://snomed.info/sct", "code": "840539006"}]}
        }));

        let matcher = TriggerMatcher::new(covid_catalog());
        let mut status = MatchTriggerStatus::new("match-trigger");
        assert!(matcher.evaluate(&data, &mut status));
        assert_eq!(status.matched_codes.len(), 1);
        assert_eq!(status.matched_codes[0].matched_path, "Condition.code.coding.code");
    }

    #[test]
    fn test_system_qualified_codes_match() {
        let mut data = ClinicalData::new();
        data.push(json!({
            "resourceType": "Observation",
            "valueCodeableConcept": {"coding": [
                {"system": "http://snomed.info/sct", "code": "260373001"}
            ]}
        }));

        let matcher = TriggerMatcher::new(covid_catalog());
        let mut status = MatchTriggerStatus::new("match-trigger");
        assert!(matcher.evaluate(&data, &mut status));
        assert!(status.all_codes().contains("http://snomed.info/sct|260373001"));
    }

    #[test]
    fn test_no_match_leaves_status_empty() {
        let mut data = ClinicalData::new();
        data.push(json!({
            "resourceType": "Condition",
            "code": {"coding": [{"code": "38341003"}]}
        }));

        let matcher = TriggerMatcher::new(covid_catalog());
        let mut status = MatchTriggerStatus::new("match-trigger");
        assert!(!matcher.evaluate(&data, &mut status));
        assert!(status.matched_codes.is_empty());
    }

    #[test]
    fn test_evaluating_twice_is_idempotent() {
        let mut data = ClinicalData::new();
        data.push(json!({
            "resourceType": "Condition",
            "code": {"coding": [{"code": "840539006"}]}
        }));
        let matcher = TriggerMatcher::new(covid_catalog());
        let mut status = MatchTriggerStatus::new("match-trigger");
        matcher.evaluate(&data, &mut status);
        let first = status.clone();
        matcher.evaluate(&data, &mut status);
        assert_eq!(first, status);
    }

    #[test]
    fn test_catalog_rejects_bare_resource_path() {
        let err = TriggerCatalog::new(vec![TriggerRule {
            path: "Condition".into(),
            code_set: "vs".into(),
            code_set_version: String::new(),
            codes: HashSet::new(),
        }])
        .unwrap_err();
        assert!(matches!(err, CoreError::InvalidCatalog(_)));
    }

    #[test]
    fn test_catalog_resource_types() {
        let catalog = covid_catalog();
        assert_eq!(catalog.resource_types(), vec!["Condition", "Observation"]);
    }
}
