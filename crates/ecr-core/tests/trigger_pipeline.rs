use std::io::Write;
use std::time::Duration;

use ecr_core::{
    ActionGraph, ActionKind, ClinicalData, EvaluationContext, JobStatus, PatientExecutionState,
    TriggerCatalog, TriggerMatcher,
};
use serde_json::json;
use tempfile::NamedTempFile;

fn catalog_file() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            "rules": [
                {{
                    "path": "Condition.code.coding.code",
                    "codeSet": "urn:oid:2.16.840.1.113762.1.4.1146.1123",
                    "codeSetVersion": "2022-01-01",
                    "codes": ["840539006", "U07.1"]
                }}
            ]
        }}"#
    )
    .unwrap();
    file
}

fn covid_bundle() -> serde_json::Value {
    json!({
        "resourceType": "Bundle",
        "type": "searchset",
        "entry": [
            {"resource": {
                "resourceType": "Condition",
                "id": "c-1",
                "code": {"coding": [
                    {"system": "http://hl7.org/fhir/sid/icd-10-cm", "code": "U07.1"}
                ]}
            }},
            {"resource": {
                "resourceType": "Condition",
                "id": "c-2",
                "code": {"coding": [{"system": "http://snomed.info/sct", "code": "38341003"}]}
            }}
        ]
    })
}

#[test]
fn test_trigger_match_makes_create_eligible() {
    let file = catalog_file();
    let catalog = TriggerCatalog::from_path(file.path()).unwrap();
    let matcher = TriggerMatcher::new(catalog);
    let graph = ActionGraph::eicr_default(Duration::from_secs(3600), &["Condition".into()]).unwrap();

    let mut state = PatientExecutionState::new("session-1", "patient-1", Some("enc-1".into()));
    let create = graph.by_kind(ActionKind::CreateEicr).unwrap();
    assert!(!create.is_eligible(&EvaluationContext::new(&state, &graph)));

    let mut data = ClinicalData::new();
    data.extend_from_bundle(&covid_bundle());

    state.match_trigger_status.start().unwrap();
    let matched = matcher.evaluate(&data, &mut state.match_trigger_status);
    state.match_trigger_status.complete().unwrap();

    assert!(matched);
    assert_eq!(state.match_trigger_status.job_status(), JobStatus::Completed);
    assert!(state.match_trigger_status.trigger_match_status);
    let bucket = state
        .match_trigger_status
        .matched_trigger_codes(
            "Condition.code.coding.code",
            "urn:oid:2.16.840.1.113762.1.4.1146.1123",
            "2022-01-01",
        )
        .unwrap();
    assert_eq!(bucket.matched_codes.len(), 1);
    assert!(bucket.matched_codes.contains("U07.1"));

    let ctx = EvaluationContext::new(&state, &graph);
    assert!(create.is_eligible(&ctx));
    let eligible: Vec<_> = ctx.eligible_actions().iter().map(|a| a.kind).collect();
    assert_eq!(eligible, vec![ActionKind::CreateEicr]);
}

#[test]
fn test_no_trigger_codes_stops_pipeline() {
    let file = catalog_file();
    let matcher = TriggerMatcher::new(TriggerCatalog::from_path(file.path()).unwrap());
    let graph = ActionGraph::eicr_default(Duration::from_secs(3600), &[]).unwrap();

    let mut state = PatientExecutionState::new("session-2", "patient-2", None);
    let mut data = ClinicalData::new();
    data.push(json!({"resourceType": "Condition", "code": {"coding": [{"code": "38341003"}]}}));

    state.match_trigger_status.start().unwrap();
    assert!(!matcher.evaluate(&data, &mut state.match_trigger_status));
    state.match_trigger_status.complete().unwrap();

    state.encounter_closed = true;
    let ctx = EvaluationContext::new(&state, &graph);
    assert!(ctx.eligible_actions().is_empty());
    assert!(state.is_settled());
}

#[test]
fn test_invalid_catalog_file_is_rejected() {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, r#"{{"rules": [{{"path": "Condition", "codeSet": "x", "codes": []}}]}}"#).unwrap();
    let err = TriggerCatalog::from_path(file.path()).unwrap_err();
    assert!(err.is_configuration_error());
}
