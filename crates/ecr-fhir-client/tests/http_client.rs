//! HTTP tests for the retrying FHIR client against a wiremock server.

use std::sync::Arc;
use std::time::Duration;

use ecr_fhir_client::{
    ClientError, HttpTransport, Operation, REQUEST_ID_HEADER, RequestTracker, RetryOutcome,
    RetryPolicy, RetryableFhirClient, SearchCriteria, StaticToken,
};
use serde_json::json;
use wiremock::matchers::{header, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer, attempts: u32) -> RetryableFhirClient<HttpTransport> {
    let transport = HttpTransport::new(Duration::from_secs(5)).expect("transport");
    RetryableFhirClient::new(
        transport,
        &format!("{}/fhir", server.uri()),
        RetryPolicy::immediate(attempts),
        Arc::new(StaticToken(Some("access-123".into()))),
    )
    .expect("client")
    .with_tracker(RequestTracker::with_request_id("req-42"))
}

#[tokio::test]
async fn read_sends_bearer_and_request_id() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/fhir/Patient/p-1"))
        .and(header("Authorization", "Bearer access-123"))
        .and(header(REQUEST_ID_HEADER, "req-42"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"resourceType": "Patient", "id": "p-1"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let patient = client(&server, 3)
        .read("Patient", "p-1")
        .await
        .into_result(Operation::Read)
        .unwrap();
    assert_eq!(patient["id"], "p-1");
}

#[tokio::test]
async fn read_recovers_after_transient_failures() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/fhir/Encounter/e-1"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/fhir/Encounter/e-1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"resourceType": "Encounter", "id": "e-1"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let outcome = client(&server, 3).read("Encounter", "e-1").await;
    assert!(outcome.is_success());
}

#[tokio::test]
async fn read_exhausts_after_max_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/fhir/Patient/p-1"))
        .respond_with(ResponseTemplate::new(500))
        .expect(4)
        .mount(&server)
        .await;

    match client(&server, 4).read("Patient", "p-1").await {
        RetryOutcome::Exhausted { attempts, last_error } => {
            assert_eq!(attempts, 4);
            assert_eq!(last_error.status_code(), Some(500));
        }
        other => panic!("expected exhaustion, got {other:?}"),
    }
}

#[tokio::test]
async fn not_found_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/fhir/Patient/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "resourceType": "OperationOutcome",
            "issue": [{"severity": "error", "code": "not-found", "diagnostics": "Patient/missing not found"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server, 3)
        .read("Patient", "missing")
        .await
        .into_result(Operation::Read)
        .unwrap_err();
    match err {
        ClientError::Retryable(e) => {
            assert_eq!(e.status, 404);
            assert_eq!(e.operation, Operation::Read);
            assert_eq!(e.message, "Patient/missing not found");
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn search_all_follows_next_links() {
    let server = MockServer::start().await;
    let page_two = format!("{}/fhir/Condition?patient=p-1&page=2", server.uri());

    Mock::given(method("GET"))
        .and(path("/fhir/Condition"))
        .and(query_param("page", "2"))
        .and(header_exists(REQUEST_ID_HEADER))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "resourceType": "Bundle",
            "entry": [{"resource": {"resourceType": "Condition", "id": "c-2"}}]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/fhir/Condition"))
        .and(query_param("patient", "p-1"))
        .and(query_param("_count", "10"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "resourceType": "Bundle",
            "link": [{"relation": "next", "url": page_two}],
            "entry": [{"resource": {"resourceType": "Condition", "id": "c-1"}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let c = client(&server, 2);
    let pages = c
        .search_all(&SearchCriteria::for_patient("Condition", "p-1").count(10), 5)
        .await
        .unwrap();
    assert_eq!(pages.len(), 2);
    assert_eq!(pages[1]["entry"][0]["resource"]["id"], "c-2");
    assert_eq!(c.tracker().page(), 1);
}

#[tokio::test]
async fn malformed_body_is_a_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/fhir/Patient/p-1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = client(&server, 3).read("Patient", "p-1").await;
    assert!(matches!(outcome, RetryOutcome::Failed(ClientError::Decode { .. })));
}
