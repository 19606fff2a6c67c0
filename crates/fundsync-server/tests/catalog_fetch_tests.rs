//! External catalog fetches through the HTTP adapter

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use fundsync_server::ingest::records::EntityKind;
use fundsync_server::ingest::sources::http::{build_client, HttpCatalogAdapter};
use fundsync_server::ingest::{
    AdapterRegistry, FetchSubmission, FetchType, JobStatus, Stores, SubmissionError,
};
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use helpers::TestRuntime;

fn registry(server: &MockServer, fetch_type: FetchType, route: &str) -> AdapterRegistry {
    let client = build_client(Duration::from_secs(5)).unwrap();
    let adapter = HttpCatalogAdapter::new(client, format!("{}{}", server.uri(), route));
    AdapterRegistry::new().with(fetch_type, Arc::new(adapter))
}

fn fetch(job_type: &str) -> FetchSubmission {
    FetchSubmission {
        job_type: Some(job_type.to_string()),
        submitted_by: None,
    }
}

#[tokio::test]
async fn test_amc_catalog_is_reconciled_across_pages() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/amcs"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [
                {"id": "amc-1", "name": "Alpha Mutual Fund", "code": "ALPHA"},
                {"id": "amc-2", "name": "Beta Mutual Fund"}
            ],
            "hasMore": true
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/amcs"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{"id": "amc-3"}],
            "hasMore": false
        })))
        .mount(&server)
        .await;

    let runtime = TestRuntime::start(Stores::memory(), registry(&server, FetchType::FetchAmcs, "/amcs")).await;

    let id = runtime.gateway.submit_fetch(fetch("FETCH_AMCS")).await.unwrap();
    let log = runtime.wait_for_final(id).await;

    assert_eq!(log.status(), JobStatus::Completed);
    assert_eq!(log.summary.submitted_by, "system");
    assert_eq!(log.counters().total_records, 3);
    assert_eq!(log.counters().added_records, 2);
    assert_eq!(log.counters().failed_records, 1);
    assert_eq!(log.error_details[0].identifier, "AMC-3");
    assert_eq!(log.error_details[0].reason, "name is required");

    let amc = runtime
        .stores
        .entities
        .get(EntityKind::Amc, "AMC-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(amc.attributes["name"], "Alpha Mutual Fund");

    runtime.stop().await;
}

#[tokio::test]
async fn test_fetch_timeout_fails_job_without_counters() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/amcs"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"items": [], "hasMore": false}))
                .set_delay(Duration::from_secs(2)),
        )
        .expect(3)
        .mount(&server)
        .await;

    let runtime = TestRuntime::start(Stores::memory(), registry(&server, FetchType::FetchAmcs, "/amcs")).await;

    let id = runtime.gateway.submit_fetch(fetch("FETCH_AMCS")).await.unwrap();
    let log = runtime.wait_for_final(id).await;

    assert_eq!(log.status(), JobStatus::Failed);
    assert_eq!(log.counters().total_records, 0);
    assert_eq!(log.counters().processed_records, 0);
    assert_eq!(log.counters().added_records, 0);
    assert_eq!(log.error_details.len(), 1);
    assert_eq!(log.error_details[0].identifier, "FETCH_AMCS");
    assert!(log.error_details[0].reason.contains("failed after 3 attempt(s)"));
    assert!(log.error_details[0].reason.contains("timed out"));

    runtime.stop().await;
    server.verify().await;
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/schemes"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/schemes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": 101, "name": "Alpha Bluechip Fund"}
        ])))
        .mount(&server)
        .await;

    let runtime =
        TestRuntime::start(Stores::memory(), registry(&server, FetchType::FetchSchemes, "/schemes")).await;

    let id = runtime.gateway.submit_fetch(fetch("FETCH_SCHEMES")).await.unwrap();
    let log = runtime.wait_for_final(id).await;

    assert_eq!(log.status(), JobStatus::Completed);
    assert_eq!(log.counters().added_records, 1);

    runtime.stop().await;
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/products"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let runtime =
        TestRuntime::start(Stores::memory(), registry(&server, FetchType::FetchProducts, "/products")).await;

    let id = runtime.gateway.submit_fetch(fetch("FETCH_PRODUCTS")).await.unwrap();
    let log = runtime.wait_for_final(id).await;

    assert_eq!(log.status(), JobStatus::Failed);
    assert!(log.error_details[0].reason.contains("unexpected HTTP status 404"));

    runtime.stop().await;
    server.verify().await;
}

#[tokio::test]
async fn test_unconfigured_fetch_type_is_rejected() {
    let server = MockServer::start().await;
    let runtime = TestRuntime::start(Stores::memory(), registry(&server, FetchType::FetchAmcs, "/amcs")).await;

    let err = runtime
        .gateway
        .submit_fetch(fetch("FETCH_FUND_MANAGERS"))
        .await
        .unwrap_err();
    assert!(matches!(err, SubmissionError::AdapterNotConfigured(_)));

    let err = runtime.gateway.submit_fetch(fetch("FETCH_PLANETS")).await.unwrap_err();
    assert!(matches!(err, SubmissionError::UnknownFetchType(_)));

    runtime.stop().await;
}
