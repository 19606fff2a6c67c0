//! HTTP routes driven through the router with `oneshot`

mod helpers;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::Value;
use tower::ServiceExt;

use fundsync_server::{api, config::Config, features::FeatureState};

use helpers::{market_list, TestRuntime};

const BOUNDARY: &str = "fundsync-test-boundary";

fn router(runtime: &TestRuntime) -> Router {
    let state = FeatureState {
        gateway: runtime.gateway.clone(),
        logs: runtime.stores.logs.clone(),
    };
    api::create_router(state, &Config::default())
}

fn multipart_body(fields: &[(&str, &str)], file: Option<(&str, &[u8])>) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, name, value
            )
            .as_bytes(),
        );
    }
    if let Some((file_name, contents)) = file {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\nContent-Type: text/csv\r\n\r\n",
                BOUNDARY, file_name
            )
            .as_bytes(),
        );
        body.extend_from_slice(contents);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn upload_request(fields: &[(&str, &str)], file: Option<(&str, &[u8])>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/v1/jobs/uploads")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(multipart_body(fields, file)))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

const MARKET_FIELDS: [(&str, &str); 4] = [
    ("uploadType", "MARKET_LIST"),
    ("source", "ops-portal"),
    ("processMode", "QUEUE"),
    ("fileType", "CSV"),
];

#[tokio::test]
async fn test_health() {
    let runtime = TestRuntime::memory().await;
    let response = router(&runtime).oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    runtime.stop().await;
}

#[tokio::test]
async fn test_upload_is_accepted_then_pollable() {
    let runtime = TestRuntime::memory().await;
    let app = router(&runtime);
    let csv = market_list(&[("INE001", "Alpha"), ("INE002", "Beta")]);

    let response = app
        .clone()
        .oneshot(upload_request(&MARKET_FIELDS, Some(("market.csv", csv.as_bytes()))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let body = json_body(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "PENDING");
    let job_id: uuid::Uuid = body["data"]["jobId"].as_str().unwrap().parse().unwrap();

    runtime.wait_for_final(job_id).await;

    let response = app
        .oneshot(get(&format!("/api/v1/job-logs/{}", job_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    let log = &body["data"];
    assert_eq!(log["status"], "COMPLETED");
    assert_eq!(log["jobType"], "MARKET_LIST");
    assert_eq!(log["logType"], "DATA_UPLOAD");
    assert_eq!(log["totalRecords"], 2);
    assert_eq!(log["addedRecords"], 2);
    assert_eq!(log["errorDetails"], serde_json::json!([]));

    runtime.stop().await;
}

#[tokio::test]
async fn test_upload_validation_errors() {
    let runtime = TestRuntime::memory().await;
    let app = router(&runtime);
    let csv = market_list(&[("INE001", "Alpha")]);

    let cases: Vec<(Vec<(&str, &str)>, Option<(&str, &[u8])>, &str)> = vec![
        (
            vec![("uploadType", "PORTFOLIO"), ("source", "x"), ("processMode", "QUEUE"), ("fileType", "CSV")],
            Some(("market.csv", csv.as_bytes())),
            "UNKNOWN_UPLOAD_TYPE",
        ),
        (
            vec![("uploadType", "MARKET_LIST"), ("source", "x"), ("processMode", "SYNC"), ("fileType", "CSV")],
            Some(("market.csv", csv.as_bytes())),
            "UNSUPPORTED_PROCESS_MODE",
        ),
        (
            vec![("uploadType", "MARKET_LIST"), ("source", "x"), ("processMode", "QUEUE"), ("fileType", "XLSX")],
            Some(("market.xlsx", csv.as_bytes())),
            "UNSUPPORTED_FILE_TYPE",
        ),
        (MARKET_FIELDS.to_vec(), Some(("market.csv", &b""[..])), "EMPTY_FILE"),
        (MARKET_FIELDS.to_vec(), Some(("market.csv", &b"isin,name\n"[..])), "NO_DATA_ROWS"),
        (MARKET_FIELDS.to_vec(), None, "MISSING_FIELD"),
    ];

    for (fields, file, code) in cases {
        let response = app.clone().oneshot(upload_request(&fields, file)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "expected {}", code);
        let body = json_body(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], code);
    }

    let (logs, _) = runtime.stores.logs.list(&Default::default(), 10, 0).await.unwrap();
    assert!(logs.is_empty());

    runtime.stop().await;
}

#[tokio::test]
async fn test_oversized_upload_is_rejected() {
    let runtime = TestRuntime::memory().await;
    let mut csv = String::from("isin,name\n");
    while csv.len() <= 1024 * 1024 {
        csv.push_str("INE001,Alpha\n");
    }

    let response = router(&runtime)
        .oneshot(upload_request(&MARKET_FIELDS, Some(("market.csv", csv.as_bytes()))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(json_body(response).await["error"]["code"], "FILE_TOO_LARGE");
    assert_eq!(std::fs::read_dir(runtime.spool.path()).unwrap().count(), 0);

    runtime.stop().await;
}

#[tokio::test]
async fn test_job_log_lookup_errors() {
    let runtime = TestRuntime::memory().await;
    let app = router(&runtime);

    let response = app.clone().oneshot(get("/api/v1/job-logs/not-a-uuid")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(get(&format!("/api/v1/job-logs/{}", uuid::Uuid::new_v4())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["error"]["code"], "NOT_FOUND");

    runtime.stop().await;
}

#[tokio::test]
async fn test_list_job_logs() {
    let runtime = TestRuntime::memory().await;
    let app = router(&runtime);

    for _ in 0..3 {
        let id = runtime
            .upload("MARKET_LIST", "market.csv", &market_list(&[("INE001", "Alpha")]))
            .await
            .unwrap();
        runtime.wait_for_final(id).await;
    }

    let response = app
        .clone()
        .oneshot(get("/api/v1/job-logs?page=1&limit=2&logType=DATA_UPLOAD&status=COMPLETED"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["data"]["items"].as_array().unwrap().len(), 2);
    assert_eq!(body["data"]["pagination"]["total"], 3);
    assert_eq!(body["data"]["pagination"]["pages"], 2);
    assert_eq!(body["data"]["pagination"]["has_next"], true);

    let response = app
        .clone()
        .oneshot(get("/api/v1/job-logs?page=9223372036854775807&limit=100"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert!(body["data"]["items"].as_array().unwrap().is_empty());
    assert_eq!(body["data"]["pagination"]["total"], 3);

    let response = app.oneshot(get("/api/v1/job-logs?status=RUNNING")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    runtime.stop().await;
}

#[tokio::test]
async fn test_fetch_submission_errors() {
    let runtime = TestRuntime::memory().await;
    let app = router(&runtime);

    let request = |body: &'static str| {
        Request::builder()
            .method("POST")
            .uri("/api/v1/jobs/fetches")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap()
    };

    let response = app.clone().oneshot(request(r#"{"jobType": "FETCH_AMCS"}"#)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"]["code"], "ADAPTER_NOT_CONFIGURED");

    let response = app.oneshot(request("{not json")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    runtime.stop().await;
}

#[tokio::test]
async fn test_upload_template() {
    let runtime = TestRuntime::memory().await;
    let app = router(&runtime);

    let response = app
        .clone()
        .oneshot(get("/api/v1/uploads/templates/market_list"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/csv"));
    assert!(response.headers()[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .contains("market_list_template.csv"));

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"isin,name,security_type,exchange,sector,face_value\n");

    let response = app
        .oneshot(get("/api/v1/uploads/templates/UNKNOWN"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    runtime.stop().await;
}
