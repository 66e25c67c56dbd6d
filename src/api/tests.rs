use super::*;
use crate::models::classifier::stub::StubClassifier;
use crate::models::schema::fixtures::simple_schema;
use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request};
use serde_json::{json, Value};
use tower::ServiceExt;

const BOUNDARY: &str = "X-THREAT-DETECTOR-BOUNDARY";
const HEADER: &str = "protocol_type,service,flag,duration,src_bytes,dst_bytes,wrong_fragment,urgent,hot,num_failed_logins,count,logged_in";

struct Harness {
    router: Router,
    classifier: Arc<StubClassifier>,
    metrics: Arc<DetectionMetrics>,
}

fn harness(classifier: StubClassifier) -> Harness {
    let classifier = Arc::new(classifier);
    let engine = Arc::new(InferenceEngine::new(classifier.clone(), Arc::new(simple_schema())));
    let metrics = Arc::new(DetectionMetrics::new());
    let router = build_router(
        AppState::new(engine, metrics.clone()),
        &RouterOptions::default(),
    );
    Harness {
        router,
        classifier,
        metrics,
    }
}

fn sample_record() -> Value {
    json!({
        "protocol_type": "tcp", "service": "http", "flag": "SF",
        "duration": 0, "src_bytes": 200, "dst_bytes": 300,
        "wrong_fragment": 0, "urgent": 0, "hot": 0,
        "num_failed_logins": 0, "count": 1, "logged_in": 1
    })
}

fn json_request(body: &Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/api/detect")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn upload_request(field: &str, file_name: &str, content: &str) -> Request<Body> {
    let body = format!(
        "--{BOUNDARY}\r\n\
         Content-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\n\
         Content-Type: text/csv\r\n\r\n\
         {content}\r\n\
         --{BOUNDARY}--\r\n"
    );
    Request::builder()
        .method(Method::POST)
        .uri("/api/detect_csv")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn test_root_lists_features() {
    let h = harness(StubClassifier::fixed(0.1));
    let request = Request::builder().uri("/").body(Body::empty()).unwrap();

    let (status, body) = send(&h.router, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["model_loaded"], true);
    assert_eq!(body["features"].as_array().unwrap().len(), 12);
    assert_eq!(body["features"][0], "protocol_type");
}

#[tokio::test]
async fn test_detect_critical_record() {
    let h = harness(StubClassifier::fixed(0.92));

    let (status, body) = send(&h.router, json_request(&sample_record())).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"is_threat": 1, "threat_probability": 0.92, "risk_level": "Critical"})
    );
    assert_eq!(h.metrics.snapshot().single_requests, 1);
}

#[tokio::test]
async fn test_detect_missing_field_is_server_error() {
    let h = harness(StubClassifier::fixed(0.92));
    let mut record = sample_record();
    record.as_object_mut().unwrap().remove("service");

    let (status, body) = send(&h.router, json_request(&record)).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["detail"].as_str().unwrap().contains("service"));
    assert_eq!(h.classifier.calls(), 0);
}

#[tokio::test]
async fn test_detect_malformed_json() {
    let h = harness(StubClassifier::fixed(0.5));
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/detect")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"protocol_type\": "))
        .unwrap();

    let (status, body) = send(&h.router, request).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["detail"].is_string());
}

#[tokio::test]
async fn test_detect_classifier_failure() {
    let h = harness(StubClassifier::failing("session unavailable"));

    let (status, body) = send(&h.router, json_request(&sample_record())).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["detail"].as_str().unwrap().contains("session unavailable"));
    assert_eq!(h.metrics.snapshot().inference_failures, 1);
}

#[tokio::test]
async fn test_detect_csv_scores_rows() {
    let h = harness(StubClassifier::fixed(0.7));
    let csv = format!(
        "{HEADER}\ntcp,http,SF,0,200,300,0,0,0,0,1,1\nudp,private,S0,N/A,0,0,0,0,0,0,5,0"
    );

    let (status, body) = send(&h.router, upload_request("file", "capture.csv", &csv)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);
    assert_eq!(body["threats"], 2);
    assert_eq!(body["safe"], 0);
    assert_eq!(body["avg_probability"], 0.7);
    assert_eq!(body["results"][0]["row"], 1);
    assert_eq!(body["results"][0]["risk_level"], "High");
    assert_eq!(body["results"][0]["data"]["src_bytes"], 200);
    assert!(body["results"][0].get("warnings").is_none());
    assert_eq!(body["results"][1]["data"]["duration"], "N/A");
    assert_eq!(body["results"][1]["warnings"][0], "duration: 'N/A' coerced to 0");
    assert_eq!(h.classifier.calls(), 1);
    assert_eq!(h.metrics.snapshot().coerced_cells, 1);
}

#[tokio::test]
async fn test_detect_csv_missing_flag_column() {
    let h = harness(StubClassifier::fixed(0.7));
    let header = HEADER.replace(",flag", "");
    let csv = format!(
        "{header}\ntcp,http,0,200,300,0,0,0,0,1,1\ntcp,http,0,200,300,0,0,0,0,1,1\nudp,private,0,0,0,0,0,0,0,5,0"
    );

    let (status, body) = send(&h.router, upload_request("file", "capture.csv", &csv)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["missing_columns"], json!(["flag"]));
    assert!(body["detail"].as_str().unwrap().contains("flag"));
    assert!(body.get("results").is_none());
    assert_eq!(h.classifier.calls(), 0);
    assert_eq!(h.metrics.snapshot().validation_failures, 1);
}

#[tokio::test]
async fn test_detect_csv_rejects_non_csv_and_empty() {
    let h = harness(StubClassifier::fixed(0.7));

    let (status, body) = send(&h.router, upload_request("file", "capture.json", "{}")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("CSV"));

    let (status, body) = send(&h.router, upload_request("file", "capture.csv", "")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "Uploaded file is empty");

    let (status, _) = send(&h.router, upload_request("attachment", "capture.csv", "a,b")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(h.classifier.calls(), 0);
}

#[tokio::test]
async fn test_detect_csv_classifier_failure_is_server_error() {
    let h = harness(StubClassifier::failing("bad tensor"));
    let csv = format!("{HEADER}\ntcp,http,SF,0,200,300,0,0,0,0,1,1");

    let (status, body) = send(&h.router, upload_request("file", "capture.csv", &csv)).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["detail"].as_str().unwrap().starts_with("Error processing CSV"));
    assert!(body.get("results").is_none());
}

#[tokio::test]
async fn test_stats_endpoint() {
    let h = harness(StubClassifier::fixed(0.2));
    send(&h.router, json_request(&sample_record())).await;

    let request = Request::builder().uri("/api/stats").body(Body::empty()).unwrap();
    let (status, body) = send(&h.router, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["single_requests"], 1);
    assert_eq!(body["risk_levels"]["Low"], 1);
}
