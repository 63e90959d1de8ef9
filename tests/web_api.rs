//! HTTP-level tests for the CI report API
//!
//! Each test builds the router over an in-memory store and drives it with
//! `oneshot`, checking status codes and the error `code` field.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use ci_compliance::ci_engine::CiEngine;
use ci_compliance::ciweb::build_router;
use ci_compliance::config_loader::CiConfig;
use ci_compliance::feedstock::StaticFeedstockDirectory;
use ci_compliance::report_store::MemoryStore;
use ci_compliance::ReportOrchestrator;

fn create_test_app() -> Router {
    let config = CiConfig::default();
    let feedstocks =
        StaticFeedstockDirectory::new(Default::default()).with_entry("FS-tallow-7", "sup-1");
    let orchestrator = ReportOrchestrator::new(
        Arc::new(MemoryStore::new()),
        CiEngine::from_config(&config).expect("engine"),
        Arc::new(feedstocks),
        config.validity_days,
    );
    build_router(Arc::new(orchestrator))
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    actor: Option<(&str, &str)>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some((id, role)) = actor {
        builder = builder.header("x-actor-id", id).header("x-actor-role", role);
    }
    let request = match body {
        Some(b) => builder
            .header("content-type", "application/json")
            .body(Body::from(b.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

fn new_report_body() -> Value {
    json!({
        "feedstock_id": "FS-tallow-7",
        "reporting_period_start": "2025-01-01",
        "reporting_period_end": "2025-12-31",
        "reference_year": 2025,
        "methodology": "RED_II",
        "data_quality": "measured",
        "emissions": {
            "cultivation": 10.0, "processing": 5.0, "transport": 3.0,
            "electricity": 2.0, "steam": 0.0, "upstream_inputs": 8.0,
            "land_use_change": 0.0, "distribution": 1.0, "end_of_life": 0.0
        }
    })
}

const SUPPLIER: Option<(&str, &str)> = Some(("sup-1", "supplier"));
const AUDITOR: Option<(&str, &str)> = Some(("aud-1", "auditor"));
const BUYER: Option<(&str, &str)> = Some(("buy-1", "buyer"));

#[tokio::test]
async fn test_health() {
    let app = create_test_app();
    let (status, body) = send(&app, "GET", "/healthz", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_missing_actor_is_unauthenticated() {
    let app = create_test_app();
    let (status, body) = send(&app, "POST", "/api/reports", None, Some(new_report_body())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "unauthenticated");

    let (status, _) = send(
        &app,
        "GET",
        "/api/reports",
        Some(("cron", "system")),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_report_lifecycle_over_http() {
    let app = create_test_app();

    let (status, created) = send(&app, "POST", "/api/reports", SUPPLIER, Some(new_report_body())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "draft");
    assert_eq!(created["derived"]["total_ci_value"], 29.0);
    let id = created["report_id"].as_str().unwrap().to_string();
    let report_uri = format!("/api/reports/{id}");
    let transitions_uri = format!("/api/reports/{id}/transitions");

    let (status, _) = send(&app, "POST", &transitions_uri, SUPPLIER, Some(json!({"action": "submit"}))).await;
    assert_eq!(status, StatusCode::OK);

    // Edits after submission are a state error, whoever asks.
    let patch = json!({"emissions": {"cultivation": 1.0}});
    let (status, body) = send(&app, "PATCH", &report_uri, SUPPLIER, Some(patch)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "invalid_state");

    let (status, _) = send(&app, "POST", &transitions_uri, AUDITOR, Some(json!({"action": "claim"}))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, "GET", &report_uri, BUYER, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "forbidden");

    let decide = json!({"action": "decide", "outcome": "verified"});
    let (status, verified) = send(&app, "POST", &transitions_uri, AUDITOR, Some(decide)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(verified["status"], "verified");
    assert_eq!(verified["verified_by"], "aud-1");

    let (status, view) = send(&app, "GET", &report_uri, BUYER, None).await;
    assert_eq!(status, StatusCode::OK);
    let actions: Vec<&str> = view["history"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["action"].as_str().unwrap())
        .collect();
    assert_eq!(
        actions,
        vec!["created", "submitted", "update_denied", "assigned", "verified"]
    );

    let (status, body) = send(&app, "DELETE", &report_uri, SUPPLIER, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "invalid_state");
}

#[tokio::test]
async fn test_validation_errors_are_unprocessable() {
    let app = create_test_app();
    let mut body = new_report_body();
    body["emissions"]["transport"] = json!(-3.0);
    let (status, err) = send(&app, "POST", "/api/reports", SUPPLIER, Some(body)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(err["code"], "validation_error");

    let mut body = new_report_body();
    body["methodology"] = json!("LCFS");
    let (status, _) = send(&app, "POST", "/api/reports", SUPPLIER, Some(body)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_unknown_report_and_feedstock_are_not_found() {
    let app = create_test_app();
    let (status, body) = send(&app, "GET", "/api/reports/CI-2026-ffffffff", SUPPLIER, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");

    let mut req = new_report_body();
    req["feedstock_id"] = json!("FS-unknown");
    let (status, _) = send(&app, "POST", "/api/reports", SUPPLIER, Some(req)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_calculate_endpoint() {
    let app = create_test_app();
    let req = json!({
        "methodology": "ISO_14064",
        "data_quality": "estimated",
        "emissions": {"cultivation": 10.0}
    });
    let (status, calc) = send(&app, "POST", "/api/ci/calculate", None, Some(req)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(calc["ci_score"]["unit"], "kgCO2e/MWh");
    assert_eq!(calc["ci_score"]["methodology"], "ISO_14064");
    let score = calc["ci_score"]["value"].as_f64().unwrap();
    assert!((score - 36.0).abs() < 1e-9);
    assert!((calc["uncertainty_range_high"].as_f64().unwrap() - 43.2).abs() < 1e-9);
}

#[tokio::test]
async fn test_list_respects_visibility_and_status_filter() {
    let app = create_test_app();
    send(&app, "POST", "/api/reports", SUPPLIER, Some(new_report_body())).await;

    let (status, mine) = send(&app, "GET", "/api/reports?status=draft", SUPPLIER, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(mine.as_array().unwrap().len(), 1);

    let (_, theirs) = send(&app, "GET", "/api/reports", BUYER, None).await;
    assert!(theirs.as_array().unwrap().is_empty());

    let (status, _) = send(&app, "GET", "/api/reports?status=archived", SUPPLIER, None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}
