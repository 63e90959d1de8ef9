//! HTTP adapter over [`ReportOrchestrator`].
//!
//! Callers are identified by the `x-actor-id` and `x-actor-role` headers,
//! which an upstream gateway sets after authenticating the session.

use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::str::FromStr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::audit::AuditLogEntry;
use crate::ci_engine::CiCalculation;
use crate::emissions::EmissionInputs;
use crate::errors::{CiError, CiResult};
use crate::lifecycle::StatusRequest;
use crate::orchestrator::{Reconciliation, ReportOrchestrator};
use crate::report::{CiReport, NewReport, ReportPatch, ReportStatus, ReportView};
use crate::roles::{Actor, Role};

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

type AppState = Arc<ReportOrchestrator>;

/// The authenticated caller, taken from request headers.
pub struct RequestActor(pub Actor);

impl<S> FromRequestParts<S> for RequestActor
where
    S: Send + Sync,
{
    type Rejection = CiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };
        let user_id = header(ACTOR_ID_HEADER)
            .ok_or_else(|| CiError::unauthenticated(format!("missing {ACTOR_ID_HEADER} header")))?;
        let role = header(ACTOR_ROLE_HEADER)
            .ok_or_else(|| CiError::unauthenticated(format!("missing {ACTOR_ROLE_HEADER} header")))?;
        let role = Role::from_str(role)
            .map_err(|_| CiError::unauthenticated(format!("unknown role '{role}'")))?;
        if role == Role::System {
            return Err(CiError::unauthenticated("system identity cannot be asserted over HTTP"));
        }
        Ok(RequestActor(Actor::new(user_id, role)))
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CalculateRequest {
    methodology: String,
    data_quality: String,
    #[serde(default)]
    emissions: EmissionInputs,
}

pub fn build_router(orchestrator: Arc<ReportOrchestrator>) -> Router {
    Router::new()
        .route("/api/reports", post(create_report).get(list_reports))
        .route(
            "/api/reports/{report_id}",
            get(read_report).patch(update_report).delete(delete_report),
        )
        .route("/api/reports/{report_id}/transitions", post(transition_report))
        .route("/api/reports/{report_id}/history", get(report_history))
        .route("/api/reports/{report_id}/reconcile", get(reconcile_report))
        .route("/api/ci/calculate", post(calculate))
        .route("/healthz", get(healthz))
        .layer(CorsLayer::permissive())
        .with_state(orchestrator)
}

async fn create_report(
    State(orc): State<AppState>,
    RequestActor(actor): RequestActor,
    Json(req): Json<NewReport>,
) -> CiResult<(StatusCode, Json<CiReport>)> {
    let report = orc.create_report(&actor, req)?;
    Ok((StatusCode::CREATED, Json(report)))
}

async fn list_reports(
    State(orc): State<AppState>,
    RequestActor(actor): RequestActor,
    Query(query): Query<ListQuery>,
) -> CiResult<Json<Vec<CiReport>>> {
    let status = query
        .status
        .as_deref()
        .map(|s| {
            ReportStatus::from_str(s)
                .map_err(|_| CiError::validation("status", format!("unknown status '{s}'")))
        })
        .transpose()?;
    Ok(Json(orc.list_reports(&actor, status)?))
}

async fn read_report(
    State(orc): State<AppState>,
    RequestActor(actor): RequestActor,
    Path(report_id): Path<String>,
) -> CiResult<Json<ReportView>> {
    Ok(Json(orc.read_report(&actor, &report_id)?))
}

async fn update_report(
    State(orc): State<AppState>,
    RequestActor(actor): RequestActor,
    Path(report_id): Path<String>,
    Json(patch): Json<ReportPatch>,
) -> CiResult<Json<CiReport>> {
    Ok(Json(orc.update_report(&actor, &report_id, patch)?))
}

async fn delete_report(
    State(orc): State<AppState>,
    RequestActor(actor): RequestActor,
    Path(report_id): Path<String>,
) -> CiResult<StatusCode> {
    orc.delete_report(&actor, &report_id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn transition_report(
    State(orc): State<AppState>,
    RequestActor(actor): RequestActor,
    Path(report_id): Path<String>,
    Json(request): Json<StatusRequest>,
) -> CiResult<Json<CiReport>> {
    Ok(Json(orc.transition(&actor, &report_id, request)?))
}

async fn report_history(
    State(orc): State<AppState>,
    RequestActor(actor): RequestActor,
    Path(report_id): Path<String>,
) -> CiResult<Json<Vec<AuditLogEntry>>> {
    Ok(Json(orc.history(&actor, &report_id)?))
}

async fn reconcile_report(
    State(orc): State<AppState>,
    RequestActor(actor): RequestActor,
    Path(report_id): Path<String>,
) -> CiResult<Json<Reconciliation>> {
    if actor.role != Role::Admin {
        return Err(CiError::forbidden("reconcile", "admin only"));
    }
    Ok(Json(orc.reconcile(&report_id)?))
}

async fn calculate(
    State(orc): State<AppState>,
    Json(req): Json<CalculateRequest>,
) -> CiResult<Json<CiCalculation>> {
    Ok(Json(orc.calculate(&req.emissions, &req.methodology, &req.data_quality)?))
}

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
