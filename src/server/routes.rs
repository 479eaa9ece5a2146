/// REST API routes.
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Serialize;

use super::middleware::{ActorHeader, ApiError};
use super::AppState;
use crate::integrity::VerificationResult;
use crate::state::models::{NewReport, Report};
use crate::worker::AnchorJob;

// ─── Health ──────────────────────────────────────────────

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// GET /health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub fn health_routes() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health))
}

// ─── Reports ─────────────────────────────────────────────

#[derive(Serialize)]
struct CreateReportResponse {
    report: Report,
    /// False when the anchoring queue rejected the job; backfill recovers it.
    anchor_queued: bool,
}

/// POST /api/reports: File a report and queue it for anchoring.
async fn create_report(
    ActorHeader(actor): ActorHeader,
    State(state): State<Arc<AppState>>,
    Json(input): Json<NewReport>,
) -> Result<(StatusCode, Json<CreateReportResponse>), ApiError> {
    let report = state.service.create_report(&actor, input).await?;

    let anchor_queued = state
        .queue
        .enqueue(AnchorJob {
            report_id: report.reference_code.clone(),
            actor,
        })
        .is_ok();

    Ok((
        StatusCode::CREATED,
        Json(CreateReportResponse {
            report,
            anchor_queued,
        }),
    ))
}

/// POST /api/reports/{id}/anchor: Anchor now (idempotent).
async fn anchor_report(
    ActorHeader(actor): ActorHeader,
    State(state): State<Arc<AppState>>,
    Path(report_id): Path<String>,
) -> Result<Response, ApiError> {
    let outcome = state.service.anchor_report(&actor, &report_id).await?;
    let status = if outcome.already_anchored {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(outcome)).into_response())
}

#[derive(Serialize)]
struct NotAnchoredResponse {
    report_id: String,
    status: &'static str,
}

/// GET /api/reports/{id}/anchor
async fn anchor_status(
    State(state): State<Arc<AppState>>,
    Path(report_id): Path<String>,
) -> Result<Response, ApiError> {
    match state.service.get_anchor_status(&report_id).await? {
        Some(view) => Ok(Json(view).into_response()),
        None => Ok((
            StatusCode::NOT_FOUND,
            Json(NotAnchoredResponse {
                report_id,
                status: "not_found",
            }),
        )
            .into_response()),
    }
}

#[derive(Serialize)]
struct VerificationResponse {
    anchored: bool,
    verified: bool,
    #[serde(flatten)]
    result: VerificationResult,
}

/// GET /api/reports/{id}/verify
///
/// A tampered report is a normal 200 response with `verified: false`.
async fn verify_report(
    State(state): State<Arc<AppState>>,
    Path(report_id): Path<String>,
) -> Result<Response, ApiError> {
    let result = state.service.verify_integrity(&report_id).await?;
    let status = match result {
        VerificationResult::ReportNotFound { .. } => StatusCode::NOT_FOUND,
        _ => StatusCode::OK,
    };
    Ok((
        status,
        Json(VerificationResponse {
            anchored: result.is_anchored(),
            verified: result.is_verified(),
            result,
        }),
    )
        .into_response())
}

/// DELETE /api/reports/{id}: Refused once the report is anchored.
async fn delete_report(
    ActorHeader(actor): ActorHeader,
    State(state): State<Arc<AppState>>,
    Path(report_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.service.delete_report(&actor, &report_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub fn report_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/reports", post(create_report))
        .route(
            "/api/reports/{id}/anchor",
            post(anchor_report).get(anchor_status),
        )
        .route("/api/reports/{id}/verify", get(verify_report))
        .route("/api/reports/{id}", delete(delete_report))
}

// ─── Search ──────────────────────────────────────────────

/// GET /api/search/{hash}: Fingerprint or transaction id.
async fn search(
    State(state): State<Arc<AppState>>,
    Path(hash): Path<String>,
) -> Result<Response, ApiError> {
    let result = state.service.search_by_hash(&hash).await?;
    let status = if result.found {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    };
    Ok((status, Json(result)).into_response())
}

pub fn search_routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/search/{hash}", get(search))
}
