use std::sync::Arc;

use accreditation_score::error::AppError;
use accreditation_score::scoring::{
    scoring_router, AggregationOutcome, CombinedScoreRequest, DataRecord, FilterContext,
    ScoreWriteBack, SectionCode, VariableSet,
};
use axum::extract::{Path, Query};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Extension;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::infra::{AppScoringService, AppState};

#[derive(Debug, Serialize)]
pub(crate) struct SectionSaved {
    pub(crate) program_id: String,
    pub(crate) section: SectionCode,
    pub(crate) records: usize,
    /// Present when the section feeds the combined score.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) combined: Option<AggregationOutcome>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SaveOptions {
    #[serde(default)]
    pub(crate) force: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct SectionSnapshot {
    pub(crate) program_id: String,
    pub(crate) section: SectionCode,
    pub(crate) records: Vec<DataRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) score: Option<ScoreWriteBack>,
}

pub(crate) fn with_scoring_routes(service: Arc<AppScoringService>) -> axum::Router {
    scoring_router(service)
        .route("/health", get(healthcheck))
        .route("/ready", get(readiness_endpoint))
        .route("/metrics", get(metrics_endpoint))
        .route(
            "/api/v1/programs/:program_id/sections/:code",
            get(section_snapshot).put(save_section),
        )
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

/// Replace a section's records, then retry the combined score if the section is one of its inputs.
///
/// The retry is unforced unless `?force=true` is given, so a plain save returns the score
/// without writing it back and is subject to the in-flight and throttle guards.
pub(crate) async fn save_section(
    Extension(state): Extension<AppState>,
    Path((program_id, code)): Path<(String, String)>,
    Query(options): Query<SaveOptions>,
    Json(records): Json<Vec<DataRecord>>,
) -> Result<Json<SectionSaved>, AppError> {
    let section = SectionCode::new(code);
    let count = records.len();
    state.store.replace(&program_id, section.clone(), records);
    tracing::info!(%program_id, %section, records = count, "section saved");

    let feeds_combined = state
        .scoring
        .combined_config()
        .sections
        .iter()
        .any(|dependent| dependent.code == section);

    let combined = if feeds_combined {
        let request = CombinedScoreRequest {
            filter: FilterContext::program(program_id.clone()),
            force: options.force,
            variables: VariableSet::new(),
        };
        Some(state.scoring.combined_score(request).await?)
    } else {
        None
    };

    Ok(Json(SectionSaved {
        program_id,
        section,
        records: count,
        combined,
    }))
}

pub(crate) async fn section_snapshot(
    Extension(state): Extension<AppState>,
    Path((program_id, code)): Path<(String, String)>,
) -> Json<SectionSnapshot> {
    let section = SectionCode::new(code);
    Json(SectionSnapshot {
        records: state.store.records(&program_id, &section),
        score: state.store.score(&program_id, &section),
        program_id,
        section,
    })
}
