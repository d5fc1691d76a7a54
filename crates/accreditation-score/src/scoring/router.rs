use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use serde::Deserialize;
use serde_json::json;

use super::aggregation::AggregationOutcome;
use super::domain::{DataRecord, FormulaDefinition, FormulaId, SectionCode, VariableSet};
use super::formula::resolve;
use super::repository::{FormulaCatalog, SectionStore};
use super::service::{CombinedScoreRequest, ScoringService, ScoringServiceError};

#[derive(Debug, Deserialize)]
pub(crate) struct AdHocResolveRequest {
    pub formula: FormulaDefinition,
    #[serde(default)]
    pub variables: VariableSet,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct CatalogResolveRequest {
    #[serde(default)]
    pub variables: VariableSet,
}

/// Scoring endpoints: per-section variables, formula resolution, combined score.
pub fn scoring_router<S, F>(service: Arc<ScoringService<S, F>>) -> Router
where
    S: SectionStore + 'static,
    F: FormulaCatalog + 'static,
{
    Router::new()
        .route(
            "/api/v1/scoring/sections/:code/variables",
            post(section_variables_handler::<S, F>),
        )
        .route(
            "/api/v1/scoring/formulas/resolve",
            post(resolve_handler::<S, F>),
        )
        .route(
            "/api/v1/scoring/formulas/:number/:sub_letter/resolve",
            post(catalog_resolve_handler::<S, F>),
        )
        .route("/api/v1/scoring/combined", post(combined_handler::<S, F>))
        .with_state(service)
}

pub(crate) async fn section_variables_handler<S, F>(
    State(service): State<Arc<ScoringService<S, F>>>,
    Path(code): Path<String>,
    axum::Json(records): axum::Json<Vec<DataRecord>>,
) -> Response
where
    S: SectionStore + 'static,
    F: FormulaCatalog + 'static,
{
    let view = service.section_variables(&SectionCode::new(code), &records);
    (StatusCode::OK, axum::Json(view)).into_response()
}

pub(crate) async fn resolve_handler<S, F>(
    State(_service): State<Arc<ScoringService<S, F>>>,
    axum::Json(request): axum::Json<AdHocResolveRequest>,
) -> Response
where
    S: SectionStore + 'static,
    F: FormulaCatalog + 'static,
{
    let result = resolve(&request.formula, &request.variables);
    (StatusCode::OK, axum::Json(result)).into_response()
}

pub(crate) async fn catalog_resolve_handler<S, F>(
    State(service): State<Arc<ScoringService<S, F>>>,
    Path((number, sub_letter)): Path<(String, String)>,
    axum::Json(request): axum::Json<CatalogResolveRequest>,
) -> Response
where
    S: SectionStore + 'static,
    F: FormulaCatalog + 'static,
{
    let id = FormulaId::new(number, sub_letter);
    match service.resolve_formula(&id, &request.variables).await {
        Ok(result) => (StatusCode::OK, axum::Json(result)).into_response(),
        Err(error) => upstream_error(error),
    }
}

pub(crate) async fn combined_handler<S, F>(
    State(service): State<Arc<ScoringService<S, F>>>,
    axum::Json(request): axum::Json<CombinedScoreRequest>,
) -> Response
where
    S: SectionStore + 'static,
    F: FormulaCatalog + 'static,
{
    match service.combined_score(request).await {
        Ok(outcome @ AggregationOutcome::Computed(_)) => {
            (StatusCode::OK, axum::Json(outcome)).into_response()
        }
        Ok(outcome @ AggregationOutcome::Skipped { .. }) => {
            (StatusCode::ACCEPTED, axum::Json(outcome)).into_response()
        }
        Err(error) => upstream_error(error),
    }
}

fn upstream_error(error: ScoringServiceError) -> Response {
    tracing::warn!(%error, "scoring request failed");
    let payload = json!({
        "error": error.to_string(),
    });
    (StatusCode::BAD_GATEWAY, axum::Json(payload)).into_response()
}
