pub mod admin;
pub mod enrich;
pub mod ingest;

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use fundgraph_common::normalize_company_key;
use fundgraph_graph::AggregateQuery;
use fundgraph_pipeline::CommitError;

use crate::AppState;

// --- Query structs ---

#[derive(Deserialize)]
pub struct StatsQuery {
    /// Months for `timeline`, row limit for `investors`.
    n: Option<u32>,
}

// --- Helpers ---

pub(crate) fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

/// InvalidInput is the caller's fault; a failed step is the store's.
pub(crate) fn commit_error_response(err: &CommitError) -> Response {
    match err {
        CommitError::InvalidInput(msg) => error_response(StatusCode::BAD_REQUEST, msg.as_str()),
        CommitError::Step { step, entity, .. } => (
            StatusCode::BAD_GATEWAY,
            Json(serde_json::json!({
                "error": err.to_string(),
                "step": step,
                "entity": entity,
            })),
        )
            .into_response(),
    }
}

fn found_or_404<T: Serialize>(result: anyhow::Result<Option<T>>, what: &str, key: &str) -> Response {
    match result {
        Ok(Some(v)) => Json(v).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, format!("{what} not found: {key}")),
        Err(e) => {
            warn!(error = %e, what, key, "Lookup failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

// --- Handlers ---

pub async fn api_stats(
    State(state): State<Arc<AppState>>,
    Path(view): Path<String>,
    Query(params): Query<StatsQuery>,
) -> impl IntoResponse {
    let Some(query) = AggregateQuery::from_view(&view, params.n) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            format!("unknown view '{view}', expected overview, stages, countries, timeline or investors"),
        );
    };
    match state.reader.aggregate(query).await {
        Ok(result) => Json(result).into_response(),
        Err(e) => {
            warn!(error = %e, view = %view, "Failed to load aggregate");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn api_company(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    let key = normalize_company_key(&name);
    found_or_404(state.reader.company(&key).await, "company", &name)
}

pub async fn api_investor(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    let key = normalize_company_key(&name);
    found_or_404(state.reader.investor(&key).await, "investor", &name)
}

pub async fn api_round(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> impl IntoResponse {
    found_or_404(state.reader.round(&key).await, "round", &key)
}
