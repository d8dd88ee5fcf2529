use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Deserialize;
use tracing::{info, warn};

use fundgraph_common::{EntityKind, FieldLock};

use super::{commit_error_response, error_response};
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRequest {
    entity_type: String,
    entity_name: String,
    field: String,
    locked: bool,
}

impl LockRequest {
    fn field_lock(&self) -> Result<FieldLock, String> {
        let kind: EntityKind = self.entity_type.parse().map_err(|e| format!("{e}"))?;
        FieldLock::parse(kind, &self.field).map_err(|e| format!("{e}"))
    }
}

pub async fn api_set_lock(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LockRequest>,
) -> impl IntoResponse {
    let lock = match body.field_lock() {
        Ok(lock) => lock,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, msg),
    };

    match state
        .resolver
        .set_field_lock(lock, &body.entity_name, body.locked)
        .await
    {
        Ok(true) => Json(serde_json::json!({
            "entityType": lock.kind(),
            "entityName": body.entity_name,
            "field": lock.property(),
            "locked": body.locked,
        }))
        .into_response(),
        Ok(false) => error_response(
            StatusCode::NOT_FOUND,
            format!("{} not found: {}", lock.kind(), body.entity_name),
        ),
        Err(e) => {
            warn!(error = %e, entity = %body.entity_name, "Lock toggle failed");
            commit_error_response(&e)
        }
    }
}

pub async fn api_clear(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.writer.clear_funding_data().await {
        Ok(stats) => {
            info!(?stats, "Bulk clear requested via API");
            Json(stats).into_response()
        }
        Err(e) => {
            warn!(error = %e, "Bulk clear failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
