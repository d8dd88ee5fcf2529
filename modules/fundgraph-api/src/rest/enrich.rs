use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use tracing::info;

use fundgraph_pipeline::{enrich_stream, EnrichmentJob};

use crate::AppState;

#[derive(Deserialize)]
pub struct EnrichQuery {
    /// Comma-separated investor names.
    investors: Option<String>,
}

fn split_investors(list: Option<&str>) -> Vec<String> {
    list.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Stream enrichment progress as server-sent events, one JSON event per
/// frame. The stream closes after the `complete` or `error` event.
pub async fn api_enrich_company(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(params): Query<EnrichQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let job = EnrichmentJob::new(name.trim(), split_investors(params.investors.as_deref()));
    info!(company = %job.company_name, investors = job.investors.len(), "Enrichment stream opened");

    let events = enrich_stream(state.orchestrator.clone(), job).map(|event| {
        Ok(Event::default()
            .json_data(&event)
            .unwrap_or_else(|_| Event::default().data(r#"{"stage":"error"}"#)))
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}
