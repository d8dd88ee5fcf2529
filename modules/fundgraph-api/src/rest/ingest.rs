use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use fundgraph_common::{Article, CanonicalRound, FundingMention, ResolvedRound, SourceDocument};
use fundgraph_pipeline::{group_mentions, EnrichmentJob, QueueError};

use super::{commit_error_response, error_response};
use crate::AppState;

/// An article as posted by a client. Articles without an id get a fresh one.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleInput {
    #[serde(default)]
    id: Option<String>,
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    feed_id: Option<String>,
    #[serde(default)]
    feed_title: Option<String>,
}

impl ArticleInput {
    fn into_article(self) -> Article {
        let id = self
            .id
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        Article {
            id,
            url: self.url,
            title: self.title,
            published_at: self.published_at,
            author: self.author,
            feed_id: self.feed_id,
            feed_title: self.feed_title,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SourceInput {
    #[serde(flatten)]
    article: ArticleInput,
    body: String,
}

#[derive(Debug, Deserialize)]
pub struct ExtractRequest {
    sources: Vec<SourceInput>,
    /// A round resolved earlier. When given, the fresh extraction is folded
    /// into it and the merged round is returned.
    #[serde(default)]
    existing: Option<CanonicalRound>,
}

#[derive(Debug, Deserialize)]
pub struct GroupRequest {
    mentions: Vec<FundingMention>,
}

#[derive(Debug, Deserialize)]
pub struct CommitRequest {
    round: ResolvedRound,
    #[serde(default)]
    sources: Vec<ArticleInput>,
}

pub async fn api_extract(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ExtractRequest>,
) -> impl IntoResponse {
    if body.sources.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "at least one source is required");
    }
    let sources: Vec<SourceDocument> = body
        .sources
        .into_iter()
        .map(|s| SourceDocument {
            article: s.article.into_article(),
            body: s.body,
        })
        .collect();

    if let Some(existing) = body.existing {
        return match state.merger.re_extract(&existing, &sources).await {
            Some(merged) => Json(serde_json::json!({ "round": merged, "updated": true })),
            None => Json(serde_json::json!({ "round": existing, "updated": false })),
        }
        .into_response();
    }

    match state.merger.extract(&sources).await {
        Some(extraction) => Json(extraction).into_response(),
        None => error_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            "no funding event found in the given sources",
        ),
    }
}

pub async fn api_group(Json(body): Json<GroupRequest>) -> impl IntoResponse {
    let rounds = group_mentions(&body.mentions);
    Json(serde_json::json!({ "rounds": rounds }))
}

pub async fn api_commit(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CommitRequest>,
) -> impl IntoResponse {
    let sources: Vec<Article> = body
        .sources
        .into_iter()
        .map(ArticleInput::into_article)
        .collect();

    let summary = match state.resolver.commit_round(&body.round, &sources).await {
        Ok(summary) => summary,
        Err(e) => {
            warn!(error = %e, company = %body.round.company_name, "Round commit failed");
            return commit_error_response(&e);
        }
    };

    // Enrichment runs behind the response and never affects it.
    let queued = match state.queue.submit(EnrichmentJob::for_round(&body.round)) {
        Ok(()) => true,
        Err(QueueError::QueueFull(job)) => {
            warn!(company = %job.company_name, "Enrichment queue full, skipping job");
            false
        }
        Err(QueueError::Closed(job)) => {
            warn!(company = %job.company_name, "Enrichment worker stopped, skipping job");
            false
        }
    };
    info!(round_key = %summary.round_key, queued, "Commit accepted");

    let mut value = serde_json::to_value(&summary).unwrap_or_default();
    if let Some(obj) = value.as_object_mut() {
        obj.insert("enrichmentQueued".to_string(), serde_json::json!(queued));
    }
    Json(value).into_response()
}
