use std::sync::Arc;

use anyhow::Result;
use axum::{
    routing::{delete, get, post},
    Router,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

use ai_client::Claude;
use fundgraph_common::Config;
use fundgraph_graph::{migrate::migrate, GraphClient, GraphReader, GraphWriter};
use fundgraph_pipeline::{
    EnrichmentOrchestrator, EnrichmentQueue, ExtractionMerger, LlmEnricher, RoundResolver,
};

mod rest;

pub struct AppState {
    pub merger: ExtractionMerger,
    pub resolver: RoundResolver,
    pub reader: GraphReader,
    pub writer: Arc<GraphWriter>,
    pub orchestrator: Arc<EnrichmentOrchestrator>,
    pub queue: EnrichmentQueue,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("fundgraph=info".parse()?))
        .init();

    let config = Config::from_env();
    config.log_redacted();

    let client =
        GraphClient::connect(&config.neo4j_uri, &config.neo4j_user, &config.neo4j_password)
            .await?;
    migrate(&client).await?;

    let claude = Arc::new(
        Claude::new(&config.anthropic_api_key, &config.extraction_model)
            .with_timeout(config.pipeline.extraction_timeout),
    );
    let writer = Arc::new(GraphWriter::new(client.clone()));
    let orchestrator = Arc::new(EnrichmentOrchestrator::new(
        Arc::new(LlmEnricher::new(claude.clone())),
        writer.clone(),
        &config.pipeline,
    ));
    let (queue, _worker) =
        EnrichmentQueue::start(orchestrator.clone(), config.pipeline.enrichment_queue_capacity);

    let state = Arc::new(AppState {
        merger: ExtractionMerger::new(claude, &config.pipeline),
        resolver: RoundResolver::new(writer.clone(), &config.pipeline),
        reader: GraphReader::new(client),
        writer,
        orchestrator,
        queue,
    });

    let app = Router::new()
        // Health check
        .route("/", get(|| async { "ok" }))
        // Ingest
        .route("/api/extract", post(rest::ingest::api_extract))
        .route("/api/rounds/group", post(rest::ingest::api_group))
        .route("/api/rounds/commit", post(rest::ingest::api_commit))
        // Curation
        .route("/api/locks", post(rest::admin::api_set_lock))
        .route("/api/data", delete(rest::admin::api_clear))
        .route("/api/enrich/company/{name}", get(rest::enrich::api_enrich_company))
        // Reads
        .route("/api/stats/{view}", get(rest::api_stats))
        .route("/api/companies/{name}", get(rest::api_company))
        .route("/api/investors/{name}", get(rest::api_investor))
        .route("/api/rounds/{key}", get(rest::api_round))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        path = %request.uri().path(),
                    )
                }),
        );

    let addr = format!("{}:{}", config.api_host, config.api_port);
    info!("Fundgraph API starting on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
