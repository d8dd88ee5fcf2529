//! Background enrichment of companies and investors after a round commit.
//!
//! The company goes first, then each distinct investor strictly one at a time
//! to stay inside the upstream rate limits. A failure is logged, reported and
//! skipped; it never stops the remaining entities and never reaches the commit
//! that triggered the job. Enriched values are written through the same
//! lock-respecting upserts as everything else.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::Stream;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use ai_client::strip_code_blocks;
use fundgraph_common::{
    normalize_company_key, CompanyPatch, EntityKind, InvestorPatch, PipelineSettings,
    ResolvedRound,
};

use crate::merger::dedupe_investors;
use crate::retry::RetryPolicy;
use crate::traits::{CompletionService, FundingStore};

// ---------------------------------------------------------------------------
// Progress events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStage {
    Started,
    Company,
    Investor,
    EntityFailed,
    Complete,
    Error,
}

impl ProgressStage {
    /// Nothing is emitted after a terminal event.
    pub fn is_terminal(self) -> bool {
        matches!(self, ProgressStage::Complete | ProgressStage::Error)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub stage: ProgressStage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ProgressEvent {
    pub fn new(stage: ProgressStage) -> Self {
        Self {
            stage,
            message: None,
            entity: None,
            data: None,
        }
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = Some(entity.into());
        self
    }

    pub fn data(mut self, data: impl Serialize) -> Self {
        self.data = serde_json::to_value(data).ok();
        self
    }
}

pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Sink for background runs, where nobody is listening.
pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Forwards events into a channel; a closed receiver is ignored.
pub struct ChannelSink(mpsc::UnboundedSender<ProgressEvent>);

impl ProgressSink for ChannelSink {
    fn emit(&self, event: ProgressEvent) {
        let _ = self.0.send(event);
    }
}

// ---------------------------------------------------------------------------
// Enricher
// ---------------------------------------------------------------------------

/// Looks up metadata for one entity. Returned patches carry the entity's name;
/// `None` fields mean "unknown" and never overwrite stored values.
#[async_trait]
pub trait Enricher: Send + Sync {
    async fn enrich_company(&self, name: &str, progress: &dyn ProgressSink) -> Result<CompanyPatch>;

    async fn enrich_investor(&self, name: &str, progress: &dyn ProgressSink) -> Result<InvestorPatch>;
}

/// Company metadata as returned by the model.
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CompanyProfile {
    pub description: Option<String>,
    pub website: Option<String>,
    pub founded_year: Option<i64>,
    /// e.g. "11-50", "51-200".
    pub employee_range: Option<String>,
    pub linkedin_url: Option<String>,
    pub logo_url: Option<String>,
    /// Headquarters country.
    pub country: Option<String>,
    /// "active", "acquired", "closed" or "ipo".
    pub status: Option<String>,
}

/// Investor metadata as returned by the model.
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InvestorProfile {
    /// e.g. "vc", "angel", "corporate", "accelerator", "pe".
    #[serde(rename = "type")]
    pub investor_type: Option<String>,
    pub website: Option<String>,
    pub linkedin_url: Option<String>,
    pub founded_year: Option<i64>,
    pub logo_url: Option<String>,
    /// Assets under management in USD.
    pub aum: Option<f64>,
    pub hq: Option<String>,
    #[serde(default)]
    pub stage_focus: Vec<String>,
    #[serde(default)]
    pub sector_focus: Vec<String>,
    #[serde(default)]
    pub geo_focus: Vec<String>,
    pub check_size_min_usd: Option<f64>,
    pub check_size_max_usd: Option<f64>,
}

fn clean(s: Option<String>) -> Option<String> {
    s.map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("unknown") && v != "null")
}

fn clean_list(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl CompanyProfile {
    fn into_patch(self, name: &str) -> CompanyPatch {
        CompanyPatch {
            name: name.to_string(),
            country: clean(self.country),
            description: clean(self.description),
            website: clean(self.website),
            founded_year: self.founded_year.filter(|y| (1800..=2100).contains(y)),
            employee_range: clean(self.employee_range),
            linkedin_url: clean(self.linkedin_url),
            logo_url: clean(self.logo_url),
            total_funding_usd: None,
            status: clean(self.status),
        }
    }
}

impl InvestorProfile {
    fn into_patch(self, name: &str) -> InvestorPatch {
        let positive = |v: Option<f64>| v.filter(|x| x.is_finite() && *x > 0.0);
        InvestorPatch {
            name: name.to_string(),
            investor_type: clean(self.investor_type),
            website: clean(self.website),
            linkedin_url: clean(self.linkedin_url),
            founded_year: self.founded_year.filter(|y| (1800..=2100).contains(y)),
            logo_url: clean(self.logo_url),
            aum: positive(self.aum),
            hq: clean(self.hq),
            stage_focus: clean_list(self.stage_focus),
            sector_focus: clean_list(self.sector_focus),
            geo_focus: clean_list(self.geo_focus),
            check_size_min_usd: positive(self.check_size_min_usd),
            check_size_max_usd: positive(self.check_size_max_usd),
        }
    }
}

const ENRICH_SYSTEM: &str = "You are a research assistant building a startup funding database. \
Answer only with facts you are confident about; use null for anything you do not know. \
Never guess URLs. Respond with a single JSON object and nothing else.";

/// Enrichment backed by the completion service.
pub struct LlmEnricher {
    completion: Arc<dyn CompletionService>,
}

impl LlmEnricher {
    pub fn new(completion: Arc<dyn CompletionService>) -> Self {
        Self { completion }
    }

    async fn ask<T>(&self, user: String) -> Result<T>
    where
        T: for<'de> Deserialize<'de> + JsonSchema,
    {
        let schema = serde_json::to_string_pretty(&schemars::schema_for!(T))?;
        let system = format!("{ENRICH_SYSTEM}\n\nJSON schema:\n{schema}");
        let reply = self.completion.complete(&system, &user).await?;
        serde_json::from_str(strip_code_blocks(&reply)).context("unparseable enrichment reply")
    }
}

#[async_trait]
impl Enricher for LlmEnricher {
    async fn enrich_company(&self, name: &str, progress: &dyn ProgressSink) -> Result<CompanyPatch> {
        progress.emit(
            ProgressEvent::new(ProgressStage::Company)
                .entity(name)
                .message("Looking up company profile"),
        );
        let profile: CompanyProfile = self
            .ask(format!("Describe the startup \"{name}\": what it does, website, founding year, headcount range, LinkedIn, logo, HQ country and status."))
            .await?;
        Ok(profile.into_patch(name))
    }

    async fn enrich_investor(&self, name: &str, progress: &dyn ProgressSink) -> Result<InvestorPatch> {
        progress.emit(
            ProgressEvent::new(ProgressStage::Investor)
                .entity(name)
                .message("Looking up investor profile"),
        );
        let profile: InvestorProfile = self
            .ask(format!("Describe the investor \"{name}\": type, website, LinkedIn, founding year, logo, AUM in USD, HQ, stage/sector/geography focus and typical check size in USD."))
            .await?;
        Ok(profile.into_patch(name))
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentJob {
    pub company_name: String,
    #[serde(default)]
    pub investors: Vec<String>,
}

impl EnrichmentJob {
    pub fn new(company_name: impl Into<String>, investors: Vec<String>) -> Self {
        Self {
            company_name: company_name.into(),
            investors,
        }
    }

    pub fn for_round(round: &ResolvedRound) -> Self {
        let investors = dedupe_investors(
            round.lead_investor.as_deref(),
            round.investors.iter().map(String::as_str),
        );
        Self::new(round.company_name.trim(), investors)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityOutcome {
    pub kind: EntityKind,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EntityOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentReport {
    /// Entities in the order they were enriched, company first.
    pub outcomes: Vec<EntityOutcome>,
    /// Set when the job itself was rejected before any lookup.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EnrichmentReport {
    pub fn failures(&self) -> impl Iterator<Item = &EntityOutcome> {
        self.outcomes.iter().filter(|o| !o.succeeded())
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.succeeded()).count()
    }
}

/// Lookups are bounded by `enrichment_timeout`; the writes that follow get
/// the same per-attempt timeout and retries as a round commit.
pub struct EnrichmentOrchestrator {
    enricher: Arc<dyn Enricher>,
    store: Arc<dyn FundingStore>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl EnrichmentOrchestrator {
    pub fn new(enricher: Arc<dyn Enricher>, store: Arc<dyn FundingStore>, settings: &PipelineSettings) -> Self {
        Self {
            enricher,
            store,
            timeout: settings.enrichment_timeout,
            retry: RetryPolicy::from_settings(settings),
        }
    }

    async fn company(&self, name: &str, sink: &dyn ProgressSink) -> Result<CompanyPatch> {
        let mut patch = tokio::time::timeout(self.timeout, self.enricher.enrich_company(name, sink))
            .await
            .map_err(|_| anyhow!("enrichment timed out after {:?}", self.timeout))??;
        // Identity comes from the job, not the lookup.
        patch.name = name.to_string();
        patch.total_funding_usd = None;
        self.retry
            .run(EntityKind::Company, name, || self.store.upsert_company(&patch))
            .await
            .context("saving company profile")?;
        Ok(patch)
    }

    async fn investor(&self, name: &str, sink: &dyn ProgressSink) -> Result<InvestorPatch> {
        let mut patch = tokio::time::timeout(self.timeout, self.enricher.enrich_investor(name, sink))
            .await
            .map_err(|_| anyhow!("enrichment timed out after {:?}", self.timeout))??;
        patch.name = name.to_string();
        self.retry
            .run(EntityKind::Investor, name, || self.store.upsert_investor(&patch))
            .await
            .context("saving investor profile")?;
        Ok(patch)
    }

    fn record_failure(
        report: &mut EnrichmentReport,
        sink: &dyn ProgressSink,
        kind: EntityKind,
        name: &str,
        err: anyhow::Error,
    ) {
        warn!(%kind, entity = name, error = %err, "Enrichment failed");
        sink.emit(
            ProgressEvent::new(ProgressStage::EntityFailed)
                .entity(name)
                .message(format!("{err:#}")),
        );
        report.outcomes.push(EntityOutcome {
            kind,
            name: name.to_string(),
            error: Some(format!("{err:#}")),
        });
    }

    /// Enrich the job's company, then each distinct investor in order. Always
    /// ends with exactly one terminal event on `sink`.
    pub async fn run(&self, job: &EnrichmentJob, sink: &dyn ProgressSink) -> EnrichmentReport {
        let mut report = EnrichmentReport::default();
        let company = job.company_name.trim();
        if normalize_company_key(company).is_empty() {
            let msg = "company name is required".to_string();
            sink.emit(ProgressEvent::new(ProgressStage::Error).message(msg.clone()));
            report.error = Some(msg);
            return report;
        }

        let investors = dedupe_investors(None, job.investors.iter().map(String::as_str));
        sink.emit(
            ProgressEvent::new(ProgressStage::Started)
                .entity(company)
                .data(serde_json::json!({ "investors": investors })),
        );

        match self.company(company, sink).await {
            Ok(patch) => {
                sink.emit(
                    ProgressEvent::new(ProgressStage::Company)
                        .entity(company)
                        .message("Company enriched")
                        .data(&patch),
                );
                report.outcomes.push(EntityOutcome {
                    kind: EntityKind::Company,
                    name: company.to_string(),
                    error: None,
                });
            }
            Err(e) => Self::record_failure(&mut report, sink, EntityKind::Company, company, e),
        }

        let mut seen = HashSet::new();
        for name in &investors {
            if !seen.insert(normalize_company_key(name)) {
                continue;
            }
            match self.investor(name, sink).await {
                Ok(patch) => {
                    sink.emit(
                        ProgressEvent::new(ProgressStage::Investor)
                            .entity(name.as_str())
                            .message("Investor enriched")
                            .data(&patch),
                    );
                    report.outcomes.push(EntityOutcome {
                        kind: EntityKind::Investor,
                        name: name.clone(),
                        error: None,
                    });
                }
                Err(e) => Self::record_failure(&mut report, sink, EntityKind::Investor, name, e),
            }
        }

        let failed = report.failures().count();
        info!(
            company,
            enriched = report.succeeded(),
            failed,
            "Enrichment finished"
        );
        sink.emit(
            ProgressEvent::new(ProgressStage::Complete)
                .entity(company)
                .message(format!("{} enriched, {failed} failed", report.succeeded()))
                .data(&report),
        );
        report
    }
}

// ---------------------------------------------------------------------------
// Background queue
// ---------------------------------------------------------------------------

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("enrichment queue is full")]
    QueueFull(EnrichmentJob),

    #[error("enrichment worker has stopped")]
    Closed(EnrichmentJob),
}

/// Bounded hand-off to a single enrichment worker.
#[derive(Clone)]
pub struct EnrichmentQueue {
    tx: mpsc::Sender<EnrichmentJob>,
}

impl EnrichmentQueue {
    /// Spawn the worker. It exits once every queue handle is dropped and the
    /// backlog is drained. Each job runs in its own task, so a panicking job
    /// is logged and the worker moves on to the next one.
    pub fn start(orchestrator: Arc<EnrichmentOrchestrator>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<EnrichmentJob>(capacity.max(1));
        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let company = job.company_name.clone();
                let orchestrator = orchestrator.clone();
                let run = tokio::spawn(async move { orchestrator.run(&job, &NoopSink).await });
                match run.await {
                    Ok(report) => {
                        if let Some(err) = &report.error {
                            warn!(company = %company, error = %err, "Enrichment job rejected");
                        }
                    }
                    Err(e) if e.is_panic() => {
                        error!(company = %company, "Enrichment job panicked, continuing with next job");
                    }
                    Err(e) => error!(company = %company, error = %e, "Enrichment job aborted"),
                }
            }
            info!("Enrichment worker stopped");
        });
        (Self { tx }, handle)
    }

    /// Never waits. A full queue is reported so the caller can log and move on.
    pub fn submit(&self, job: EnrichmentJob) -> Result<(), QueueError> {
        self.tx.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(job) => QueueError::QueueFull(job),
            mpsc::error::TrySendError::Closed(job) => QueueError::Closed(job),
        })
    }
}

// ---------------------------------------------------------------------------
// Streaming
// ---------------------------------------------------------------------------

/// Run one job in its own task and stream its progress. The stream ends after
/// the terminal `complete` or `error` event.
pub fn enrich_stream(
    orchestrator: Arc<EnrichmentOrchestrator>,
    job: EnrichmentJob,
) -> impl Stream<Item = ProgressEvent> + Send + 'static {
    let (tx, mut rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let sink = ChannelSink(tx);
        orchestrator.run(&job, &sink).await;
    });
    async_stream::stream! {
        while let Some(event) = rx.recv().await {
            let terminal = event.stage.is_terminal();
            yield event;
            if terminal {
                break;
            }
        }
    }
}
