//! Materializes a resolved funding round in the graph.
//!
//! Writes run in a fixed order: Company, Location, FundingRound, Investors,
//! Sources. Each single upsert is idempotent and retried on its own, so a
//! failed commit leaves earlier steps in place and can simply be re-run.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;

use fundgraph_common::currency::to_usd;
use fundgraph_common::{
    canonical_stage, normalize_company_key, normalize_stage_key, Article, CompanyField,
    CompanyPatch, EntityKind, FieldLock, InvestorPatch, InvestorRole, PipelineSettings,
    ResolvedRound, RoundUpsert, Upserted,
};

use crate::merger::dedupe_investors;
use crate::retry::RetryPolicy;
use crate::traits::FundingStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitStep {
    Company,
    Location,
    FundingRound,
    CompanyTotal,
    Investor,
    Source,
    Lock,
}

impl fmt::Display for CommitStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CommitStep::Company => "company",
            CommitStep::Location => "location",
            CommitStep::FundingRound => "funding_round",
            CommitStep::CompanyTotal => "company_total",
            CommitStep::Investor => "investor",
            CommitStep::Source => "source",
            CommitStep::Lock => "lock",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug)]
pub enum CommitError {
    /// Rejected before any store call.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Retries exhausted. Steps before this one remain committed.
    #[error("{step} upsert failed for {entity}: {source:#}")]
    Step {
        step: CommitStep,
        entity: String,
        #[source]
        source: anyhow::Error,
    },
}

/// What one commit did to the graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphSyncSummary {
    pub round_key: String,
    pub nodes_created: u32,
    pub nodes_matched: u32,
    pub edges_created: u32,
    pub edges_matched: u32,
    pub company_name: String,
    pub lead_investor: Option<String>,
    pub investors: Vec<String>,
}

impl GraphSyncSummary {
    fn node(&mut self, u: Upserted) {
        match u {
            Upserted::Created => self.nodes_created += 1,
            Upserted::Matched => self.nodes_matched += 1,
        }
    }

    fn edge(&mut self, u: Upserted) {
        match u {
            Upserted::Created => self.edges_created += 1,
            Upserted::Matched => self.edges_matched += 1,
        }
    }
}

/// `<company_key>_<stage_key>_<opaque>`. A caller-supplied key wins; otherwise
/// the opaque part is the earliest source publish time in epoch millis, or a
/// content hash when no source is dated.
pub fn derive_round_key(resolved: &ResolvedRound, sources: &[Article]) -> String {
    if let Some(key) = resolved.round_key.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
        return key.to_string();
    }
    let company_key = normalize_company_key(&resolved.company_name);
    let stage_key = normalize_stage_key(resolved.stage.as_deref());

    let opaque = match sources.iter().filter_map(|a| a.published_at).min() {
        Some(earliest) => earliest.timestamp_millis().to_string(),
        None if !sources.is_empty() => {
            let mut ids: Vec<&str> = sources.iter().map(|a| a.id.as_str()).collect();
            ids.sort_unstable();
            short_hash(&ids.join("\n"))
        }
        None => {
            let amount = resolved
                .amount_usd
                .or(resolved.amount)
                .map(|a| format!("{a:.0}"))
                .unwrap_or_else(|| "none".to_string());
            short_hash(&format!("{company_key}|{stage_key}|{amount}"))
        }
    };
    format!("{company_key}_{stage_key}_{opaque}")
}

fn short_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(&digest[..6])
}

/// Commits rounds and toggles locks against a `FundingStore`.
pub struct RoundResolver {
    store: Arc<dyn FundingStore>,
    retry: RetryPolicy,
}

impl RoundResolver {
    pub fn new(store: Arc<dyn FundingStore>, settings: &PipelineSettings) -> Self {
        Self {
            store,
            retry: RetryPolicy::from_settings(settings),
        }
    }

    async fn with_retry<T, F, Fut>(&self, step: CommitStep, entity: &str, op: F) -> Result<T, CommitError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.retry
            .run(step, entity, op)
            .await
            .map_err(|source| CommitError::Step {
                step,
                entity: entity.to_string(),
                source,
            })
    }

    pub async fn commit_round(
        &self,
        resolved: &ResolvedRound,
        sources: &[Article],
    ) -> Result<GraphSyncSummary, CommitError> {
        let company_name = resolved.company_name.trim();
        let company_key = normalize_company_key(company_name);
        if company_key.is_empty() {
            return Err(CommitError::InvalidInput("companyName is required".to_string()));
        }
        if let Some(a) = sources.iter().find(|a| a.id.trim().is_empty()) {
            return Err(CommitError::InvalidInput(format!("source article without id: {}", a.url)));
        }

        let round_key = derive_round_key(resolved, sources);
        let mut summary = GraphSyncSummary {
            round_key: round_key.clone(),
            company_name: company_name.to_string(),
            ..Default::default()
        };

        // Company
        let country = resolved
            .country
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty());
        let company = CompanyPatch {
            country: country.map(str::to_string),
            ..CompanyPatch::named(company_name)
        };
        let outcome = self
            .with_retry(CommitStep::Company, company_name, || self.store.upsert_company(&company))
            .await?;
        summary.node(outcome);

        // Location
        if let Some(country) = country {
            let stored = self
                .with_retry(CommitStep::Location, country, || self.store.company(&company_key))
                .await?;
            if stored.is_some_and(|c| c.locked_fields.contains(&CompanyField::Country)) {
                info!(company = company_name, country, "Country locked, keeping HQ location");
            } else {
                let outcome = self
                    .with_retry(CommitStep::Location, country, || self.store.upsert_location(country))
                    .await?;
                summary.node(outcome);
                let linked = self
                    .with_retry(CommitStep::Location, country, || {
                        self.store.link_company_location(&company_key, country)
                    })
                    .await?;
                match linked {
                    Some(outcome) => summary.edge(outcome),
                    None => info!(company = company_name, country, "Country locked, keeping HQ location"),
                }
            }
        }

        // FundingRound
        let currency = resolved
            .currency
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_uppercase);
        let amount_usd = resolved
            .amount_usd
            .or_else(|| resolved.amount.map(|a| to_usd(a, currency.as_deref())));
        let round = RoundUpsert {
            round_key: round_key.clone(),
            amount_usd,
            currency: currency.or_else(|| amount_usd.map(|_| "USD".to_string())),
            stage: canonical_stage(resolved.stage.as_deref()),
            confidence: resolved.confidence.clamp(0.0, 1.0),
            full_reextract: resolved.full_reextract,
            now: Utc::now(),
        };
        let outcome = self
            .with_retry(CommitStep::FundingRound, &round_key, || self.store.upsert_round(&round))
            .await?;
        summary.node(outcome);
        let outcome = self
            .with_retry(CommitStep::FundingRound, &round_key, || {
                self.store.link_company_round(&company_key, &round_key)
            })
            .await?;
        summary.edge(outcome);
        self.with_retry(CommitStep::CompanyTotal, company_name, || {
            self.store.refresh_company_total(&company_key)
        })
        .await?;

        // Investors
        let lead = resolved
            .lead_investor
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty());
        let lead_key = lead.map(normalize_company_key);
        let investors = dedupe_investors(lead, resolved.investors.iter().map(String::as_str));
        for name in &investors {
            let key = normalize_company_key(name);
            let role = if lead_key.as_deref() == Some(key.as_str()) {
                InvestorRole::Lead
            } else {
                InvestorRole::Participant
            };
            let patch = InvestorPatch::named(name.as_str());
            let outcome = self
                .with_retry(CommitStep::Investor, name, || self.store.upsert_investor(&patch))
                .await?;
            summary.node(outcome);
            let outcome = self
                .with_retry(CommitStep::Investor, name, || {
                    self.store.link_investor_round(&key, &round_key, role)
                })
                .await?;
            summary.edge(outcome);
        }
        summary.lead_investor = lead.map(str::to_string);
        summary.investors = investors;

        // Sources
        for article in sources {
            let link = self
                .with_retry(CommitStep::Source, &article.id, || {
                    self.store.link_round_article(&round_key, article)
                })
                .await?;
            summary.node(link.article);
            summary.edge(link.edge);
        }

        info!(
            round_key = %summary.round_key,
            company = %summary.company_name,
            nodes_created = summary.nodes_created,
            nodes_matched = summary.nodes_matched,
            edges_created = summary.edges_created,
            edges_matched = summary.edges_matched,
            "Round committed"
        );
        Ok(summary)
    }

    /// Lock or unlock one field. Only the lock set changes, never the value.
    /// Returns false when the entity does not exist.
    pub async fn set_field_lock(
        &self,
        lock: FieldLock,
        entity_name: &str,
        locked: bool,
    ) -> Result<bool, CommitError> {
        let name_key = normalize_company_key(entity_name);
        if name_key.is_empty() {
            let what = match lock.kind() {
                EntityKind::Company => "company",
                EntityKind::Investor => "investor",
            };
            return Err(CommitError::InvalidInput(format!("{what} name is required")));
        }
        self.with_retry(CommitStep::Lock, entity_name, || {
            self.store.set_field_lock(lock, &name_key, locked)
        })
        .await
    }
}
