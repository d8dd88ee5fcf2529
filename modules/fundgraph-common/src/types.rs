use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fields::{CompanyField, InvestorField};
use crate::normalize::normalize_company_key;

// --- Source material ---

/// A news article as delivered by the feed layer. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub id: String,
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub feed_id: Option<String>,
    #[serde(default)]
    pub feed_title: Option<String>,
}

/// An article plus its body text, as fed to the extraction merger.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceDocument {
    pub article: Article,
    pub body: String,
}

// --- Extraction ---

/// One structured extraction of a funding event. Never persisted on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawExtraction {
    pub company_name: String,
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub amount_usd: Option<f64>,
    pub stage: Option<String>,
    pub investors: Vec<String>,
    pub lead_investor: Option<String>,
    pub country: Option<String>,
    pub confidence: f64,
    pub source_article_ref: Option<String>,
    pub raw_excerpt: Option<String>,
    /// Provenance tags: which extractor produced it, how many sources agreed.
    pub signals: Vec<String>,
}

/// A per-article funding extraction handed to the round grouper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundingMention {
    pub article_id: String,
    pub article_title: String,
    pub article_url: String,
    #[serde(default)]
    pub feed_id: Option<String>,
    #[serde(default)]
    pub feed_title: Option<String>,
    pub company_name: String,
    #[serde(default)]
    pub amount_usd: Option<f64>,
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub lead_investor: Option<String>,
    #[serde(default)]
    pub investors: Vec<String>,
    pub confidence: f64,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    pub ingested_at: DateTime<Utc>,
}

impl FundingMention {
    /// Publish date, falling back to ingestion time.
    pub fn event_time(&self) -> DateTime<Utc> {
        self.published_at.unwrap_or(self.ingested_at)
    }

    /// Feed identity used for source de-duplication. Mentions without a feed
    /// count as their own feed.
    pub fn feed_identity(&self) -> &str {
        self.feed_id.as_deref().unwrap_or(&self.article_id)
    }
}

// --- Canonical rounds ---

/// One contributing feed of a canonical round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundSource {
    pub article_id: String,
    pub feed_id: Option<String>,
    pub feed_title: Option<String>,
    pub article_title: String,
    pub article_url: String,
    pub confidence: f64,
    pub published_at: Option<DateTime<Utc>>,
}

/// The reconciled representation of one real funding event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalRound {
    pub round_key: String,
    pub company_name: String,
    pub amount_usd: Option<f64>,
    pub stage: Option<String>,
    pub country: Option<String>,
    pub lead_investor: Option<String>,
    pub all_investors: Vec<String>,
    pub max_confidence: f64,
    pub sources: Vec<RoundSource>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl CanonicalRound {
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }
}

/// Input to a graph commit: one resolved funding event.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedRound {
    /// Caller-supplied identity. Derived deterministically when absent.
    #[serde(default)]
    pub round_key: Option<String>,
    pub company_name: String,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub amount_usd: Option<f64>,
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub lead_investor: Option<String>,
    #[serde(default)]
    pub investors: Vec<String>,
    #[serde(default)]
    pub confidence: f64,
    /// The round was extracted again from scratch; its confidence may go down.
    #[serde(default)]
    pub full_reextract: bool,
}

impl From<&RawExtraction> for ResolvedRound {
    fn from(x: &RawExtraction) -> Self {
        Self {
            round_key: None,
            company_name: x.company_name.clone(),
            amount: x.amount,
            currency: x.currency.clone(),
            amount_usd: x.amount_usd,
            stage: x.stage.clone(),
            country: x.country.clone(),
            lead_investor: x.lead_investor.clone(),
            investors: x.investors.clone(),
            confidence: x.confidence,
            full_reextract: false,
        }
    }
}

impl From<&CanonicalRound> for ResolvedRound {
    fn from(r: &CanonicalRound) -> Self {
        Self {
            round_key: Some(r.round_key.clone()),
            company_name: r.company_name.clone(),
            amount: r.amount_usd,
            currency: Some("USD".to_string()),
            amount_usd: r.amount_usd,
            stage: r.stage.clone(),
            country: r.country.clone(),
            lead_investor: r.lead_investor.clone(),
            investors: r.all_investors.clone(),
            confidence: r.max_confidence,
            full_reextract: false,
        }
    }
}

// --- Graph entities ---

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Company {
    pub name: String,
    pub name_key: String,
    pub country: Option<String>,
    pub description: Option<String>,
    pub website: Option<String>,
    pub founded_year: Option<i64>,
    pub employee_range: Option<String>,
    pub linkedin_url: Option<String>,
    pub logo_url: Option<String>,
    pub total_funding_usd: Option<f64>,
    pub status: Option<String>,
    pub locked_fields: BTreeSet<CompanyField>,
}

/// Incoming values for a company write. `None` means "no information".
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyPatch {
    pub name: String,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub founded_year: Option<i64>,
    #[serde(default)]
    pub employee_range: Option<String>,
    #[serde(default)]
    pub linkedin_url: Option<String>,
    #[serde(default)]
    pub logo_url: Option<String>,
    /// Authoritative external total. When absent the total is recomputed from rounds.
    #[serde(default)]
    pub total_funding_usd: Option<f64>,
    #[serde(default)]
    pub status: Option<String>,
}

impl CompanyPatch {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn name_key(&self) -> String {
        normalize_company_key(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestorOrg {
    pub name: String,
    pub name_key: String,
    pub investor_type: Option<String>,
    pub website: Option<String>,
    pub linkedin_url: Option<String>,
    pub founded_year: Option<i64>,
    pub logo_url: Option<String>,
    pub aum: Option<f64>,
    pub hq: Option<String>,
    pub stage_focus: Vec<String>,
    pub sector_focus: Vec<String>,
    pub geo_focus: Vec<String>,
    pub check_size_min_usd: Option<f64>,
    pub check_size_max_usd: Option<f64>,
    pub locked_fields: BTreeSet<InvestorField>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestorPatch {
    pub name: String,
    #[serde(default)]
    pub investor_type: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub linkedin_url: Option<String>,
    #[serde(default)]
    pub founded_year: Option<i64>,
    #[serde(default)]
    pub logo_url: Option<String>,
    #[serde(default)]
    pub aum: Option<f64>,
    #[serde(default)]
    pub hq: Option<String>,
    /// Empty lists are treated as "no information".
    #[serde(default)]
    pub stage_focus: Vec<String>,
    #[serde(default)]
    pub sector_focus: Vec<String>,
    #[serde(default)]
    pub geo_focus: Vec<String>,
    #[serde(default)]
    pub check_size_min_usd: Option<f64>,
    #[serde(default)]
    pub check_size_max_usd: Option<f64>,
}

impl InvestorPatch {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn name_key(&self) -> String {
        normalize_company_key(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundingRoundNode {
    pub round_key: String,
    pub amount_usd: Option<f64>,
    pub currency: Option<String>,
    pub stage: Option<String>,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
    pub ingested_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvestorRole {
    Lead,
    Participant,
}

impl InvestorRole {
    pub fn as_str(self) -> &'static str {
        match self {
            InvestorRole::Lead => "lead",
            InvestorRole::Participant => "participant",
        }
    }

    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("lead") {
            InvestorRole::Lead
        } else {
            InvestorRole::Participant
        }
    }
}

// --- Write outcomes ---

/// Whether an upsert created a node/edge or matched an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Upserted {
    Created,
    Matched,
}

impl Upserted {
    pub fn from_created(created: bool) -> Self {
        if created {
            Upserted::Created
        } else {
            Upserted::Matched
        }
    }
}

/// Counts returned by a bulk clear.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearStats {
    pub rounds_deleted: u64,
    pub articles_deleted: u64,
    pub feeds_reset: u64,
    pub companies_reset: u64,
}

/// Values written to a FundingRound node by one commit.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundUpsert {
    pub round_key: String,
    pub amount_usd: Option<f64>,
    pub currency: Option<String>,
    pub stage: Option<String>,
    pub confidence: f64,
    pub full_reextract: bool,
    pub now: DateTime<Utc>,
}

/// Outcome of linking a round to one source article.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLink {
    pub article: Upserted,
    pub edge: Upserted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub investor_name: String,
    pub role: InvestorRole,
}

/// A FundingRound with its immediate neighbourhood.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundDetail {
    pub round: FundingRoundNode,
    pub company_name: Option<String>,
    pub participants: Vec<Participant>,
    pub article_ids: Vec<String>,
}
