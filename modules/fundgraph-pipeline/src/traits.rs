// Trait seams for the pipeline's external collaborators.
//
// CompletionService: the language model, one prompt in, raw text out.
// FundingStore: keyed upserts and lookups against the funding graph.
//
// Production wires ai_client::Claude and fundgraph_graph::GraphWriter; tests use
// MockCompletion and MemoryStore from `testing`.

use anyhow::Result;
use async_trait::async_trait;

use fundgraph_common::{
    Article, ClearStats, Company, CompanyPatch, FieldLock, InvestorOrg, InvestorPatch,
    InvestorRole, RoundDetail, RoundUpsert, SourceLink, Upserted,
};
use fundgraph_graph::{GraphReader, GraphWriter};

// ---------------------------------------------------------------------------
// CompletionService
// ---------------------------------------------------------------------------

#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Single completion. The reply is expected to be JSON, possibly fenced.
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

#[async_trait]
impl CompletionService for ai_client::Claude {
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        self.chat_completion(system, user).await
    }
}

// ---------------------------------------------------------------------------
// FundingStore
// ---------------------------------------------------------------------------

/// Idempotent keyed writes plus the reads the pipeline needs.
///
/// Every write must converge when repeated, and must evaluate an entity's
/// locked fields at write time rather than trusting an earlier read.
#[async_trait]
pub trait FundingStore: Send + Sync {
    // --- Entities ---

    async fn upsert_company(&self, patch: &CompanyPatch) -> Result<Upserted>;

    async fn upsert_investor(&self, patch: &InvestorPatch) -> Result<Upserted>;

    async fn upsert_location(&self, name: &str) -> Result<Upserted>;

    async fn upsert_round(&self, round: &RoundUpsert) -> Result<Upserted>;

    // --- Edges ---

    /// A company has at most one HQ_IN edge; linking a new location replaces
    /// the old one. `None` when the company's country is locked, in which case
    /// no edge changes.
    async fn link_company_location(&self, company_key: &str, location: &str) -> Result<Option<Upserted>>;

    async fn link_company_round(&self, company_key: &str, round_key: &str) -> Result<Upserted>;

    /// Participant edges may be upgraded to lead, never downgraded.
    async fn link_investor_round(
        &self,
        investor_key: &str,
        round_key: &str,
        role: InvestorRole,
    ) -> Result<Upserted>;

    async fn link_round_article(&self, round_key: &str, article: &Article) -> Result<SourceLink>;

    // --- Aggregates and admin ---

    /// Recompute the company's total from its rounds unless the total is locked.
    async fn refresh_company_total(&self, company_key: &str) -> Result<f64>;

    /// Returns false when no entity has that key.
    async fn set_field_lock(&self, lock: FieldLock, name_key: &str, locked: bool) -> Result<bool>;

    async fn clear_funding_data(&self) -> Result<ClearStats>;

    // --- Reads ---

    async fn company(&self, name_key: &str) -> Result<Option<Company>>;

    async fn investor(&self, name_key: &str) -> Result<Option<InvestorOrg>>;

    async fn round(&self, round_key: &str) -> Result<Option<RoundDetail>>;
}

#[async_trait]
impl FundingStore for GraphWriter {
    async fn upsert_company(&self, patch: &CompanyPatch) -> Result<Upserted> {
        self.upsert_company(patch).await
    }

    async fn upsert_investor(&self, patch: &InvestorPatch) -> Result<Upserted> {
        self.upsert_investor(patch).await
    }

    async fn upsert_location(&self, name: &str) -> Result<Upserted> {
        self.upsert_location(name).await
    }

    async fn upsert_round(&self, round: &RoundUpsert) -> Result<Upserted> {
        self.upsert_round(round).await
    }

    async fn link_company_location(&self, company_key: &str, location: &str) -> Result<Option<Upserted>> {
        self.link_company_location(company_key, location).await
    }

    async fn link_company_round(&self, company_key: &str, round_key: &str) -> Result<Upserted> {
        self.link_company_round(company_key, round_key).await
    }

    async fn link_investor_round(
        &self,
        investor_key: &str,
        round_key: &str,
        role: InvestorRole,
    ) -> Result<Upserted> {
        self.link_investor_round(investor_key, round_key, role).await
    }

    async fn link_round_article(&self, round_key: &str, article: &Article) -> Result<SourceLink> {
        self.link_round_article(round_key, article).await
    }

    async fn refresh_company_total(&self, company_key: &str) -> Result<f64> {
        self.refresh_company_total(company_key).await
    }

    async fn set_field_lock(&self, lock: FieldLock, name_key: &str, locked: bool) -> Result<bool> {
        self.set_field_lock(lock, name_key, locked).await
    }

    async fn clear_funding_data(&self) -> Result<ClearStats> {
        self.clear_funding_data().await
    }

    async fn company(&self, name_key: &str) -> Result<Option<Company>> {
        GraphReader::new(self.client().clone()).company(name_key).await
    }

    async fn investor(&self, name_key: &str) -> Result<Option<InvestorOrg>> {
        GraphReader::new(self.client().clone()).investor(name_key).await
    }

    async fn round(&self, round_key: &str) -> Result<Option<RoundDetail>> {
        GraphReader::new(self.client().clone()).round(round_key).await
    }
}
