use anyhow::{Context, Result};
use chrono::Utc;
use neo4rs::{query, BoltType, Query};
use tracing::{debug, info, warn};

use fundgraph_common::{
    normalize_company_key, Article, ClearStats, CompanyField, CompanyPatch, EntityKind, FieldLock,
    InvestorField, InvestorPatch, InvestorRole, RoundUpsert, SourceLink, Upserted,
};

use crate::value::{self, format_datetime, opt, opt_datetime, opt_list, opt_str};
use crate::GraphClient;

/// Write-side wrapper for the graph.
///
/// Every write is a single MERGE-based statement, so re-running it with the
/// same input converges on the same graph state and concurrent writers never
/// create duplicate nodes or edges. Locked fields are checked inside the same
/// statement that writes, never from a previously read copy.
#[derive(Clone)]
pub struct GraphWriter {
    client: GraphClient,
}

pub(crate) fn entity_label(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Company => "Company",
        EntityKind::Investor => "InvestorOrg",
    }
}

/// `n.prop = <incoming unless null or locked>` for one lockable property.
fn guarded_set(var: &str, prop: &str) -> String {
    format!(
        "{var}.{prop} = CASE WHEN ${prop} IS NULL OR '{prop}' IN coalesce({var}.locked_fields, []) \
         THEN {var}.{prop} ELSE ${prop} END"
    )
}

fn company_value(patch: &CompanyPatch, field: CompanyField) -> BoltType {
    match field {
        CompanyField::Country => opt_str(patch.country.as_deref()),
        CompanyField::Description => opt_str(patch.description.as_deref()),
        CompanyField::Website => opt_str(patch.website.as_deref()),
        CompanyField::FoundedYear => opt(patch.founded_year),
        CompanyField::EmployeeRange => opt_str(patch.employee_range.as_deref()),
        CompanyField::LinkedinUrl => opt_str(patch.linkedin_url.as_deref()),
        CompanyField::LogoUrl => opt_str(patch.logo_url.as_deref()),
        CompanyField::TotalFundingUsd => opt(patch.total_funding_usd),
        CompanyField::Status => opt_str(patch.status.as_deref()),
    }
}

fn investor_value(patch: &InvestorPatch, field: InvestorField) -> BoltType {
    match field {
        InvestorField::InvestorType => opt_str(patch.investor_type.as_deref()),
        InvestorField::Website => opt_str(patch.website.as_deref()),
        InvestorField::LinkedinUrl => opt_str(patch.linkedin_url.as_deref()),
        InvestorField::FoundedYear => opt(patch.founded_year),
        InvestorField::LogoUrl => opt_str(patch.logo_url.as_deref()),
        InvestorField::Aum => opt(patch.aum),
        InvestorField::Hq => opt_str(patch.hq.as_deref()),
        InvestorField::StageFocus => opt_list(&patch.stage_focus),
        InvestorField::SectorFocus => opt_list(&patch.sector_focus),
        InvestorField::GeoFocus => opt_list(&patch.geo_focus),
        InvestorField::CheckSizeMinUsd => opt(patch.check_size_min_usd),
        InvestorField::CheckSizeMaxUsd => opt(patch.check_size_max_usd),
    }
}

fn entity_upsert_cypher(label: &str, props: &[&'static str]) -> String {
    let sets: Vec<String> = props.iter().map(|p| guarded_set("n", p)).collect();
    format!(
        "OPTIONAL MATCH (existing:{label} {{name_key: $name_key}})
         WITH count(existing) = 0 AS created
         MERGE (n:{label} {{name_key: $name_key}})
         ON CREATE SET n.name = $name, n.locked_fields = [], n.created_at = datetime($now)
         SET {sets}
         RETURN created",
        sets = sets.join(",\n             "),
    )
}

impl GraphWriter {
    pub fn new(client: GraphClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &GraphClient {
        &self.client
    }

    async fn single_row(&self, q: Query, what: &str) -> Result<Option<neo4rs::Row>> {
        let mut stream = self
            .client
            .graph
            .execute(q)
            .await
            .with_context(|| format!("{what}: execute"))?;
        let row = stream
            .next()
            .await
            .with_context(|| format!("{what}: fetch"))?;
        // Drain so the connection goes back to the pool clean.
        while stream.next().await?.is_some() {}
        Ok(row)
    }

    /// No row means an edge endpoint was missing.
    async fn created_flag(&self, q: Query, what: &str) -> Result<Upserted> {
        let row = self
            .single_row(q, what)
            .await?
            .with_context(|| format!("{what}: endpoint not found"))?;
        Ok(Upserted::from_created(value::boolean(&row, "created")))
    }

    // --- Entities ---

    /// Create or merge a Company by normalized name.
    pub async fn upsert_company(&self, patch: &CompanyPatch) -> Result<Upserted> {
        let name_key = patch.name_key();
        let props: Vec<&'static str> = CompanyField::ALL.iter().map(|f| f.property()).collect();
        let mut q = query(&entity_upsert_cypher("Company", &props))
            .param("name_key", name_key.as_str())
            .param("name", patch.name.trim())
            .param("now", format_datetime(&Utc::now()));
        for field in CompanyField::ALL {
            q = q.param(field.property(), company_value(patch, field));
        }
        let outcome = self.created_flag(q, "upsert_company").await?;
        debug!(company = %name_key, ?outcome, "Company upserted");
        Ok(outcome)
    }

    /// Create or merge an InvestorOrg by normalized name.
    pub async fn upsert_investor(&self, patch: &InvestorPatch) -> Result<Upserted> {
        let name_key = patch.name_key();
        let props: Vec<&'static str> = InvestorField::ALL.iter().map(|f| f.property()).collect();
        let mut q = query(&entity_upsert_cypher("InvestorOrg", &props))
            .param("name_key", name_key.as_str())
            .param("name", patch.name.trim())
            .param("now", format_datetime(&Utc::now()));
        for field in InvestorField::ALL {
            q = q.param(field.property(), investor_value(patch, field));
        }
        let outcome = self.created_flag(q, "upsert_investor").await?;
        debug!(investor = %name_key, ?outcome, "Investor upserted");
        Ok(outcome)
    }

    pub async fn upsert_location(&self, name: &str) -> Result<Upserted> {
        let q = query(
            "OPTIONAL MATCH (existing:Location {name_key: $name_key})
             WITH count(existing) = 0 AS created
             MERGE (l:Location {name_key: $name_key})
             ON CREATE SET l.name = $name
             RETURN created",
        )
        .param("name_key", normalize_company_key(name))
        .param("name", name.trim());
        self.created_flag(q, "upsert_location").await
    }

    // --- Rounds ---

    /// Create or update a FundingRound by round_key. Confidence only rises
    /// unless the round was fully re-extracted.
    pub async fn upsert_round(&self, round: &RoundUpsert) -> Result<Upserted> {
        let q = query(
            "OPTIONAL MATCH (existing:FundingRound {round_key: $round_key})
             WITH count(existing) = 0 AS created
             MERGE (r:FundingRound {round_key: $round_key})
             ON CREATE SET r.created_at = datetime($now)
             SET r.amount_usd = coalesce($amount_usd, r.amount_usd),
                 r.currency = coalesce($currency, r.currency),
                 r.stage = coalesce($stage, r.stage),
                 r.confidence = CASE
                     WHEN $full_reextract OR r.confidence IS NULL OR $confidence > r.confidence
                     THEN $confidence ELSE r.confidence END,
                 r.ingested_at = coalesce(r.ingested_at, datetime($now))
             RETURN created",
        )
        .param("round_key", round.round_key.as_str())
        .param("amount_usd", opt(round.amount_usd))
        .param("currency", opt_str(round.currency.as_deref()))
        .param("stage", opt_str(round.stage.as_deref()))
        .param("confidence", round.confidence)
        .param("full_reextract", round.full_reextract)
        .param("now", format_datetime(&round.now));
        self.created_flag(q, "upsert_round").await
    }

    // --- Edges ---

    /// Point the company's single HQ_IN edge at `location`, dropping any edge
    /// to another location. Returns `None` and leaves every edge alone when the
    /// company's country is locked.
    pub async fn link_company_location(&self, company_key: &str, location: &str) -> Result<Option<Upserted>> {
        let q = query(
            "MATCH (c:Company {name_key: $company_key})
             MATCH (l:Location {name_key: $location_key})
             WITH c, l, 'country' IN coalesce(c.locked_fields, []) AS locked
             OPTIONAL MATCH (c)-[stale:HQ_IN]->(other:Location)
             WHERE other <> l AND NOT locked
             DELETE stale
             WITH DISTINCT c, l, locked
             OPTIONAL MATCH (c)-[e:HQ_IN]->(l)
             WITH c, l, locked, count(e) = 0 AS missing
             FOREACH (_ IN CASE WHEN locked THEN [] ELSE [1] END | MERGE (c)-[:HQ_IN]->(l))
             RETURN locked, missing AND NOT locked AS created",
        )
        .param("company_key", company_key)
        .param("location_key", normalize_company_key(location));
        let row = self
            .single_row(q, "link_company_location")
            .await?
            .context("link_company_location: endpoint not found")?;
        if value::boolean(&row, "locked") {
            return Ok(None);
        }
        Ok(Some(Upserted::from_created(value::boolean(&row, "created"))))
    }

    pub async fn link_company_round(&self, company_key: &str, round_key: &str) -> Result<Upserted> {
        let q = query(
            "MATCH (c:Company {name_key: $company_key})
             MATCH (r:FundingRound {round_key: $round_key})
             OPTIONAL MATCH (c)-[e:RAISED]->(r)
             WITH c, r, count(e) = 0 AS created
             MERGE (c)-[:RAISED]->(r)
             RETURN created",
        )
        .param("company_key", company_key)
        .param("round_key", round_key);
        self.created_flag(q, "link_company_round").await
    }

    /// One PARTICIPATED_IN edge per (investor, round). An existing edge can be
    /// upgraded to lead; a lead is never downgraded.
    pub async fn link_investor_round(
        &self,
        investor_key: &str,
        round_key: &str,
        role: InvestorRole,
    ) -> Result<Upserted> {
        let q = query(
            "MATCH (i:InvestorOrg {name_key: $investor_key})
             MATCH (r:FundingRound {round_key: $round_key})
             OPTIONAL MATCH (i)-[e:PARTICIPATED_IN]->(r)
             WITH i, r, count(e) = 0 AS created
             MERGE (i)-[p:PARTICIPATED_IN]->(r)
             ON CREATE SET p.role = $role
             SET p.role = CASE WHEN p.role = 'lead' OR $role = 'lead' THEN 'lead' ELSE 'participant' END
             RETURN created",
        )
        .param("investor_key", investor_key)
        .param("round_key", round_key)
        .param("role", role.as_str());
        self.created_flag(q, "link_investor_round").await
    }

    /// MERGE the Article (properties set on create only), the SOURCED_FROM edge
    /// and the owning feed's counters in one statement. The counters move only
    /// for what this statement created, so a retried link never double counts
    /// and never loses an increment.
    pub async fn link_round_article(&self, round_key: &str, article: &Article) -> Result<SourceLink> {
        let q = query(
            "MATCH (r:FundingRound {round_key: $round_key})
             OPTIONAL MATCH (existing:Article {id: $id})
             WITH r, count(existing) = 0 AS article_created
             MERGE (a:Article {id: $id})
             ON CREATE SET a.url = $url,
                           a.title = $title,
                           a.published_at = CASE WHEN $published_at IS NULL THEN null ELSE datetime($published_at) END,
                           a.author = $author,
                           a.feed_id = $feed_id,
                           a.feed_title = $feed_title
             WITH r, a, article_created
             OPTIONAL MATCH (r)-[e:SOURCED_FROM]->(a)
             WITH r, a, article_created, count(e) = 0 AS edge_created
             MERGE (r)-[:SOURCED_FROM]->(a)
             WITH article_created, edge_created
             FOREACH (_ IN CASE
                     WHEN coalesce($feed_id, '') = '' OR NOT (article_created OR edge_created) THEN []
                     ELSE [1] END |
                 MERGE (f:Feed {id: $feed_id})
                 ON CREATE SET f.title = $feed_title, f.article_count = 0, f.round_count = 0
                 SET f.article_count = coalesce(f.article_count, 0) + CASE WHEN article_created THEN 1 ELSE 0 END,
                     f.round_count = coalesce(f.round_count, 0) + CASE WHEN edge_created THEN 1 ELSE 0 END)
             RETURN article_created, edge_created",
        )
        .param("id", article.id.as_str())
        .param("url", article.url.as_str())
        .param("title", article.title.as_str())
        .param("published_at", opt_datetime(article.published_at.as_ref()))
        .param("author", opt_str(article.author.as_deref()))
        .param("feed_id", opt_str(article.feed_id.as_deref()))
        .param("feed_title", opt_str(article.feed_title.as_deref()))
        .param("round_key", round_key);

        let row = self
            .single_row(q, "link_round_article")
            .await?
            .with_context(|| format!("link_round_article: round {round_key} not found"))?;
        Ok(SourceLink {
            article: Upserted::from_created(value::boolean(&row, "article_created")),
            edge: Upserted::from_created(value::boolean(&row, "edge_created")),
        })
    }

    // --- Denormalized aggregates ---

    /// Recompute Company.total_funding_usd from its RAISED rounds, unless the
    /// field is locked. Returns the stored total.
    pub async fn refresh_company_total(&self, company_key: &str) -> Result<f64> {
        let q = query(
            "MATCH (c:Company {name_key: $company_key})
             OPTIONAL MATCH (c)-[:RAISED]->(r:FundingRound)
             WITH c, sum(coalesce(r.amount_usd, 0.0)) AS total
             SET c.total_funding_usd = CASE
                 WHEN 'total_funding_usd' IN coalesce(c.locked_fields, []) THEN c.total_funding_usd
                 ELSE toFloat(total) END
             RETURN c.total_funding_usd AS total",
        )
        .param("company_key", company_key);
        let row = self.single_row(q, "refresh_company_total").await?;
        Ok(row.map(|r| value::number_or_zero(&r, "total")).unwrap_or(0.0))
    }

    // --- Locks ---

    /// Add or remove one field from an entity's lockedFields. Never touches the
    /// field value itself. Returns false when the entity does not exist.
    pub async fn set_field_lock(&self, lock: FieldLock, name_key: &str, locked: bool) -> Result<bool> {
        let label = entity_label(lock.kind());
        let cypher = format!(
            "MATCH (n:{label} {{name_key: $name_key}})
             SET n.locked_fields = CASE
                 WHEN $locked AND $field IN coalesce(n.locked_fields, []) THEN n.locked_fields
                 WHEN $locked THEN coalesce(n.locked_fields, []) + $field
                 ELSE [f IN coalesce(n.locked_fields, []) WHERE f <> $field] END
             RETURN count(n) AS matched"
        );
        let q = query(&cypher)
            .param("name_key", name_key)
            .param("field", lock.property())
            .param("locked", locked);
        let row = self.single_row(q, "set_field_lock").await?;
        let matched = row.map(|r| value::count(&r, "matched")).unwrap_or(0) > 0;
        info!(entity = label, name_key, field = lock.property(), locked, matched, "Field lock updated");
        Ok(matched)
    }

    // --- Bulk clear ---

    /// Delete every FundingRound and Article, reset feed counters and company
    /// totals. Company, InvestorOrg and Location nodes survive with their locks.
    pub async fn clear_funding_data(&self) -> Result<ClearStats> {
        let mut stats = ClearStats::default();

        let row = self
            .single_row(
                query("MATCH (r:FundingRound) DETACH DELETE r RETURN count(*) AS deleted"),
                "clear rounds",
            )
            .await?;
        stats.rounds_deleted = row.map(|r| value::count(&r, "deleted")).unwrap_or(0);

        let row = self
            .single_row(
                query("MATCH (a:Article) DETACH DELETE a RETURN count(*) AS deleted"),
                "clear articles",
            )
            .await?;
        stats.articles_deleted = row.map(|r| value::count(&r, "deleted")).unwrap_or(0);

        let row = self
            .single_row(
                query(
                    "MATCH (f:Feed)
                     SET f.article_count = 0, f.round_count = 0
                     RETURN count(f) AS reset",
                ),
                "reset feeds",
            )
            .await?;
        stats.feeds_reset = row.map(|r| value::count(&r, "reset")).unwrap_or(0);

        let row = self
            .single_row(
                query(
                    "MATCH (c:Company)
                     WHERE NOT 'total_funding_usd' IN coalesce(c.locked_fields, [])
                     SET c.total_funding_usd = 0.0
                     RETURN count(c) AS reset",
                ),
                "reset company totals",
            )
            .await?;
        stats.companies_reset = row.map(|r| value::count(&r, "reset")).unwrap_or(0);

        if stats.rounds_deleted == 0 && stats.articles_deleted == 0 {
            warn!("Bulk clear found nothing to delete");
        }
        info!(?stats, "Funding data cleared");
        Ok(stats)
    }
}
