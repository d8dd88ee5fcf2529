//! Read-only views over the funding graph.
//!
//! Queries are a closed set: every view is an enum variant that owns a fixed
//! Cypher template and binds its inputs as parameters. Nothing user-supplied is
//! ever interpolated into query text.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use neo4rs::{query, Query, Row};
use serde::Serialize;
use tracing::warn;

use fundgraph_common::{
    Company, CompanyField, FundingRoundNode, InvestorField, InvestorOrg, InvestorRole, Participant,
    RoundDetail,
};

use crate::value;
use crate::GraphClient;

/// Aggregate views for dashboards and observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateQuery {
    /// Node counts and total raised.
    Overview,
    /// Rounds and dollars per stage.
    ByStage,
    /// Rounds and dollars per company HQ location.
    ByCountry,
    /// Rounds and dollars per month, for the trailing `months`.
    MonthlyTimeline { months: u32 },
    /// Most active investors by round count.
    TopInvestors { limit: u32 },
}

impl AggregateQuery {
    /// Parse the view name used in the HTTP API.
    pub fn from_view(view: &str, n: Option<u32>) -> Option<Self> {
        match view {
            "overview" => Some(Self::Overview),
            "stages" => Some(Self::ByStage),
            "countries" => Some(Self::ByCountry),
            "timeline" => Some(Self::MonthlyTimeline {
                months: n.unwrap_or(12).clamp(1, 120),
            }),
            "investors" => Some(Self::TopInvestors {
                limit: n.unwrap_or(20).clamp(1, 500),
            }),
            _ => None,
        }
    }

    fn cypher(&self) -> &'static str {
        match self {
            Self::Overview => {
                "OPTIONAL MATCH (c:Company) WITH count(c) AS companies
                 OPTIONAL MATCH (i:InvestorOrg) WITH companies, count(i) AS investors
                 OPTIONAL MATCH (a:Article) WITH companies, investors, count(a) AS articles
                 OPTIONAL MATCH (r:FundingRound)
                 RETURN companies, investors, articles,
                        count(r) AS rounds,
                        sum(coalesce(r.amount_usd, 0.0)) AS total_usd"
            }
            Self::ByStage => {
                "MATCH (r:FundingRound)
                 RETURN coalesce(r.stage, 'Unknown') AS label,
                        count(r) AS rounds,
                        sum(coalesce(r.amount_usd, 0.0)) AS total_usd
                 ORDER BY total_usd DESC"
            }
            Self::ByCountry => {
                "MATCH (c:Company)-[:RAISED]->(r:FundingRound)
                 OPTIONAL MATCH (c)-[:HQ_IN]->(l:Location)
                 RETURN coalesce(l.name, 'Unknown') AS label,
                        count(DISTINCT r) AS rounds,
                        sum(coalesce(r.amount_usd, 0.0)) AS total_usd
                 ORDER BY total_usd DESC"
            }
            Self::MonthlyTimeline { .. } => {
                "MATCH (r:FundingRound)
                 OPTIONAL MATCH (r)-[:SOURCED_FROM]->(a:Article)
                 WITH r, min(a.published_at) AS published
                 WITH r, coalesce(published, r.created_at) AS at
                 WHERE at >= datetime() - duration({months: $months})
                 WITH r, toString(at.year) + '-' + right('0' + toString(at.month), 2) AS label
                 RETURN label,
                        count(r) AS rounds,
                        sum(coalesce(r.amount_usd, 0.0)) AS total_usd
                 ORDER BY label"
            }
            Self::TopInvestors { .. } => {
                "MATCH (i:InvestorOrg)-[p:PARTICIPATED_IN]->(r:FundingRound)
                 RETURN i.name AS label,
                        count(r) AS rounds,
                        sum(coalesce(r.amount_usd, 0.0)) AS total_usd,
                        sum(CASE WHEN p.role = 'lead' THEN 1 ELSE 0 END) AS leads
                 ORDER BY rounds DESC, total_usd DESC
                 LIMIT $limit"
            }
        }
    }

    fn to_query(self) -> Query {
        let q = query(self.cypher());
        match self {
            Self::MonthlyTimeline { months } => q.param("months", i64::from(months)),
            Self::TopInvestors { limit } => q.param("limit", i64::from(limit)),
            Self::Overview | Self::ByStage | Self::ByCountry => q,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    pub companies: u64,
    pub investors: u64,
    pub rounds: u64,
    pub articles: u64,
    pub total_raised_usd: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Bucket {
    pub label: String,
    pub rounds: u64,
    pub total_usd: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leads: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum AggregateView {
    Overview(Overview),
    Buckets(Vec<Bucket>),
}

/// Single-entity lookups by identity key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityLookup {
    Company { name_key: String },
    Investor { name_key: String },
    Round { round_key: String },
}

impl EntityLookup {
    fn cypher(&self) -> &'static str {
        match self {
            Self::Company { .. } => {
                "MATCH (n:Company {name_key: $key})
                 RETURN n.name AS name, n.name_key AS name_key, n.country AS country,
                        n.description AS description, n.website AS website,
                        n.founded_year AS founded_year, n.employee_range AS employee_range,
                        n.linkedin_url AS linkedin_url, n.logo_url AS logo_url,
                        n.total_funding_usd AS total_funding_usd, n.status AS status,
                        n.locked_fields AS locked_fields"
            }
            Self::Investor { .. } => {
                "MATCH (n:InvestorOrg {name_key: $key})
                 RETURN n.name AS name, n.name_key AS name_key, n.investor_type AS investor_type,
                        n.website AS website, n.linkedin_url AS linkedin_url,
                        n.founded_year AS founded_year, n.logo_url AS logo_url, n.aum AS aum,
                        n.hq AS hq, n.stage_focus AS stage_focus, n.sector_focus AS sector_focus,
                        n.geo_focus AS geo_focus, n.check_size_min_usd AS check_size_min_usd,
                        n.check_size_max_usd AS check_size_max_usd,
                        n.locked_fields AS locked_fields"
            }
            Self::Round { .. } => {
                "MATCH (r:FundingRound {round_key: $key})
                 OPTIONAL MATCH (c:Company)-[:RAISED]->(r)
                 OPTIONAL MATCH (i:InvestorOrg)-[p:PARTICIPATED_IN]->(r)
                 WITH r, head(collect(DISTINCT c.name)) AS company_name,
                      collect(DISTINCT {name: i.name, role: p.role}) AS participants
                 OPTIONAL MATCH (r)-[:SOURCED_FROM]->(a:Article)
                 RETURN r.round_key AS round_key, r.amount_usd AS amount_usd,
                        r.currency AS currency, r.stage AS stage, r.confidence AS confidence,
                        r.created_at AS created_at, r.ingested_at AS ingested_at,
                        company_name,
                        [x IN participants WHERE x.name IS NOT NULL | x.name] AS investor_names,
                        [x IN participants WHERE x.name IS NOT NULL | x.role] AS investor_roles,
                        collect(DISTINCT a.id) AS article_ids"
            }
        }
    }

    fn key(&self) -> &str {
        match self {
            Self::Company { name_key } | Self::Investor { name_key } => name_key,
            Self::Round { round_key } => round_key,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    Company(Company),
    Investor(InvestorOrg),
    Round(RoundDetail),
}

/// Read-only wrapper for the graph.
#[derive(Clone)]
pub struct GraphReader {
    client: GraphClient,
}

impl GraphReader {
    pub fn new(client: GraphClient) -> Self {
        Self { client }
    }

    async fn rows(&self, q: Query, what: &str) -> Result<Vec<Row>> {
        let mut stream = self
            .client
            .graph
            .execute(q)
            .await
            .with_context(|| format!("{what}: execute"))?;
        let mut rows = Vec::new();
        while let Some(row) = stream.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    pub async fn aggregate(&self, view: AggregateQuery) -> Result<AggregateView> {
        let rows = self.rows(view.to_query(), "aggregate").await?;
        Ok(match view {
            AggregateQuery::Overview => {
                let overview = rows
                    .first()
                    .map(|r| Overview {
                        companies: value::count(r, "companies"),
                        investors: value::count(r, "investors"),
                        rounds: value::count(r, "rounds"),
                        articles: value::count(r, "articles"),
                        total_raised_usd: value::number_or_zero(r, "total_usd"),
                    })
                    .unwrap_or_default();
                AggregateView::Overview(overview)
            }
            AggregateQuery::TopInvestors { .. } => AggregateView::Buckets(
                rows.iter()
                    .map(|r| Bucket {
                        leads: Some(value::count(r, "leads")),
                        ..bucket(r)
                    })
                    .collect(),
            ),
            _ => AggregateView::Buckets(rows.iter().map(bucket).collect()),
        })
    }

    pub async fn lookup(&self, lookup: EntityLookup) -> Result<Option<Entity>> {
        let q = query(lookup.cypher()).param("key", lookup.key());
        let rows = self.rows(q, "lookup").await?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };
        Ok(match lookup {
            EntityLookup::Company { .. } => Some(Entity::Company(company_from_row(row))),
            EntityLookup::Investor { .. } => Some(Entity::Investor(investor_from_row(row))),
            EntityLookup::Round { .. } => round_from_row(row).map(Entity::Round),
        })
    }

    pub async fn company(&self, name_key: &str) -> Result<Option<Company>> {
        match self
            .lookup(EntityLookup::Company { name_key: name_key.to_string() })
            .await?
        {
            Some(Entity::Company(c)) => Ok(Some(c)),
            _ => Ok(None),
        }
    }

    pub async fn investor(&self, name_key: &str) -> Result<Option<InvestorOrg>> {
        match self
            .lookup(EntityLookup::Investor { name_key: name_key.to_string() })
            .await?
        {
            Some(Entity::Investor(i)) => Ok(Some(i)),
            _ => Ok(None),
        }
    }

    pub async fn round(&self, round_key: &str) -> Result<Option<RoundDetail>> {
        match self
            .lookup(EntityLookup::Round { round_key: round_key.to_string() })
            .await?
        {
            Some(Entity::Round(r)) => Ok(Some(r)),
            _ => Ok(None),
        }
    }
}

fn bucket(row: &Row) -> Bucket {
    Bucket {
        label: value::string(row, "label").unwrap_or_else(|| "Unknown".to_string()),
        rounds: value::count(row, "rounds"),
        total_usd: value::number_or_zero(row, "total_usd"),
        leads: None,
    }
}

fn parse_locks<F: std::str::FromStr + Ord>(row: &Row, entity: &str) -> BTreeSet<F> {
    value::string_list(row, "locked_fields")
        .into_iter()
        .filter_map(|f| match f.parse::<F>() {
            Ok(field) => Some(field),
            Err(_) => {
                warn!(entity, field = %f, "Ignoring unknown locked field");
                None
            }
        })
        .collect()
}

fn company_from_row(row: &Row) -> Company {
    Company {
        name: value::string(row, "name").unwrap_or_default(),
        name_key: value::string(row, "name_key").unwrap_or_default(),
        country: value::string(row, "country"),
        description: value::string(row, "description"),
        website: value::string(row, "website"),
        founded_year: value::integer(row, "founded_year"),
        employee_range: value::string(row, "employee_range"),
        linkedin_url: value::string(row, "linkedin_url"),
        logo_url: value::string(row, "logo_url"),
        total_funding_usd: value::number(row, "total_funding_usd"),
        status: value::string(row, "status"),
        locked_fields: parse_locks::<CompanyField>(row, "Company"),
    }
}

fn investor_from_row(row: &Row) -> InvestorOrg {
    InvestorOrg {
        name: value::string(row, "name").unwrap_or_default(),
        name_key: value::string(row, "name_key").unwrap_or_default(),
        investor_type: value::string(row, "investor_type"),
        website: value::string(row, "website"),
        linkedin_url: value::string(row, "linkedin_url"),
        founded_year: value::integer(row, "founded_year"),
        logo_url: value::string(row, "logo_url"),
        aum: value::number(row, "aum"),
        hq: value::string(row, "hq"),
        stage_focus: value::string_list(row, "stage_focus"),
        sector_focus: value::string_list(row, "sector_focus"),
        geo_focus: value::string_list(row, "geo_focus"),
        check_size_min_usd: value::number(row, "check_size_min_usd"),
        check_size_max_usd: value::number(row, "check_size_max_usd"),
        locked_fields: parse_locks::<InvestorField>(row, "InvestorOrg"),
    }
}

fn round_from_row(row: &Row) -> Option<RoundDetail> {
    let round_key = value::string(row, "round_key")?;
    let names = value::string_list(row, "investor_names");
    let roles = value::string_list(row, "investor_roles");
    let mut participants: Vec<Participant> = names
        .into_iter()
        .zip(roles)
        .map(|(investor_name, role)| Participant {
            investor_name,
            role: InvestorRole::parse(&role),
        })
        .collect();
    participants.sort_by(|a, b| a.investor_name.cmp(&b.investor_name));
    let mut article_ids = value::string_list(row, "article_ids");
    article_ids.sort();

    Some(RoundDetail {
        round: FundingRoundNode {
            round_key,
            amount_usd: value::number(row, "amount_usd"),
            currency: value::string(row, "currency"),
            stage: value::string(row, "stage"),
            confidence: value::number_or_zero(row, "confidence"),
            created_at: value::datetime(row, "created_at").unwrap_or_default(),
            ingested_at: value::datetime(row, "ingested_at"),
        },
        company_name: value::string(row, "company_name"),
        participants,
        article_ids,
    })
}
