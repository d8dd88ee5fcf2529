use neo4rs::query;
use tracing::{info, warn};

use crate::GraphClient;

/// Uniqueness constraints on every identity key. MERGE relies on these to stay
/// race-free under concurrent commits.
const CONSTRAINTS: &[&str] = &[
    "CREATE CONSTRAINT company_name_key IF NOT EXISTS FOR (n:Company) REQUIRE n.name_key IS UNIQUE",
    "CREATE CONSTRAINT investor_name_key IF NOT EXISTS FOR (n:InvestorOrg) REQUIRE n.name_key IS UNIQUE",
    "CREATE CONSTRAINT round_key IF NOT EXISTS FOR (n:FundingRound) REQUIRE n.round_key IS UNIQUE",
    "CREATE CONSTRAINT article_id IF NOT EXISTS FOR (n:Article) REQUIRE n.id IS UNIQUE",
    "CREATE CONSTRAINT location_name_key IF NOT EXISTS FOR (n:Location) REQUIRE n.name_key IS UNIQUE",
    "CREATE CONSTRAINT feed_id IF NOT EXISTS FOR (n:Feed) REQUIRE n.id IS UNIQUE",
];

const INDEXES: &[&str] = &[
    "CREATE INDEX round_stage IF NOT EXISTS FOR (n:FundingRound) ON (n.stage)",
    "CREATE INDEX article_published_at IF NOT EXISTS FOR (n:Article) ON (n.published_at)",
];

/// Run idempotent schema migrations: constraints, indexes.
pub async fn migrate(client: &GraphClient) -> Result<(), neo4rs::Error> {
    let g = &client.graph;

    info!("Running schema migrations...");

    for c in CONSTRAINTS {
        run_ignoring_exists(g, c).await?;
    }
    info!(count = CONSTRAINTS.len(), "Uniqueness constraints ensured");

    for idx in INDEXES {
        run_ignoring_exists(g, idx).await?;
    }
    info!(count = INDEXES.len(), "Property indexes ensured");

    // Nodes written before lock support existed.
    g.run(query(
        "MATCH (n) WHERE (n:Company OR n:InvestorOrg) AND n.locked_fields IS NULL
         SET n.locked_fields = []",
    ))
    .await?;

    info!("Schema migrations complete");
    Ok(())
}

async fn run_ignoring_exists(g: &neo4rs::Graph, cypher: &str) -> Result<(), neo4rs::Error> {
    match g.run(query(cypher)).await {
        Ok(_) => Ok(()),
        Err(e) => {
            let msg = e.to_string().to_lowercase();
            if msg.contains("already exists") || msg.contains("equivalent") {
                warn!("Already exists (skipped): {}", cypher.chars().take(80).collect::<String>());
                Ok(())
            } else {
                Err(e)
            }
        }
    }
}
