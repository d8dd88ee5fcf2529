//! Integration tests for the MERGE-based writer and the reader views.
//!
//! Requirements: Docker (for Neo4j via testcontainers)
//!
//! Run with: cargo test -p fundgraph-graph --features test-utils --test graph_sync_test

#![cfg(feature = "test-utils")]

use chrono::{TimeZone, Utc};
use fundgraph_common::{
    Article, CompanyField, CompanyPatch, FieldLock, InvestorPatch, InvestorRole, RoundUpsert,
    Upserted,
};
use fundgraph_graph::{
    query, AggregateQuery, AggregateView, Bucket, GraphClient, GraphReader, GraphWriter,
};

async fn setup() -> (impl std::any::Any, GraphClient) {
    fundgraph_graph::testutil::neo4j_container().await
}

fn round(key: &str, amount: f64, confidence: f64) -> RoundUpsert {
    RoundUpsert {
        round_key: key.to_string(),
        amount_usd: Some(amount),
        currency: Some("USD".to_string()),
        stage: Some("Series A".to_string()),
        confidence,
        full_reextract: false,
        now: Utc::now(),
    }
}

async fn feed_counts(client: &GraphClient, id: &str) -> Option<(i64, i64)> {
    let q = query("MATCH (f:Feed {id: $id}) RETURN f.article_count AS articles, f.round_count AS rounds")
        .param("id", id);
    let mut rows = client.inner().execute(q).await.unwrap();
    let row = rows.next().await.unwrap()?;
    Some((row.get::<i64>("articles").unwrap(), row.get::<i64>("rounds").unwrap()))
}

async fn by_country(reader: &GraphReader) -> Vec<Bucket> {
    match reader.aggregate(AggregateQuery::ByCountry).await.unwrap() {
        AggregateView::Buckets(buckets) => buckets,
        other => panic!("expected buckets, got {other:?}"),
    }
}

fn article(id: &str, feed: &str) -> Article {
    Article {
        id: id.to_string(),
        url: format!("https://news.example/{id}"),
        title: format!("Article {id}"),
        published_at: Some(Utc.with_ymd_and_hms(2025, 1, 10, 9, 0, 0).unwrap()),
        author: None,
        feed_id: Some(feed.to_string()),
        feed_title: Some("Example Feed".to_string()),
    }
}

#[tokio::test]
async fn company_upsert_creates_once_and_merges_after() {
    let (_c, client) = setup().await;
    let writer = GraphWriter::new(client.clone());
    let reader = GraphReader::new(client);

    let mut patch = CompanyPatch::named("Acme AI");
    patch.country = Some("US".to_string());
    assert_eq!(writer.upsert_company(&patch).await.unwrap(), Upserted::Created);

    let again = CompanyPatch::named("acme-ai");
    assert_eq!(writer.upsert_company(&again).await.unwrap(), Upserted::Matched);

    let company = reader.company("acmeai").await.unwrap().expect("company exists");
    assert_eq!(company.name, "Acme AI");
    assert_eq!(company.country.as_deref(), Some("US"), "null must not overwrite");
}

#[tokio::test]
async fn locked_field_survives_incoming_value() {
    let (_c, client) = setup().await;
    let writer = GraphWriter::new(client.clone());
    let reader = GraphReader::new(client);

    let mut patch = CompanyPatch::named("Acme AI");
    patch.description = Some("Curated by hand".to_string());
    writer.upsert_company(&patch).await.unwrap();

    let lock = FieldLock::Company(CompanyField::Description);
    assert!(writer.set_field_lock(lock, "acmeai", true).await.unwrap());
    // Locking twice keeps a single entry.
    assert!(writer.set_field_lock(lock, "acmeai", true).await.unwrap());

    patch.description = Some("Scraped blurb".to_string());
    writer.upsert_company(&patch).await.unwrap();

    let company = reader.company("acmeai").await.unwrap().unwrap();
    assert_eq!(company.description.as_deref(), Some("Curated by hand"));
    assert_eq!(company.locked_fields.len(), 1);

    assert!(!writer.set_field_lock(lock, "nobody", true).await.unwrap());
}

#[tokio::test]
async fn round_edges_are_idempotent_and_lead_is_sticky() {
    let (_c, client) = setup().await;
    let writer = GraphWriter::new(client.clone());
    let reader = GraphReader::new(client);

    writer.upsert_company(&CompanyPatch::named("Acme AI")).await.unwrap();
    writer.upsert_investor(&InvestorPatch::named("Sequoia")).await.unwrap();
    assert_eq!(
        writer.upsert_round(&round("acmeai_seriesa_1", 10e6, 0.9)).await.unwrap(),
        Upserted::Created
    );
    // Lower confidence never lowers the stored value.
    assert_eq!(
        writer.upsert_round(&round("acmeai_seriesa_1", 10e6, 0.5)).await.unwrap(),
        Upserted::Matched
    );

    assert_eq!(
        writer.link_company_round("acmeai", "acmeai_seriesa_1").await.unwrap(),
        Upserted::Created
    );
    assert_eq!(
        writer.link_company_round("acmeai", "acmeai_seriesa_1").await.unwrap(),
        Upserted::Matched
    );

    writer
        .link_investor_round("sequoia", "acmeai_seriesa_1", InvestorRole::Lead)
        .await
        .unwrap();
    writer
        .link_investor_round("sequoia", "acmeai_seriesa_1", InvestorRole::Participant)
        .await
        .unwrap();

    let first = writer
        .link_round_article("acmeai_seriesa_1", &article("a1", "feed-1"))
        .await
        .unwrap();
    assert_eq!(first.article, Upserted::Created);
    let second = writer
        .link_round_article("acmeai_seriesa_1", &article("a1", "feed-1"))
        .await
        .unwrap();
    assert_eq!(second.edge, Upserted::Matched);

    let total = writer.refresh_company_total("acmeai").await.unwrap();
    assert_eq!(total, 10e6);

    let detail = reader.round("acmeai_seriesa_1").await.unwrap().unwrap();
    assert_eq!(detail.round.confidence, 0.9);
    assert_eq!(detail.company_name.as_deref(), Some("Acme AI"));
    assert_eq!(detail.participants.len(), 1);
    assert_eq!(detail.participants[0].role, InvestorRole::Lead);
    assert_eq!(detail.article_ids, vec!["a1".to_string()]);
}

#[tokio::test]
async fn clear_removes_rounds_and_keeps_entities() {
    let (_c, client) = setup().await;
    let writer = GraphWriter::new(client.clone());
    let reader = GraphReader::new(client);

    writer.upsert_company(&CompanyPatch::named("Acme AI")).await.unwrap();
    writer.upsert_round(&round("r1", 5e6, 0.8)).await.unwrap();
    writer.link_company_round("acmeai", "r1").await.unwrap();
    writer.link_round_article("r1", &article("a1", "feed-1")).await.unwrap();
    writer.refresh_company_total("acmeai").await.unwrap();

    let stats = writer.clear_funding_data().await.unwrap();
    assert_eq!(stats.rounds_deleted, 1);
    assert_eq!(stats.articles_deleted, 1);
    assert_eq!(stats.feeds_reset, 1);

    let AggregateView::Overview(overview) = reader.aggregate(AggregateQuery::Overview).await.unwrap()
    else {
        panic!("expected overview");
    };
    assert_eq!(overview.rounds, 0);
    assert_eq!(overview.companies, 1);
    assert_eq!(overview.total_raised_usd, 0.0);
}

#[tokio::test]
async fn source_link_and_feed_counters_land_together() {
    let (_c, client) = setup().await;
    let writer = GraphWriter::new(client.clone());
    let reader = GraphReader::new(client.clone());

    // Unknown round: the statement fails as a whole, nothing is counted.
    assert!(writer.link_round_article("missing", &article("a1", "feed-1")).await.is_err());
    assert_eq!(feed_counts(&client, "feed-1").await, None);
    let AggregateView::Overview(overview) = reader.aggregate(AggregateQuery::Overview).await.unwrap()
    else {
        panic!("expected overview");
    };
    assert_eq!(overview.articles, 0);

    writer.upsert_round(&round("r1", 5e6, 0.8)).await.unwrap();
    writer.upsert_round(&round("r2", 7e6, 0.8)).await.unwrap();
    writer.link_round_article("r1", &article("a1", "feed-1")).await.unwrap();
    assert_eq!(feed_counts(&client, "feed-1").await, Some((1, 1)));

    // Repeating a link that already landed changes nothing.
    let again = writer.link_round_article("r1", &article("a1", "feed-1")).await.unwrap();
    assert_eq!(again.article, Upserted::Matched);
    assert_eq!(again.edge, Upserted::Matched);
    assert_eq!(feed_counts(&client, "feed-1").await, Some((1, 1)));

    // Same article, second round: only the round counter moves.
    writer.link_round_article("r2", &article("a1", "feed-1")).await.unwrap();
    assert_eq!(feed_counts(&client, "feed-1").await, Some((1, 2)));
}

#[tokio::test]
async fn hq_location_is_replaced_unless_country_locked() {
    let (_c, client) = setup().await;
    let writer = GraphWriter::new(client.clone());
    let reader = GraphReader::new(client);

    writer.upsert_company(&CompanyPatch::named("Acme AI")).await.unwrap();
    writer.upsert_round(&round("r1", 5e6, 0.8)).await.unwrap();
    writer.link_company_round("acmeai", "r1").await.unwrap();

    writer.upsert_location("United States").await.unwrap();
    assert_eq!(
        writer.link_company_location("acmeai", "United States").await.unwrap(),
        Some(Upserted::Created)
    );
    writer.upsert_location("Germany").await.unwrap();
    assert_eq!(
        writer.link_company_location("acmeai", "Germany").await.unwrap(),
        Some(Upserted::Created)
    );

    let buckets = by_country(&reader).await;
    assert_eq!(buckets.len(), 1, "funding counted under one country: {buckets:?}");
    assert_eq!(buckets[0].label, "Germany");
    assert_eq!(buckets[0].total_usd, 5e6);

    let lock = FieldLock::Company(CompanyField::Country);
    assert!(writer.set_field_lock(lock, "acmeai", true).await.unwrap());
    writer.upsert_location("France").await.unwrap();
    assert_eq!(writer.link_company_location("acmeai", "France").await.unwrap(), None);

    let buckets = by_country(&reader).await;
    assert_eq!(buckets.len(), 1);
    assert_eq!(buckets[0].label, "Germany");
}
