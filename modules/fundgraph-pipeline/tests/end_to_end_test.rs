//! Articles in, graph out: extraction, grouping, merge and commit wired
//! together over the mocks.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use fundgraph_common::{InvestorRole, PipelineSettings, RawExtraction, ResolvedRound};
use fundgraph_pipeline::testing::{article, source_doc, MemoryStore, MockCompletion};
use fundgraph_pipeline::{
    group_mentions, merge_extractions, mention_from_extraction, ExtractionMerger, FundingStore,
    RoundResolver,
};

const FIRST_REPLY: &str = r#"{
  "isFundingArticle": true,
  "companyName": "Acme",
  "amount": 10000000,
  "currency": "USD",
  "stage": "Series A",
  "investors": ["Foo Ventures"],
  "leadInvestor": "Foo Ventures",
  "country": "United States",
  "confidence": 0.8
}"#;

const SECOND_REPLY: &str = r#"```json
{"companyName": "ACME", "stage": "series a", "investors": "Foo Ventures, Bar Capital", "confidence": "0.9"}
```"#;

fn settings() -> PipelineSettings {
    PipelineSettings {
        extraction_timeout: Duration::from_millis(200),
        retry_backoff: Duration::from_millis(1),
        ..PipelineSettings::default()
    }
}

#[tokio::test]
async fn two_reports_of_one_raise_become_one_round() {
    let completion = Arc::new(
        MockCompletion::new()
            .on_contains("ACME-WIRE", FIRST_REPLY)
            .on_contains("ACME-DAILY", SECOND_REPLY),
    );
    let merger = ExtractionMerger::new(completion.clone(), &settings());

    let day_one = Utc.with_ymd_and_hms(2025, 4, 1, 8, 0, 0).unwrap();
    let docs = [
        source_doc(article("a1", "techwire", Some(day_one)), "ACME-WIRE: Acme raises $10M."),
        source_doc(
            article("a2", "startupdaily", Some(day_one + chrono::Duration::days(2))),
            "ACME-DAILY: Acme closes its Series A with Bar Capital joining.",
        ),
    ];

    let mut mentions = Vec::new();
    for doc in &docs {
        let extraction = merger.extract(std::slice::from_ref(doc)).await.unwrap();
        mentions.push(mention_from_extraction(&doc.article, &extraction, Utc::now()));
    }
    assert_eq!(completion.calls().len(), 2);

    let rounds = group_mentions(&mentions);
    assert_eq!(rounds.len(), 1);
    let round = &rounds[0];
    assert_eq!(round.round_key, format!("acme_seriesa_{}", day_one.timestamp_millis()));
    assert_eq!(round.company_name, "ACME", "taken from the most confident mention");
    assert_eq!(round.amount_usd, Some(10_000_000.0));
    assert_eq!(round.lead_investor.as_deref(), Some("Foo Ventures"));
    assert_eq!(round.all_investors, vec!["Foo Ventures".to_string(), "Bar Capital".to_string()]);
    assert_eq!(round.max_confidence, 0.9);
    assert_eq!(round.source_count(), 2);

    let store = Arc::new(MemoryStore::new());
    let resolver = RoundResolver::new(store.clone(), &settings());
    let articles: Vec<_> = docs.iter().map(|d| d.article.clone()).collect();
    let summary = resolver
        .commit_round(&ResolvedRound::from(round), &articles)
        .await
        .unwrap();
    assert_eq!(summary.round_key, round.round_key);

    let detail = store.round(&round.round_key).await.unwrap().unwrap();
    assert_eq!(detail.company_name.as_deref(), Some("ACME"));
    assert_eq!(detail.article_ids, vec!["a1".to_string(), "a2".to_string()]);
    let roles: Vec<_> = detail
        .participants
        .iter()
        .map(|p| (p.investor_name.as_str(), p.role))
        .collect();
    assert_eq!(
        roles,
        vec![("Bar Capital", InvestorRole::Participant), ("Foo Ventures", InvestorRole::Lead)]
    );
}

#[tokio::test]
async fn roundup_article_yields_no_event() {
    let completion = Arc::new(MockCompletion::new());
    let merger = ExtractionMerger::new(completion, &settings());
    let doc = source_doc(
        article("r1", "techwire", None),
        "2025's Top 10 Funded Startups: a look back at the year's biggest raises.",
    );
    assert!(merger.extract(&[doc]).await.is_none());
}

#[tokio::test]
async fn empty_source_list_skips_the_model() {
    let completion = Arc::new(MockCompletion::replying(FIRST_REPLY));
    let merger = ExtractionMerger::new(completion.clone(), &settings());
    assert!(merger.extract(&[]).await.is_none());
    assert!(completion.calls().is_empty());
}

#[tokio::test]
async fn hung_or_failing_model_yields_no_event() {
    let completion = Arc::new(
        MockCompletion::new()
            .hanging_on("SLOW")
            .failing_on("BROKEN", "503 from upstream"),
    );
    let merger = ExtractionMerger::new(completion, &settings());

    let slow = source_doc(article("s1", "techwire", None), "SLOW body");
    assert!(merger.extract(&[slow]).await.is_none());

    let broken = source_doc(article("b1", "techwire", None), "BROKEN body");
    assert!(merger.extract(&[broken]).await.is_none());
}

#[tokio::test]
async fn multi_source_prompt_is_budgeted_and_numbered() {
    let completion = Arc::new(MockCompletion::replying(FIRST_REPLY));
    let merger = ExtractionMerger::new(
        completion.clone(),
        &PipelineSettings {
            max_prompt_chars: 100,
            ..settings()
        },
    );
    let docs = [
        source_doc(article("a1", "techwire", None), &"x".repeat(300)),
        source_doc(article("a2", "startupdaily", None), &"y".repeat(300)),
    ];

    let extraction = merger.extract(&docs).await.unwrap();
    assert_eq!(extraction.signals, vec!["llm_extraction", "multi_source_2"]);
    assert_eq!(extraction.source_article_ref.as_deref(), Some("a1"));

    let (system, user) = completion.calls().remove(0);
    assert!(system.contains("isFundingArticle"), "schema is part of the system prompt");
    assert!(user.contains("--- SOURCE 1/2 ---"));
    assert!(user.contains("--- SOURCE 2/2 ---"));
    assert!(user.contains(&"x".repeat(50)));
    assert!(!user.contains(&"x".repeat(51)));
}

#[tokio::test]
async fn weaker_re_extraction_only_adds_information() {
    let completion = Arc::new(MockCompletion::replying(FIRST_REPLY));
    let merger = ExtractionMerger::new(completion, &settings());
    let doc = source_doc(
        article("a1", "techwire", Some(Utc.with_ymd_and_hms(2025, 4, 1, 8, 0, 0).unwrap())),
        "Acme raises $10M",
    );
    let extraction = merger.extract(std::slice::from_ref(&doc)).await.unwrap();
    let existing = group_mentions(&[mention_from_extraction(&doc.article, &extraction, Utc::now())])
        .remove(0);

    let fresh = RawExtraction {
        company_name: "Acme".into(),
        amount: None,
        currency: None,
        amount_usd: Some(12_000_000.0),
        stage: Some("Series B".into()),
        investors: vec!["Baz Partners".into()],
        lead_investor: None,
        country: None,
        confidence: 0.4,
        source_article_ref: None,
        raw_excerpt: None,
        signals: vec![],
    };
    let merged = merge_extractions(&existing, &fresh);

    assert_eq!(merged.round_key, existing.round_key);
    assert_eq!(merged.max_confidence, 0.8);
    assert_eq!(merged.amount_usd, Some(10_000_000.0));
    assert_eq!(merged.stage.as_deref(), Some("Series A"));
    assert_eq!(merged.lead_investor.as_deref(), Some("Foo Ventures"));
    assert_eq!(
        merged.all_investors,
        vec!["Foo Ventures".to_string(), "Baz Partners".to_string()]
    );
}

#[tokio::test]
async fn re_extraction_folds_into_the_existing_round() {
    let day_one = Utc.with_ymd_and_hms(2025, 4, 1, 8, 0, 0).unwrap();
    let first = source_doc(article("a1", "techwire", Some(day_one)), "ACME-WIRE: Acme raises $10M.");
    let merger = ExtractionMerger::new(Arc::new(MockCompletion::replying(FIRST_REPLY)), &settings());
    let extraction = merger.extract(std::slice::from_ref(&first)).await.unwrap();
    let existing = group_mentions(&[mention_from_extraction(&first.article, &extraction, Utc::now())])
        .remove(0);

    let completion = Arc::new(
        MockCompletion::new()
            .on_contains("ACME-DAILY", SECOND_REPLY)
            .on_contains(
                "GLOBEX",
                r#"{"isFundingArticle": true, "companyName": "Globex", "confidence": 0.9}"#,
            ),
    );
    let merger = ExtractionMerger::new(completion, &settings());

    let daily = source_doc(article("a2", "startupdaily", Some(day_one)), "ACME-DAILY: Bar Capital joins.");
    let merged = merger.re_extract(&existing, &[daily]).await.unwrap();
    assert_eq!(merged.round_key, existing.round_key);
    assert_eq!(merged.max_confidence, 0.9);
    assert_eq!(
        merged.all_investors,
        vec!["Foo Ventures".to_string(), "Bar Capital".to_string()]
    );

    let other = source_doc(article("a3", "techwire", Some(day_one)), "GLOBEX raises.");
    assert!(merger.re_extract(&existing, &[other]).await.is_none());
}
