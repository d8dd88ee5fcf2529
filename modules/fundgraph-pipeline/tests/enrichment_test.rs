use std::sync::Arc;
use std::time::Duration;

use fundgraph_common::{CompanyField, CompanyPatch, EntityKind, FieldLock, PipelineSettings};
use fundgraph_pipeline::testing::{MemoryStore, MockCompletion, RecordingSink, ScriptedEnricher};
use fundgraph_pipeline::{
    enrich_stream, EnrichmentJob, EnrichmentOrchestrator, EnrichmentQueue, FundingStore,
    LlmEnricher, ProgressStage, QueueError,
};
use futures::StreamExt;

fn orchestrator(enricher: Arc<ScriptedEnricher>, store: Arc<MemoryStore>) -> EnrichmentOrchestrator {
    EnrichmentOrchestrator::new(enricher, store, &PipelineSettings::default())
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn one_failing_investor_does_not_stop_the_others() {
    let enricher = Arc::new(
        ScriptedEnricher::new()
            .fail_for("B Capital")
            .with_delay(Duration::from_millis(5)),
    );
    let store = Arc::new(MemoryStore::new());
    let sink = RecordingSink::new();

    let job = EnrichmentJob::new("Acme", names(&["A Ventures", "B Capital", "C Partners"]));
    let report = orchestrator(enricher.clone(), store.clone()).run(&job, &sink).await;

    assert_eq!(enricher.calls(), names(&["Acme", "A Ventures", "B Capital", "C Partners"]));
    assert_eq!(enricher.peak_concurrency(), 1, "lookups are sequential");

    assert_eq!(report.succeeded(), 3);
    let failures: Vec<_> = report.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].kind, EntityKind::Investor);
    assert_eq!(failures[0].name, "B Capital");

    let graph = store.snapshot();
    assert!(graph.investors.contains_key("aventures"));
    assert!(graph.investors.contains_key("cpartners"));
    assert!(!graph.investors.contains_key("bcapital"));
    assert_eq!(
        graph.companies["acme"].description.as_deref(),
        Some("Enriched profile for Acme")
    );

    let stages = sink.stages();
    assert_eq!(stages.first(), Some(&ProgressStage::Started));
    assert_eq!(stages.last(), Some(&ProgressStage::Complete));
    assert_eq!(stages.iter().filter(|s| s.is_terminal()).count(), 1);
    assert!(sink
        .events()
        .iter()
        .any(|e| e.stage == ProgressStage::EntityFailed && e.entity.as_deref() == Some("B Capital")));
}

#[tokio::test]
async fn duplicate_investors_are_enriched_once() {
    let enricher = Arc::new(ScriptedEnricher::new());
    let store = Arc::new(MemoryStore::new());
    let job = EnrichmentJob::new("Acme", names(&["Foo Ventures", "foo ventures", " ", "Bar"]));

    let report = orchestrator(enricher.clone(), store).run(&job, &RecordingSink::new()).await;
    assert_eq!(enricher.calls(), names(&["Acme", "Foo Ventures", "Bar"]));
    assert_eq!(report.outcomes.len(), 3);
}

#[tokio::test]
async fn blank_company_is_an_error_event() {
    let enricher = Arc::new(ScriptedEnricher::new());
    let sink = RecordingSink::new();
    let report = orchestrator(enricher.clone(), Arc::new(MemoryStore::new()))
        .run(&EnrichmentJob::new("  ", vec![]), &sink)
        .await;

    assert!(report.error.is_some());
    assert!(enricher.calls().is_empty());
    assert_eq!(sink.stages(), vec![ProgressStage::Error]);
}

#[tokio::test]
async fn enrichment_respects_locks() {
    let enricher = Arc::new(ScriptedEnricher::new());
    let store = Arc::new(MemoryStore::new());
    store
        .upsert_company(&CompanyPatch {
            description: Some("Hand-written".to_string()),
            ..CompanyPatch::named("Acme")
        })
        .await
        .unwrap();
    store
        .set_field_lock(FieldLock::Company(CompanyField::Description), "acme", true)
        .await
        .unwrap();

    let orch = orchestrator(enricher, store.clone());
    let job = EnrichmentJob::new("Acme", vec![]);
    orch.run(&job, &RecordingSink::new()).await;

    let company = &store.snapshot().companies["acme"];
    assert_eq!(company.description.as_deref(), Some("Hand-written"));
    assert_eq!(company.website.as_deref(), Some("https://acme.example"));

    store
        .set_field_lock(FieldLock::Company(CompanyField::Description), "acme", false)
        .await
        .unwrap();
    orch.run(&job, &RecordingSink::new()).await;
    assert_eq!(
        store.snapshot().companies["acme"].description.as_deref(),
        Some("Enriched profile for Acme")
    );
}

#[tokio::test]
async fn llm_enricher_writes_parsed_profiles() {
    let completion = Arc::new(
        MockCompletion::new()
            .on_contains(
                "startup \"Acme\"",
                r#"{"description": "Rockets", "website": "unknown", "foundedYear": 2019}"#,
            )
            .on_contains("investor \"Foo Ventures\"", r#"{"type": "vc", "stageFocus": ["seed"]}"#)
            .failing_on("investor \"Bar Capital\"", "rate limited"),
    );
    let store = Arc::new(MemoryStore::new());
    let orch = EnrichmentOrchestrator::new(
        Arc::new(LlmEnricher::new(completion)),
        store.clone(),
        &PipelineSettings::default(),
    );

    let report = orch
        .run(
            &EnrichmentJob::new("Acme", names(&["Foo Ventures", "Bar Capital"])),
            &RecordingSink::new(),
        )
        .await;
    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.failures().count(), 1);

    let graph = store.snapshot();
    let acme = &graph.companies["acme"];
    assert_eq!(acme.description.as_deref(), Some("Rockets"));
    assert_eq!(acme.website, None);
    assert_eq!(acme.founded_year, Some(2019));
    let foo = &graph.investors["fooventures"];
    assert_eq!(foo.investor_type.as_deref(), Some("vc"));
    assert_eq!(foo.stage_focus, names(&["seed"]));
}

#[tokio::test]
async fn queue_drains_submitted_jobs() {
    let store = Arc::new(MemoryStore::new());
    let orch = Arc::new(orchestrator(Arc::new(ScriptedEnricher::new()), store.clone()));
    let (queue, worker) = EnrichmentQueue::start(orch, 4);

    queue.submit(EnrichmentJob::new("Acme", names(&["Foo Ventures"]))).unwrap();
    queue.submit(EnrichmentJob::new("Globex", vec![])).unwrap();
    drop(queue);
    worker.await.unwrap();

    let graph = store.snapshot();
    assert!(graph.companies.contains_key("acme"));
    assert!(graph.companies.contains_key("globex"));
    assert!(graph.investors.contains_key("fooventures"));
}

#[tokio::test]
async fn full_queue_rejects_without_waiting() {
    let enricher = Arc::new(ScriptedEnricher::new().with_delay(Duration::from_millis(50)));
    let orch = Arc::new(orchestrator(enricher, Arc::new(MemoryStore::new())));
    let (queue, _worker) = EnrichmentQueue::start(orch, 1);

    // The worker has not been polled yet, so the first job fills the buffer.
    queue.submit(EnrichmentJob::new("Acme", vec![])).unwrap();
    match queue.submit(EnrichmentJob::new("Globex", vec![])) {
        Err(QueueError::QueueFull(job)) => assert_eq!(job.company_name, "Globex"),
        other => panic!("expected QueueFull, got {other:?}"),
    }
}

#[tokio::test]
async fn stream_ends_with_the_terminal_event() {
    let orch = Arc::new(orchestrator(
        Arc::new(ScriptedEnricher::new().fail_for("Bar Capital")),
        Arc::new(MemoryStore::new()),
    ));
    let events: Vec<_> = enrich_stream(orch, EnrichmentJob::new("Acme", names(&["Bar Capital"])))
        .collect()
        .await;

    assert_eq!(events.first().map(|e| e.stage), Some(ProgressStage::Started));
    let last = events.last().unwrap();
    assert_eq!(last.stage, ProgressStage::Complete);
    assert_eq!(last.message.as_deref(), Some("1 enriched, 1 failed"));
    assert_eq!(events.iter().filter(|e| e.stage.is_terminal()).count(), 1);
}

#[tokio::test]
async fn stream_for_blank_company_is_a_single_error() {
    let orch = Arc::new(orchestrator(
        Arc::new(ScriptedEnricher::new()),
        Arc::new(MemoryStore::new()),
    ));
    let stages: Vec<_> = enrich_stream(orch, EnrichmentJob::new("", vec![]))
        .map(|e| e.stage)
        .collect()
        .await;
    assert_eq!(stages, vec![ProgressStage::Error]);
}

#[tokio::test]
async fn hung_write_fails_that_entity_and_moves_on() {
    let store = Arc::new(MemoryStore::new());
    store.hang_on("upsert_investor", "bcapital");
    let settings = PipelineSettings {
        upsert_timeout: Duration::from_millis(30),
        upsert_retries: 2,
        retry_backoff: Duration::from_millis(1),
        ..PipelineSettings::default()
    };
    let orch = EnrichmentOrchestrator::new(Arc::new(ScriptedEnricher::new()), store.clone(), &settings);

    let job = EnrichmentJob::new("Acme", names(&["A Ventures", "B Capital", "C Partners"]));
    let report = tokio::time::timeout(Duration::from_secs(5), orch.run(&job, &RecordingSink::new()))
        .await
        .expect("a hung write must not stall the job");

    assert_eq!(report.succeeded(), 3);
    let failures: Vec<_> = report.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].name, "B Capital");
    let error = failures[0].error.as_deref().unwrap_or_default();
    assert!(error.contains("timed out"), "{error}");

    let graph = store.snapshot();
    assert!(graph.investors.contains_key("aventures"));
    assert!(graph.investors.contains_key("cpartners"));
    assert!(!graph.investors.contains_key("bcapital"));
}

#[tokio::test]
async fn panicking_job_does_not_stop_the_worker() {
    let enricher = Arc::new(ScriptedEnricher::new().panic_for("Boom"));
    let store = Arc::new(MemoryStore::new());
    let orch = Arc::new(orchestrator(enricher.clone(), store.clone()));
    let (queue, worker) = EnrichmentQueue::start(orch, 4);

    queue.submit(EnrichmentJob::new("Boom", vec![])).unwrap();
    queue.submit(EnrichmentJob::new("Acme", vec![])).unwrap();
    drop(queue);
    worker.await.unwrap();

    assert_eq!(enricher.calls(), names(&["Boom", "Acme"]));
    let graph = store.snapshot();
    assert!(graph.companies.contains_key("acme"));
    assert!(!graph.companies.contains_key("boom"));
}
