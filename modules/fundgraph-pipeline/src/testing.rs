// Test mocks for the funding pipeline.
//
// One mock per trait boundary:
// - MockCompletion (CompletionService): prompt-substring → canned reply
// - MemoryStore (FundingStore): stateful in-memory graph with failure injection
// - ScriptedEnricher (Enricher): deterministic patches, per-entity failures
// - RecordingSink (ProgressSink): captures progress events
//
// Plus helpers for constructing articles, source documents and mentions.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use fundgraph_common::merge::{apply_company_patch, apply_investor_patch};
use fundgraph_common::{
    normalize_company_key, Article, ClearStats, Company, CompanyField, CompanyPatch, FieldLock,
    FundingMention, FundingRoundNode, InvestorOrg, InvestorPatch, InvestorRole, Participant,
    RoundDetail, RoundUpsert, SourceDocument, SourceLink, Upserted,
};

use crate::enrichment::{Enricher, ProgressEvent, ProgressSink, ProgressStage};
use crate::traits::{CompletionService, FundingStore};

// ---------------------------------------------------------------------------
// MockCompletion
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum MockReply {
    Text(String),
    Fail(String),
    /// Never completes; exercises caller timeouts.
    Hang,
}

/// Replies chosen by the first rule whose needle occurs in the user prompt.
/// Builder pattern: `.on_contains()`, `.failing_on()`, `.hanging_on()`.
pub struct MockCompletion {
    rules: Vec<(String, MockReply)>,
    fallback: MockReply,
    calls: Mutex<Vec<(String, String)>>,
}

impl Default for MockCompletion {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCompletion {
    /// Unmatched prompts get a "not a funding article" reply.
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            fallback: MockReply::Text(r#"{"isFundingArticle": false}"#.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every prompt gets `reply`.
    pub fn replying(reply: impl Into<String>) -> Self {
        Self {
            fallback: MockReply::Text(reply.into()),
            ..Self::new()
        }
    }

    pub fn on_contains(mut self, needle: &str, reply: impl Into<String>) -> Self {
        self.rules
            .push((needle.to_string(), MockReply::Text(reply.into())));
        self
    }

    pub fn failing_on(mut self, needle: &str, message: &str) -> Self {
        self.rules
            .push((needle.to_string(), MockReply::Fail(message.to_string())));
        self
    }

    pub fn hanging_on(mut self, needle: &str) -> Self {
        self.rules.push((needle.to_string(), MockReply::Hang));
        self
    }

    /// (system, user) pairs in call order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionService for MockCompletion {
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        self.calls
            .lock()
            .unwrap()
            .push((system.to_string(), user.to_string()));
        let reply = self
            .rules
            .iter()
            .find(|(needle, _)| user.contains(needle.as_str()))
            .map(|(_, r)| r.clone())
            .unwrap_or_else(|| self.fallback.clone());
        match reply {
            MockReply::Text(t) => Ok(t),
            MockReply::Fail(m) => bail!("MockCompletion: {m}"),
            MockReply::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedCounters {
    pub article_count: u64,
    pub round_count: u64,
}

/// Full graph state. Two snapshots compare equal iff the graphs are identical.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphSnapshot {
    pub companies: BTreeMap<String, Company>,
    pub investors: BTreeMap<String, InvestorOrg>,
    pub locations: BTreeMap<String, String>,
    pub rounds: BTreeMap<String, FundingRoundNode>,
    pub articles: BTreeMap<String, Article>,
    pub feeds: BTreeMap<String, FeedCounters>,
    /// (company_key, location_key)
    pub hq_in: BTreeSet<(String, String)>,
    /// (company_key, round_key)
    pub raised: BTreeSet<(String, String)>,
    /// (investor_key, round_key) → role
    pub participated_in: BTreeMap<(String, String), InvestorRole>,
    /// (round_key, article_id)
    pub sourced_from: BTreeSet<(String, String)>,
}

/// Stateful in-memory `FundingStore` applying the same merge and lock rules
/// as the Neo4j writer. Failures can be injected per operation and key:
/// rejected before the write, lost after the write landed, or a call that
/// never returns.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<GraphSnapshot>,
    failures: Mutex<HashMap<(String, String), u32>>,
    lost_acks: Mutex<HashMap<(String, String), u32>>,
    hanging: Mutex<HashSet<(String, String)>>,
    ops: Mutex<Vec<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `times` calls of `op` for `key` fail. `op` is the trait
    /// method name, `key` its first key argument (normalized name, round key,
    /// article id).
    pub fn fail_next(&self, op: &str, key: &str, times: u32) {
        self.failures
            .lock()
            .unwrap()
            .insert((op.to_string(), key.to_string()), times);
    }

    pub fn fail_always(&self, op: &str, key: &str) {
        self.fail_next(op, key, u32::MAX);
    }

    /// The next `times` calls apply their write and then report an error, as
    /// when a connection drops before the reply arrives. Honoured by
    /// `link_round_article`.
    pub fn lose_ack_next(&self, op: &str, key: &str, times: u32) {
        self.lost_acks
            .lock()
            .unwrap()
            .insert((op.to_string(), key.to_string()), times);
    }

    /// Every call of `op` for `key` waits forever. Honoured by the entity
    /// upserts.
    pub fn hang_on(&self, op: &str, key: &str) {
        self.hanging
            .lock()
            .unwrap()
            .insert((op.to_string(), key.to_string()));
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        self.state.lock().unwrap().clone()
    }

    /// Every call as `op:key`, failed attempts included.
    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }

    pub fn op_count(&self, op: &str) -> usize {
        let prefix = format!("{op}:");
        self.ops().iter().filter(|o| o.starts_with(&prefix)).count()
    }

    fn enter(&self, op: &str, key: &str) -> Result<MutexGuard<'_, GraphSnapshot>> {
        self.ops.lock().unwrap().push(format!("{op}:{key}"));
        let mut failures = self.failures.lock().unwrap();
        if let Some(remaining) = failures.get_mut(&(op.to_string(), key.to_string())) {
            if *remaining > 0 {
                *remaining = remaining.saturating_sub(1);
                bail!("MemoryStore: injected {op} failure for {key}");
            }
        }
        Ok(self.state.lock().unwrap())
    }

    async fn gate(&self, op: &str, key: &str) {
        let hangs = self
            .hanging
            .lock()
            .unwrap()
            .contains(&(op.to_string(), key.to_string()));
        if hangs {
            std::future::pending::<()>().await;
        }
    }

    fn ack(&self, op: &str, key: &str) -> Result<()> {
        let mut lost = self.lost_acks.lock().unwrap();
        if let Some(remaining) = lost.get_mut(&(op.to_string(), key.to_string())) {
            if *remaining > 0 {
                *remaining -= 1;
                bail!("MemoryStore: {op} reply lost for {key}");
            }
        }
        Ok(())
    }
}

fn round_detail(s: &GraphSnapshot, round: &FundingRoundNode) -> RoundDetail {
    let key = &round.round_key;
    let company_name = s
        .raised
        .iter()
        .find(|(_, r)| r == key)
        .and_then(|(c, _)| s.companies.get(c))
        .map(|c| c.name.clone());
    let mut participants: Vec<Participant> = s
        .participated_in
        .iter()
        .filter(|((_, r), _)| r == key)
        .filter_map(|((i, _), role)| {
            s.investors.get(i).map(|inv| Participant {
                investor_name: inv.name.clone(),
                role: *role,
            })
        })
        .collect();
    participants.sort_by(|a, b| a.investor_name.cmp(&b.investor_name));
    let article_ids = s
        .sourced_from
        .iter()
        .filter(|(r, _)| r == key)
        .map(|(_, a)| a.clone())
        .collect();
    RoundDetail {
        round: round.clone(),
        company_name,
        participants,
        article_ids,
    }
}

#[async_trait]
impl FundingStore for MemoryStore {
    async fn upsert_company(&self, patch: &CompanyPatch) -> Result<Upserted> {
        let key = patch.name_key();
        self.gate("upsert_company", &key).await;
        let mut s = self.enter("upsert_company", &key)?;
        let existing = s.companies.get(&key);
        let created = existing.is_none();
        let (company, _) = apply_company_patch(existing, patch);
        s.companies.insert(key, company);
        Ok(Upserted::from_created(created))
    }

    async fn upsert_investor(&self, patch: &InvestorPatch) -> Result<Upserted> {
        let key = patch.name_key();
        self.gate("upsert_investor", &key).await;
        let mut s = self.enter("upsert_investor", &key)?;
        let existing = s.investors.get(&key);
        let created = existing.is_none();
        let (investor, _) = apply_investor_patch(existing, patch);
        s.investors.insert(key, investor);
        Ok(Upserted::from_created(created))
    }

    async fn upsert_location(&self, name: &str) -> Result<Upserted> {
        let key = normalize_company_key(name);
        let mut s = self.enter("upsert_location", &key)?;
        if s.locations.contains_key(&key) {
            return Ok(Upserted::Matched);
        }
        s.locations.insert(key, name.trim().to_string());
        Ok(Upserted::Created)
    }

    async fn upsert_round(&self, round: &RoundUpsert) -> Result<Upserted> {
        let mut s = self.enter("upsert_round", &round.round_key)?;
        match s.rounds.get_mut(&round.round_key) {
            None => {
                s.rounds.insert(
                    round.round_key.clone(),
                    FundingRoundNode {
                        round_key: round.round_key.clone(),
                        amount_usd: round.amount_usd,
                        currency: round.currency.clone(),
                        stage: round.stage.clone(),
                        confidence: round.confidence,
                        created_at: round.now,
                        ingested_at: Some(round.now),
                    },
                );
                Ok(Upserted::Created)
            }
            Some(r) => {
                if round.amount_usd.is_some() {
                    r.amount_usd = round.amount_usd;
                }
                if round.currency.is_some() {
                    r.currency = round.currency.clone();
                }
                if round.stage.is_some() {
                    r.stage = round.stage.clone();
                }
                if round.full_reextract || round.confidence > r.confidence {
                    r.confidence = round.confidence;
                }
                r.ingested_at.get_or_insert(round.now);
                Ok(Upserted::Matched)
            }
        }
    }

    async fn link_company_location(&self, company_key: &str, location: &str) -> Result<Option<Upserted>> {
        let mut s = self.enter("link_company_location", company_key)?;
        let location_key = normalize_company_key(location);
        let Some(company) = s.companies.get(company_key) else {
            bail!("MemoryStore: HQ_IN company missing: {company_key}");
        };
        if !s.locations.contains_key(&location_key) {
            bail!("MemoryStore: HQ_IN location missing: {location_key}");
        }
        if company.locked_fields.contains(&CompanyField::Country) {
            return Ok(None);
        }
        s.hq_in.retain(|(c, l)| c != company_key || *l == location_key);
        let created = s.hq_in.insert((company_key.to_string(), location_key));
        Ok(Some(Upserted::from_created(created)))
    }

    async fn link_company_round(&self, company_key: &str, round_key: &str) -> Result<Upserted> {
        let mut s = self.enter("link_company_round", company_key)?;
        if !s.companies.contains_key(company_key) || !s.rounds.contains_key(round_key) {
            bail!("MemoryStore: RAISED endpoints missing for {company_key} -> {round_key}");
        }
        let created = s
            .raised
            .insert((company_key.to_string(), round_key.to_string()));
        Ok(Upserted::from_created(created))
    }

    async fn link_investor_round(
        &self,
        investor_key: &str,
        round_key: &str,
        role: InvestorRole,
    ) -> Result<Upserted> {
        let mut s = self.enter("link_investor_round", investor_key)?;
        if !s.investors.contains_key(investor_key) || !s.rounds.contains_key(round_key) {
            bail!("MemoryStore: PARTICIPATED_IN endpoints missing for {investor_key} -> {round_key}");
        }
        let edge = (investor_key.to_string(), round_key.to_string());
        match s.participated_in.get_mut(&edge) {
            Some(existing) => {
                if role == InvestorRole::Lead {
                    *existing = InvestorRole::Lead;
                }
                Ok(Upserted::Matched)
            }
            None => {
                s.participated_in.insert(edge, role);
                Ok(Upserted::Created)
            }
        }
    }

    async fn link_round_article(&self, round_key: &str, article: &Article) -> Result<SourceLink> {
        let mut s = self.enter("link_round_article", &article.id)?;
        if !s.rounds.contains_key(round_key) {
            bail!("MemoryStore: round {round_key} not found");
        }
        let article_created = !s.articles.contains_key(&article.id);
        if article_created {
            s.articles.insert(article.id.clone(), article.clone());
        }
        let edge_created = s
            .sourced_from
            .insert((round_key.to_string(), article.id.clone()));
        if let Some(feed_id) = article.feed_id.as_deref().filter(|f| !f.is_empty()) {
            if article_created || edge_created {
                let feed = s.feeds.entry(feed_id.to_string()).or_default();
                feed.article_count += u64::from(article_created);
                feed.round_count += u64::from(edge_created);
            }
        }
        drop(s);
        self.ack("link_round_article", &article.id)?;
        Ok(SourceLink {
            article: Upserted::from_created(article_created),
            edge: Upserted::from_created(edge_created),
        })
    }

    async fn refresh_company_total(&self, company_key: &str) -> Result<f64> {
        let mut s = self.enter("refresh_company_total", company_key)?;
        let total: f64 = s
            .raised
            .iter()
            .filter(|(c, _)| c == company_key)
            .filter_map(|(_, r)| s.rounds.get(r).and_then(|r| r.amount_usd))
            .sum();
        let Some(company) = s.companies.get_mut(company_key) else {
            return Ok(0.0);
        };
        if !company.locked_fields.contains(&CompanyField::TotalFundingUsd) {
            company.total_funding_usd = Some(total);
        }
        Ok(company.total_funding_usd.unwrap_or(0.0))
    }

    async fn set_field_lock(&self, lock: FieldLock, name_key: &str, locked: bool) -> Result<bool> {
        let mut s = self.enter("set_field_lock", name_key)?;
        Ok(match lock {
            FieldLock::Company(field) => match s.companies.get_mut(name_key) {
                Some(c) => {
                    if locked {
                        c.locked_fields.insert(field);
                    } else {
                        c.locked_fields.remove(&field);
                    }
                    true
                }
                None => false,
            },
            FieldLock::Investor(field) => match s.investors.get_mut(name_key) {
                Some(i) => {
                    if locked {
                        i.locked_fields.insert(field);
                    } else {
                        i.locked_fields.remove(&field);
                    }
                    true
                }
                None => false,
            },
        })
    }

    async fn clear_funding_data(&self) -> Result<ClearStats> {
        let mut s = self.enter("clear_funding_data", "*")?;
        let mut stats = ClearStats {
            rounds_deleted: s.rounds.len() as u64,
            articles_deleted: s.articles.len() as u64,
            feeds_reset: s.feeds.len() as u64,
            companies_reset: 0,
        };
        s.rounds.clear();
        s.articles.clear();
        s.raised.clear();
        s.participated_in.clear();
        s.sourced_from.clear();
        for feed in s.feeds.values_mut() {
            *feed = FeedCounters::default();
        }
        for company in s.companies.values_mut() {
            if !company.locked_fields.contains(&CompanyField::TotalFundingUsd) {
                company.total_funding_usd = Some(0.0);
                stats.companies_reset += 1;
            }
        }
        Ok(stats)
    }

    async fn company(&self, name_key: &str) -> Result<Option<Company>> {
        let s = self.enter("company", name_key)?;
        Ok(s.companies.get(name_key).cloned())
    }

    async fn investor(&self, name_key: &str) -> Result<Option<InvestorOrg>> {
        let s = self.enter("investor", name_key)?;
        Ok(s.investors.get(name_key).cloned())
    }

    async fn round(&self, round_key: &str) -> Result<Option<RoundDetail>> {
        let s = self.enter("round", round_key)?;
        Ok(s.rounds.get(round_key).map(|r| round_detail(&s, r)))
    }
}

// ---------------------------------------------------------------------------
// ScriptedEnricher
// ---------------------------------------------------------------------------

/// Returns deterministic patches; fails for configured names. Tracks call
/// order and the peak number of concurrent lookups.
pub struct ScriptedEnricher {
    failing: HashSet<String>,
    panicking: HashSet<String>,
    delay: Duration,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl Default for ScriptedEnricher {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedEnricher {
    pub fn new() -> Self {
        Self {
            failing: HashSet::new(),
            panicking: HashSet::new(),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn fail_for(mut self, name: &str) -> Self {
        self.failing.insert(normalize_company_key(name));
        self
    }

    pub fn panic_for(mut self, name: &str) -> Self {
        self.panicking.insert(normalize_company_key(name));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    async fn step(&self, name: &str) -> Result<()> {
        self.calls.lock().unwrap().push(name.to_string());
        if self.panicking.contains(&normalize_company_key(name)) {
            panic!("ScriptedEnricher: lookup panicked for {name}");
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.failing.contains(&normalize_company_key(name)) {
            bail!("ScriptedEnricher: lookup failed for {name}");
        }
        Ok(())
    }
}

#[async_trait]
impl Enricher for ScriptedEnricher {
    async fn enrich_company(&self, name: &str, progress: &dyn ProgressSink) -> Result<CompanyPatch> {
        progress.emit(ProgressEvent::new(ProgressStage::Company).entity(name));
        self.step(name).await?;
        Ok(CompanyPatch {
            description: Some(format!("Enriched profile for {name}")),
            website: Some(format!("https://{}.example", normalize_company_key(name))),
            employee_range: Some("11-50".to_string()),
            ..CompanyPatch::named(name)
        })
    }

    async fn enrich_investor(&self, name: &str, progress: &dyn ProgressSink) -> Result<InvestorPatch> {
        progress.emit(ProgressEvent::new(ProgressStage::Investor).entity(name));
        self.step(name).await?;
        Ok(InvestorPatch {
            investor_type: Some("vc".to_string()),
            website: Some(format!("https://{}.example", normalize_company_key(name))),
            stage_focus: vec!["seed".to_string(), "series a".to_string()],
            ..InvestorPatch::named(name)
        })
    }
}

// ---------------------------------------------------------------------------
// RecordingSink
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn stages(&self) -> Vec<ProgressStage> {
        self.events().iter().map(|e| e.stage).collect()
    }
}

impl ProgressSink for RecordingSink {
    fn emit(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub fn article(id: &str, feed_id: &str, published_at: Option<DateTime<Utc>>) -> Article {
    Article {
        id: id.to_string(),
        url: format!("https://news.example/{id}"),
        title: format!("Article {id}"),
        published_at,
        author: None,
        feed_id: Some(feed_id.to_string()),
        feed_title: Some(format!("Feed {feed_id}")),
    }
}

pub fn source_doc(article: Article, body: &str) -> SourceDocument {
    SourceDocument {
        article,
        body: body.to_string(),
    }
}

/// A mention of `company` at `published_at`, ingested an hour later.
pub fn mention(
    article: &Article,
    company: &str,
    stage: Option<&str>,
    published_at: DateTime<Utc>,
) -> FundingMention {
    FundingMention {
        article_id: article.id.clone(),
        article_title: article.title.clone(),
        article_url: article.url.clone(),
        feed_id: article.feed_id.clone(),
        feed_title: article.feed_title.clone(),
        company_name: company.to_string(),
        amount_usd: None,
        stage: stage.map(str::to_string),
        country: None,
        lead_investor: None,
        investors: Vec::new(),
        confidence: 0.5,
        published_at: Some(published_at),
        ingested_at: published_at + chrono::Duration::hours(1),
    }
}
