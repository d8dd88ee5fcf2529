//! Clusters per-article funding mentions into canonical rounds.
//!
//! One pass in input order. A mention joins the first open group with the same
//! company key, a compatible stage, and at least one member less than seven
//! days away; otherwise it opens a new group. Groups are never revisited for
//! out-of-order input, and mentions without a publish date use their ingestion
//! time, which can leave late-ingested duplicates in separate groups.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use fundgraph_common::{
    normalize_company_key, normalize_stage_key, Article, CanonicalRound, FundingMention,
    RawExtraction, RoundSource, UNKNOWN_STAGE,
};

use crate::merger::dedupe_investors;

const WINDOW_DAYS: i64 = 7;

struct Group<'a> {
    key: String,
    company_key: String,
    /// Starts as the key's stage; an `unknown` group adopts the first specific
    /// stage it absorbs. The key itself never changes.
    effective_stage: String,
    members: Vec<&'a FundingMention>,
}

impl Group<'_> {
    fn accepts(&self, company_key: &str, stage_key: &str, ts: DateTime<Utc>) -> bool {
        let window_ms = Duration::days(WINDOW_DAYS).num_milliseconds();
        self.company_key == company_key
            && (self.effective_stage == stage_key
                || self.effective_stage == UNKNOWN_STAGE
                || stage_key == UNKNOWN_STAGE)
            && self
                .members
                .iter()
                .any(|m| (m.event_time() - ts).num_milliseconds().abs() < window_ms)
    }
}

/// Attach article provenance to a single-article extraction.
pub fn mention_from_extraction(
    article: &Article,
    extraction: &RawExtraction,
    ingested_at: DateTime<Utc>,
) -> FundingMention {
    FundingMention {
        article_id: article.id.clone(),
        article_title: article.title.clone(),
        article_url: article.url.clone(),
        feed_id: article.feed_id.clone(),
        feed_title: article.feed_title.clone(),
        company_name: extraction.company_name.clone(),
        amount_usd: extraction.amount_usd,
        stage: extraction.stage.clone(),
        country: extraction.country.clone(),
        lead_investor: extraction.lead_investor.clone(),
        investors: extraction.investors.clone(),
        confidence: extraction.confidence,
        published_at: article.published_at,
        ingested_at,
    }
}

/// Group mentions into canonical rounds, in order of group creation.
pub fn group_mentions(mentions: &[FundingMention]) -> Vec<CanonicalRound> {
    let mut groups: Vec<Group> = Vec::new();

    for mention in mentions {
        let company_key = normalize_company_key(&mention.company_name);
        if company_key.is_empty() {
            debug!(article_id = %mention.article_id, "Skipping mention without company name");
            continue;
        }
        let stage_key = normalize_stage_key(mention.stage.as_deref());
        let ts = mention.event_time();

        match groups
            .iter_mut()
            .find(|g| g.accepts(&company_key, &stage_key, ts))
        {
            Some(group) => {
                if group.effective_stage == UNKNOWN_STAGE && stage_key != UNKNOWN_STAGE {
                    group.effective_stage = stage_key;
                }
                group.members.push(mention);
            }
            None => groups.push(Group {
                key: format!("{company_key}_{stage_key}_{}", ts.timestamp_millis()),
                company_key,
                effective_stage: stage_key,
                members: vec![mention],
            }),
        }
    }

    debug!(mentions = mentions.len(), groups = groups.len(), "Grouped funding mentions");
    groups.into_iter().map(finish).collect()
}

fn first_with<T, F>(primary: &FundingMention, members: &[&FundingMention], field: F) -> Option<T>
where
    F: Fn(&FundingMention) -> Option<T>,
{
    field(primary).or_else(|| members.iter().find_map(|m| field(m)))
}

fn non_blank(s: &Option<String>) -> Option<String> {
    s.as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn finish(group: Group) -> CanonicalRound {
    let members = &group.members;

    // Stable: the earliest of equally confident members stays primary.
    let mut primary = members[0];
    for &m in &members[1..] {
        if m.confidence > primary.confidence {
            primary = m;
        }
    }

    let company_name = first_with(primary, members, |m| {
        let name = m.company_name.trim();
        (!name.is_empty()).then(|| name.to_string())
    })
    .unwrap_or_default();
    let lead_investor = first_with(primary, members, |m| non_blank(&m.lead_investor));

    let all_investors = dedupe_investors(
        lead_investor.as_deref(),
        members
            .iter()
            .flat_map(|m| m.investors.iter().chain(&m.lead_investor))
            .map(String::as_str),
    );

    let mut feeds = HashSet::new();
    let sources = members
        .iter()
        .filter(|m| feeds.insert(m.feed_identity().to_string()))
        .map(|m| RoundSource {
            article_id: m.article_id.clone(),
            feed_id: m.feed_id.clone(),
            feed_title: m.feed_title.clone(),
            article_title: m.article_title.clone(),
            article_url: m.article_url.clone(),
            confidence: m.confidence,
            published_at: m.published_at,
        })
        .collect();

    let times = members.iter().map(|m| m.event_time());
    let first_seen = times.clone().min().unwrap_or(primary.ingested_at);
    let last_seen = times.max().unwrap_or(primary.ingested_at);

    CanonicalRound {
        round_key: group.key,
        company_name,
        amount_usd: first_with(primary, members, |m| m.amount_usd),
        stage: first_with(primary, members, |m| non_blank(&m.stage)),
        country: first_with(primary, members, |m| non_blank(&m.country)),
        lead_investor,
        all_investors,
        max_confidence: primary.confidence,
        sources,
        first_seen,
        last_seen,
    }
}
