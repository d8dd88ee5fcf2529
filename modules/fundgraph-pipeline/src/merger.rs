//! Multi-source extraction: several articles about one funding event go to
//! the model in a single prompt and come back as one `RawExtraction`.

use std::sync::Arc;
use std::time::Duration;

use ai_client::{strip_code_blocks, truncate_to_char_boundary};
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info, warn};

use fundgraph_common::currency::to_usd;
use fundgraph_common::{
    normalize_company_key, CanonicalRound, PipelineSettings, RawExtraction, SourceDocument,
};

use crate::traits::CompletionService;

/// Confidence assumed when the model omits one.
const DEFAULT_CONFIDENCE: f64 = 0.5;

/// What the model returns for a batch of sources.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResponse {
    /// False for roundups, listicles, opinion pieces and anything that is not
    /// one specific company announcing one specific raise.
    #[serde(default = "default_true")]
    pub is_funding_article: bool,
    #[serde(default)]
    pub company_name: Option<String>,
    /// Amount in full units of `currency` (10000000, not 10).
    #[serde(default, deserialize_with = "lenient_number")]
    pub amount: Option<f64>,
    /// ISO 4217 code, e.g. "USD", "EUR".
    #[serde(default)]
    pub currency: Option<String>,
    /// Only when the article itself states the USD figure.
    #[serde(default, deserialize_with = "lenient_number")]
    pub amount_usd: Option<f64>,
    /// e.g. "Pre-Seed", "Seed", "Series A".
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default, deserialize_with = "lenient_names")]
    pub investors: Vec<String>,
    #[serde(default)]
    pub lead_investor: Option<String>,
    /// Company headquarters country.
    #[serde(default)]
    pub country: Option<String>,
    /// 0.0 to 1.0.
    #[serde(default, deserialize_with = "lenient_number")]
    pub confidence: Option<f64>,
    /// Short quote supporting the extraction.
    #[serde(default)]
    pub raw_excerpt: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Accept a number, a numeric string ("10000000", "1,500,000") or null.
fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.replace([',', '_', ' '], "").parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite()))
}

/// Accept an array of names, a single comma-separated string, or null.
fn lenient_names<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Array(items) => items
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        serde_json::Value::String(s) => s.split(',').map(str::to_string).collect(),
        _ => Vec::new(),
    })
}

/// Trimmed, blank-free, deduplicated by normalized key (first spelling kept).
/// The lead, when present, is always included.
pub(crate) fn dedupe_investors<'a>(
    lead: Option<&'a str>,
    names: impl IntoIterator<Item = &'a str>,
) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for name in names.into_iter().chain(lead) {
        let name = name.trim();
        let key = normalize_company_key(name);
        if key.is_empty() {
            continue;
        }
        if seen.insert(key) {
            out.push(name.to_string());
        }
    }
    out
}

fn non_blank(s: Option<String>) -> Option<String> {
    s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

const SYSTEM_PROMPT: &str = "You extract startup funding events from news articles. \
All sources you are given are believed to describe the same funding event. \
Cross-reference them: when sources conflict, prefer the most specific and detailed one. \
When two or more sources independently agree on the company, amount and stage, raise your \
confidence above what any single source would justify; do not simply average. \
Set isFundingArticle to false for roundups, rankings, listicles (\"Top 10 funded startups\"), \
market commentary, or anything that is not one company announcing one raise. \
Report amounts in full units (10000000, not 10 or \"10M\"). \
Respond with a single JSON object and nothing else.";

fn system_prompt() -> String {
    let schema = schemars::schema_for!(ExtractionResponse);
    let schema = serde_json::to_string_pretty(&schema).unwrap_or_default();
    format!("{SYSTEM_PROMPT}\n\nJSON schema:\n{schema}")
}

/// Combine one or more sources into a single extraction.
pub struct ExtractionMerger {
    completion: Arc<dyn CompletionService>,
    max_prompt_chars: usize,
    timeout: Duration,
}

impl ExtractionMerger {
    pub fn new(completion: Arc<dyn CompletionService>, settings: &PipelineSettings) -> Self {
        Self {
            completion,
            max_prompt_chars: settings.max_prompt_chars,
            timeout: settings.extraction_timeout,
        }
    }

    /// `None` means "no funding event here": not a funding article, an
    /// unparseable reply, a timeout, or a transport failure.
    pub async fn extract(&self, sources: &[SourceDocument]) -> Option<RawExtraction> {
        if sources.is_empty() {
            debug!("No sources to extract from");
            return None;
        }

        let user = build_user_prompt(sources, self.max_prompt_chars);
        let reply = match tokio::time::timeout(
            self.timeout,
            self.completion.complete(&system_prompt(), &user),
        )
        .await
        {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                warn!(error = %e, sources = sources.len(), "Extraction call failed");
                return None;
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.timeout.as_secs(),
                    sources = sources.len(),
                    "Extraction call timed out"
                );
                return None;
            }
        };

        let response = parse_response(&reply)?;
        let extraction = into_extraction(response, sources)?;
        info!(
            company = %extraction.company_name,
            amount_usd = ?extraction.amount_usd,
            stage = ?extraction.stage,
            confidence = extraction.confidence,
            sources = sources.len(),
            "Funding event extracted"
        );
        Some(extraction)
    }

    /// Extract again from `sources` and fold the result into `existing`.
    /// `None` when the sources yield no event or describe another company.
    pub async fn re_extract(
        &self,
        existing: &CanonicalRound,
        sources: &[SourceDocument],
    ) -> Option<CanonicalRound> {
        let fresh = self.extract(sources).await?;
        let fresh_key = normalize_company_key(&fresh.company_name);
        if fresh_key != normalize_company_key(&existing.company_name) {
            warn!(
                round_key = %existing.round_key,
                found = %fresh.company_name,
                "Re-extraction found a different company, ignoring"
            );
            return None;
        }
        Some(merge_extractions(existing, &fresh))
    }
}

/// Per-source body budget, or `None` when everything fits.
fn per_source_budget(sources: &[SourceDocument], max_chars: usize) -> Option<usize> {
    let total: usize = sources.iter().map(|s| s.body.len()).sum();
    (total > max_chars).then(|| max_chars / sources.len())
}

fn build_user_prompt(sources: &[SourceDocument], max_chars: usize) -> String {
    let budget = per_source_budget(sources, max_chars);
    let n = sources.len();
    let mut prompt = format!(
        "Extract the funding event described by the following {n} source(s). \
         Cross-reference all of them before answering.\n\n"
    );
    for (i, source) in sources.iter().enumerate() {
        let body = match budget {
            Some(b) => truncate_to_char_boundary(&source.body, b),
            None => source.body.as_str(),
        };
        let a = &source.article;
        prompt.push_str(&format!("--- SOURCE {}/{n} ---\n", i + 1));
        prompt.push_str(&format!("Title: {}\nURL: {}\n", a.title, a.url));
        if let Some(published) = a.published_at {
            prompt.push_str(&format!("Published: {}\n", published.to_rfc3339()));
        }
        if let Some(feed) = a.feed_title.as_deref() {
            prompt.push_str(&format!("Feed: {feed}\n"));
        }
        prompt.push('\n');
        prompt.push_str(body);
        prompt.push_str("\n\n");
    }
    prompt
}

fn parse_response(reply: &str) -> Option<ExtractionResponse> {
    let json = strip_code_blocks(reply);
    match serde_json::from_str::<ExtractionResponse>(json) {
        Ok(r) => Some(r),
        Err(e) => {
            warn!(error = %e, reply_len = reply.len(), "Unparseable extraction reply");
            None
        }
    }
}

fn into_extraction(r: ExtractionResponse, sources: &[SourceDocument]) -> Option<RawExtraction> {
    if !r.is_funding_article {
        info!(
            title = %sources[0].article.title,
            "Rejected: not a funding article"
        );
        return None;
    }
    let Some(company_name) = non_blank(r.company_name) else {
        info!(title = %sources[0].article.title, "Rejected: no company name");
        return None;
    };

    let currency = non_blank(r.currency).map(|c| c.to_uppercase());
    let amount = r.amount.filter(|a| *a > 0.0);
    let amount_usd = r
        .amount_usd
        .filter(|a| *a > 0.0)
        .or_else(|| amount.map(|a| to_usd(a, currency.as_deref())));

    let lead_investor = non_blank(r.lead_investor);
    let investors = dedupe_investors(
        lead_investor.as_deref(),
        r.investors.iter().map(String::as_str),
    );

    let mut signals = vec!["llm_extraction".to_string()];
    if sources.len() > 1 {
        signals.push(format!("multi_source_{}", sources.len()));
    }

    Some(RawExtraction {
        company_name,
        amount,
        currency,
        amount_usd,
        stage: non_blank(r.stage),
        investors,
        lead_investor,
        country: non_blank(r.country),
        confidence: r.confidence.unwrap_or(DEFAULT_CONFIDENCE).clamp(0.0, 1.0),
        source_article_ref: Some(sources[0].article.id.clone()),
        raw_excerpt: non_blank(r.raw_excerpt),
        signals,
    })
}

/// Fold a fresh extraction into an already-resolved round.
///
/// Investors only grow and confidence only rises. Scalars already known are
/// kept unless the fresh extraction is more confident; unknown ones are filled.
pub fn merge_extractions(existing: &CanonicalRound, fresh: &RawExtraction) -> CanonicalRound {
    let fresh_wins = fresh.confidence > existing.max_confidence;
    fn pick<T: Clone>(old: &Option<T>, new: &Option<T>, new_wins: bool) -> Option<T> {
        match (old, new) {
            (Some(_), Some(n)) if new_wins => Some(n.clone()),
            (Some(o), _) => Some(o.clone()),
            (None, n) => n.clone(),
        }
    }

    let lead_investor = pick(&existing.lead_investor, &fresh.lead_investor, fresh_wins);
    let all_investors = dedupe_investors(
        lead_investor.as_deref(),
        existing
            .all_investors
            .iter()
            .chain(&fresh.investors)
            .chain(&existing.lead_investor)
            .map(String::as_str),
    );

    CanonicalRound {
        round_key: existing.round_key.clone(),
        company_name: existing.company_name.clone(),
        amount_usd: pick(&existing.amount_usd, &fresh.amount_usd, fresh_wins),
        stage: pick(&existing.stage, &fresh.stage, fresh_wins),
        country: pick(&existing.country, &fresh.country, fresh_wins),
        lead_investor,
        all_investors,
        max_confidence: existing.max_confidence.max(fresh.confidence),
        sources: existing.sources.clone(),
        first_seen: existing.first_seen,
        last_seen: existing.last_seen,
    }
}
