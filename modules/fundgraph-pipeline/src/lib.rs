pub mod enrichment;
pub mod grouper;
pub mod merger;
pub mod resolver;
mod retry;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod traits;

pub use enrichment::{
    enrich_stream, EnrichmentJob, EnrichmentOrchestrator, EnrichmentQueue, EnrichmentReport,
    Enricher, LlmEnricher, NoopSink, ProgressEvent, ProgressSink, ProgressStage, QueueError,
};
pub use grouper::{group_mentions, mention_from_extraction};
pub use merger::{merge_extractions, ExtractionMerger};
pub use resolver::{derive_round_key, CommitError, CommitStep, GraphSyncSummary, RoundResolver};
pub use traits::{CompletionService, FundingStore};
