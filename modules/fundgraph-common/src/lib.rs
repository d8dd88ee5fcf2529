pub mod config;
pub mod currency;
pub mod error;
pub mod fields;
pub mod merge;
pub mod normalize;
pub mod types;

pub use config::{Config, PipelineSettings};
pub use error::FundgraphError;
pub use fields::{CompanyField, EntityKind, FieldLock, InvestorField};
pub use normalize::{
    canonical_stage, display_stage, normalize_company_key, normalize_stage_key, UNKNOWN_STAGE,
};
pub use types::*;
