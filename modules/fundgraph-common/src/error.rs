use thiserror::Error;

use crate::fields::EntityKind;

#[derive(Error, Debug)]
pub enum FundgraphError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unknown {kind} field: {field}")]
    UnknownField { kind: EntityKind, field: String },
}
