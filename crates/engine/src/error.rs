//! Engine error type.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("no dataset loaded")]
    NoData,

    #[error("dataset has no rows")]
    EmptyFrame,

    #[error("column not found: {0}")]
    MissingColumn(String),

    #[error("unknown timeframe: {0}")]
    InvalidTimeframe(String),

    #[error("invalid strategy configuration: {0}")]
    InvalidStrategy(String),

    #[error("indicator error: {0}")]
    Indicator(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("dataframe error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error(transparent)]
    Store(#[from] persistence::StoreError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
