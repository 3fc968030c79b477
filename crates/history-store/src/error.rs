use analysis_core::AnalysisError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt price path: {0}")]
    CorruptPath(#[from] serde_json::Error),

    #[error("no record for {ticker} on {date}")]
    MissingRecord { ticker: String, date: String },

    #[error("record for {ticker} on {date} already exists")]
    DuplicateRecord { ticker: String, date: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<StoreError> for AnalysisError {
    fn from(err: StoreError) -> Self {
        AnalysisError::Persistence(err.to_string())
    }
}
