use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Insufficient history: need {required} bars, have {available}")]
    InsufficientHistory { required: usize, available: usize },

    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("News unavailable: {0}")]
    NewsUnavailable(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Run cancelled")]
    Cancelled,
}

impl AnalysisError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AnalysisError::InsufficientHistory { .. } => ErrorKind::InsufficientHistory,
            AnalysisError::ExternalService(_) => ErrorKind::ExternalService,
            AnalysisError::MalformedResponse(_) => ErrorKind::MalformedResponse,
            AnalysisError::Persistence(_) => ErrorKind::Persistence,
            AnalysisError::NewsUnavailable(_) => ErrorKind::NewsUnavailable,
            AnalysisError::Configuration(_) => ErrorKind::Configuration,
            AnalysisError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether this error must stop the whole run rather than a single ticker.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AnalysisError::Configuration(_))
    }
}

/// Error category carried into the run report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InsufficientHistory,
    ExternalService,
    MalformedResponse,
    Persistence,
    NewsUnavailable,
    Configuration,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InsufficientHistory => "insufficient_history",
            ErrorKind::ExternalService => "external_service",
            ErrorKind::MalformedResponse => "malformed_response",
            ErrorKind::Persistence => "persistence",
            ErrorKind::NewsUnavailable => "news_unavailable",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
