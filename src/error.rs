use thiserror::Error;

/// Failure to load or interpret a line-item taxonomy resource.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TaxonomyError {
    #[error("Taxonomy resource not found: {0}")]
    Missing(String),

    #[error("Taxonomy is malformed: {0}")]
    Malformed(String),

    #[error("Row id {0} appears more than once in the taxonomy")]
    DuplicateRow(u32),
}

#[derive(Error, Debug)]
pub enum ReconcilerError {
    #[error(transparent)]
    Taxonomy(#[from] TaxonomyError),

    #[error("Unsupported statement type '{0}'. Use 'rozvaha' or 'vzz'.")]
    UnsupportedStatementKind(String),

    #[error("Empty response from model")]
    EmptyResponse,

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("Statement could not be built: {0}")]
    InvalidStatement(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[cfg(feature = "gemini")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, ReconcilerError>;
