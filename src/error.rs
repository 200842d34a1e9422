use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum PgxError {
    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("guideline source not supported: {0}")]
    InvalidSource(String),

    #[error("invalid request header: {0}")]
    InvalidHeader(String),

    #[error("PharmGKB request failed: {0}")]
    PharmGkbHttp(String),

    #[error("PharmGKB returned status {status}: {message}")]
    PharmGkbStatus { status: u16, message: String },

    #[error("archive error: {0}")]
    Archive(String),

    #[error("failed to parse upstream payload: {0}")]
    Payload(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("review file error: {0}")]
    Interchange(String),

    #[error("knowledge base not found at {0}")]
    #[diagnostic(help("run `kira-pgx init` to create an empty knowledge base"))]
    StoreMissing(PathBuf),

    #[error("failed to back up knowledge base: {0}")]
    Backup(String),

    #[error("knowledge base error: {0}")]
    Store(String),

    #[error("inconsistent load plan: {0}")]
    InconsistentPlan(String),

    #[error("load rolled back; failed tables: {}", .0.join(", "))]
    RolledBack(Vec<String>),
}

/// One malformed upstream record. Never aborts a batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("record {index}: missing field `{field}`")]
    MissingField { index: usize, field: String },

    #[error("record {index}: expected a {expected}")]
    UnexpectedShape {
        index: usize,
        expected: &'static str,
    },

    #[error("record {index}: {message}")]
    Malformed { index: usize, message: String },
}

impl From<rusqlite::Error> for PgxError {
    fn from(err: rusqlite::Error) -> Self {
        PgxError::Store(err.to_string())
    }
}
