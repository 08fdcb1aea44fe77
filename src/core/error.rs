use std::env;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DocHookError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Config parse error: {0}")]
    TomlError(#[from] toml::de::Error),
    #[error("Environment variable error: {0}")]
    EnvVarError(#[from] env::VarError),
    #[error("Invalid glob pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("Section not found: '{0}'")]
    SectionNotFound(String),
    #[error("Malformed table under '{section}' at line {line}: {reason}")]
    MalformedTable {
        section: String,
        line: usize,
        reason: String,
    },
    #[error("State file is corrupt ({path}): {reason}")]
    StateCorrupt { path: PathBuf, reason: String },
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Git error: {0}")]
    GitError(String),
    #[error("Lock error on {path}: {source}")]
    LockError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl DocHookError {
    /// Errors that describe a document problem rather than an environment one.
    pub fn is_document_error(&self) -> bool {
        matches!(
            self,
            DocHookError::SectionNotFound(_) | DocHookError::MalformedTable { .. }
        )
    }
}
