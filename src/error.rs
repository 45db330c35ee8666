use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

use crate::writer::MergeStrategy;

#[derive(Debug, Error, Diagnostic)]
pub enum MindbidsError {
    #[error("invalid entity: {0}")]
    InvalidEntity(String),

    #[error("unsupported resource type: {0}")]
    UnsupportedResourceType(String),

    #[error("invalid merge strategy: {0}")]
    InvalidStrategy(String),

    #[error("merge strategy required to write dataset root {0}")]
    MergeStrategyRequired(Utf8PathBuf),

    #[error("dataset root {0} is not empty, cannot merge")]
    RootNotEmpty(Utf8PathBuf),

    #[error("entity destination {0} already exists")]
    EntityConflict(Utf8PathBuf),

    #[error("merge strategy {0} is not supported")]
    NotSupported(MergeStrategy),

    #[error("expected input not found: {0}")]
    MissingInput(Utf8PathBuf),

    #[error("multiple response artifacts match {0}")]
    AmbiguousResponse(String),

    #[error("no response artifact matches {0}")]
    ResponseNotFound(String),

    #[error("malformed export report: {0}")]
    ExportParse(String),

    #[error("failed to parse table at {path}: {message}")]
    TableParse { path: Utf8PathBuf, message: String },

    #[error("failed to parse JSON at {path}: {message}")]
    Json { path: Utf8PathBuf, message: String },

    #[error("unreadable responses archive {path}: {message}")]
    Archive { path: Utf8PathBuf, message: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
