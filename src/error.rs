//! Error types for vault operations.
//!
//! Every variant carries [`ErrorDetails`]: a human-readable message, the name of
//! the operation that failed, and a free-form context map for diagnostics.

use serde_json::{Map, Value};
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Result type alias using the vault error type.
pub type Result<T> = std::result::Result<T, VaultError>;

/// Diagnostic payload shared by all error kinds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorDetails {
    pub message: String,
    pub operation: String,
    pub context: Map<String, Value>,
}

impl ErrorDetails {
    pub fn new(operation: &str, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            operation: operation.to_string(),
            context: Map::new(),
        }
    }
}

impl fmt::Display for ErrorDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.operation.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{} (in {})", self.message, self.operation)
        }
    }
}

/// Coarse classification of a [`VaultError`], useful for matching in callers
/// that do not care about the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NoteNotFound,
    NoteExists,
    Storage,
    Configuration,
    Indexing,
    Yaml,
}

#[derive(Error, Debug)]
pub enum VaultError {
    /// Malformed tag, filename or parameter
    #[error("Validation error: {0}")]
    Validation(ErrorDetails),

    /// Target note or directory does not exist
    #[error("Note not found: {0}")]
    NoteNotFound(ErrorDetails),

    /// Write refused because the note already exists
    #[error("Note already exists: {0}")]
    NoteExists(ErrorDetails),

    /// Permission or I/O failure at the storage boundary
    #[error("Storage error: {0}")]
    Storage(ErrorDetails),

    /// Bad setup
    #[error("Configuration error: {0}")]
    Configuration(ErrorDetails),

    /// Embedding provider or vector store failure
    #[error("Indexing error: {0}")]
    Indexing(ErrorDetails),

    /// Frontmatter could not be serialized
    #[error("YAML error: {0}")]
    Yaml(ErrorDetails),
}

impl VaultError {
    pub fn validation(operation: &str, message: impl Into<String>) -> Self {
        Self::Validation(ErrorDetails::new(operation, message))
    }

    pub fn not_found(operation: &str, message: impl Into<String>) -> Self {
        Self::NoteNotFound(ErrorDetails::new(operation, message))
    }

    pub fn exists(operation: &str, message: impl Into<String>) -> Self {
        Self::NoteExists(ErrorDetails::new(operation, message))
    }

    pub fn storage(operation: &str, message: impl Into<String>) -> Self {
        Self::Storage(ErrorDetails::new(operation, message))
    }

    pub fn configuration(operation: &str, message: impl Into<String>) -> Self {
        Self::Configuration(ErrorDetails::new(operation, message))
    }

    pub fn indexing(operation: &str, message: impl Into<String>) -> Self {
        Self::Indexing(ErrorDetails::new(operation, message))
    }

    /// Wrap an I/O error raised while touching `path`.
    pub fn io(operation: &str, path: &Path, err: &std::io::Error) -> Self {
        Self::storage(operation, format!("{}: {}", path.display(), err))
            .with_context("path", path.display().to_string())
            .with_context("io_kind", format!("{:?}", err.kind()))
    }

    /// Attach a context entry and return the error (builder style).
    pub fn with_context(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details_mut().context.insert(key.to_string(), value.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NoteNotFound(_) => ErrorKind::NoteNotFound,
            Self::NoteExists(_) => ErrorKind::NoteExists,
            Self::Storage(_) => ErrorKind::Storage,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Indexing(_) => ErrorKind::Indexing,
            Self::Yaml(_) => ErrorKind::Yaml,
        }
    }

    pub fn details(&self) -> &ErrorDetails {
        match self {
            Self::Validation(d)
            | Self::NoteNotFound(d)
            | Self::NoteExists(d)
            | Self::Storage(d)
            | Self::Configuration(d)
            | Self::Indexing(d)
            | Self::Yaml(d) => d,
        }
    }

    fn details_mut(&mut self) -> &mut ErrorDetails {
        match self {
            Self::Validation(d)
            | Self::NoteNotFound(d)
            | Self::NoteExists(d)
            | Self::Storage(d)
            | Self::Configuration(d)
            | Self::Indexing(d)
            | Self::Yaml(d) => d,
        }
    }

    pub fn message(&self) -> &str {
        &self.details().message
    }

    pub fn operation(&self) -> &str {
        &self.details().operation
    }

    pub fn context(&self) -> &Map<String, Value> {
        &self.details().context
    }
}

impl From<serde_yaml::Error> for VaultError {
    fn from(e: serde_yaml::Error) -> Self {
        VaultError::Yaml(ErrorDetails::new("", e.to_string()))
    }
}
