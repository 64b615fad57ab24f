use std::path::PathBuf;
use thiserror::Error;

/// Result type for search operations
pub type Result<T> = std::result::Result<T, SearchError>;

/// Errors that prevent a search from starting, or that occur while loading
/// criteria and store snapshots.
///
/// Failures inside the traversal itself are never surfaced here: a node the
/// provider cannot enumerate is retired with whatever it produced, and
/// cancellation or stop-on-first are normal completions.
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Empty query")]
    EmptyQuery,
    #[error("No starting nodes")]
    NoStartingNodes,
    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Invalid snapshot {path}: {message}")]
    SnapshotError { path: PathBuf, message: String },
    #[error("Thread pool error: {0}")]
    ThreadPool(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl SearchError {
    pub fn invalid_pattern(pattern: impl Into<String>) -> Self {
        Self::InvalidPattern(pattern.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn snapshot_error(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::SnapshotError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Whether the error is a problem with the caller's criteria rather than
    /// with the environment.
    pub fn is_criteria_error(&self) -> bool {
        matches!(
            self,
            Self::EmptyQuery | Self::NoStartingNodes | Self::InvalidPattern(_)
        )
    }
}

impl From<config::ConfigError> for SearchError {
    fn from(err: config::ConfigError) -> Self {
        Self::ConfigError(err.to_string())
    }
}

/// Errors reported by a [`KeyStore`](crate::store::KeyStore) provider.
///
/// The engine treats every variant as "no data for this node"; the
/// distinction only matters for logging and for callers using the provider
/// directly.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Access denied: {0}")]
    AccessDenied(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid data: {0}")]
    InvalidData(String),
    #[error("Provider error: {0}")]
    Provider(String),
}

impl StoreError {
    pub fn access_denied(path: impl Into<String>) -> Self {
        Self::AccessDenied(path.into())
    }

    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }
}
