use std::fmt;

use crate::database::DatabaseError;
use crate::retry::{RetryError, Retryable};

/// The kind of failure reported by an external provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    NotFound,
    AlreadyExists,
    Denied,
    Malformed,
    Unavailable,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ErrorKind::Transient => write!(f, "transient"),
            ErrorKind::NotFound => write!(f, "not_found"),
            ErrorKind::AlreadyExists => write!(f, "already_exists"),
            ErrorKind::Denied => write!(f, "denied"),
            ErrorKind::Malformed => write!(f, "malformed"),
            ErrorKind::Unavailable => write!(f, "unavailable"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("remote call failed: {0}")]
    Transient(String),
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("resource already exists: {0}")]
    AlreadyExists(String),
    #[error("access denied: {0}")]
    Denied(String),
    #[error("unexpected response: {0}")]
    Malformed(String),
    #[error("failed to launch `{program}`: {source}")]
    Unavailable {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl ProviderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::Transient(_) => ErrorKind::Transient,
            ProviderError::NotFound(_) => ErrorKind::NotFound,
            ProviderError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            ProviderError::Denied(_) => ErrorKind::Denied,
            ProviderError::Malformed(_) => ErrorKind::Malformed,
            ProviderError::Unavailable { .. } => ErrorKind::Unavailable,
        }
    }
}

impl Retryable for ProviderError {
    fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::Malformed(err.to_string())
    }
}

/// Failure of a single work item. These are logged and counted, never propagated
/// to sibling items.
#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    #[error("{0}")]
    Provider(#[from] RetryError<ProviderError>),
    #[error("ledger: {0}")]
    Ledger(#[from] RetryError<DatabaseError>),
    #[error("no resource group found for registry `{0}`")]
    MissingLocation(String),
    #[error("could not provision destination repository `{repository}`: {source}")]
    Provisioning {
        repository: String,
        #[source]
        source: RetryError<ProviderError>,
    },
    #[error("{0}")]
    Io(#[from] std::io::Error),
}
