use std::backtrace::Backtrace;

use thiserror::Error;

use crate::types::{SchemaHash, TabletId};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("invalid store path: {0}")]
    InvalidStorePath(String),
    #[error("IO error: {0}")]
    Io(#[from] Box<std::io::Error>),
    #[error("read/write probe returned mismatched bytes")]
    TestFile,
    #[error("failed to parse tablet header: {0}")]
    HeaderParse(String),
    #[error("tablet not found: tablet_id={0}, schema_hash={1}")]
    TabletNotFound(TabletId, SchemaHash),
    #[error("tablet already exists: tablet_id={0}, schema_hash={1}")]
    TabletExists(TabletId, SchemaHash),
    #[error("tablet id exists under a different schema hash: tablet_id={0}")]
    TabletIdExists(TabletId),
    #[error("tablet already deleted: tablet_id={0}, schema_hash={1}")]
    TabletAlreadyDeleted(TabletId, SchemaHash),
    #[error("tablet without version and without alter task is invalid")]
    IndexValidate,
    #[error("previous schema change on the base tablet is not finished")]
    PreviousSchemaChangeNotFinished,
    #[error("invalid parameters: {0}")]
    Params(String),
    #[error("memory allocation of {0} bytes failed")]
    NoMemory(usize),
}

impl From<std::io::Error> for TracedStorageError {
    #[inline]
    fn from(e: std::io::Error) -> TracedStorageError {
        StorageError::Io(e.into()).into()
    }
}

impl From<serde_json::Error> for TracedStorageError {
    #[inline]
    fn from(e: serde_json::Error) -> TracedStorageError {
        StorageError::HeaderParse(e.to_string()).into()
    }
}

/// [`StorageError`] with backtrace captured at construction.
pub struct TracedStorageError {
    source: StorageError,
    bt: Backtrace,
}

impl std::fmt::Display for TracedStorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}\n{}", self.source, self.bt)
    }
}

impl std::error::Error for TracedStorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

impl From<StorageError> for TracedStorageError {
    #[inline]
    fn from(source: StorageError) -> TracedStorageError {
        TracedStorageError {
            source,
            bt: Backtrace::capture(),
        }
    }
}

impl std::fmt::Debug for TracedStorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

impl TracedStorageError {
    pub fn invalid_store_path(message: impl ToString) -> Self {
        StorageError::InvalidStorePath(message.to_string()).into()
    }

    pub fn params(message: impl ToString) -> Self {
        StorageError::Params(message.to_string()).into()
    }

    pub fn header_parse(message: impl ToString) -> Self {
        StorageError::HeaderParse(message.to_string()).into()
    }

    /// The underlying error kind, for callers that dispatch on the taxonomy.
    pub fn kind(&self) -> &StorageError {
        &self.source
    }
}

pub type StorageResult<T> = std::result::Result<T, TracedStorageError>;
