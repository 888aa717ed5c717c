use std::path::PathBuf;
use thiserror::Error;

use crate::DocId;

/// Errors surfaced by index construction, persistence and query configuration.
///
/// Empty lookups (unknown query terms, empty intersections) are never errors;
/// they come back as empty result lists.
#[derive(Error, Debug)]
pub enum Error {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt index {path} at byte {offset}: {reason}")]
    CorruptIndex {
        path: PathBuf,
        offset: u64,
        reason: String,
    },

    #[error("corrupt sidecar {path} line {line}: {reason}")]
    CorruptSidecar {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("corrupt metadata {path}: {source}")]
    CorruptMeta {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("document id {0:?} is not an unsigned integer")]
    InvalidDocId(String),

    #[error("duplicate document id {0}")]
    DuplicateDocument(DocId),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io { path: path.into(), source }
    }

    pub(crate) fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Write { path: path.into(), source }
    }

    pub(crate) fn sidecar(path: impl Into<PathBuf>, line: usize, reason: impl Into<String>) -> Self {
        Error::CorruptSidecar { path: path.into(), line, reason: reason.into() }
    }

    /// True for every read-side failure that means an on-disk index cannot be
    /// trusted, including a missing file. Failed saves are not corruption.
    pub fn is_corrupt_index(&self) -> bool {
        matches!(
            self,
            Error::Io { .. } | Error::CorruptIndex { .. } | Error::CorruptSidecar { .. } | Error::CorruptMeta { .. }
        )
    }

    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_))
    }
}
