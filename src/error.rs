//! Errors surfaced to callers.
//!
//! Only construction can fail from the point of view of a [`MultiTail`]
//! user: once running, a misbehaving file is logged and dropped instead.
//!
//! [`MultiTail`]: crate::MultiTail

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Invalid glob pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
    #[error("No glob patterns supplied")]
    NoPatterns,
    #[error("Invalid configuration: {0}")]
    Config(&'static str),
}

impl Error {
    pub(crate) fn open(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Open {
            path: path.into(),
            source,
        }
    }

    /// Returns `true` if this is an open failure caused by the path not
    /// existing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Open { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
