use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::safety::DeletionStatus;

/// Errors surfaced by the library.
///
/// Scanning, hashing and the raw delete primitives never return these: they
/// degrade to partial results or failed [`FileOperation`](crate::actions::FileOperation)s.
#[derive(Error, Debug)]
pub enum InspectError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("path not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("no entry at index {0}")]
    NoSuchEntry(usize),

    #[error("{message}")]
    Blocked {
        status: DeletionStatus,
        message: String,
    },

    #[error("scan worker exited without delivering a result")]
    WorkerDisconnected,
}

pub type Result<T> = std::result::Result<T, InspectError>;
