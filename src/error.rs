//! Error types for workq.

use thiserror::Error;

use crate::model::{Failure, Work};

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("retry of unknown work item {0}")]
    UnknownWork(Work),

    /// A worker callback returned an error or panicked. The run was aborted.
    #[error("{0}")]
    WorkerFailed(Box<Failure>),

    #[error("queue version moved during bonus round: expected {expected}, found {found}")]
    VersionDrift { expected: u64, found: u64 },

    #[error("producer loop exited before the bonus round finished")]
    ProducerGone,

    #[error("failed to spawn worker thread: {0}")]
    Spawn(std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// The worker's failure envelope, if this error came from a crashed worker.
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Error::WorkerFailed(failure) => Some(failure),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
