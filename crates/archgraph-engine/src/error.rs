//! Error type for `archgraph-engine`.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// Caller input was rejected; nothing was persisted.
  #[error(transparent)]
  Validation(archgraph_core::Error),

  #[error("timed out after {waited:?} waiting for lock on {keys:?}")]
  LockTimeout { keys: Vec<String>, waited: Duration },

  #[error("storage error: {0}")]
  Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

  /// A critical section panicked or was aborted.
  #[error("engine task failed: {0}")]
  Task(String),

  /// Invalid configuration or an internal serialisation failure.
  #[error("core error: {0}")]
  Core(archgraph_core::Error),
}

impl Error {
  pub(crate) fn storage<E>(e: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Storage(Box::new(e))
  }
}

impl From<archgraph_core::Error> for Error {
  fn from(e: archgraph_core::Error) -> Self {
    if e.is_validation() { Self::Validation(e) } else { Self::Core(e) }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
