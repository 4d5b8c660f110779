//! Error types for `archgraph-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid entity {id:?}: {reason}")]
  InvalidEntity { id: String, reason: String },

  #[error("entity {0:?} references itself")]
  SelfReference(String),

  #[error("invalid relationship {id:?}: {reason}")]
  InvalidRelationship { id: String, reason: String },

  #[error("invalid configuration: {0}")]
  InvalidConfig(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  /// Whether this error rejects caller input, as opposed to an internal
  /// failure. Validation errors are never persisted and are safe to surface.
  pub fn is_validation(&self) -> bool {
    matches!(
      self,
      Self::InvalidEntity { .. }
        | Self::SelfReference(_)
        | Self::InvalidRelationship { .. }
    )
  }

  pub(crate) fn invalid_entity(id: &str, reason: impl Into<String>) -> Self {
    Self::InvalidEntity { id: id.to_owned(), reason: reason.into() }
  }

  pub(crate) fn invalid_relationship(
    id: &str,
    reason: impl Into<String>,
  ) -> Self {
    Self::InvalidRelationship { id: id.to_owned(), reason: reason.into() }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
