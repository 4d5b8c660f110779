//! Provenance attached to every merged entity.
//!
//! Each successful merge appends one [`DiscoverySource`] and bumps the
//! version; each field-level disagreement appends a [`ConflictResolution`].
//! Neither list is ever truncated by the merger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::Entity;

// ─── Sources ─────────────────────────────────────────────────────────────────

/// Who discovered an entity observation, how, and how sure they were.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoverySource {
  /// Free-text discovery method, e.g. "import-scan" or "call-graph".
  pub method:       String,
  pub agent:        Option<String>,
  /// In `[0, 1]`.
  pub confidence:   f64,
  pub timestamp:    DateTime<Utc>,
  /// The traversal path the agent followed to reach the entity.
  #[serde(default)]
  pub context_path: Vec<String>,
}

impl DiscoverySource {
  pub fn new(method: impl Into<String>) -> Self {
    Self {
      method:       method.into(),
      agent:        None,
      confidence:   1.0,
      timestamp:    Utc::now(),
      context_path: Vec::new(),
    }
  }

  pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
    self.agent = Some(agent.into());
    self
  }

  pub fn with_confidence(mut self, confidence: f64) -> Self {
    self.confidence = confidence;
    self
  }
}

// ─── Conflict log ────────────────────────────────────────────────────────────

/// What kind of disagreement was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
  /// Two different scalar values for the same field.
  ValueMismatch,
  /// Two different free-text narratives.
  TextDivergence,
  /// Two different priorities.
  PriorityMismatch,
  /// Two different values under the same annotation key.
  AnnotationMismatch,
}

/// Which side won.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionKind {
  PreferNew,
  PreferExisting,
  Merge,
}

/// A logged decision about a single field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictResolution {
  pub field:         String,
  pub conflict_type: ConflictType,
  pub resolution:    ResolutionKind,
  pub old_value:     serde_json::Value,
  pub new_value:     serde_json::Value,
  pub final_value:   serde_json::Value,
  pub reason:        String,
  pub timestamp:     DateTime<Utc>,
}

// ─── Completeness ────────────────────────────────────────────────────────────

/// Derived quality metrics, recomputed on every merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Completeness {
  /// `min(1, (|dependencies| + |dependents|) / 10)`.
  pub dependency_score: f64,
  /// Fraction of the narrative fields and analysis payload that are present.
  pub context_richness: f64,
  /// More than one source has contributed to the entity.
  pub cross_validated:  bool,
}

impl Completeness {
  pub fn of(entity: &Entity) -> Self {
    let links = entity.dependencies.len() + entity.dependents.len();
    let dependency_score = (links as f64 / 10.0).min(1.0);

    let present = [
      !entity.chain_context.trim().is_empty(),
      !entity.business_context.trim().is_empty(),
      entity
        .domain_context
        .as_deref()
        .is_some_and(|d| !d.trim().is_empty()),
      entity.analysis_data.as_ref().is_some_and(|a| !a.is_empty()),
    ];
    let context_richness =
      present.iter().filter(|p| **p).count() as f64 / present.len() as f64;

    Self {
      dependency_score,
      context_richness,
      cross_validated: entity.discovery.sources.len() > 1,
    }
  }
}

// ─── Metadata ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryMetadata {
  pub sources:              Vec<DiscoverySource>,
  /// Incremented on every successful merge; 1 after creation.
  pub version:              u64,
  pub conflict_resolutions: Vec<ConflictResolution>,
  pub completeness:         Completeness,
}
