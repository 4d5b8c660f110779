//! Tunable knobs for merging, locking, budgeting and compaction.
//!
//! Every section deserialises with defaults, so a configuration file only
//! needs to name the values it overrides.

use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  entity::EntityType,
  relationship::RelationshipType,
};

/// All engine configuration, as loaded from `[graph]` in the server config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
  pub merge:      MergeConfig,
  pub locks:      LockConfig,
  pub budget:     BudgetConfig,
  pub compaction: CompactionConfig,
}

impl GraphConfig {
  pub fn validate(&self) -> Result<()> {
    if !(self.merge.length_ratio >= 1.0) {
      return Err(Error::InvalidConfig(format!(
        "merge.length_ratio must be >= 1, got {}",
        self.merge.length_ratio
      )));
    }
    if self.locks.timeout_ms == 0 {
      return Err(Error::InvalidConfig("locks.timeout_ms must be > 0".into()));
    }
    let b = &self.budget;
    if b.max_tokens == 0 {
      return Err(Error::InvalidConfig("budget.max_tokens must be > 0".into()));
    }
    if !(0.0 < b.warning_threshold
      && b.warning_threshold < b.critical_threshold
      && b.critical_threshold <= 1.0)
    {
      return Err(Error::InvalidConfig(format!(
        "budget thresholds must satisfy 0 < warning < critical <= 1, got {} / {}",
        b.warning_threshold, b.critical_threshold
      )));
    }
    let c = &self.compaction;
    if !(0.0 < c.target_reduction && c.target_reduction < 1.0) {
      return Err(Error::InvalidConfig(format!(
        "compaction.target_reduction must be in (0, 1), got {}",
        c.target_reduction
      )));
    }
    if c.critical_relationship_types.is_empty() {
      return Err(Error::InvalidConfig(
        "compaction.critical_relationship_types must not be empty".into(),
      ));
    }
    if c.max_chain_length < 2 {
      return Err(Error::InvalidConfig(
        "compaction.max_chain_length must be >= 2".into(),
      ));
    }
    if c.retained_manifests == 0 {
      return Err(Error::InvalidConfig(
        "compaction.retained_manifests must be > 0".into(),
      ));
    }
    Ok(())
  }
}

// ─── Merge ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
  /// A narrative longer than the other by more than this factor wins outright
  /// instead of being sentence-merged.
  pub length_ratio: f64,
}

impl Default for MergeConfig {
  fn default() -> Self { Self { length_ratio: 1.5 } }
}

// ─── Locks ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
  /// How long a writer may wait for a per-entity lock before giving up.
  pub timeout_ms: u64,
}

impl Default for LockConfig {
  fn default() -> Self { Self { timeout_ms: 5_000 } }
}

// ─── Budget ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
  /// Token capacity of the working set.
  pub max_tokens:         usize,
  /// Fraction of `max_tokens` at which compaction is scheduled.
  pub warning_threshold:  f64,
  /// Fraction of `max_tokens` at which writers wait for compaction.
  pub critical_threshold: f64,
}

impl Default for BudgetConfig {
  fn default() -> Self {
    Self {
      max_tokens:         100_000,
      warning_threshold:  0.80,
      critical_threshold: 0.95,
    }
  }
}

// ─── Compaction ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactionConfig {
  /// Fraction of the footprint a compaction run aims to remove.
  pub target_reduction:            f64,
  /// Edge types that form dependency chains.
  pub critical_relationship_types: Vec<RelationshipType>,
  /// Entity types kept regardless of chain membership.
  pub always_preserve_types:       Vec<EntityType>,
  /// Cap on entities admitted by type alone, per type.
  pub max_entities_per_type:       usize,
  /// Most significant edge type first.
  pub relationship_type_priority:  Vec<RelationshipType>,
  /// Optional cap on preserved relationships.
  pub max_relationships:           Option<usize>,
  pub max_chain_length:            usize,
  /// Character cap on narrative fields in the aggressive pass.
  pub aggressive_text_cap:         usize,
  /// Cap on each adjacency set in the aggressive pass.
  pub aggressive_list_cap:         usize,
  /// Most recent manifests kept in the store; older ones are pruned.
  pub retained_manifests:          usize,
}

impl Default for CompactionConfig {
  fn default() -> Self {
    use RelationshipType::*;
    Self {
      target_reduction:            0.70,
      critical_relationship_types: vec![DependsOn, Calls, Uses, Implements, Extends],
      always_preserve_types:       vec![
        EntityType::Service,
        EntityType::Controller,
        EntityType::Repository,
      ],
      max_entities_per_type:       50,
      relationship_type_priority:  vec![
        DependsOn, Implements, Extends, Calls, Uses, Injects, Contains,
        Creates, Configures, RoutesTo, Accesses, Publishes, Subscribes,
        Validates, Transforms, Returns, Throws, Tests,
      ],
      max_relationships:           None,
      max_chain_length:            64,
      aggressive_text_cap:         160,
      aggressive_list_cap:         8,
      retained_manifests:          100,
    }
  }
}

impl CompactionConfig {
  /// Rank of a relationship type; unknown types sort after every listed one.
  pub fn type_rank(&self, t: RelationshipType) -> usize {
    self
      .relationship_type_priority
      .iter()
      .position(|p| *p == t)
      .unwrap_or(self.relationship_type_priority.len())
  }
}
