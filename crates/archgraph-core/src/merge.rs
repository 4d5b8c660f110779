//! Conflict-resolving merge of an entity observation into its stored state.
//!
//! [`ConflictResolvingMerger::merge`] is a pure function: it computes the
//! complete candidate entity (or an error) before anything is written, so a
//! failed merge never leaves partial state behind.
//!
//! Field rules:
//!
//! | Field | Rule |
//! |-------|------|
//! | `dependencies`, `dependents` | set union |
//! | `priority` | numerically lower wins |
//! | narratives | length-ratio winner, otherwise sentence union |
//! | `entity_type`, `location` | existing value is kept |
//! | `processed` | logical OR |
//! | `last_modified` | latest of both |
//! | `analysis_data` | max / ordered union / observed annotation wins |

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
  Error, Result,
  config::MergeConfig,
  discovery::{
    Completeness, ConflictResolution, ConflictType, DiscoveryMetadata,
    DiscoverySource, ResolutionKind,
  },
  entity::{
    AnalysisData, Entity, EntityObservation, PRIORITY_HIGHEST, PRIORITY_LOWEST,
  },
};

/// The merged entity plus the decisions taken while producing it.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
  pub entity:      Entity,
  /// Decisions from this merge only; they are also appended to
  /// `entity.discovery.conflict_resolutions`.
  pub resolutions: Vec<ConflictResolution>,
  /// `true` when there was no stored entity to merge into.
  pub created:     bool,
}

#[derive(Debug, Clone, Default)]
pub struct ConflictResolvingMerger {
  config: MergeConfig,
}

impl ConflictResolvingMerger {
  pub fn new(config: MergeConfig) -> Self { Self { config } }

  /// Fold `observed` into `current`, recording `source` as the provenance of
  /// this merge.
  pub fn merge(
    &self,
    observed: &EntityObservation,
    current: Option<&Entity>,
    source: &DiscoverySource,
  ) -> Result<MergeOutcome> {
    validate_observation(observed, source)?;

    let Some(current) = current else {
      let entity = create(observed, source);
      validate_entity(&entity)?;
      return Ok(MergeOutcome { entity, resolutions: Vec::new(), created: true });
    };

    if current.id != observed.id {
      return Err(Error::invalid_entity(
        &observed.id,
        format!("cannot merge into entity {:?}", current.id),
      ));
    }

    let mut log = ConflictLog { at: source.timestamp, entries: Vec::new() };
    let mut merged = current.clone();

    merged.dependencies.extend(observed.dependencies.iter().cloned());
    merged.dependents.extend(observed.dependents.iter().cloned());

    if observed.priority != current.priority {
      let winner = observed.priority.min(current.priority);
      log.push(
        "priority",
        ConflictType::PriorityMismatch,
        if winner == observed.priority {
          ResolutionKind::PreferNew
        } else {
          ResolutionKind::PreferExisting
        },
        &current.priority,
        &observed.priority,
        &winner,
        "the numerically lower priority is the more important one",
      );
      merged.priority = winner;
    }

    if observed.entity_type != current.entity_type {
      log.push(
        "entity_type",
        ConflictType::ValueMismatch,
        ResolutionKind::PreferExisting,
        &current.entity_type,
        &observed.entity_type,
        &current.entity_type,
        "the first classification of an entity is kept",
      );
    }

    if observed.location != current.location {
      log.push(
        "location",
        ConflictType::ValueMismatch,
        ResolutionKind::PreferExisting,
        &current.location,
        &observed.location,
        &current.location,
        "the first recorded location of an entity is kept",
      );
    }

    merged.processed = current.processed || observed.processed;
    merged.last_modified = current
      .last_modified
      .max(observed.last_modified.unwrap_or(source.timestamp));

    merged.chain_context = self.merge_text(
      "chain_context",
      &current.chain_context,
      &observed.chain_context,
      &mut log,
    );
    merged.business_context = self.merge_text(
      "business_context",
      &current.business_context,
      &observed.business_context,
      &mut log,
    );
    merged.domain_context =
      match (&current.domain_context, &observed.domain_context) {
        (None, None) => None,
        (Some(c), None) => Some(c.clone()),
        (None, Some(o)) => Some(o.clone()),
        (Some(c), Some(o)) => {
          Some(self.merge_text("domain_context", c, o, &mut log))
        }
      };

    merged.analysis_data = merge_analysis(
      current.analysis_data.as_ref(),
      observed.analysis_data.as_ref(),
      &mut log,
    );

    validate_entity(&merged)?;

    merged.discovery.sources.push(source.clone());
    merged.discovery.version += 1;
    merged
      .discovery
      .conflict_resolutions
      .extend(log.entries.iter().cloned());
    merged.discovery.completeness = Completeness::of(&merged);

    Ok(MergeOutcome { entity: merged, resolutions: log.entries, created: false })
  }

  /// Resolve two narratives for the same field.
  fn merge_text(
    &self,
    field: &str,
    existing: &str,
    new: &str,
    log: &mut ConflictLog,
  ) -> String {
    let e = existing.trim();
    let n = new.trim();
    if n.is_empty() || e == n {
      return existing.to_owned();
    }
    if e.is_empty() {
      return new.to_owned();
    }

    let new_sentences = split_sentences(n);
    if new_sentences.iter().all(|s| e.contains(s.as_str())) {
      return existing.to_owned();
    }

    let ratio = self.config.length_ratio;
    let e_len = e.chars().count() as f64;
    let n_len = n.chars().count() as f64;

    let (kind, merged, reason) = if n_len > e_len * ratio {
      (
        ResolutionKind::PreferNew,
        n.to_owned(),
        format!("new text is more than {ratio}x longer than the existing text"),
      )
    } else if e_len > n_len * ratio {
      (
        ResolutionKind::PreferExisting,
        e.to_owned(),
        format!("existing text is more than {ratio}x longer than the new text"),
      )
    } else {
      (
        ResolutionKind::Merge,
        sentence_union(&split_sentences(e), &new_sentences),
        "texts of comparable length were merged by sentence".to_owned(),
      )
    };

    log.push(field, ConflictType::TextDivergence, kind, &e, &n, &merged, reason);
    merged
  }
}

// ─── Creation and validation ─────────────────────────────────────────────────

fn create(observed: &EntityObservation, source: &DiscoverySource) -> Entity {
  let mut entity = Entity {
    id:               observed.id.clone(),
    entity_type:      observed.entity_type.clone(),
    location:         observed.location.clone(),
    priority:         observed.priority,
    processed:        observed.processed,
    chain_context:    observed.chain_context.clone(),
    business_context: observed.business_context.clone(),
    domain_context:   observed.domain_context.clone(),
    dependencies:     observed.dependencies.clone(),
    dependents:       observed.dependents.clone(),
    last_modified:    observed.last_modified.unwrap_or(source.timestamp),
    analysis_data:    observed.analysis_data.clone(),
    discovery:        DiscoveryMetadata {
      sources:              vec![source.clone()],
      version:              1,
      conflict_resolutions: Vec::new(),
      completeness:         Completeness::default(),
    },
  };
  entity.discovery.completeness = Completeness::of(&entity);
  entity
}

fn validate_observation(
  observed: &EntityObservation,
  source: &DiscoverySource,
) -> Result<()> {
  if observed.id.trim().is_empty() {
    return Err(Error::invalid_entity(&observed.id, "id is empty"));
  }
  if !(0.0..=1.0).contains(&source.confidence) {
    return Err(Error::invalid_entity(
      &observed.id,
      format!("source confidence {} is outside [0, 1]", source.confidence),
    ));
  }
  check_fields(
    &observed.id,
    &observed.location,
    observed.priority,
    observed.dependencies.contains(&observed.id)
      || observed.dependents.contains(&observed.id),
  )
}

/// Check an entity against the stored-record invariants.
pub fn validate_entity(entity: &Entity) -> Result<()> {
  if entity.id.trim().is_empty() {
    return Err(Error::invalid_entity(&entity.id, "id is empty"));
  }
  check_fields(
    &entity.id,
    &entity.location,
    entity.priority,
    entity.dependencies.contains(&entity.id)
      || entity.dependents.contains(&entity.id),
  )
}

fn check_fields(
  id: &str,
  location: &str,
  priority: u8,
  self_referencing: bool,
) -> Result<()> {
  if location.trim().is_empty() {
    return Err(Error::invalid_entity(id, "location is empty"));
  }
  if !(PRIORITY_HIGHEST..=PRIORITY_LOWEST).contains(&priority) {
    return Err(Error::invalid_entity(
      id,
      format!("priority {priority} is outside {PRIORITY_HIGHEST}..={PRIORITY_LOWEST}"),
    ));
  }
  if self_referencing {
    return Err(Error::SelfReference(id.to_owned()));
  }
  Ok(())
}

// ─── Analysis payload ────────────────────────────────────────────────────────

fn merge_analysis(
  current: Option<&AnalysisData>,
  observed: Option<&AnalysisData>,
  log: &mut ConflictLog,
) -> Option<AnalysisData> {
  let (c, o) = match (current, observed) {
    (None, None) => return None,
    (Some(c), None) => return Some(c.clone()),
    (None, Some(o)) => return Some(o.clone()),
    (Some(c), Some(o)) => (c, o),
  };

  let mut annotations = c.annotations.clone();
  for (key, value) in &o.annotations {
    match annotations.get(key) {
      None => {
        annotations.insert(key.clone(), value.clone());
      }
      Some(existing) if existing == value => {}
      Some(existing) => {
        log.push(
          &format!("analysis_data.annotations.{key}"),
          ConflictType::AnnotationMismatch,
          ResolutionKind::PreferNew,
          existing,
          value,
          value,
          "annotations take the most recent observation",
        );
        annotations.insert(key.clone(), value.clone());
      }
    }
  }

  Some(AnalysisData {
    usage_count: c.usage_count.max(o.usage_count),
    inheritance_chain: ordered_union(&c.inheritance_chain, &o.inheritance_chain),
    business_rules: ordered_union(&c.business_rules, &o.business_rules),
    patterns: ordered_union(&c.patterns, &o.patterns),
    annotations,
  })
}

fn ordered_union(existing: &[String], new: &[String]) -> Vec<String> {
  let mut out = existing.to_vec();
  for item in new {
    if !out.contains(item) {
      out.push(item.clone());
    }
  }
  out
}

// ─── Sentences ───────────────────────────────────────────────────────────────

/// Split text on `.`, `!` or `?` followed by whitespace or the end of the
/// text. Terminators stay attached to their sentence; empty pieces are
/// dropped.
pub fn split_sentences(text: &str) -> Vec<String> {
  let mut sentences = Vec::new();
  let mut current = String::new();
  let mut chars = text.chars().peekable();

  while let Some(c) = chars.next() {
    current.push(c);
    let at_boundary = matches!(c, '.' | '!' | '?')
      && chars.peek().is_none_or(|next| next.is_whitespace());
    if at_boundary {
      push_trimmed(&mut sentences, &current);
      current.clear();
    }
  }
  push_trimmed(&mut sentences, &current);
  sentences
}

fn push_trimmed(out: &mut Vec<String>, piece: &str) {
  let trimmed = piece.trim();
  if !trimmed.is_empty() {
    out.push(trimmed.to_owned());
  }
}

/// Existing sentences first, then unseen new ones, deduplicated by exact
/// match.
fn sentence_union(existing: &[String], new: &[String]) -> String {
  let mut seen: Vec<&str> = Vec::with_capacity(existing.len() + new.len());
  for s in existing.iter().chain(new) {
    if !seen.contains(&s.as_str()) {
      seen.push(s);
    }
  }
  seen.join(" ")
}

// ─── Conflict log ────────────────────────────────────────────────────────────

struct ConflictLog {
  at:      DateTime<Utc>,
  entries: Vec<ConflictResolution>,
}

impl ConflictLog {
  #[allow(clippy::too_many_arguments)]
  fn push<O, N, F>(
    &mut self,
    field: &str,
    conflict_type: ConflictType,
    resolution: ResolutionKind,
    old_value: &O,
    new_value: &N,
    final_value: &F,
    reason: impl Into<String>,
  ) where
    O: Serialize + ?Sized,
    N: Serialize + ?Sized,
    F: Serialize + ?Sized,
  {
    self.entries.push(ConflictResolution {
      field: field.to_owned(),
      conflict_type,
      resolution,
      old_value: serde_json::to_value(old_value).unwrap_or_default(),
      new_value: serde_json::to_value(new_value).unwrap_or_default(),
      final_value: serde_json::to_value(final_value).unwrap_or_default(),
      reason: reason.into(),
      timestamp: self.at,
    });
  }
}

#[cfg(test)]
mod tests {
  use std::collections::BTreeSet;

  use chrono::TimeZone;

  use super::*;
  use crate::entity::EntityType;

  fn merger() -> ConflictResolvingMerger { ConflictResolvingMerger::default() }

  fn source(agent: &str) -> DiscoverySource {
    DiscoverySource {
      method:       "test".into(),
      agent:        Some(agent.into()),
      confidence:   0.9,
      timestamp:    Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
      context_path: vec![],
    }
  }

  fn obs(id: &str) -> EntityObservation {
    EntityObservation::new(id, EntityType::Service, "src/user_service.rs")
  }

  fn set(ids: &[&str]) -> BTreeSet<String> {
    ids.iter().map(|s| s.to_string()).collect()
  }

  fn merge_all(observations: &[EntityObservation]) -> Entity {
    let m = merger();
    let mut current: Option<Entity> = None;
    for (i, o) in observations.iter().enumerate() {
      let out = m
        .merge(o, current.as_ref(), &source(&format!("agent-{i}")))
        .unwrap();
      current = Some(out.entity);
    }
    current.unwrap()
  }

  // ── Creation ─────────────────────────────────────────────────────────────

  #[test]
  fn first_observation_creates_version_one() {
    let out = merger()
      .merge(&obs("UserService"), None, &source("a"))
      .unwrap();
    assert!(out.created);
    assert!(out.resolutions.is_empty());
    assert_eq!(out.entity.discovery.version, 1);
    assert_eq!(out.entity.discovery.sources.len(), 1);
    assert!(!out.entity.discovery.completeness.cross_validated);
  }

  #[test]
  fn self_reference_is_a_validation_error() {
    let o = obs("UserService").with_dependencies(["UserService"]);
    let err = merger().merge(&o, None, &source("a")).unwrap_err();
    assert!(matches!(err, Error::SelfReference(ref id) if id == "UserService"));
    assert!(err.is_validation());
  }

  #[test]
  fn self_reference_introduced_by_merge_is_rejected() {
    let created = merger().merge(&obs("A"), None, &source("a")).unwrap();
    let bad = obs("A").with_dependents(["A"]);
    let err = merger()
      .merge(&bad, Some(&created.entity), &source("b"))
      .unwrap_err();
    assert!(matches!(err, Error::SelfReference(_)));
  }

  #[test]
  fn missing_required_fields_are_rejected() {
    let mut o = obs("A");
    o.location = "  ".into();
    assert!(merger().merge(&o, None, &source("a")).unwrap_err().is_validation());

    let mut o = obs("A");
    o.priority = 0;
    assert!(merger().merge(&o, None, &source("a")).is_err());

    let o = obs("");
    assert!(merger().merge(&o, None, &source("a")).is_err());
  }

  // ── Adjacency ────────────────────────────────────────────────────────────

  #[test]
  fn adjacency_sets_are_unioned() {
    let merged = merge_all(&[
      obs("S").with_dependencies(["A", "B"]).with_dependents(["X"]),
      obs("S").with_dependencies(["B", "C"]).with_dependents(["Y"]),
    ]);
    assert_eq!(merged.dependencies, set(&["A", "B", "C"]));
    assert_eq!(merged.dependents, set(&["X", "Y"]));
    assert_eq!(merged.discovery.version, 2);
    assert!(merged.discovery.completeness.cross_validated);
  }

  #[test]
  fn user_service_converges_in_every_order() {
    let observations = [
      obs("UserService").with_dependencies(["UserRepository"]),
      obs("UserService")
        .with_dependencies(["UserRepository", "EmailService"])
        .with_dependents(["AuthController"]),
      obs("UserService")
        .with_dependencies(["SessionStore"])
        .with_dependents(["AuthController", "ProfileController"]),
    ];
    let orders = [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];

    for order in orders {
      let seq: Vec<_> = order.iter().map(|i| observations[*i].clone()).collect();
      let merged = merge_all(&seq);
      assert_eq!(
        merged.dependencies,
        set(&["UserRepository", "EmailService", "SessionStore"]),
        "order {order:?}"
      );
      assert_eq!(
        merged.dependents,
        set(&["AuthController", "ProfileController"]),
        "order {order:?}"
      );
      assert_eq!(merged.discovery.version, 3);
    }
  }

  #[test]
  fn re_merging_the_same_observation_is_idempotent() {
    let base = obs("S")
      .with_dependencies(["A"])
      .with_business_context("Stores users. Sends welcome mail.");
    let other = obs("S")
      .with_dependencies(["B"])
      .with_business_context("Hashes passwords. Stores users.");

    let first = merge_all(&[base.clone(), other.clone()]);
    let again = merger()
      .merge(&other, Some(&first), &source("retry"))
      .unwrap()
      .entity;

    assert_eq!(again.dependencies, first.dependencies);
    assert_eq!(again.dependents, first.dependents);
    assert_eq!(again.business_context, first.business_context);
    assert_eq!(again.discovery.version, first.discovery.version + 1);
    assert_eq!(
      again.discovery.sources.len(),
      first.discovery.sources.len() + 1
    );
  }

  // ── Priority ─────────────────────────────────────────────────────────────

  #[test]
  fn higher_priority_wins_and_is_logged() {
    let mut low = obs("S");
    low.priority = 4;
    let mut high = obs("S");
    high.priority = 2;

    let first = merger().merge(&low, None, &source("a")).unwrap().entity;
    let out = merger().merge(&high, Some(&first), &source("b")).unwrap();
    assert_eq!(out.entity.priority, 2);
    assert_eq!(out.resolutions.len(), 1);
    assert_eq!(out.resolutions[0].field, "priority");
    assert_eq!(out.resolutions[0].resolution, ResolutionKind::PreferNew);

    let out = merger().merge(&low, Some(&out.entity), &source("c")).unwrap();
    assert_eq!(out.entity.priority, 2);
    assert_eq!(out.resolutions[0].resolution, ResolutionKind::PreferExisting);
  }

  // ── Narratives ───────────────────────────────────────────────────────────

  #[test]
  fn much_longer_text_wins() {
    let short = obs("S").with_business_context("Handles users.");
    let long = obs("S").with_business_context(
      "Handles user registration, login and profile updates for the web app.",
    );
    let merged = merge_all(&[short, long.clone()]);
    assert_eq!(merged.business_context, long.business_context);
    let r = &merged.discovery.conflict_resolutions[0];
    assert_eq!(r.field, "business_context");
    assert_eq!(r.resolution, ResolutionKind::PreferNew);
  }

  #[test]
  fn existing_much_longer_text_is_kept() {
    let long = obs("S").with_business_context(
      "Handles user registration, login and profile updates for the web app.",
    );
    let short = obs("S").with_business_context("Handles users.");
    let merged = merge_all(&[long.clone(), short]);
    assert_eq!(merged.business_context, long.business_context);
    assert_eq!(
      merged.discovery.conflict_resolutions[0].resolution,
      ResolutionKind::PreferExisting
    );
  }

  #[test]
  fn comparable_texts_merge_by_sentence() {
    let a = obs("S").with_business_context("Stores users. Sends mail.");
    let b = obs("S").with_business_context("Sends mail. Audits logins.");
    let merged = merge_all(&[a, b]);
    assert_eq!(
      merged.business_context,
      "Stores users. Sends mail. Audits logins."
    );
    assert_eq!(
      merged.discovery.conflict_resolutions[0].resolution,
      ResolutionKind::Merge
    );
  }

  #[test]
  fn custom_length_ratio_is_honoured() {
    let m = ConflictResolvingMerger::new(MergeConfig { length_ratio: 10.0 });
    let a = obs("S").with_business_context("Handles users.");
    let b = obs("S").with_business_context(
      "Handles user registration, login and profile updates.",
    );
    let first = m.merge(&a, None, &source("a")).unwrap().entity;
    let out = m.merge(&b, Some(&first), &source("b")).unwrap();
    assert_eq!(out.resolutions[0].resolution, ResolutionKind::Merge);
    assert!(out.entity.business_context.starts_with("Handles users."));
  }

  #[test]
  fn empty_text_never_overwrites() {
    let a = obs("S").with_business_context("Stores users.");
    let b = obs("S");
    let merged = merge_all(&[a, b]);
    assert_eq!(merged.business_context, "Stores users.");
    assert!(merged.discovery.conflict_resolutions.is_empty());
  }

  #[test]
  fn split_sentences_keeps_terminators() {
    assert_eq!(
      split_sentences("One. Two!  Three? v1.2 is fine. tail"),
      vec!["One.", "Two!", "Three?", "v1.2 is fine.", "tail"]
    );
    assert!(split_sentences("   ").is_empty());
  }

  // ── Other fields ─────────────────────────────────────────────────────────

  #[test]
  fn scalar_disagreements_keep_existing_values() {
    let a = obs("S");
    let mut b = EntityObservation::new("S", EntityType::Controller, "src/other.rs");
    b.processed = true;
    let merged = merge_all(&[a, b]);
    assert_eq!(merged.entity_type, EntityType::Service);
    assert_eq!(merged.location, "src/user_service.rs");
    assert!(merged.processed);
    let fields: Vec<_> = merged
      .discovery
      .conflict_resolutions
      .iter()
      .map(|r| r.field.as_str())
      .collect();
    assert_eq!(fields, ["entity_type", "location"]);
  }

  #[test]
  fn analysis_data_is_combined() {
    let mut a = obs("S");
    a.analysis_data = Some(AnalysisData {
      usage_count: Some(3),
      patterns: vec!["facade".into()],
      annotations: serde_json::from_str(r#"{"layer":"domain","owner":"a"}"#)
        .unwrap(),
      ..Default::default()
    });
    let mut b = obs("S");
    b.analysis_data = Some(AnalysisData {
      usage_count: Some(7),
      patterns: vec!["facade".into(), "singleton".into()],
      annotations: serde_json::from_str(r#"{"owner":"b"}"#).unwrap(),
      ..Default::default()
    });

    let merged = merge_all(&[a, b]);
    let data = merged.analysis_data.unwrap();
    assert_eq!(data.usage_count, Some(7));
    assert_eq!(data.patterns, ["facade", "singleton"]);
    assert_eq!(data.annotations["layer"], "domain");
    assert_eq!(data.annotations["owner"], "b");
    assert_eq!(
      merged.discovery.conflict_resolutions[0].field,
      "analysis_data.annotations.owner"
    );
  }

  #[test]
  fn resolutions_accumulate_across_merges() {
    let merged = merge_all(&[
      obs("S").with_business_context("Short."),
      obs("S").with_business_context("A considerably longer description."),
      obs("S").with_business_context("Short."),
    ]);
    let kinds: Vec<_> = merged
      .discovery
      .conflict_resolutions
      .iter()
      .map(|r| r.resolution)
      .collect();
    assert_eq!(kinds, [ResolutionKind::PreferNew, ResolutionKind::PreferExisting]);

    let mut p = obs("S");
    p.priority = 1;
    let merged = merger().merge(&p, Some(&merged), &source("z")).unwrap().entity;
    assert_eq!(merged.discovery.conflict_resolutions.len(), 3);
  }
}
