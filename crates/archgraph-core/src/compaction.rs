//! Dependency-chain-aware compaction of the working graph.
//!
//! [`CompactionPlanner::plan`] chooses which entities and relationships stay
//! in the working set when it outgrows its token budget. Entities on long
//! dependency chains survive first; everything else is replaced by an
//! [`EntityReference`] in the run's [`CompressionMetadata`] so it can be
//! re-hydrated from the durable store later.
//!
//! The planner is pure. It never mutates its input and never talks to a
//! store: the full graph stays recoverable by construction.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
  config::CompactionConfig,
  entity::{Entity, EntityId, EntityType},
  footprint::estimate_tokens,
  relationship::{Relationship, RelationshipType},
};

/// Relationship count at which an always-preserve entity is kept as a
/// `minimal` reference.
const MINIMAL_REFERENCE_DEGREE: usize = 5;
/// Relationship count at which any entity is kept as a `summary` reference.
const SUMMARY_REFERENCE_DEGREE: usize = 2;
/// Provenance entries left on each entity by the aggressive pass.
const AGGRESSIVE_HISTORY_CAP: usize = 3;
/// Relationship types surviving the aggressive pass.
const AGGRESSIVE_TYPE_COUNT: usize = 3;

/// A simple path through the critical-relationship subgraph.
pub type DependencyChain = Vec<EntityId>;

// ─── Manifest ────────────────────────────────────────────────────────────────

/// How much of an excluded entity a later lookup should re-hydrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionLevel {
  Minimal,
  Summary,
  ReferenceOnly,
}

/// A pointer to an entity that was compacted out of the working set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityReference {
  pub id:                 EntityId,
  pub entity_type:        EntityType,
  pub location:           String,
  /// Distinct types of the relationships touching the entity.
  pub relationship_types: Vec<RelationshipType>,
  pub relationship_count: usize,
  pub compression_level:  CompressionLevel,
}

/// The record of one compaction run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionMetadata {
  pub run_id:                  Uuid,
  pub created_at:              DateTime<Utc>,
  pub original_entities:       usize,
  pub original_relationships:  usize,
  pub preserved_entities:      usize,
  pub preserved_relationships: usize,
  pub compacted_entities:      usize,
  pub compacted_relationships: usize,
  /// Traced chains whose every member survived.
  pub preserved_chains:        usize,
  pub longest_chain:           usize,
  pub original_tokens:         usize,
  pub preserved_tokens:        usize,
  /// `1 - preserved_tokens / original_tokens`.
  pub reduction:               f64,
  pub target_reduction:        f64,
  pub aggressive_pass:         bool,
  pub budget_met:              bool,
  pub references:              Vec<EntityReference>,
}

/// Even the aggressive pass could not reach the target reduction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Error)]
#[error(
  "compaction budget unreachable: achieved {achieved:.3} reduction, target \
   {target:.3}"
)]
pub struct BudgetUnreachable {
  pub achieved: f64,
  pub target:   f64,
}

/// The retained working set plus the manifest describing the rest.
#[derive(Debug, Clone)]
pub struct CompactionPlan {
  pub entities:      Vec<Entity>,
  pub relationships: Vec<Relationship>,
  /// Distinct chains, longest first.
  pub chains:        Vec<DependencyChain>,
  pub manifest:      CompressionMetadata,
  pub warning:       Option<BudgetUnreachable>,
}

// ─── Planner ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct CompactionPlanner {
  config: CompactionConfig,
}

impl CompactionPlanner {
  pub fn new(config: CompactionConfig) -> Self { Self { config } }

  pub fn config(&self) -> &CompactionConfig { &self.config }

  pub fn plan(
    &self,
    entities: &[Entity],
    relationships: &[Relationship],
  ) -> CompactionPlan {
    let original_tokens = footprint(entities, relationships);

    let graph = CriticalGraph::build(
      entities,
      relationships,
      &self.config.critical_relationship_types,
    );
    let chains = graph.trace_chains(self.config.max_chain_length);
    let selected = self.select(entities, &chains);

    let mut kept_entities: Vec<Entity> = entities
      .iter()
      .filter(|e| selected.contains(e.id.as_str()))
      .cloned()
      .collect();

    let mut kept_relationships: Vec<Relationship> = relationships
      .iter()
      .filter(|r| {
        selected.contains(r.from_entity_id.as_str())
          && selected.contains(r.to_entity_id.as_str())
      })
      .cloned()
      .collect();
    kept_relationships.sort_by(|a, b| {
      self
        .config
        .type_rank(a.relationship_type)
        .cmp(&self.config.type_rank(b.relationship_type))
        .then_with(|| a.id.cmp(&b.id))
    });
    if let Some(cap) = self.config.max_relationships {
      kept_relationships.truncate(cap);
    }

    let references = self.references(entities, relationships, &selected);

    let target = self.config.target_reduction;
    let mut preserved_tokens = footprint(&kept_entities, &kept_relationships);
    let mut reduction = reduction_ratio(original_tokens, preserved_tokens);
    let mut aggressive_pass = false;

    if original_tokens > 0 && reduction < target {
      debug!(
        reduction,
        target, "chain selection under-compressed; running aggressive pass"
      );
      aggressive_pass = true;
      self.aggressive_pass(&mut kept_entities, &mut kept_relationships);
      preserved_tokens = footprint(&kept_entities, &kept_relationships);
      reduction = reduction_ratio(original_tokens, preserved_tokens);
    }

    let budget_met = original_tokens == 0 || reduction >= target;
    let warning = (!budget_met).then(|| {
      let w = BudgetUnreachable { achieved: reduction, target };
      warn!(achieved = reduction, target, "{w}");
      w
    });

    let preserved_chains: Vec<&DependencyChain> = chains
      .iter()
      .filter(|c| c.iter().all(|id| selected.contains(id.as_str())))
      .collect();

    let manifest = CompressionMetadata {
      run_id: Uuid::new_v4(),
      created_at: Utc::now(),
      original_entities: entities.len(),
      original_relationships: relationships.len(),
      preserved_entities: kept_entities.len(),
      preserved_relationships: kept_relationships.len(),
      compacted_entities: entities.len() - kept_entities.len(),
      compacted_relationships: relationships.len() - kept_relationships.len(),
      preserved_chains: preserved_chains.len(),
      longest_chain: preserved_chains.iter().map(|c| c.len()).max().unwrap_or(0),
      original_tokens,
      preserved_tokens,
      reduction,
      target_reduction: target,
      aggressive_pass,
      budget_met,
      references,
    };

    CompactionPlan {
      entities: kept_entities,
      relationships: kept_relationships,
      chains,
      manifest,
      warning,
    }
  }

  /// Ids of the entities that stay in the working set.
  fn select<'a>(
    &self,
    entities: &'a [Entity],
    chains: &'a [DependencyChain],
  ) -> HashSet<&'a str> {
    if entities.is_empty() {
      return HashSet::new();
    }
    let target = ((entities.len() as f64)
      * (1.0 - self.config.target_reduction))
      .floor()
      .max(1.0) as usize;

    // Chain participation: (distinct chains, longest containing chain).
    let mut stats: HashMap<&str, (usize, usize)> = HashMap::new();
    for chain in chains {
      for id in chain {
        let s = stats.entry(id.as_str()).or_default();
        s.0 += 1;
        s.1 = s.1.max(chain.len());
      }
    }

    let mut candidates: BTreeSet<&str> = stats.keys().copied().collect();

    for preserve in &self.config.always_preserve_types {
      let mut of_type: Vec<&Entity> = entities
        .iter()
        .filter(|e| &e.entity_type == preserve && !stats.contains_key(e.id.as_str()))
        .collect();
      of_type.sort_by(|a, b| {
        a.priority
          .cmp(&b.priority)
          .then_with(|| b.degree().cmp(&a.degree()))
          .then_with(|| a.id.cmp(&b.id))
      });
      candidates.extend(
        of_type
          .into_iter()
          .take(self.config.max_entities_per_type)
          .map(|e| e.id.as_str()),
      );
    }

    if candidates.len() <= target {
      return candidates.into_iter().collect();
    }

    let mut ranked: Vec<&str> = candidates.into_iter().collect();
    ranked.sort_by(|a, b| {
      let sa = stats.get(a).copied().unwrap_or_default();
      let sb = stats.get(b).copied().unwrap_or_default();
      sb.0.cmp(&sa.0).then_with(|| sb.1.cmp(&sa.1)).then_with(|| a.cmp(b))
    });
    ranked.truncate(target);
    ranked.into_iter().collect()
  }

  fn references(
    &self,
    entities: &[Entity],
    relationships: &[Relationship],
    selected: &HashSet<&str>,
  ) -> Vec<EntityReference> {
    let mut touching: HashMap<&str, Vec<RelationshipType>> = HashMap::new();
    for r in relationships {
      for end in [r.from_entity_id.as_str(), r.to_entity_id.as_str()] {
        touching.entry(end).or_default().push(r.relationship_type);
      }
    }

    entities
      .iter()
      .filter(|e| !selected.contains(e.id.as_str()))
      .map(|e| {
        let types = touching.get(e.id.as_str()).map(Vec::as_slice).unwrap_or(&[]);
        let relationship_count = types.len();
        let relationship_types: Vec<RelationshipType> =
          types.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();

        let preserve_type = self.config.always_preserve_types.contains(&e.entity_type);
        let compression_level = if preserve_type
          && relationship_count >= MINIMAL_REFERENCE_DEGREE
        {
          CompressionLevel::Minimal
        } else if relationship_count >= SUMMARY_REFERENCE_DEGREE {
          CompressionLevel::Summary
        } else {
          CompressionLevel::ReferenceOnly
        };

        EntityReference {
          id: e.id.clone(),
          entity_type: e.entity_type.clone(),
          location: e.location.clone(),
          relationship_types,
          relationship_count,
          compression_level,
        }
      })
      .collect()
  }

  /// Trim auxiliary payload from every kept entity and keep only the most
  /// significant relationship types.
  fn aggressive_pass(
    &self,
    entities: &mut [Entity],
    relationships: &mut Vec<Relationship>,
  ) {
    let text_cap = self.config.aggressive_text_cap;
    let list_cap = self.config.aggressive_list_cap;

    for e in entities.iter_mut() {
      truncate_chars(&mut e.chain_context, text_cap);
      truncate_chars(&mut e.business_context, text_cap);
      if let Some(domain) = e.domain_context.as_mut() {
        truncate_chars(domain, text_cap);
      }
      e.dependencies = e.dependencies.iter().take(list_cap).cloned().collect();
      e.dependents = e.dependents.iter().take(list_cap).cloned().collect();

      keep_last(&mut e.discovery.sources, AGGRESSIVE_HISTORY_CAP);
      keep_last(&mut e.discovery.conflict_resolutions, AGGRESSIVE_HISTORY_CAP);

      if let Some(data) = e.analysis_data.as_mut() {
        data.inheritance_chain.truncate(list_cap);
        data.business_rules.truncate(list_cap);
        data.patterns.truncate(list_cap);
        data.annotations.clear();
      }
    }

    let top: Vec<RelationshipType> = self
      .config
      .relationship_type_priority
      .iter()
      .take(AGGRESSIVE_TYPE_COUNT)
      .copied()
      .collect();
    relationships.retain(|r| top.contains(&r.relationship_type));
  }
}

fn footprint(entities: &[Entity], relationships: &[Relationship]) -> usize {
  entities.iter().map(estimate_tokens).sum::<usize>()
    + relationships.iter().map(estimate_tokens).sum::<usize>()
}

fn reduction_ratio(original: usize, preserved: usize) -> f64 {
  if original == 0 {
    return 0.0;
  }
  1.0 - preserved as f64 / original as f64
}

fn truncate_chars(text: &mut String, cap: usize) {
  if let Some((idx, _)) = text.char_indices().nth(cap) {
    text.truncate(idx);
  }
}

fn keep_last<T>(items: &mut Vec<T>, n: usize) {
  if items.len() > n {
    items.drain(..items.len() - n);
  }
}

// ─── Chain tracing ───────────────────────────────────────────────────────────

/// The directed subgraph of critical relationships between known entities.
struct CriticalGraph<'a> {
  adjacency: BTreeMap<&'a str, Vec<&'a str>>,
}

impl<'a> CriticalGraph<'a> {
  fn build(
    entities: &'a [Entity],
    relationships: &'a [Relationship],
    critical: &[RelationshipType],
  ) -> Self {
    let known: HashSet<&str> = entities.iter().map(|e| e.id.as_str()).collect();
    let mut adjacency: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

    for r in relationships {
      if !critical.contains(&r.relationship_type) {
        continue;
      }
      let (from, to) = (r.from_entity_id.as_str(), r.to_entity_id.as_str());
      if from == to || !known.contains(from) || !known.contains(to) {
        continue;
      }
      adjacency.entry(from).or_default().push(to);
      if r.bidirectional {
        adjacency.entry(to).or_default().push(from);
      }
    }
    for next in adjacency.values_mut() {
      next.sort_unstable();
      next.dedup();
    }
    Self { adjacency }
  }

  /// Longest simple path from every node with outgoing edges, longest
  /// first, with chains contained in an earlier chain removed.
  fn trace_chains(&self, max_len: usize) -> Vec<DependencyChain> {
    let mut tracer = Tracer {
      graph:   self,
      memo:    HashMap::new(),
      on_path: HashSet::new(),
      max_len,
    };

    let mut traced: Vec<Vec<&str>> = Vec::new();
    for root in self.adjacency.keys() {
      let (mut path, _) = tracer.longest_from(*root);
      path.truncate(max_len);
      if path.len() > 1 {
        traced.push(path);
      }
    }
    // Stable: equal lengths stay in root order.
    traced.sort_by(|a, b| b.len().cmp(&a.len()));

    let mut kept: Vec<Vec<&str>> = Vec::new();
    let mut positions: HashMap<&str, Vec<(usize, usize)>> = HashMap::new();
    for chain in traced {
      let subsumed = positions.get(chain[0]).is_some_and(|at| {
        at.iter().any(|&(k, p)| {
          kept[k].get(p..p + chain.len()) == Some(chain.as_slice())
        })
      });
      if subsumed {
        continue;
      }
      for (p, id) in chain.iter().enumerate() {
        positions.entry(*id).or_default().push((kept.len(), p));
      }
      kept.push(chain);
    }

    kept
      .into_iter()
      .map(|c| c.into_iter().map(str::to_owned).collect())
      .collect()
  }
}

struct Tracer<'g, 'a> {
  graph:   &'g CriticalGraph<'a>,
  /// Longest path found from a node in a traversal that was not cut short.
  memo:    HashMap<&'a str, Vec<&'a str>>,
  on_path: HashSet<&'a str>,
  max_len: usize,
}

impl<'a> Tracer<'_, 'a> {
  /// Depth-first longest simple path starting at `node`. Nodes already on
  /// the current path are skipped, so cycles end the path instead of looping.
  /// The flag is `false` when the depth cap cut the search short.
  fn longest_from(&mut self, node: &'a str) -> (Vec<&'a str>, bool) {
    if let Some(path) = self.memo.get(node) {
      return (path.clone(), true);
    }
    if self.on_path.len() + 1 >= self.max_len {
      return (vec![node], false);
    }

    self.on_path.insert(node);
    let mut best: Vec<&'a str> = Vec::new();
    let mut complete = true;
    let next_nodes = self.graph.adjacency.get(node).cloned().unwrap_or_default();
    for next in next_nodes {
      if self.on_path.contains(next) {
        continue;
      }
      let (mut tail, tail_complete) = self.longest_from(next);
      complete &= tail_complete;
      // A memoised tail may run back into the current path.
      if let Some(cut) = tail.iter().position(|id| self.on_path.contains(id)) {
        tail.truncate(cut);
      }
      if tail.len() > best.len() {
        best = tail;
      }
    }
    self.on_path.remove(node);

    let mut path = Vec::with_capacity(best.len() + 1);
    path.push(node);
    path.extend(best);
    if complete {
      self.memo.insert(node, path.clone());
    }
    (path, complete)
  }
}
