//! [`GraphMergeEngine`]: concurrent, budget-aware writes over a
//! [`GraphStore`].

use std::{
  sync::{
    Arc, Mutex as StdMutex, MutexGuard, PoisonError,
    atomic::{AtomicBool, Ordering},
  },
  time::Duration,
};

use archgraph_core::{
  compaction::{
    BudgetUnreachable, CompactionPlan, CompactionPlanner, CompressionMetadata,
  },
  config::GraphConfig,
  discovery::{Completeness, ConflictResolution, DiscoverySource},
  entity::{Entity, EntityId, EntityObservation},
  merge::{ConflictResolvingMerger, MergeOutcome},
  relationship::{Relationship, generate_id},
  store::{EntityQuery, GraphStore, RelationshipQuery},
};
use serde::Serialize;
use tokio::{
  sync::{Mutex, RwLock, watch},
  task::JoinHandle,
  time::MissedTickBehavior,
};
use tracing::{debug, info, warn};

use crate::{
  Error, Result,
  budget::{BudgetMonitor, BudgetReport, BudgetState},
  lock::KeyedLocks,
  working_set::{WorkingSet, WorkingSnapshot},
};

// ─── Outcomes ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct EntityWriteOutcome {
  pub entity:       Entity,
  /// `true` when no stored entity existed before this write.
  pub created:      bool,
  /// Conflicts resolved by this write only.
  pub resolutions:  Vec<ConflictResolution>,
  /// Adjacency members restored from stored relationships.
  pub healed_links: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RelationshipWriteOutcome {
  pub relationship: Relationship,
  /// Endpoints not stored yet. Their adjacency is filled in when they are
  /// first added.
  pub pending:      Vec<EntityId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompactionReport {
  pub before:   BudgetReport,
  pub after:    BudgetReport,
  pub manifest: CompressionMetadata,
  pub warning:  Option<BudgetUnreachable>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
  pub relationships: usize,
  /// Endpoint slots skipped because the entity is not stored.
  pub pending:       usize,
}

// ─── Engine ──────────────────────────────────────────────────────────────────

/// The concurrent graph-merge engine.
///
/// Cloning is cheap; clones share the store, locks, working set and budget
/// monitor.
pub struct GraphMergeEngine<S> {
  inner: Arc<Inner<S>>,
}

impl<S> Clone for GraphMergeEngine<S> {
  fn clone(&self) -> Self { Self { inner: self.inner.clone() } }
}

struct Inner<S> {
  store:     S,
  merger:    ConflictResolvingMerger,
  planner:   CompactionPlanner,
  locks:     KeyedLocks,
  working:   RwLock<WorkingSet>,
  monitor:   StdMutex<BudgetMonitor>,
  /// Held for the duration of a compaction run.
  compactor: Mutex<()>,
  scheduled: AtomicBool,
}

impl<S: GraphStore> GraphMergeEngine<S> {
  pub fn new(store: S, config: GraphConfig) -> Result<Self> {
    config.validate()?;
    let GraphConfig { merge, locks, budget, compaction } = config;

    Ok(Self {
      inner: Arc::new(Inner {
        store,
        merger: ConflictResolvingMerger::new(merge),
        planner: CompactionPlanner::new(compaction),
        locks: KeyedLocks::new(Duration::from_millis(locks.timeout_ms)),
        working: RwLock::new(WorkingSet::default()),
        monitor: StdMutex::new(BudgetMonitor::new(budget)),
        compactor: Mutex::new(()),
        scheduled: AtomicBool::new(false),
      }),
    })
  }

  pub fn store(&self) -> &S { &self.inner.store }

  pub fn locks(&self) -> &KeyedLocks { &self.inner.locks }

  // ── Writes ────────────────────────────────────────────────────────────────

  /// Merge `observed` into the stored entity with the same id, or create it.
  ///
  /// The read-merge-write runs under the entity's lock. A validation failure
  /// leaves the store untouched.
  pub async fn add_entity(
    &self,
    observed: EntityObservation,
    source: DiscoverySource,
  ) -> Result<EntityWriteOutcome> {
    self.relieve_pressure().await?;

    let id = observed.id.clone();
    let inner = self.inner.clone();
    let outcome = self
      .inner
      .locks
      .with_lock(&id, move || async move {
        inner.merge_entity(observed, source).await
      })
      .await?;

    self.after_write().await;
    Ok(outcome)
  }

  /// Persist `relationship`, then update both endpoints' adjacency under
  /// the pair lock.
  ///
  /// An empty id is replaced by a generated one. Writing an existing id
  /// again updates the record, but only if it still names the same edge;
  /// moving an id to other endpoints or another type is a validation error.
  /// The record is stored before any endpoint is touched, so it survives an
  /// adjacency failure.
  pub async fn add_relationship(
    &self,
    mut relationship: Relationship,
  ) -> Result<RelationshipWriteOutcome> {
    if relationship.id.trim().is_empty() {
      relationship.id = generate_id();
    }
    relationship.validate()?;
    self.relieve_pressure().await?;

    let inner = self.inner.clone();
    let record = relationship.clone();
    self
      .inner
      .locks
      .with_lock(&relationship_key(&relationship.id), move || async move {
        inner.store_relationship(record).await
      })
      .await?;

    let pending = self.link_endpoints(relationship.clone()).await?;
    if !pending.is_empty() {
      warn!(
        relationship = %relationship.id,
        ?pending,
        "relationship endpoints not stored yet; adjacency pending"
      );
    }

    self.after_write().await;
    Ok(RelationshipWriteOutcome { relationship, pending })
  }

  async fn link_endpoints(&self, relationship: Relationship) -> Result<Vec<EntityId>> {
    let from = relationship.from_entity_id.clone();
    let to = relationship.to_entity_id.clone();
    let inner = self.inner.clone();
    self
      .inner
      .locks
      .with_locks(&[from.as_str(), to.as_str()], move || async move {
        inner.apply_adjacency(&relationship).await
      })
      .await
  }

  /// Replay the adjacency update of every stored relationship.
  ///
  /// Repairs adjacency left stale by a failed endpoint update. Safe to run
  /// alongside regular writes.
  pub async fn reconcile_adjacency(&self) -> Result<ReconcileReport> {
    let all = self
      .inner
      .store
      .list_relationships(&RelationshipQuery::default())
      .await
      .map_err(Error::storage)?;

    let mut report = ReconcileReport::default();
    for relationship in all {
      report.pending += self.link_endpoints(relationship).await?.len();
      report.relationships += 1;
    }
    info!(
      relationships = report.relationships,
      pending = report.pending,
      "adjacency reconciled"
    );
    Ok(report)
  }

  /// Reload a compacted entity, and its relationships to entities already
  /// in the working set, from the store.
  pub async fn rehydrate(&self, id: &str) -> Result<Option<Entity>> {
    let inner = self.inner.clone();
    let key = id.to_owned();
    let entity = self
      .inner
      .locks
      .with_lock(id, move || async move { inner.rehydrate(&key).await })
      .await?;

    if entity.is_some() {
      self.after_write().await;
    }
    Ok(entity)
  }

  // ── Reads ─────────────────────────────────────────────────────────────────

  pub async fn get_entity(&self, id: &str) -> Result<Option<Entity>> {
    self.inner.store.get_entity(id).await.map_err(Error::storage)
  }

  pub async fn get_relationship(&self, id: &str) -> Result<Option<Relationship>> {
    self.inner.store.get_relationship(id).await.map_err(Error::storage)
  }

  pub async fn list_entities(&self, query: &EntityQuery) -> Result<Vec<Entity>> {
    self.inner.store.list_entities(query).await.map_err(Error::storage)
  }

  pub async fn list_relationships(
    &self,
    query: &RelationshipQuery,
  ) -> Result<Vec<Relationship>> {
    self
      .inner
      .store
      .list_relationships(query)
      .await
      .map_err(Error::storage)
  }

  pub async fn working_set(&self) -> WorkingSnapshot {
    self.inner.working.read().await.snapshot()
  }

  pub async fn latest_manifest(&self) -> Result<Option<CompressionMetadata>> {
    self.inner.store.latest_manifest().await.map_err(Error::storage)
  }

  // ── Budget ────────────────────────────────────────────────────────────────

  pub async fn usage(&self) -> BudgetReport {
    let tokens = self.inner.working.read().await.tokens();
    self.inner.monitor().report(tokens)
  }

  /// Observe the current footprint and act on it: compact now when
  /// critical, in the background when over the warning threshold.
  pub async fn check_budget(&self) -> Result<BudgetReport> {
    match self.observe().await {
      BudgetState::Critical => {
        self.compact_if_changed().await?;
      }
      BudgetState::Warning => self.schedule_compaction(),
      BudgetState::Normal => {}
    }
    Ok(self.usage().await)
  }

  /// Compact the working set now. Runs are serialised; a caller arriving
  /// during a run waits for it and then runs its own.
  pub async fn compact(&self) -> Result<CompactionReport> {
    let _running = self.inner.compactor.lock().await;
    self.run_compaction().await
  }

  /// Compact unless nothing was written since the last run installed its
  /// selection.
  async fn compact_if_changed(&self) -> Result<Option<CompactionReport>> {
    let _running = self.inner.compactor.lock().await;
    if self.inner.working.read().await.is_planned() {
      debug!("working set unchanged since last compaction; skipping");
      return Ok(None);
    }
    self.run_compaction().await.map(Some)
  }

  /// Plan over the full stored graph and install the selection as the
  /// working set. The caller holds `compactor`.
  async fn run_compaction(&self) -> Result<CompactionReport> {
    let inner = &self.inner;
    let (plan, before_tokens, after_tokens) = {
      // Writers store a record before upserting it here, so holding the
      // write lock across the reads keeps the store and the installed
      // selection consistent.
      let mut working = inner.working.write().await;
      let before = working.tokens();
      let entities = inner
        .store
        .list_entities(&EntityQuery::default())
        .await
        .map_err(Error::storage)?;
      let relationships = inner
        .store
        .list_relationships(&RelationshipQuery::default())
        .await
        .map_err(Error::storage)?;
      let mut plan = inner.planner.plan(&entities, &relationships);
      working.replace(
        std::mem::take(&mut plan.entities),
        std::mem::take(&mut plan.relationships),
      );
      (plan, before, working.tokens())
    };
    let CompactionPlan { chains, manifest, warning, .. } = plan;

    let (before, after) = {
      let mut monitor = inner.monitor();
      let before = monitor.report(before_tokens);
      if let Some(t) = monitor.compaction_completed(after_tokens) {
        info!(from = %t.from, to = %t.to, tokens = after_tokens, "budget state changed");
      }
      (before, monitor.report(after_tokens))
    };

    info!(
      run_id = %manifest.run_id,
      original = manifest.original_entities,
      preserved = manifest.preserved_entities,
      compacted = manifest.compacted_entities,
      chains = chains.len(),
      reduction = manifest.reduction,
      aggressive = manifest.aggressive_pass,
      "compaction finished"
    );

    inner.store.save_manifest(&manifest).await.map_err(Error::storage)?;
    inner
      .store
      .prune_manifests(inner.planner.config().retained_manifests)
      .await
      .map_err(Error::storage)?;

    Ok(CompactionReport { before, after, manifest, warning })
  }

  /// Start a task that runs [`check_budget`](Self::check_budget) every
  /// `period` until [`BudgetWatch::shutdown`] is called.
  pub fn start_budget_watch(&self, period: Duration) -> BudgetWatch {
    let (stop, mut stopped) = watch::channel(false);
    let engine = self.clone();
    let period = period.max(Duration::from_millis(1));

    let handle = tokio::spawn(async move {
      let mut ticks = tokio::time::interval(period);
      ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
      loop {
        tokio::select! {
          _ = ticks.tick() => {
            if let Err(e) = engine.check_budget().await {
              warn!(error = %e, "periodic budget check failed");
            }
          }
          _ = stopped.changed() => break,
        }
      }
      debug!("budget watch stopped");
    });

    BudgetWatch { stop, handle }
  }

  async fn observe(&self) -> BudgetState {
    let tokens = self.inner.working.read().await.tokens();
    let mut monitor = self.inner.monitor();
    if let Some(t) = monitor.observe(tokens) {
      info!(from = %t.from, to = %t.to, tokens, "budget state changed");
    }
    monitor.state()
  }

  /// Writers compact synchronously while the budget is critical.
  async fn relieve_pressure(&self) -> Result<()> {
    let critical = self.inner.monitor().state() == BudgetState::Critical;
    if critical && self.compact_if_changed().await?.is_some() {
      warn!("working set over critical threshold; compacted before write");
    }
    Ok(())
  }

  async fn after_write(&self) {
    if self.observe().await >= BudgetState::Warning {
      self.schedule_compaction();
    }
  }

  fn schedule_compaction(&self) {
    if self.inner.scheduled.swap(true, Ordering::AcqRel) {
      return;
    }
    let engine = self.clone();
    tokio::spawn(async move {
      if let Err(e) = engine.compact_if_changed().await {
        warn!(error = %e, "background compaction failed");
      }
      engine.inner.scheduled.store(false, Ordering::Release);
    });
  }
}

/// Handle to the periodic budget check.
pub struct BudgetWatch {
  stop:   watch::Sender<bool>,
  handle: JoinHandle<()>,
}

impl BudgetWatch {
  /// Stop the task and wait for an in-flight check to finish.
  pub async fn shutdown(self) {
    let _ = self.stop.send(true);
    let _ = self.handle.await;
  }
}

// ─── Critical sections ───────────────────────────────────────────────────────

impl<S: GraphStore> Inner<S> {
  fn monitor(&self) -> MutexGuard<'_, BudgetMonitor> {
    self.monitor.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Persist `relationship` unless its id already names a different edge.
  async fn store_relationship(&self, relationship: Relationship) -> Result<()> {
    if let Some(stored) = self
      .store
      .get_relationship(&relationship.id)
      .await
      .map_err(Error::storage)?
    {
      relationship.check_rewrite_of(&stored)?;
    }
    self
      .store
      .put_relationship(&relationship)
      .await
      .map_err(Error::storage)?;
    self.working.write().await.upsert_relationship(relationship);
    Ok(())
  }

  async fn merge_entity(
    &self,
    observed: EntityObservation,
    source: DiscoverySource,
  ) -> Result<EntityWriteOutcome> {
    let current = self
      .store
      .get_entity(&observed.id)
      .await
      .map_err(Error::storage)?;
    let MergeOutcome { mut entity, resolutions, created } =
      self.merger.merge(&observed, current.as_ref(), &source)?;

    let touching = self
      .store
      .list_relationships(&RelationshipQuery::touching(entity.id.clone()))
      .await
      .map_err(Error::storage)?;
    let before = entity.dependencies.len() + entity.dependents.len();
    for relationship in &touching {
      link(&mut entity, relationship);
    }
    let healed_links = entity.dependencies.len() + entity.dependents.len() - before;
    if healed_links > 0 {
      entity.discovery.completeness = Completeness::of(&entity);
    }

    self.store.put_entity(&entity).await.map_err(Error::storage)?;
    self.working.write().await.upsert_entity(entity.clone());

    debug!(
      id = %entity.id,
      version = entity.version(),
      created,
      conflicts = resolutions.len(),
      healed_links,
      "entity merged"
    );
    Ok(EntityWriteOutcome { entity, created, resolutions, healed_links })
  }

  /// Returns the endpoints that are not stored.
  async fn apply_adjacency(&self, relationship: &Relationship) -> Result<Vec<EntityId>> {
    let mut pending = Vec::new();
    for id in [&relationship.from_entity_id, &relationship.to_entity_id] {
      let Some(mut entity) = self.store.get_entity(id).await.map_err(Error::storage)?
      else {
        pending.push(id.clone());
        continue;
      };
      if link(&mut entity, relationship) {
        entity.discovery.completeness = Completeness::of(&entity);
        self.store.put_entity(&entity).await.map_err(Error::storage)?;
        self.working.write().await.upsert_entity(entity);
      }
    }
    Ok(pending)
  }

  async fn rehydrate(&self, id: &str) -> Result<Option<Entity>> {
    let Some(entity) = self.store.get_entity(id).await.map_err(Error::storage)?
    else {
      return Ok(None);
    };
    let touching = self
      .store
      .list_relationships(&RelationshipQuery::touching(id))
      .await
      .map_err(Error::storage)?;

    let mut working = self.working.write().await;
    working.upsert_entity(entity.clone());
    let mut restored = 0;
    for relationship in touching {
      let other = relationship.other_end(id).unwrap_or_default();
      if working.contains_entity(other) {
        working.upsert_relationship(relationship);
        restored += 1;
      }
    }
    debug!(id, restored, "entity rehydrated");
    Ok(Some(entity))
  }
}

/// Lock key serialising writes to one relationship id.
fn relationship_key(id: &str) -> String { format!("relationship:{id}") }

/// Fold the adjacency implied by `relationship` into `entity`: the source
/// lists the target as a dependent and the target lists the source as a
/// dependency, mirrored when bidirectional. Returns whether anything changed.
fn link(entity: &mut Entity, relationship: &Relationship) -> bool {
  let (from, to) = (&relationship.from_entity_id, &relationship.to_entity_id);
  let mut changed = false;
  if &entity.id == from {
    changed |= entity.dependents.insert(to.clone());
    if relationship.bidirectional {
      changed |= entity.dependencies.insert(to.clone());
    }
  }
  if &entity.id == to {
    changed |= entity.dependencies.insert(from.clone());
    if relationship.bidirectional {
      changed |= entity.dependents.insert(from.clone());
    }
  }
  changed
}
