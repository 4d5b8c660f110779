//! Integration tests for `SqliteStore` against an in-memory database.

use archgraph_core::{
  compaction::CompactionPlanner,
  discovery::DiscoverySource,
  entity::{AnalysisData, Entity, EntityObservation, EntityType},
  merge::ConflictResolvingMerger,
  relationship::{Relationship, RelationshipType},
  store::{EntityQuery, GraphStore, RelationshipQuery},
};

use chrono::DateTime;
use serde_json::{Map, Value, json};

use crate::SqliteStore;

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn annotations(value: Value) -> Map<String, Value> {
  value.as_object().cloned().expect("object literal")
}

fn entity(id: &str, entity_type: EntityType, location: &str) -> Entity {
  let observed = EntityObservation::new(id, entity_type, location)
    .with_dependencies(["Database"])
    .with_business_context("Handles user accounts.");
  ConflictResolvingMerger::default()
    .merge(&observed, None, &DiscoverySource::new("import-scan"))
    .unwrap()
    .entity
}

// ─── Entities ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn put_and_get_entity() {
  let s = store().await;
  let e = entity("UserService", EntityType::Service, "src/user/service.rs");

  s.put_entity(&e).await.unwrap();
  let fetched = s.get_entity("UserService").await.unwrap();
  assert_eq!(fetched, Some(e));
}

#[tokio::test]
async fn fully_populated_records_round_trip() {
  let s = store().await;
  let merger = ConflictResolvingMerger::default();

  let mut first = EntityObservation::new(
    "UserService",
    EntityType::custom("Saga"),
    "src/user/service.rs",
  )
  .with_dependencies(["Database"])
  .with_dependents(["AuthController"])
  .with_business_context("Handles user accounts.");
  first.chain_context = "AuthController -> UserService -> Database".into();
  first.domain_context = Some("Identity and access.".into());
  first.last_modified = DateTime::from_timestamp(1_700_000_000, 250_000_000);
  first.analysis_data = Some(AnalysisData {
    usage_count:       Some(12),
    inheritance_chain: vec!["BaseService".into()],
    business_rules:    vec!["Emails are unique.".into()],
    patterns:          vec!["singleton".into()],
    annotations:       annotations(json!({ "owner": "identity", "layers": [1, 2] })),
  });
  let mut source = DiscoverySource::new("import-scan")
    .with_agent("agent-1")
    .with_confidence(0.5);
  source.context_path = vec!["AuthController".into(), "UserService".into()];
  let created = merger.merge(&first, None, &source).unwrap().entity;

  let mut second = first.clone();
  second.priority = 1;
  second.business_context = "Owns the account lifecycle.".into();
  second.analysis_data = Some(AnalysisData {
    usage_count: Some(15),
    annotations: annotations(json!({ "owner": "platform" })),
    ..Default::default()
  });
  let outcome = merger
    .merge(
      &second,
      Some(&created),
      &DiscoverySource::new("call-graph")
        .with_agent("agent-2")
        .with_confidence(0.875),
    )
    .unwrap();
  assert!(!outcome.resolutions.is_empty());
  let e = outcome.entity;
  assert_eq!(e.version(), 2);
  assert!(e.domain_context.is_some());
  assert!(e.analysis_data.is_some());
  assert_eq!(e.discovery.sources[0].context_path.len(), 2);

  s.put_entity(&e).await.unwrap();
  assert_eq!(s.get_entity("UserService").await.unwrap(), Some(e.clone()));
  let listed = s.list_entities(&EntityQuery::default()).await.unwrap();
  assert_eq!(listed, [e]);

  let mut r = Relationship::new("UserService", "Database", RelationshipType::DependsOn);
  r.strength = 0.375;
  r.bidirectional = true;
  r.timestamp = DateTime::from_timestamp(1_700_000_000, 123_456_789).unwrap();
  s.put_relationship(&r).await.unwrap();
  assert_eq!(s.get_relationship(&r.id).await.unwrap(), Some(r.clone()));
  let listed = s
    .list_relationships(&RelationshipQuery::touching("Database"))
    .await
    .unwrap();
  assert_eq!(listed, [r]);
}

#[tokio::test]
async fn get_entity_missing_returns_none() {
  let s = store().await;
  assert!(s.get_entity("Nope").await.unwrap().is_none());
}

#[tokio::test]
async fn put_entity_replaces_previous_version() {
  let s = store().await;
  let mut e = entity("UserService", EntityType::Service, "src/user/service.rs");
  s.put_entity(&e).await.unwrap();

  e.priority = 1;
  e.discovery.version = 2;
  s.put_entity(&e).await.unwrap();

  let all = s.list_entities(&EntityQuery::default()).await.unwrap();
  assert_eq!(all.len(), 1);
  assert_eq!(all[0].priority, 1);
  assert_eq!(all[0].version(), 2);
}

#[tokio::test]
async fn list_entities_filters() {
  let s = store().await;
  s.put_entity(&entity("UserService", EntityType::Service, "src/user/service.rs"))
    .await
    .unwrap();
  s.put_entity(&entity("UserRepo", EntityType::Repository, "src/user/repo.rs"))
    .await
    .unwrap();
  let mut billing = entity("Billing", EntityType::Service, "src/billing.rs");
  billing.priority = 5;
  billing.processed = true;
  s.put_entity(&billing).await.unwrap();

  let services = s
    .list_entities(&EntityQuery {
      entity_type: Some(EntityType::Service),
      ..Default::default()
    })
    .await
    .unwrap();
  let ids: Vec<_> = services.iter().map(|e| e.id.as_str()).collect();
  assert_eq!(ids, ["Billing", "UserService"]);

  let under_user = s
    .list_entities(&EntityQuery {
      location_prefix: Some("src/user/".into()),
      ..Default::default()
    })
    .await
    .unwrap();
  assert_eq!(under_user.len(), 2);

  let important = s
    .list_entities(&EntityQuery { max_priority: Some(3), ..Default::default() })
    .await
    .unwrap();
  assert!(important.iter().all(|e| e.id != "Billing"));

  let processed = s
    .list_entities(&EntityQuery { processed: Some(true), ..Default::default() })
    .await
    .unwrap();
  assert_eq!(processed.len(), 1);
}

#[tokio::test]
async fn list_entities_pages_in_id_order() {
  let s = store().await;
  for id in ["c", "a", "d", "b"] {
    s.put_entity(&entity(id, EntityType::Module, "src/lib.rs")).await.unwrap();
  }

  let page = s
    .list_entities(&EntityQuery {
      limit: Some(2),
      offset: Some(1),
      ..Default::default()
    })
    .await
    .unwrap();
  let ids: Vec<_> = page.iter().map(|e| e.id.as_str()).collect();
  assert_eq!(ids, ["b", "c"]);

  let tail = s
    .list_entities(&EntityQuery { offset: Some(3), ..Default::default() })
    .await
    .unwrap();
  assert_eq!(tail.len(), 1);
}

#[tokio::test]
async fn delete_entity_reports_existence() {
  let s = store().await;
  s.put_entity(&entity("A", EntityType::Module, "a.rs")).await.unwrap();
  assert!(s.delete_entity("A").await.unwrap());
  assert!(!s.delete_entity("A").await.unwrap());
}

// ─── Relationships ───────────────────────────────────────────────────────────

#[tokio::test]
async fn put_and_get_relationship() {
  let s = store().await;
  let mut r = Relationship::new("UserService", "Database", RelationshipType::DependsOn);
  r.strength = 0.75;
  r.bidirectional = true;

  s.put_relationship(&r).await.unwrap();
  let fetched = s.get_relationship(&r.id).await.unwrap();
  assert_eq!(fetched, Some(r));
}

#[tokio::test]
async fn relationship_endpoints_need_not_exist() {
  let s = store().await;
  let r = Relationship::new("Ghost", "Phantom", RelationshipType::Calls);
  s.put_relationship(&r).await.unwrap();
  assert!(s.get_entity("Ghost").await.unwrap().is_none());
  assert!(s.get_relationship(&r.id).await.unwrap().is_some());
}

#[tokio::test]
async fn relationship_put_is_idempotent_by_id() {
  let s = store().await;
  let r = Relationship::new("A", "B", RelationshipType::Uses);
  s.put_relationship(&r).await.unwrap();
  s.put_relationship(&r).await.unwrap();

  let all = s.list_relationships(&RelationshipQuery::default()).await.unwrap();
  assert_eq!(all.len(), 1);
}

#[tokio::test]
async fn list_relationships_filters() {
  let s = store().await;
  for (from, to, t) in [
    ("A", "B", RelationshipType::Calls),
    ("B", "C", RelationshipType::DependsOn),
    ("C", "A", RelationshipType::Calls),
    ("D", "E", RelationshipType::Tests),
  ] {
    s.put_relationship(&Relationship::new(from, to, t)).await.unwrap();
  }

  let touching_a = s
    .list_relationships(&RelationshipQuery::touching("A"))
    .await
    .unwrap();
  assert_eq!(touching_a.len(), 2);
  assert!(touching_a.iter().all(|r| r.touches("A")));

  let from_b = s
    .list_relationships(&RelationshipQuery {
      from: Some("B".into()),
      ..Default::default()
    })
    .await
    .unwrap();
  assert_eq!(from_b.len(), 1);
  assert_eq!(from_b[0].to_entity_id, "C");

  let calls = s
    .list_relationships(&RelationshipQuery {
      relationship_type: Some(RelationshipType::Calls),
      ..Default::default()
    })
    .await
    .unwrap();
  assert_eq!(calls.len(), 2);

  let into_e = s
    .list_relationships(&RelationshipQuery {
      to: Some("E".into()),
      ..Default::default()
    })
    .await
    .unwrap();
  assert_eq!(into_e[0].relationship_type, RelationshipType::Tests);
}

#[tokio::test]
async fn delete_relationship_reports_existence() {
  let s = store().await;
  let r = Relationship::new("A", "B", RelationshipType::Uses);
  s.put_relationship(&r).await.unwrap();
  assert!(s.delete_relationship(&r.id).await.unwrap());
  assert!(!s.delete_relationship(&r.id).await.unwrap());
}

// ─── Manifests ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn latest_manifest_is_most_recently_saved() {
  let s = store().await;
  assert!(s.latest_manifest().await.unwrap().is_none());

  let planner = CompactionPlanner::default();
  let first = planner.plan(&[], &[]).manifest;
  let e = entity("A", EntityType::Service, "a.rs");
  let second = planner.plan(std::slice::from_ref(&e), &[]).manifest;

  s.save_manifest(&first).await.unwrap();
  s.save_manifest(&second).await.unwrap();

  let latest = s.latest_manifest().await.unwrap().unwrap();
  assert_eq!(latest.run_id, second.run_id);
  assert_eq!(latest.original_entities, 1);
}

#[tokio::test]
async fn prune_keeps_the_most_recent_manifests() {
  let s = store().await;
  let planner = CompactionPlanner::default();
  let manifests: Vec<_> = (0..3).map(|_| planner.plan(&[], &[]).manifest).collect();
  for m in &manifests {
    s.save_manifest(m).await.unwrap();
  }

  assert_eq!(s.prune_manifests(2).await.unwrap(), 1);
  assert_eq!(s.prune_manifests(2).await.unwrap(), 0);
  let latest = s.latest_manifest().await.unwrap().unwrap();
  assert_eq!(latest.run_id, manifests[2].run_id);

  assert_eq!(s.prune_manifests(1).await.unwrap(), 1);
  assert_eq!(s.latest_manifest().await.unwrap().unwrap().run_id, latest.run_id);
}

// ─── Persistence ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn data_survives_reopen() {
  let path = std::env::temp_dir()
    .join(format!("archgraph-{}.db", uuid::Uuid::new_v4()));

  {
    let s = SqliteStore::open(&path).await.unwrap();
    s.put_entity(&entity("A", EntityType::Service, "a.rs")).await.unwrap();
    s.put_relationship(&Relationship::new("A", "B", RelationshipType::Calls))
      .await
      .unwrap();
  }

  let s = SqliteStore::open(&path).await.unwrap();
  assert!(s.get_entity("A").await.unwrap().is_some());
  assert_eq!(
    s.list_relationships(&RelationshipQuery::default())
      .await
      .unwrap()
      .len(),
    1
  );
  drop(s);
  let _ = std::fs::remove_file(&path);
}
