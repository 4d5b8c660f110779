//! JSON REST API for the archgraph merge engine.
//!
//! Exposes an axum [`Router`] over a [`GraphMergeEngine`] backed by any
//! [`GraphStore`]. TLS, auth and request tracing are the caller's
//! responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", archgraph_api::api_router(engine.clone()))
//! ```

pub mod budget;
pub mod entities;
pub mod error;
pub mod relationships;

use archgraph_core::store::GraphStore;
use archgraph_engine::GraphMergeEngine;
use axum::{
  Router,
  routing::{get, post},
};

pub use error::ApiError;

/// Build a fully-materialised API router for `engine`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S: GraphStore>(engine: GraphMergeEngine<S>) -> Router<()> {
  Router::new()
    // Entities
    .route("/entities", get(entities::list::<S>).post(entities::merge::<S>))
    .route("/entities/{id}", get(entities::get_one::<S>))
    .route("/entities/{id}/rehydrate", post(entities::rehydrate::<S>))
    // Relationships
    .route(
      "/relationships",
      get(relationships::list::<S>).post(relationships::create::<S>),
    )
    .route("/relationships/{id}", get(relationships::get_one::<S>))
    // Budget
    .route("/budget", get(budget::usage::<S>))
    .route("/compact", post(budget::compact::<S>))
    .route("/manifest", get(budget::manifest::<S>))
    .with_state(engine)
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use archgraph_core::config::GraphConfig;
  use archgraph_store_sqlite::SqliteStore;
  use axum::{
    body::Body,
    http::{Request, StatusCode, header},
    response::Response,
  };
  use serde_json::{Value, json};
  use tokio::sync::oneshot;
  use tower::ServiceExt as _;

  use super::*;

  async fn engine_with(config: GraphConfig) -> GraphMergeEngine<SqliteStore> {
    let store = SqliteStore::open_in_memory().await.unwrap();
    GraphMergeEngine::new(store, config).unwrap()
  }

  async fn engine() -> GraphMergeEngine<SqliteStore> {
    engine_with(GraphConfig::default()).await
  }

  fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
      .method("POST")
      .uri(uri)
      .header(header::CONTENT_TYPE, "application/json")
      .body(Body::from(body.to_string()))
      .unwrap()
  }

  fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
  }

  async fn json_body(resp: Response) -> Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
      .await
      .unwrap();
    serde_json::from_slice(&bytes).unwrap()
  }

  fn merge_body(id: &str, deps: &[&str]) -> Value {
    json!({
      "entity": {
        "id": id,
        "entity_type": "Service",
        "location": format!("src/{id}.rs"),
        "dependencies": deps,
        "business_context": "Handles accounts."
      },
      "source": { "method": "import-scan", "agent": "agent-1" }
    })
  }

  #[tokio::test]
  async fn merge_then_get_entity() {
    let engine = engine().await;

    let resp = api_router(engine.clone())
      .oneshot(post("/entities", merge_body("UserService", &["UserRepository"])))
      .await
      .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let outcome = json_body(resp).await;
    assert_eq!(outcome["created"], true);
    assert_eq!(outcome["entity"]["discovery"]["version"], 1);

    let resp = api_router(engine.clone())
      .oneshot(get("/entities/UserService"))
      .await
      .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let entity = json_body(resp).await;
    assert_eq!(entity["dependencies"], json!(["UserRepository"]));

    let resp = api_router(engine)
      .oneshot(get("/entities?entity_type=Service&max_priority=3"))
      .await
      .unwrap();
    assert_eq!(json_body(resp).await.as_array().unwrap().len(), 1);
  }

  #[tokio::test]
  async fn missing_entity_is_404() {
    let resp = api_router(engine().await)
      .oneshot(get("/entities/Nope"))
      .await
      .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert!(json_body(resp).await["error"].is_string());
  }

  #[tokio::test]
  async fn self_reference_is_422() {
    let resp = api_router(engine().await)
      .oneshot(post("/entities", merge_body("Loop", &["Loop"])))
      .await
      .unwrap();
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
  }

  #[tokio::test]
  async fn lock_timeout_is_503() {
    let mut config = GraphConfig::default();
    config.locks.timeout_ms = 50;
    let engine = engine_with(config).await;
    let (release, hold) = oneshot::channel::<()>();

    let holder = {
      let engine = engine.clone();
      tokio::spawn(async move {
        engine
          .locks()
          .with_lock("UserService", || async move {
            let _ = hold.await;
            Ok(())
          })
          .await
      })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let resp = api_router(engine)
      .oneshot(post("/entities", merge_body("UserService", &[])))
      .await
      .unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

    release.send(()).unwrap();
    holder.await.unwrap().unwrap();
  }

  #[tokio::test]
  async fn create_and_fetch_relationship() {
    let engine = engine().await;

    let resp = api_router(engine.clone())
      .oneshot(post(
        "/relationships",
        json!({
          "from_entity_id": "AuthController",
          "to_entity_id": "UserService",
          "relationship_type": "CALLS"
        }),
      ))
      .await
      .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let outcome = json_body(resp).await;
    assert_eq!(outcome["pending"], json!(["AuthController", "UserService"]));
    let id = outcome["relationship"]["id"].as_str().unwrap().to_owned();

    let resp = api_router(engine.clone())
      .oneshot(get(&format!("/relationships/{id}")))
      .await
      .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp).await["strength"], 1.0);

    let resp = api_router(engine)
      .oneshot(get("/relationships?entity_id=UserService&relationship_type=CALLS"))
      .await
      .unwrap();
    assert_eq!(json_body(resp).await.as_array().unwrap().len(), 1);
  }

  #[tokio::test]
  async fn reusing_a_relationship_id_for_another_edge_is_422() {
    let engine = engine().await;
    let edge = |from: &str, to: &str| {
      json!({
        "id": "r1",
        "from_entity_id": from,
        "to_entity_id": to,
        "relationship_type": "DEPENDS_ON"
      })
    };

    let resp = api_router(engine.clone())
      .oneshot(post("/relationships", edge("A", "B")))
      .await
      .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = api_router(engine.clone())
      .oneshot(post("/relationships", edge("C", "D")))
      .await
      .unwrap();
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let resp = api_router(engine)
      .oneshot(get("/relationships/r1"))
      .await
      .unwrap();
    assert_eq!(json_body(resp).await["from_entity_id"], "A");
  }

  #[tokio::test]
  async fn self_loop_relationship_is_422() {
    let resp = api_router(engine().await)
      .oneshot(post(
        "/relationships",
        json!({
          "from_entity_id": "A",
          "to_entity_id": "A",
          "relationship_type": "USES"
        }),
      ))
      .await
      .unwrap();
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
  }

  #[tokio::test]
  async fn budget_compaction_and_manifest() {
    let engine = engine().await;

    let resp = api_router(engine.clone())
      .oneshot(get("/manifest"))
      .await
      .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = api_router(engine.clone())
      .oneshot(get("/budget"))
      .await
      .unwrap();
    let budget = json_body(resp).await;
    assert_eq!(budget["state"], "normal");
    assert_eq!(budget["max_tokens"], 100_000);

    api_router(engine.clone())
      .oneshot(post("/entities", merge_body("UserService", &[])))
      .await
      .unwrap();

    let resp = api_router(engine.clone())
      .oneshot(post("/compact", json!({})))
      .await
      .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let report = json_body(resp).await;
    let run_id = report["manifest"]["run_id"].clone();

    let resp = api_router(engine)
      .oneshot(get("/manifest"))
      .await
      .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp).await["run_id"], run_id);
  }

  #[tokio::test]
  async fn rehydrate_unknown_entity_is_404() {
    let resp = api_router(engine().await)
      .oneshot(post("/entities/Ghost/rehydrate", json!({})))
      .await
      .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
  }
}
