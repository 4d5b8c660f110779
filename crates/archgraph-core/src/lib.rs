//! Core types for the archgraph merge engine.
//!
//! Entities, relationships, the conflict-resolving merger, the compaction
//! planner and the [`store::GraphStore`] abstraction. Free of HTTP and
//! database dependencies; every other crate in the workspace depends on it.

// Native `async fn` in traits; the returned futures carry explicit `Send`
// bounds where needed.
#![allow(async_fn_in_trait)]

pub mod compaction;
pub mod config;
pub mod discovery;
pub mod entity;
pub mod error;
pub mod footprint;
pub mod merge;
pub mod relationship;
pub mod store;

pub use error::{Error, Result};
