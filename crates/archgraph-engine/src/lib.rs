//! The concurrent graph-merge engine.
//!
//! [`GraphMergeEngine`] serialises writers per entity through [`KeyedLocks`],
//! folds observations in with the conflict-resolving merger, persists every
//! record to a [`GraphStore`](archgraph_core::store::GraphStore) and keeps a
//! token-budgeted working set that is compacted when the [`BudgetMonitor`]
//! says so.

pub mod budget;
pub mod engine;
pub mod error;
pub mod lock;
pub mod working_set;

pub use budget::{BudgetMonitor, BudgetReport, BudgetState};
pub use engine::{
  BudgetWatch, CompactionReport, EntityWriteOutcome, GraphMergeEngine,
  ReconcileReport, RelationshipWriteOutcome,
};
pub use error::{Error, Result};
pub use lock::KeyedLocks;
pub use working_set::WorkingSnapshot;
