//! Per-key FIFO locks with bounded waits.
//!
//! Every entity id maps to a fair [`tokio::sync::Mutex`]. Waiters are served
//! in arrival order. Multi-key acquisition always takes keys in lexicographic
//! order so that two writers touching the same pair cannot deadlock.
//!
//! Once every lock is held, the critical section runs on a spawned task that
//! owns the guards: dropping the caller's future before acquisition removes
//! the waiter from the queue, dropping it afterwards does not interrupt the
//! write.

use std::{
  collections::HashMap,
  future::Future,
  sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError},
  time::Duration,
};

use tokio::{
  sync::{Mutex, OwnedMutexGuard},
  time::{Instant, timeout_at},
};
use tracing::debug;

use crate::{Error, Result};

type Table = Arc<StdMutex<HashMap<String, Arc<Mutex<()>>>>>;

fn lock_table(table: &Table) -> MutexGuard<'_, HashMap<String, Arc<Mutex<()>>>> {
  table.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone)]
pub struct KeyedLocks {
  table:   Table,
  timeout: Duration,
}

impl KeyedLocks {
  pub fn new(timeout: Duration) -> Self {
    Self { table: Table::default(), timeout }
  }

  pub fn timeout(&self) -> Duration { self.timeout }

  /// Number of keys that currently have a holder or a waiter.
  pub fn held_keys(&self) -> usize { lock_table(&self.table).len() }

  /// Run `op` while holding the lock for `key`.
  pub async fn with_lock<F, Fut, T>(&self, key: &str, op: F) -> Result<T>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
  {
    self.with_locks(&[key], op).await
  }

  /// Run `op` while holding the locks for every key in `keys`.
  ///
  /// Duplicate keys are locked once. The timeout bounds the total wait for
  /// all keys, not each key separately.
  pub async fn with_locks<F, Fut, T>(&self, keys: &[&str], op: F) -> Result<T>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
  {
    let mut ordered: Vec<String> = keys.iter().map(|k| (*k).to_owned()).collect();
    ordered.sort();
    ordered.dedup();

    let guards = self.acquire(&ordered).await?;
    let critical = op();
    let task = tokio::spawn(async move {
      let out = critical.await;
      drop(guards);
      out
    });
    task.await.map_err(|e| Error::Task(e.to_string()))?
  }

  async fn acquire(&self, keys: &[String]) -> Result<Vec<KeyGuard>> {
    let started = Instant::now();
    let deadline = started + self.timeout;
    let mut guards = Vec::with_capacity(keys.len());

    for key in keys {
      let (slot, mutex) = SlotRef::checkout(&self.table, key);
      match timeout_at(deadline, mutex.lock_owned()).await {
        Ok(guard) => guards.push(KeyGuard { _guard: guard, _slot: slot }),
        Err(_) => {
          let waited = started.elapsed();
          debug!(?keys, ?waited, "lock wait timed out");
          return Err(Error::LockTimeout { keys: keys.to_vec(), waited });
        }
      }
    }
    debug!(?keys, waited = ?started.elapsed(), "locks acquired");
    Ok(guards)
  }
}

// ─── Guards ──────────────────────────────────────────────────────────────────

/// A held lock. Field order matters: the mutex is released before the table
/// entry is considered for eviction.
struct KeyGuard {
  _guard: OwnedMutexGuard<()>,
  _slot:  SlotRef,
}

/// A registered interest in a table entry. The last one dropped removes the
/// entry.
struct SlotRef {
  table: Table,
  key:   String,
  slot:  Option<Arc<Mutex<()>>>,
}

impl SlotRef {
  fn checkout(table: &Table, key: &str) -> (Self, Arc<Mutex<()>>) {
    let mutex = lock_table(table).entry(key.to_owned()).or_default().clone();
    let slot = Self {
      table: table.clone(),
      key:   key.to_owned(),
      slot:  Some(mutex.clone()),
    };
    (slot, mutex)
  }
}

impl Drop for SlotRef {
  fn drop(&mut self) {
    let mut table = lock_table(&self.table);
    drop(self.slot.take());
    if table.get(&self.key).is_some_and(|m| Arc::strong_count(m) == 1) {
      table.remove(&self.key);
    }
  }
}
