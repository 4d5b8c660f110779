//! Token-budget state machine for the working set.

use archgraph_core::config::BudgetConfig;
use serde::{Deserialize, Serialize};
use strum::Display;

/// Pressure level of the working set. Ordered by severity.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Serialize,
  Deserialize,
  Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BudgetState {
  Normal,
  /// Compaction is scheduled in the background; writers proceed.
  Warning,
  /// Writers compact synchronously before proceeding.
  Critical,
}

/// A point-in-time view of the budget.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BudgetReport {
  pub state:       BudgetState,
  pub used_tokens: usize,
  pub max_tokens:  usize,
  /// `used_tokens / max_tokens`.
  pub usage:       f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
  pub from: BudgetState,
  pub to:   BudgetState,
}

/// Tracks the working-set footprint against the warning and critical
/// thresholds.
///
/// Observations only ever escalate the state. Relief comes exclusively from
/// [`compaction_completed`](Self::compaction_completed), so a footprint that
/// dips under a threshold on its own does not mask the need to compact.
#[derive(Debug, Clone)]
pub struct BudgetMonitor {
  config: BudgetConfig,
  state:  BudgetState,
}

impl BudgetMonitor {
  pub fn new(config: BudgetConfig) -> Self {
    Self { config, state: BudgetState::Normal }
  }

  pub fn state(&self) -> BudgetState { self.state }

  pub fn usage(&self, tokens: usize) -> f64 {
    tokens as f64 / self.config.max_tokens as f64
  }

  /// The state `tokens` would warrant, ignoring history.
  pub fn classify(&self, tokens: usize) -> BudgetState {
    let usage = self.usage(tokens);
    if usage >= self.config.critical_threshold {
      BudgetState::Critical
    } else if usage >= self.config.warning_threshold {
      BudgetState::Warning
    } else {
      BudgetState::Normal
    }
  }

  /// Record a footprint observation. Only escalates.
  pub fn observe(&mut self, tokens: usize) -> Option<Transition> {
    let level = self.classify(tokens);
    (level > self.state).then(|| self.move_to(level))
  }

  /// Record the footprint left by a finished compaction run. The state
  /// follows the new footprint in either direction.
  pub fn compaction_completed(&mut self, tokens: usize) -> Option<Transition> {
    let level = self.classify(tokens);
    (level != self.state).then(|| self.move_to(level))
  }

  pub fn report(&self, tokens: usize) -> BudgetReport {
    BudgetReport {
      state:       self.state,
      used_tokens: tokens,
      max_tokens:  self.config.max_tokens,
      usage:       self.usage(tokens),
    }
  }

  fn move_to(&mut self, to: BudgetState) -> Transition {
    let from = std::mem::replace(&mut self.state, to);
    Transition { from, to }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn monitor() -> BudgetMonitor {
    BudgetMonitor::new(BudgetConfig {
      max_tokens:         1_000,
      warning_threshold:  0.80,
      critical_threshold: 0.95,
    })
  }

  #[test]
  fn thresholds_escalate() {
    let mut m = monitor();
    assert_eq!(m.observe(500), None);
    assert_eq!(
      m.observe(800),
      Some(Transition { from: BudgetState::Normal, to: BudgetState::Warning })
    );
    assert_eq!(
      m.observe(950),
      Some(Transition { from: BudgetState::Warning, to: BudgetState::Critical })
    );
  }

  #[test]
  fn escalation_can_skip_warning() {
    let mut m = monitor();
    m.observe(990);
    assert_eq!(m.state(), BudgetState::Critical);
  }

  #[test]
  fn observations_never_de_escalate() {
    let mut m = monitor();
    m.observe(900);
    assert_eq!(m.observe(100), None);
    assert_eq!(m.state(), BudgetState::Warning);
  }

  #[test]
  fn compaction_relieves_pressure() {
    let mut m = monitor();
    m.observe(960);
    assert_eq!(
      m.compaction_completed(300),
      Some(Transition { from: BudgetState::Critical, to: BudgetState::Normal })
    );
    assert_eq!(m.state(), BudgetState::Normal);
  }

  #[test]
  fn insufficient_compaction_keeps_warning() {
    let mut m = monitor();
    m.observe(960);
    m.compaction_completed(850);
    assert_eq!(m.state(), BudgetState::Warning);
  }

  #[test]
  fn report_serialises_state_in_snake_case() {
    let mut m = monitor();
    m.observe(850);
    let json = serde_json::to_value(m.report(850)).unwrap();
    assert_eq!(json["state"], "warning");
    assert_eq!(json["usage"], 0.85);
  }
}
