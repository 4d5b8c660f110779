//! Token-footprint estimation for budgeted views of the graph.

use serde::Serialize;

/// Rough characters-per-token ratio for JSON-serialised graph records.
pub const CHARS_PER_TOKEN: usize = 4;

/// Estimated token cost of holding `value` in a working context.
///
/// Values that fail to serialise are counted as zero; every graph record
/// serialises infallibly, so this only matters for foreign types.
pub fn estimate_tokens<T: Serialize + ?Sized>(value: &T) -> usize {
  serde_json::to_vec(value)
    .map(|bytes| bytes.len().div_ceil(CHARS_PER_TOKEN))
    .unwrap_or(0)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rounds_up() {
    // `"ab"` serialises to 4 bytes, `"abc"` to 5.
    assert_eq!(estimate_tokens("ab"), 1);
    assert_eq!(estimate_tokens("abc"), 2);
  }
}
