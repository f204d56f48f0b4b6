//! Batch shapes accepted by the dispatcher and the reshaping of results
//! back into the caller's container form.

use crate::error::{DispatchError, Result};
use crate::manager::{TaskKey, TaskOutcome};
use crate::task::RawSpec;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

/// A collection of raw task specs addressed by key.
///
/// Mappings keep their own keys; sequences are keyed by position. `reshape`
/// rebuilds the caller's container from the outcomes recorded per key.
pub trait Batch<A, R> {
  type Key: TaskKey;
  type Output;

  /// Splits the batch into `(key, spec)` entries in submission order.
  fn into_entries(self) -> Result<Vec<(Self::Key, RawSpec<A, R>)>>;

  /// Builds the output container for a batch of `len` entries.
  fn reshape(len: usize, results: HashMap<Self::Key, TaskOutcome<R>>) -> Result<Self::Output>;
}

impl<K: TaskKey, A, R> Batch<A, R> for HashMap<K, RawSpec<A, R>> {
  type Key = K;
  type Output = HashMap<K, TaskOutcome<R>>;

  fn into_entries(self) -> Result<Vec<(K, RawSpec<A, R>)>> {
    Ok(self.into_iter().collect())
  }

  fn reshape(_len: usize, results: HashMap<K, TaskOutcome<R>>) -> Result<Self::Output> {
    Ok(results)
  }
}

impl<K: TaskKey + Ord, A, R> Batch<A, R> for BTreeMap<K, RawSpec<A, R>> {
  type Key = K;
  type Output = BTreeMap<K, TaskOutcome<R>>;

  fn into_entries(self) -> Result<Vec<(K, RawSpec<A, R>)>> {
    Ok(self.into_iter().collect())
  }

  fn reshape(_len: usize, results: HashMap<K, TaskOutcome<R>>) -> Result<Self::Output> {
    Ok(results.into_iter().collect())
  }
}

impl<A, R> Batch<A, R> for Vec<RawSpec<A, R>> {
  type Key = usize;
  type Output = Vec<TaskOutcome<R>>;

  fn into_entries(self) -> Result<Vec<(usize, RawSpec<A, R>)>> {
    Ok(self.into_iter().enumerate().collect())
  }

  fn reshape(len: usize, mut results: HashMap<usize, TaskOutcome<R>>) -> Result<Self::Output> {
    (0..len)
      .map(|index| results.remove(&index).ok_or(DispatchError::IncompleteResult { index }))
      .collect()
  }
}

/// A mapping supplied as an ordered list of `(key, spec)` pairs.
///
/// Unlike `HashMap` input it preserves submission order for the synchronous
/// strategy; a repeated key makes it an invalid batch.
pub struct KeyedBatch<K, A, R> {
  pairs: Vec<(K, RawSpec<A, R>)>,
}

impl<K, A, R> KeyedBatch<K, A, R> {
  pub fn new() -> Self {
    Self { pairs: Vec::new() }
  }

  pub fn push(mut self, key: K, spec: impl Into<RawSpec<A, R>>) -> Self {
    self.pairs.push((key, spec.into()));
    self
  }

  pub fn len(&self) -> usize {
    self.pairs.len()
  }

  pub fn is_empty(&self) -> bool {
    self.pairs.is_empty()
  }
}

impl<K, A, R> Default for KeyedBatch<K, A, R> {
  fn default() -> Self {
    Self::new()
  }
}

impl<K, A, R> From<Vec<(K, RawSpec<A, R>)>> for KeyedBatch<K, A, R> {
  fn from(pairs: Vec<(K, RawSpec<A, R>)>) -> Self {
    Self { pairs }
  }
}

impl<K: fmt::Debug, A: fmt::Debug, R> fmt::Debug for KeyedBatch<K, A, R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_list().entries(self.pairs.iter()).finish()
  }
}

impl<K: TaskKey, A, R> Batch<A, R> for KeyedBatch<K, A, R> {
  type Key = K;
  type Output = HashMap<K, TaskOutcome<R>>;

  fn into_entries(self) -> Result<Vec<(K, RawSpec<A, R>)>> {
    {
      let mut seen = HashSet::with_capacity(self.pairs.len());
      if let Some((key, _)) = self.pairs.iter().find(|(key, _)| !seen.insert(key)) {
        return Err(DispatchError::InvalidBatch(format!("key {:?} appears more than once", key)));
      }
    }
    Ok(self.pairs)
  }

  fn reshape(_len: usize, results: HashMap<K, TaskOutcome<R>>) -> Result<Self::Output> {
    Ok(results)
  }
}
