use crate::capacity_gate::CapacityGate;
use crate::error::{panic_message, DispatchError, Result};
use crate::notifier::{CompletionNotifier, TaskCompletionInfo, TaskCompletionStatus};
use crate::task::TaskSpec;

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, error, info, info_span, trace, warn};

lazy_static::lazy_static! {
  static ref NEXT_POOL_TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(0);
}

pub(crate) fn next_task_id() -> u64 {
  NEXT_POOL_TASK_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed)
}

/// Outcome recorded for each keyed task: its return value, or the panic it raised.
pub type TaskOutcome<R> = std::result::Result<R, DispatchError>;

/// Bounds applied to result keys.
pub trait TaskKey: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

impl<T: Eq + Hash + Clone + Debug + Send + Sync + 'static> TaskKey for T {}

/// A bounded pool that runs each submitted task on its own OS thread.
///
/// At most `worker_limit` tasks are in flight at once; `submit` blocks the
/// caller while the pool is full. Each worker holds a slot lease that it drops
/// only after recording its result, so capacity tracks running tasks rather
/// than queued ones. A pool is single-use: after [`BoundedPool::drain`] it
/// accepts no more work.
///
/// Outcomes only need to be `Send`: each one sits behind its own mutex in the
/// shared map, so `R` is never shared between threads.
pub struct BoundedPool<K: TaskKey, R: Send + 'static> {
  pool_name: Arc<String>,
  gate: Arc<CapacityGate>,
  results: Arc<DashMap<K, Mutex<TaskOutcome<R>>>>,
  notifier: CompletionNotifier,
}

impl<K: TaskKey, R: Send + 'static> BoundedPool<K, R> {
  pub fn new(worker_limit: usize, pool_name: &str) -> Self {
    if worker_limit == 0 {
      warn!(pool_name = %pool_name, "worker_limit of 0 requested, clamping to 1.");
    }
    let gate = CapacityGate::new(worker_limit);
    info!(pool_name = %pool_name, capacity = gate.capacity(), "Bounded pool created.");

    Self {
      pool_name: Arc::new(pool_name.to_string()),
      gate,
      results: Arc::new(DashMap::new()),
      notifier: CompletionNotifier::default(),
    }
  }

  pub(crate) fn with_notifier(mut self, notifier: CompletionNotifier) -> Self {
    self.notifier = notifier;
    self
  }

  /// Registers a handler invoked on the worker thread after each task finishes.
  pub fn add_completion_handler(&self, handler: impl Fn(TaskCompletionInfo) + Send + Sync + 'static) {
    self.notifier.add_handler(Arc::new(handler));
  }

  pub fn name(&self) -> &str {
    &self.pool_name
  }

  pub fn capacity(&self) -> usize {
    self.gate.capacity()
  }

  /// Number of tasks currently holding an admission slot.
  pub fn active_task_count(&self) -> usize {
    self.gate.in_flight()
  }

  pub fn is_closing(&self) -> bool {
    self.gate.is_closing()
  }

  /// Admits a task and starts it on a new thread, blocking while the pool is full.
  ///
  /// With `key = None` the return value is discarded and only side effects matter.
  ///
  /// # Errors
  /// Returns `DispatchError::PoolClosed` once `drain` has begun, and
  /// `DispatchError::WorkerSpawn` if the OS refuses a new thread.
  pub fn submit<A>(&self, task: TaskSpec<A, R>, key: Option<K>) -> Result<u64>
  where
    A: Send + 'static,
  {
    let lease = match self.gate.acquire() {
      Ok(lease) => lease,
      Err(e) => {
        warn!(pool_name = %self.pool_name, "Submit: Attempted to submit task to a pool that is draining.");
        return Err(e);
      }
    };

    let task_id = next_task_id();
    debug!(pool_name = %self.pool_name, %task_id, key = ?key, "Task admitted, spawning worker.");

    let results = self.results.clone();
    let notifier = self.notifier.clone();
    let pool_name = self.pool_name.clone();

    let spawn_result = thread::Builder::new()
      .name(format!("{}-{}", self.pool_name, task_id))
      .spawn(move || {
        // Released last: after the result is recorded and the shared map handle is gone.
        let _lease = lease;
        let span = info_span!("pool_task", pool_name = %pool_name, %task_id);
        let _entered = span.enter();

        let key_label = key.as_ref().map(|k| format!("{:?}", k));
        let (outcome, _elapsed) = run_and_report(task, task_id, key_label, &pool_name, &notifier);

        if let Some(key) = key {
          if results.insert(key, Mutex::new(outcome)).is_some() {
            warn!("Result key submitted twice, earlier result overwritten.");
          }
        }
        drop(results);
        debug!("Worker finished, releasing slot.");
      });

    // A failed spawn drops the closure, and the lease inside it, so the slot is returned.
    match spawn_result {
      Ok(_) => Ok(task_id),
      Err(spawn_error) => {
        error!(pool_name = %self.pool_name, %task_id, "Failed to spawn worker thread: {}", spawn_error);
        Err(DispatchError::WorkerSpawn(spawn_error.to_string()))
      }
    }
  }

  /// Closes the pool to new submissions and blocks until every admitted task
  /// has finished. Calling it again is harmless.
  pub fn drain(&self) {
    info!(
      pool_name = %self.pool_name,
      active = self.gate.in_flight(),
      "Draining pool: rejecting new submissions and waiting for in-flight tasks."
    );
    self.gate.close_and_wait();
    info!(pool_name = %self.pool_name, recorded = self.results.len(), "Pool drained.");
  }

  /// Drains the pool and hands back every recorded outcome.
  pub fn into_results(self) -> HashMap<K, TaskOutcome<R>> {
    self.drain();
    match Arc::try_unwrap(self.results) {
      Ok(map) => map.into_iter().map(|(k, outcome)| (k, outcome.into_inner())).collect(),
      Err(shared) => {
        // A worker thread may still be tearing down after its release.
        trace!(pool_name = %self.pool_name, "Result map still shared after drain, moving entries out.");
        let keys: Vec<K> = shared.iter().map(|entry| entry.key().clone()).collect();
        keys
          .into_iter()
          .filter_map(|k| shared.remove(&k))
          .map(|(k, outcome)| (k, outcome.into_inner()))
          .collect()
      }
    }
  }
}

/// Runs one task, converting a panic into `DispatchError::TaskPanicked`, and
/// reports the completion to `notifier`.
///
/// The returned duration covers the task alone, not the completion handlers.
pub(crate) fn run_and_report<A, R>(
  task: TaskSpec<A, R>,
  task_id: u64,
  key_label: Option<String>,
  pool_name: &Arc<String>,
  notifier: &CompletionNotifier,
) -> (TaskOutcome<R>, Duration) {
  let started = Instant::now();
  let outcome = match catch_unwind(AssertUnwindSafe(|| task.call())) {
    Ok(value) => {
      trace!(%task_id, "Task executed successfully.");
      Ok(value)
    }
    Err(payload) => {
      let message = panic_message(payload.as_ref());
      error!(%task_id, key = ?key_label, %message, "Task panicked during execution.");
      Err(DispatchError::TaskPanicked {
        key: key_label.clone().unwrap_or_else(|| "<unkeyed>".to_string()),
        message,
      })
    }
  };
  let elapsed = started.elapsed();

  notifier.notify(TaskCompletionInfo {
    task_id,
    pool_name: pool_name.clone(),
    key: key_label,
    status: TaskCompletionStatus::from(&outcome),
    elapsed,
    completion_time: SystemTime::now(),
  });
  (outcome, elapsed)
}

impl<K: TaskKey, R: Send + 'static> Debug for BoundedPool<K, R> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("BoundedPool")
      .field("pool_name", &self.pool_name)
      .field("gate", &self.gate)
      .field("recorded", &self.results.len())
      .field("notifier", &self.notifier)
      .finish()
  }
}
