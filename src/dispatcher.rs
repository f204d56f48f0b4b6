use crate::batch::Batch;
use crate::cooperative::TokioScheduler;
use crate::error::{DispatchError, Result};
use crate::handle::TaskHandle;
use crate::manager::{next_task_id, run_and_report, BoundedPool, TaskKey, TaskOutcome};
use crate::notifier::{CompletionHandler, CompletionNotifier, TaskCompletionInfo};
use crate::profile::{ProfileHandler, ProfileReport};
use crate::task::TaskSpec;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tracing::{debug, info, warn};

pub const DEFAULT_WORKER_LIMIT: usize = 4;
pub const DEFAULT_POOL_NAME: &str = "task_dispatch";

/// The execution backend used for a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Strategy {
  /// One OS thread per task, at most `worker_limit` in flight.
  #[default]
  Threaded,
  /// Tasks spawned on a current-thread Tokio runtime, no admission control.
  Cooperative,
  /// Tasks run in order on the calling thread, with per-task timing.
  ///
  /// A panicking task is not re-raised: it is caught, the remaining tasks are
  /// skipped, and `dispatch` returns `Err(DispatchError::TaskPanicked)`.
  Synchronous,
}

impl Strategy {
  pub const ALL: [Strategy; 3] = [Strategy::Threaded, Strategy::Cooperative, Strategy::Synchronous];

  pub fn name(&self) -> &'static str {
    match self {
      Strategy::Threaded => "threaded",
      Strategy::Cooperative => "cooperative",
      Strategy::Synchronous => "synchronous",
    }
  }
}

impl fmt::Display for Strategy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

impl FromStr for Strategy {
  type Err = DispatchError;

  fn from_str(name: &str) -> Result<Self> {
    match name {
      "threaded" | "threading" => Ok(Strategy::Threaded),
      "cooperative" | "gevent" => Ok(Strategy::Cooperative),
      "synchronous" | "fake" => Ok(Strategy::Synchronous),
      _ => Err(DispatchError::UnsupportedStrategy { name: name.to_string() }),
    }
  }
}

/// Immutable dispatcher settings, fixed when the [`Dispatcher`] is built.
#[derive(Clone)]
pub struct DispatcherConfig {
  strategy: Strategy,
  worker_limit: usize,
  pool_name: String,
  completion_handlers: Vec<CompletionHandler>,
  profile_handler: Option<ProfileHandler>,
}

impl Default for DispatcherConfig {
  fn default() -> Self {
    Self {
      strategy: Strategy::default(),
      worker_limit: DEFAULT_WORKER_LIMIT,
      pool_name: DEFAULT_POOL_NAME.to_string(),
      completion_handlers: Vec::new(),
      profile_handler: None,
    }
  }
}

impl fmt::Debug for DispatcherConfig {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("DispatcherConfig")
      .field("strategy", &self.strategy)
      .field("worker_limit", &self.worker_limit)
      .field("pool_name", &self.pool_name)
      .field("completion_handlers", &self.completion_handlers.len())
      .field("profile_handler", &self.profile_handler.is_some())
      .finish()
  }
}

impl DispatcherConfig {
  pub fn new(strategy: Strategy) -> Self {
    Self {
      strategy,
      ..Self::default()
    }
  }

  /// Maximum number of tasks in flight for the threaded strategy. Values
  /// below 1 are clamped to 1.
  pub fn with_worker_limit(mut self, worker_limit: usize) -> Self {
    if worker_limit == 0 {
      warn!("worker_limit must be positive, clamping 0 to 1.");
    }
    self.worker_limit = worker_limit.max(1);
    self
  }

  pub fn with_pool_name(mut self, pool_name: impl Into<String>) -> Self {
    self.pool_name = pool_name.into();
    self
  }

  /// Adds a handler called after every task finishes, on the thread that ran it.
  pub fn with_completion_handler(mut self, handler: impl Fn(TaskCompletionInfo) + Send + Sync + 'static) -> Self {
    self.completion_handlers.push(Arc::new(handler));
    self
  }

  /// Sets the receiver of the synchronous strategy's timing report.
  pub fn with_profile_handler(mut self, handler: impl Fn(&ProfileReport) + Send + Sync + 'static) -> Self {
    self.profile_handler = Some(Arc::new(handler));
    self
  }

  pub fn strategy(&self) -> Strategy {
    self.strategy
  }

  pub fn worker_limit(&self) -> usize {
    self.worker_limit
  }

  pub fn pool_name(&self) -> &str {
    &self.pool_name
  }
}

/// Runs batches of task specs under the configured [`Strategy`] and returns
/// outcomes in the same container shape as the input.
#[derive(Debug, Clone, Default)]
pub struct Dispatcher {
  config: DispatcherConfig,
}

impl Dispatcher {
  pub fn new(config: DispatcherConfig) -> Self {
    info!(
      strategy = %config.strategy,
      worker_limit = config.worker_limit,
      pool_name = %config.pool_name,
      "Dispatcher created."
    );
    Self { config }
  }

  pub fn config(&self) -> &DispatcherConfig {
    &self.config
  }

  /// Validates and normalizes every spec, runs the batch, and reshapes the
  /// outcomes into `B::Output`.
  ///
  /// Validation happens before any task starts. Under the threaded and
  /// cooperative strategies a panicking task is recorded as
  /// `Err(DispatchError::TaskPanicked)` under its key; the synchronous
  /// strategy stops at the first panic and returns that error.
  ///
  /// # Errors
  /// `InvalidBatch`, `InvalidSpec`, `IncompleteResult`, plus strategy
  /// failures (`Scheduler`, `WorkerSpawn`, synchronous `TaskPanicked`).
  pub fn dispatch<B, A, R>(&self, batch: B) -> Result<B::Output>
  where
    B: Batch<A, R>,
    A: Send + 'static,
    R: Send + 'static,
  {
    let entries = batch.into_entries()?;
    let len = entries.len();
    let tasks = entries
      .into_iter()
      .map(|(key, raw)| match raw.normalize() {
        Ok(spec) => Ok((key, spec)),
        Err(e) => {
          warn!(key = ?key, "Rejecting batch: {}", e);
          Err(e)
        }
      })
      .collect::<Result<Vec<_>>>()?;

    info!(strategy = %self.config.strategy, tasks = len, pool_name = %self.config.pool_name, "Dispatching batch.");
    let notifier = CompletionNotifier::with_handlers(self.config.completion_handlers.clone());
    let results = match self.config.strategy {
      Strategy::Threaded => self.run_threaded(tasks, notifier)?,
      Strategy::Cooperative => self.run_cooperative(tasks, notifier)?,
      Strategy::Synchronous => self.run_synchronous(tasks, notifier)?,
    };

    B::reshape(len, results)
  }

  fn run_threaded<K, A, R>(
    &self,
    tasks: Vec<(K, TaskSpec<A, R>)>,
    notifier: CompletionNotifier,
  ) -> Result<HashMap<K, TaskOutcome<R>>>
  where
    K: TaskKey,
    A: Send + 'static,
    R: Send + 'static,
  {
    let pool = BoundedPool::new(self.config.worker_limit, &self.config.pool_name).with_notifier(notifier);
    for (key, spec) in tasks {
      if let Err(e) = pool.submit(spec, Some(key)) {
        // Let already admitted work finish before reporting.
        pool.drain();
        return Err(e);
      }
    }
    Ok(pool.into_results())
  }

  fn run_cooperative<K, A, R>(
    &self,
    tasks: Vec<(K, TaskSpec<A, R>)>,
    notifier: CompletionNotifier,
  ) -> Result<HashMap<K, TaskOutcome<R>>>
  where
    K: TaskKey,
    A: Send + 'static,
    R: Send + 'static,
  {
    let scheduler = TokioScheduler::new(&self.config.pool_name)?.with_notifier(notifier);
    let (keys, mut handles): (Vec<K>, Vec<TaskHandle<R>>) = tasks
      .into_iter()
      .map(|(key, spec)| {
        let handle = scheduler.spawn(spec, Some(format!("{:?}", key)));
        (key, handle)
      })
      .unzip();

    scheduler.join_all(&mut handles);

    Ok(
      keys
        .into_iter()
        .zip(handles)
        .map(|(key, handle)| {
          let task_id = handle.id();
          let outcome = handle.into_value().unwrap_or_else(|| {
            Err(DispatchError::Scheduler(format!("Task (id: {}) was never resolved", task_id)))
          });
          (key, outcome)
        })
        .collect(),
    )
  }

  fn run_synchronous<K, A, R>(
    &self,
    tasks: Vec<(K, TaskSpec<A, R>)>,
    notifier: CompletionNotifier,
  ) -> Result<HashMap<K, TaskOutcome<R>>>
  where
    K: TaskKey,
  {
    let pool_name = Arc::new(self.config.pool_name.clone());
    let mut results = HashMap::with_capacity(tasks.len());
    let mut timings = Vec::with_capacity(tasks.len());

    for (key, spec) in tasks {
      let key_label = format!("{:?}", key);
      let (outcome, elapsed) = run_and_report(spec, next_task_id(), Some(key_label.clone()), &pool_name, &notifier);
      debug!(key = %key_label, elapsed_us = elapsed.as_micros() as u64, "Synchronous task finished.");

      // Running in-line, a failure ends the batch.
      let value = outcome?;
      timings.push((key_label, elapsed));
      results.insert(key, Ok(value));
    }

    let report = ProfileReport::from_timings(timings);
    report.log();
    if let Some(handler) = &self.config.profile_handler {
      handler(&report);
    }
    Ok(results)
  }
}

/// Runs `batch` under the strategy called `strategy`, with up to
/// `worker_limit` tasks in flight for the threaded strategy.
///
/// # Errors
/// `UnsupportedStrategy` for an unknown name, otherwise as [`Dispatcher::dispatch`].
pub fn dispatch<B, A, R>(batch: B, strategy: &str, worker_limit: usize) -> Result<B::Output>
where
  B: Batch<A, R>,
  A: Send + 'static,
  R: Send + 'static,
{
  let strategy: Strategy = strategy.parse()?;
  Dispatcher::new(DispatcherConfig::new(strategy).with_worker_limit(worker_limit)).dispatch(batch)
}
