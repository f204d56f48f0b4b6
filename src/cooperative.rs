//! Cooperative execution on a single-threaded Tokio runtime.
//!
//! Spawned tasks run one after another on the coordinating thread, each to
//! completion, interleaving only where a task yields. There is no admission
//! control: every task is spawned up front.

use crate::error::{DispatchError, Result};
use crate::handle::TaskHandle;
use crate::manager::{next_task_id, run_and_report};
use crate::notifier::CompletionNotifier;
use crate::task::TaskSpec;

use std::fmt;
use std::sync::Arc;

use futures::future::join_all;
use tokio::runtime::{Builder, Handle as TokioHandle, Runtime};
use tracing::{debug, info, info_span, Instrument};

/// Spawn / join-all facility backed by a current-thread Tokio runtime.
pub struct TokioScheduler {
  runtime: Runtime,
  pool_name: Arc<String>,
  notifier: CompletionNotifier,
}

impl fmt::Debug for TokioScheduler {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TokioScheduler")
      .field("pool_name", &self.pool_name)
      .field("notifier", &self.notifier)
      .finish_non_exhaustive()
  }
}

impl TokioScheduler {
  /// Builds a scheduler with its own runtime.
  ///
  /// # Errors
  /// Returns `DispatchError::Scheduler` when called from inside an async
  /// context (the scheduler blocks the calling thread in `join_all`) or when
  /// the runtime cannot be built.
  pub fn new(pool_name: &str) -> Result<Self> {
    if TokioHandle::try_current().is_ok() {
      return Err(DispatchError::Scheduler(
        "cannot block on a cooperative batch from inside an async runtime".to_string(),
      ));
    }
    let runtime = Builder::new_current_thread()
      .enable_all()
      .build()
      .map_err(|e| DispatchError::Scheduler(e.to_string()))?;

    Ok(Self {
      runtime,
      pool_name: Arc::new(pool_name.to_string()),
      notifier: CompletionNotifier::default(),
    })
  }

  pub(crate) fn with_notifier(mut self, notifier: CompletionNotifier) -> Self {
    self.notifier = notifier;
    self
  }

  /// Schedules `task` without running it. It runs once `join_all` drives the runtime.
  pub fn spawn<A, R>(&self, task: TaskSpec<A, R>, key_label: Option<String>) -> TaskHandle<R>
  where
    A: Send + 'static,
    R: Send + 'static,
  {
    let task_id = next_task_id();
    let pool_name = self.pool_name.clone();
    let notifier = self.notifier.clone();
    debug!(pool_name = %pool_name, %task_id, key = ?key_label, "Spawning cooperative task.");

    let span = info_span!("cooperative_task", pool_name = %pool_name, %task_id);
    let join_handle = self.runtime.spawn(
      async move {
        tokio::task::yield_now().await;
        run_and_report(task, task_id, key_label, &pool_name, &notifier).0
      }
      .instrument(span),
    );
    TaskHandle::new(task_id, join_handle)
  }

  /// Blocks the calling thread until every handle is resolved.
  pub fn join_all<R: Send + 'static>(&self, handles: &mut [TaskHandle<R>]) {
    info!(pool_name = %self.pool_name, count = handles.len(), "Joining cooperative tasks.");
    self
      .runtime
      .block_on(join_all(handles.iter_mut().map(|handle| handle.resolve())));
    debug!(pool_name = %self.pool_name, "All cooperative tasks joined.");
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::task::{task_fn, Kwargs, RawSpec};
  use std::sync::atomic::{AtomicUsize, Ordering};

  #[test]
  fn test_spawn_defers_execution_until_join() {
    let scheduler = TokioScheduler::new("coop_unit").unwrap();
    let runs = Arc::new(AtomicUsize::new(0));

    let mut handles: Vec<TaskHandle<usize>> = (0..3)
      .map(|i| {
        let runs = runs.clone();
        let f = task_fn(move |args: Vec<usize>, _kwargs: Kwargs<usize>| {
          runs.fetch_add(1, Ordering::SeqCst);
          args[0] * 10
        });
        let spec = RawSpec::from((f, vec![i])).normalize().unwrap();
        scheduler.spawn(spec, Some(i.to_string()))
      })
      .collect();

    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert!(handles.iter().all(|h| !h.is_resolved()));

    scheduler.join_all(&mut handles);
    assert_eq!(runs.load(Ordering::SeqCst), 3);
    let values: Vec<usize> = handles
      .into_iter()
      .map(|h| h.into_value().unwrap().unwrap())
      .collect();
    assert_eq!(values, vec![0, 10, 20]);
  }

  #[test]
  fn test_panicking_task_is_recorded() {
    let scheduler = TokioScheduler::new("coop_panic").unwrap();
    let f = task_fn(|_args: Vec<()>, _kwargs: Kwargs<()>| -> u8 { panic!("cooperative failure") });
    let mut handles = vec![scheduler.spawn(RawSpec::new(f).normalize().unwrap(), Some("bad".to_string()))];

    scheduler.join_all(&mut handles);
    match handles[0].value() {
      Some(Err(DispatchError::TaskPanicked { key, message })) => {
        assert_eq!(key, "bad");
        assert!(message.contains("cooperative failure"));
      }
      other => panic!("Expected TaskPanicked, got {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_new_rejects_async_context() {
    match TokioScheduler::new("coop_nested") {
      Err(DispatchError::Scheduler(_)) => {}
      other => panic!("Expected Scheduler error, got {:?}", other.map(|_| ())),
    }
  }
}
