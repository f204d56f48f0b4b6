use crate::error::DispatchError;
use crate::manager::TaskOutcome;

use tokio::task::JoinHandle;

/// A handle to a task spawned on the [`TokioScheduler`](crate::TokioScheduler).
///
/// The produced value becomes available through [`TaskHandle::value`] once the
/// handle has been resolved, normally by `TokioScheduler::join_all`.
#[derive(Debug)]
pub struct TaskHandle<R: Send + 'static> {
  pub(crate) task_id: u64,
  pub(crate) join_handle: Option<JoinHandle<TaskOutcome<R>>>,
  pub(crate) value: Option<TaskOutcome<R>>,
}

impl<R: Send + 'static> TaskHandle<R> {
  pub(crate) fn new(task_id: u64, join_handle: JoinHandle<TaskOutcome<R>>) -> Self {
    Self {
      task_id,
      join_handle: Some(join_handle),
      value: None,
    }
  }

  /// Returns the unique ID of this task.
  pub fn id(&self) -> u64 {
    self.task_id
  }

  /// `true` once the task's outcome has been collected into this handle.
  pub fn is_resolved(&self) -> bool {
    self.value.is_some()
  }

  /// The task's outcome, if the handle has been resolved.
  pub fn value(&self) -> Option<&TaskOutcome<R>> {
    self.value.as_ref()
  }

  /// Consumes the handle, yielding the outcome if it has been resolved.
  pub fn into_value(self) -> Option<TaskOutcome<R>> {
    self.value
  }

  /// Waits for the task to finish and stores its outcome. Resolving an
  /// already-resolved handle does nothing.
  pub async fn resolve(&mut self) {
    let Some(join_handle) = self.join_handle.take() else {
      return;
    };
    let outcome = match join_handle.await {
      Ok(task_outcome) => task_outcome,
      Err(join_error) => {
        // Panics are caught inside the task, so this is cancellation by runtime shutdown.
        tracing::warn!(task_id = %self.task_id, "Cooperative task did not complete: {}", join_error);
        Err(DispatchError::Scheduler(format!(
          "Task (id: {}) did not complete: {}",
          self.task_id, join_error
        )))
      }
    };
    self.value = Some(outcome);
  }
}
