use crate::error::DispatchError;

use parking_lot::RwLock;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, error, trace};

// --- Public Event Structs for Handlers ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskCompletionStatus {
  Success,
  Panicked,
}

impl<R> From<&Result<R, DispatchError>> for TaskCompletionStatus {
  fn from(result: &Result<R, DispatchError>) -> Self {
    match result {
      Ok(_) => TaskCompletionStatus::Success,
      Err(_) => TaskCompletionStatus::Panicked,
    }
  }
}

/// Describes one finished task. Delivered to every registered handler.
#[derive(Debug, Clone)]
pub struct TaskCompletionInfo {
  pub task_id: u64,
  pub pool_name: Arc<String>,
  /// `Debug` rendering of the task's key, `None` for fire-and-forget tasks.
  pub key: Option<String>,
  pub status: TaskCompletionStatus,
  pub elapsed: Duration,
  pub completion_time: SystemTime,
}

pub type CompletionHandler = Arc<dyn Fn(TaskCompletionInfo) + Send + Sync + 'static>;

/// Fans completion events out to the registered handlers.
///
/// Handlers run synchronously on the thread that finished the task. A
/// panicking handler is caught and logged so it can never disturb the
/// worker's slot bookkeeping.
#[derive(Clone, Default)]
pub(crate) struct CompletionNotifier {
  handlers: Arc<RwLock<Vec<CompletionHandler>>>,
}

impl fmt::Debug for CompletionNotifier {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let handler_count = self.handlers.try_read().map_or(0, |guard| guard.len());
    f.debug_struct("CompletionNotifier")
      .field("handler_count", &handler_count)
      .finish()
  }
}

impl CompletionNotifier {
  pub(crate) fn with_handlers(handlers: Vec<CompletionHandler>) -> Self {
    Self {
      handlers: Arc::new(RwLock::new(handlers)),
    }
  }

  pub(crate) fn add_handler(&self, handler: CompletionHandler) {
    let mut handlers = self.handlers.write();
    handlers.push(handler);
    debug!("Notifier: Added new completion handler. Total handlers: {}", handlers.len());
  }

  pub(crate) fn notify(&self, info: TaskCompletionInfo) {
    // Snapshot so handlers run without the lock; a handler may register another.
    let handlers: Vec<CompletionHandler> = self.handlers.read().clone();
    if handlers.is_empty() {
      trace!(task_id = %info.task_id, "No completion handlers registered, dropping notification.");
      return;
    }

    trace!(task_id = %info.task_id, "Dispatching notification to {} handlers.", handlers.len());
    for handler in handlers.iter() {
      let info_for_handler = info.clone();
      if catch_unwind(AssertUnwindSafe(|| handler(info_for_handler))).is_err() {
        error!(
          "A completion handler panicked during execution. Pool: {}, Task ID: {}",
          info.pool_name, info.task_id
        );
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use parking_lot::Mutex;

  fn info(task_id: u64, status: TaskCompletionStatus) -> TaskCompletionInfo {
    TaskCompletionInfo {
      task_id,
      pool_name: Arc::new("notifier_unit".to_string()),
      key: Some(format!("{:?}", task_id)),
      status,
      elapsed: Duration::from_millis(1),
      completion_time: SystemTime::now(),
    }
  }

  #[test]
  fn test_status_from_outcome() {
    let ok: Result<u8, DispatchError> = Ok(1);
    let failed: Result<u8, DispatchError> = Err(DispatchError::TaskPanicked {
      key: "0".to_string(),
      message: "boom".to_string(),
    });
    assert_eq!(TaskCompletionStatus::from(&ok), TaskCompletionStatus::Success);
    assert_eq!(TaskCompletionStatus::from(&failed), TaskCompletionStatus::Panicked);
  }

  #[test]
  fn test_all_handlers_receive_event() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let notifier = CompletionNotifier::default();

    for handler_id in 0..2 {
      let seen = seen.clone();
      notifier.add_handler(Arc::new(move |info: TaskCompletionInfo| {
        seen.lock().push((handler_id, info.task_id));
      }));
    }

    notifier.notify(info(7, TaskCompletionStatus::Success));
    let mut seen = seen.lock().clone();
    seen.sort();
    assert_eq!(seen, vec![(0, 7), (1, 7)]);
  }

  #[test]
  fn test_panicking_handler_does_not_stop_others() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = seen.clone();
    let notifier = CompletionNotifier::with_handlers(vec![
      Arc::new(|_info: TaskCompletionInfo| panic!("Handler intentionally panicked")) as CompletionHandler,
      Arc::new(move |info: TaskCompletionInfo| seen_clone.lock().push(info.status)) as CompletionHandler,
    ]);

    notifier.notify(info(1, TaskCompletionStatus::Panicked));
    assert_eq!(*seen.lock(), vec![TaskCompletionStatus::Panicked]);
  }

  #[test]
  fn test_handler_can_register_another_handler() {
    let notifier = CompletionNotifier::default();
    let registering = notifier.clone();
    notifier.add_handler(Arc::new(move |_info: TaskCompletionInfo| {
      registering.add_handler(Arc::new(|_info: TaskCompletionInfo| {}));
    }));

    notifier.notify(info(1, TaskCompletionStatus::Success));
    assert_eq!(notifier.handlers.read().len(), 2);
    notifier.notify(info(2, TaskCompletionStatus::Success));
    assert_eq!(notifier.handlers.read().len(), 3);
  }
}
