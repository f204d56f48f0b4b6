use thiserror::Error;

/// Result alias used throughout `task_dispatch`.
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Errors that can occur while validating, submitting or executing a batch.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
  #[error("Invalid batch: {0}. Expected a mapping of keys to task specs or a sequence of task specs")]
  InvalidBatch(String),

  #[error("Invalid task spec of length {len}: {reason}. Expected (callable[, args[, kwargs]])")]
  InvalidSpec { len: usize, reason: String },

  #[error("Pool is closed (draining has begun), cannot accept new tasks")]
  PoolClosed,

  #[error("Unsupported strategy \"{name}\", options are \"threaded\", \"cooperative\", \"synchronous\"")]
  UnsupportedStrategy { name: String },

  #[error("Result for sequence position {index} is missing")]
  IncompleteResult { index: usize },

  #[error("Task {key} panicked: {message}")]
  TaskPanicked { key: String, message: String },

  #[error("Failed to spawn worker thread: {0}")]
  WorkerSpawn(String),

  #[error("Cooperative scheduler unavailable: {0}")]
  Scheduler(String),
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
  if let Some(s) = payload.downcast_ref::<&'static str>() {
    (*s).to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "non-string panic payload".to_string()
  }
}
