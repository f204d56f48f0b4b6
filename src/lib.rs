//! A bounded-concurrency task dispatcher.
//!
//! Batches of `(callable[, args[, kwargs]])` specs, keyed by map key or list
//! position, run on OS threads with at most `worker_limit` in flight, on a
//! cooperative Tokio scheduler, or synchronously with per-task profiling.
//! Results come back in the same container shape as the batch.

mod batch;
mod capacity_gate;
mod cooperative;
mod dispatcher;
mod error;
mod handle;
mod manager;
mod notifier;
mod profile;
mod task;

pub use batch::{Batch, KeyedBatch};
pub use cooperative::TokioScheduler;
pub use dispatcher::{dispatch, Dispatcher, DispatcherConfig, Strategy, DEFAULT_POOL_NAME, DEFAULT_WORKER_LIMIT};
pub use error::{DispatchError, Result};
pub use handle::TaskHandle;
pub use manager::{BoundedPool, TaskKey, TaskOutcome};
pub use notifier::{CompletionHandler, TaskCompletionInfo, TaskCompletionStatus};
pub use profile::{ProfileEntry, ProfileHandler, ProfileReport};
pub use task::{task_fn, Kwargs, RawSpec, SpecPart, TaskFn, TaskSpec};
