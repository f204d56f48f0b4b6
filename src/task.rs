use crate::error::{DispatchError, Result};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Named arguments passed to a task callable.
pub type Kwargs<A> = HashMap<String, A>;

/// The callable type the dispatcher executes.
/// It receives the positional and named arguments by value and produces `R`.
pub type TaskFn<A, R> = Arc<dyn Fn(Vec<A>, Kwargs<A>) -> R + Send + Sync + 'static>;

/// Wraps a closure into a shareable [`TaskFn`].
pub fn task_fn<A, R, F>(f: F) -> TaskFn<A, R>
where
  F: Fn(Vec<A>, Kwargs<A>) -> R + Send + Sync + 'static,
{
  Arc::new(f)
}

/// One element of a raw task submission.
pub enum SpecPart<A, R> {
  Callable(TaskFn<A, R>),
  Args(Vec<A>),
  Kwargs(Kwargs<A>),
}

impl<A, R> SpecPart<A, R> {
  fn kind(&self) -> &'static str {
    match self {
      SpecPart::Callable(_) => "callable",
      SpecPart::Args(_) => "args",
      SpecPart::Kwargs(_) => "kwargs",
    }
  }
}

impl<A: fmt::Debug, R> fmt::Debug for SpecPart<A, R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SpecPart::Callable(_) => f.write_str("Callable(..)"),
      SpecPart::Args(args) => f.debug_tuple("Args").field(args).finish(),
      SpecPart::Kwargs(kwargs) => f.debug_tuple("Kwargs").field(kwargs).finish(),
    }
  }
}

/// A task submission as supplied by the caller: `(callable[, args[, kwargs]])`.
///
/// The tuple conversions cover the well-formed shapes. [`RawSpec::push`] allows
/// assembling arbitrary part lists, which [`RawSpec::normalize`] validates.
pub struct RawSpec<A, R> {
  parts: Vec<SpecPart<A, R>>,
}

impl<A, R> RawSpec<A, R> {
  /// Starts a spec with just a callable.
  pub fn new(callable: TaskFn<A, R>) -> Self {
    Self {
      parts: vec![SpecPart::Callable(callable)],
    }
  }

  /// Starts an empty spec. Only useful together with [`RawSpec::push`].
  pub fn empty() -> Self {
    Self { parts: Vec::new() }
  }

  pub fn with_args(mut self, args: Vec<A>) -> Self {
    self.parts.push(SpecPart::Args(args));
    self
  }

  pub fn with_kwargs(mut self, kwargs: Kwargs<A>) -> Self {
    self.parts.push(SpecPart::Kwargs(kwargs));
    self
  }

  /// Appends an arbitrary part.
  pub fn push(mut self, part: SpecPart<A, R>) -> Self {
    self.parts.push(part);
    self
  }

  pub fn len(&self) -> usize {
    self.parts.len()
  }

  pub fn is_empty(&self) -> bool {
    self.parts.is_empty()
  }

  /// Expands the submission into a [`TaskSpec`], filling missing args and
  /// kwargs with empty defaults.
  ///
  /// # Errors
  /// Returns `DispatchError::InvalidSpec` if the spec has zero or more than
  /// three parts, or if a part sits in the wrong position.
  pub fn normalize(self) -> Result<TaskSpec<A, R>> {
    let len = self.parts.len();
    if len == 0 || len > 3 {
      return Err(DispatchError::InvalidSpec {
        len,
        reason: "a task spec must have between 1 and 3 elements".to_string(),
      });
    }

    let mut parts = self.parts.into_iter();
    let callable = match parts.next() {
      Some(SpecPart::Callable(f)) => f,
      other => return Err(misplaced(len, 0, "callable", other.as_ref())),
    };
    let args = match parts.next() {
      Some(SpecPart::Args(args)) => args,
      other @ Some(_) => return Err(misplaced(len, 1, "args", other.as_ref())),
      None => Vec::new(),
    };
    let kwargs = match parts.next() {
      Some(SpecPart::Kwargs(kwargs)) => kwargs,
      other @ Some(_) => return Err(misplaced(len, 2, "kwargs", other.as_ref())),
      None => Kwargs::new(),
    };

    Ok(TaskSpec { callable, args, kwargs })
  }
}

fn misplaced<A, R>(len: usize, position: usize, expected: &str, found: Option<&SpecPart<A, R>>) -> DispatchError {
  let found = found.map_or("nothing", SpecPart::kind);
  DispatchError::InvalidSpec {
    len,
    reason: format!("element {} must be {}, found {}", position, expected, found),
  }
}

impl<A: fmt::Debug, R> fmt::Debug for RawSpec<A, R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_list().entries(self.parts.iter()).finish()
  }
}

impl<A, R> From<(TaskFn<A, R>,)> for RawSpec<A, R> {
  fn from((callable,): (TaskFn<A, R>,)) -> Self {
    RawSpec::new(callable)
  }
}

impl<A, R> From<(TaskFn<A, R>, Vec<A>)> for RawSpec<A, R> {
  fn from((callable, args): (TaskFn<A, R>, Vec<A>)) -> Self {
    RawSpec::new(callable).with_args(args)
  }
}

impl<A, R> From<(TaskFn<A, R>, Vec<A>, Kwargs<A>)> for RawSpec<A, R> {
  fn from((callable, args, kwargs): (TaskFn<A, R>, Vec<A>, Kwargs<A>)) -> Self {
    RawSpec::new(callable).with_args(args).with_kwargs(kwargs)
  }
}

/// A normalized unit of work: callable plus positional and named arguments.
/// Consumed exactly once by [`TaskSpec::call`].
pub struct TaskSpec<A, R> {
  callable: TaskFn<A, R>,
  args: Vec<A>,
  kwargs: Kwargs<A>,
}

impl<A, R> TaskSpec<A, R> {
  pub fn callable(&self) -> &TaskFn<A, R> {
    &self.callable
  }

  pub fn args(&self) -> &[A] {
    &self.args
  }

  pub fn kwargs(&self) -> &Kwargs<A> {
    &self.kwargs
  }

  /// Runs the callable, consuming the spec.
  pub fn call(self) -> R {
    (self.callable)(self.args, self.kwargs)
  }
}

impl<A: fmt::Debug, R> fmt::Debug for TaskSpec<A, R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TaskSpec")
      .field("args", &self.args)
      .field("kwargs", &self.kwargs)
      .finish_non_exhaustive()
  }
}
