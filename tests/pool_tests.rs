use parking_lot::Mutex;
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;
use task_dispatch::{task_fn, BoundedPool, DispatchError, Kwargs, RawSpec, TaskCompletionStatus, TaskSpec};

// Helper to build a normalized task that sleeps, optionally panics, and returns `output`.
fn create_task(duration_ms: u64, output: String, should_panic: bool) -> TaskSpec<(), String> {
  let f = task_fn(move |_args: Vec<()>, _kwargs: Kwargs<()>| {
    thread::sleep(Duration::from_millis(duration_ms));
    if should_panic {
      panic!("Task intentionally panicked!");
    }
    output.clone()
  });
  RawSpec::new(f).normalize().unwrap()
}

// Helper to build a task that records how many tasks run concurrently.
fn instrumented_task(active: Arc<AtomicUsize>, observed_max: Arc<AtomicUsize>, duration_ms: u64) -> TaskSpec<(), usize> {
  let f = task_fn(move |_args: Vec<()>, _kwargs: Kwargs<()>| {
    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
    observed_max.fetch_max(now, Ordering::SeqCst);
    thread::sleep(Duration::from_millis(duration_ms));
    active.fetch_sub(1, Ordering::SeqCst);
    now
  });
  RawSpec::new(f).normalize().unwrap()
}

// Helper to build a task that spins until `release` is set.
fn gated_task(release: Arc<AtomicBool>, output: &str) -> TaskSpec<(), String> {
  let output = output.to_string();
  let f = task_fn(move |_args: Vec<()>, _kwargs: Kwargs<()>| {
    while !release.load(Ordering::SeqCst) {
      thread::sleep(Duration::from_millis(5));
    }
    output.clone()
  });
  RawSpec::new(f).normalize().unwrap()
}

// Helper to initialize tracing for tests. Once ensures it runs a single time.
fn setup_tracing_for_test() {
  use std::sync::Once;
  use tracing_subscriber::{fmt, EnvFilter};
  static TRACING_INIT: Once = Once::new();

  TRACING_INIT.call_once(|| {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,task_dispatch=trace"));

    fmt::Subscriber::builder()
      .with_env_filter(filter)
      .with_test_writer()
      .try_init()
      .ok();
  });
}

#[test]
fn test_submit_and_collect_basic_tasks() {
  setup_tracing_for_test();
  let pool = BoundedPool::<&str, String>::new(2, "test_pool_basic_submit");
  assert_eq!(pool.name(), "test_pool_basic_submit");
  assert_eq!(pool.capacity(), 2);

  pool.submit(create_task(30, "a_done".to_string(), false), Some("a")).unwrap();
  pool.submit(create_task(10, "b_done".to_string(), false), Some("b")).unwrap();

  let results = pool.into_results();
  assert_eq!(results.len(), 2);
  assert_eq!(results["a"], Ok("a_done".to_string()));
  assert_eq!(results["b"], Ok("b_done".to_string()));
}

#[test]
fn test_concurrency_never_exceeds_worker_limit() {
  setup_tracing_for_test();
  let worker_limit = 3;
  let pool = BoundedPool::<usize, usize>::new(worker_limit, "test_pool_concurrency_limit");
  let active = Arc::new(AtomicUsize::new(0));
  let observed_max = Arc::new(AtomicUsize::new(0));
  let mut rng = rand::rng();

  for i in 0..12 {
    let duration_ms = rng.random_range(5..25);
    pool
      .submit(instrumented_task(active.clone(), observed_max.clone(), duration_ms), Some(i))
      .unwrap();
    assert!(pool.active_task_count() <= worker_limit);
  }

  let results = pool.into_results();
  assert_eq!(results.len(), 12);
  let max = observed_max.load(Ordering::SeqCst);
  assert!(max <= worker_limit, "Observed {} concurrent tasks with limit {}", max, worker_limit);
  assert!(results.values().all(|r| matches!(r, Ok(n) if *n <= worker_limit)));
  assert_eq!(active.load(Ordering::SeqCst), 0);
}

#[test]
fn test_submit_blocks_while_pool_is_full() {
  setup_tracing_for_test();
  let pool = BoundedPool::<u32, String>::new(2, "test_pool_backpressure");
  let release = Arc::new(AtomicBool::new(false));

  pool.submit(gated_task(release.clone(), "first"), Some(1)).unwrap();
  pool.submit(gated_task(release.clone(), "second"), Some(2)).unwrap();
  assert_eq!(pool.active_task_count(), 2);

  thread::scope(|scope| {
    let (tx, rx) = mpsc::channel();
    let pool_ref = &pool;
    let third_release = release.clone();
    scope.spawn(move || {
      pool_ref.submit(gated_task(third_release, "third"), Some(3)).unwrap();
      tx.send(()).unwrap();
    });

    // Both slots are held, so the third submission must still be parked.
    assert!(rx.recv_timeout(Duration::from_millis(150)).is_err());

    release.store(true, Ordering::SeqCst);
    rx.recv_timeout(Duration::from_secs(5))
      .expect("Third submit did not return after a slot freed.");
  });

  let results = pool.into_results();
  assert_eq!(results.len(), 3);
  assert_eq!(results[&3], Ok("third".to_string()));
}

#[test]
fn test_submit_after_drain_is_rejected() {
  setup_tracing_for_test();
  let pool = BoundedPool::<u8, String>::new(2, "test_pool_closed");
  pool.submit(create_task(10, "ok".to_string(), false), Some(0)).unwrap();
  pool.drain();
  assert!(pool.is_closing());
  assert_eq!(pool.active_task_count(), 0);

  let result = pool.submit(create_task(10, "late".to_string(), false), Some(1));
  assert_eq!(result, Err(DispatchError::PoolClosed));

  // Draining again is harmless and the earlier result is intact.
  pool.drain();
  let results = pool.into_results();
  assert_eq!(results.len(), 1);
  assert_eq!(results[&0], Ok("ok".to_string()));
}

#[test]
fn test_panicking_task_releases_slot_and_is_recorded() {
  setup_tracing_for_test();
  let pool = BoundedPool::<&str, String>::new(1, "test_pool_panic_handling");

  pool.submit(create_task(10, "wont_complete".to_string(), true), Some("bad")).unwrap();
  // With a single slot this only gets admitted if the panicking worker released it.
  pool.submit(create_task(10, "good_done".to_string(), false), Some("good")).unwrap();

  let results = pool.into_results();
  match &results["bad"] {
    Err(DispatchError::TaskPanicked { key, message }) => {
      assert_eq!(key, "\"bad\"");
      assert!(message.contains("intentionally panicked"), "{}", message);
    }
    other => panic!("Expected TaskPanicked, got {:?}", other),
  }
  assert_eq!(results["good"], Ok("good_done".to_string()));
}

#[test]
fn test_unkeyed_tasks_run_without_recording() {
  setup_tracing_for_test();
  let pool = BoundedPool::<u8, ()>::new(2, "test_pool_fire_and_forget");
  let ran = Arc::new(AtomicUsize::new(0));

  for _ in 0..4 {
    let ran = ran.clone();
    let f = task_fn(move |_args: Vec<()>, _kwargs: Kwargs<()>| {
      ran.fetch_add(1, Ordering::SeqCst);
    });
    pool.submit(RawSpec::new(f).normalize().unwrap(), None).unwrap();
  }

  let results = pool.into_results();
  assert!(results.is_empty());
  assert_eq!(ran.load(Ordering::SeqCst), 4);
}

#[test]
fn test_drain_waits_for_slow_tasks() {
  setup_tracing_for_test();
  let pool = BoundedPool::<u8, String>::new(4, "test_pool_drain_waits");
  let finished = Arc::new(AtomicBool::new(false));
  let finished_clone = finished.clone();
  let f = task_fn(move |_args: Vec<()>, _kwargs: Kwargs<()>| {
    thread::sleep(Duration::from_millis(200));
    finished_clone.store(true, Ordering::SeqCst);
    "slow_done".to_string()
  });
  pool.submit(RawSpec::new(f).normalize().unwrap(), Some(0)).unwrap();

  pool.drain();
  assert!(finished.load(Ordering::SeqCst), "drain returned before the task finished");
  assert_eq!(pool.into_results()[&0], Ok("slow_done".to_string()));
}

#[test]
fn test_completion_handler_sees_every_task() {
  setup_tracing_for_test();
  let pool = BoundedPool::<u8, String>::new(2, "test_pool_completion_handler");
  let statuses = Arc::new(Mutex::new(Vec::new()));
  let statuses_clone = statuses.clone();
  pool.add_completion_handler(move |info| {
    assert_eq!(info.pool_name.as_str(), "test_pool_completion_handler");
    statuses_clone.lock().push(info.status);
  });

  pool.submit(create_task(5, "x".to_string(), false), Some(0)).unwrap();
  pool.submit(create_task(5, "y".to_string(), true), Some(1)).unwrap();
  pool.submit(create_task(5, "z".to_string(), false), None).unwrap();
  pool.drain();

  let mut seen = statuses.lock().clone();
  seen.sort_by_key(|s| matches!(s, TaskCompletionStatus::Panicked));
  assert_eq!(
    seen,
    vec![
      TaskCompletionStatus::Success,
      TaskCompletionStatus::Success,
      TaskCompletionStatus::Panicked
    ]
  );
}

#[test]
fn test_handler_registering_another_handler_does_not_block_drain() {
  setup_tracing_for_test();
  let pool = Arc::new(BoundedPool::<u8, String>::new(1, "test_pool_nested_handler"));
  let late_calls = Arc::new(AtomicUsize::new(0));

  let weak_pool = Arc::downgrade(&pool);
  let late_calls_clone = late_calls.clone();
  pool.add_completion_handler(move |_info| {
    if let Some(pool) = weak_pool.upgrade() {
      let late_calls = late_calls_clone.clone();
      pool.add_completion_handler(move |_info| {
        late_calls.fetch_add(1, Ordering::SeqCst);
      });
    }
  });

  pool.submit(create_task(5, "first".to_string(), false), Some(0)).unwrap();
  // With one slot, the second submit is only admitted once the first worker released it.
  pool.submit(create_task(5, "second".to_string(), false), Some(1)).unwrap();

  let (tx, rx) = mpsc::channel();
  let drainer = {
    let pool = pool.clone();
    thread::spawn(move || {
      pool.drain();
      tx.send(()).unwrap();
    })
  };
  rx.recv_timeout(Duration::from_secs(5))
    .expect("drain did not return while a handler registered another handler.");
  drainer.join().unwrap();

  assert_eq!(pool.active_task_count(), 0);
  // The handler added while the first task finished sees the second task.
  assert!(late_calls.load(Ordering::SeqCst) >= 1);
}
