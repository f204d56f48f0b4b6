use crate::error::{DispatchError, Result};

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use tracing::trace;

#[derive(Debug)]
struct GateState {
  in_flight: usize,
  closing: bool,
}

/// A blocking counting gate with a fixed number of admission slots and a
/// one-shot `closing` flag.
///
/// `acquire` blocks the calling thread while every slot is occupied. Slots are
/// returned by dropping the [`SlotLease`] handed out on admission. Once
/// `close_and_wait` has been called, no further lease is ever granted.
pub(crate) struct CapacityGate {
  capacity: usize,
  state: Mutex<GateState>,
  slot_freed: Condvar,
}

impl fmt::Debug for CapacityGate {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = self.state.lock();
    f.debug_struct("CapacityGate")
      .field("capacity", &self.capacity)
      .field("in_flight", &state.in_flight)
      .field("closing", &state.closing)
      .finish()
  }
}

impl CapacityGate {
  pub(crate) fn new(capacity: usize) -> Arc<Self> {
    Arc::new(Self {
      capacity: capacity.max(1),
      state: Mutex::new(GateState {
        in_flight: 0,
        closing: false,
      }),
      slot_freed: Condvar::new(),
    })
  }

  pub(crate) fn capacity(&self) -> usize {
    self.capacity
  }

  /// Number of leases currently held.
  pub(crate) fn in_flight(&self) -> usize {
    self.state.lock().in_flight
  }

  pub(crate) fn is_closing(&self) -> bool {
    self.state.lock().closing
  }

  /// Occupies one slot, blocking while the gate is full.
  ///
  /// # Errors
  /// Returns `DispatchError::PoolClosed` if the gate is closing, either on
  /// entry or after being woken up while waiting for a slot.
  pub(crate) fn acquire(self: &Arc<Self>) -> Result<SlotLease> {
    let mut state = self.state.lock();
    loop {
      if state.closing {
        return Err(DispatchError::PoolClosed);
      }
      if state.in_flight < self.capacity {
        break;
      }
      trace!(capacity = self.capacity, "Gate full, waiting for a slot to free.");
      self.slot_freed.wait(&mut state);
    }
    state.in_flight += 1;
    trace!(in_flight = state.in_flight, capacity = self.capacity, "Slot acquired.");

    Ok(SlotLease { gate: self.clone() })
  }

  fn release(&self) {
    let mut state = self.state.lock();
    state.in_flight = state.in_flight.saturating_sub(1);
    trace!(in_flight = state.in_flight, capacity = self.capacity, "Slot released.");
    // Both blocked submitters and a waiting drain listen on the same condvar.
    self.slot_freed.notify_all();
  }

  /// Marks the gate as closing (irreversible) and blocks until every
  /// outstanding lease has been dropped.
  pub(crate) fn close_and_wait(&self) {
    let mut state = self.state.lock();
    state.closing = true;
    // Wake submitters blocked on a full gate so they observe `closing`.
    self.slot_freed.notify_all();
    while state.in_flight > 0 {
      self.slot_freed.wait(&mut state);
    }
  }
}

/// A held admission slot. Dropping it, on any exit path including unwinding,
/// returns the slot to its gate.
#[derive(Debug)]
pub(crate) struct SlotLease {
  gate: Arc<CapacityGate>,
}

impl Drop for SlotLease {
  fn drop(&mut self) {
    self.gate.release();
  }
}
