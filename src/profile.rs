use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

/// Wall-clock cost of one task run by the synchronous strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileEntry {
  /// `Debug` rendering of the task's key.
  pub key: String,
  pub elapsed: Duration,
  /// Share of the batch's total elapsed time, in percent.
  pub share_percent: f64,
}

/// Per-task timings of a synchronous batch, slowest first.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProfileReport {
  pub total: Duration,
  pub entries: Vec<ProfileEntry>,
}

pub type ProfileHandler = Arc<dyn Fn(&ProfileReport) + Send + Sync + 'static>;

impl ProfileReport {
  /// Ranks `timings` by descending elapsed time and computes each share.
  pub fn from_timings(timings: Vec<(String, Duration)>) -> Self {
    let total: Duration = timings.iter().map(|(_, elapsed)| *elapsed).sum();
    let total_secs = total.as_secs_f64();

    let mut entries: Vec<ProfileEntry> = timings
      .into_iter()
      .map(|(key, elapsed)| ProfileEntry {
        key,
        elapsed,
        share_percent: if total_secs > 0.0 {
          elapsed.as_secs_f64() / total_secs * 100.0
        } else {
          0.0
        },
      })
      .collect();
    // Stable sort keeps submission order among equal timings.
    entries.sort_by(|a, b| b.elapsed.cmp(&a.elapsed));

    Self { total, entries }
  }

  pub(crate) fn log(&self) {
    info!(total_secs = self.total.as_secs_f64(), tasks = self.entries.len(), "Synchronous batch profile.");
    for entry in &self.entries {
      debug!(
        key = %entry.key,
        elapsed_us = entry.elapsed.as_micros() as u64,
        share = %format!("{:.2}%", entry.share_percent),
        "Task cost."
      );
    }
  }
}

impl fmt::Display for ProfileReport {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(f, "{} cost: {}(S) {}", "*".repeat(10), self.total.as_secs_f64(), "*".repeat(10))?;
    for entry in &self.entries {
      writeln!(
        f,
        "{} : {} > {:.2}%",
        entry.key,
        entry.elapsed.as_micros(),
        entry.share_percent
      )?;
    }
    Ok(())
  }
}
