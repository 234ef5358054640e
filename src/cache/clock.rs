//! Epoch-minute clocks used for TTL arithmetic.

use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Source of the current epoch-minute (whole minutes since the Unix epoch).
pub trait Clock: Send + Sync {
  fn epoch_minute(&self) -> i64;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn epoch_minute(&self) -> i64 {
    Utc::now().timestamp().div_euclid(60)
  }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
  minute: Arc<AtomicI64>,
}

impl ManualClock {
  pub fn at(minute: i64) -> Self {
    Self {
      minute: Arc::new(AtomicI64::new(minute)),
    }
  }

  /// Move time forward by `minutes`.
  pub fn advance(&self, minutes: i64) {
    self.minute.fetch_add(minutes, Ordering::SeqCst);
  }
}

impl Clock for ManualClock {
  fn epoch_minute(&self) -> i64 {
    self.minute.load(Ordering::SeqCst)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_manual_clock_advances_shared_time() {
    let clock = ManualClock::at(100);
    let other = clock.clone();

    clock.advance(5);
    assert_eq!(other.epoch_minute(), 105);
  }

  #[test]
  fn test_system_clock_is_in_minutes() {
    let minute = SystemClock.epoch_minute();
    let secs = Utc::now().timestamp();
    assert!((secs / 60 - minute).abs() <= 1);
  }
}
