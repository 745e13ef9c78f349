//! Scoped timers that log how long an operation took.
//!
//! A [`ScopedTimer`] logs on drop, so an early `?` return still produces a
//! record. Call [`ScopedTimer::succeed`] on the happy path; anything else is
//! reported as a failure.

use std::fmt::Display;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

enum Outcome {
    Running,
    Succeeded,
    Failed(String),
}

/// Logs elapsed time and outcome of an operation when dropped.
pub struct ScopedTimer {
    operation: String,
    start: Instant,
    outcome: Outcome,
}

impl ScopedTimer {
    pub fn start(operation: impl Into<String>) -> Self {
        let operation = operation.into();
        debug!(operation = %operation, "Operation started");
        Self {
            operation,
            start: Instant::now(),
            outcome: Outcome::Running,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Marks the operation as successful and flushes the log record.
    pub fn succeed(mut self) {
        self.outcome = Outcome::Succeeded;
    }

    /// Records a failure reason; the log record is written on drop.
    pub fn fail(&mut self, reason: impl Display) {
        self.outcome = Outcome::Failed(reason.to_string());
    }
}

impl Drop for ScopedTimer {
    fn drop(&mut self) {
        let elapsed_ms = self.start.elapsed().as_millis() as u64;
        match &self.outcome {
            Outcome::Succeeded => {
                debug!(operation = %self.operation, elapsed_ms, "Operation completed");
            }
            Outcome::Failed(reason) => {
                warn!(operation = %self.operation, elapsed_ms, error = %reason, "Operation failed");
            }
            Outcome::Running => {
                warn!(operation = %self.operation, elapsed_ms, "Operation ended without completing");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_measures_elapsed() {
        let timer = ScopedTimer::start("sleepy");
        std::thread::sleep(Duration::from_millis(5));
        assert!(timer.elapsed() >= Duration::from_millis(5));
        timer.succeed();
    }

    #[test]
    fn test_timer_records_failure_reason() {
        let mut timer = ScopedTimer::start("failing");
        timer.fail("provider unreachable");
        assert!(matches!(&timer.outcome, Outcome::Failed(r) if r == "provider unreachable"));
    }

    #[test]
    fn test_timer_dropped_on_early_return() {
        fn early() -> Result<(), &'static str> {
            let _timer = ScopedTimer::start("early");
            Err::<(), _>("bail")?;
            Ok(())
        }
        assert!(early().is_err());
    }
}
