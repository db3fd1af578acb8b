//! Per-item time budgets
//!
//! Each stage runs on its own tokio task and is awaited with a timeout equal to
//! the request's remaining budget. A stage that finds no budget left is never
//! started.

use crate::failure::{Failure, Stage};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::warn;

/// Absolute deadline for one request
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    at: Instant,
}

impl Deadline {
    /// A deadline `budget` from now
    pub fn after(budget: Duration) -> Self {
        let start = Instant::now();
        Self {
            start,
            at: start + budget,
        }
    }

    /// Time left, or `None` once the deadline has passed
    pub fn remaining(&self) -> Option<Duration> {
        let left = self.at.saturating_duration_since(Instant::now());
        if left.is_zero() {
            None
        } else {
            Some(left)
        }
    }

    /// The full budget this deadline was created with
    pub fn budget(&self) -> Duration {
        self.at - self.start
    }

    /// Clamp a wait to what is left of the budget
    pub fn clamp(&self, wait: Duration) -> Duration {
        self.remaining().map(|left| left.min(wait)).unwrap_or_default()
    }

    fn exhausted(&self, stage: Stage) -> Failure {
        Failure::timeout(
            stage,
            format!(
                "budget of {:.1}s exhausted before {} could finish",
                self.budget().as_secs_f64(),
                stage
            ),
        )
    }

    /// Run an async stage on its own task, bounded by the remaining budget.
    ///
    /// On timeout the task is aborted, which drops everything it owns.
    pub async fn run<F, T>(&self, stage: Stage, fut: F) -> Result<T, Failure>
    where
        F: Future<Output = Result<T, Failure>> + Send + 'static,
        T: Send + 'static,
    {
        let left = self.remaining().ok_or_else(|| self.exhausted(stage))?;
        let mut handle = tokio::spawn(fut);
        match tokio::time::timeout(left, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(Failure::convert(
                stage,
                format!("stage task failed: {}", join_err),
            )),
            Err(_) => {
                handle.abort();
                warn!(stage = %stage, "Stage aborted: budget exhausted");
                Err(self.exhausted(stage))
            }
        }
    }

    /// Run a CPU-bound stage on the blocking pool, bounded by the remaining budget.
    ///
    /// A blocking closure cannot be interrupted; on timeout its result is discarded.
    pub async fn run_blocking<F, T>(&self, stage: Stage, f: F) -> Result<T, Failure>
    where
        F: FnOnce() -> Result<T, Failure> + Send + 'static,
        T: Send + 'static,
    {
        let left = self.remaining().ok_or_else(|| self.exhausted(stage))?;
        let handle = tokio::task::spawn_blocking(f);
        match tokio::time::timeout(left, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(Failure::convert(
                stage,
                format!("stage task failed: {}", join_err),
            )),
            Err(_) => {
                warn!(stage = %stage, "Blocking stage outlived the budget");
                Err(self.exhausted(stage))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failure::FailureCode;

    #[tokio::test]
    async fn test_run_returns_stage_result() {
        let deadline = Deadline::after(Duration::from_secs(5));
        let value = deadline
            .run(Stage::Fetch, async { Ok::<_, Failure>(42) })
            .await
            .unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_run_times_out_slow_stage() {
        let deadline = Deadline::after(Duration::from_millis(50));
        let started = Instant::now();
        let err = deadline
            .run(Stage::DynamicFallback, async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<_, Failure>(())
            })
            .await
            .unwrap_err();
        assert_eq!(err.code, FailureCode::TimeoutTotal);
        assert_eq!(err.stage, Stage::DynamicFallback);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_exhausted_budget_never_starts_stage() {
        let deadline = Deadline::after(Duration::from_millis(1));
        tokio::time::sleep(Duration::from_millis(10)).await;
        let err = deadline
            .run_blocking(Stage::Convert, || -> Result<(), Failure> {
                panic!("stage must not start")
            })
            .await
            .unwrap_err();
        assert_eq!(err.code, FailureCode::TimeoutTotal);
        assert_eq!(err.stage, Stage::Convert);
    }

    #[tokio::test]
    async fn test_late_stages_check_the_budget() {
        let deadline = Deadline::after(Duration::from_millis(1));
        tokio::time::sleep(Duration::from_millis(10)).await;
        for stage in [Stage::Rewrite, Stage::Persist] {
            let err = deadline
                .run_blocking(stage, || -> Result<(), Failure> { panic!("stage must not start") })
                .await
                .unwrap_err();
            assert_eq!(err.code, FailureCode::TimeoutTotal);
            assert_eq!(err.stage, stage);
        }
    }

    #[test]
    fn test_clamp_limits_wait_to_remaining() {
        let deadline = Deadline::after(Duration::from_millis(100));
        assert!(deadline.clamp(Duration::from_secs(30)) <= Duration::from_millis(100));
    }
}
