//! Bounded retry/poll of asynchronous UI conditions

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{HarnessError, HarnessResult};

/// Attempt count and fixed gap for one poll operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    pub attempts: u32,
    pub interval: Duration,
}

impl RetryBudget {
    pub fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The predicate held on this attempt (1-based)
    Satisfied { attempts: u32 },
    /// Every attempt returned false
    Exhausted { attempts: u32 },
}

impl PollOutcome {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, PollOutcome::Satisfied { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            PollOutcome::Satisfied { attempts } | PollOutcome::Exhausted { attempts } => *attempts,
        }
    }
}

/// Evaluate `predicate` until it returns true or the budget runs out.
///
/// The interval is slept before every attempt, the first included, so a
/// condition that is already true is still observed one interval late. A zero
/// budget sleeps once and reports exhaustion without calling the predicate.
/// An error from the predicate is returned as-is and ends the poll.
pub async fn poll<P, Fut>(budget: RetryBudget, mut predicate: P) -> HarnessResult<PollOutcome>
where
    P: FnMut() -> Fut,
    Fut: Future<Output = HarnessResult<bool>>,
{
    if budget.attempts == 0 {
        sleep(budget.interval).await;
        return Ok(PollOutcome::Exhausted { attempts: 0 });
    }

    for attempt in 1..=budget.attempts {
        sleep(budget.interval).await;

        if predicate().await? {
            debug!(attempt, "Condition met");
            return Ok(PollOutcome::Satisfied { attempts: attempt });
        }

        debug!(attempt, remaining = budget.attempts - attempt, "Condition not met yet");
    }

    Ok(PollOutcome::Exhausted {
        attempts: budget.attempts,
    })
}

/// Like [`poll`], but runs `on_exhaustion` before failing with
/// [`HarnessError::PollExhausted`].
///
/// The hook completes before the error is returned. Predicate errors skip it.
pub async fn poll_or_else<P, Fut, H, HFut>(
    budget: RetryBudget,
    message: &str,
    predicate: P,
    on_exhaustion: H,
) -> HarnessResult<u32>
where
    P: FnMut() -> Fut,
    Fut: Future<Output = HarnessResult<bool>>,
    H: FnOnce(u32) -> HFut,
    HFut: Future<Output = ()>,
{
    match poll(budget, predicate).await? {
        PollOutcome::Satisfied { attempts } => Ok(attempts),
        PollOutcome::Exhausted { attempts } => {
            warn!(attempts, "{}", message);
            on_exhaustion(attempts).await;
            Err(HarnessError::PollExhausted {
                message: message.to_string(),
                attempts,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use tokio::time::Instant;

    const GAP: Duration = Duration::from_millis(100);

    fn assert_waited(start: Instant, intervals: u32) {
        let expected = GAP * intervals;
        let elapsed = start.elapsed();
        assert!(
            elapsed >= expected && elapsed < expected + Duration::from_millis(50),
            "expected ~{:?}, waited {:?}",
            expected,
            elapsed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_false_exhausts_after_n_attempts() {
        let calls = Cell::new(0u32);
        let start = Instant::now();

        let outcome = poll(RetryBudget::new(4, GAP), || {
            calls.set(calls.get() + 1);
            async { Ok(false) }
        })
        .await
        .unwrap();

        assert_eq!(outcome, PollOutcome::Exhausted { attempts: 4 });
        assert_eq!(calls.get(), 4);
        assert_waited(start, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_kth_attempt() {
        let calls = Cell::new(0u32);
        let start = Instant::now();

        let outcome = poll(RetryBudget::new(5, GAP), || {
            calls.set(calls.get() + 1);
            let n = calls.get();
            async move { Ok(n == 3) }
        })
        .await
        .unwrap();

        assert_eq!(outcome, PollOutcome::Satisfied { attempts: 3 });
        assert_eq!(calls.get(), 3);
        assert_waited(start, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_true_immediately_still_waits_one_interval() {
        let start = Instant::now();
        let outcome = poll(RetryBudget::new(3, GAP), || async { Ok(true) })
            .await
            .unwrap();

        assert!(outcome.is_satisfied());
        assert_eq!(outcome.attempts(), 1);
        assert_waited(start, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_budget_waits_once_then_fails() {
        let calls = Cell::new(0u32);
        let start = Instant::now();

        let outcome = poll(RetryBudget::new(0, GAP), || {
            calls.set(calls.get() + 1);
            async { Ok(true) }
        })
        .await
        .unwrap();

        assert_eq!(outcome, PollOutcome::Exhausted { attempts: 0 });
        assert_eq!(calls.get(), 0);
        assert_waited(start, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_predicate_error_propagates_without_retry() {
        let calls = Cell::new(0u32);
        let hook_ran = Cell::new(false);
        let hook_flag = &hook_ran;

        let err = poll_or_else(
            RetryBudget::new(5, GAP),
            "never visible",
            || {
                calls.set(calls.get() + 1);
                let n = calls.get();
                async move {
                    if n == 2 {
                        Err(HarnessError::Predicate("locator detached".into()))
                    } else {
                        Ok(false)
                    }
                }
            },
            move |_| async move { hook_flag.set(true) },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, HarnessError::Predicate(ref m) if m == "locator detached"));
        assert_eq!(calls.get(), 2);
        assert!(!hook_ran.get());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_runs_hook_before_error() {
        let events = RefCell::new(Vec::new());

        let result = poll_or_else(
            RetryBudget::new(2, GAP),
            "tree view never appeared",
            || {
                events.borrow_mut().push("attempt");
                async { Ok(false) }
            },
            |attempts| {
                events.borrow_mut().push("hook");
                assert_eq!(attempts, 2);
                async {}
            },
        )
        .await;

        match result {
            Err(HarnessError::PollExhausted { message, attempts }) => {
                assert_eq!(message, "tree view never appeared");
                assert_eq!(attempts, 2);
            }
            other => panic!("expected PollExhausted, got {:?}", other),
        }
        assert_eq!(*events.borrow(), vec!["attempt", "attempt", "hook"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_skips_hook() {
        let hook_ran = Cell::new(false);
        let hook_flag = &hook_ran;
        let attempts = poll_or_else(
            RetryBudget::new(2, GAP),
            "unused",
            || async { Ok(true) },
            move |_| async move { hook_flag.set(true) },
        )
        .await
        .unwrap();

        assert_eq!(attempts, 1);
        assert!(!hook_ran.get());
    }
}
