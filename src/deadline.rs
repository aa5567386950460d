//! Deadlines and cancellation.
//!
//! Every operation carries a [`TimeConstraint`] which is reduced to an
//! absolute instant on the monotonic clock before the operation starts.
//! The driver races the operation future against the deadline timer and a
//! cancellation handle; whichever completes first decides the outcome.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::{Error, Result};

/// Time constraint for an operation.
#[derive(Debug, Clone, Copy, Default)]
pub enum TimeConstraint {
    /// No limit.
    #[default]
    None,
    /// A budget counted from the moment the operation starts.
    Duration(Duration),
    /// An absolute point on the monotonic clock.
    At(Instant),
}

impl TimeConstraint {
    /// Reduce to an absolute deadline, using `now` for duration budgets.
    pub fn deadline(self) -> Option<Instant> {
        match self {
            TimeConstraint::None => None,
            TimeConstraint::Duration(d) => Some(Instant::now() + d),
            TimeConstraint::At(at) => Some(at),
        }
    }

    /// Time remaining until the deadline, saturating at zero.
    pub fn remaining(self) -> Option<Duration> {
        self.deadline()
            .map(|at| at.saturating_duration_since(Instant::now()))
    }
}

impl From<Duration> for TimeConstraint {
    fn from(d: Duration) -> Self {
        TimeConstraint::Duration(d)
    }
}

impl From<Instant> for TimeConstraint {
    fn from(at: Instant) -> Self {
        TimeConstraint::At(at)
    }
}

/// Split the time left until `deadline` evenly across `remaining` tries.
///
/// Returns the constraint for the next try: `(T - elapsed) / remaining`.
pub(crate) fn split_budget(deadline: Option<Instant>, remaining: u32) -> TimeConstraint {
    match deadline {
        None => TimeConstraint::None,
        Some(at) => {
            let left = at.saturating_duration_since(Instant::now());
            TimeConstraint::Duration(left / remaining.max(1))
        }
    }
}

#[derive(Default)]
struct CancelState {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Handle to abort an in-flight operation.
///
/// Cloneable; cancelling completes the operation with [`Error::Aborted`]
/// at its next suspension point. A cancelled connection is treated as
/// broken and will not be reused.
#[derive(Clone, Default)]
pub struct CancelHandle {
    state: Arc<CancelState>,
}

impl CancelHandle {
    /// Create a fresh handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Abort the associated operation.
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::SeqCst);
        self.state.notify.notify_waiters();
    }

    /// Whether `cancel` has been called.
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel` is called.
    pub(crate) async fn cancelled(&self) {
        let notified = self.state.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

/// Run `fut` under a deadline and a cancel handle.
///
/// The timer firing strictly before the future completes yields
/// [`Error::TimedOut`]; cancellation yields [`Error::Aborted`]. If the
/// future completes first the timer is dropped and a later firing cannot
/// reach the caller.
pub(crate) async fn constrained<T, F>(
    deadline: Option<Instant>,
    cancel: &CancelHandle,
    fut: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if cancel.is_cancelled() {
        return Err(Error::Aborted);
    }

    tokio::pin!(fut);
    let timer = async {
        match deadline {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        biased;
        res = &mut fut => res,
        _ = cancel.cancelled() => Err(Error::Aborted),
        _ = timer => Err(Error::TimedOut),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn timer_first_yields_timed_out() {
        let cancel = CancelHandle::new();
        let deadline = Some(Instant::now() + Duration::from_millis(10));
        let never = std::future::pending::<Result<()>>();
        let err = constrained(deadline, &cancel, never).await.unwrap_err();
        assert!(matches!(err, Error::TimedOut));
    }

    #[tokio::test(start_paused = true)]
    async fn completed_io_wins_over_armed_timer() {
        let cancel = CancelHandle::new();
        let deadline = Some(Instant::now() + Duration::from_secs(5));
        let res = constrained(deadline, &cancel, async { Ok::<_, Error>(7) }).await;
        assert_eq!(res.unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_yields_aborted() {
        let cancel = CancelHandle::new();
        let handle = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1)).await;
            handle.cancel();
        });
        let never = std::future::pending::<Result<()>>();
        let err = constrained(None, &cancel, never).await.unwrap_err();
        assert!(matches!(err, Error::Aborted));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_before_start_is_immediate() {
        let cancel = CancelHandle::new();
        cancel.cancel();
        let err = constrained(None, &cancel, async { Ok::<_, Error>(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Aborted));
    }

    #[tokio::test(start_paused = true)]
    async fn budget_splits_evenly_across_tries() {
        let deadline = Some(Instant::now() + Duration::from_millis(600));
        match split_budget(deadline, 3) {
            TimeConstraint::Duration(d) => assert_eq!(d, Duration::from_millis(200)),
            other => panic!("expected duration, got {:?}", other),
        }
        assert!(matches!(split_budget(None, 3), TimeConstraint::None));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_budget_splits_to_zero() {
        let deadline = Some(Instant::now() - Duration::from_millis(1));
        match split_budget(deadline, 2) {
            TimeConstraint::Duration(d) => assert_eq!(d, Duration::ZERO),
            other => panic!("expected duration, got {:?}", other),
        }
    }
}
