//! Failover strategies.
//!
//! A strategy turns one logical operation into a sequence of attempts.
//! Each [`FailoverAttempt`] carries the provider and residual time budget
//! for one execution; when an execution fails, the attempt decides
//! whether a successor exists for that error.

pub mod retry;
pub mod role_based;

pub use retry::{RetryStrategy, retry};
pub use role_based::{Master, Replica, Role, RoleDispatcher, RoleStrategy, role_based};

use crate::conversion::ToParams;
use crate::deadline::{CancelHandle, TimeConstraint};
use crate::error::{Error, Result};
use crate::handler::RowHandler;
use crate::pool::ConnectionProvider;
use crate::query::Query;
use crate::request::request_with_cancel;

/// One attempt of an operation under a failover strategy.
pub trait FailoverAttempt: Sized + Send {
    /// Provider type attempts of this strategy execute against.
    type Provider: ConnectionProvider;

    /// The provider for this attempt.
    fn provider(&self) -> &Self::Provider;

    /// The time constraint for this attempt.
    fn time_constraint(&self) -> TimeConstraint;

    /// Whether the failed connection should be closed before the next
    /// attempt runs.
    fn close_connection(&self) -> bool {
        true
    }

    /// Consume this attempt after `error`; `Some` continues the
    /// operation with the successor, `None` surfaces the error.
    fn next_attempt(self, error: &Error) -> Option<Self>;
}

/// Factory of the first attempt for an operation.
pub trait FailoverStrategy<Source> {
    /// Attempt type produced by this strategy.
    type Attempt: FailoverAttempt;

    /// Build the first attempt from the operation's source and overall
    /// time constraint.
    fn first_attempt(&self, source: Source, t: TimeConstraint) -> Result<Self::Attempt>;
}

/// Execute `query` under a failover strategy.
///
/// Re-dispatches the operation while the strategy produces successor
/// attempts; the completion observes either the first success or the
/// error of the last attempt, exactly once.
pub async fn request_with<S, Src, A, H>(
    strategy: &S,
    source: Src,
    query: &Query<'_, A>,
    t: TimeConstraint,
    sink: &mut H,
) -> Result<()>
where
    S: FailoverStrategy<Src>,
    A: ToParams,
    H: RowHandler,
{
    let cancel = CancelHandle::new();
    let mut attempt = strategy.first_attempt(source, t)?;

    loop {
        let result = request_with_cancel(
            attempt.provider(),
            query,
            attempt.time_constraint(),
            sink,
            &cancel,
            attempt.close_connection(),
        )
        .await;

        match result {
            Ok(()) => return Ok(()),
            Err(error) => match attempt.next_attempt(&error) {
                Some(next) => {
                    tracing::debug!(%error, "retrying after recoverable error");
                    attempt = next;
                }
                None => return Err(error),
            },
        }
    }
}
