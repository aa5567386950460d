//! The request operation: acquire → send → drain → release.

use crate::conversion::ToParams;
use crate::deadline::{CancelHandle, TimeConstraint, constrained};
use crate::error::{Error, Result};
use crate::handler::{DropRows, RowHandler};
use crate::pool::{ConnectionProvider, PooledConn};
use crate::query::Query;

/// Hand out a connection within the time constraint.
pub async fn get_connection<P: ConnectionProvider>(
    provider: &P,
    t: TimeConstraint,
) -> Result<PooledConn> {
    provider.get_connection(t).await
}

/// Execute `query`, streaming result rows into `sink`.
///
/// The whole operation (connection acquisition included) runs under one
/// deadline reduced from `t`. On a deadline or cancellation the in-flight
/// conversation is abandoned and the connection is destroyed on release,
/// never reused.
pub async fn request<P, A, H>(
    provider: &P,
    query: &Query<'_, A>,
    t: TimeConstraint,
    sink: &mut H,
) -> Result<()>
where
    P: ConnectionProvider,
    A: ToParams,
    H: RowHandler,
{
    let cancel = CancelHandle::new();
    request_with_cancel(provider, query, t, sink, &cancel, false).await
}

/// Execute `query` and discard rows, returning the affected-row count.
pub async fn execute<P, A>(
    provider: &P,
    query: &Query<'_, A>,
    t: TimeConstraint,
) -> Result<Option<u64>>
where
    P: ConnectionProvider,
    A: ToParams,
{
    let mut sink = DropRows::new();
    request(provider, query, t, &mut sink).await?;
    Ok(sink.rows_affected())
}

/// [`request`] with an external cancel handle and a release policy.
///
/// `close_connection_on_error` forces the connection to be destroyed on
/// *any* error, even one that leaves the wire healthy; failover
/// strategies use it so a retry starts from a fresh connection.
pub async fn request_with_cancel<P, A, H>(
    provider: &P,
    query: &Query<'_, A>,
    t: TimeConstraint,
    sink: &mut H,
    cancel: &CancelHandle,
    close_connection_on_error: bool,
) -> Result<()>
where
    P: ConnectionProvider,
    A: ToParams,
    H: RowHandler,
{
    let deadline = t.deadline();

    let mut conn = constrained(
        deadline,
        cancel,
        provider.get_connection(match deadline {
            Some(at) => TimeConstraint::At(at),
            None => TimeConstraint::None,
        }),
    )
    .await?;

    // freeze against the live connection's map so user-type OIDs are the
    // ones this very server reported
    let frozen = query.freeze(conn.oid_map())?;

    let result = constrained(deadline, cancel, conn.exec_frozen(&frozen, sink)).await;

    if let Err(e) = &result {
        // a timeout or cancel abandoned the conversation mid-flight
        if matches!(e, Error::TimedOut | Error::Aborted) || close_connection_on_error {
            conn.mark_broken();
        }
    }

    drop(conn); // release decides idle-set vs destroy
    result
}
