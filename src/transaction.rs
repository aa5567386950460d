//! Transaction sessions.
//!
//! [`begin`] borrows a connection exclusively and opens a transaction on
//! it; the session keeps the connection until COMMIT or ROLLBACK returns
//! it to the pool. Dropping an open session marks the connection broken
//! so the pool destroys it instead of ever pooling a connection stuck in
//! a transaction block.

use crate::conversion::ToParams;
use crate::deadline::{CancelHandle, TimeConstraint, constrained};
use crate::error::{Error, Result};
use crate::handler::{DropRows, RowHandler};
use crate::pool::{ConnectionProvider, PooledConn};
use crate::query::Query;

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    Serializable,
    RepeatableRead,
    ReadCommitted,
    ReadUncommitted,
}

impl IsolationLevel {
    fn sql(self) -> &'static str {
        match self {
            IsolationLevel::Serializable => "ISOLATION LEVEL SERIALIZABLE",
            IsolationLevel::RepeatableRead => "ISOLATION LEVEL REPEATABLE READ",
            IsolationLevel::ReadCommitted => "ISOLATION LEVEL READ COMMITTED",
            IsolationLevel::ReadUncommitted => "ISOLATION LEVEL READ UNCOMMITTED",
        }
    }
}

/// Transaction access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    ReadWrite,
    ReadOnly,
}

impl TransactionMode {
    fn sql(self) -> &'static str {
        match self {
            TransactionMode::ReadWrite => "READ WRITE",
            TransactionMode::ReadOnly => "READ ONLY",
        }
    }
}

/// Transaction deferrability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deferrability {
    Deferrable,
    NotDeferrable,
}

impl Deferrability {
    fn sql(self) -> &'static str {
        match self {
            Deferrability::Deferrable => "DEFERRABLE",
            Deferrability::NotDeferrable => "NOT DEFERRABLE",
        }
    }
}

/// Options for BEGIN. Unset options are omitted from the statement.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransactionOptions {
    isolation: Option<IsolationLevel>,
    mode: Option<TransactionMode>,
    deferrability: Option<Deferrability>,
}

impl TransactionOptions {
    /// Options that emit a bare `BEGIN`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the isolation level.
    #[must_use]
    pub fn isolation(mut self, level: IsolationLevel) -> Self {
        self.isolation = Some(level);
        self
    }

    /// Set the access mode.
    #[must_use]
    pub fn mode(mut self, mode: TransactionMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Set deferrability.
    #[must_use]
    pub fn deferrability(mut self, deferrability: Deferrability) -> Self {
        self.deferrability = Some(deferrability);
        self
    }

    /// The BEGIN statement for these options.
    fn begin_statement(&self) -> String {
        let mut sql = String::from("BEGIN");
        if let Some(isolation) = self.isolation {
            sql.push(' ');
            sql.push_str(isolation.sql());
        }
        if let Some(mode) = self.mode {
            sql.push(' ');
            sql.push_str(mode.sql());
        }
        if let Some(deferrability) = self.deferrability {
            sql.push(' ');
            sql.push_str(deferrability.sql());
        }
        sql
    }
}

/// Open a transaction on a freshly acquired connection.
pub async fn begin<P: ConnectionProvider>(
    provider: &P,
    options: TransactionOptions,
    t: TimeConstraint,
) -> Result<Transaction> {
    let deadline = t.deadline();
    let cancel = CancelHandle::new();

    let mut conn = constrained(
        deadline,
        &cancel,
        provider.get_connection(match deadline {
            Some(at) => TimeConstraint::At(at),
            None => TimeConstraint::None,
        }),
    )
    .await?;

    let statement = options.begin_statement();
    let result = constrained(
        deadline,
        &cancel,
        conn.exec_drop(Query::new(statement.as_str(), ())),
    )
    .await;

    if let Err(e) = result {
        conn.mark_broken();
        drop(conn);
        return Err(e);
    }

    Ok(Transaction { conn: Some(conn) })
}

/// An open transaction owning its connection exclusively.
///
/// Must be finished with [`commit`][Transaction::commit] or
/// [`rollback`][Transaction::rollback]; a session dropped while open
/// takes its connection with it.
pub struct Transaction {
    conn: Option<PooledConn>,
}

impl Transaction {
    fn conn(&mut self) -> &mut PooledConn {
        // present from construction until commit/rollback consumes self
        match self.conn.as_mut() {
            Some(conn) => conn,
            None => unreachable!("transaction used after completion"),
        }
    }

    /// Execute a query inside the transaction, streaming rows to `sink`.
    pub async fn request<A: ToParams, H: RowHandler>(
        &mut self,
        query: &Query<'_, A>,
        t: TimeConstraint,
        sink: &mut H,
    ) -> Result<()> {
        let deadline = t.deadline();
        let cancel = CancelHandle::new();
        let conn = self.conn();

        let frozen = query.freeze(conn.oid_map())?;
        let result = constrained(deadline, &cancel, conn.exec_frozen(&frozen, sink)).await;
        if let Err(e) = &result {
            if matches!(e, Error::TimedOut | Error::Aborted) {
                conn.mark_broken();
            }
        }
        result
    }

    /// Execute a query inside the transaction, discarding rows.
    pub async fn execute<A: ToParams>(
        &mut self,
        query: &Query<'_, A>,
        t: TimeConstraint,
    ) -> Result<Option<u64>> {
        let mut sink = DropRows::new();
        self.request(query, t, &mut sink).await?;
        Ok(sink.rows_affected())
    }

    async fn end(mut self, statement: &str, t: TimeConstraint) -> Result<()> {
        let Some(mut conn) = self.conn.take() else {
            return Err(Error::InvalidUsage("transaction already completed".into()));
        };

        let deadline = t.deadline();
        let cancel = CancelHandle::new();

        let result = constrained(
            deadline,
            &cancel,
            conn.exec_drop(Query::new(statement, ())),
        )
        .await;

        match result {
            // release to the pool idle and healthy
            Ok(_) => Ok(()),
            Err(e) => {
                conn.mark_broken();
                Err(e)
            }
        }
    }

    /// Commit and release the connection to its pool.
    pub async fn commit(self, t: TimeConstraint) -> Result<()> {
        self.end("COMMIT", t).await
    }

    /// Roll back and release the connection to its pool.
    pub async fn rollback(self, t: TimeConstraint) -> Result<()> {
        self.end("ROLLBACK", t).await
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            // never return a connection with an open transaction
            tracing::warn!("transaction dropped without commit or rollback");
            conn.mark_broken();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_statement_combinations() {
        let cases = [
            (TransactionOptions::new(), "BEGIN"),
            (
                TransactionOptions::new().isolation(IsolationLevel::Serializable),
                "BEGIN ISOLATION LEVEL SERIALIZABLE",
            ),
            (
                TransactionOptions::new()
                    .isolation(IsolationLevel::Serializable)
                    .mode(TransactionMode::ReadWrite)
                    .deferrability(Deferrability::Deferrable),
                "BEGIN ISOLATION LEVEL SERIALIZABLE READ WRITE DEFERRABLE",
            ),
            (
                TransactionOptions::new()
                    .isolation(IsolationLevel::RepeatableRead)
                    .mode(TransactionMode::ReadOnly)
                    .deferrability(Deferrability::NotDeferrable),
                "BEGIN ISOLATION LEVEL REPEATABLE READ READ ONLY NOT DEFERRABLE",
            ),
            (
                TransactionOptions::new()
                    .isolation(IsolationLevel::ReadCommitted)
                    .mode(TransactionMode::ReadWrite),
                "BEGIN ISOLATION LEVEL READ COMMITTED READ WRITE",
            ),
            (
                TransactionOptions::new().isolation(IsolationLevel::ReadUncommitted),
                "BEGIN ISOLATION LEVEL READ UNCOMMITTED",
            ),
            (
                TransactionOptions::new()
                    .mode(TransactionMode::ReadOnly)
                    .deferrability(Deferrability::Deferrable),
                "BEGIN READ ONLY DEFERRABLE",
            ),
            (
                TransactionOptions::new().deferrability(Deferrability::NotDeferrable),
                "BEGIN NOT DEFERRABLE",
            ),
        ];

        for (options, expected) in cases {
            assert_eq!(options.begin_statement(), expected);
        }
    }
}
