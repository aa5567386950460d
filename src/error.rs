//! Error types for surge-postgres.

use thiserror::Error;

use crate::sqlstate::SqlState;

/// Result type for surge-postgres operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Parsed fields of a server ErrorResponse or NoticeResponse.
#[derive(Debug, Clone, Default)]
pub struct ErrorFields {
    /// Severity (localized): ERROR, FATAL, PANIC, WARNING, NOTICE, ...
    pub severity: Option<String>,
    /// Severity (non-localized, PostgreSQL 9.6+)
    pub severity_non_localized: Option<String>,
    /// SQLSTATE code (5 characters)
    pub code: Option<String>,
    /// Primary error message
    pub message: Option<String>,
    /// Detailed error explanation
    pub detail: Option<String>,
    /// Suggestion for fixing the error
    pub hint: Option<String>,
    /// Cursor position in query string (1-based)
    pub position: Option<u32>,
    /// Position in internal query
    pub internal_position: Option<u32>,
    /// Failed internal command text
    pub internal_query: Option<String>,
    /// Context/stack trace
    pub where_: Option<String>,
    /// Schema name
    pub schema: Option<String>,
    /// Table name
    pub table: Option<String>,
    /// Column name
    pub column: Option<String>,
    /// Data type name
    pub data_type: Option<String>,
    /// Constraint name
    pub constraint: Option<String>,
    /// Source file name
    pub file: Option<String>,
    /// Source line number
    pub line: Option<u32>,
    /// Source routine name
    pub routine: Option<String>,
}

impl ErrorFields {
    /// Severity, preferring the non-localized form.
    pub fn severity(&self) -> &str {
        self.severity_non_localized
            .as_deref()
            .or(self.severity.as_deref())
            .unwrap_or_default()
    }

    /// The SQLSTATE code, if present and well formed.
    pub fn sqlstate(&self) -> Option<SqlState> {
        self.code.as_deref().and_then(SqlState::from_code)
    }

    /// Primary error message.
    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or_default()
    }
}

impl std::fmt::Display for ErrorFields {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} (SQLSTATE {})",
            self.severity(),
            self.message(),
            self.code.as_deref().unwrap_or("?????"),
        )?;
        if let Some(detail) = &self.detail {
            write!(f, "\nDETAIL: {}", detail)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\nHINT: {}", hint)?;
        }
        Ok(())
    }
}

/// Error type for surge-postgres.
#[derive(Debug, Error)]
pub enum Error {
    /// Error response from the server, carrying a SQLSTATE
    #[error("PostgreSQL error: {0}")]
    Server(ErrorFields),

    /// Protocol error (malformed message, unexpected response, etc.)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Connection establishment failed before the protocol was up
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The query string sent to the server was empty
    #[error("Empty query")]
    EmptyQuery,

    /// A result status the engine does not handle (COPY, function call, ...)
    #[error("Unexpected message '{0}' from server")]
    UnexpectedMessage(char),

    /// A value's OID is not accepted by the requested Rust type
    #[error("Cannot decode oid {oid} as {rust_type}")]
    TypeMismatch {
        /// Target Rust type name
        rust_type: &'static str,
        /// The OID that was offered
        oid: u32,
    },

    /// SQL NULL received into a target that cannot represent it
    #[error("Unexpected NULL value")]
    UnexpectedNull,

    /// A fixed-size value arrived with the wrong payload length
    #[error("Bad object size: expected {expected} bytes, got {actual}")]
    BadObjectSize {
        /// Declared wire size of the type
        expected: usize,
        /// Received payload length
        actual: usize,
    },

    /// Result processing or value conversion failed
    #[error("Decode error: {0}")]
    Decode(String),

    /// OID discovery did not resolve every registered user type
    #[error("OID discovery failed: {0}")]
    OidDiscovery(String),

    /// The operation deadline fired
    #[error("Operation timed out")]
    TimedOut,

    /// The operation was cancelled, not by a deadline
    #[error("Operation aborted")]
    Aborted,

    /// The pool is at capacity and its wait queue is full
    #[error("Pool wait queue overflow")]
    PoolQueueOverflow,

    /// Connection is broken and cannot be reused
    #[error("Connection is broken")]
    ConnectionBroken,

    /// Invalid usage (e.g., mismatched placeholder arity)
    #[error("Invalid usage: {0}")]
    InvalidUsage(String),

    /// Unsupported feature
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl Error {
    /// Returns true if the error indicates the connection is broken and
    /// cannot be returned to a pool's idle set.
    pub fn is_connection_broken(&self) -> bool {
        match self {
            Error::Io(_)
            | Error::ConnectionBroken
            | Error::Protocol(_)
            | Error::UnexpectedMessage(_)
            | Error::TimedOut
            | Error::Aborted => true,
            Error::Server(fields) => matches!(fields.severity(), "FATAL" | "PANIC"),
            _ => false,
        }
    }

    /// Get the SQLSTATE code if this is a server error.
    pub fn sqlstate(&self) -> Option<SqlState> {
        match self {
            Error::Server(fields) => fields.sqlstate(),
            _ => None,
        }
    }

    pub(crate) fn type_mismatch(rust_type: &'static str, oid: u32) -> Self {
        Error::TypeMismatch { rust_type, oid }
    }
}

impl<Src: std::fmt::Debug, Dst: std::fmt::Debug + ?Sized> From<zerocopy::error::CastError<Src, Dst>>
    for Error
{
    fn from(err: zerocopy::error::CastError<Src, Dst>) -> Self {
        Error::Protocol(format!("zerocopy cast error: {err:?}"))
    }
}

impl From<std::convert::Infallible> for Error {
    fn from(err: std::convert::Infallible) -> Self {
        match err {}
    }
}

/// Broad error conditions used by failover strategies to decide whether
/// an error is recoverable by another attempt or another host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCondition {
    /// Any error reported by the server with a SQLSTATE
    Sql,
    /// Connection could not be established or was rejected
    Connect,
    /// The transport failed: I/O error, timeout, cancellation
    Transport,
    /// The host refused a write because it is read-only (e.g. a replica
    /// after a failover demotion)
    DatabaseReadonly,
    /// A value could not be converted between wire and Rust form
    TypeMismatch,
    /// The wire conversation itself went wrong
    Protocol,
}

impl ErrorCondition {
    /// Whether `err` falls into this condition.
    pub fn matches(self, err: &Error) -> bool {
        match self {
            ErrorCondition::Sql => matches!(err, Error::Server(_) | Error::EmptyQuery),
            ErrorCondition::Connect => match err {
                Error::ConnectFailed(_) | Error::Auth(_) | Error::ConnectionBroken => true,
                Error::Server(fields) => fields
                    .sqlstate()
                    .is_some_and(|s| s.is_connection_exception() || s.is_server_unavailable()),
                _ => false,
            },
            ErrorCondition::Transport => {
                matches!(err, Error::Io(_) | Error::TimedOut | Error::Aborted)
            }
            ErrorCondition::DatabaseReadonly => {
                err.sqlstate() == Some(SqlState::READ_ONLY_SQL_TRANSACTION)
            }
            ErrorCondition::TypeMismatch => matches!(
                err,
                Error::TypeMismatch { .. }
                    | Error::UnexpectedNull
                    | Error::BadObjectSize { .. }
                    | Error::Decode(_)
            ),
            ErrorCondition::Protocol => {
                matches!(err, Error::Protocol(_) | Error::UnexpectedMessage(_))
            }
        }
    }
}
