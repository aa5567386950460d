//! Retry strategy: re-run the operation in place.

use std::sync::Arc;

use tokio::time::Instant;

use crate::deadline::{TimeConstraint, split_budget};
use crate::error::{Error, ErrorCondition, Result};
use crate::pool::ConnectionProvider;

use super::{FailoverAttempt, FailoverStrategy};

type RetryCallback = Arc<dyn Fn(&Error) + Send + Sync>;

struct RetryOptions {
    tries: u32,
    conditions: Vec<ErrorCondition>,
    close_connection: bool,
    on_retry: Option<RetryCallback>,
}

/// Retry an operation up to a fixed number of tries.
///
/// The overall time budget is split evenly across the tries that
/// remain: with budget `T` and `n` tries left, the next try gets
/// `(T - elapsed) / n`.
#[derive(Clone)]
pub struct RetryStrategy {
    options: Arc<RetryOptions>,
}

/// Build a retry strategy with the given number of tries.
pub fn retry(tries: u32) -> RetryStrategy {
    RetryStrategy {
        options: Arc::new(RetryOptions {
            tries,
            conditions: Vec::new(),
            close_connection: true,
            on_retry: None,
        }),
    }
}

impl RetryStrategy {
    fn options_mut(&mut self) -> &mut RetryOptions {
        // builder methods run before the strategy is shared
        Arc::get_mut(&mut self.options).unwrap_or_else(|| {
            unreachable!("retry strategy configured after first use")
        })
    }

    /// Retry only errors matching one of `conditions`. An empty list
    /// (the default) retries every error.
    #[must_use]
    pub fn conditions(mut self, conditions: &[ErrorCondition]) -> Self {
        self.options_mut().conditions = conditions.to_vec();
        self
    }

    /// Keep the failed connection alive across retries instead of
    /// closing it.
    #[must_use]
    pub fn keep_connection(mut self) -> Self {
        self.options_mut().close_connection = false;
        self
    }

    /// Observe every retry decision, e.g. for logging.
    #[must_use]
    pub fn on_retry<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.options_mut().on_retry = Some(Arc::new(callback));
        self
    }
}

/// One try of a retried operation.
pub struct RetryAttempt<P> {
    provider: P,
    options: Arc<RetryOptions>,
    /// Overall operation deadline, fixed at the first try
    deadline: Option<Instant>,
    tries_left: u32,
}

impl<P: ConnectionProvider + Send> FailoverAttempt for RetryAttempt<P> {
    type Provider = P;

    fn provider(&self) -> &P {
        &self.provider
    }

    fn time_constraint(&self) -> TimeConstraint {
        split_budget(self.deadline, self.tries_left)
    }

    fn close_connection(&self) -> bool {
        self.options.close_connection
    }

    fn next_attempt(self, error: &Error) -> Option<Self> {
        let tries_left = self.tries_left.saturating_sub(1);
        if tries_left == 0 {
            return None;
        }

        let conditions = &self.options.conditions;
        if !conditions.is_empty() && !conditions.iter().any(|c| c.matches(error)) {
            return None;
        }

        if let Some(on_retry) = &self.options.on_retry {
            on_retry(error);
        }

        Some(Self {
            tries_left,
            ..self
        })
    }
}

impl<P: ConnectionProvider + Send> FailoverStrategy<P> for RetryStrategy {
    type Attempt = RetryAttempt<P>;

    fn first_attempt(&self, provider: P, t: TimeConstraint) -> Result<Self::Attempt> {
        Ok(RetryAttempt {
            provider,
            options: Arc::clone(&self.options),
            deadline: t.deadline(),
            tries_left: self.options.tries,
        })
    }
}
