//! Role-based fallback: walk an ordered list of host roles.
//!
//! A cluster exposes hosts under role tags, typically a writable master
//! and one or more replicas. The strategy executes against the first
//! role and, on a recoverable error, falls through the remaining roles,
//! skipping any role whose recovery set does not cover the error.

use std::sync::Arc;

use tokio::time::Instant;

use crate::deadline::{TimeConstraint, split_budget};
use crate::error::{Error, ErrorCondition, Result};
use crate::pool::Pool;

use super::{FailoverAttempt, FailoverStrategy};

/// A host role: a nominal tag plus its recovery rule.
pub trait Role: Send + Sync + 'static {
    /// Role tag, used to look up a provider in the dispatcher.
    fn name(&self) -> &'static str;

    /// Whether an operation that failed with `error` may recover by
    /// running against a host of this role.
    fn can_recover(&self, error: &Error) -> bool;
}

/// The writable master role.
///
/// Recovers connect, transport, type-mismatch and protocol errors, and
/// additionally read-only rejections: after a cluster failover the old
/// master keeps answering read-only until demoted, so moving on to the
/// current master address can succeed.
#[derive(Debug, Clone, Copy)]
pub struct Master;

impl Role for Master {
    fn name(&self) -> &'static str {
        "master"
    }

    fn can_recover(&self, error: &Error) -> bool {
        [
            ErrorCondition::Connect,
            ErrorCondition::Transport,
            ErrorCondition::TypeMismatch,
            ErrorCondition::Protocol,
            ErrorCondition::DatabaseReadonly,
        ]
        .iter()
        .any(|c| c.matches(error))
    }
}

/// The read-only replica role.
///
/// Recovers what [`Master`] does except read-only rejections: every
/// replica is read-only, so falling further would never help.
#[derive(Debug, Clone, Copy)]
pub struct Replica;

impl Role for Replica {
    fn name(&self) -> &'static str {
        "replica"
    }

    fn can_recover(&self, error: &Error) -> bool {
        [
            ErrorCondition::Connect,
            ErrorCondition::Transport,
            ErrorCondition::TypeMismatch,
            ErrorCondition::Protocol,
        ]
        .iter()
        .any(|c| c.matches(error))
    }
}

/// Maps role tags to connection pools.
#[derive(Clone, Default)]
pub struct RoleDispatcher {
    pools: Vec<(&'static str, Pool)>,
}

impl RoleDispatcher {
    /// Create an empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the pool serving a role.
    #[must_use]
    pub fn with_role(mut self, role: &impl Role, pool: Pool) -> Self {
        self.pools.push((role.name(), pool));
        self
    }

    /// The pool serving `role`. Unknown roles are a configuration error.
    pub fn rebind_role(&self, role: &dyn Role) -> Result<Pool> {
        self.pools
            .iter()
            .find(|(name, _)| *name == role.name())
            .map(|(_, pool)| pool.clone())
            .ok_or_else(|| {
                Error::InvalidUsage(format!(
                    "no provider registered for role `{}`",
                    role.name()
                ))
            })
    }
}

/// Fallback across an ordered sequence of roles.
#[derive(Clone)]
pub struct RoleStrategy {
    roles: Arc<[Arc<dyn Role>]>,
}

/// Build a role-based strategy over an ordered role list.
pub fn role_based(roles: Vec<Arc<dyn Role>>) -> RoleStrategy {
    RoleStrategy {
        roles: roles.into(),
    }
}

/// One execution against one role.
pub struct RoleAttempt {
    dispatcher: RoleDispatcher,
    roles: Arc<[Arc<dyn Role>]>,
    index: usize,
    pool: Pool,
    deadline: Option<Instant>,
}

impl FailoverAttempt for RoleAttempt {
    type Provider = Pool;

    fn provider(&self) -> &Pool {
        &self.pool
    }

    fn time_constraint(&self) -> TimeConstraint {
        let remaining = (self.roles.len() - self.index) as u32;
        split_budget(self.deadline, remaining)
    }

    fn next_attempt(self, error: &Error) -> Option<Self> {
        for index in self.index + 1..self.roles.len() {
            let role = &self.roles[index];
            if !role.can_recover(error) {
                tracing::debug!(role = role.name(), %error, "role cannot recover, skipping");
                continue;
            }
            match self.dispatcher.rebind_role(role.as_ref()) {
                Ok(pool) => {
                    return Some(Self {
                        index,
                        pool,
                        ..self
                    });
                }
                Err(e) => {
                    tracing::warn!(role = role.name(), %e, "skipping unbound role");
                }
            }
        }
        None
    }
}

impl FailoverStrategy<RoleDispatcher> for RoleStrategy {
    type Attempt = RoleAttempt;

    fn first_attempt(&self, dispatcher: RoleDispatcher, t: TimeConstraint) -> Result<RoleAttempt> {
        let first = self
            .roles
            .first()
            .ok_or_else(|| Error::InvalidUsage("role list is empty".into()))?;
        let pool = dispatcher.rebind_role(first.as_ref())?;

        Ok(RoleAttempt {
            dispatcher,
            roles: Arc::clone(&self.roles),
            index: 0,
            pool,
            deadline: t.deadline(),
        })
    }
}

/// Read-mostly default: try the master, fall back to a replica.
pub fn master_then_replica() -> RoleStrategy {
    role_based(vec![Arc::new(Master), Arc::new(Replica)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorFields;
    use crate::opts::Opts;

    fn readonly_error() -> Error {
        Error::Server(ErrorFields {
            code: Some("25006".into()),
            severity: Some("ERROR".into()),
            ..Default::default()
        })
    }

    fn dispatcher() -> RoleDispatcher {
        let opts = Opts {
            host: "localhost".into(),
            user: "app".into(),
            ..Opts::default()
        };
        RoleDispatcher::new()
            .with_role(&Master, Pool::new(opts.clone()))
            .with_role(&Replica, Pool::new(opts))
    }

    #[test]
    fn recovery_matrix_matches_roles() {
        assert!(Master.can_recover(&readonly_error()));
        assert!(!Replica.can_recover(&readonly_error()));
        assert!(Master.can_recover(&Error::TimedOut));
        assert!(Replica.can_recover(&Error::TimedOut));
        assert!(!Master.can_recover(&Error::EmptyQuery));
    }

    #[test]
    fn fallback_skips_roles_that_cannot_recover() {
        // master, replica, replica: a read-only error after the first
        // attempt must not fall to a replica
        let strategy = role_based(vec![
            Arc::new(Master),
            Arc::new(Replica),
            Arc::new(Replica),
        ]);
        let attempt = strategy
            .first_attempt(dispatcher(), TimeConstraint::None)
            .unwrap();

        assert!(attempt.next_attempt(&readonly_error()).is_none());

        // a transport error falls through to the next replica
        let attempt = strategy
            .first_attempt(dispatcher(), TimeConstraint::None)
            .unwrap();
        let next = attempt.next_attempt(&Error::TimedOut).unwrap();
        assert_eq!(next.roles[next.index].name(), "replica");
    }

    #[test]
    fn unbound_role_is_rejected_up_front() {
        let strategy = role_based(vec![Arc::new(Master)]);
        let empty = RoleDispatcher::new();
        assert!(matches!(
            strategy.first_attempt(empty, TimeConstraint::None),
            Err(Error::InvalidUsage(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn budget_splits_across_remaining_roles() {
        let strategy = role_based(vec![Arc::new(Master), Arc::new(Replica)]);
        let attempt = strategy
            .first_attempt(
                dispatcher(),
                std::time::Duration::from_millis(400).into(),
            )
            .unwrap();

        match attempt.time_constraint() {
            TimeConstraint::Duration(d) => {
                assert_eq!(d, std::time::Duration::from_millis(200));
            }
            other => panic!("expected duration, got {other:?}"),
        }
    }
}
