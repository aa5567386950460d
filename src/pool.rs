//! Bounded connection pool with a FIFO wait queue.
//!
//! All bookkeeping lives behind one mutex: the idle queue, the total
//! count and the waiter queue. A checked-out connection is owned solely
//! by its [`PooledConn`]; release happens on drop, so the pool is never
//! mutated from user code directly.
//!
//! Grants handed to waiters are guarded: a grant that dies in a
//! cancelled waiter's channel returns its connection or capacity slot to
//! the pool instead of leaking it.

use std::collections::VecDeque;
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::conn::Conn;
use crate::deadline::{CancelHandle, TimeConstraint, constrained};
use crate::error::{Error, Result};
use crate::oid_map::OidMap;
use crate::opts::{Opts, PoolOptions};
use crate::protocol::types::TransactionStatus;

struct PoolEntry {
    conn: Conn,
    created_at: Instant,
    last_used_at: Instant,
}

/// An idle connection granted to a waiter. If the waiter is gone by the
/// time the grant lands, drop reclaims the connection for the pool.
struct GrantedEntry {
    pool: Pool,
    entry: Option<PoolEntry>,
}

impl GrantedEntry {
    fn into_entry(mut self) -> Option<PoolEntry> {
        self.entry.take()
    }
}

impl Drop for GrantedEntry {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.take() {
            self.pool.reclaim(entry);
        }
    }
}

/// A reserved capacity slot. Dropped without being defused (connect
/// failed or the owner was cancelled), it returns the slot to the pool.
struct GrantedSlot {
    pool: Pool,
    armed: bool,
}

impl GrantedSlot {
    fn defuse(mut self) {
        self.armed = false;
    }
}

impl Drop for GrantedSlot {
    fn drop(&mut self) {
        if self.armed {
            self.pool.forfeit_slot();
        }
    }
}

/// What a released slot hands to the oldest waiter.
enum Grant {
    /// An idle connection, validated again on receipt
    Entry(GrantedEntry),
    /// The right to construct a replacement connection
    Capacity(GrantedSlot),
}

struct PoolState {
    idle: VecDeque<PoolEntry>,
    /// Connections idle, checked out, or being established
    total: usize,
    waiters: VecDeque<oneshot::Sender<Grant>>,
}

struct PoolInner {
    opts: Opts,
    oid_map: OidMap,
    state: Mutex<PoolState>,
}

/// Connection pool and connection source in one.
///
/// Cheaply cloneable; all clones share the same state.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

enum AcquirePlan {
    Reuse(PoolEntry),
    Connect(GrantedSlot),
    Wait(oneshot::Receiver<Grant>),
}

impl Pool {
    /// Create a pool over the given options with no user types.
    pub fn new(opts: Opts) -> Self {
        Self::with_types(opts, OidMap::new())
    }

    /// Create a pool whose connections resolve the given OID map.
    pub fn with_types(opts: Opts, oid_map: OidMap) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                opts,
                oid_map,
                state: Mutex::new(PoolState {
                    idle: VecDeque::new(),
                    total: 0,
                    waiters: VecDeque::new(),
                }),
            }),
        }
    }

    /// The options this pool connects with.
    pub fn opts(&self) -> &Opts {
        &self.inner.opts
    }

    /// Idle and total connection counts, for observability.
    pub fn sizes(&self) -> (usize, usize) {
        let state = self.lock();
        (state.idle.len(), state.total)
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        match self.inner.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Acquire a connection within the time constraint.
    ///
    /// A waiter whose deadline fires leaves the queue with
    /// [`Error::TimedOut`]; a full queue answers
    /// [`Error::PoolQueueOverflow`] immediately.
    pub async fn acquire(&self, t: TimeConstraint) -> Result<PooledConn> {
        let deadline = t.deadline();
        let cancel = CancelHandle::new();
        constrained(deadline, &cancel, self.acquire_inner()).await
    }

    async fn acquire_inner(&self) -> Result<PooledConn> {
        loop {
            match self.plan_acquire()? {
                AcquirePlan::Reuse(entry) => return Ok(self.hand_out(entry)),
                AcquirePlan::Connect(slot) => return self.connect(slot).await,
                AcquirePlan::Wait(rx) => match rx.await {
                    Ok(Grant::Entry(granted)) => {
                        let Some(entry) = granted.into_entry() else {
                            continue;
                        };
                        if !Self::is_stale(&self.inner.opts.pool, &entry) {
                            return Ok(self.hand_out(entry));
                        }
                        // stale grant: destroy it, its slot in the total
                        // transfers to the replacement we build
                        tracing::debug!("evicting stale granted connection");
                        tokio::spawn(async move {
                            let _ = entry.conn.close().await;
                        });
                        let slot = GrantedSlot {
                            pool: self.clone(),
                            armed: true,
                        };
                        return self.connect(slot).await;
                    }
                    Ok(Grant::Capacity(slot)) => return self.connect(slot).await,
                    // releaser vanished; start over
                    Err(_) => continue,
                },
            }
        }
    }

    /// Decide how to satisfy an acquire, under the lock.
    fn plan_acquire(&self) -> Result<AcquirePlan> {
        let pool_opts = &self.inner.opts.pool;
        let mut state = self.lock();

        // oldest idle connection first, discarding stale ones
        while let Some(entry) = state.idle.pop_front() {
            if Self::is_stale(pool_opts, &entry) {
                Self::evict(entry, &mut state);
                continue;
            }
            return Ok(AcquirePlan::Reuse(entry));
        }

        if state.total < pool_opts.capacity {
            state.total += 1;
            return Ok(AcquirePlan::Connect(GrantedSlot {
                pool: self.clone(),
                armed: true,
            }));
        }

        state.waiters.retain(|w| !w.is_closed());
        if state.waiters.len() < pool_opts.queue_capacity {
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            return Ok(AcquirePlan::Wait(rx));
        }

        Err(Error::PoolQueueOverflow)
    }

    fn is_stale(pool_opts: &PoolOptions, entry: &PoolEntry) -> bool {
        let now = Instant::now();
        entry.conn.is_broken()
            || entry.conn.transaction_status() != TransactionStatus::Idle
            || now.duration_since(entry.created_at) > pool_opts.max_lifetime
            || now.duration_since(entry.last_used_at) > pool_opts.idle_timeout
    }

    /// Drop a stale idle entry, giving up its slot. Caller holds the lock.
    fn evict(entry: PoolEntry, state: &mut PoolState) {
        state.total -= 1;
        tracing::debug!("evicting stale pooled connection");
        tokio::spawn(async move {
            let _ = entry.conn.close().await;
        });
    }

    /// Build a new connection against a reserved slot.
    async fn connect(&self, slot: GrantedSlot) -> Result<PooledConn> {
        match Conn::establish(&self.inner.opts, self.inner.oid_map.clone()).await {
            Ok(conn) => {
                // the slot's count now belongs to the live connection
                slot.defuse();
                Ok(PooledConn {
                    pool: self.clone(),
                    conn: ManuallyDrop::new(conn),
                    created_at: Instant::now(),
                })
            }
            Err(e) => {
                drop(slot);
                Err(e)
            }
        }
    }

    fn hand_out(&self, entry: PoolEntry) -> PooledConn {
        PooledConn {
            pool: self.clone(),
            conn: ManuallyDrop::new(entry.conn),
            created_at: entry.created_at,
        }
    }

    /// Return a reserved-but-unbuilt slot and wake the next waiter.
    fn forfeit_slot(&self) {
        let mut state = self.lock();
        state.total -= 1;
        self.wake_with_capacity(&mut state);
    }

    fn wake_with_capacity(&self, state: &mut PoolState) {
        while let Some(waiter) = state.waiters.pop_front() {
            state.total += 1;
            let grant = Grant::Capacity(GrantedSlot {
                pool: self.clone(),
                armed: true,
            });
            match waiter.send(grant) {
                Ok(()) => return,
                Err(Grant::Capacity(mut slot)) => {
                    // disarm by hand: forfeiting here would re-lock
                    slot.armed = false;
                    state.total -= 1;
                }
                Err(Grant::Entry(_)) => {}
            }
        }
    }

    /// Put an idle connection back: oldest waiter first, else idle queue.
    fn offer(&self, state: &mut PoolState, mut entry: PoolEntry) {
        while let Some(waiter) = state.waiters.pop_front() {
            let grant = Grant::Entry(GrantedEntry {
                pool: self.clone(),
                entry: Some(entry),
            });
            match waiter.send(grant) {
                Ok(()) => return,
                Err(Grant::Entry(mut granted)) => {
                    let Some(back) = granted.entry.take() else {
                        return;
                    };
                    entry = back;
                }
                Err(Grant::Capacity(_)) => return,
            }
        }
        state.idle.push_back(entry);
    }

    /// A grant whose waiter disappeared: put the connection back.
    fn reclaim(&self, entry: PoolEntry) {
        let mut state = self.lock();
        self.offer(&mut state, entry);
    }

    /// Release a checked-out connection. Broken connections and
    /// connections with an open transaction are destroyed; healthy ones
    /// go to the oldest waiter or back to the idle queue.
    fn release(&self, conn: Conn, created_at: Instant) {
        let healthy =
            !conn.is_broken() && conn.transaction_status() == TransactionStatus::Idle;

        let mut state = self.lock();

        if !healthy {
            state.total -= 1;
            self.wake_with_capacity(&mut state);
            drop(state);
            tracing::debug!("destroying released connection");
            tokio::spawn(async move {
                let _ = conn.close().await;
            });
            return;
        }

        let entry = PoolEntry {
            conn,
            created_at,
            last_used_at: Instant::now(),
        };
        self.offer(&mut state, entry);
    }
}

/// Exclusive checkout of a pooled connection.
///
/// Dereferences to [`Conn`]. On drop the connection is released to its
/// pool; whether it re-enters the idle set is decided by its health and
/// transaction status at that moment.
pub struct PooledConn {
    pool: Pool,
    conn: ManuallyDrop<Conn>,
    created_at: Instant,
}

impl Deref for PooledConn {
    type Target = Conn;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl std::fmt::Debug for PooledConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConn").finish_non_exhaustive()
    }
}

impl DerefMut for PooledConn {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

impl Drop for PooledConn {
    fn drop(&mut self) {
        // SAFETY: conn is never accessed after this
        let conn = unsafe { ManuallyDrop::take(&mut self.conn) };
        self.pool.release(conn, self.created_at);
    }
}

/// Anything that can produce an established, exclusively-owned
/// connection: a pool, or a role dispatcher resolving to one.
pub trait ConnectionProvider: Clone + Send + Sync {
    /// Hand out a connection within the time constraint.
    fn get_connection(
        &self,
        t: TimeConstraint,
    ) -> impl std::future::Future<Output = Result<PooledConn>> + Send;

    /// The OID map prototype this provider's connections resolve.
    fn oid_map(&self) -> &OidMap;
}

impl ConnectionProvider for Pool {
    fn get_connection(
        &self,
        t: TimeConstraint,
    ) -> impl std::future::Future<Output = Result<PooledConn>> + Send {
        self.acquire(t)
    }

    fn oid_map(&self) -> &OidMap {
        &self.inner.oid_map
    }
}
