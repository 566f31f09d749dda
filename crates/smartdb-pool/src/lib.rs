//! Bounded, reusable connection pooling.
//!
//! A [`ConnectionPool`] owns up to `max_size` connections produced by a
//! caller-supplied factory and hands them out as [`PooledConnection`]
//! handles. Dropping a handle returns the connection to the pool; dropping
//! it after shutdown closes the connection instead, so an in-flight
//! connection never leaks.
//!
//! All shared state lives under a single mutex with one condition variable.
//! The lock is released before any factory, `open` or connection call, and a
//! factory must never call back into the same pool's `acquire`.

use smartdb_core::{Connection, DbResult, Error, ErrorKind};
use std::ops::{Deref, DerefMut};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Factory that produces Closed connections for the pool.
pub type ConnectionFactory = Box<dyn Fn() -> DbResult<Box<dyn Connection>> + Send + Sync>;

/// Pool sizing and health-check knobs.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Connections pre-created at construction (one-shot warm-up).
    pub min_size: usize,
    /// Hard ceiling on owned connections. Must be at least 1.
    pub max_size: usize,
    /// How long `acquire` may wait when the pool is exhausted. Zero means
    /// fail immediately.
    pub wait_timeout: Duration,
    /// Ensure a connection is open before handing it out.
    pub test_on_borrow: bool,
    /// Drop connections that come back closed instead of pooling them.
    pub test_on_return: bool,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            min_size: 0,
            max_size: 16,
            wait_timeout: Duration::from_millis(5000),
            test_on_borrow: true,
            test_on_return: false,
        }
    }
}

impl PoolOptions {
    /// Clamp `min_size` down to `max_size`.
    pub fn normalized(mut self) -> Self {
        if self.min_size > self.max_size {
            self.min_size = self.max_size;
        }
        self
    }
}

/// Monotone counters kept under the pool lock.
#[derive(Debug, Clone, Default)]
struct MetricCounters {
    acquire_attempts: u64,
    acquire_successes: u64,
    acquire_failures: u64,
    acquire_timeouts: u64,
    wait_events: u64,
    factory_failures: u64,
    total_acquire_wait_micros: u64,
    peak_in_use: usize,
}

/// Point-in-time snapshot of pool metrics.
#[derive(Debug, Clone, Default)]
pub struct PoolMetrics {
    pub acquire_attempts: u64,
    pub acquire_successes: u64,
    pub acquire_failures: u64,
    pub acquire_timeouts: u64,
    pub wait_events: u64,
    pub factory_failures: u64,
    pub total_acquire_wait_micros: u64,
    /// `total_acquire_wait_micros` divided by completed acquires, 0 when
    /// nothing has completed.
    pub average_acquire_wait_micros: u64,
    /// Highest number of simultaneously checked-out connections observed.
    pub peak_in_use: usize,
}

struct PoolState {
    /// Idle connections, reused newest-first.
    idle: Vec<Box<dyn Connection>>,
    /// Owned connections: idle plus checked out. Never exceeds `max_size`.
    total: usize,
    closed: bool,
    last_error: String,
    metrics: MetricCounters,
}

/// A bounded store of reusable connections.
pub struct ConnectionPool {
    factory: ConnectionFactory,
    options: PoolOptions,
    state: Mutex<PoolState>,
    available: Condvar,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl ConnectionPool {
    /// Build a pool with default options.
    pub fn new(factory: ConnectionFactory) -> DbResult<Arc<Self>> {
        Self::with_factory(factory, PoolOptions::default())
    }

    /// Build a pool, validate and normalize its options, and run the
    /// best-effort warm-up. Warm-up failures are skipped and never retried.
    pub fn with_factory(factory: ConnectionFactory, options: PoolOptions) -> DbResult<Arc<Self>> {
        if options.max_size == 0 {
            return Err(Error::invalid_argument(
                "ConnectionPool maxSize must be greater than 0",
            ));
        }
        let options = options.normalized();

        let pool = Self {
            factory,
            options,
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                total: 0,
                closed: false,
                last_error: String::new(),
                metrics: MetricCounters::default(),
            }),
            available: Condvar::new(),
        };

        for _ in 0..pool.options.min_size {
            let mut conn = match pool.create_connection() {
                Ok(conn) => conn,
                Err(err) => {
                    pool.set_last_error(err.message());
                    continue;
                }
            };
            if pool.options.test_on_borrow {
                if let Err(err) = ensure_open(conn.as_mut()) {
                    pool.set_last_error(err.message());
                    conn.close();
                    continue;
                }
            }
            let mut state = pool.lock_state();
            state.idle.push(conn);
            state.total += 1;
        }

        Ok(Arc::new(pool))
    }

    /// Check a connection out of the pool, blocking up to `wait_timeout`
    /// when the pool is exhausted.
    pub fn acquire(self: &Arc<Self>) -> DbResult<PooledConnection> {
        let start = Instant::now();
        let mut state = self.lock_state();
        state.metrics.acquire_attempts += 1;

        if state.closed {
            let err = Error::connection("Connection pool is closed").retryable(true);
            return Err(Self::fail(&mut state, start, err, false));
        }

        let deadline = start + self.options.wait_timeout;

        loop {
            // Idle path: newest-first for cache warmth.
            if let Some(mut conn) = state.idle.pop() {
                drop(state);
                if self.options.test_on_borrow {
                    if let Err(open_err) = ensure_open(conn.as_mut()) {
                        conn.close();
                        state = self.lock_state();
                        state.total = state.total.saturating_sub(1);
                        self.available.notify_one();
                        if self.may_keep_waiting(deadline) {
                            continue;
                        }
                        let err = open_err.into_kind(ErrorKind::Connection).retryable(true);
                        return Err(Self::fail(&mut state, start, err, false));
                    }
                }
                state = self.lock_state();
                Self::record_success(&mut state, start);
                drop(state);
                return Ok(self.wrap(conn));
            }

            // Grow path: reserve a slot before leaving the lock.
            if state.total < self.options.max_size {
                state.total += 1;
                drop(state);
                match self.create_connection() {
                    Ok(mut conn) => {
                        if self.options.test_on_borrow {
                            if let Err(open_err) = ensure_open(conn.as_mut()) {
                                conn.close();
                                state = self.lock_state();
                                state.total = state.total.saturating_sub(1);
                                self.available.notify_one();
                                if self.may_keep_waiting(deadline) {
                                    continue;
                                }
                                let err =
                                    open_err.into_kind(ErrorKind::Connection).retryable(true);
                                return Err(Self::fail(&mut state, start, err, false));
                            }
                        }
                        state = self.lock_state();
                        Self::record_success(&mut state, start);
                        drop(state);
                        return Ok(self.wrap(conn));
                    }
                    Err(factory_err) => {
                        state = self.lock_state();
                        state.total = state.total.saturating_sub(1);
                        state.metrics.factory_failures += 1;
                        self.available.notify_one();
                        let kind = match factory_err.kind() {
                            ErrorKind::Unknown => ErrorKind::Internal,
                            kind => kind,
                        };
                        let err = factory_err.into_kind(kind).retryable(true);
                        return Err(Self::fail(&mut state, start, err, false));
                    }
                }
            }

            // Wait path: full and nothing idle.
            if self.options.wait_timeout.is_zero() {
                let err = Error::connection("Connection pool exhausted").retryable(true);
                return Err(Self::fail(&mut state, start, err, false));
            }

            let now = Instant::now();
            if now >= deadline {
                let err = Error::timeout("Connection pool acquire timed out");
                return Err(Self::fail(&mut state, start, err, true));
            }

            state.metrics.wait_events += 1;
            let (guard, wait) = self
                .available
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            state = guard;

            if wait.timed_out() {
                let err = Error::timeout("Connection pool acquire timed out");
                return Err(Self::fail(&mut state, start, err, true));
            }
            if state.closed {
                let err = Error::connection("Connection pool is closed").retryable(true);
                return Err(Self::fail(&mut state, start, err, false));
            }
        }
    }

    /// Close the pool: idle connections are closed, waiters are woken, and
    /// later acquires fail immediately. Idempotent.
    pub fn shutdown(&self) {
        let mut to_close = {
            let mut state = self.lock_state();
            if state.closed {
                return;
            }
            state.closed = true;
            let drained = std::mem::take(&mut state.idle);
            state.total = state.total.saturating_sub(drained.len());
            drained
        };

        for conn in &mut to_close {
            conn.close();
        }
        self.available.notify_all();
    }

    /// Owned connections, idle plus checked out.
    pub fn total_size(&self) -> usize {
        self.lock_state().total
    }

    /// Connections currently idle in the pool.
    pub fn idle_size(&self) -> usize {
        self.lock_state().idle.len()
    }

    /// Connections currently checked out.
    pub fn in_use_size(&self) -> usize {
        let state = self.lock_state();
        state.total.saturating_sub(state.idle.len())
    }

    /// Message of the most recent failure.
    pub fn last_error(&self) -> String {
        self.lock_state().last_error.clone()
    }

    /// The normalized options this pool runs with.
    pub fn options(&self) -> &PoolOptions {
        &self.options
    }

    /// Snapshot the metric counters.
    pub fn metrics(&self) -> PoolMetrics {
        let state = self.lock_state();
        let m = &state.metrics;
        let completed = m.acquire_successes + m.acquire_failures;
        PoolMetrics {
            acquire_attempts: m.acquire_attempts,
            acquire_successes: m.acquire_successes,
            acquire_failures: m.acquire_failures,
            acquire_timeouts: m.acquire_timeouts,
            wait_events: m.wait_events,
            factory_failures: m.factory_failures,
            total_acquire_wait_micros: m.total_acquire_wait_micros,
            average_acquire_wait_micros: if completed == 0 {
                0
            } else {
                m.total_acquire_wait_micros / completed
            },
            peak_in_use: m.peak_in_use,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn may_keep_waiting(&self, deadline: Instant) -> bool {
        !self.options.wait_timeout.is_zero() && Instant::now() < deadline
    }

    fn wrap(self: &Arc<Self>, conn: Box<dyn Connection>) -> PooledConnection {
        PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(self),
        }
    }

    /// Invoke the factory with panic translation: a panicking factory
    /// surfaces as an Internal, retryable failure instead of unwinding
    /// through the pool.
    fn create_connection(&self) -> DbResult<Box<dyn Connection>> {
        match panic::catch_unwind(AssertUnwindSafe(|| (self.factory)())) {
            Ok(result) => result,
            Err(payload) => {
                let detail = panic_message(payload.as_ref());
                Err(Error::internal(format!("Connection factory panicked: {}", detail))
                    .retryable(true))
            }
        }
    }

    fn record_success(state: &mut PoolState, start: Instant) {
        let metrics = &mut state.metrics;
        metrics.acquire_successes += 1;
        metrics.total_acquire_wait_micros += elapsed_micros(start);
        let in_use = state.total.saturating_sub(state.idle.len());
        if in_use > metrics.peak_in_use {
            metrics.peak_in_use = in_use;
        }
    }

    fn fail(state: &mut PoolState, start: Instant, err: Error, timed_out: bool) -> Error {
        let metrics = &mut state.metrics;
        metrics.acquire_failures += 1;
        if timed_out {
            metrics.acquire_timeouts += 1;
        }
        metrics.total_acquire_wait_micros += elapsed_micros(start);
        state.last_error = err.message().to_string();
        err
    }

    fn set_last_error(&self, message: &str) {
        self.lock_state().last_error = message.to_string();
    }

    /// Return path for handles. Pools the connection unless the pool is
    /// closed or `test_on_return` finds it not open; those close it and give
    /// the slot back.
    fn release(&self, mut conn: Box<dyn Connection>) {
        let mut state = self.lock_state();
        let should_drop = state.closed || (self.options.test_on_return && !conn.is_open());
        if !should_drop {
            state.idle.push(conn);
            drop(state);
            self.available.notify_one();
            return;
        }

        drop(state);
        conn.close();
        let mut state = self.lock_state();
        state.total = state.total.saturating_sub(1);
        drop(state);
        self.available.notify_one();
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A uniquely-owning handle to a checked-out connection.
///
/// The handle keeps a strong reference to its pool, so the pool outlives
/// every outstanding handle. Dropping the handle returns the connection.
#[derive(Debug)]
pub struct PooledConnection {
    conn: Option<Box<dyn Connection>>,
    pool: Arc<ConnectionPool>,
}

impl Deref for PooledConnection {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        // Present from construction until drop.
        self.conn.as_deref().unwrap()
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_deref_mut().unwrap()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

fn ensure_open(conn: &mut dyn Connection) -> DbResult<()> {
    if conn.is_open() {
        return Ok(());
    }
    conn.open()
}

fn elapsed_micros(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
