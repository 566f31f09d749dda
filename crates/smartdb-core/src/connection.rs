//! Capability traits for result sets, connections and drivers.
//!
//! These are operation sets, not a class hierarchy: each driver supplies its
//! own concrete `Connection` and `ResultSet` siblings. The manager and pool
//! only ever see the trait objects.

use crate::error::DbResult;
use crate::value::Value;

/// A forward-only cursor over query results.
///
/// Column names are fixed at construction and stable for the lifetime of the
/// cursor. There is no current row until the first [`next`](ResultSet::next)
/// returns true; reads without a current row, with an out-of-range index or
/// with an unknown column name yield [`Value::Null`].
pub trait ResultSet {
    /// Advance the cursor. Returns true iff a row is now current.
    fn next(&mut self) -> bool;

    /// Get the current row's value at a column index.
    fn get(&self, index: usize) -> Value;

    /// Get the current row's value by column name (case-sensitive).
    fn get_named(&self, name: &str) -> Value;

    /// Ordered column names.
    fn column_names(&self) -> &[String];
}

/// A database connection.
///
/// Connections move between Closed and Open; `open` and `close` are both
/// idempotent. Query and execute are valid only while Open and fail with a
/// Connection-kind error otherwise. A connection is exclusively owned by one
/// holder at a time and is not itself thread-safe.
pub trait Connection: Send + std::fmt::Debug {
    /// Transition to Open. Calling on an already-open connection is a no-op.
    fn open(&mut self) -> DbResult<()>;

    /// Transition to Closed, releasing the native handle. Idempotent.
    fn close(&mut self);

    /// Pure state query.
    fn is_open(&self) -> bool;

    /// Run a SELECT-style statement; the cursor starts before the first row.
    fn query(&mut self, sql: &str) -> DbResult<Box<dyn ResultSet + '_>>;

    /// Run a mutating statement; returns the affected row count.
    fn execute(&mut self, sql: &str) -> DbResult<u64>;

    /// Run a mutating statement with `?` placeholders bound to `params`.
    ///
    /// The parameter count must equal the placeholder count the backend
    /// reports after preparing; a mismatch fails with InvalidArgument and a
    /// message containing "parameter count mismatch", without executing.
    fn execute_params(&mut self, sql: &str, params: &[Value]) -> DbResult<u64>;

    /// Begin a transaction.
    fn begin(&mut self) -> DbResult<()>;

    /// Commit the current transaction.
    fn commit(&mut self) -> DbResult<()>;

    /// Roll back the current transaction.
    fn rollback(&mut self) -> DbResult<()>;
}

/// A factory that materializes connections from a configuration object.
///
/// The returned connection is Closed; the acquirer (pool or user) calls
/// `open`. Unsupported configuration fields are ignored; missing required
/// fields are reported by `open` with kind=Configuration.
pub trait Driver: Send + Sync {
    /// The registry name of this driver, e.g. `"sqlite"`.
    fn name(&self) -> &str;

    /// Build a Closed connection from a JSON configuration object.
    fn create_connection(&self, config: &serde_json::Value) -> DbResult<Box<dyn Connection>>;
}
