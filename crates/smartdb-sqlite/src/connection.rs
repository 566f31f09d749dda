//! SQLite connection, result set and driver.

use crate::ffi;
use crate::types;
use smartdb_core::{log_error, Connection, DbResult, Driver, Error, ErrorKind, ResultSet, Value};
use std::ffi::{c_int, CStr, CString};
use std::ptr;

const DEFAULT_BUSY_TIMEOUT_MS: c_int = 5000;

/// A connection to one SQLite database file (or `":memory:"`).
///
/// Created Closed; [`open`](Connection::open) attaches the native handle.
#[derive(Debug)]
pub struct SqliteConnection {
    db: *mut ffi::sqlite3,
    path: String,
}

// SAFETY: the handle is exclusively owned; connections move between threads
// (pool and acquirers) but are only ever used by one thread at a time.
unsafe impl Send for SqliteConnection {}

impl SqliteConnection {
    /// Create a Closed connection for the given path.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            db: ptr::null_mut(),
            path: path.into(),
        }
    }

    /// Create a Closed connection for an in-memory database.
    pub fn memory() -> Self {
        Self::new(":memory:")
    }

    /// The configured database path.
    pub fn path(&self) -> &str {
        &self.path
    }

    fn last_message(&self) -> String {
        if self.db.is_null() {
            return "out of memory".to_string();
        }
        // SAFETY: db is a valid handle; errmsg returns a valid C string.
        unsafe {
            CStr::from_ptr(ffi::sqlite3_errmsg(self.db))
                .to_string_lossy()
                .into_owned()
        }
    }

    fn error_code(&self) -> i32 {
        if self.db.is_null() {
            return 0;
        }
        // SAFETY: db is a valid handle.
        unsafe { ffi::sqlite3_extended_errcode(self.db) }
    }

    fn require_open(&self) -> DbResult<()> {
        if self.db.is_null() {
            return Err(Error::connection("Connection is not open"));
        }
        Ok(())
    }

    fn prepare(&self, sql: &str, kind: ErrorKind) -> DbResult<*mut ffi::sqlite3_stmt> {
        let c_sql = CString::new(sql)
            .map_err(|_| Error::new(kind, "SQL contains an interior null byte"))?;
        let mut stmt: *mut ffi::sqlite3_stmt = ptr::null_mut();

        // SAFETY: db is valid (checked by callers), pointers are valid.
        let rc = unsafe {
            ffi::sqlite3_prepare_v2(self.db, c_sql.as_ptr(), -1, &mut stmt, ptr::null_mut())
        };
        if rc != ffi::SQLITE_OK {
            let err = Error::new(kind, self.last_message()).with_code(self.error_code());
            log_error!("SQLite prepare failed: {} | SQL: {}", err.message(), sql);
            return Err(err);
        }
        Ok(stmt)
    }

    fn bind_params(
        &self,
        stmt: *mut ffi::sqlite3_stmt,
        params: &[Value],
    ) -> DbResult<()> {
        // SAFETY: stmt is a valid statement handle.
        let expected = unsafe { ffi::sqlite3_bind_parameter_count(stmt) } as usize;
        if expected != params.len() {
            return Err(Error::invalid_argument(format!(
                "parameter count mismatch: statement expects {}, got {}",
                expected,
                params.len()
            )));
        }

        for (i, param) in params.iter().enumerate() {
            // SAFETY: stmt is valid; parameter indexes are 1-based.
            let rc = unsafe { types::bind_value(stmt, (i + 1) as c_int, param) };
            if rc != ffi::SQLITE_OK {
                return Err(Error::invalid_argument(format!(
                    "Failed to bind parameter {}: {}",
                    i + 1,
                    self.last_message()
                ))
                .with_code(rc));
            }
        }
        Ok(())
    }

    fn execute_inner(&mut self, sql: &str, params: &[Value], kind: ErrorKind) -> DbResult<u64> {
        self.require_open()?;
        let stmt = self.prepare(sql, kind)?;

        if let Err(err) = self.bind_params(stmt, params) {
            // The prepared statement is discarded; nothing has executed.
            // SAFETY: stmt is valid.
            unsafe { ffi::sqlite3_finalize(stmt) };
            return Err(err);
        }

        // SAFETY: stmt is valid.
        let rc = unsafe { ffi::sqlite3_step(stmt) };
        // SAFETY: stmt is valid; finalize also releases row resources.
        unsafe { ffi::sqlite3_finalize(stmt) };

        match rc {
            ffi::SQLITE_DONE | ffi::SQLITE_ROW => {
                // SAFETY: db is valid.
                let changes = unsafe { ffi::sqlite3_changes(self.db) };
                Ok(changes.max(0) as u64)
            }
            _ => {
                let err = Error::new(kind, self.last_message()).with_code(self.error_code());
                log_error!("SQLite execute failed: {} | SQL: {}", err.message(), sql);
                Err(err)
            }
        }
    }

    fn run_transaction_statement(&mut self, sql: &str) -> DbResult<()> {
        self.execute_inner(sql, &[], ErrorKind::Transaction)?;
        Ok(())
    }
}

impl Connection for SqliteConnection {
    fn open(&mut self) -> DbResult<()> {
        if !self.db.is_null() {
            return Ok(());
        }

        let c_path = CString::new(self.path.as_str())
            .map_err(|_| Error::configuration("Database path contains an interior null byte"))?;

        let mut db: *mut ffi::sqlite3 = ptr::null_mut();
        let flags = ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE;
        // SAFETY: pointers are valid; the return code is checked below.
        let rc = unsafe { ffi::sqlite3_open_v2(c_path.as_ptr(), &mut db, flags, ptr::null()) };

        if rc != ffi::SQLITE_OK {
            let message = if db.is_null() {
                ffi::error_string(rc)
            } else {
                // SAFETY: db holds a valid (failed) handle that must be
                // released after reading its error message.
                unsafe {
                    let msg = CStr::from_ptr(ffi::sqlite3_errmsg(db))
                        .to_string_lossy()
                        .into_owned();
                    ffi::sqlite3_close(db);
                    msg
                }
            };
            let kind = match rc {
                ffi::SQLITE_AUTH | ffi::SQLITE_PERM => ErrorKind::Authentication,
                _ => ErrorKind::Connection,
            };
            return Err(Error::new(kind, format!("Failed to open database: {}", message))
                .with_code(rc));
        }

        // SAFETY: db is valid from here on.
        unsafe { ffi::sqlite3_busy_timeout(db, DEFAULT_BUSY_TIMEOUT_MS) };
        self.db = db;
        Ok(())
    }

    fn close(&mut self) {
        if !self.db.is_null() {
            // SAFETY: db is a valid handle, closed exactly once.
            unsafe { ffi::sqlite3_close(self.db) };
            self.db = ptr::null_mut();
        }
    }

    fn is_open(&self) -> bool {
        !self.db.is_null()
    }

    fn query(&mut self, sql: &str) -> DbResult<Box<dyn ResultSet + '_>> {
        self.require_open()?;
        let stmt = self.prepare(sql, ErrorKind::Query)?;
        Ok(Box::new(SqliteResultSet::new(stmt)))
    }

    fn execute(&mut self, sql: &str) -> DbResult<u64> {
        self.execute_inner(sql, &[], ErrorKind::Execution)
    }

    fn execute_params(&mut self, sql: &str, params: &[Value]) -> DbResult<u64> {
        self.execute_inner(sql, params, ErrorKind::Execution)
    }

    fn begin(&mut self) -> DbResult<()> {
        self.run_transaction_statement("BEGIN")
    }

    fn commit(&mut self) -> DbResult<()> {
        self.run_transaction_statement("COMMIT")
    }

    fn rollback(&mut self) -> DbResult<()> {
        self.run_transaction_statement("ROLLBACK")
    }
}

impl Drop for SqliteConnection {
    fn drop(&mut self) {
        self.close();
    }
}

/// Forward-only cursor over a prepared SELECT.
///
/// Owns the statement handle and finalizes it on drop. Column names are
/// captured at construction and stable for the cursor's lifetime.
pub struct SqliteResultSet {
    stmt: *mut ffi::sqlite3_stmt,
    has_row: bool,
    cols: Vec<String>,
}

impl SqliteResultSet {
    fn new(stmt: *mut ffi::sqlite3_stmt) -> Self {
        // SAFETY: stmt is a valid, freshly prepared statement.
        let count = unsafe { ffi::sqlite3_column_count(stmt) };
        let mut cols = Vec::with_capacity(count.max(0) as usize);
        for i in 0..count {
            // SAFETY: i is a valid column index.
            let name = unsafe { types::column_name(stmt, i) }.unwrap_or_else(|| format!("col{}", i));
            cols.push(name);
        }
        Self {
            stmt,
            has_row: false,
            cols,
        }
    }
}

impl ResultSet for SqliteResultSet {
    fn next(&mut self) -> bool {
        // SAFETY: stmt is valid until drop.
        let rc = unsafe { ffi::sqlite3_step(self.stmt) };
        self.has_row = rc == ffi::SQLITE_ROW;
        self.has_row
    }

    fn get(&self, index: usize) -> Value {
        if !self.has_row || index >= self.cols.len() {
            return Value::Null;
        }
        // SAFETY: a row is current and the index is in range.
        unsafe { types::read_column(self.stmt, index as c_int) }
    }

    fn get_named(&self, name: &str) -> Value {
        match self.cols.iter().position(|c| c == name) {
            Some(i) => self.get(i),
            None => Value::Null,
        }
    }

    fn column_names(&self) -> &[String] {
        &self.cols
    }
}

impl Drop for SqliteResultSet {
    fn drop(&mut self) {
        if !self.stmt.is_null() {
            // SAFETY: stmt is finalized exactly once.
            unsafe { ffi::sqlite3_finalize(self.stmt) };
            self.stmt = ptr::null_mut();
        }
    }
}

/// Driver registering as `"sqlite"`.
///
/// Recognized configuration: `"path"` (string, default `":memory:"`). Other
/// fields are ignored.
#[derive(Debug, Default)]
pub struct SqliteDriver;

impl Driver for SqliteDriver {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn create_connection(&self, config: &serde_json::Value) -> DbResult<Box<dyn Connection>> {
        let path = config
            .get("path")
            .and_then(|v| v.as_str())
            .unwrap_or(":memory:");
        Ok(Box::new(SqliteConnection::new(path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smartdb_core::{query_all, query_one, TransactionGuard};

    fn open_memory() -> SqliteConnection {
        let mut conn = SqliteConnection::memory();
        conn.open().unwrap();
        conn
    }

    #[test]
    fn test_open_close_idempotent() {
        let mut conn = SqliteConnection::memory();
        assert!(!conn.is_open());

        conn.open().unwrap();
        conn.open().unwrap();
        assert!(conn.is_open());

        conn.close();
        conn.close();
        assert!(!conn.is_open());
    }

    #[test]
    fn test_closed_connection_fails_with_connection_kind() {
        let mut conn = SqliteConnection::memory();

        let err = conn.execute("SELECT 1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);

        let err = conn.query("SELECT 1").map(|_| ()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
    }

    #[test]
    fn test_execute_and_query() {
        let mut conn = open_memory();
        conn.execute("CREATE TABLE demo (id INTEGER, name TEXT)")
            .unwrap();
        let affected = conn
            .execute("INSERT INTO demo VALUES (1, 'alpha'), (2, 'beta')")
            .unwrap();
        assert_eq!(affected, 2);

        let mut rs = conn.query("SELECT id, name FROM demo ORDER BY id").unwrap();
        assert_eq!(rs.column_names(), &["id".to_string(), "name".to_string()]);

        assert!(rs.next());
        assert_eq!(rs.get(0), Value::BigInt(1));
        assert_eq!(rs.get_named("name"), Value::Text("alpha".into()));
        assert!(rs.next());
        assert_eq!(rs.get_named("id"), Value::BigInt(2));
        assert!(!rs.next());
        assert_eq!(rs.get(0), Value::Null);
    }

    #[test]
    fn test_cursor_edge_reads_yield_null() {
        let mut conn = open_memory();
        conn.execute("CREATE TABLE t (a INTEGER)").unwrap();
        conn.execute("INSERT INTO t VALUES (7)").unwrap();

        let mut rs = conn.query("SELECT a FROM t").unwrap();
        // Before the first next there is no current row.
        assert_eq!(rs.get(0), Value::Null);
        assert!(rs.next());
        assert_eq!(rs.get(5), Value::Null);
        assert_eq!(rs.get_named("missing"), Value::Null);
    }

    #[test]
    fn test_param_round_trip_all_types() {
        let mut conn = open_memory();
        conn.execute(
            "CREATE TABLE vals (i INTEGER, b BIGINT, d DOUBLE, f INTEGER, t TEXT, y BLOB, n TEXT)",
        )
        .unwrap();

        let params = vec![
            Value::Int(-42),
            Value::BigInt(i64::MAX),
            Value::Double(std::f64::consts::PI),
            Value::Bool(true),
            Value::Text("smartdb".into()),
            Value::Bytes(vec![0x53, 0x44, 0x42]),
            Value::Null,
        ];
        let affected = conn
            .execute_params("INSERT INTO vals VALUES (?, ?, ?, ?, ?, ?, ?)", &params)
            .unwrap();
        assert_eq!(affected, 1);

        let row = query_one(&mut conn, "SELECT i, b, d, f, t, y, n FROM vals").unwrap();
        assert_eq!(row[0], Value::BigInt(-42));
        assert_eq!(row[1], Value::BigInt(i64::MAX));
        assert_eq!(row[2], Value::Double(std::f64::consts::PI));
        assert_eq!(row[3], Value::BigInt(1));
        assert_eq!(row[4], Value::Text("smartdb".into()));
        assert_eq!(row[5], Value::Bytes(vec![0x53, 0x44, 0x42]));
        assert_eq!(row[6], Value::Null);
    }

    #[test]
    fn test_empty_blob_round_trips() {
        let mut conn = open_memory();
        conn.execute("CREATE TABLE b (payload BLOB)").unwrap();
        conn.execute_params("INSERT INTO b VALUES (?)", &[Value::Bytes(vec![])])
            .unwrap();

        let row = query_one(&mut conn, "SELECT payload FROM b").unwrap();
        assert_eq!(row[0], Value::Bytes(vec![]));
    }

    #[test]
    fn test_param_count_mismatch() {
        let mut conn = open_memory();
        conn.execute("CREATE TABLE t (a INTEGER, b INTEGER)").unwrap();

        let err = conn
            .execute_params("INSERT INTO t VALUES (?, ?)", &[Value::Int(1)])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(err.message().contains("parameter count mismatch"));

        // Nothing executed.
        let rows = query_all(&mut conn, "SELECT * FROM t").unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_query_error_kind() {
        let mut conn = open_memory();
        let err = conn.query("SELECT * FROM missing_table").map(|_| ()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Query);
        assert!(!err.message().is_empty());
    }

    #[test]
    fn test_execution_error_kind() {
        let mut conn = open_memory();
        conn.execute("CREATE TABLE u (id INTEGER PRIMARY KEY)").unwrap();
        conn.execute("INSERT INTO u VALUES (1)").unwrap();

        let err = conn.execute("INSERT INTO u VALUES (1)").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Execution);
        assert_ne!(err.code(), 0);
    }

    #[test]
    fn test_transaction_guard_rolls_back() {
        let mut conn = open_memory();
        conn.execute("CREATE TABLE t (a INTEGER)").unwrap();

        {
            let mut guard = TransactionGuard::begin(&mut conn).unwrap();
            guard
                .connection()
                .execute("INSERT INTO t VALUES (1)")
                .unwrap();
        }
        let rows = query_all(&mut conn, "SELECT a FROM t").unwrap();
        assert!(rows.is_empty());

        {
            let mut guard = TransactionGuard::begin(&mut conn).unwrap();
            guard
                .connection()
                .execute("INSERT INTO t VALUES (2)")
                .unwrap();
            guard.commit().unwrap();
        }
        let rows = query_all(&mut conn, "SELECT a FROM t").unwrap();
        assert_eq!(rows, vec![vec![Value::BigInt(2)]]);
    }

    #[test]
    fn test_driver_creates_closed_connection() {
        let driver = SqliteDriver;
        assert_eq!(driver.name(), "sqlite");

        let config = serde_json::json!({"path": ":memory:", "unknown_field": 1});
        let mut conn = driver.create_connection(&config).unwrap();
        assert!(!conn.is_open());
        conn.open().unwrap();
        assert!(conn.is_open());
    }

    #[test]
    fn test_driver_defaults_to_memory() {
        let driver = SqliteDriver;
        let conn = driver.create_connection(&serde_json::json!({})).unwrap();
        assert!(!conn.is_open());
    }
}
