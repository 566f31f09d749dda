//! SmartDB — a uniform access layer over heterogeneous relational databases.
//!
//! SmartDB unifies value representation, result iteration, parameter binding
//! and transaction control behind one capability contract, and multiplexes
//! physical connections across concurrent workers through a bounded pool.
//!
//! # Quick start
//!
//! ```ignore
//! use smartdb::{DatabaseManager, PoolOptions, SqliteDriver, TransactionGuard, Value};
//! use std::sync::Arc;
//!
//! let manager = DatabaseManager::new();
//! manager.register_driver(Arc::new(SqliteDriver))?;
//! manager.load_config("db_config.json")?;
//!
//! let pool = manager.create_pool("my_sqlite", PoolOptions::default())?;
//! let mut conn = pool.acquire()?;
//! conn.execute_params(
//!     "INSERT INTO users (name) VALUES (?)",
//!     &[Value::Text("alice".into())],
//! )?;
//!
//! let mut guard = TransactionGuard::begin(&mut *conn)?;
//! guard.connection().execute("UPDATE users SET active = 1")?;
//! guard.commit()?;
//! # Ok::<(), smartdb::Error>(())
//! ```
//!
//! Drivers plug in through the [`Driver`] capability; SQLite and MySQL
//! implementations ship in-tree.

pub mod manager;

pub use manager::DatabaseManager;

pub use smartdb_core::{
    query_all, query_one, Connection, DbResult, Driver, Error, ErrorCounters, ErrorKind,
    ResultSet, Row, TransactionGuard, Value,
};
pub use smartdb_core::logging;
pub use smartdb_pool::{
    ConnectionFactory, ConnectionPool, PoolMetrics, PoolOptions, PooledConnection,
};

pub use smartdb_mysql::{MySqlConfig, MySqlConnection, MySqlDriver};
pub use smartdb_sqlite::{SqliteConnection, SqliteDriver};
