//! MySQL driver for SmartDB.
//!
//! A synchronous client for the MySQL wire protocol over `TcpStream`:
//! handshake and authentication (`mysql_native_password` and the
//! `caching_sha2_password` fast path), COM_QUERY text protocol, and
//! text-to-value decoding. Parameterized statements count `?` placeholders
//! up front and interpolate escaped literals.
//!
//! Integration tests against a live server are gated on the
//! `SMARTDB_MYSQL_TEST_ENABLE` environment variable; see
//! `tests/mysql_integration.rs`.

pub mod auth;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod types;

pub use config::MySqlConfig;
pub use connection::{MySqlConnection, MySqlDriver, MySqlResultSet};
