//! SQLite driver for SmartDB.
//!
//! FFI bindings require unsafe code; this is expected for database drivers.
//!
//! The driver talks to libsqlite3 through hand-written bindings and
//! implements the `Connection`/`ResultSet`/`Driver` capabilities from
//! `smartdb-core`. Connections are created Closed from a configuration
//! object whose only recognized field is `"path"` (`":memory:"` by default).

pub mod connection;
pub mod ffi;
pub mod types;

pub use connection::{SqliteConnection, SqliteDriver, SqliteResultSet};

/// The linked SQLite library version.
pub fn sqlite_version() -> String {
    ffi::version()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_version() {
        let version = sqlite_version();
        assert!(
            version.starts_with('3'),
            "Expected SQLite 3.x, got {}",
            version
        );
    }
}
