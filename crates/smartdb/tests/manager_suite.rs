//! DatabaseManager behavior: config loading, connection building, pool
//! caching and error bookkeeping.

use smartdb::{
    Connection, DatabaseManager, ErrorKind, MySqlDriver, PoolOptions, SqliteDriver, Value,
};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_config_file(contents: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let path = std::env::temp_dir().join(format!("smartdb_config_{}.json", nanos));
    fs::write(&path, contents).unwrap();
    path
}

fn manager_with_sqlite() -> Arc<DatabaseManager> {
    let manager = DatabaseManager::new();
    manager.register_driver(Arc::new(SqliteDriver)).unwrap();
    manager
}

#[test]
fn load_config_and_create_connection() {
    let manager = manager_with_sqlite();
    let path = temp_config_file(
        r#"{
            "connections": {
                "my_sqlite": {"driver": "sqlite", "path": ":memory:"},
                "my_mysql": {"driver": "mysql", "host": "127.0.0.1", "port": 3306}
            }
        }"#,
    );

    manager.load_config(&path).unwrap();

    let mut conn = manager.create_connection("my_sqlite").unwrap();
    assert!(!conn.is_open());
    conn.open().unwrap();
    conn.execute("CREATE TABLE t (a INTEGER)").unwrap();

    fs::remove_file(path).ok();
}

#[test]
fn load_config_replaces_previous_map() {
    let manager = manager_with_sqlite();

    let first = temp_config_file(r#"{"connections": {"a": {"driver": "sqlite"}}}"#);
    let second = temp_config_file(r#"{"connections": {"b": {"driver": "sqlite"}}}"#);

    manager.load_config(&first).unwrap();
    manager.load_config(&second).unwrap();

    assert!(manager.create_connection("b").is_ok());
    let err = manager.create_connection("a").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    fs::remove_file(first).ok();
    fs::remove_file(second).ok();
}

#[test]
fn load_config_missing_file() {
    let manager = manager_with_sqlite();
    let err = manager
        .load_config("/nonexistent/smartdb_config.json")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(err.message().contains("Cannot open config file"));
    assert_eq!(manager.last_error(), err.message());
}

#[test]
fn load_config_parse_error() {
    let manager = manager_with_sqlite();
    let path = temp_config_file("{not json");

    let err = manager.load_config(&path).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(err.message().contains("JSON parse error"));

    fs::remove_file(path).ok();
}

#[test]
fn load_config_requires_connections_object() {
    let manager = manager_with_sqlite();

    for contents in [r#"{}"#, r#"{"connections": [1, 2]}"#, r#"{"connections": "x"}"#] {
        let path = temp_config_file(contents);
        let err = manager.load_config(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.message().contains("connections"));
        fs::remove_file(path).ok();
    }
}

#[test]
fn create_connection_missing_name() {
    let manager = manager_with_sqlite();
    let err = manager.create_connection("nope").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(err.message().contains("Connection config not found"));
    assert!(manager.last_error().contains("Connection config not found"));
}

#[test]
fn create_connection_missing_driver_field() {
    let manager = manager_with_sqlite();
    let path = temp_config_file(r#"{"connections": {"broken": {"path": ":memory:"}}}"#);
    manager.load_config(&path).unwrap();

    let err = manager.create_connection("broken").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(err.message().contains("Missing required field 'driver'"));

    fs::remove_file(path).ok();
}

#[test]
fn create_connection_unregistered_driver() {
    let manager = DatabaseManager::new();
    let path = temp_config_file(r#"{"connections": {"pg": {"driver": "postgres"}}}"#);
    manager.load_config(&path).unwrap();

    let err = manager.create_connection("pg").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(err.message().contains("Driver not supported or registered"));

    fs::remove_file(path).ok();
}

#[test]
fn create_connection_raw_unknown_driver() {
    let manager = manager_with_sqlite();
    let err = manager
        .create_connection_raw("oracle", &serde_json::json!({}))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(err.message().contains("Driver not found"));
}

#[test]
fn register_driver_overwrites_by_name() {
    let manager = DatabaseManager::new();
    manager.register_driver(Arc::new(SqliteDriver)).unwrap();
    manager.register_driver(Arc::new(SqliteDriver)).unwrap();
    manager.register_driver(Arc::new(MySqlDriver)).unwrap();

    assert!(manager
        .create_connection_raw("sqlite", &serde_json::json!({"path": ":memory:"}))
        .is_ok());
    assert!(manager
        .create_connection_raw("mysql", &serde_json::json!({}))
        .is_ok());
}

#[test]
fn pool_cache_returns_shared_instance_for_identical_shape() {
    let manager = manager_with_sqlite();
    let config = serde_json::json!({"path": ":memory:"});
    let options = PoolOptions {
        max_size: 4,
        ..PoolOptions::default()
    };

    let pool1 = manager
        .create_pool_raw("sqlite", &config, options.clone())
        .unwrap();
    let pool2 = manager
        .create_pool_raw("sqlite", &config, options.clone())
        .unwrap();
    assert!(Arc::ptr_eq(&pool1, &pool2));

    let different = PoolOptions {
        max_size: 8,
        ..options
    };
    let pool3 = manager.create_pool_raw("sqlite", &config, different).unwrap();
    assert!(!Arc::ptr_eq(&pool1, &pool3));
}

#[test]
fn pool_cache_key_ignores_config_field_order() {
    let manager = manager_with_sqlite();
    let options = PoolOptions::default();

    let pool1 = manager
        .create_pool_raw(
            "sqlite",
            &serde_json::json!({"path": ":memory:", "extra": 1}),
            options.clone(),
        )
        .unwrap();
    let pool2 = manager
        .create_pool_raw(
            "sqlite",
            &serde_json::json!({"extra": 1, "path": ":memory:"}),
            options,
        )
        .unwrap();
    assert!(Arc::ptr_eq(&pool1, &pool2));
}

#[test]
fn pool_cache_holds_only_weak_references() {
    let manager = manager_with_sqlite();
    let config = serde_json::json!({"path": ":memory:"});

    let pool = manager
        .create_pool_raw("sqlite", &config, PoolOptions::default())
        .unwrap();
    drop(pool);

    // The cache entry is dead; a new pool is built and works.
    let pool = manager
        .create_pool_raw("sqlite", &config, PoolOptions::default())
        .unwrap();
    let mut conn = pool.acquire().unwrap();
    conn.execute("CREATE TABLE t (a INTEGER)").unwrap();
}

#[test]
fn create_pool_raw_unknown_driver() {
    let manager = manager_with_sqlite();
    let err = manager
        .create_pool_raw("oracle", &serde_json::json!({}), PoolOptions::default())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(err.message().contains("Driver not found"));
}

#[test]
fn create_pool_rejects_zero_max_size() {
    let manager = manager_with_sqlite();
    let options = PoolOptions {
        max_size: 0,
        ..PoolOptions::default()
    };
    let err = manager
        .create_pool_raw("sqlite", &serde_json::json!({}), options)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert!(err.message().contains("maxSize"));
}

#[test]
fn named_pool_end_to_end() {
    let manager = manager_with_sqlite();
    let path = temp_config_file(
        r#"{"connections": {"my_sqlite": {"driver": "sqlite", "path": ":memory:"}}}"#,
    );
    manager.load_config(&path).unwrap();

    let options = PoolOptions {
        min_size: 1,
        max_size: 4,
        ..PoolOptions::default()
    };
    let pool = manager.create_pool("my_sqlite", options).unwrap();
    assert_eq!(pool.total_size(), 1);

    let mut conn = pool.acquire().unwrap();
    conn.execute("CREATE TABLE pool_tb (id INTEGER, val TEXT)")
        .unwrap();
    conn.execute_params(
        "INSERT INTO pool_tb VALUES (?, ?)",
        &[Value::Int(1), Value::Text("Hello from Pool!".into())],
    )
    .unwrap();

    let row = smartdb::query_one(&mut *conn, "SELECT val FROM pool_tb WHERE id = 1").unwrap();
    assert_eq!(row[0], Value::Text("Hello from Pool!".into()));

    fs::remove_file(path).ok();
}

#[test]
fn named_pool_with_missing_config_fails_on_acquire() {
    let manager = manager_with_sqlite();

    // Pool construction succeeds (no warm-up); the factory fails at acquire
    // and surfaces the manager's lookup error.
    let pool = manager
        .create_pool("missing_name", PoolOptions::default())
        .unwrap();
    let err = pool.acquire().unwrap_err();
    assert!(err.message().contains("Connection config not found"));
    assert!(manager.last_error().contains("Connection config not found"));
}

#[test]
fn last_error_cleared_on_success() {
    let manager = manager_with_sqlite();

    manager.create_connection("nope").unwrap_err();
    assert!(!manager.last_error().is_empty());

    manager
        .create_connection_raw("sqlite", &serde_json::json!({}))
        .unwrap();
    assert!(manager.last_error().is_empty());
}

#[test]
fn error_counters_track_failures_by_kind() {
    let manager = manager_with_sqlite();
    manager.reset_error_counters();

    manager.create_connection("nope").unwrap_err();
    manager
        .create_connection_raw("oracle", &serde_json::json!({}))
        .unwrap_err();
    manager
        .load_config("/nonexistent/config.json")
        .unwrap_err();

    let counters = manager.error_counters();
    assert_eq!(counters.count(ErrorKind::NotFound), 2);
    assert_eq!(counters.count(ErrorKind::Configuration), 1);
    assert_eq!(counters.total(), 3);

    manager.reset_error_counters();
    assert_eq!(manager.error_counters().total(), 0);
}
