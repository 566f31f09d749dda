//! Driver registry, named configurations and pool cache.

use serde_json::{Map, Value as JsonValue};
use smartdb_core::logging::{self, LogLevel};
use smartdb_core::{log_info, Connection, DbResult, Driver, Error, ErrorCounters};
use smartdb_pool::{ConnectionFactory, ConnectionPool, PoolOptions};
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};

struct ManagerState {
    drivers: HashMap<String, Arc<dyn Driver>>,
    configs: Map<String, JsonValue>,
    pool_cache: HashMap<String, Weak<ConnectionPool>>,
    last_error: String,
    error_counters: ErrorCounters,
}

/// Registers drivers, loads named configurations, builds connections and
/// deduplicates pools of identical shape.
///
/// All state sits under one mutex. The pool cache stores weak references,
/// so a pool is dropped once no external holder remains; handles keep their
/// pool alive independently of the cache.
pub struct DatabaseManager {
    state: Mutex<ManagerState>,
}

impl DatabaseManager {
    /// Create a fresh manager. Returned behind `Arc` because pool factories
    /// keep a reference back to their manager.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ManagerState {
                drivers: HashMap::new(),
                configs: Map::new(),
                pool_cache: HashMap::new(),
                last_error: String::new(),
                error_counters: ErrorCounters::default(),
            }),
        })
    }

    /// The process-wide default instance. Constructing instances explicitly
    /// is preferred; this is an opt-in convenience.
    pub fn instance() -> Arc<Self> {
        static INSTANCE: OnceLock<Arc<DatabaseManager>> = OnceLock::new();
        Arc::clone(INSTANCE.get_or_init(DatabaseManager::new))
    }

    /// Register a driver under its own name, replacing any previous driver
    /// with that name.
    pub fn register_driver(&self, driver: Arc<dyn Driver>) -> DbResult<()> {
        let mut state = self.lock_state();
        state.drivers.insert(driver.name().to_string(), driver);
        state.last_error.clear();
        Ok(())
    }

    /// Load named connection configurations from a JSON file.
    ///
    /// The document must carry a top-level object key `"connections"`.
    /// Success replaces (not merges) the configuration map.
    pub fn load_config(&self, path: impl AsRef<Path>) -> DbResult<()> {
        const EVENT: &str = "db_manager_load_config";
        let path = path.as_ref();

        let file = match File::open(path) {
            Ok(file) => file,
            Err(_) => {
                return self.fail(
                    EVENT,
                    Error::configuration(format!("Cannot open config file: {}", path.display())),
                );
            }
        };

        let document: JsonValue = match serde_json::from_reader(file) {
            Ok(document) => document,
            Err(e) => {
                return self.fail(EVENT, Error::configuration(format!("JSON parse error: {}", e)));
            }
        };

        let Some(connections) = document.get("connections").and_then(JsonValue::as_object) else {
            return self.fail(
                EVENT,
                Error::configuration(
                    "Invalid config file format: missing object key 'connections'",
                ),
            );
        };

        let mut state = self.lock_state();
        state.configs = connections.clone();
        state.last_error.clear();
        drop(state);

        log_info!("Loaded {} connection configs.", connections.len());
        Ok(())
    }

    /// Build a Closed connection for a named configuration.
    pub fn create_connection(&self, name: &str) -> DbResult<Box<dyn Connection>> {
        const EVENT: &str = "db_manager_create_connection";

        let lookup = {
            let state = self.lock_state();
            Self::resolve_named(&state, name)
        };
        let (driver, config) = match lookup {
            Ok(found) => found,
            Err(err) => return self.fail(EVENT, err),
        };

        match driver.create_connection(&config) {
            Ok(conn) => {
                self.clear_last_error();
                Ok(conn)
            }
            Err(err) => self.fail(EVENT, err),
        }
    }

    /// Build a Closed connection directly from a driver name and config
    /// object, without name indirection.
    pub fn create_connection_raw(
        &self,
        driver_name: &str,
        config: &JsonValue,
    ) -> DbResult<Box<dyn Connection>> {
        const EVENT: &str = "db_manager_create_connection_raw";

        let driver = {
            let state = self.lock_state();
            state.drivers.get(driver_name).map(Arc::clone)
        };
        let Some(driver) = driver else {
            return self.fail(
                EVENT,
                Error::not_found(format!("Driver not found: {}", driver_name)),
            );
        };

        match driver.create_connection(config) {
            Ok(conn) => {
                self.clear_last_error();
                Ok(conn)
            }
            Err(err) => self.fail(EVENT, err),
        }
    }

    /// Build (or fetch from the cache) a pool over a named configuration.
    pub fn create_pool(
        self: &Arc<Self>,
        name: &str,
        options: PoolOptions,
    ) -> DbResult<Arc<ConnectionPool>> {
        const EVENT: &str = "db_manager_create_pool";

        let options = options.normalized();
        if options.max_size == 0 {
            return self.fail(
                EVENT,
                Error::invalid_argument("ConnectionPool maxSize must be greater than 0"),
            );
        }

        let key = pool_key_for_name(name, &options);
        if let Some(pool) = self.cached_pool(&key) {
            self.clear_last_error();
            return Ok(pool);
        }

        let manager = Arc::clone(self);
        let conn_name = name.to_string();
        let factory: ConnectionFactory =
            Box::new(move || manager.create_connection(&conn_name));

        let pool = match ConnectionPool::with_factory(factory, options) {
            Ok(pool) => pool,
            Err(err) => return self.fail(EVENT, err),
        };

        Ok(self.install_pool(key, pool))
    }

    /// Build (or fetch from the cache) a pool directly over a driver name
    /// and config object. The driver must already be registered.
    pub fn create_pool_raw(
        self: &Arc<Self>,
        driver_name: &str,
        config: &JsonValue,
        options: PoolOptions,
    ) -> DbResult<Arc<ConnectionPool>> {
        const EVENT: &str = "db_manager_create_pool_raw";

        let options = options.normalized();
        if options.max_size == 0 {
            return self.fail(
                EVENT,
                Error::invalid_argument("ConnectionPool maxSize must be greater than 0"),
            );
        }

        let key = pool_key_for_raw(driver_name, config, &options);
        {
            let mut state = self.lock_state();
            if let Some(pool) = Self::cached_pool_locked(&mut state, &key) {
                state.last_error.clear();
                return Ok(pool);
            }
            if !state.drivers.contains_key(driver_name) {
                drop(state);
                return self.fail(
                    EVENT,
                    Error::not_found(format!("Driver not found: {}", driver_name)),
                );
            }
        }

        let manager = Arc::clone(self);
        let driver_name = driver_name.to_string();
        let config = config.clone();
        let factory: ConnectionFactory =
            Box::new(move || manager.create_connection_raw(&driver_name, &config));

        let pool = match ConnectionPool::with_factory(factory, options) {
            Ok(pool) => pool,
            Err(err) => return self.fail(EVENT, err),
        };

        Ok(self.install_pool(key, pool))
    }

    /// Message of the most recent failure; cleared by the next success.
    pub fn last_error(&self) -> String {
        self.lock_state().last_error.clone()
    }

    /// Per-kind failure counts recorded by this manager.
    pub fn error_counters(&self) -> ErrorCounters {
        self.lock_state().error_counters.clone()
    }

    /// Reset the failure counts.
    pub fn reset_error_counters(&self) {
        self.lock_state().error_counters = ErrorCounters::default();
    }

    fn resolve_named(
        state: &ManagerState,
        name: &str,
    ) -> Result<(Arc<dyn Driver>, JsonValue), Error> {
        let Some(config) = state.configs.get(name) else {
            return Err(Error::not_found(format!(
                "Connection config not found: {}",
                name
            )));
        };

        let driver_name = config
            .get("driver")
            .and_then(JsonValue::as_str)
            .unwrap_or("");
        if driver_name.is_empty() {
            return Err(Error::configuration(format!(
                "Missing required field 'driver' for connection: {}",
                name
            )));
        }

        let Some(driver) = state.drivers.get(driver_name) else {
            return Err(Error::not_found(format!(
                "Driver not supported or registered: {}",
                driver_name
            )));
        };

        Ok((Arc::clone(driver), config.clone()))
    }

    fn cached_pool(&self, key: &str) -> Option<Arc<ConnectionPool>> {
        let mut state = self.lock_state();
        Self::cached_pool_locked(&mut state, key)
    }

    fn cached_pool_locked(state: &mut ManagerState, key: &str) -> Option<Arc<ConnectionPool>> {
        match state.pool_cache.get(key).map(Weak::upgrade) {
            Some(Some(pool)) => Some(pool),
            Some(None) => {
                // The cached pool died; drop the stale entry.
                state.pool_cache.remove(key);
                None
            }
            None => None,
        }
    }

    /// Install a freshly built pool, double-checking the cache under the
    /// lock so concurrent builders converge on one instance.
    fn install_pool(&self, key: String, pool: Arc<ConnectionPool>) -> Arc<ConnectionPool> {
        let mut state = self.lock_state();
        if let Some(existing) = Self::cached_pool_locked(&mut state, &key) {
            state.last_error.clear();
            return existing;
        }
        state.pool_cache.insert(key, Arc::downgrade(&pool));
        state.last_error.clear();
        pool
    }

    fn fail<T>(&self, event: &str, err: Error) -> DbResult<T> {
        {
            let mut state = self.lock_state();
            state.last_error = err.message().to_string();
            state.error_counters.increment(err.kind());
        }
        logging::log_db_error(LogLevel::Warn, event, &err);
        Err(err)
    }

    fn clear_last_error(&self) {
        self.lock_state().last_error.clear();
    }

    fn lock_state(&self) -> MutexGuard<'_, ManagerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn options_key(options: &PoolOptions) -> String {
    format!(
        "min={};max={};wait={};borrow={};return={}",
        options.min_size,
        options.max_size,
        options.wait_timeout.as_millis(),
        u8::from(options.test_on_borrow),
        u8::from(options.test_on_return)
    )
}

fn pool_key_for_name(name: &str, options: &PoolOptions) -> String {
    format!("name:{}|{}", name, options_key(options))
}

/// Raw-path keys embed the canonical (sorted-key) JSON serialization of the
/// config object.
fn pool_key_for_raw(driver_name: &str, config: &JsonValue, options: &PoolOptions) -> String {
    format!("raw:{}|{}|{}", driver_name, config, options_key(options))
}
