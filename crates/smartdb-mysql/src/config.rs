//! MySQL connection configuration.

use std::time::Duration;

/// Connect timeout applied to every connection attempt.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// MySQL connection parameters.
#[derive(Debug, Clone)]
pub struct MySqlConfig {
    /// Hostname or IP address.
    pub host: String,
    /// Port number.
    pub port: u16,
    /// Username for authentication.
    pub user: String,
    /// Password for authentication (empty permitted).
    pub password: String,
    /// Database to select at connect time; empty means none.
    pub database: String,
    /// Character set name, e.g. "utf8mb4".
    pub charset: String,
}

impl Default for MySqlConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3306,
            user: "root".to_string(),
            password: String::new(),
            database: String::new(),
            charset: "utf8mb4".to_string(),
        }
    }
}

impl MySqlConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a configuration from a JSON object, applying defaults for
    /// missing fields and ignoring unrecognized ones.
    pub fn from_json(config: &serde_json::Value) -> Self {
        let defaults = Self::default();
        let str_field = |key: &str, default: String| -> String {
            config
                .get(key)
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or(default)
        };

        let port = config
            .get("port")
            .and_then(|v| v.as_u64())
            .and_then(|v| u16::try_from(v).ok())
            .unwrap_or(defaults.port);

        Self {
            host: str_field("host", defaults.host),
            port,
            user: str_field("user", defaults.user),
            password: str_field("password", defaults.password),
            database: str_field("database", defaults.database),
            charset: str_field("charset", defaults.charset),
        }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = charset.into();
        self
    }

    /// The "host:port" address string.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Map the configured character set name to a collation byte for the
    /// handshake. Unknown names fall back to utf8mb4.
    pub fn charset_byte(&self) -> u8 {
        use crate::protocol::charset;
        match self.charset.as_str() {
            "utf8mb4" => charset::UTF8MB4_GENERAL_CI,
            "utf8" => charset::UTF8_GENERAL_CI,
            "latin1" => charset::LATIN1_SWEDISH_CI,
            "binary" => charset::BINARY,
            _ => charset::UTF8MB4_GENERAL_CI,
        }
    }
}
