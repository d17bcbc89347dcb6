//! Backend configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Default SQLite busy timeout.
pub const DEFAULT_SQLITE_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Default sled page cache capacity (64 MB).
pub const DEFAULT_SLED_CACHE_CAPACITY: u64 = 64 * 1024 * 1024;

/// Default Redis URL (database 0 on localhost).
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379/0";

/// Default prefix for every Redis key written by the adapter.
pub const DEFAULT_REDIS_KEY_PREFIX: &str = "pollstore";

/// Default MongoDB connection string.
pub const DEFAULT_MONGO_URI: &str = "mongodb://localhost:27017";

/// Default MongoDB database name.
pub const DEFAULT_MONGO_DATABASE: &str = "pollstore";

/// Default MongoDB server selection timeout.
pub const DEFAULT_MONGO_SELECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Default Neo4j Bolt address.
pub const DEFAULT_NEO4J_URI: &str = "127.0.0.1:7687";

/// Default Neo4j user.
pub const DEFAULT_NEO4J_USER: &str = "neo4j";

/// SQLite adapter configuration.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Database file. None opens a private in-memory database.
    pub path: Option<PathBuf>,

    /// How long a writer waits for another connection's lock.
    pub busy_timeout: Duration,
}

impl SqliteConfig {
    /// Configuration for a database file shared by every connection opened on it.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            busy_timeout: DEFAULT_SQLITE_BUSY_TIMEOUT,
        }
    }

    /// Configuration for a private in-memory database.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            busy_timeout: DEFAULT_SQLITE_BUSY_TIMEOUT,
        }
    }

    /// Set the busy timeout.
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// sled adapter configuration.
#[derive(Debug, Clone)]
pub struct SledConfig {
    /// Database directory. Ignored when `temporary` is set.
    pub path: PathBuf,

    /// Page cache capacity in bytes.
    pub cache_capacity: u64,

    /// Flush interval in milliseconds. None leaves flushing to explicit calls.
    pub flush_every_ms: Option<u64>,

    /// Enable zstd compression.
    pub compression: bool,

    /// Temporary database (deleted on drop).
    pub temporary: bool,
}

impl Default for SledConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./pollstore_kv"),
            cache_capacity: DEFAULT_SLED_CACHE_CAPACITY,
            flush_every_ms: Some(500),
            compression: true,
            temporary: false,
        }
    }
}

impl SledConfig {
    /// Create a new configuration with the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Create a temporary configuration for testing.
    pub fn temporary() -> Self {
        Self {
            path: PathBuf::from(""),
            temporary: true,
            ..Default::default()
        }
    }

    /// Set the page cache capacity.
    pub fn with_cache_capacity(mut self, bytes: u64) -> Self {
        self.cache_capacity = bytes;
        self
    }

    /// Enable or disable zstd compression.
    pub fn with_compression(mut self, compression: bool) -> Self {
        self.compression = compression;
        self
    }

    /// Convert to sled configuration.
    pub(crate) fn to_sled_config(&self) -> sled::Config {
        let mut config = sled::Config::new()
            .cache_capacity(self.cache_capacity)
            .flush_every_ms(self.flush_every_ms)
            .use_compression(self.compression);

        if self.temporary {
            config = config.temporary(true);
        } else {
            config = config.path(&self.path);
        }

        config
    }
}

/// How the Redis adapter issues an admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RedisMode {
    /// `SADD` for admission, then one `MULTI` pipeline for the counters.
    #[default]
    Sequential,
    /// The whole admission as one server-side script: a single round trip.
    Scripted,
}

impl RedisMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RedisMode::Sequential => "sequential",
            RedisMode::Scripted => "scripted",
        }
    }
}

impl std::fmt::Display for RedisMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RedisMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sequential" | "normal" => Ok(RedisMode::Sequential),
            "scripted" | "pipelined" => Ok(RedisMode::Scripted),
            other => Err(format!("unknown redis mode: {}", other)),
        }
    }
}

/// Redis adapter configuration.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Connection URL, including the database index.
    pub url: String,

    /// Prefix for every key; `reset` only deletes keys under it.
    pub key_prefix: String,

    /// Admission mode.
    pub mode: RedisMode,
}

impl RedisConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            key_prefix: DEFAULT_REDIS_KEY_PREFIX.to_string(),
            mode: RedisMode::default(),
        }
    }

    /// Set the key prefix.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Set the admission mode.
    pub fn with_mode(mut self, mode: RedisMode) -> Self {
        self.mode = mode;
        self
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self::new(DEFAULT_REDIS_URL)
    }
}

/// MongoDB adapter configuration.
#[derive(Debug, Clone)]
pub struct MongoConfig {
    /// Connection string.
    pub uri: String,

    /// Database holding the `polls`, `users` and `votes` collections.
    pub database: String,

    /// How long to wait for a reachable server before giving up.
    pub server_selection_timeout: Duration,
}

impl MongoConfig {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            database: DEFAULT_MONGO_DATABASE.to_string(),
            server_selection_timeout: DEFAULT_MONGO_SELECTION_TIMEOUT,
        }
    }

    /// Set the database name.
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set the server selection timeout.
    pub fn with_server_selection_timeout(mut self, timeout: Duration) -> Self {
        self.server_selection_timeout = timeout;
        self
    }
}

impl Default for MongoConfig {
    fn default() -> Self {
        Self::new(DEFAULT_MONGO_URI)
    }
}

/// Neo4j adapter configuration.
#[derive(Debug, Clone)]
pub struct Neo4jConfig {
    /// Bolt address (`host:port`).
    pub uri: String,
    pub user: String,
    pub password: String,
}

impl Neo4jConfig {
    pub fn new(uri: impl Into<String>, user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            user: user.into(),
            password: password.into(),
        }
    }
}

impl Default for Neo4jConfig {
    fn default() -> Self {
        Self::new(DEFAULT_NEO4J_URI, DEFAULT_NEO4J_USER, "")
    }
}

/// Configuration for every backend, as collected by a caller that may open any of them.
#[derive(Debug, Clone, Default)]
pub struct BackendConfigs {
    pub sqlite: SqliteConfig,
    pub sled: SledConfig,
    pub redis: RedisConfig,
    pub mongo: MongoConfig,
    pub neo4j: Neo4jConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_config() {
        assert!(SqliteConfig::default().path.is_none());

        let config = SqliteConfig::file("/tmp/votes.db").with_busy_timeout(Duration::from_secs(1));
        assert_eq!(config.path, Some(PathBuf::from("/tmp/votes.db")));
        assert_eq!(config.busy_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_sled_config() {
        let config = SledConfig::new("/var/lib/pollstore").with_cache_capacity(1024);
        assert_eq!(config.path, PathBuf::from("/var/lib/pollstore"));
        assert_eq!(config.cache_capacity, 1024);
        assert!(config.compression);
        assert!(!config.temporary);
        assert!(!config.with_compression(false).compression);
        assert!(SledConfig::temporary().temporary);
    }

    #[test]
    fn test_redis_config_builder() {
        let config = RedisConfig::default();
        assert_eq!(config.url, DEFAULT_REDIS_URL);
        assert_eq!(config.key_prefix, DEFAULT_REDIS_KEY_PREFIX);
        assert_eq!(config.mode, RedisMode::Sequential);

        let config = RedisConfig::new("redis://10.0.0.1:6379/1")
            .with_key_prefix("bench")
            .with_mode(RedisMode::Scripted);
        assert_eq!(config.url, "redis://10.0.0.1:6379/1");
        assert_eq!(config.key_prefix, "bench");
        assert_eq!(config.mode, RedisMode::Scripted);
    }

    #[test]
    fn test_redis_mode_parse() {
        assert_eq!("sequential".parse::<RedisMode>(), Ok(RedisMode::Sequential));
        assert_eq!("Pipelined".parse::<RedisMode>(), Ok(RedisMode::Scripted));
        assert!("eventual".parse::<RedisMode>().is_err());
        assert_eq!(RedisMode::Scripted.to_string(), "scripted");
    }

    #[test]
    fn test_mongo_config_builder() {
        let config = MongoConfig::default()
            .with_database("bench_db")
            .with_server_selection_timeout(Duration::from_secs(1));
        assert_eq!(config.uri, DEFAULT_MONGO_URI);
        assert_eq!(config.database, "bench_db");
        assert_eq!(config.server_selection_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_neo4j_defaults() {
        let config = Neo4jConfig::default();
        assert_eq!(config.uri, DEFAULT_NEO4J_URI);
        assert_eq!(config.user, DEFAULT_NEO4J_USER);
    }
}
