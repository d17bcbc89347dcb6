//! Storage adapters for the pollstore vote admission contract.
//!
//! SQLite and sled are always built. Redis, MongoDB and Neo4j adapters are
//! behind the `redis`, `mongodb` and `neo4j` features so that a default build
//! needs no servers.

pub mod config;
pub mod kv;
pub mod relational;

#[cfg(feature = "mongodb")]
pub mod document;
#[cfg(feature = "neo4j")]
pub mod graph;
#[cfg(feature = "redis")]
pub mod redis_kv;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;

use pollstore_core::{Fault, SocialGraph, VoteStore};

pub use config::{
    BackendConfigs, MongoConfig, Neo4jConfig, RedisConfig, RedisMode, SledConfig, SqliteConfig,
};
pub use kv::SledStore;
pub use relational::SqliteStore;

#[cfg(feature = "mongodb")]
pub use document::MongoStore;
#[cfg(feature = "neo4j")]
pub use graph::Neo4jStore;
#[cfg(feature = "redis")]
pub use redis_kv::{KeyReport, RedisStore};

/// Storage engine families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Sqlite,
    Sled,
    Redis,
    Mongo,
    Neo4j,
}

impl BackendKind {
    /// Every backend, in report order.
    pub const ALL: [BackendKind; 5] = [
        BackendKind::Sqlite,
        BackendKind::Sled,
        BackendKind::Redis,
        BackendKind::Mongo,
        BackendKind::Neo4j,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Sqlite => "sqlite",
            BackendKind::Sled => "sled",
            BackendKind::Redis => "redis",
            BackendKind::Mongo => "mongodb",
            BackendKind::Neo4j => "neo4j",
        }
    }

    /// Whether this build includes the adapter.
    pub fn is_compiled(&self) -> bool {
        match self {
            BackendKind::Sqlite | BackendKind::Sled => true,
            BackendKind::Redis => cfg!(feature = "redis"),
            BackendKind::Mongo => cfg!(feature = "mongodb"),
            BackendKind::Neo4j => cfg!(feature = "neo4j"),
        }
    }

    /// Whether the adapter also answers follow-graph queries.
    pub fn has_social_graph(&self) -> bool {
        matches!(self, BackendKind::Sqlite | BackendKind::Neo4j)
    }

    fn not_compiled(&self) -> Fault {
        Fault::BackendUnavailable(format!(
            "built without {0} support (enable the `{0}` feature)",
            self.as_str()
        ))
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognised backend name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown backend '{0}' (expected sqlite, sled, redis, mongodb or neo4j)")]
pub struct UnknownBackend(pub String);

impl FromStr for BackendKind {
    type Err = UnknownBackend;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" | "relational" => Ok(BackendKind::Sqlite),
            "sled" | "kv" => Ok(BackendKind::Sled),
            "redis" => Ok(BackendKind::Redis),
            "mongodb" | "mongo" | "document" => Ok(BackendKind::Mongo),
            "neo4j" | "graph" => Ok(BackendKind::Neo4j),
            _ => Err(UnknownBackend(s.to_string())),
        }
    }
}

/// Open a vote store of the given kind.
///
/// Networked backends connect here, so an unreachable server surfaces as
/// [`Fault::BackendUnavailable`] before any vote is cast.
pub async fn open_store(
    kind: BackendKind,
    configs: &BackendConfigs,
) -> Result<Arc<dyn VoteStore>, Fault> {
    match kind {
        BackendKind::Sqlite => Ok(Arc::new(SqliteStore::open(&configs.sqlite)?)),
        BackendKind::Sled => Ok(Arc::new(SledStore::open(&configs.sled)?)),
        #[cfg(feature = "redis")]
        BackendKind::Redis => Ok(Arc::new(RedisStore::connect(&configs.redis).await?)),
        #[cfg(feature = "mongodb")]
        BackendKind::Mongo => Ok(Arc::new(MongoStore::connect(&configs.mongo).await?)),
        #[cfg(feature = "neo4j")]
        BackendKind::Neo4j => Ok(Arc::new(Neo4jStore::connect(&configs.neo4j).await?)),
        #[allow(unreachable_patterns)]
        other => Err(other.not_compiled()),
    }
}

/// Open a follow-graph store of the given kind.
pub async fn open_social_graph(
    kind: BackendKind,
    configs: &BackendConfigs,
) -> Result<Arc<dyn SocialGraph>, Fault> {
    match kind {
        BackendKind::Sqlite => Ok(Arc::new(SqliteStore::open(&configs.sqlite)?)),
        #[cfg(feature = "neo4j")]
        BackendKind::Neo4j => Ok(Arc::new(Neo4jStore::connect(&configs.neo4j).await?)),
        #[cfg(not(feature = "neo4j"))]
        BackendKind::Neo4j => Err(kind.not_compiled()),
        other => Err(Fault::BackendUnavailable(format!(
            "{} does not model the follow graph",
            other
        ))),
    }
}
