//! Pollstore Command-Line Driver
//!
//! Runs the vote admission demonstration, the admission benchmark and the
//! follow-graph queries against the configured storage backends.

mod commands;
mod error;
mod formatter;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use pollstore_backends::config::{
    DEFAULT_MONGO_DATABASE, DEFAULT_MONGO_URI, DEFAULT_NEO4J_URI, DEFAULT_NEO4J_USER,
    DEFAULT_REDIS_KEY_PREFIX, DEFAULT_REDIS_URL,
};
use pollstore_backends::{
    BackendConfigs, BackendKind, MongoConfig, Neo4jConfig, RedisConfig, RedisMode, SledConfig,
    SqliteConfig,
};
use pollstore_core::PollId;

use commands::BenchPlan;
use error::CliError;
use formatter::OutputFormat;

/// Pollstore Command-Line Driver
#[derive(Parser, Debug)]
#[command(name = "pollstore")]
#[command(version, about = "One vote per user, across relational, key-value, document and graph stores")]
pub struct Args {
    #[command(flatten)]
    pub backends: BackendArgs,

    /// Output format
    #[arg(long, global = true, default_value = "table", value_enum)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

/// Connection settings for every backend.
#[derive(clap::Args, Debug, Clone)]
pub struct BackendArgs {
    /// SQLite database file (private in-memory database when omitted)
    #[arg(long, global = true, env = "POLLSTORE_SQLITE_PATH")]
    pub sqlite_path: Option<PathBuf>,

    /// SQLite busy timeout in milliseconds
    #[arg(long, global = true, default_value_t = 5_000)]
    pub sqlite_busy_timeout_ms: u64,

    /// sled database directory (temporary database when omitted)
    #[arg(long, global = true, env = "POLLSTORE_SLED_PATH")]
    pub sled_path: Option<PathBuf>,

    /// Redis connection URL
    #[arg(long, global = true, env = "POLLSTORE_REDIS_URL", default_value = DEFAULT_REDIS_URL)]
    pub redis_url: String,

    /// Prefix for every Redis key
    #[arg(long, global = true, default_value = DEFAULT_REDIS_KEY_PREFIX)]
    pub redis_prefix: String,

    /// Redis admission mode (sequential or scripted)
    #[arg(long, global = true, default_value = "sequential")]
    pub redis_mode: RedisMode,

    /// MongoDB connection string
    #[arg(long, global = true, env = "POLLSTORE_MONGO_URI", default_value = DEFAULT_MONGO_URI)]
    pub mongo_uri: String,

    /// MongoDB database name
    #[arg(long, global = true, default_value = DEFAULT_MONGO_DATABASE)]
    pub mongo_db: String,

    /// MongoDB server selection timeout in seconds
    #[arg(long, global = true, default_value_t = 5)]
    pub mongo_timeout: u64,

    /// Neo4j Bolt address
    #[arg(long, global = true, env = "POLLSTORE_NEO4J_URI", default_value = DEFAULT_NEO4J_URI)]
    pub neo4j_uri: String,

    /// Neo4j user
    #[arg(long, global = true, env = "POLLSTORE_NEO4J_USER", default_value = DEFAULT_NEO4J_USER)]
    pub neo4j_user: String,

    /// Neo4j password
    #[arg(long, global = true, env = "POLLSTORE_NEO4J_PASSWORD", default_value = "", hide_env_values = true)]
    pub neo4j_password: String,
}

impl BackendArgs {
    /// Convert to backend configurations.
    pub fn into_config(self) -> BackendConfigs {
        let sqlite = match self.sqlite_path {
            Some(path) => SqliteConfig::file(path),
            None => SqliteConfig::in_memory(),
        }
        .with_busy_timeout(Duration::from_millis(self.sqlite_busy_timeout_ms));

        let sled = match self.sled_path {
            Some(path) => SledConfig::new(path),
            None => SledConfig::temporary(),
        };

        BackendConfigs {
            sqlite,
            sled,
            redis: RedisConfig::new(self.redis_url)
                .with_key_prefix(self.redis_prefix)
                .with_mode(self.redis_mode),
            mongo: MongoConfig::new(self.mongo_uri)
                .with_database(self.mongo_db)
                .with_server_selection_timeout(Duration::from_secs(self.mongo_timeout)),
            neo4j: Neo4jConfig::new(self.neo4j_uri, self.neo4j_user, self.neo4j_password),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the six-vote demonstration and print each tally
    Demo {
        /// Backends to run (comma separated)
        #[arg(short, long = "backend", value_delimiter = ',', default_value = "sqlite,sled")]
        backends: Vec<BackendKind>,
    },

    /// Time vote admission; unreachable backends are skipped
    Bench {
        /// Number of votes per backend
        #[arg(short = 'n', long, default_value_t = 1_000)]
        votes: usize,

        /// Backends to run (comma separated; every compiled backend when omitted)
        #[arg(short, long = "backend", value_delimiter = ',')]
        backends: Vec<BackendKind>,

        /// Fraction of votes that repeat an earlier voter
        #[arg(long, default_value_t = 0.0)]
        duplicate_ratio: f64,

        /// Seed for the duplicate vote stream
        #[arg(long, default_value_t = 42)]
        rng_seed: u64,
    },

    /// Load the demo follow graph and run the relationship queries
    Social {
        /// sqlite or neo4j
        #[arg(short, long, default_value = "sqlite")]
        backend: BackendKind,
    },

    /// List the Redis keys of a poll (debugging aid)
    Inspect {
        /// Poll id
        #[arg(long, default_value_t = 1)]
        poll: i64,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "pollstore=info".into()))
        .init();

    let args = Args::parse();

    match run(args).await {
        Ok(output) => println!("{}", output),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run(args: Args) -> Result<String, CliError> {
    let formatter = formatter::create_formatter(args.format);
    let configs = args.backends.into_config();

    match args.command {
        Command::Demo { backends } => commands::demo(&backends, &configs, &*formatter).await,
        Command::Bench {
            votes,
            backends,
            duplicate_ratio,
            rng_seed,
        } => {
            let backends = if backends.is_empty() {
                BackendKind::ALL
                    .into_iter()
                    .filter(BackendKind::is_compiled)
                    .collect()
            } else {
                backends
            };
            let plan = BenchPlan {
                votes,
                duplicate_ratio,
                rng_seed,
            };
            let reports = commands::bench(&backends, &configs, plan).await?;
            Ok(formatter.format_bench(&reports))
        }
        Command::Social { backend } => commands::social(backend, &configs, &*formatter).await,
        Command::Inspect { poll } => commands::inspect(PollId(poll), &configs, &*formatter).await,
    }
}
