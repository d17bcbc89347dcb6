//! Redis adapter.
//!
//! `SADD` on the poll's voter set is the admission primitive: it returns 1
//! only to the first caller adding a given member. Counters, per-option voter
//! sets and the scoreboard are updated after a successful admission.
//!
//! Key layout, all under the configured prefix:
//!
//! ```text
//! {prefix}:poll:{id}:question            string
//! {prefix}:poll:{id}:options             hash   option -> label
//! {prefix}:poll:{id}:voters              set    user ids
//! {prefix}:poll:{id}:option:{opt}:count  string integer counter
//! {prefix}:poll:{id}:option:{opt}:voters set    user ids
//! {prefix}:poll:{id}:scoreboard          zset   option -> votes
//! {prefix}:users                         hash   user id -> name
//! ```

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{RedisError, Script};
use serde::Serialize;
use tracing::{debug, info};

use pollstore_core::{
    Fault, OptionId, PollId, PollSeed, Tally, User, UserId, VoteOutcome, VoteStore,
};

use crate::config::{RedisConfig, RedisMode};

/// Admission, counters and scoreboard in one server-side step.
///
/// Returns -1 for an unknown option, 0 for a duplicate, 1 when admitted.
const ADMIT_SCRIPT: &str = r"
if redis.call('HEXISTS', KEYS[1], ARGV[2]) == 0 then
    return -1
end
if redis.call('SADD', KEYS[2], ARGV[1]) == 0 then
    return 0
end
redis.call('INCR', KEYS[3])
redis.call('SADD', KEYS[4], ARGV[1])
redis.call('ZINCRBY', KEYS[5], 1, ARGV[2])
return 1
";

const SCAN_BATCH: usize = 500;

/// One key of a poll as seen by [`RedisStore::inspect_keys`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyReport {
    pub key: String,
    pub kind: String,
    pub value: String,
}

/// Redis-backed vote store.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    prefix: String,
    mode: RedisMode,
    script: Script,
}

impl RedisStore {
    /// Connect to the server in `config`.
    pub async fn connect(config: &RedisConfig) -> Result<Self, Fault> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| Fault::BackendUnavailable(format!("invalid redis url: {}", e)))?;
        let conn = ConnectionManager::new(client).await.map_err(map_err)?;

        info!(url = %config.url, mode = %config.mode, "connected to redis");

        Ok(Self {
            conn,
            prefix: config.key_prefix.clone(),
            mode: config.mode,
            script: Script::new(ADMIT_SCRIPT),
        })
    }

    fn poll_key(&self, poll: PollId, suffix: &str) -> String {
        format!("{}:poll:{}:{}", self.prefix, poll, suffix)
    }

    fn option_key(&self, poll: PollId, option: &OptionId, suffix: &str) -> String {
        format!("{}:poll:{}:option:{}:{}", self.prefix, poll, option, suffix)
    }

    fn users_key(&self) -> String {
        format!("{}:users", self.prefix)
    }

    /// Every key matching `pattern`, via cursor-based `SCAN`.
    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, Fault> {
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(map_err)?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn option_exists(&self, poll: PollId, option: &OptionId) -> Result<bool, Fault> {
        let mut conn = self.conn.clone();
        redis::cmd("HEXISTS")
            .arg(self.poll_key(poll, "options"))
            .arg(option.as_str())
            .query_async(&mut conn)
            .await
            .map_err(map_err)
    }

    async fn cast_sequential(
        &self,
        poll: PollId,
        user: &UserId,
        option: &OptionId,
    ) -> Result<VoteOutcome, Fault> {
        if !self.option_exists(poll, option).await? {
            return Err(Fault::unknown_option(poll, option));
        }

        let mut conn = self.conn.clone();
        let added: i64 = redis::cmd("SADD")
            .arg(self.poll_key(poll, "voters"))
            .arg(user.as_str())
            .query_async(&mut conn)
            .await
            .map_err(map_err)?;

        if added == 0 {
            return Ok(VoteOutcome::ALREADY_VOTED);
        }

        // Admitted; a crash between SADD and this pipeline leaves the
        // admission recorded with the counters one short.
        redis::pipe()
            .atomic()
            .cmd("INCR")
            .arg(self.option_key(poll, option, "count"))
            .ignore()
            .cmd("SADD")
            .arg(self.option_key(poll, option, "voters"))
            .arg(user.as_str())
            .ignore()
            .cmd("ZINCRBY")
            .arg(self.poll_key(poll, "scoreboard"))
            .arg(1)
            .arg(option.as_str())
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(map_err)?;

        Ok(VoteOutcome::Accepted)
    }

    async fn cast_scripted(
        &self,
        poll: PollId,
        user: &UserId,
        option: &OptionId,
    ) -> Result<VoteOutcome, Fault> {
        let mut conn = self.conn.clone();
        let status: i64 = self
            .script
            .key(self.poll_key(poll, "options"))
            .key(self.poll_key(poll, "voters"))
            .key(self.option_key(poll, option, "count"))
            .key(self.option_key(poll, option, "voters"))
            .key(self.poll_key(poll, "scoreboard"))
            .arg(user.as_str())
            .arg(option.as_str())
            .invoke_async(&mut conn)
            .await
            .map_err(map_err)?;

        match status {
            1 => Ok(VoteOutcome::Accepted),
            0 => Ok(VoteOutcome::ALREADY_VOTED),
            -1 => Err(Fault::unknown_option(poll, option)),
            other => Err(Fault::Engine(format!(
                "admission script returned unexpected status {}",
                other
            ))),
        }
    }

    /// Scoreboard entries, highest score first.
    pub async fn scoreboard(&self, poll: PollId) -> Result<Vec<(String, f64)>, Fault> {
        let mut conn = self.conn.clone();
        redis::cmd("ZREVRANGE")
            .arg(self.poll_key(poll, "scoreboard"))
            .arg(0)
            .arg(-1)
            .arg("WITHSCORES")
            .query_async(&mut conn)
            .await
            .map_err(map_err)
    }

    /// List every key of `poll` with its type and a rendered value.
    ///
    /// Debugging aid only; walks the keyspace with `SCAN`.
    pub async fn inspect_keys(&self, poll: PollId) -> Result<Vec<KeyReport>, Fault> {
        let keys = self
            .scan_keys(&format!("{}:poll:{}:*", self.prefix, poll))
            .await?;
        let mut conn = self.conn.clone();
        let mut reports = Vec::with_capacity(keys.len());

        for key in keys {
            let kind: String = redis::cmd("TYPE")
                .arg(&key)
                .query_async(&mut conn)
                .await
                .map_err(map_err)?;

            let value = match kind.as_str() {
                "string" => redis::cmd("GET")
                    .arg(&key)
                    .query_async::<Option<String>>(&mut conn)
                    .await
                    .map_err(map_err)?
                    .unwrap_or_default(),
                "set" => {
                    let mut members: Vec<String> = redis::cmd("SMEMBERS")
                        .arg(&key)
                        .query_async(&mut conn)
                        .await
                        .map_err(map_err)?;
                    members.sort();
                    format!("{{{}}}", members.join(", "))
                }
                "hash" => {
                    let fields: Vec<(String, String)> = redis::cmd("HGETALL")
                        .arg(&key)
                        .query_async(&mut conn)
                        .await
                        .map_err(map_err)?;
                    render_pairs(fields.iter().map(|(k, v)| format!("{}: {}", k, v)))
                }
                "zset" => {
                    let entries: Vec<(String, f64)> = redis::cmd("ZRANGE")
                        .arg(&key)
                        .arg(0)
                        .arg(-1)
                        .arg("WITHSCORES")
                        .query_async(&mut conn)
                        .await
                        .map_err(map_err)?;
                    render_pairs(entries.iter().map(|(m, s)| format!("{}: {}", m, s)))
                }
                _ => String::new(),
            };

            reports.push(KeyReport { key, kind, value });
        }

        Ok(reports)
    }
}

fn render_pairs(pairs: impl Iterator<Item = String>) -> String {
    format!("{{{}}}", pairs.collect::<Vec<_>>().join(", "))
}

fn map_err(err: RedisError) -> Fault {
    if err.is_io_error()
        || err.is_connection_refusal()
        || err.is_connection_dropped()
        || err.is_timeout()
    {
        Fault::BackendUnavailable(err.to_string())
    } else {
        Fault::Engine(err.to_string())
    }
}

#[async_trait]
impl VoteStore for RedisStore {
    fn name(&self) -> &'static str {
        match self.mode {
            RedisMode::Sequential => "redis",
            RedisMode::Scripted => "redis-scripted",
        }
    }

    async fn reset(&self) -> Result<(), Fault> {
        let keys = self.scan_keys(&format!("{}:*", self.prefix)).await?;
        let mut conn = self.conn.clone();

        for chunk in keys.chunks(SCAN_BATCH) {
            redis::cmd("DEL")
                .arg(chunk.to_vec())
                .query_async::<()>(&mut conn)
                .await
                .map_err(map_err)?;
        }

        info!(backend = "redis", prefix = %self.prefix, deleted = keys.len(), "keys cleared");
        Ok(())
    }

    async fn seed(&self, seed: &PollSeed) -> Result<(), Fault> {
        let poll = seed.poll_id();
        let mut pipe = redis::pipe();
        pipe.atomic();

        pipe.cmd("SET")
            .arg(self.poll_key(poll, "question"))
            .arg(&seed.poll.question)
            .ignore();
        for option in &seed.options {
            pipe.cmd("HSET")
                .arg(self.poll_key(poll, "options"))
                .arg(option.id.as_str())
                .arg(&option.label)
                .ignore();
        }
        for user in &seed.users {
            if let Some(name) = &user.name {
                pipe.cmd("HSET")
                    .arg(self.users_key())
                    .arg(user.id.as_str())
                    .arg(name)
                    .ignore();
            }
        }

        let mut conn = self.conn.clone();
        pipe.query_async::<()>(&mut conn).await.map_err(map_err)?;

        info!(
            backend = "redis",
            poll = %poll,
            options = seed.options.len(),
            users = seed.users.len(),
            "poll seeded"
        );
        Ok(())
    }

    async fn cast_vote(
        &self,
        poll: PollId,
        user: &UserId,
        option: &OptionId,
    ) -> Result<VoteOutcome, Fault> {
        let outcome = match self.mode {
            RedisMode::Sequential => self.cast_sequential(poll, user, option).await?,
            RedisMode::Scripted => self.cast_scripted(poll, user, option).await?,
        };
        debug!(backend = self.name(), %poll, %user, %option, %outcome, "vote processed");
        Ok(outcome)
    }

    async fn tally(&self, poll: PollId) -> Result<Tally, Fault> {
        let mut conn = self.conn.clone();
        let exists: bool = redis::cmd("EXISTS")
            .arg(self.poll_key(poll, "question"))
            .query_async(&mut conn)
            .await
            .map_err(map_err)?;
        if !exists {
            return Err(Fault::unknown_poll(poll));
        }

        let options: Vec<String> = redis::cmd("HKEYS")
            .arg(self.poll_key(poll, "options"))
            .query_async(&mut conn)
            .await
            .map_err(map_err)?;
        if options.is_empty() {
            return Ok(Tally::ranked(poll, Vec::<(String, u64)>::new()));
        }

        let count_keys: Vec<String> = options
            .iter()
            .map(|o| self.option_key(poll, &OptionId::from(o.as_str()), "count"))
            .collect();
        let counts: Vec<Option<u64>> = redis::cmd("MGET")
            .arg(&count_keys)
            .query_async(&mut conn)
            .await
            .map_err(map_err)?;

        Ok(Tally::ranked(
            poll,
            options
                .into_iter()
                .zip(counts)
                .map(|(option, count)| (option, count.unwrap_or(0))),
        ))
    }

    async fn voters(&self, poll: PollId, option: &OptionId) -> Result<Vec<User>, Fault> {
        if !self.option_exists(poll, option).await? {
            return Err(Fault::unknown_option(poll, option));
        }

        let mut conn = self.conn.clone();
        let mut ids: Vec<String> = redis::cmd("SMEMBERS")
            .arg(self.option_key(poll, option, "voters"))
            .query_async(&mut conn)
            .await
            .map_err(map_err)?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        ids.sort();

        let names: Vec<Option<String>> = redis::cmd("HMGET")
            .arg(self.users_key())
            .arg(&ids)
            .query_async(&mut conn)
            .await
            .map_err(map_err)?;

        Ok(ids
            .into_iter()
            .zip(names)
            .map(|(id, name)| User {
                id: UserId::new(id),
                name,
            })
            .collect())
    }
}
