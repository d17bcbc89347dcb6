//! SQLite adapter.
//!
//! Admission is the `UNIQUE (user_id, poll_id)` constraint on the `votes`
//! table; a constraint violation on insert is the rejection. Tallies are a
//! `LEFT JOIN` of options against votes, so untouched options count zero.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use tracing::{debug, info};

use pollstore_core::social::sort_members;
use pollstore_core::{
    Fault, Member, MemberId, OptionId, PollId, PollSeed, SocialGraph, SocialSeed, Tally, User,
    UserId, VoteOutcome, VoteStore,
};

use crate::config::SqliteConfig;

const SCHEMA: &str = r#"
    PRAGMA foreign_keys = ON;

    CREATE TABLE IF NOT EXISTS polls (
        id INTEGER PRIMARY KEY,
        question TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS options (
        poll_id INTEGER NOT NULL,
        id TEXT NOT NULL,
        label TEXT NOT NULL,
        PRIMARY KEY (poll_id, id),
        FOREIGN KEY (poll_id) REFERENCES polls(id)
    );

    CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        name TEXT
    );

    CREATE TABLE IF NOT EXISTS votes (
        id INTEGER PRIMARY KEY,
        poll_id INTEGER NOT NULL,
        user_id TEXT NOT NULL,
        option_id TEXT NOT NULL,
        FOREIGN KEY (poll_id, option_id) REFERENCES options(poll_id, id),
        UNIQUE (user_id, poll_id)
    );

    CREATE INDEX IF NOT EXISTS idx_votes_option ON votes(poll_id, option_id);

    CREATE TABLE IF NOT EXISTS members (
        id INTEGER PRIMARY KEY,
        username TEXT NOT NULL UNIQUE,
        full_name TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS follows (
        follower_id INTEGER NOT NULL,
        followed_id INTEGER NOT NULL,
        PRIMARY KEY (follower_id, followed_id),
        FOREIGN KEY (follower_id) REFERENCES members(id),
        FOREIGN KEY (followed_id) REFERENCES members(id)
    );
"#;

/// SQLite-backed vote store and follow graph.
///
/// Each `SqliteStore` owns one connection. Several stores opened on the same
/// file are independent connections; SQLite's locking and the UNIQUE
/// constraint arbitrate between them.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a connection and create the schema if needed.
    pub fn open(config: &SqliteConfig) -> Result<Self, Fault> {
        let conn = match &config.path {
            Some(path) => Connection::open(path),
            None => Connection::open_in_memory(),
        }
        .map_err(|e| Fault::BackendUnavailable(format!("failed to open sqlite database: {}", e)))?;

        conn.busy_timeout(config.busy_timeout).map_err(map_err)?;

        if config.path.is_some() {
            let mode: String = conn
                .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
                .map_err(map_err)?;
            debug!(journal_mode = %mode, "sqlite journal mode set");
        }

        conn.execute_batch(SCHEMA).map_err(map_err)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, Fault> {
        Self::open(&SqliteConfig::in_memory())
    }

    /// Run `f` against the connection on the blocking thread pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, Fault>
    where
        F: FnOnce(&mut Connection) -> Result<T, Fault> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard)
        })
        .await
        .map_err(|e| Fault::Engine(format!("sqlite task failed: {}", e)))?
    }
}

/// Extended result code of a constraint violation, if `err` is one.
fn constraint_code(err: &rusqlite::Error) -> Option<i32> {
    match err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
            Some(e.extended_code)
        }
        _ => None,
    }
}

fn map_err(err: rusqlite::Error) -> Fault {
    match err.sqlite_error_code() {
        Some(
            ErrorCode::CannotOpen
            | ErrorCode::DatabaseBusy
            | ErrorCode::DatabaseLocked
            | ErrorCode::NotADatabase,
        ) => Fault::BackendUnavailable(err.to_string()),
        _ => Fault::Engine(err.to_string()),
    }
}

fn poll_exists(conn: &Connection, poll: PollId) -> Result<bool, Fault> {
    conn.query_row("SELECT 1 FROM polls WHERE id = ?1", [poll.get()], |_| Ok(()))
        .optional()
        .map(|row| row.is_some())
        .map_err(map_err)
}

fn option_exists(conn: &Connection, poll: PollId, option: &OptionId) -> Result<bool, Fault> {
    conn.query_row(
        "SELECT 1 FROM options WHERE poll_id = ?1 AND id = ?2",
        params![poll.get(), option.as_str()],
        |_| Ok(()),
    )
    .optional()
    .map(|row| row.is_some())
    .map_err(map_err)
}

fn member_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Member> {
    Ok(Member {
        id: row.get(0)?,
        username: row.get(1)?,
        full_name: row.get(2)?,
    })
}

fn query_members(conn: &Connection, sql: &str, member: MemberId) -> Result<Vec<Member>, Fault> {
    let mut stmt = conn.prepare(sql).map_err(map_err)?;
    let mut members = stmt
        .query_map([member], member_from_row)
        .map_err(map_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(map_err)?;
    sort_members(&mut members);
    Ok(members)
}

#[async_trait]
impl VoteStore for SqliteStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn reset(&self) -> Result<(), Fault> {
        self.with_conn(|conn| {
            conn.execute_batch(
                "DELETE FROM votes; DELETE FROM options; DELETE FROM users; DELETE FROM polls;",
            )
            .map_err(map_err)
        })
        .await?;
        info!(backend = "sqlite", "vote tables cleared");
        Ok(())
    }

    async fn seed(&self, seed: &PollSeed) -> Result<(), Fault> {
        let seed = seed.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(map_err)?;
            tx.execute(
                "INSERT OR IGNORE INTO polls (id, question) VALUES (?1, ?2)",
                params![seed.poll.id.get(), &seed.poll.question],
            )
            .map_err(map_err)?;
            {
                let mut stmt = tx
                    .prepare("INSERT OR IGNORE INTO options (poll_id, id, label) VALUES (?1, ?2, ?3)")
                    .map_err(map_err)?;
                for option in &seed.options {
                    stmt.execute(params![seed.poll.id.get(), option.id.as_str(), &option.label])
                        .map_err(map_err)?;
                }

                let mut stmt = tx
                    .prepare("INSERT OR IGNORE INTO users (id, name) VALUES (?1, ?2)")
                    .map_err(map_err)?;
                for user in &seed.users {
                    stmt.execute(params![user.id.as_str(), &user.name])
                        .map_err(map_err)?;
                }
            }
            tx.commit().map_err(map_err)?;
            info!(
                backend = "sqlite",
                poll = %seed.poll.id,
                options = seed.options.len(),
                users = seed.users.len(),
                "poll seeded"
            );
            Ok(())
        })
        .await
    }

    async fn cast_vote(
        &self,
        poll: PollId,
        user: &UserId,
        option: &OptionId,
    ) -> Result<VoteOutcome, Fault> {
        let user = user.clone();
        let option = option.clone();
        self.with_conn(move |conn| {
            // Selecting from `options` makes an unknown option insert nothing
            // instead of racing the UNIQUE check with the foreign key check.
            let inserted = conn.execute(
                "INSERT INTO votes (poll_id, user_id, option_id)
                 SELECT poll_id, ?2, id FROM options WHERE poll_id = ?1 AND id = ?3",
                params![poll.get(), user.as_str(), option.as_str()],
            );

            match inserted {
                Ok(0) => Err(Fault::unknown_option(poll, &option)),
                Ok(_) => {
                    debug!(backend = "sqlite", %poll, %user, %option, "vote accepted");
                    Ok(VoteOutcome::Accepted)
                }
                Err(e) if constraint_code(&e) == Some(rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE) => {
                    debug!(backend = "sqlite", %poll, %user, "duplicate vote rejected");
                    Ok(VoteOutcome::ALREADY_VOTED)
                }
                Err(e)
                    if constraint_code(&e) == Some(rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY) =>
                {
                    Err(Fault::unknown_option(poll, &option))
                }
                Err(e) => Err(map_err(e)),
            }
        })
        .await
    }

    async fn tally(&self, poll: PollId) -> Result<Tally, Fault> {
        self.with_conn(move |conn| {
            if !poll_exists(conn, poll)? {
                return Err(Fault::unknown_poll(poll));
            }

            let mut stmt = conn
                .prepare(
                    "SELECT o.id, COUNT(v.id) AS vote_count
                     FROM options o
                     LEFT JOIN votes v ON v.poll_id = o.poll_id AND v.option_id = o.id
                     WHERE o.poll_id = ?1
                     GROUP BY o.id
                     ORDER BY vote_count DESC, o.id ASC",
                )
                .map_err(map_err)?;

            let counts = stmt
                .query_map([poll.get()], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })
                .map_err(map_err)?
                .map(|row| row.map(|(option, votes)| (option, votes.max(0) as u64)))
                .collect::<Result<Vec<_>, _>>()
                .map_err(map_err)?;

            Ok(Tally::ranked(poll, counts))
        })
        .await
    }

    async fn voters(&self, poll: PollId, option: &OptionId) -> Result<Vec<User>, Fault> {
        let option = option.clone();
        self.with_conn(move |conn| {
            if !option_exists(conn, poll, &option)? {
                return Err(Fault::unknown_option(poll, &option));
            }

            let mut stmt = conn
                .prepare(
                    "SELECT v.user_id, u.name
                     FROM votes v
                     LEFT JOIN users u ON u.id = v.user_id
                     WHERE v.poll_id = ?1 AND v.option_id = ?2
                     ORDER BY v.user_id",
                )
                .map_err(map_err)?;

            let users = stmt
                .query_map(params![poll.get(), option.as_str()], |row| {
                    Ok(User {
                        id: UserId::new(row.get::<_, String>(0)?),
                        name: row.get(1)?,
                    })
                })
                .map_err(map_err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(map_err)?;

            Ok(users)
        })
        .await
    }
}

#[async_trait]
impl SocialGraph for SqliteStore {
    async fn reset_network(&self) -> Result<(), Fault> {
        self.with_conn(|conn| {
            conn.execute_batch("DELETE FROM follows; DELETE FROM members;")
                .map_err(map_err)
        })
        .await
    }

    async fn load_network(&self, seed: &SocialSeed) -> Result<(), Fault> {
        let seed = seed.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(map_err)?;
            {
                let mut stmt = tx
                    .prepare("INSERT OR IGNORE INTO members (id, username, full_name) VALUES (?1, ?2, ?3)")
                    .map_err(map_err)?;
                for member in &seed.members {
                    stmt.execute(params![member.id, &member.username, &member.full_name])
                        .map_err(map_err)?;
                }

                let mut stmt = tx
                    .prepare("INSERT OR IGNORE INTO follows (follower_id, followed_id) VALUES (?1, ?2)")
                    .map_err(map_err)?;
                for edge in &seed.edges {
                    stmt.execute(params![edge.follower, edge.followed])
                        .map_err(|e| match constraint_code(&e) {
                            Some(rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY) => Fault::SchemaViolation(
                                format!("edge {} -> {} references an unknown member", edge.follower, edge.followed),
                            ),
                            _ => map_err(e),
                        })?;
                }
            }
            tx.commit().map_err(map_err)?;
            info!(
                backend = "sqlite",
                members = seed.members.len(),
                edges = seed.edges.len(),
                "network loaded"
            );
            Ok(())
        })
        .await
    }

    async fn following(&self, member: MemberId) -> Result<Vec<Member>, Fault> {
        self.with_conn(move |conn| {
            query_members(
                conn,
                "SELECT m.id, m.username, m.full_name
                 FROM members m
                 JOIN follows f ON m.id = f.followed_id
                 WHERE f.follower_id = ?1",
                member,
            )
        })
        .await
    }

    async fn followers(&self, member: MemberId) -> Result<Vec<Member>, Fault> {
        self.with_conn(move |conn| {
            query_members(
                conn,
                "SELECT m.id, m.username, m.full_name
                 FROM members m
                 JOIN follows f ON m.id = f.follower_id
                 WHERE f.followed_id = ?1",
                member,
            )
        })
        .await
    }

    async fn suggestions(&self, member: MemberId) -> Result<Vec<Member>, Fault> {
        self.with_conn(move |conn| {
            query_members(
                conn,
                "SELECT DISTINCT s.id, s.username, s.full_name
                 FROM follows f1
                 JOIN follows f2 ON f1.followed_id = f2.follower_id
                 JOIN members s ON s.id = f2.followed_id
                 WHERE f1.follower_id = ?1
                   AND f2.followed_id != ?1
                   AND f2.followed_id NOT IN (
                       SELECT followed_id FROM follows WHERE follower_id = ?1
                   )",
                member,
            )
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_schema_is_reentrant() {
        let dir = tempfile::tempdir().unwrap();
        let config = SqliteConfig::file(dir.path().join("votes.db"));
        let first = SqliteStore::open(&config).unwrap();
        first.seed(&PollSeed::demo()).await.unwrap();
        drop(first);

        // Opening again must keep the existing rows.
        let second = SqliteStore::open(&config).unwrap();
        let tally = second.tally(PollId(1)).await.unwrap();
        assert_eq!(tally.len(), 3);
    }

    #[tokio::test]
    async fn test_unique_constraint_is_the_rejection() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.seed(&PollSeed::demo()).await.unwrap();

        let user = UserId::from(101u64);
        assert_eq!(
            store.cast_vote(PollId(1), &user, &"A".into()).await.unwrap(),
            VoteOutcome::Accepted
        );
        assert_eq!(
            store.cast_vote(PollId(1), &user, &"C".into()).await.unwrap(),
            VoteOutcome::ALREADY_VOTED
        );

        let rows: i64 = store
            .with_conn(|conn| {
                conn.query_row("SELECT COUNT(*) FROM votes", [], |row| row.get(0))
                    .map_err(map_err)
            })
            .await
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[tokio::test]
    async fn test_voters_include_display_names() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.seed(&PollSeed::demo()).await.unwrap();
        store
            .cast_vote(PollId(1), &UserId::from(102u64), &"B".into())
            .await
            .unwrap();
        store
            .cast_vote(PollId(1), &UserId::from("guest"), &"B".into())
            .await
            .unwrap();

        let voters = store.voters(PollId(1), &"B".into()).await.unwrap();
        assert_eq!(
            voters,
            vec![User::named(102u64, "user:102"), User::anonymous("guest")]
        );
        assert!(store.voters(PollId(1), &"A".into()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_member_edge_is_schema_violation() {
        let store = SqliteStore::open_in_memory().unwrap();
        let seed = SocialSeed {
            members: vec![Member::new(1, "alice", "Alice Wonder")],
            edges: vec![pollstore_core::FollowEdge::new(1, 42)],
        };

        let err = store.load_network(&seed).await.unwrap_err();
        assert!(matches!(err, Fault::SchemaViolation(_)));
    }

    #[test]
    fn test_constraint_code_ignores_other_errors() {
        assert_eq!(constraint_code(&rusqlite::Error::QueryReturnedNoRows), None);
    }
}
