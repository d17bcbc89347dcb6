//! Neo4j adapter.
//!
//! A vote is a `VOTED` relationship from a `Voter` to a `PollOption`. A
//! relationship uniqueness constraint on `VOTED.key` (`"{poll}:{user}"`) makes
//! the engine refuse a second vote edge for the same pair; the match on the
//! option and the create run as one auto-commit statement.
//!
//! The same database also holds the follow graph (`Member` nodes and
//! `FOLLOWS` relationships).

use async_trait::async_trait;
use neo4rs::{query, Graph, Query, Row};
use tracing::{debug, info};

use pollstore_core::social::sort_members;
use pollstore_core::{
    Fault, Member, MemberId, OptionId, PollId, PollSeed, SocialGraph, SocialSeed, Tally, User,
    UserId, VoteOutcome, VoteStore,
};

use crate::config::Neo4jConfig;

const CONSTRAINTS: [&str; 3] = [
    "CREATE CONSTRAINT vote_once IF NOT EXISTS FOR ()-[v:VOTED]-() REQUIRE v.key IS UNIQUE",
    "CREATE CONSTRAINT voter_id IF NOT EXISTS FOR (u:Voter) REQUIRE u.id IS UNIQUE",
    "CREATE CONSTRAINT member_id IF NOT EXISTS FOR (m:Member) REQUIRE m.id IS UNIQUE",
];

const CAST_VOTE: &str = "
    MATCH (:Poll {id: $poll})-[:HAS_OPTION]->(o:PollOption {id: $option})
    MERGE (u:Voter {id: $user})
    CREATE (u)-[:VOTED {key: $key, poll_id: $poll}]->(o)
    RETURN count(*) AS created";

const MEMBER_COLUMNS: &str = "m.id AS id, m.username AS username, m.full_name AS full_name";

/// Neo4j-backed vote store and follow graph.
#[derive(Clone)]
pub struct Neo4jStore {
    graph: Graph,
}

impl Neo4jStore {
    /// Connect and install the uniqueness constraints.
    pub async fn connect(config: &Neo4jConfig) -> Result<Self, Fault> {
        let graph = Graph::new(&config.uri, &config.user, &config.password)
            .await
            .map_err(|e| Fault::BackendUnavailable(format!("failed to connect to neo4j: {}", e)))?;

        for constraint in CONSTRAINTS {
            graph.run(query(constraint)).await.map_err(map_err)?;
        }
        info!(uri = %config.uri, "connected to neo4j");

        Ok(Self { graph })
    }

    async fn rows(&self, q: Query) -> Result<Vec<Row>, Fault> {
        let mut stream = self.graph.execute(q).await.map_err(map_err)?;
        let mut rows = Vec::new();
        while let Some(row) = stream.next().await.map_err(map_err)? {
            rows.push(row);
        }
        Ok(rows)
    }

    async fn single_count(&self, q: Query, column: &str) -> Result<i64, Fault> {
        match self.rows(q).await?.first() {
            Some(row) => get(row, column),
            None => Ok(0),
        }
    }

    async fn members(&self, q: Query) -> Result<Vec<Member>, Fault> {
        let mut members = self
            .rows(q)
            .await?
            .iter()
            .map(|row| {
                Ok(Member {
                    id: get(row, "id")?,
                    username: get(row, "username")?,
                    full_name: get(row, "full_name")?,
                })
            })
            .collect::<Result<Vec<_>, Fault>>()?;
        sort_members(&mut members);
        Ok(members)
    }
}

fn get<T>(row: &Row, column: &str) -> Result<T, Fault>
where
    T: for<'de> serde::Deserialize<'de>,
{
    row.get::<T>(column)
        .map_err(|e| Fault::Engine(format!("bad column {}: {}", column, e)))
}

fn is_vote_conflict(err: &neo4rs::Error) -> bool {
    match err {
        neo4rs::Error::Neo4j(e) => violates_vote_once(e.code(), e.message()),
        _ => false,
    }
}

/// Only a `vote_once` failure is a duplicate vote; `voter_id` and other
/// constraint failures stay faults.
fn violates_vote_once(code: &str, message: &str) -> bool {
    code.ends_with("ConstraintValidationFailed")
        && (message.contains("vote_once")
            || (message.contains("`VOTED`") && message.contains("`key`")))
}

fn map_err(err: neo4rs::Error) -> Fault {
    match err {
        neo4rs::Error::IOError { .. } => Fault::BackendUnavailable(err.to_string()),
        other => Fault::Engine(other.to_string()),
    }
}

fn vote_key(poll: PollId, user: &UserId) -> String {
    format!("{}:{}", poll, user)
}

#[async_trait]
impl VoteStore for Neo4jStore {
    fn name(&self) -> &'static str {
        "neo4j"
    }

    async fn reset(&self) -> Result<(), Fault> {
        self.graph
            .run(query(
                "MATCH (n) WHERE n:Poll OR n:PollOption OR n:Voter DETACH DELETE n",
            ))
            .await
            .map_err(map_err)?;
        info!(backend = "neo4j", "poll graph cleared");
        Ok(())
    }

    async fn seed(&self, seed: &PollSeed) -> Result<(), Fault> {
        let poll = seed.poll.id.get();
        let mut queries = vec![query("MERGE (p:Poll {id: $poll}) SET p.question = $question")
            .param("poll", poll)
            .param("question", seed.poll.question.as_str())];

        for option in &seed.options {
            queries.push(
                query(
                    "MATCH (p:Poll {id: $poll})
                     MERGE (p)-[:HAS_OPTION]->(o:PollOption {poll_id: $poll, id: $id})
                     SET o.label = $label",
                )
                .param("poll", poll)
                .param("id", option.id.as_str())
                .param("label", option.label.as_str()),
            );
        }

        for user in &seed.users {
            let q = match &user.name {
                Some(name) => query("MERGE (u:Voter {id: $id}) SET u.name = $name")
                    .param("id", user.id.as_str())
                    .param("name", name.as_str()),
                None => query("MERGE (u:Voter {id: $id})").param("id", user.id.as_str()),
            };
            queries.push(q);
        }

        let mut txn = self.graph.start_txn().await.map_err(map_err)?;
        txn.run_queries(queries).await.map_err(map_err)?;
        txn.commit().await.map_err(map_err)?;

        info!(
            backend = "neo4j",
            poll = %seed.poll.id,
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
        let q = query(CAST_VOTE)
            .param("poll", poll.get())
            .param("option", option.as_str())
            .param("user", user.as_str())
            .param("key", vote_key(poll, user));

        let created = match self.graph.execute(q).await {
            Ok(mut stream) => match stream.next().await {
                Ok(Some(row)) => get::<i64>(&row, "created")?,
                Ok(None) => 0,
                Err(e) if is_vote_conflict(&e) => return Ok(VoteOutcome::ALREADY_VOTED),
                Err(e) => return Err(map_err(e)),
            },
            Err(e) if is_vote_conflict(&e) => return Ok(VoteOutcome::ALREADY_VOTED),
            Err(e) => return Err(map_err(e)),
        };

        if created == 0 {
            return Err(Fault::unknown_option(poll, option));
        }
        debug!(backend = "neo4j", %poll, %user, %option, "vote accepted");
        Ok(VoteOutcome::Accepted)
    }

    async fn tally(&self, poll: PollId) -> Result<Tally, Fault> {
        let polls = self
            .single_count(
                query("MATCH (p:Poll {id: $poll}) RETURN count(p) AS polls").param("poll", poll.get()),
                "polls",
            )
            .await?;
        if polls == 0 {
            return Err(Fault::unknown_poll(poll));
        }

        let rows = self
            .rows(
                query(
                    "MATCH (:Poll {id: $poll})-[:HAS_OPTION]->(o:PollOption)
                     OPTIONAL MATCH (:Voter)-[v:VOTED]->(o)
                     RETURN o.id AS option, count(v) AS votes",
                )
                .param("poll", poll.get()),
            )
            .await?;

        let counts = rows
            .iter()
            .map(|row| {
                let option: String = get(row, "option")?;
                let votes: i64 = get(row, "votes")?;
                Ok((option, votes.max(0) as u64))
            })
            .collect::<Result<Vec<_>, Fault>>()?;

        Ok(Tally::ranked(poll, counts))
    }

    async fn voters(&self, poll: PollId, option: &OptionId) -> Result<Vec<User>, Fault> {
        let rows = self
            .rows(
                query(
                    "MATCH (:Poll {id: $poll})-[:HAS_OPTION]->(o:PollOption {id: $option})
                     OPTIONAL MATCH (u:Voter)-[:VOTED]->(o)
                     RETURN u.id AS id, u.name AS name
                     ORDER BY id",
                )
                .param("poll", poll.get())
                .param("option", option.as_str()),
            )
            .await?;

        if rows.is_empty() {
            return Err(Fault::unknown_option(poll, option));
        }

        let mut users = Vec::new();
        for row in &rows {
            // A single all-null row means the option exists without voters.
            if let Some(id) = get::<Option<String>>(row, "id")? {
                users.push(User {
                    id: UserId::new(id),
                    name: get(row, "name")?,
                });
            }
        }
        Ok(users)
    }
}

#[async_trait]
impl SocialGraph for Neo4jStore {
    async fn reset_network(&self) -> Result<(), Fault> {
        self.graph
            .run(query("MATCH (m:Member) DETACH DELETE m"))
            .await
            .map_err(map_err)
    }

    async fn load_network(&self, seed: &SocialSeed) -> Result<(), Fault> {
        for member in &seed.members {
            self.graph
                .run(
                    query("MERGE (m:Member {id: $id}) SET m.username = $username, m.full_name = $full_name")
                        .param("id", member.id)
                        .param("username", member.username.as_str())
                        .param("full_name", member.full_name.as_str()),
                )
                .await
                .map_err(map_err)?;
        }

        for edge in &seed.edges {
            let linked = self
                .single_count(
                    query(
                        "MATCH (a:Member {id: $follower}), (b:Member {id: $followed})
                         MERGE (a)-[:FOLLOWS]->(b)
                         RETURN count(*) AS linked",
                    )
                    .param("follower", edge.follower)
                    .param("followed", edge.followed),
                    "linked",
                )
                .await?;
            if linked == 0 {
                return Err(Fault::SchemaViolation(format!(
                    "edge {} -> {} references an unknown member",
                    edge.follower, edge.followed
                )));
            }
        }

        info!(
            backend = "neo4j",
            members = seed.members.len(),
            edges = seed.edges.len(),
            "network loaded"
        );
        Ok(())
    }

    async fn following(&self, member: MemberId) -> Result<Vec<Member>, Fault> {
        self.members(
            query(&format!(
                "MATCH (:Member {{id: $id}})-[:FOLLOWS]->(m:Member) RETURN {}",
                MEMBER_COLUMNS
            ))
            .param("id", member),
        )
        .await
    }

    async fn followers(&self, member: MemberId) -> Result<Vec<Member>, Fault> {
        self.members(
            query(&format!(
                "MATCH (m:Member)-[:FOLLOWS]->(:Member {{id: $id}}) RETURN {}",
                MEMBER_COLUMNS
            ))
            .param("id", member),
        )
        .await
    }

    async fn suggestions(&self, member: MemberId) -> Result<Vec<Member>, Fault> {
        self.members(
            query(&format!(
                "MATCH (me:Member {{id: $id}})-[:FOLLOWS]->(:Member)-[:FOLLOWS]->(m:Member)
                 WHERE m <> me AND NOT (me)-[:FOLLOWS]->(m)
                 RETURN DISTINCT {}",
                MEMBER_COLUMNS
            ))
            .param("id", member),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vote_key_is_per_poll_and_user() {
        assert_eq!(vote_key(PollId(1), &UserId::from(101u64)), "1:101");
        assert_ne!(
            vote_key(PollId(1), &UserId::from(101u64)),
            vote_key(PollId(2), &UserId::from(101u64))
        );
    }

    #[test]
    fn test_only_vote_once_failures_are_duplicates() {
        let code = "Neo.ClientError.Schema.ConstraintValidationFailed";
        assert!(violates_vote_once(
            code,
            "Relationship(42) already exists with type `VOTED` and property `key` = '1:101'"
        ));
        assert!(violates_vote_once(code, "Constraint `vote_once` violated"));
        assert!(!violates_vote_once(
            code,
            "Node(7) already exists with label `Voter` and property `id` = '101'"
        ));
        assert!(!violates_vote_once(
            "Neo.ClientError.Statement.SyntaxError",
            "Relationship already exists with type `VOTED` and property `key`"
        ));
    }

    #[test]
    fn test_member_columns_match_member_fields() {
        for column in ["id", "username", "full_name"] {
            assert!(MEMBER_COLUMNS.contains(&format!("AS {}", column)));
        }
    }
}
