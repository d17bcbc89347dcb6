//! MongoDB adapter.
//!
//! A unique index on `votes {poll_id, user_id}` is the admission primitive:
//! the second insert for a pair fails with a duplicate key error (code 11000).
//! Polls are stored as one document embedding their options.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{doc, Bson, Document};
use mongodb::error::{Error as MongoError, ErrorKind, WriteFailure};
use mongodb::options::{ClientOptions, IndexOptions};
use mongodb::{Client, Collection, Database, IndexModel};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use pollstore_core::{
    Fault, OptionId, PollId, PollSeed, Tally, User, UserId, VoteOutcome, VoteStore,
};

use crate::config::MongoConfig;

const POLLS: &str = "polls";
const USERS: &str = "users";
const VOTES: &str = "votes";

const DUPLICATE_KEY: i32 = 11000;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PollDocument {
    #[serde(rename = "_id")]
    id: i64,
    question: String,
    options: Vec<OptionDocument>,
}

impl PollDocument {
    fn has_option(&self, option: &OptionId) -> bool {
        self.options.iter().any(|o| o.id == option.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OptionDocument {
    id: String,
    label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UserDocument {
    #[serde(rename = "_id")]
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VoteDocument {
    poll_id: i64,
    user_id: String,
    option_id: String,
}

/// MongoDB-backed vote store.
#[derive(Clone)]
pub struct MongoStore {
    db: Database,
    polls: Collection<PollDocument>,
    users: Collection<UserDocument>,
    votes: Collection<VoteDocument>,
}

impl MongoStore {
    /// Connect, verify the server answers, and ensure the unique vote index.
    pub async fn connect(config: &MongoConfig) -> Result<Self, Fault> {
        let mut options = ClientOptions::parse(&config.uri)
            .await
            .map_err(|e| Fault::BackendUnavailable(format!("invalid mongodb uri: {}", e)))?;
        options.server_selection_timeout = Some(config.server_selection_timeout);
        options.app_name = Some("pollstore".to_string());

        let client = Client::with_options(options).map_err(map_err)?;
        let db = client.database(&config.database);

        db.run_command(doc! { "ping": 1 }).await.map_err(map_err)?;
        info!(uri = %config.uri, database = %config.database, "connected to mongodb");

        let store = Self {
            polls: db.collection(POLLS),
            users: db.collection(USERS),
            votes: db.collection(VOTES),
            db,
        };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> Result<(), Fault> {
        let index = IndexModel::builder()
            .keys(doc! { "poll_id": 1, "user_id": 1 })
            .options(
                IndexOptions::builder()
                    .unique(true)
                    .name("one_vote_per_user".to_string())
                    .build(),
            )
            .build();
        self.votes.create_index(index).await.map_err(map_err)?;
        Ok(())
    }

    async fn find_poll(&self, poll: PollId) -> Result<Option<PollDocument>, Fault> {
        self.polls
            .find_one(doc! { "_id": poll.get() })
            .await
            .map_err(map_err)
    }
}

fn is_duplicate_key(err: &MongoError) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(e)) if e.code == DUPLICATE_KEY
    )
}

fn map_err(err: MongoError) -> Fault {
    match err.kind.as_ref() {
        ErrorKind::ServerSelection { .. } | ErrorKind::Io(_) | ErrorKind::DnsResolve { .. } => {
            Fault::BackendUnavailable(err.to_string())
        }
        _ => Fault::Engine(err.to_string()),
    }
}

fn count_from(bson: Option<&Bson>) -> u64 {
    match bson {
        Some(Bson::Int32(n)) => (*n).max(0) as u64,
        Some(Bson::Int64(n)) => (*n).max(0) as u64,
        _ => 0,
    }
}

#[async_trait]
impl VoteStore for MongoStore {
    fn name(&self) -> &'static str {
        "mongodb"
    }

    async fn reset(&self) -> Result<(), Fault> {
        self.votes.drop().await.map_err(map_err)?;
        self.polls.drop().await.map_err(map_err)?;
        self.users.drop().await.map_err(map_err)?;
        self.ensure_indexes().await?;
        info!(backend = "mongodb", database = %self.db.name(), "collections dropped");
        Ok(())
    }

    async fn seed(&self, seed: &PollSeed) -> Result<(), Fault> {
        let poll = PollDocument {
            id: seed.poll.id.get(),
            question: seed.poll.question.clone(),
            options: seed
                .options
                .iter()
                .map(|o| OptionDocument {
                    id: o.id.to_string(),
                    label: o.label.clone(),
                })
                .collect(),
        };
        self.polls
            .replace_one(doc! { "_id": poll.id }, &poll)
            .upsert(true)
            .await
            .map_err(map_err)?;

        for user in &seed.users {
            let document = UserDocument {
                id: user.id.to_string(),
                name: user.name.clone(),
            };
            self.users
                .replace_one(doc! { "_id": document.id.as_str() }, &document)
                .upsert(true)
                .await
                .map_err(map_err)?;
        }

        info!(
            backend = "mongodb",
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
        match self.find_poll(poll).await? {
            Some(document) if document.has_option(option) => {}
            _ => return Err(Fault::unknown_option(poll, option)),
        }

        let vote = VoteDocument {
            poll_id: poll.get(),
            user_id: user.to_string(),
            option_id: option.to_string(),
        };

        match self.votes.insert_one(&vote).await {
            Ok(_) => {
                debug!(backend = "mongodb", %poll, %user, %option, "vote accepted");
                Ok(VoteOutcome::Accepted)
            }
            Err(e) if is_duplicate_key(&e) => {
                debug!(backend = "mongodb", %poll, %user, "duplicate vote rejected");
                Ok(VoteOutcome::ALREADY_VOTED)
            }
            Err(e) => Err(map_err(e)),
        }
    }

    async fn tally(&self, poll: PollId) -> Result<Tally, Fault> {
        let document = self
            .find_poll(poll)
            .await?
            .ok_or_else(|| Fault::unknown_poll(poll))?;

        let pipeline = vec![
            doc! { "$match": { "poll_id": poll.get() } },
            doc! { "$group": { "_id": "$option_id", "votes": { "$sum": 1 } } },
        ];
        let grouped: Vec<Document> = self
            .votes
            .aggregate(pipeline)
            .await
            .map_err(map_err)?
            .try_collect()
            .await
            .map_err(map_err)?;

        let mut counts: HashMap<String, u64> = grouped
            .iter()
            .filter_map(|d| {
                d.get_str("_id")
                    .ok()
                    .map(|option| (option.to_string(), count_from(d.get("votes"))))
            })
            .collect();

        Ok(Tally::ranked(
            poll,
            document.options.into_iter().map(|o| {
                let votes = counts.remove(&o.id).unwrap_or(0);
                (o.id, votes)
            }),
        ))
    }

    async fn voters(&self, poll: PollId, option: &OptionId) -> Result<Vec<User>, Fault> {
        match self.find_poll(poll).await? {
            Some(document) if document.has_option(option) => {}
            _ => return Err(Fault::unknown_option(poll, option)),
        }

        let votes: Vec<VoteDocument> = self
            .votes
            .find(doc! { "poll_id": poll.get(), "option_id": option.as_str() })
            .sort(doc! { "user_id": 1 })
            .await
            .map_err(map_err)?
            .try_collect()
            .await
            .map_err(map_err)?;

        let ids: Vec<&str> = votes.iter().map(|v| v.user_id.as_str()).collect();
        let names: HashMap<String, Option<String>> = self
            .users
            .find(doc! { "_id": { "$in": ids } })
            .await
            .map_err(map_err)?
            .try_collect::<Vec<_>>()
            .await
            .map_err(map_err)?
            .into_iter()
            .map(|u| (u.id, u.name))
            .collect();

        Ok(votes
            .into_iter()
            .map(|v| {
                let name = names.get(&v.user_id).cloned().flatten();
                User {
                    id: UserId::new(v.user_id),
                    name,
                }
            })
            .collect())
    }
}
