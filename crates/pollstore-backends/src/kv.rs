//! Embedded key-value adapter on sled.
//!
//! Admission, counter increment and voter-set insert run in one multi-tree
//! sled transaction. sled transactions are serializable, so two callers racing
//! on the same `(poll, user)` key cannot both see it absent.

use async_trait::async_trait;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Transactional, Tree};
use tracing::{debug, info};

use pollstore_core::{
    Fault, OptionId, PollId, PollSeed, Tally, User, UserId, VoteOutcome, VoteStore,
};

use crate::config::SledConfig;

/// poll -> question
const POLLS_TREE: &str = "polls";

/// poll ++ option -> label
const OPTIONS_TREE: &str = "options";

/// user -> JSON display name
const USERS_TREE: &str = "users";

/// poll ++ user -> option. The admission record.
const VOTERS_TREE: &str = "voters";

/// poll ++ option -> u64 count
const COUNTERS_TREE: &str = "counters";

/// poll ++ u32 option length ++ option ++ user -> empty
const OPTION_VOTERS_TREE: &str = "option_voters";

/// sled-backed vote store.
#[derive(Clone)]
pub struct SledStore {
    db: Db,
    polls: Tree,
    options: Tree,
    users: Tree,
    voters: Tree,
    counters: Tree,
    option_voters: Tree,
}

impl SledStore {
    /// Open or create the database described by `config`.
    pub fn open(config: &SledConfig) -> Result<Self, Fault> {
        let db = config
            .to_sled_config()
            .open()
            .map_err(|e| Fault::BackendUnavailable(format!("failed to open sled database: {}", e)))?;

        let open_tree = |name: &str| db.open_tree(name).map_err(map_err);

        Ok(Self {
            polls: open_tree(POLLS_TREE)?,
            options: open_tree(OPTIONS_TREE)?,
            users: open_tree(USERS_TREE)?,
            voters: open_tree(VOTERS_TREE)?,
            counters: open_tree(COUNTERS_TREE)?,
            option_voters: open_tree(OPTION_VOTERS_TREE)?,
            db,
        })
    }

    /// Open a temporary database, removed when the last handle drops.
    pub fn temporary() -> Result<Self, Fault> {
        Self::open(&SledConfig::temporary())
    }

    /// Flush all trees to disk.
    pub async fn flush(&self) -> Result<(), Fault> {
        self.db.flush_async().await.map_err(map_err)?;
        Ok(())
    }

    fn poll_exists(&self, poll: PollId) -> Result<bool, Fault> {
        self.polls.contains_key(poll_key(poll)).map_err(map_err)
    }
}

fn map_err(err: sled::Error) -> Fault {
    match err {
        sled::Error::Io(e) => Fault::BackendUnavailable(e.to_string()),
        other => Fault::Engine(other.to_string()),
    }
}

fn poll_key(poll: PollId) -> [u8; 8] {
    poll.get().to_be_bytes()
}

fn option_key(poll: PollId, option: &OptionId) -> Vec<u8> {
    let mut key = poll_key(poll).to_vec();
    key.extend_from_slice(option.as_str().as_bytes());
    key
}

fn voter_key(poll: PollId, user: &UserId) -> Vec<u8> {
    let mut key = poll_key(poll).to_vec();
    key.extend_from_slice(user.as_str().as_bytes());
    key
}

/// Prefix of every `option_voters` entry for one option.
///
/// The option id is length-prefixed so no user id can extend one option's
/// prefix into another's.
fn option_voters_prefix(poll: PollId, option: &OptionId) -> Vec<u8> {
    let id = option.as_str().as_bytes();
    let mut key = poll_key(poll).to_vec();
    key.extend_from_slice(&(id.len() as u32).to_be_bytes());
    key.extend_from_slice(id);
    key
}

fn decode_count(bytes: &[u8]) -> Result<u64, Fault> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| Fault::Engine(format!("corrupt counter of {} bytes", bytes.len())))?;
    Ok(u64::from_be_bytes(raw))
}

fn decode_utf8(bytes: &[u8], what: &str) -> Result<String, Fault> {
    String::from_utf8(bytes.to_vec()).map_err(|e| Fault::Engine(format!("corrupt {}: {}", what, e)))
}

#[async_trait]
impl VoteStore for SledStore {
    fn name(&self) -> &'static str {
        "sled"
    }

    async fn reset(&self) -> Result<(), Fault> {
        for tree in [
            &self.polls,
            &self.options,
            &self.users,
            &self.voters,
            &self.counters,
            &self.option_voters,
        ] {
            tree.clear().map_err(map_err)?;
        }
        info!(backend = "sled", "all trees cleared");
        Ok(())
    }

    async fn seed(&self, seed: &PollSeed) -> Result<(), Fault> {
        let poll = seed.poll_id();
        let names = seed
            .users
            .iter()
            .map(|user| {
                serde_json::to_vec(&user.name)
                    .map(|name| (user.id.as_str().as_bytes().to_vec(), name))
                    .map_err(|e| Fault::Engine(format!("failed to encode user: {}", e)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let result: Result<(), TransactionError<Fault>> = (&self.polls, &self.options, &self.users)
            .transaction(|(polls, options, users)| {
                polls.insert(&poll_key(poll)[..], seed.poll.question.as_bytes())?;
                for option in &seed.options {
                    options.insert(option_key(poll, &option.id), option.label.as_bytes())?;
                }
                for (id, name) in &names {
                    users.insert(id.as_slice(), name.as_slice())?;
                }
                Ok(())
            });

        match result {
            Ok(()) => {
                info!(
                    backend = "sled",
                    poll = %poll,
                    options = seed.options.len(),
                    users = seed.users.len(),
                    "poll seeded"
                );
                Ok(())
            }
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(e)) => Err(map_err(e)),
        }
    }

    async fn cast_vote(
        &self,
        poll: PollId,
        user: &UserId,
        option: &OptionId,
    ) -> Result<VoteOutcome, Fault> {
        let option_key = option_key(poll, option);
        let voter_key = voter_key(poll, user);
        let mut member_key = option_voters_prefix(poll, option);
        member_key.extend_from_slice(user.as_str().as_bytes());

        let result: Result<VoteOutcome, TransactionError<Fault>> = (
            &self.options,
            &self.voters,
            &self.counters,
            &self.option_voters,
        )
            .transaction(|(options, voters, counters, option_voters)| {
                if options.get(&option_key)?.is_none() {
                    return Err(ConflictableTransactionError::Abort(Fault::unknown_option(
                        poll, option,
                    )));
                }

                if voters.get(&voter_key)?.is_some() {
                    return Ok(VoteOutcome::ALREADY_VOTED);
                }

                let count = match counters.get(&option_key)? {
                    Some(bytes) => decode_count(&bytes).map_err(ConflictableTransactionError::Abort)?,
                    None => 0,
                };

                voters.insert(voter_key.as_slice(), option.as_str().as_bytes())?;
                counters.insert(option_key.as_slice(), (count + 1).to_be_bytes().to_vec())?;
                option_voters.insert(member_key.as_slice(), b"".as_slice())?;
                Ok(VoteOutcome::Accepted)
            });

        match result {
            Ok(outcome) => {
                debug!(backend = "sled", %poll, %user, %option, %outcome, "vote processed");
                Ok(outcome)
            }
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(e)) => Err(map_err(e)),
        }
    }

    async fn tally(&self, poll: PollId) -> Result<Tally, Fault> {
        if !self.poll_exists(poll)? {
            return Err(Fault::unknown_poll(poll));
        }

        let mut counts = Vec::new();
        for entry in self.options.scan_prefix(poll_key(poll)) {
            let (key, _label) = entry.map_err(map_err)?;
            let option = decode_utf8(&key[8..], "option id")?;
            let votes = match self.counters.get(&key).map_err(map_err)? {
                Some(bytes) => decode_count(&bytes)?,
                None => 0,
            };
            counts.push((option, votes));
        }

        Ok(Tally::ranked(poll, counts))
    }

    async fn voters(&self, poll: PollId, option: &OptionId) -> Result<Vec<User>, Fault> {
        if !self
            .options
            .contains_key(option_key(poll, option))
            .map_err(map_err)?
        {
            return Err(Fault::unknown_option(poll, option));
        }

        let prefix = option_voters_prefix(poll, option);
        let mut users = Vec::new();
        for entry in self.option_voters.scan_prefix(&prefix) {
            let (key, _) = entry.map_err(map_err)?;
            let id = UserId::new(decode_utf8(&key[prefix.len()..], "user id")?);
            let name = match self.users.get(id.as_str()).map_err(map_err)? {
                Some(bytes) => serde_json::from_slice::<Option<String>>(&bytes)
                    .map_err(|e| Fault::Engine(format!("corrupt user record: {}", e)))?,
                None => None,
            };
            users.push(User { id, name });
        }

        Ok(users)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_option_voters_prefix_is_unambiguous() {
        let a = option_voters_prefix(PollId(1), &"A".into());
        let ab = option_voters_prefix(PollId(1), &"AB".into());
        assert!(!ab.starts_with(&a));
        assert_eq!(&a[..8], &1i64.to_be_bytes());
    }

    #[tokio::test]
    async fn test_voters_do_not_leak_across_options_sharing_a_prefix() {
        let store = SledStore::temporary().unwrap();
        let seed = PollSeed::new(PollId(7), "Separator?")
            .with_option("A", "Plain")
            .with_option("A\u{0}b", "With separator");
        store.seed(&seed).await.unwrap();

        let outcome = store
            .cast_vote(PollId(7), &"u1".into(), &"A\u{0}b".into())
            .await
            .unwrap();
        assert!(outcome.is_accepted());

        assert!(store.voters(PollId(7), &"A".into()).await.unwrap().is_empty());
        let voters = store.voters(PollId(7), &"A\u{0}b".into()).await.unwrap();
        assert_eq!(voters.len(), 1);
        assert_eq!(voters[0].id.as_str(), "u1");
    }

    #[tokio::test]
    async fn test_uncompressed_database() {
        let store = SledStore::open(&SledConfig::temporary().with_compression(false)).unwrap();
        store.seed(&PollSeed::demo()).await.unwrap();
        store
            .cast_vote(PollId(1), &"101".into(), &"B".into())
            .await
            .unwrap();
        assert_eq!(
            store.tally(PollId(1)).await.unwrap().pairs(),
            vec![("B", 1), ("A", 0), ("C", 0)]
        );
    }

    #[test]
    fn test_decode_count_rejects_short_values() {
        assert_eq!(decode_count(&7u64.to_be_bytes()), Ok(7));
        assert!(matches!(decode_count(&[1, 2]), Err(Fault::Engine(_))));
    }

    #[tokio::test]
    async fn test_counters_and_voter_sets_move_together() {
        let store = SledStore::temporary().unwrap();
        store.seed(&PollSeed::demo()).await.unwrap();

        let user = UserId::from(104u64);
        store.cast_vote(PollId(1), &user, &"C".into()).await.unwrap();
        store.cast_vote(PollId(1), &user, &"A".into()).await.unwrap();

        let counter = store
            .counters
            .get(option_key(PollId(1), &"C".into()))
            .unwrap()
            .unwrap();
        assert_eq!(decode_count(&counter).unwrap(), 1);
        assert!(store
            .counters
            .get(option_key(PollId(1), &"A".into()))
            .unwrap()
            .is_none());
        assert_eq!(store.voters.len(), 1);
        assert_eq!(store.option_voters.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_option_aborts_without_writes() {
        let store = SledStore::temporary().unwrap();
        store.seed(&PollSeed::demo()).await.unwrap();

        let err = store
            .cast_vote(PollId(1), &UserId::from(101u64), &"Z".into())
            .await
            .unwrap_err();
        assert!(matches!(err, Fault::SchemaViolation(_)));
        assert!(store.voters.is_empty());
        assert!(store.counters.is_empty());
    }

    #[tokio::test]
    async fn test_reopen_keeps_votes() {
        let dir = tempfile::tempdir().unwrap();
        let config = SledConfig::new(dir.path().join("kv"));
        {
            let store = SledStore::open(&config).unwrap();
            store.seed(&PollSeed::demo()).await.unwrap();
            store
                .cast_vote(PollId(1), &UserId::from(101u64), &"B".into())
                .await
                .unwrap();
            store.flush().await.unwrap();
        }

        let store = SledStore::open(&config).unwrap();
        let tally = store.tally(PollId(1)).await.unwrap();
        assert_eq!(tally.pairs(), vec![("B", 1), ("A", 0), ("C", 0)]);
        assert_eq!(
            store
                .cast_vote(PollId(1), &UserId::from(101u64), &"A".into())
                .await
                .unwrap(),
            VoteOutcome::ALREADY_VOTED
        );
    }
}
