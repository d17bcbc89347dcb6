//! Behavioural checks every [`VoteStore`] must pass.
//!
//! Backends call these from their integration tests. Each check resets and
//! seeds the store itself and panics with a descriptive message on failure.

use std::collections::BTreeMap;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::Barrier;

use crate::error::Fault;
use crate::seed::{PollSeed, DEMO_POLL_ID};
use crate::social::SocialGraph;
use crate::store::VoteStore;
use crate::tally::Tally;
use crate::types::{OptionId, PollId, Rejection, UserId, VoteOutcome};

async fn fresh(store: &dyn VoteStore, seed: &PollSeed) {
    store.reset().await.expect("reset failed");
    store.seed(seed).await.expect("seed failed");
}

async fn vote(store: &dyn VoteStore, poll: PollId, user: u64, option: &str) -> VoteOutcome {
    store
        .cast_vote(poll, &UserId::from(user), &OptionId::from(option))
        .await
        .unwrap_or_else(|e| panic!("{}: cast_vote({}, {}) failed: {}", store.name(), user, option, e))
}

async fn tally(store: &dyn VoteStore, poll: PollId) -> Tally {
    store
        .tally(poll)
        .await
        .unwrap_or_else(|e| panic!("{}: tally failed: {}", store.name(), e))
}

fn assert_ranked(tally: &Tally) {
    for pair in tally.entries().windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        assert!(
            a.votes > b.votes || (a.votes == b.votes && a.option < b.option),
            "tally out of order: {:?} before {:?}",
            a,
            b
        );
    }
}

/// The literal six-vote scenario on poll 1.
pub async fn demo_scenario(store: &dyn VoteStore) {
    fresh(store, &PollSeed::demo()).await;
    let poll = DEMO_POLL_ID;

    let script = [
        (101, "A", VoteOutcome::Accepted),
        (102, "B", VoteOutcome::Accepted),
        (103, "A", VoteOutcome::Accepted),
        (101, "C", VoteOutcome::Rejected(Rejection::AlreadyVoted)),
        (104, "C", VoteOutcome::Accepted),
        (105, "A", VoteOutcome::Accepted),
    ];
    for (user, option, expected) in script {
        assert_eq!(
            vote(store, poll, user, option).await,
            expected,
            "{}: user {} voting {}",
            store.name(),
            user,
            option
        );
    }

    let result = tally(store, poll).await;
    assert_eq!(result.pairs(), vec![("A", 3), ("B", 1), ("C", 1)]);
    assert_eq!(result.total(), 5);

    let voters = store
        .voters(poll, &OptionId::from("A"))
        .await
        .expect("voters failed");
    let ids: Vec<&str> = voters.iter().map(|u| u.id.as_str()).collect();
    assert_eq!(ids, ["101", "103", "105"]);
}

/// First vote accepted, every later vote from the same user rejected.
pub async fn first_vote_wins(store: &dyn VoteStore) {
    fresh(store, &PollSeed::demo()).await;
    let poll = DEMO_POLL_ID;

    assert_eq!(vote(store, poll, 101, "B").await, VoteOutcome::Accepted);
    for option in ["A", "B", "C"] {
        assert_eq!(
            vote(store, poll, 101, option).await,
            VoteOutcome::ALREADY_VOTED,
            "{}: repeat vote for {} must be rejected",
            store.name(),
            option
        );
    }

    let result = tally(store, poll).await;
    assert_eq!(result.votes_for(&"B".into()), Some(1));
    assert_eq!(result.total(), 1);
}

/// Repeating a rejected vote keeps rejecting and never moves the tally.
pub async fn rejection_is_idempotent(store: &dyn VoteStore) {
    fresh(store, &PollSeed::demo()).await;
    let poll = DEMO_POLL_ID;

    assert!(vote(store, poll, 102, "C").await.is_accepted());
    let before = tally(store, poll).await;

    for _ in 0..10 {
        assert_eq!(vote(store, poll, 102, "A").await, VoteOutcome::ALREADY_VOTED);
    }

    assert_eq!(tally(store, poll).await, before);
}

/// Options nobody voted for are still listed with zero votes.
pub async fn tally_lists_untouched_options(store: &dyn VoteStore) {
    fresh(store, &PollSeed::demo()).await;
    let poll = DEMO_POLL_ID;

    let empty = tally(store, poll).await;
    assert_eq!(empty.pairs(), vec![("A", 0), ("B", 0), ("C", 0)]);

    assert!(vote(store, poll, 103, "C").await.is_accepted());
    assert_eq!(
        tally(store, poll).await.pairs(),
        vec![("C", 1), ("A", 0), ("B", 0)]
    );
}

/// Unknown polls and options are schema violations, not rejections.
pub async fn unknown_references_are_schema_violations(store: &dyn VoteStore) {
    fresh(store, &PollSeed::demo()).await;
    let user = UserId::from(101u64);

    let err = store
        .cast_vote(DEMO_POLL_ID, &user, &OptionId::from("Z"))
        .await
        .expect_err("unknown option must fail");
    assert!(matches!(err, Fault::SchemaViolation(_)), "got {:?}", err);

    let err = store
        .cast_vote(PollId(404), &user, &OptionId::from("A"))
        .await
        .expect_err("unknown poll must fail");
    assert!(matches!(err, Fault::SchemaViolation(_)), "got {:?}", err);

    let err = store.tally(PollId(404)).await.expect_err("unknown poll tally");
    assert!(matches!(err, Fault::SchemaViolation(_)), "got {:?}", err);

    // The failed attempts must not have consumed the user's vote.
    assert_eq!(vote(store, DEMO_POLL_ID, 101, "A").await, VoteOutcome::Accepted);
}

/// Voting on one poll does not block voting on another.
pub async fn polls_are_independent(store: &dyn VoteStore) {
    store.reset().await.expect("reset failed");
    let first = PollSeed::new(PollId(1), "First").with_option("A", "A").with_option("B", "B");
    let second = PollSeed::new(PollId(2), "Second").with_option("A", "A").with_option("B", "B");
    store.seed(&first).await.expect("seed failed");
    store.seed(&second).await.expect("seed failed");

    assert!(vote(store, PollId(1), 101, "A").await.is_accepted());
    assert!(vote(store, PollId(2), 101, "B").await.is_accepted());
    assert!(!vote(store, PollId(2), 101, "A").await.is_accepted());

    assert_eq!(tally(store, PollId(1)).await.pairs(), vec![("A", 1), ("B", 0)]);
    assert_eq!(tally(store, PollId(2)).await.pairs(), vec![("B", 1), ("A", 0)]);
}

/// `reset` wipes everything and may be called repeatedly.
pub async fn reset_is_idempotent(store: &dyn VoteStore) {
    fresh(store, &PollSeed::demo()).await;
    assert!(vote(store, DEMO_POLL_ID, 101, "A").await.is_accepted());

    store.reset().await.expect("first reset");
    store.reset().await.expect("second reset");

    let err = store.tally(DEMO_POLL_ID).await.expect_err("poll must be gone");
    assert!(matches!(err, Fault::SchemaViolation(_)), "got {:?}", err);

    store.seed(&PollSeed::demo()).await.expect("reseed");
    assert_eq!(vote(store, DEMO_POLL_ID, 101, "A").await, VoteOutcome::Accepted);
}

/// A pseudo-random stream of votes, duplicates included, against a model.
pub async fn random_distribution(store: &dyn VoteStore, rng_seed: u64) {
    let options = ["A", "B", "C", "D"];
    let seed = options
        .iter()
        .fold(PollSeed::new(PollId(9), "Random"), |s, o| s.with_option(*o, *o));
    fresh(store, &seed).await;

    let mut rng = StdRng::seed_from_u64(rng_seed);
    let mut voted: BTreeMap<u64, &str> = BTreeMap::new();
    let mut expected: BTreeMap<&str, u64> = options.iter().map(|o| (*o, 0)).collect();

    for _ in 0..120 {
        let user = rng.gen_range(1..=60u64);
        let option = options[rng.gen_range(0..options.len())];
        let outcome = vote(store, PollId(9), user, option).await;

        if voted.contains_key(&user) {
            assert_eq!(outcome, VoteOutcome::ALREADY_VOTED, "user {} voted twice", user);
        } else {
            assert_eq!(outcome, VoteOutcome::Accepted, "user {} first vote", user);
            voted.insert(user, option);
            *expected.entry(option).or_default() += 1;
        }
    }

    let result = tally(store, PollId(9)).await;
    assert_ranked(&result);
    assert_eq!(result.total(), voted.len() as u64);
    assert_eq!(result, Tally::ranked(PollId(9), expected));
}

/// `handles.len()` simultaneous callers submit the same pair; exactly one wins.
///
/// Handles may be clones of one store or separate connections to the same
/// underlying database.
pub async fn concurrent_duplicates(handles: Vec<Arc<dyn VoteStore>>) {
    assert!(handles.len() > 1, "need at least two callers");
    let first = Arc::clone(&handles[0]);
    fresh(first.as_ref(), &PollSeed::demo()).await;

    let barrier = Arc::new(Barrier::new(handles.len()));
    let options = ["A", "B", "C"];
    let tasks: Vec<_> = handles
        .into_iter()
        .enumerate()
        .map(|(i, store)| {
            let barrier = Arc::clone(&barrier);
            let option = OptionId::from(options[i % options.len()]);
            tokio::spawn(async move {
                barrier.wait().await;
                store
                    .cast_vote(DEMO_POLL_ID, &UserId::from(777u64), &option)
                    .await
            })
        })
        .collect();

    let mut accepted = 0;
    let mut rejected = 0;
    for task in tasks {
        match task.await.expect("task panicked") {
            Ok(VoteOutcome::Accepted) => accepted += 1,
            Ok(VoteOutcome::Rejected(Rejection::AlreadyVoted)) => rejected += 1,
            Err(e) => panic!("{}: concurrent cast_vote failed: {}", first.name(), e),
        }
    }

    assert_eq!(accepted, 1, "{}: exactly one caller must win", first.name());
    assert!(rejected >= 1);
    assert_eq!(tally(first.as_ref(), DEMO_POLL_ID).await.total(), 1);
}

/// Many distinct users voting at once are all counted.
pub async fn concurrent_distinct_users(store: Arc<dyn VoteStore>, users: u64) {
    fresh(store.as_ref(), &PollSeed::demo()).await;

    let tasks: Vec<_> = (0..users)
        .map(|user| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .cast_vote(DEMO_POLL_ID, &UserId::from(1_000 + user), &OptionId::from("B"))
                    .await
            })
        })
        .collect();

    for task in tasks {
        let outcome = task.await.expect("task panicked").expect("cast_vote failed");
        assert_eq!(outcome, VoteOutcome::Accepted);
    }

    let result = tally(store.as_ref(), DEMO_POLL_ID).await;
    assert_eq!(result.votes_for(&"B".into()), Some(users));
}

/// Run every single-handle check in sequence.
pub async fn run_all(store: &dyn VoteStore) {
    demo_scenario(store).await;
    first_vote_wins(store).await;
    rejection_is_idempotent(store).await;
    tally_lists_untouched_options(store).await;
    unknown_references_are_schema_violations(store).await;
    polls_are_independent(store).await;
    reset_is_idempotent(store).await;
    random_distribution(store, 42).await;
}

/// The three demo queries over [`crate::SocialSeed::demo`].
pub async fn social_demo_queries(graph: &dyn SocialGraph) {
    graph.reset_network().await.expect("reset_network failed");
    let seed = crate::social::SocialSeed::demo();
    graph.load_network(&seed).await.expect("load_network failed");
    // Loading twice must not duplicate edges.
    graph.load_network(&seed).await.expect("second load_network failed");

    let names = |members: Vec<crate::social::Member>| -> Vec<String> {
        members.into_iter().map(|m| m.full_name).collect()
    };

    assert_eq!(
        names(graph.following(1).await.expect("following")),
        ["Bob Marley", "Charlie Brown"]
    );
    assert_eq!(
        names(graph.followers(4).await.expect("followers")),
        ["Bob Marley", "Charlie Brown"]
    );
    assert_eq!(
        names(graph.suggestions(1).await.expect("suggestions")),
        ["Diana Prince"]
    );
    assert_eq!(
        names(graph.suggestions(4).await.expect("suggestions")),
        Vec::<String>::new()
    );
    assert!(graph.followers(99).await.expect("followers").is_empty());
}
