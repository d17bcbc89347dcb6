//! Vote contract and follow-graph tests for the SQLite adapter.

use std::sync::Arc;

use pollstore_backends::{SqliteConfig, SqliteStore};
use pollstore_core::conformance;
use pollstore_core::{PollId, PollSeed, UserId, VoteOutcome, VoteStore};

struct TestContext {
    config: SqliteConfig,
    _dir: tempfile::TempDir,
}

impl TestContext {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = SqliteConfig::file(dir.path().join("polls.db"));
        Self { config, _dir: dir }
    }

    fn open(&self) -> SqliteStore {
        SqliteStore::open(&self.config).unwrap()
    }
}

#[tokio::test]
async fn test_contract_in_memory() {
    let store = SqliteStore::open_in_memory().unwrap();
    conformance::run_all(&store).await;
}

#[tokio::test]
async fn test_contract_on_file() {
    let ctx = TestContext::new();
    conformance::run_all(&ctx.open()).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicates_across_connections() {
    let ctx = TestContext::new();
    let handles: Vec<Arc<dyn VoteStore>> = (0..8)
        .map(|_| Arc::new(ctx.open()) as Arc<dyn VoteStore>)
        .collect();

    conformance::concurrent_duplicates(handles).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicates_on_shared_connection() {
    let store: Arc<dyn VoteStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
    let handles = (0..8).map(|_| Arc::clone(&store)).collect();

    conformance::concurrent_duplicates(handles).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_distinct_users() {
    let ctx = TestContext::new();
    conformance::concurrent_distinct_users(Arc::new(ctx.open()), 50).await;
}

#[tokio::test]
async fn test_votes_visible_to_other_connections() {
    let ctx = TestContext::new();
    let writer = ctx.open();
    let reader = ctx.open();

    writer.reset().await.unwrap();
    writer.seed(&PollSeed::demo()).await.unwrap();
    writer
        .cast_vote(PollId(1), &UserId::from(105u64), &"C".into())
        .await
        .unwrap();

    assert_eq!(
        reader
            .cast_vote(PollId(1), &UserId::from(105u64), &"A".into())
            .await
            .unwrap(),
        VoteOutcome::ALREADY_VOTED
    );
    assert_eq!(
        reader.tally(PollId(1)).await.unwrap().pairs(),
        vec![("C", 1), ("A", 0), ("B", 0)]
    );
}

#[tokio::test]
async fn test_social_queries() {
    let store = SqliteStore::open_in_memory().unwrap();
    conformance::social_demo_queries(&store).await;
}

#[tokio::test]
async fn test_social_graph_independent_of_votes() {
    let ctx = TestContext::new();
    let store = ctx.open();
    conformance::social_demo_queries(&store).await;

    // Resetting the vote tables leaves the network in place.
    store.reset().await.unwrap();
    let following = pollstore_core::SocialGraph::following(&store, 1).await.unwrap();
    assert_eq!(following.len(), 2);
}
