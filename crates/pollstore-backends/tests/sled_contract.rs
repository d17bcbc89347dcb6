//! Vote contract tests for the sled adapter.

use std::sync::Arc;

use pollstore_backends::{SledConfig, SledStore};
use pollstore_core::conformance;
use pollstore_core::VoteStore;

#[tokio::test]
async fn test_contract_temporary() {
    let store = SledStore::temporary().unwrap();
    conformance::run_all(&store).await;
}

#[tokio::test]
async fn test_contract_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let store = SledStore::open(&SledConfig::new(dir.path().join("kv"))).unwrap();
    conformance::run_all(&store).await;
    store.flush().await.unwrap();
}

#[tokio::test]
async fn test_random_distributions() {
    let store = SledStore::temporary().unwrap();
    for seed in [1, 7, 2024] {
        conformance::random_distribution(&store, seed).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicates() {
    let store: Arc<dyn VoteStore> = Arc::new(SledStore::temporary().unwrap());
    let handles = (0..16).map(|_| Arc::clone(&store)).collect();

    conformance::concurrent_duplicates(handles).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicates_on_cloned_handles() {
    let store = SledStore::temporary().unwrap();
    let handles = (0..16)
        .map(|_| Arc::new(store.clone()) as Arc<dyn VoteStore>)
        .collect();

    conformance::concurrent_duplicates(handles).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_distinct_users() {
    let store = Arc::new(SledStore::temporary().unwrap());
    conformance::concurrent_distinct_users(store, 100).await;
}
