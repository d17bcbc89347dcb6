//! Vote contract and follow-graph tests against a live Neo4j server.
//!
//! Set `POLLSTORE_NEO4J_URI`, and `POLLSTORE_NEO4J_USER` /
//! `POLLSTORE_NEO4J_PASSWORD` if the defaults do not apply.

#![cfg(feature = "neo4j")]

use std::sync::Arc;

use pollstore_backends::{Neo4jConfig, Neo4jStore};
use pollstore_core::conformance;
use pollstore_core::VoteStore;

async fn connect() -> Option<Neo4jStore> {
    let uri = std::env::var("POLLSTORE_NEO4J_URI").ok()?;
    let user = std::env::var("POLLSTORE_NEO4J_USER").unwrap_or_else(|_| "neo4j".to_string());
    let password = std::env::var("POLLSTORE_NEO4J_PASSWORD").unwrap_or_default();
    Some(
        Neo4jStore::connect(&Neo4jConfig::new(uri, user, password))
            .await
            .unwrap(),
    )
}

// One test drives everything so runs do not trample each other's graph.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_contract_and_social_queries() {
    let Some(store) = connect().await else {
        return;
    };

    conformance::run_all(&store).await;

    let shared: Arc<dyn VoteStore> = Arc::new(store.clone());
    let handles = (0..8).map(|_| Arc::clone(&shared)).collect();
    conformance::concurrent_duplicates(handles).await;

    conformance::social_demo_queries(&store).await;
}
