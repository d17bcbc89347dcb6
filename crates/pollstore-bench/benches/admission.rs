//! Vote admission benchmarks for the embedded backends.
//!
//! Compares SQLite (in memory and WAL file) against sled for accepted votes,
//! rejected duplicates and a tally over a populated poll.

use std::sync::Arc;
use std::time::{Duration, Instant};

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use pollstore_backends::{SledStore, SqliteConfig, SqliteStore};
use pollstore_bench::{run_admission, Scale};
use pollstore_core::{OptionId, PollSeed, UserId, VoteStore, DEMO_POLL_ID};
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
}

/// Stores under test; the temp dir keeps the SQLite file alive.
fn stores() -> (Vec<Arc<dyn VoteStore>>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let sqlite_file = SqliteStore::open(&SqliteConfig::file(dir.path().join("bench.db"))).unwrap();
    let stores: Vec<Arc<dyn VoteStore>> = vec![
        Arc::new(SqliteStore::open_in_memory().unwrap()),
        Arc::new(sqlite_file),
        Arc::new(SledStore::temporary().unwrap()),
    ];
    (stores, dir)
}

fn label(index: usize, store: &dyn VoteStore) -> String {
    match index {
        1 => format!("{}-file", store.name()),
        _ => store.name().to_string(),
    }
}

fn bench_accept(c: &mut Criterion) {
    let rt = runtime();
    let (stores, _dir) = stores();
    let mut group = c.benchmark_group("admission/accept");

    for (i, store) in stores.iter().enumerate() {
        group.bench_function(BenchmarkId::from_parameter(label(i, store.as_ref())), |b| {
            b.to_async(&rt).iter_custom(|iters| {
                let store = Arc::clone(store);
                async move {
                    store.reset().await.unwrap();
                    store.seed(&PollSeed::benchmark()).await.unwrap();
                    let option = OptionId::from("A");

                    let start = Instant::now();
                    for user in 0..iters {
                        let outcome = store
                            .cast_vote(DEMO_POLL_ID, &UserId::from(user), &option)
                            .await
                            .unwrap();
                        black_box(outcome);
                    }
                    start.elapsed()
                }
            });
        });
    }

    group.finish();
}

fn bench_reject(c: &mut Criterion) {
    let rt = runtime();
    let (stores, _dir) = stores();
    let mut group = c.benchmark_group("admission/reject");

    for (i, store) in stores.iter().enumerate() {
        rt.block_on(async {
            store.reset().await.unwrap();
            store.seed(&PollSeed::benchmark()).await.unwrap();
            store
                .cast_vote(DEMO_POLL_ID, &UserId::from(0u64), &"A".into())
                .await
                .unwrap();
        });

        let user = UserId::from(0u64);
        let option = OptionId::from("A");
        let (store, user, option) = (store.as_ref(), &user, &option);
        group.bench_function(BenchmarkId::from_parameter(label(i, store)), |b| {
            b.to_async(&rt).iter(move || async move {
                let outcome = store.cast_vote(DEMO_POLL_ID, user, option).await.unwrap();
                black_box(outcome);
            });
        });
    }

    group.finish();
}

fn bench_tally(c: &mut Criterion) {
    let rt = runtime();
    let (stores, _dir) = stores();
    let mut group = c.benchmark_group("admission/tally");

    for scale in [Scale::Small, Scale::Medium] {
        for (i, store) in stores.iter().enumerate() {
            let store = store.as_ref();
            rt.block_on(run_admission(store, scale.count())).unwrap();

            group.bench_with_input(
                BenchmarkId::new(label(i, store), scale.count()),
                &scale,
                |b, _| {
                    b.to_async(&rt).iter(move || async move {
                        black_box(store.tally(DEMO_POLL_ID).await.unwrap());
                    });
                },
            );
        }
    }

    group.finish();
}

criterion_group! {
    name = benches;
    config = Criterion::default().measurement_time(Duration::from_secs(5));
    targets = bench_accept, bench_reject, bench_tally
}
criterion_main!(benches);
