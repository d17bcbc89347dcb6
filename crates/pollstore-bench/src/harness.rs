//! Benchmark harness.
//!
//! Resets the store, loads the benchmark poll and times a stream of
//! `cast_vote` calls issued one after another.

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::info;

use pollstore_core::{Fault, OptionId, PollSeed, UserId, VoteStore, DEMO_POLL_ID};

use crate::fixtures::unique_votes;

/// Outcome of one timed run.
#[derive(Debug, Clone, Serialize)]
pub struct BenchReport {
    pub backend: String,
    pub votes: usize,
    pub accepted: usize,
    pub rejected: usize,
    #[serde(rename = "elapsed_ms", serialize_with = "as_millis")]
    pub elapsed: Duration,
}

fn as_millis<S: serde::Serializer>(elapsed: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(elapsed.as_secs_f64() * 1_000.0)
}

impl BenchReport {
    /// Votes processed per second.
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            self.votes as f64 / secs
        }
    }

    /// Mean latency per vote.
    pub fn mean_latency(&self) -> Duration {
        if self.votes == 0 {
            Duration::ZERO
        } else {
            self.elapsed / self.votes as u32
        }
    }
}

/// Time `votes` distinct users voting for option A on the benchmark poll.
pub async fn run_admission(store: &dyn VoteStore, votes: usize) -> Result<BenchReport, Fault> {
    run_workload(store, &unique_votes(votes)).await
}

/// Time an arbitrary stream of votes on the benchmark poll.
///
/// Setup (reset and seed) is not part of the measured time.
pub async fn run_workload(
    store: &dyn VoteStore,
    votes: &[(UserId, OptionId)],
) -> Result<BenchReport, Fault> {
    store.reset().await?;
    store.seed(&PollSeed::benchmark()).await?;

    let mut accepted = 0;
    let mut rejected = 0;
    let start = Instant::now();
    for (user, option) in votes {
        if store.cast_vote(DEMO_POLL_ID, user, option).await?.is_accepted() {
            accepted += 1;
        } else {
            rejected += 1;
        }
    }
    let elapsed = start.elapsed();

    let report = BenchReport {
        backend: store.name().to_string(),
        votes: votes.len(),
        accepted,
        rejected,
        elapsed,
    };

    info!(
        backend = %report.backend,
        votes = report.votes,
        accepted = report.accepted,
        rejected = report.rejected,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "admission benchmark finished"
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::mixed_votes;
    use pollstore_backends::{SledStore, SqliteStore};

    #[tokio::test]
    async fn test_run_admission_counts_every_vote() {
        let store = SqliteStore::open_in_memory().unwrap();
        let report = run_admission(&store, 25).await.unwrap();

        assert_eq!(report.backend, "sqlite");
        assert_eq!(report.votes, 25);
        assert_eq!(report.accepted, 25);
        assert_eq!(report.rejected, 0);

        let tally = store.tally(DEMO_POLL_ID).await.unwrap();
        assert_eq!(tally.pairs(), vec![("A", 25)]);
    }

    #[tokio::test]
    async fn test_run_workload_with_duplicates() {
        let store = SledStore::temporary().unwrap();
        let votes = mixed_votes(200, 0.25, 3);
        let distinct = votes
            .iter()
            .map(|(u, _)| u.as_str())
            .collect::<std::collections::HashSet<_>>()
            .len();

        let report = run_workload(&store, &votes).await.unwrap();
        assert_eq!(report.accepted, distinct);
        assert_eq!(report.accepted + report.rejected, 200);
    }

    #[tokio::test]
    async fn test_runs_are_repeatable() {
        let store = SledStore::temporary().unwrap();
        let first = run_admission(&store, 10).await.unwrap();
        let second = run_admission(&store, 10).await.unwrap();
        assert_eq!(first.accepted, second.accepted);
    }

    #[test]
    fn test_report_metrics() {
        let report = BenchReport {
            backend: "sled".into(),
            votes: 1_000,
            accepted: 1_000,
            rejected: 0,
            elapsed: Duration::from_millis(500),
        };
        assert_eq!(report.throughput(), 2_000.0);
        assert_eq!(report.mean_latency(), Duration::from_micros(500));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["elapsed_ms"], 500.0);
    }
}
