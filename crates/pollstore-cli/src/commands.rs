//! Subcommand implementations.
//!
//! Each command returns its formatted output; `main` prints it.

use std::sync::Arc;

use tracing::{info, warn};

use pollstore_backends::{open_social_graph, open_store, BackendConfigs, BackendKind, RedisMode};
use pollstore_bench::{mixed_votes, run_workload, unique_votes, BenchReport};
use pollstore_core::{
    Fault, OptionId, PollId, PollSeed, SocialSeed, UserId, VoteStore, DEMO_POLL_ID,
};

use crate::error::CliError;
use crate::formatter::{DemoRun, Formatter, SocialQuery, VoteLine};

/// The six-vote demonstration: user 101 tries to vote twice.
pub const DEMO_VOTES: [(u64, &str); 6] = [
    (101, "A"),
    (102, "B"),
    (103, "A"),
    (101, "C"),
    (104, "C"),
    (105, "A"),
];

/// Open `kind`, or log and return None when it is unreachable.
async fn open_or_skip(
    kind: BackendKind,
    configs: &BackendConfigs,
) -> Result<Option<Arc<dyn VoteStore>>, CliError> {
    match open_store(kind, configs).await {
        Ok(store) => Ok(Some(store)),
        Err(e) if e.is_unavailable() => {
            warn!(backend = %kind, error = %e, "skipping unavailable backend");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Run the demonstration script on one store and collect votes, ranking and
/// the winning option's voters.
pub async fn demo_on(store: &dyn VoteStore) -> Result<DemoRun, Fault> {
    let seed = PollSeed::demo();
    store.reset().await?;
    store.seed(&seed).await?;

    let mut lines = Vec::with_capacity(DEMO_VOTES.len());
    for (user, option) in DEMO_VOTES {
        let user = UserId::from(user);
        let option = OptionId::from(option);
        let outcome = store.cast_vote(DEMO_POLL_ID, &user, &option).await?;
        lines.push(VoteLine {
            user,
            option,
            outcome,
        });
    }

    let tally = store.tally(DEMO_POLL_ID).await?;
    let leader_voters = match tally.leader() {
        Some(leader) => {
            let voters = store.voters(DEMO_POLL_ID, &leader.option).await?;
            Some((leader.option.clone(), voters))
        }
        None => None,
    };

    Ok(DemoRun {
        backend: store.name(),
        votes: lines,
        tally,
        options: seed.options,
        leader_voters,
    })
}

/// `demo`: the scripted scenario on every selected backend.
pub async fn demo(
    backends: &[BackendKind],
    configs: &BackendConfigs,
    formatter: &dyn Formatter,
) -> Result<String, CliError> {
    let mut runs = Vec::new();
    for &kind in backends {
        let Some(store) = open_or_skip(kind, configs).await? else {
            continue;
        };
        match demo_on(store.as_ref()).await {
            Ok(run) => runs.push(run),
            Err(e) if e.is_unavailable() => {
                warn!(backend = store.name(), error = %e, "backend went away during demo");
            }
            Err(e) => return Err(e.into()),
        }
    }

    if runs.is_empty() {
        return Err(CliError::NothingRan);
    }
    Ok(formatter.format_demo(&runs))
}

/// Benchmark workload shape.
#[derive(Debug, Clone, Copy)]
pub struct BenchPlan {
    pub votes: usize,
    /// Fraction of votes that repeat an earlier voter. Zero is the classic
    /// one-vote-per-user run.
    pub duplicate_ratio: f64,
    pub rng_seed: u64,
}

/// Every store a benchmark over `kind` should time: Redis once per mode.
fn bench_configs(kind: BackendKind, configs: &BackendConfigs) -> Vec<BackendConfigs> {
    match kind {
        BackendKind::Redis => [RedisMode::Sequential, RedisMode::Scripted]
            .into_iter()
            .map(|mode| {
                let mut configs = configs.clone();
                configs.redis.mode = mode;
                configs
            })
            .collect(),
        _ => vec![configs.clone()],
    }
}

/// `bench`: time the admission loop on every selected, reachable backend.
pub async fn bench(
    backends: &[BackendKind],
    configs: &BackendConfigs,
    plan: BenchPlan,
) -> Result<Vec<BenchReport>, CliError> {
    let votes = if plan.duplicate_ratio > 0.0 {
        mixed_votes(plan.votes, plan.duplicate_ratio, plan.rng_seed)
    } else {
        unique_votes(plan.votes)
    };

    let mut reports = Vec::new();
    for &kind in backends {
        for configs in bench_configs(kind, configs) {
            let Some(store) = open_or_skip(kind, &configs).await? else {
                break;
            };
            info!(backend = store.name(), votes = votes.len(), "benchmarking");
            match run_workload(store.as_ref(), &votes).await {
                Ok(report) => reports.push(report),
                Err(e) if e.is_unavailable() => {
                    warn!(backend = store.name(), error = %e, "backend went away during benchmark");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    if reports.is_empty() {
        return Err(CliError::NothingRan);
    }
    Ok(reports)
}

/// `social`: load the demo follow graph and run the three relationship queries.
pub async fn social(
    kind: BackendKind,
    configs: &BackendConfigs,
    formatter: &dyn Formatter,
) -> Result<String, CliError> {
    if !kind.has_social_graph() {
        return Err(CliError::Unsupported(format!(
            "{} does not model the follow graph (use sqlite or neo4j)",
            kind
        )));
    }

    let graph = open_social_graph(kind, configs).await?;
    let seed = SocialSeed::demo();
    graph.reset_network().await?;
    graph.load_network(&seed).await?;

    let name = |id| {
        seed.member(id)
            .map(|m| m.full_name.clone())
            .unwrap_or_else(|| id.to_string())
    };

    let queries = vec![
        SocialQuery {
            title: format!("{} follows", name(1)),
            members: graph.following(1).await?,
        },
        SocialQuery {
            title: format!("Followers of {}", name(4)),
            members: graph.followers(4).await?,
        },
        SocialQuery {
            title: format!("Suggestions for {}", name(1)),
            members: graph.suggestions(1).await?,
        },
    ];

    Ok(formatter.format_social(&queries))
}

/// `inspect`: list a poll's Redis keys.
#[cfg(feature = "redis")]
pub async fn inspect(
    poll: PollId,
    configs: &BackendConfigs,
    formatter: &dyn Formatter,
) -> Result<String, CliError> {
    let store = pollstore_backends::RedisStore::connect(&configs.redis).await?;
    let keys: Vec<crate::formatter::KeyRow> = store
        .inspect_keys(poll)
        .await?
        .into_iter()
        .map(|report| crate::formatter::KeyRow {
            key: report.key,
            kind: report.kind,
            value: report.value,
        })
        .collect();
    Ok(formatter.format_keys(&keys))
}

#[cfg(not(feature = "redis"))]
pub async fn inspect(
    _poll: PollId,
    _configs: &BackendConfigs,
    _formatter: &dyn Formatter,
) -> Result<String, CliError> {
    Err(CliError::Unsupported(
        "inspect needs a build with the `redis` feature".to_string(),
    ))
}
