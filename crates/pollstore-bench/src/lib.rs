//! Vote admission benchmarks.
//!
//! - **Harness**: times `cast_vote` loops against any [`pollstore_core::VoteStore`]
//!   and reports accepted/rejected counts with throughput.
//! - **Fixtures**: benchmark scales and deterministic vote streams.
//!
//! The criterion benches in `benches/` cover the embedded backends; the
//! `pollstore bench` command runs the harness against every reachable one.

pub mod fixtures;
pub mod harness;

pub use fixtures::{mixed_votes, unique_votes, Scale};
pub use harness::{run_admission, run_workload, BenchReport};
