//! Benchmark vote streams.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use pollstore_core::{OptionId, UserId};

/// Number of votes a benchmark run submits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Scale {
    /// 10 votes. Use for quick tests.
    Tiny,
    /// 100 votes.
    Small,
    /// 1,000 votes, the classic comparison run.
    #[default]
    Medium,
    /// 10,000 votes.
    Large,
}

impl Scale {
    pub fn count(&self) -> usize {
        match self {
            Scale::Tiny => 10,
            Scale::Small => 100,
            Scale::Medium => 1_000,
            Scale::Large => 10_000,
        }
    }
}

/// `count` distinct users, user `i` voting for option A.
pub fn unique_votes(count: usize) -> Vec<(UserId, OptionId)> {
    (0..count as u64)
        .map(|i| (UserId::from(i), OptionId::from("A")))
        .collect()
}

/// `count` votes for option A where roughly `duplicate_ratio` of them repeat
/// an earlier voter. Deterministic for a given `seed`.
pub fn mixed_votes(count: usize, duplicate_ratio: f64, seed: u64) -> Vec<(UserId, OptionId)> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut next_user = 0u64;
    let mut votes = Vec::with_capacity(count);

    for _ in 0..count {
        let user = if next_user > 0 && rng.gen_bool(duplicate_ratio.clamp(0.0, 1.0)) {
            rng.gen_range(0..next_user)
        } else {
            next_user += 1;
            next_user - 1
        };
        votes.push((UserId::from(user), OptionId::from("A")));
    }

    votes
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_unique_votes() {
        let votes = unique_votes(Scale::Tiny.count());
        assert_eq!(votes.len(), 10);
        assert_eq!(votes[3].0.as_str(), "3");
        assert!(votes.iter().all(|(_, o)| o.as_str() == "A"));
    }

    #[test]
    fn test_mixed_votes_repeat_earlier_users() {
        let votes = mixed_votes(500, 0.3, 9);
        assert_eq!(votes.len(), 500);

        let distinct: HashSet<_> = votes.iter().map(|(u, _)| u.clone()).collect();
        assert!(distinct.len() < 500);
        assert!(distinct.len() > 250);
        assert_eq!(votes, mixed_votes(500, 0.3, 9));
    }

    #[test]
    fn test_mixed_votes_without_duplicates() {
        let votes = mixed_votes(50, 0.0, 1);
        assert_eq!(votes, unique_votes(50));
    }
}
