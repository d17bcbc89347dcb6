//! Vote tallies and their ordering.

use std::cmp::Ordering;

use serde::Serialize;

use crate::types::{OptionId, PollId};

/// Votes counted for one option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TallyEntry {
    pub option: OptionId,
    pub votes: u64,
}

impl TallyEntry {
    pub fn new(option: impl Into<OptionId>, votes: u64) -> Self {
        Self {
            option: option.into(),
            votes,
        }
    }

    /// Ranking order: most votes first, then option id ascending.
    fn rank_cmp(&self, other: &Self) -> Ordering {
        other
            .votes
            .cmp(&self.votes)
            .then_with(|| self.option.cmp(&other.option))
    }
}

/// Ranked vote counts for a poll.
///
/// Always sorted by votes descending, ties broken by option id ascending,
/// whatever order the backend produced the counts in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub poll: PollId,
    entries: Vec<TallyEntry>,
}

impl Tally {
    /// Rank raw `(option, votes)` counts.
    pub fn ranked<I, O>(poll: PollId, counts: I) -> Self
    where
        I: IntoIterator<Item = (O, u64)>,
        O: Into<OptionId>,
    {
        let mut entries: Vec<TallyEntry> = counts
            .into_iter()
            .map(|(option, votes)| TallyEntry::new(option, votes))
            .collect();
        entries.sort_by(TallyEntry::rank_cmp);
        Self { poll, entries }
    }

    /// Entries in ranking order.
    pub fn entries(&self) -> &[TallyEntry] {
        &self.entries
    }

    /// Total number of counted votes.
    pub fn total(&self) -> u64 {
        self.entries.iter().map(|e| e.votes).sum()
    }

    /// Votes for a specific option, if the option is listed.
    pub fn votes_for(&self, option: &OptionId) -> Option<u64> {
        self.entries
            .iter()
            .find(|e| &e.option == option)
            .map(|e| e.votes)
    }

    /// Leading entry, if any option received a vote.
    pub fn leader(&self) -> Option<&TallyEntry> {
        self.entries.first().filter(|e| e.votes > 0)
    }

    /// `(option, votes)` pairs in ranking order.
    pub fn pairs(&self) -> Vec<(&str, u64)> {
        self.entries
            .iter()
            .map(|e| (e.option.as_str(), e.votes))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ranked_orders_by_votes_then_option() {
        let tally = Tally::ranked(PollId(1), vec![("C", 1), ("A", 3), ("B", 1)]);
        assert_eq!(tally.pairs(), vec![("A", 3), ("B", 1), ("C", 1)]);
    }

    #[test]
    fn test_zero_counts_sort_last() {
        let tally = Tally::ranked(PollId(1), vec![("B", 0), ("A", 0), ("C", 2)]);
        assert_eq!(tally.pairs(), vec![("C", 2), ("A", 0), ("B", 0)]);
        assert_eq!(tally.total(), 2);
    }

    #[test]
    fn test_votes_for_and_leader() {
        let tally = Tally::ranked(PollId(1), vec![("A", 2), ("B", 5)]);
        assert_eq!(tally.votes_for(&"A".into()), Some(2));
        assert_eq!(tally.votes_for(&"Z".into()), None);
        assert_eq!(tally.leader().map(|e| e.option.as_str()), Some("B"));
    }

    #[test]
    fn test_no_leader_without_votes() {
        let tally = Tally::ranked(PollId(1), vec![("A", 0)]);
        assert!(tally.leader().is_none());
        assert!(!tally.is_empty());

        let empty = Tally::ranked::<_, OptionId>(PollId(1), Vec::new());
        assert!(empty.is_empty());
        assert_eq!(empty.len(), 0);
    }
}
