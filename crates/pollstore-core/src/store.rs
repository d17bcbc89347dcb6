//! The vote admission contract.

use async_trait::async_trait;

use crate::error::Fault;
use crate::seed::PollSeed;
use crate::tally::Tally;
use crate::types::{OptionId, PollId, User, UserId, VoteOutcome};

/// A storage backend that admits at most one vote per user per poll.
///
/// Implementations must delegate the admission check to a single atomic
/// primitive of their engine. Reading "has this user voted?" and then writing
/// the vote as two separate steps is not a valid implementation: two
/// concurrent callers could both pass the check.
#[async_trait]
pub trait VoteStore: Send + Sync {
    /// Short backend name used in logs and reports.
    fn name(&self) -> &'static str;

    /// Remove every poll, option, user and vote. Idempotent.
    async fn reset(&self) -> Result<(), Fault>;

    /// Load a poll with its options and users.
    async fn seed(&self, seed: &PollSeed) -> Result<(), Fault>;

    /// Record `user`'s vote for `option` unless the user already voted on `poll`.
    ///
    /// Duplicate attempts return `Ok(VoteOutcome::Rejected(..))`, never an error.
    async fn cast_vote(
        &self,
        poll: PollId,
        user: &UserId,
        option: &OptionId,
    ) -> Result<VoteOutcome, Fault>;

    /// Count votes per option, including options with no votes.
    async fn tally(&self, poll: PollId) -> Result<Tally, Fault>;

    /// Users who voted for `option`, sorted by user id.
    async fn voters(&self, poll: PollId, option: &OptionId) -> Result<Vec<User>, Fault>;
}
