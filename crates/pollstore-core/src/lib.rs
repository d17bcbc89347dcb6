//! Pollstore Core - the vote admission contract shared by every storage backend.
//!
//! A poll accepts at most one vote per user. Each backend realizes that rule
//! with its own engine-native primitive (a UNIQUE constraint, a set insert, a
//! unique index, a relationship constraint), but all of them expose the same
//! [`VoteStore`] surface and the same observable behaviour:
//!
//! - the first [`VoteStore::cast_vote`] for a `(poll, user)` pair is
//!   [`VoteOutcome::Accepted`], every later one is
//!   [`VoteOutcome::Rejected`] with [`Rejection::AlreadyVoted`];
//! - [`VoteStore::tally`] lists every option of the poll ordered by votes
//!   descending, ties broken by option id ascending.

pub mod error;
pub mod seed;
pub mod social;
pub mod store;
pub mod tally;
pub mod types;

#[cfg(feature = "conformance")]
pub mod conformance;

pub use error::Fault;
pub use seed::{PollSeed, DEMO_POLL_ID};
pub use social::{FollowEdge, Member, MemberId, SocialGraph, SocialSeed};
pub use store::VoteStore;
pub use tally::{Tally, TallyEntry};
pub use types::{OptionId, Poll, PollId, PollOption, Rejection, User, UserId, VoteOutcome};
