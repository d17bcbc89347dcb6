//! Seed data loaded before any vote is cast.

use serde::Serialize;

use crate::types::{OptionId, Poll, PollId, PollOption, User};

/// Poll id used by the demonstration and benchmark seeds.
pub const DEMO_POLL_ID: PollId = PollId(1);

/// A poll with its options and the known users.
#[derive(Debug, Clone, Serialize)]
pub struct PollSeed {
    pub poll: Poll,
    pub options: Vec<PollOption>,
    pub users: Vec<User>,
}

impl PollSeed {
    /// Create a seed for a poll with no options or users yet.
    pub fn new(id: PollId, question: impl Into<String>) -> Self {
        Self {
            poll: Poll {
                id,
                question: question.into(),
            },
            options: Vec::new(),
            users: Vec::new(),
        }
    }

    /// Add an option.
    pub fn with_option(mut self, id: impl Into<OptionId>, label: impl Into<String>) -> Self {
        self.options.push(PollOption {
            id: id.into(),
            label: label.into(),
        });
        self
    }

    /// Add a user.
    pub fn with_user(mut self, user: User) -> Self {
        self.users.push(user);
        self
    }

    /// Poll 1 with options A, B, C and users 101 to 105.
    pub fn demo() -> Self {
        let seed = Self::new(DEMO_POLL_ID, "What is your favourite language?")
            .with_option("A", "Option A")
            .with_option("B", "Option B")
            .with_option("C", "Option C");

        (101u64..=105).fold(seed, |seed, id| {
            seed.with_user(User::named(id, format!("user:{}", id)))
        })
    }

    /// Poll 1 with the single option A every benchmark vote goes to.
    pub fn benchmark() -> Self {
        Self::new(DEMO_POLL_ID, "Benchmark poll").with_option("A", "Option A")
    }

    pub fn poll_id(&self) -> PollId {
        self.poll.id
    }

    /// Option ids in declaration order.
    pub fn option_ids(&self) -> impl Iterator<Item = &OptionId> {
        self.options.iter().map(|o| &o.id)
    }

    pub fn has_option(&self, option: &OptionId) -> bool {
        self.options.iter().any(|o| &o.id == option)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_seed() {
        let seed = PollSeed::demo();
        assert_eq!(seed.poll_id(), PollId(1));
        let options: Vec<&str> = seed.option_ids().map(OptionId::as_str).collect();
        assert_eq!(options, ["A", "B", "C"]);
        assert_eq!(seed.users.len(), 5);
        assert_eq!(seed.users[0].display_name(), "user:101");
    }

    #[test]
    fn test_benchmark_seed() {
        let seed = PollSeed::benchmark();
        assert!(seed.has_option(&"A".into()));
        assert!(!seed.has_option(&"B".into()));
        assert!(seed.users.is_empty());
    }
}
