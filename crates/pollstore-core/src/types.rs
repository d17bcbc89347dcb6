//! Domain identifiers and records.

use std::fmt;

use serde::Serialize;

/// Poll identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct PollId(pub i64);

impl PollId {
    /// Get the raw integer value.
    pub fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for PollId {
    fn from(id: i64) -> Self {
        PollId(id)
    }
}

impl fmt::Display for PollId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create an identifier from any string-like value.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// User identifier. Opaque; integer ids are stored in decimal form.
    UserId
);

string_id!(
    /// Option identifier, unique within its poll.
    OptionId
);

impl From<u64> for UserId {
    fn from(id: u64) -> Self {
        UserId(id.to_string())
    }
}

/// A poll and its question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Poll {
    pub id: PollId,
    pub question: String,
}

/// An answer option belonging to one poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollOption {
    pub id: OptionId,
    pub label: String,
}

/// A voter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl User {
    /// Create a user with a display name.
    pub fn named(id: impl Into<UserId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: Some(name.into()),
        }
    }

    /// Create a user known only by id.
    pub fn anonymous(id: impl Into<UserId>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }

    /// Display name, falling back to the id.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.id.as_str())
    }
}

/// Why a vote was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Rejection {
    /// The user already has a vote on this poll.
    AlreadyVoted,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::AlreadyVoted => f.write_str("already voted"),
        }
    }
}

/// Result of an admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VoteOutcome {
    Accepted,
    Rejected(Rejection),
}

impl VoteOutcome {
    /// Shorthand for the duplicate-vote rejection.
    pub const ALREADY_VOTED: VoteOutcome = VoteOutcome::Rejected(Rejection::AlreadyVoted);

    /// Build an outcome from an engine's "was inserted" answer.
    pub fn from_inserted(inserted: bool) -> Self {
        if inserted {
            VoteOutcome::Accepted
        } else {
            Self::ALREADY_VOTED
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, VoteOutcome::Accepted)
    }
}

impl fmt::Display for VoteOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoteOutcome::Accepted => f.write_str("accepted"),
            VoteOutcome::Rejected(reason) => write!(f, "rejected ({})", reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_from_integer() {
        assert_eq!(UserId::from(101u64).as_str(), "101");
        assert_eq!(UserId::from("user:101").to_string(), "user:101");
    }

    #[test]
    fn test_option_ordering() {
        let mut ids = vec![OptionId::from("C"), OptionId::from("A"), OptionId::from("B")];
        ids.sort();
        let sorted: Vec<&str> = ids.iter().map(OptionId::as_str).collect();
        assert_eq!(sorted, ["A", "B", "C"]);
    }

    #[test]
    fn test_outcome_from_inserted() {
        assert_eq!(VoteOutcome::from_inserted(true), VoteOutcome::Accepted);
        assert_eq!(
            VoteOutcome::from_inserted(false),
            VoteOutcome::Rejected(Rejection::AlreadyVoted)
        );
        assert!(!VoteOutcome::ALREADY_VOTED.is_accepted());
    }

    #[test]
    fn test_display_name_fallback() {
        assert_eq!(User::named(101u64, "user:101").display_name(), "user:101");
        assert_eq!(User::anonymous(7u64).display_name(), "7");
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let json = serde_json::to_string(&(PollId(1), OptionId::from("A"))).unwrap();
        assert_eq!(json, r#"[1,"A"]"#);
    }
}
