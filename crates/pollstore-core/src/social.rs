//! Follow-graph modeling.
//!
//! A small social network (members and directed "follows" edges) used to
//! compare join-based and pattern-based relationship queries. Unrelated to
//! voting.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Fault;

/// Member identifier.
pub type MemberId = i64;

/// A member of the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Member {
    pub id: MemberId,
    pub username: String,
    pub full_name: String,
}

impl Member {
    pub fn new(id: MemberId, username: impl Into<String>, full_name: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            full_name: full_name.into(),
        }
    }
}

/// `follower` follows `followed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct FollowEdge {
    pub follower: MemberId,
    pub followed: MemberId,
}

impl FollowEdge {
    pub fn new(follower: MemberId, followed: MemberId) -> Self {
        Self { follower, followed }
    }

    pub fn is_self_loop(&self) -> bool {
        self.follower == self.followed
    }
}

/// Members and edges to load into a graph.
#[derive(Debug, Clone, Serialize)]
pub struct SocialSeed {
    pub members: Vec<Member>,
    pub edges: Vec<FollowEdge>,
}

impl SocialSeed {
    /// Five members and six follow edges.
    ///
    /// Alice follows Bob and Charlie, Bob and Alice follow each other, Bob and
    /// Charlie follow Diana, Diana follows Eva.
    pub fn demo() -> Self {
        let members = vec![
            Member::new(1, "alice", "Alice Wonder"),
            Member::new(2, "bob", "Bob Marley"),
            Member::new(3, "charlie", "Charlie Brown"),
            Member::new(4, "diana", "Diana Prince"),
            Member::new(5, "eva", "Eva Green"),
        ];
        let edges = [(1, 2), (1, 3), (2, 1), (2, 4), (3, 4), (4, 5)]
            .into_iter()
            .map(|(a, b)| FollowEdge::new(a, b))
            .collect();

        Self { members, edges }
    }

    pub fn member(&self, id: MemberId) -> Option<&Member> {
        self.members.iter().find(|m| m.id == id)
    }
}

/// Relationship queries over the follow graph.
///
/// Every query returns members sorted by full name.
#[async_trait]
pub trait SocialGraph: Send + Sync {
    /// Remove all members and edges. Idempotent.
    async fn reset_network(&self) -> Result<(), Fault>;

    /// Load members and edges. Loading an edge twice keeps one edge.
    async fn load_network(&self, seed: &SocialSeed) -> Result<(), Fault>;

    /// Members that `member` follows.
    async fn following(&self, member: MemberId) -> Result<Vec<Member>, Fault>;

    /// Members that follow `member`.
    async fn followers(&self, member: MemberId) -> Result<Vec<Member>, Fault>;

    /// Members followed by the people `member` follows, excluding `member`
    /// and anyone `member` already follows.
    async fn suggestions(&self, member: MemberId) -> Result<Vec<Member>, Fault>;
}

/// Sort members by full name, the order every [`SocialGraph`] query returns.
pub fn sort_members(members: &mut [Member]) {
    members.sort_by(|a, b| a.full_name.cmp(&b.full_name).then(a.id.cmp(&b.id)));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_seed_shape() {
        let seed = SocialSeed::demo();
        assert_eq!(seed.members.len(), 5);
        assert_eq!(seed.edges.len(), 6);
        assert!(seed.edges.iter().all(|e| !e.is_self_loop()));
        assert_eq!(seed.member(4).map(|m| m.username.as_str()), Some("diana"));
        assert!(seed.member(9).is_none());
    }

    #[test]
    fn test_sort_members_by_full_name() {
        let mut members = vec![
            Member::new(3, "charlie", "Charlie Brown"),
            Member::new(2, "bob", "Bob Marley"),
        ];
        sort_members(&mut members);
        assert_eq!(members[0].id, 2);
        assert_eq!(members[1].id, 3);
    }
}
