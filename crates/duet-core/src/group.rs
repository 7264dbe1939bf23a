//! Conversation groups.
//!
//! A conversation group is the set of live connections currently viewing the
//! conversation between one unordered pair of users. Its name is a pure
//! function of that pair.

use duet_proto::payloads::hub::{ConnectionDto, GroupDto};
use serde::{Deserialize, Serialize};

use crate::identity::{ConnectionId, UserName};

/// Deterministic name of the conversation group for a pair of users.
///
/// The two identities are ordered byte-wise, so `group_name(a, b) ==
/// group_name(b, a)`. The first identity is length-prefixed, which keeps
/// distinct pairs from colliding even when an identity contains the
/// separator.
pub fn group_name(a: &UserName, b: &UserName) -> String {
    let (first, second) = if a.as_str() <= b.as_str() { (a, b) } else { (b, a) };
    format!("{}:{}|{}", first.as_str().len(), first, second)
}

/// One live connection inside a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    /// Connection id
    pub connection_id: ConnectionId,
    /// User behind the connection
    pub username: UserName,
}

impl Connection {
    /// Create a connection record.
    pub fn new(connection_id: ConnectionId, username: UserName) -> Self {
        Self { connection_id, username }
    }
}

impl From<&Connection> for ConnectionDto {
    fn from(connection: &Connection) -> Self {
        Self {
            connection_id: connection.connection_id.get(),
            username: connection.username.to_string(),
        }
    }
}

/// Membership set of one conversation group.
///
/// Connections are kept in join order and a connection id appears at most
/// once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationGroup {
    /// Group name, see [`group_name`]
    pub name: String,
    connections: Vec<Connection>,
}

impl ConversationGroup {
    /// Create an empty group.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), connections: Vec::new() }
    }

    /// Add a connection. Returns `false` if it was already a member.
    pub fn join(&mut self, connection: Connection) -> bool {
        if self.contains_connection(connection.connection_id) {
            return false;
        }
        self.connections.push(connection);
        true
    }

    /// Remove a connection, returning it if it was a member.
    pub fn leave(&mut self, connection_id: ConnectionId) -> Option<Connection> {
        let pos = self.connections.iter().position(|c| c.connection_id == connection_id)?;
        Some(self.connections.remove(pos))
    }

    /// Whether `connection_id` is a member.
    pub fn contains_connection(&self, connection_id: ConnectionId) -> bool {
        self.connections.iter().any(|c| c.connection_id == connection_id)
    }

    /// Whether any member connection belongs to `user`.
    pub fn contains_user(&self, user: &UserName) -> bool {
        self.connections.iter().any(|c| &c.username == user)
    }

    /// Member connections in join order.
    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Member connection ids in join order.
    pub fn connection_ids(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.connections.iter().map(|c| c.connection_id)
    }

    /// Number of member connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether the group has no members.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Client-facing membership snapshot.
    pub fn to_dto(&self) -> GroupDto {
        GroupDto {
            name: self.name.clone(),
            connections: self.connections.iter().map(ConnectionDto::from).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn user(name: &str) -> UserName {
        UserName::new(name).unwrap()
    }

    #[test]
    fn group_name_is_order_independent() {
        assert_eq!(group_name(&user("bob"), &user("alice")), "5:alice|bob");
        assert_eq!(group_name(&user("alice"), &user("bob")), "5:alice|bob");
    }

    #[test]
    fn separator_in_identity_does_not_collide() {
        // Naive "a-b" joining would map both pairs to "a-b-c".
        let left = group_name(&user("a-b"), &user("c"));
        let right = group_name(&user("a"), &user("b-c"));
        assert_ne!(left, right);
    }

    #[test]
    fn join_is_idempotent() {
        let mut group = ConversationGroup::new("5:alice|bob");
        let conn = Connection::new(ConnectionId::new(1), user("alice"));

        assert!(group.join(conn.clone()));
        assert!(!group.join(conn));
        assert_eq!(group.len(), 1);
    }

    #[test]
    fn leave_removes_only_that_connection() {
        let mut group = ConversationGroup::new("5:alice|bob");
        group.join(Connection::new(ConnectionId::new(1), user("alice")));
        group.join(Connection::new(ConnectionId::new(2), user("alice")));

        assert!(group.leave(ConnectionId::new(1)).is_some());
        assert!(group.leave(ConnectionId::new(1)).is_none());
        assert!(group.contains_user(&user("alice")));
        assert_eq!(group.connection_ids().collect::<Vec<_>>(), vec![ConnectionId::new(2)]);
    }

    #[test]
    fn dto_preserves_join_order() {
        let mut group = ConversationGroup::new("5:alice|bob");
        group.join(Connection::new(ConnectionId::new(7), user("bob")));
        group.join(Connection::new(ConnectionId::new(3), user("alice")));

        let dto = group.to_dto();
        assert_eq!(dto.name, "5:alice|bob");
        assert_eq!(dto.connections[0].connection_id, 7);
        assert_eq!(dto.connections[1].username, "alice");
    }

    fn identity() -> impl Strategy<Value = UserName> {
        "[a-z0-9|:_-]{1,12}".prop_map(|s| UserName::new(s).unwrap())
    }

    proptest! {
        #[test]
        fn group_name_is_symmetric(a in identity(), b in identity()) {
            prop_assert_eq!(group_name(&a, &b), group_name(&b, &a));
        }

        #[test]
        fn distinct_pairs_have_distinct_names(
            a in identity(),
            b in identity(),
            c in identity(),
            d in identity(),
        ) {
            let same_pair = (a == c && b == d) || (a == d && b == c);
            prop_assume!(!same_pair);
            prop_assert_ne!(group_name(&a, &b), group_name(&c, &d));
        }
    }
}
