/// Common types used throughout syngraph.
///
/// This module defines the identifiers and small value types shared by the
/// graph storage, the session model, the wire protocol and the client
/// mirror. They are deliberately simple: ids are opaque strings, ports are
/// immutable name/title pairs, and link identity is the full endpoint
/// 4-tuple.
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// A revision allocated by the server, one per outbound frame.
///
/// Server revisions are strictly monotonic and gap-free across the whole
/// session, which lets every participant verify its stream.
pub type ServerRev = u64;

/// A revision allocated by a client, one per originated intent.
///
/// Client revisions are only ever used as echo keys: the server hands them
/// back in the `origin` field of the reply so the client can match the reply
/// to an outstanding optimistic write.
pub type ClientRev = u64;

/// Unique identifier for a node in the graph.
///
/// Ids are opaque strings; the generator produces `NODE-` followed by
/// 32 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    /// Generate a fresh random node id.
    pub fn generate() -> Self {
        Self(format!("NODE-{}", Uuid::new_v4().simple()))
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Unique identifier for a connected participant.
///
/// Same shape as [`NodeId`] but with the `USER-` prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    /// Generate a fresh random user id.
    pub fn generate() -> Self {
        Self(format!("USER-{}", Uuid::new_v4().simple()))
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A named connection point on a node.
///
/// Ports are immutable; identity is the `name` within the owning node.
/// The `title` is presentation-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    /// Port identity within its node
    pub name: String,
    /// Human-readable label
    pub title: String,
}

impl Port {
    /// Create a new port.
    pub fn new(name: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: title.into(),
        }
    }

    /// Serialize to the wire shape `{"name": …, "title": …}`.
    pub fn serialize(&self) -> JsonValue {
        serde_json::json!({ "name": self.name, "title": self.title })
    }
}

/// Identity of a directed edge: the full endpoint 4-tuple.
///
/// A link exists between a named port on the start node and a named port on
/// the end node. Links carry no payload beyond their identity, so this type
/// doubles as the stored link value. Parallel edges with distinct tuples are
/// allowed; duplicates of the same tuple are not.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkKey {
    /// Node the link starts from
    pub start_id: NodeId,
    /// Port name on the start node
    pub start_name: String,
    /// Node the link ends at
    pub end_id: NodeId,
    /// Port name on the end node
    pub end_name: String,
}

impl LinkKey {
    /// Create a link key from its four components.
    pub fn new(
        start_id: impl Into<NodeId>,
        start_name: impl Into<String>,
        end_id: impl Into<NodeId>,
        end_name: impl Into<String>,
    ) -> Self {
        Self {
            start_id: start_id.into(),
            start_name: start_name.into(),
            end_id: end_id.into(),
            end_name: end_name.into(),
        }
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for LinkKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{}",
            self.start_id, self.start_name, self.end_id, self.end_name
        )
    }
}

/// The opaque per-node state object.
///
/// The graph treats state as data: a mapping with free-form keys. Only the
/// filesystem materializer interprets particular shapes of it.
pub type StateMap = serde_json::Map<String, JsonValue>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_shape() {
        let id = NodeId::generate();
        assert!(id.0.starts_with("NODE-"));
        assert_eq!(id.0.len(), "NODE-".len() + 32);
        assert!(id.0["NODE-".len()..]
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_user_id_shape() {
        let id = UserId::generate();
        assert!(id.0.starts_with("USER-"));
        assert_eq!(id.0.len(), "USER-".len() + 32);
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(NodeId::generate(), NodeId::generate());
        assert_ne!(UserId::generate(), UserId::generate());
    }

    #[test]
    fn test_port_serialize() {
        let port = Port::new("start", "");
        assert_eq!(
            port.serialize(),
            serde_json::json!({"name": "start", "title": ""})
        );
    }

    #[test]
    fn test_link_key_equality() {
        let a = LinkKey::new("N1", "start", "N2", "end");
        let b = LinkKey::new("N1", "start", "N2", "end");
        let c = LinkKey::new("N1", "start", "N2", "in");

        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
