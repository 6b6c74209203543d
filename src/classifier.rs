/// Conflict classification for incoming intents.
///
/// Before the session mutates anything it classifies the intent against the
/// observed graph state. The outcome is a plain three-valued return, never a
/// control-flow escape:
///
/// - **Apply** — the intent is applicable; mutate and fan out.
/// - **Confirm** — the postcondition already holds (idempotent re-issue);
///   echo the intent back to the originator as if it had succeeded.
/// - **Cancel** — a structural precondition cannot be met (contradiction);
///   send the originator the protocol inverse so it rolls back its
///   optimistic write.
///
/// The asymmetry between add and remove is deliberate: a missing endpoint
/// node makes `removeLink` a Confirm (the link cannot exist, so the
/// postcondition is met) but makes `addLink` a Cancel (the precondition for
/// creation cannot be satisfied).
use crate::storage::Graph;
use crate::types::{LinkKey, NodeId, StateMap};

/// Why an intent was not applicable as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conflict {
    /// The node already exists.
    NodeExists(NodeId),
    /// The node does not exist.
    NoSuchNode(NodeId),
    /// The named port does not exist on the node.
    NoSuchPort(NodeId, String),
    /// The exact link already exists.
    LinkExists(LinkKey),
    /// The exact link does not exist.
    NoSuchLink(LinkKey),
    /// State change targeted a node that is not a materializer root.
    NotARoot(NodeId),
    /// Incoming state carried a reserved `__type__` key.
    TypedState(NodeId),
    /// Incoming state lacked the required `path` key.
    MissingPath(NodeId),
}

/// The classifier's three-valued outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Applicable: mutate the graph and fan out.
    Apply,
    /// Postcondition already met: echo success to the originator only.
    Confirm(Conflict),
    /// Precondition violated: send the inverse to the originator only.
    Cancel(Conflict),
}

impl Verdict {
    /// Whether this verdict lets the intent through to the apply path.
    pub fn is_apply(&self) -> bool {
        matches!(self, Verdict::Apply)
    }
}

/// Classifier hook: one pure predicate per intent kind.
///
/// The default policy implements the standard table below; specializations
/// override individual checks (the filesystem materializer replaces only
/// `check_change_state`).
pub trait ConflictPolicy: Send {
    /// `createNode`: Confirm when the id already exists.
    fn check_create_node(&self, graph: &Graph, id: &NodeId) -> Verdict {
        if graph.has_node(id) {
            Verdict::Confirm(Conflict::NodeExists(id.clone()))
        } else {
            Verdict::Apply
        }
    }

    /// `removeNode`: Confirm when the id is already absent.
    fn check_remove_node(&self, graph: &Graph, id: &NodeId) -> Verdict {
        if !graph.has_node(id) {
            Verdict::Confirm(Conflict::NoSuchNode(id.clone()))
        } else {
            Verdict::Apply
        }
    }

    /// `changeState`: Cancel when the node is absent.
    fn check_change_state(&self, graph: &Graph, id: &NodeId, _state: &StateMap) -> Verdict {
        if !graph.has_node(id) {
            Verdict::Cancel(Conflict::NoSuchNode(id.clone()))
        } else {
            Verdict::Apply
        }
    }

    /// `addLink`: Cancel when an endpoint node or port is missing, Confirm
    /// when the identical link already exists.
    fn check_add_link(&self, graph: &Graph, key: &LinkKey) -> Verdict {
        for id in [&key.start_id, &key.end_id] {
            if !graph.has_node(id) {
                return Verdict::Cancel(Conflict::NoSuchNode(id.clone()));
            }
        }
        for (id, name) in [
            (&key.start_id, &key.start_name),
            (&key.end_id, &key.end_name),
        ] {
            let node = graph.get_node(id).expect("endpoint checked above");
            if !node.has_port(name) {
                return Verdict::Cancel(Conflict::NoSuchPort(id.clone(), name.clone()));
            }
        }
        if graph.has_link(key) {
            Verdict::Confirm(Conflict::LinkExists(key.clone()))
        } else {
            Verdict::Apply
        }
    }

    /// `removeLink`: Confirm when an endpoint node or port is missing — the
    /// link cannot exist, so removal's postcondition already holds — or when
    /// the link itself is absent.
    fn check_remove_link(&self, graph: &Graph, key: &LinkKey) -> Verdict {
        for id in [&key.start_id, &key.end_id] {
            if !graph.has_node(id) {
                return Verdict::Confirm(Conflict::NoSuchNode(id.clone()));
            }
        }
        for (id, name) in [
            (&key.start_id, &key.start_name),
            (&key.end_id, &key.end_name),
        ] {
            let node = graph.get_node(id).expect("endpoint checked above");
            if !node.has_port(name) {
                return Verdict::Confirm(Conflict::NoSuchPort(id.clone(), name.clone()));
            }
        }
        if !graph.has_link(key) {
            Verdict::Confirm(Conflict::NoSuchLink(key.clone()))
        } else {
            Verdict::Apply
        }
    }
}

/// The standard classification table.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultPolicy;

impl ConflictPolicy for DefaultPolicy {}
