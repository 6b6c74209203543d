/// In-memory multigraph storage with integrity checks.
///
/// This module implements the authoritative graph a session owns: nodes with
/// ordered ports and opaque state, directed links identified by their
/// endpoint 4-tuple, and the monotonic revision counter that numbers every
/// outbound protocol message.
///
/// The storage maintains three link structures:
///
/// 1. **Primary set**: all links by their 4-tuple key
/// 2. **Start index**: links grouped by start node, insertion-ordered
/// 3. **End index**: links grouped by end node, insertion-ordered
///
/// The indices exist for O(1) cascade on node removal and must agree with
/// the primary set at all times; a disagreement is a bug and crashes the
/// session. Every observable mutation is published on the storage
/// [`EventHub`](crate::events::EventHub).
use crate::error::{GraphError, GraphResult};
use crate::events::{EventHub, StorageEvent};
use crate::types::{LinkKey, NodeId, Port, StateMap};
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};

/// A graph node: ordered ports plus an opaque state object.
///
/// The port sequence is insertion-ordered and port names are unique within
/// the node. The ordered list and the name index are always updated
/// together.
#[derive(Debug, Clone)]
pub struct Node {
    id: NodeId,
    ports: Vec<Port>,
    ports_by_name: HashMap<String, usize>,
    state: StateMap,
}

impl Node {
    /// Create a node with no ports and empty state.
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            ports: Vec::new(),
            ports_by_name: HashMap::new(),
            state: StateMap::new(),
        }
    }

    /// The node's id.
    pub fn id(&self) -> &NodeId {
        &self.id
    }

    /// Whether a port with this name exists.
    pub fn has_port(&self, name: &str) -> bool {
        self.ports_by_name.contains_key(name)
    }

    /// Look up a port by name.
    pub fn get_port(&self, name: &str) -> Option<&Port> {
        self.ports_by_name.get(name).map(|&i| &self.ports[i])
    }

    /// Insert a port, at `index` or at the tail.
    ///
    /// Inserting a duplicate name is a caller bug.
    pub fn add_port(&mut self, port: Port, index: Option<usize>) {
        assert!(
            !self.ports_by_name.contains_key(&port.name),
            "duplicate port '{}' on node {}",
            port.name,
            self.id
        );
        let index = index.unwrap_or(self.ports.len());
        self.ports.insert(index, port);
        self.reindex(index);
    }

    /// Remove a port by name. Returns the removed port, or `None` if no
    /// port had that name.
    pub fn remove_port(&mut self, name: &str) -> Option<Port> {
        let index = self.ports_by_name.remove(name)?;
        let port = self.ports.remove(index);
        self.reindex(index);
        Some(port)
    }

    // Repair the name index for every port at or after `from`.
    fn reindex(&mut self, from: usize) {
        for (i, port) in self.ports.iter().enumerate().skip(from) {
            self.ports_by_name.insert(port.name.clone(), i);
        }
    }

    /// The ordered ports.
    pub fn ports(&self) -> &[Port] {
        &self.ports
    }

    /// The ordered ports, serialized to their wire shape.
    pub fn serialized_ports(&self) -> Vec<JsonValue> {
        self.ports.iter().map(Port::serialize).collect()
    }

    /// The node's state object.
    pub fn state(&self) -> &StateMap {
        &self.state
    }

    /// Replace the state object. Void mutator: the caller re-reads
    /// [`state`](Self::state) for the fan-out payload.
    pub fn set_state(&mut self, state: StateMap) {
        self.state = state;
    }

    #[cfg(test)]
    pub(crate) fn index_is_consistent(&self) -> bool {
        self.ports.len() == self.ports_by_name.len()
            && self
                .ports
                .iter()
                .enumerate()
                .all(|(i, p)| self.ports_by_name.get(&p.name) == Some(&i))
    }
}

/// The session's authoritative multigraph.
#[derive(Debug)]
pub struct Graph {
    nodes: HashMap<NodeId, Node>,
    links: HashSet<LinkKey>,
    links_by_start: HashMap<NodeId, Vec<LinkKey>>,
    links_by_end: HashMap<NodeId, Vec<LinkKey>>,
    rev: u64,
    events: EventHub,
}

impl Graph {
    /// Create an empty graph with the revision counter at zero.
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            links: HashSet::new(),
            links_by_start: HashMap::new(),
            links_by_end: HashMap::new(),
            rev: 0,
            events: EventHub::new(),
        }
    }

    /// The storage event hub.
    pub fn events(&self) -> &EventHub {
        &self.events
    }

    /// Allocate the next server revision. Post-increment: returns the
    /// current value, then advances. Exactly one revision is consumed per
    /// outbound protocol message.
    pub fn next_rev(&mut self) -> u64 {
        let old = self.rev;
        self.rev += 1;
        old
    }

    /// The revision the next outbound message will carry.
    pub fn current_rev(&self) -> u64 {
        self.rev
    }

    /// Whether a node with this id exists.
    pub fn has_node(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Look up a node.
    pub fn get_node(&self, id: &NodeId) -> GraphResult<&Node> {
        self.nodes.get(id).ok_or_else(|| GraphError::NoSuchNode {
            id: id.0.clone(),
        })
    }

    /// Look up a node mutably.
    pub fn get_node_mut(&mut self, id: &NodeId) -> GraphResult<&mut Node> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| GraphError::NoSuchNode { id: id.0.clone() })
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of links.
    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Insert a node. Inserting an id twice is a caller bug; the conflict
    /// classifier screens duplicates before this is reached.
    pub fn add_node(&mut self, node: Node) {
        let id = node.id().clone();
        let previous = self.nodes.insert(id.clone(), node);
        assert!(previous.is_none(), "node {} inserted twice", id);
        self.events.emit(StorageEvent::NodeAdded(id));
    }

    /// Delete a node. All incident links must already have been removed by
    /// the caller; a remaining incident link is a cascade bug.
    pub fn remove_node(&mut self, id: &NodeId) {
        assert!(
            self.links_by_start.get(id).map_or(true, Vec::is_empty)
                && self.links_by_end.get(id).map_or(true, Vec::is_empty),
            "node {} removed with incident links",
            id
        );
        self.links_by_start.remove(id);
        self.links_by_end.remove(id);
        let removed = self.nodes.remove(id);
        assert!(removed.is_some(), "node {} removed twice", id);
        self.events.emit(StorageEvent::NodeRemoved(id.clone()));
    }

    /// Whether a link with this exact 4-tuple exists.
    pub fn has_link(&self, key: &LinkKey) -> bool {
        self.links.contains(key)
    }

    /// Insert a link, updating all three structures atomically.
    pub fn add_link(&mut self, key: LinkKey) {
        let inserted = self.links.insert(key.clone());
        assert!(inserted, "link {} inserted twice", key);
        self.links_by_start
            .entry(key.start_id.clone())
            .or_default()
            .push(key.clone());
        self.links_by_end
            .entry(key.end_id.clone())
            .or_default()
            .push(key.clone());
        self.events.emit(StorageEvent::LinkAdded(key));
    }

    /// Delete a link, updating all three structures atomically.
    pub fn remove_link(&mut self, key: &LinkKey) {
        let removed = self.links.remove(key);
        assert!(removed, "link {} removed twice", key);
        let starts = self
            .links_by_start
            .get_mut(&key.start_id)
            .expect("start index missing for known link");
        let at = starts
            .iter()
            .position(|k| k == key)
            .expect("start index entry missing for known link");
        starts.remove(at);
        let ends = self
            .links_by_end
            .get_mut(&key.end_id)
            .expect("end index missing for known link");
        let at = ends
            .iter()
            .position(|k| k == key)
            .expect("end index entry missing for known link");
        ends.remove(at);
        self.events.emit(StorageEvent::LinkRemoved(key.clone()));
    }

    /// All node ids, sorted.
    pub fn node_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.nodes.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// All links, sorted by key.
    pub fn all_links(&self) -> Vec<LinkKey> {
        let mut links: Vec<LinkKey> = self.links.iter().cloned().collect();
        links.sort();
        links
    }

    /// Links starting at `id`, in insertion order.
    ///
    /// Returns an owned snapshot so the caller may remove links while
    /// iterating.
    pub fn find_links_startswith(&self, id: &NodeId) -> Vec<LinkKey> {
        self.links_by_start.get(id).cloned().unwrap_or_default()
    }

    /// Links ending at `id`, in insertion order. Owned snapshot, like
    /// [`find_links_startswith`](Self::find_links_startswith).
    pub fn find_links_endswith(&self, id: &NodeId) -> Vec<LinkKey> {
        self.links_by_end.get(id).cloned().unwrap_or_default()
    }

    /// Insert a port on a node, publishing `change:ports`.
    pub fn add_port(&mut self, id: &NodeId, port: Port, index: Option<usize>) -> GraphResult<()> {
        self.get_node_mut(id)?.add_port(port, index);
        self.events.emit(StorageEvent::PortsChanged(id.clone()));
        Ok(())
    }

    /// Remove a port from a node, publishing `change:ports`.
    pub fn remove_port(&mut self, id: &NodeId, name: &str) -> GraphResult<Option<Port>> {
        let port = self.get_node_mut(id)?.remove_port(name);
        self.events.emit(StorageEvent::PortsChanged(id.clone()));
        Ok(port)
    }

    /// Replace a node's state, publishing `change:state`.
    pub fn set_state(&mut self, id: &NodeId, state: StateMap) -> GraphResult<()> {
        self.get_node_mut(id)?.set_state(state);
        self.events.emit(StorageEvent::StateChanged(id.clone()));
        Ok(())
    }

    /// Verify the structural invariants.
    ///
    /// Used by tests; the apply paths maintain these incrementally and
    /// assert on the spot when they cannot.
    pub fn check_integrity(&self) -> bool {
        // Every link's endpoints name existing nodes and existing ports.
        for key in &self.links {
            let (start, end) = match (self.nodes.get(&key.start_id), self.nodes.get(&key.end_id)) {
                (Some(s), Some(e)) => (s, e),
                _ => return false,
            };
            if !start.has_port(&key.start_name) || !end.has_port(&key.end_name) {
                return false;
            }
        }
        // The three link structures agree.
        let by_start: usize = self.links_by_start.values().map(Vec::len).sum();
        let by_end: usize = self.links_by_end.values().map(Vec::len).sum();
        if by_start != self.links.len() || by_end != self.links.len() {
            return false;
        }
        self.links_by_start
            .values()
            .chain(self.links_by_end.values())
            .flatten()
            .all(|key| self.links.contains(key))
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}
