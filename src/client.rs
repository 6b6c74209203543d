/// Client-side reconciliation mirror.
///
/// A client applies its own edits optimistically, stamping each with a local
/// revision, and later reconciles them against the server's authoritative
/// stream. Per tracked key (node existence, port list, state object, link
/// existence) the mirror keeps a [`Repo`] with two branches:
///
/// - `confirmed` — values the server acknowledged, keyed by server revision;
/// - `conflict` — optimistic local writes, keyed by client revision;
///
/// plus an ordered queue of client revisions awaiting their origin echo.
/// Every violation of the protocol (a server revision out of sequence, an
/// echo that does not match the queue head, a cell written twice) marks the
/// mirror as desynchronized: the client must reconnect and rebuild from
/// scratch.
use crate::error::{GraphError, GraphResult};
use crate::protocol::{Event, Frame};
use crate::types::{ClientRev, LinkKey, NodeId, ServerRev};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap, VecDeque};

/// Two-valued existence state for nodes and links.
///
/// Used instead of a bare boolean because the values travel through
/// reconciliation history and need to be self-described.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Existence {
    /// The entity exists.
    Created,
    /// The entity does not exist.
    Removed,
}

/// One value slot at one revision.
///
/// A cell must be empty before it is written and filled before it is read;
/// both demands are protocol invariants, not recoverable states.
#[derive(Debug, Clone)]
pub struct Cell<V> {
    value: Option<V>,
}

impl<V> Default for Cell<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Cell<V> {
    /// Create an empty cell.
    pub fn new() -> Self {
        Self { value: None }
    }

    /// Whether the cell has never been written.
    pub fn is_empty(&self) -> bool {
        self.value.is_none()
    }

    /// Write the cell. Demands empty.
    pub fn set(&mut self, rev: u64, value: V) -> GraphResult<()> {
        if self.value.is_some() {
            return Err(GraphError::CellOccupied { rev });
        }
        self.value = Some(value);
        Ok(())
    }

    /// Read the cell. Demands filled.
    pub fn get(&self, rev: u64) -> GraphResult<&V> {
        self.value.as_ref().ok_or(GraphError::CellEmpty { rev })
    }
}

/// One branch of a repo: values by revision.
#[derive(Debug, Clone)]
pub struct Branch<V> {
    cells: BTreeMap<u64, Cell<V>>,
}

impl<V> Default for Branch<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Branch<V> {
    /// Create an empty branch.
    pub fn new() -> Self {
        Self {
            cells: BTreeMap::new(),
        }
    }

    /// Record a value at a revision. The revision's cell must be empty.
    pub fn add(&mut self, rev: u64, value: V) -> GraphResult<()> {
        self.cells.entry(rev).or_default().set(rev, value)
    }

    /// Read the value at a revision. The cell must be filled.
    pub fn get(&self, rev: u64) -> GraphResult<&V> {
        self.cells
            .get(&rev)
            .ok_or(GraphError::CellEmpty { rev })?
            .get(rev)
    }

    /// The highest recorded revision, if any.
    pub fn top(&self) -> Option<u64> {
        self.cells.keys().next_back().copied()
    }

    /// Whether the branch holds no values.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Per-key reconciliation state: a confirmed branch, a conflict branch, and
/// the queue of client revisions still awaiting their origin echo.
#[derive(Debug, Clone)]
pub struct Repo<V> {
    confirmed: Branch<V>,
    conflict: Branch<V>,
    unresolved: VecDeque<ClientRev>,
}

impl<V> Default for Repo<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Repo<V> {
    /// Create an empty repo.
    pub fn new() -> Self {
        Self {
            confirmed: Branch::new(),
            conflict: Branch::new(),
            unresolved: VecDeque::new(),
        }
    }

    /// The client wrote `value` optimistically at its local `client_rev`.
    pub fn initiate(&mut self, client_rev: ClientRev, value: V) -> GraphResult<()> {
        self.conflict.add(client_rev, value)?;
        self.unresolved.push_back(client_rev);
        Ok(())
    }

    /// An origin-echoed message arrived: the head of the unresolved queue
    /// must match the echoed client revision, and the authoritative value is
    /// recorded at the server revision.
    pub fn resolve(&mut self, server_rev: ServerRev, origin: ClientRev, value: V) -> GraphResult<()> {
        self.confirmed.add(server_rev, value)?;
        let expected = self
            .unresolved
            .pop_front()
            .ok_or(GraphError::EmptyResolveQueue { origin })?;
        if expected != origin {
            return Err(GraphError::RevisionMismatch {
                got: origin,
                expected,
            });
        }
        Ok(())
    }

    /// A non-echoed message arrived (another participant's edit, or a
    /// post-resolution follow-up): record it on the confirmed branch.
    pub fn store(&mut self, server_rev: ServerRev, value: V) -> GraphResult<()> {
        self.confirmed.add(server_rev, value)
    }

    /// The confirmed branch.
    pub fn confirmed(&self) -> &Branch<V> {
        &self.confirmed
    }

    /// The conflict branch.
    pub fn conflict(&self) -> &Branch<V> {
        &self.conflict
    }

    /// Client revisions still awaiting an echo, oldest first.
    pub fn unresolved(&self) -> &VecDeque<ClientRev> {
        &self.unresolved
    }
}

/// The client's mirrored graph: one repo per tracked key.
#[derive(Debug, Default)]
pub struct ClientGraph {
    rev: ClientRev,
    nodes: HashMap<NodeId, Repo<Existence>>,
    ports: HashMap<NodeId, Repo<Vec<JsonValue>>>,
    states: HashMap<NodeId, Repo<Option<JsonValue>>>,
    links: HashMap<LinkKey, Repo<Existence>>,
}

impl ClientGraph {
    /// Create an empty mirror.
    pub fn new() -> Self {
        Self::default()
    }

    /// The client's current local revision (the next intent's stamp).
    pub fn local_rev(&self) -> ClientRev {
        self.rev
    }

    fn next_local_rev(&mut self) -> ClientRev {
        let old = self.rev;
        self.rev += 1;
        old
    }

    // ------------------------------------------------------------------ //
    // Local user actions: optimistic writes stamped with the local rev.
    // ------------------------------------------------------------------ //

    /// Optimistically create a node. Returns the stamped client revision.
    pub fn create_node(&mut self, id: &NodeId) -> GraphResult<ClientRev> {
        let rev = self.next_local_rev();
        self.nodes
            .entry(id.clone())
            .or_default()
            .initiate(rev, Existence::Created)?;
        Ok(rev)
    }

    /// Optimistically remove a node. Returns the stamped client revision.
    pub fn remove_node(&mut self, id: &NodeId) -> GraphResult<ClientRev> {
        let rev = self.next_local_rev();
        self.nodes
            .entry(id.clone())
            .or_default()
            .initiate(rev, Existence::Removed)?;
        Ok(rev)
    }

    /// Optimistically add a link. Returns the stamped client revision.
    pub fn add_link(&mut self, key: &LinkKey) -> GraphResult<ClientRev> {
        let rev = self.next_local_rev();
        self.links
            .entry(key.clone())
            .or_default()
            .initiate(rev, Existence::Created)?;
        Ok(rev)
    }

    /// Optimistically remove a link. Returns the stamped client revision.
    pub fn remove_link(&mut self, key: &LinkKey) -> GraphResult<ClientRev> {
        let rev = self.next_local_rev();
        self.links
            .entry(key.clone())
            .or_default()
            .initiate(rev, Existence::Removed)?;
        Ok(rev)
    }

    // ------------------------------------------------------------------ //
    // Server stream: resolve when origin-echoed, store otherwise.
    // ------------------------------------------------------------------ //

    fn apply_existence(
        repo: &mut Repo<Existence>,
        rev: ServerRev,
        origin: Option<ClientRev>,
        value: Existence,
    ) -> GraphResult<()> {
        match origin {
            Some(origin) => repo.resolve(rev, origin, value),
            None => repo.store(rev, value),
        }
    }

    /// `createNode` arrived.
    pub fn node_added(
        &mut self,
        id: &NodeId,
        rev: ServerRev,
        origin: Option<ClientRev>,
    ) -> GraphResult<()> {
        let repo = self.nodes.entry(id.clone()).or_default();
        Self::apply_existence(repo, rev, origin, Existence::Created)
    }

    /// `removeNode` arrived.
    pub fn node_removed(
        &mut self,
        id: &NodeId,
        rev: ServerRev,
        origin: Option<ClientRev>,
    ) -> GraphResult<()> {
        let repo = self.nodes.entry(id.clone()).or_default();
        Self::apply_existence(repo, rev, origin, Existence::Removed)
    }

    /// `changePorts` arrived.
    pub fn ports_changed(
        &mut self,
        id: &NodeId,
        ports: Vec<JsonValue>,
        rev: ServerRev,
        origin: Option<ClientRev>,
    ) -> GraphResult<()> {
        let repo = self.ports.entry(id.clone()).or_default();
        match origin {
            Some(origin) => repo.resolve(rev, origin, ports),
            None => repo.store(rev, ports),
        }
    }

    /// `changeState` arrived. `state` is `None` when the server sent `null`
    /// to cancel an optimistic write.
    pub fn state_changed(
        &mut self,
        id: &NodeId,
        state: Option<JsonValue>,
        rev: ServerRev,
        origin: Option<ClientRev>,
    ) -> GraphResult<()> {
        let repo = self.states.entry(id.clone()).or_default();
        match origin {
            Some(origin) => repo.resolve(rev, origin, state),
            None => repo.store(rev, state),
        }
    }

    /// `addLink` arrived.
    pub fn link_added(
        &mut self,
        key: &LinkKey,
        rev: ServerRev,
        origin: Option<ClientRev>,
    ) -> GraphResult<()> {
        let repo = self.links.entry(key.clone()).or_default();
        Self::apply_existence(repo, rev, origin, Existence::Created)
    }

    /// `removeLink` arrived.
    pub fn link_removed(
        &mut self,
        key: &LinkKey,
        rev: ServerRev,
        origin: Option<ClientRev>,
    ) -> GraphResult<()> {
        let repo = self.links.entry(key.clone()).or_default();
        Self::apply_existence(repo, rev, origin, Existence::Removed)
    }

    /// The node existence repo for a key, if any activity touched it.
    pub fn node_repo(&self, id: &NodeId) -> Option<&Repo<Existence>> {
        self.nodes.get(id)
    }

    /// The link existence repo for a key, if any activity touched it.
    pub fn link_repo(&self, key: &LinkKey) -> Option<&Repo<Existence>> {
        self.links.get(key)
    }

    /// The port list repo for a node, if any activity touched it.
    pub fn ports_repo(&self, id: &NodeId) -> Option<&Repo<Vec<JsonValue>>> {
        self.ports.get(id)
    }

    /// The state repo for a node, if any activity touched it.
    pub fn state_repo(&self, id: &NodeId) -> Option<&Repo<Option<JsonValue>>> {
        self.states.get(id)
    }
}

/// The client's session endpoint: verifies the server revision stream and
/// routes events into the mirror.
#[derive(Debug, Default)]
pub struct ClientGraphModel {
    graph: ClientGraph,
    expected_server_rev: ServerRev,
}

impl ClientGraphModel {
    /// Create a model expecting server revision 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// The mirrored graph.
    pub fn graph(&self) -> &ClientGraph {
        &self.graph
    }

    /// The mirrored graph, mutably (for local user actions).
    pub fn graph_mut(&mut self) -> &mut ClientGraph {
        &mut self.graph
    }

    /// The server revision the next inbound frame must carry.
    pub fn expected_server_rev(&self) -> ServerRev {
        self.expected_server_rev
    }

    /// Verify and advance the revision cursor: the stream is gap-free, so
    /// each frame's `rev` must equal the expected value exactly.
    fn check_rev(&mut self, rev: ServerRev) -> GraphResult<()> {
        if rev != self.expected_server_rev {
            return Err(GraphError::RevisionMismatch {
                got: rev,
                expected: self.expected_server_rev,
            });
        }
        self.expected_server_rev = rev + 1;
        Ok(())
    }

    /// Dispatch one inbound server frame.
    pub fn dispatch(&mut self, frame: &Frame) -> GraphResult<()> {
        let (rev, origin, event) = Event::from_frame(frame)?;
        self.check_rev(rev)?;
        match event {
            Event::Nop => Ok(()),
            Event::CreateNode { id } => self.graph.node_added(&id, rev, origin),
            Event::RemoveNode { id } => self.graph.node_removed(&id, rev, origin),
            Event::ChangePorts { id, ports } => self.graph.ports_changed(&id, ports, rev, origin),
            Event::ChangeState { id, state } => {
                let state = state.map(JsonValue::Object);
                self.graph.state_changed(&id, state, rev, origin)
            }
            Event::AddLink { key } => self.graph.link_added(&key, rev, origin),
            Event::RemoveLink { key } => self.graph.link_removed(&key, rev, origin),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(event: Event, rev: ServerRev, origin: Option<ClientRev>) -> Frame {
        event.to_frame(rev, origin)
    }

    fn ports_value() -> Vec<JsonValue> {
        vec![
            json!({"name": "start", "title": ""}),
            json!({"name": "end", "title": ""}),
        ]
    }

    #[test]
    fn test_cell_write_demands_empty() {
        let mut cell = Cell::new();
        cell.set(0, Existence::Created).unwrap();
        assert!(matches!(
            cell.set(0, Existence::Removed),
            Err(GraphError::CellOccupied { rev: 0 })
        ));
    }

    #[test]
    fn test_cell_read_demands_filled() {
        let cell: Cell<Existence> = Cell::new();
        assert!(matches!(cell.get(3), Err(GraphError::CellEmpty { rev: 3 })));
    }

    #[test]
    fn test_branch_top() {
        let mut branch = Branch::new();
        assert_eq!(branch.top(), None);
        branch.add(2, Existence::Created).unwrap();
        branch.add(7, Existence::Removed).unwrap();
        assert_eq!(branch.top(), Some(7));
        assert_eq!(branch.get(2).unwrap(), &Existence::Created);
    }

    #[test]
    fn test_repo_initiate_then_resolve() {
        let mut repo = Repo::new();
        repo.initiate(0, Existence::Created).unwrap();
        assert_eq!(repo.unresolved().len(), 1);

        repo.resolve(5, 0, Existence::Created).unwrap();
        assert!(repo.unresolved().is_empty());
        assert_eq!(repo.confirmed().get(5).unwrap(), &Existence::Created);
        assert_eq!(repo.conflict().get(0).unwrap(), &Existence::Created);
    }

    #[test]
    fn test_repo_resolve_wrong_echo() {
        let mut repo = Repo::new();
        repo.initiate(0, Existence::Created).unwrap();
        repo.initiate(1, Existence::Removed).unwrap();

        let result = repo.resolve(5, 1, Existence::Removed);
        assert!(matches!(
            result,
            Err(GraphError::RevisionMismatch {
                got: 1,
                expected: 0
            })
        ));
    }

    #[test]
    fn test_repo_resolve_without_initiate() {
        let mut repo = Repo::new();
        let result = repo.resolve(5, 0, Existence::Created);
        assert!(matches!(
            result,
            Err(GraphError::EmptyResolveQueue { origin: 0 })
        ));
    }

    #[test]
    fn test_own_create_round_trip() {
        let mut model = ClientGraphModel::new();
        let id = NodeId::from("N1");

        // Local optimistic write at client rev 0.
        let rev = model.graph_mut().create_node(&id).unwrap();
        assert_eq!(rev, 0);

        // Server replies with the echo, then the system follow-ups.
        model
            .dispatch(&frame(Event::CreateNode { id: id.clone() }, 0, Some(0)))
            .unwrap();
        model
            .dispatch(&frame(
                Event::ChangePorts {
                    id: id.clone(),
                    ports: ports_value(),
                },
                1,
                None,
            ))
            .unwrap();
        model
            .dispatch(&frame(
                Event::ChangeState {
                    id: id.clone(),
                    state: Some(Default::default()),
                },
                2,
                None,
            ))
            .unwrap();

        assert_eq!(model.expected_server_rev(), 3);
        let repo = model.graph().node_repo(&id).unwrap();
        assert!(repo.unresolved().is_empty());
        assert_eq!(repo.confirmed().get(0).unwrap(), &Existence::Created);
    }

    #[test]
    fn test_observer_stream_uses_store() {
        let mut model = ClientGraphModel::new();
        let id = NodeId::from("N1");

        model
            .dispatch(&frame(Event::CreateNode { id: id.clone() }, 0, None))
            .unwrap();

        let repo = model.graph().node_repo(&id).unwrap();
        assert!(repo.unresolved().is_empty());
        assert!(repo.conflict().is_empty());
        assert_eq!(repo.confirmed().get(0).unwrap(), &Existence::Created);
    }

    #[test]
    fn test_nop_advances_cursor_only() {
        let mut model = ClientGraphModel::new();
        model.dispatch(&frame(Event::Nop, 0, None)).unwrap();
        model.dispatch(&frame(Event::Nop, 1, None)).unwrap();
        assert_eq!(model.expected_server_rev(), 2);
    }

    #[test]
    fn test_out_of_sequence_rev_is_protocol_error() {
        let mut model = ClientGraphModel::new();
        let result = model.dispatch(&frame(Event::Nop, 5, None));
        assert!(matches!(
            result,
            Err(GraphError::RevisionMismatch {
                got: 5,
                expected: 0
            })
        ));
    }

    #[test]
    fn test_duplicate_rev_is_protocol_error() {
        let mut model = ClientGraphModel::new();
        model.dispatch(&frame(Event::Nop, 0, None)).unwrap();
        let result = model.dispatch(&frame(Event::Nop, 0, None));
        assert!(matches!(result, Err(GraphError::RevisionMismatch { .. })));
    }

    #[test]
    fn test_cancelled_state_stores_null() {
        let mut model = ClientGraphModel::new();
        let id = NodeId::from("N1");

        // Optimistic state write, cancelled by the server with null.
        model
            .graph_mut()
            .states
            .entry(id.clone())
            .or_default()
            .initiate(0, Some(json!({"state": true})))
            .unwrap();
        model
            .dispatch(&frame(
                Event::ChangeState {
                    id: id.clone(),
                    state: None,
                },
                0,
                Some(0),
            ))
            .unwrap();

        let repo = model.graph().state_repo(&id).unwrap();
        assert_eq!(repo.confirmed().get(0).unwrap(), &None);
        assert!(repo.unresolved().is_empty());
    }

    #[test]
    fn test_link_lifecycle() {
        let mut model = ClientGraphModel::new();
        let key = LinkKey::new("N1", "start", "N2", "end");

        let rev = model.graph_mut().add_link(&key).unwrap();
        assert_eq!(rev, 0);
        model
            .dispatch(&frame(Event::AddLink { key: key.clone() }, 0, Some(0)))
            .unwrap();
        model
            .dispatch(&frame(Event::RemoveLink { key: key.clone() }, 1, None))
            .unwrap();

        let repo = model.graph().link_repo(&key).unwrap();
        assert_eq!(repo.confirmed().get(0).unwrap(), &Existence::Created);
        assert_eq!(repo.confirmed().get(1).unwrap(), &Existence::Removed);
        assert_eq!(repo.confirmed().top(), Some(1));
    }

    #[test]
    fn test_unknown_server_command() {
        let mut model = ClientGraphModel::new();
        let mut kwargs = serde_json::Map::new();
        kwargs.insert("rev".into(), json!(0));
        let frame = Frame::new("mystery", vec![], kwargs);
        assert!(matches!(
            model.dispatch(&frame),
            Err(GraphError::InvalidCommand { .. })
        ));
        // The cursor is untouched by a rejected frame.
        assert_eq!(model.expected_server_rev(), 0);
    }
}
