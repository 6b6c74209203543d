/// Session model: participants plus the authoritative graph.
///
/// A session owns one [`Graph`] and the set of connected participants. It
/// turns each inbound intent into a fan-out plan:
///
/// 1. classify the intent against graph state (Apply / Confirm / Cancel),
/// 2. mutate the graph on Apply,
/// 3. allocate one server revision per outbound message and deliver a frame
///    to *every* participant — the originator gets the reply with its client
///    revision echoed in `origin`, the others get the same event un-echoed
///    or a `nop`.
///
/// The whole sequence runs on one logical task, so classification, mutation
/// and fan-out are atomic with respect to other intents and revision numbers
/// match message order exactly.
use crate::classifier::{ConflictPolicy, DefaultPolicy, Verdict};
use crate::error::GraphResult;
use crate::protocol::{Event, Frame, Intent};
use crate::storage::{Graph, Node};
use crate::types::{ClientRev, LinkKey, NodeId, Port, StateMap, UserId};
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value as JsonValue};
use tokio::sync::mpsc;
use tracing::debug;

/// Who issued an intent, and the local revision they stamped it with.
///
/// Attached by the session to every inbound intent for the duration of its
/// handling, so the reply can echo the client's number back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    /// The originating participant
    pub user: UserId,
    /// The client's local revision for this intent
    pub rev: ClientRev,
}

impl Origin {
    /// Create an origin record.
    pub fn new(user: UserId, rev: ClientRev) -> Self {
        Self { user, rev }
    }
}

/// A connected client: a stable id plus its ordered outbound sink.
#[derive(Debug)]
pub struct Participant {
    id: UserId,
    profile: Map<String, JsonValue>,
    outbound: mpsc::UnboundedSender<Frame>,
    connected_at: DateTime<Utc>,
}

impl Participant {
    /// Create a participant with the given profile and sink.
    pub fn new(
        id: UserId,
        profile: Map<String, JsonValue>,
        outbound: mpsc::UnboundedSender<Frame>,
    ) -> Self {
        Self {
            id,
            profile,
            outbound,
            connected_at: Utc::now(),
        }
    }

    /// The participant's id.
    pub fn id(&self) -> &UserId {
        &self.id
    }

    /// The profile sent in the `auth` handshake.
    pub fn profile(&self) -> &Map<String, JsonValue> {
        &self.profile
    }

    /// When this participant connected.
    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Queue a frame for delivery. FIFO and lossless while the channel is
    /// up; a frame to a participant whose transport already closed is
    /// dropped silently.
    pub fn send(&self, frame: Frame) {
        let _ = self.outbound.send(frame);
    }
}

/// The participant set, in insertion order.
///
/// Fan-out iterates this order, which makes delivery deterministic across
/// participants.
#[derive(Debug, Default)]
pub struct Roster {
    participants: Vec<Participant>,
}

impl Roster {
    /// Create an empty roster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a participant at the tail.
    pub fn add(&mut self, participant: Participant) {
        self.participants.push(participant);
    }

    /// Remove a participant; in-flight echoes for it are simply no longer
    /// fanned out.
    pub fn remove(&mut self, id: &UserId) {
        self.participants.retain(|p| p.id() != id);
    }

    /// Look up a participant by id.
    pub fn get(&self, id: &UserId) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id() == id)
    }

    /// Number of connected participants.
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    /// Whether the roster is empty.
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Iterate participants in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.participants.iter()
    }

    /// Send one frame to every participant, in insertion order.
    pub fn broadcast(&self, frame: Frame) {
        for participant in &self.participants {
            participant.send(frame.clone());
        }
    }
}

/// Capability point: how the session builds a node for `createNode`.
pub trait NodeFactory: Send {
    /// Produce the node that will be inserted for this id.
    fn make_node(&self, id: &NodeId) -> Node;
}

/// The standard node shape: two ports, `start` and `end`, and empty state.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultNodeFactory;

impl NodeFactory for DefaultNodeFactory {
    fn make_node(&self, id: &NodeId) -> Node {
        let mut node = Node::new(id.clone());
        node.add_port(Port::new("start", ""), None);
        node.add_port(Port::new("end", ""), None);
        node
    }
}

/// The seam the transport drives: one session model per connected channel
/// set. Implementations decide what a participant looks like and how frames
/// are dispatched.
pub trait SessionModel: Send {
    /// Allocate a participant for a newly opened channel and send its
    /// `auth` handshake. Returns the new participant's id.
    fn open_channel(&mut self, outbound: mpsc::UnboundedSender<Frame>) -> UserId;

    /// Drop a participant whose transport closed.
    fn close_channel(&mut self, user: &UserId);

    /// Handle one inbound frame from `user`. An unknown command name
    /// returns [`GraphError::InvalidCommand`]; the caller drops the frame
    /// and keeps the connection.
    fn handle(&mut self, user: &UserId, frame: Frame) -> GraphResult<()>;
}

/// The collaborative graph session.
pub struct GraphModel {
    graph: Graph,
    roster: Roster,
    policy: Box<dyn ConflictPolicy>,
    factory: Box<dyn NodeFactory>,
}

impl GraphModel {
    /// Create a session with the default classification table and node
    /// factory.
    pub fn new() -> Self {
        Self::with_parts(Box::new(DefaultPolicy), Box::new(DefaultNodeFactory))
    }

    /// Create a session with custom classifier and node factory hooks.
    pub fn with_parts(policy: Box<dyn ConflictPolicy>, factory: Box<dyn NodeFactory>) -> Self {
        Self {
            graph: Graph::new(),
            roster: Roster::new(),
            policy,
            factory,
        }
    }

    /// The owned graph.
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// The owned graph, mutably.
    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    /// The participant set.
    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub(crate) fn policy(&self) -> &dyn ConflictPolicy {
        self.policy.as_ref()
    }

    /// Register a participant with the default profile (`id` only) and send
    /// its `auth` frame.
    pub fn create_new_user(&mut self, outbound: mpsc::UnboundedSender<Frame>) -> UserId {
        let id = UserId::generate();
        let mut profile = Map::new();
        profile.insert("id".into(), json!(id.0));
        let participant = Participant::new(id.clone(), profile.clone(), outbound);
        participant.send(Frame::auth(profile));
        self.roster.add(participant);
        id
    }

    /// Dispatch one typed intent. `origin` is `None` for intents the server
    /// generates internally.
    pub fn dispatch(&mut self, origin: Option<&Origin>, intent: Intent) {
        match intent {
            Intent::CreateNode { id } => self.create_node(origin, &id),
            Intent::RemoveNode { id } => self.remove_node(origin, &id),
            Intent::ChangeState { id, state } => self.change_state(origin, &id, state),
            Intent::AddLink { key } => self.add_link(origin, &key),
            Intent::RemoveLink { key } => self.remove_link(origin, &key),
        }
    }

    /// `createNode` intent.
    ///
    /// Apply inserts the factory-made node and fans out `createNode` (with
    /// origin echo), then the initial `changePorts` and `changeState`
    /// un-echoed: the follow-ups are system-initiated on the new node's
    /// behalf.
    pub fn create_node(&mut self, origin: Option<&Origin>, id: &NodeId) {
        match self.policy.check_create_node(&self.graph, id) {
            Verdict::Apply => {
                let node = self.factory.make_node(id);
                let ports = node.serialized_ports();
                let state = node.state().clone();
                self.graph.add_node(node);
                self.call_all(origin, Event::CreateNode { id: id.clone() });
                self.call_all(None, Event::ChangePorts {
                    id: id.clone(),
                    ports,
                });
                self.call_all(None, Event::ChangeState {
                    id: id.clone(),
                    state: Some(state),
                });
            }
            Verdict::Confirm(conflict) => {
                debug!(%id, ?conflict, "createNode confirmed");
                self.call_self(origin, Event::CreateNode { id: id.clone() });
            }
            Verdict::Cancel(conflict) => {
                debug!(%id, ?conflict, "createNode cancelled");
                self.call_self(origin, Event::RemoveNode { id: id.clone() });
            }
        }
    }

    /// `removeNode` intent.
    ///
    /// Apply cascades every incident link first — outgoing before incoming,
    /// insertion order within each group — then removes the node. The
    /// cascaded `removeLink`s are un-echoed; only the final `removeNode`
    /// carries the origin echo.
    pub fn remove_node(&mut self, origin: Option<&Origin>, id: &NodeId) {
        match self.policy.check_remove_node(&self.graph, id) {
            Verdict::Apply => {
                for key in self.graph.find_links_startswith(id) {
                    self.graph.remove_link(&key);
                    self.call_all(None, Event::RemoveLink { key });
                }
                for key in self.graph.find_links_endswith(id) {
                    self.graph.remove_link(&key);
                    self.call_all(None, Event::RemoveLink { key });
                }
                self.graph.remove_node(id);
                self.call_all(origin, Event::RemoveNode { id: id.clone() });
            }
            Verdict::Confirm(conflict) => {
                debug!(%id, ?conflict, "removeNode confirmed");
                self.call_self(origin, Event::RemoveNode { id: id.clone() });
            }
            Verdict::Cancel(conflict) => {
                // Protocol inverse only: graph state is untouched.
                debug!(%id, ?conflict, "removeNode cancelled");
                self.call_self(origin, Event::CreateNode { id: id.clone() });
            }
        }
    }

    /// `changeState` intent.
    ///
    /// Cancel replies with `changeState(id, null)`: the `null` tells the
    /// originator to drop its optimistic state.
    pub fn change_state(&mut self, origin: Option<&Origin>, id: &NodeId, state: StateMap) {
        match self.policy.check_change_state(&self.graph, id, &state) {
            Verdict::Apply => {
                self.graph
                    .set_state(id, state)
                    .expect("change_state applied to a checked node");
                let state = self
                    .graph
                    .get_node(id)
                    .expect("change_state applied to a checked node")
                    .state()
                    .clone();
                self.call_all(origin, Event::ChangeState {
                    id: id.clone(),
                    state: Some(state),
                });
            }
            Verdict::Cancel(conflict) => {
                debug!(%id, ?conflict, "changeState cancelled");
                self.call_self(origin, Event::ChangeState {
                    id: id.clone(),
                    state: None,
                });
            }
            Verdict::Confirm(conflict) => {
                debug!(%id, ?conflict, "changeState confirmed");
                self.call_self(origin, Event::ChangeState {
                    id: id.clone(),
                    state: None,
                });
            }
        }
    }

    /// `addLink` intent.
    pub fn add_link(&mut self, origin: Option<&Origin>, key: &LinkKey) {
        match self.policy.check_add_link(&self.graph, key) {
            Verdict::Apply => {
                self.graph.add_link(key.clone());
                self.call_all(origin, Event::AddLink { key: key.clone() });
            }
            Verdict::Confirm(conflict) => {
                debug!(%key, ?conflict, "addLink confirmed");
                self.call_self(origin, Event::AddLink { key: key.clone() });
            }
            Verdict::Cancel(conflict) => {
                debug!(%key, ?conflict, "addLink cancelled");
                self.call_self(origin, Event::RemoveLink { key: key.clone() });
            }
        }
    }

    /// `removeLink` intent.
    pub fn remove_link(&mut self, origin: Option<&Origin>, key: &LinkKey) {
        match self.policy.check_remove_link(&self.graph, key) {
            Verdict::Apply => {
                self.graph.remove_link(key);
                self.call_all(origin, Event::RemoveLink { key: key.clone() });
            }
            Verdict::Confirm(conflict) => {
                debug!(%key, ?conflict, "removeLink confirmed");
                self.call_self(origin, Event::RemoveLink { key: key.clone() });
            }
            Verdict::Cancel(conflict) => {
                debug!(%key, ?conflict, "removeLink cancelled");
                self.call_self(origin, Event::AddLink { key: key.clone() });
            }
        }
    }

    /// Fan out an event to the originator only; everyone else receives a
    /// `nop`. One server revision is consumed regardless, so every
    /// participant's cursor advances exactly once.
    pub(crate) fn call_self(&mut self, origin: Option<&Origin>, event: Event) {
        let rev = self.graph.next_rev();
        for participant in self.roster.iter() {
            match origin {
                Some(origin) if &origin.user == participant.id() => {
                    participant.send(event.to_frame(rev, Some(origin.rev)));
                }
                _ => participant.send(Event::Nop.to_frame(rev, None)),
            }
        }
    }

    /// Fan out an event to every participant; the originator's copy carries
    /// the origin echo.
    pub(crate) fn call_all(&mut self, origin: Option<&Origin>, event: Event) {
        let rev = self.graph.next_rev();
        for participant in self.roster.iter() {
            match origin {
                Some(origin) if &origin.user == participant.id() => {
                    participant.send(event.to_frame(rev, Some(origin.rev)));
                }
                _ => participant.send(event.to_frame(rev, None)),
            }
        }
    }
}

impl Default for GraphModel {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionModel for GraphModel {
    fn open_channel(&mut self, outbound: mpsc::UnboundedSender<Frame>) -> UserId {
        self.create_new_user(outbound)
    }

    fn close_channel(&mut self, user: &UserId) {
        self.roster.remove(user);
    }

    fn handle(&mut self, user: &UserId, frame: Frame) -> GraphResult<()> {
        let (rev, intent) = Intent::from_frame(&frame)?;
        let origin = Origin::new(user.clone(), rev);
        self.dispatch(Some(&origin), intent);
        Ok(())
    }
}
