/// Wire protocol for syngraph.
///
/// Every frame on the duplex channel is a UTF-8 text frame holding a
/// 3-element JSON array `[name, args, kwargs]`: a command name, an ordered
/// argument list, and a keyword object. Binary frames are ignored at the
/// transport.
///
/// On top of the raw [`Frame`] this module types the two vocabularies:
///
/// - [`Intent`] — client → server mutation requests, each tagged with the
///   client's local revision in the `rev` kwarg.
/// - [`Event`] — server → client notifications, each carrying the server
///   revision in `rev` and, when directed at the intent's originator, the
///   echoed client revision in `origin`.
use crate::error::{GraphError, GraphResult};
use crate::types::{ClientRev, LinkKey, NodeId, ServerRev, StateMap};
use serde_json::{json, Map, Value as JsonValue};

/// A raw protocol frame: `[name, args, kwargs]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Command name
    pub name: String,
    /// Ordered arguments
    pub args: Vec<JsonValue>,
    /// Keyword arguments
    pub kwargs: Map<String, JsonValue>,
}

impl Frame {
    /// Create a frame from its parts.
    pub fn new(
        name: impl Into<String>,
        args: Vec<JsonValue>,
        kwargs: Map<String, JsonValue>,
    ) -> Self {
        Self {
            name: name.into(),
            args,
            kwargs,
        }
    }

    /// The `auth` handshake frame sent when a channel opens. The profile
    /// becomes the kwargs; it always contains at least `id`.
    pub fn auth(profile: Map<String, JsonValue>) -> Self {
        Self::new("auth", Vec::new(), profile)
    }

    /// Encode to the wire representation.
    pub fn encode(&self) -> String {
        json!([self.name, self.args, self.kwargs]).to_string()
    }

    /// Decode from the wire representation.
    pub fn decode(text: &str) -> GraphResult<Self> {
        let value: JsonValue = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    /// Build a frame from an already-parsed JSON value.
    pub fn from_value(value: JsonValue) -> GraphResult<Self> {
        let parts = match value {
            JsonValue::Array(parts) if parts.len() == 3 => parts,
            other => {
                return Err(GraphError::MalformedFrame {
                    reason: format!("expected a 3-element array, got {}", other),
                })
            }
        };
        let mut parts = parts.into_iter();
        let name = match parts.next() {
            Some(JsonValue::String(name)) => name,
            other => {
                return Err(GraphError::MalformedFrame {
                    reason: format!("frame name must be a string, got {:?}", other),
                })
            }
        };
        let args = match parts.next() {
            Some(JsonValue::Array(args)) => args,
            other => {
                return Err(GraphError::MalformedFrame {
                    reason: format!("frame args must be an array, got {:?}", other),
                })
            }
        };
        let kwargs = match parts.next() {
            Some(JsonValue::Object(kwargs)) => kwargs,
            other => {
                return Err(GraphError::MalformedFrame {
                    reason: format!("frame kwargs must be an object, got {:?}", other),
                })
            }
        };
        Ok(Self { name, args, kwargs })
    }

    /// Read a `u64` kwarg, erroring when absent or mistyped.
    pub fn kwarg_u64(&self, key: &str) -> GraphResult<u64> {
        self.kwargs
            .get(key)
            .and_then(JsonValue::as_u64)
            .ok_or_else(|| GraphError::MalformedFrame {
                reason: format!("missing or non-integer '{}' kwarg on '{}'", key, self.name),
            })
    }

    fn arg_str(&self, index: usize) -> GraphResult<String> {
        self.args
            .get(index)
            .and_then(JsonValue::as_str)
            .map(str::to_string)
            .ok_or_else(|| GraphError::MalformedFrame {
                reason: format!("'{}' argument {} must be a string", self.name, index),
            })
    }

    fn arg_state(&self, index: usize) -> GraphResult<StateMap> {
        match self.args.get(index) {
            Some(JsonValue::Object(map)) => Ok(map.clone()),
            _ => Err(GraphError::MalformedFrame {
                reason: format!("'{}' argument {} must be an object", self.name, index),
            }),
        }
    }

    fn arg_link_key(&self) -> GraphResult<LinkKey> {
        Ok(LinkKey::new(
            self.arg_str(0)?,
            self.arg_str(1)?,
            self.arg_str(2)?,
            self.arg_str(3)?,
        ))
    }
}

/// A client-issued mutation request.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    /// Create a node with the given id.
    CreateNode { id: NodeId },
    /// Remove the node and cascade its links.
    RemoveNode { id: NodeId },
    /// Replace a node's state object.
    ChangeState { id: NodeId, state: StateMap },
    /// Add the exact link.
    AddLink { key: LinkKey },
    /// Remove the exact link.
    RemoveLink { key: LinkKey },
}

impl Intent {
    /// Parse an inbound frame into the client revision and the typed
    /// intent. Unknown names are [`GraphError::InvalidCommand`].
    pub fn from_frame(frame: &Frame) -> GraphResult<(ClientRev, Intent)> {
        let rev = frame.kwarg_u64("rev")?;
        let intent = match frame.name.as_str() {
            "nodeCreated" => Intent::CreateNode {
                id: NodeId(frame.arg_str(0)?),
            },
            "nodeRemoved" => Intent::RemoveNode {
                id: NodeId(frame.arg_str(0)?),
            },
            "nodeStateChanged" => Intent::ChangeState {
                id: NodeId(frame.arg_str(0)?),
                state: frame.arg_state(1)?,
            },
            "linkAdded" => Intent::AddLink {
                key: frame.arg_link_key()?,
            },
            "linkRemoved" => Intent::RemoveLink {
                key: frame.arg_link_key()?,
            },
            other => {
                return Err(GraphError::InvalidCommand {
                    name: other.to_string(),
                })
            }
        };
        Ok((rev, intent))
    }

    /// Encode as an outbound client frame carrying the local revision.
    pub fn to_frame(&self, rev: ClientRev) -> Frame {
        let mut kwargs = Map::new();
        kwargs.insert("rev".into(), json!(rev));
        let (name, args) = match self {
            Intent::CreateNode { id } => ("nodeCreated", vec![json!(id.0)]),
            Intent::RemoveNode { id } => ("nodeRemoved", vec![json!(id.0)]),
            Intent::ChangeState { id, state } => {
                ("nodeStateChanged", vec![json!(id.0), JsonValue::Object(state.clone())])
            }
            Intent::AddLink { key } => ("linkAdded", link_args(key)),
            Intent::RemoveLink { key } => ("linkRemoved", link_args(key)),
        };
        Frame::new(name, args, kwargs)
    }
}

/// A server-issued notification.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A node now exists.
    CreateNode { id: NodeId },
    /// A node no longer exists.
    RemoveNode { id: NodeId },
    /// A node's full port list, in order.
    ChangePorts { id: NodeId, ports: Vec<JsonValue> },
    /// A node's state object; `None` encodes the `null` that tells an
    /// originator to drop its optimistic state.
    ChangeState { id: NodeId, state: Option<StateMap> },
    /// A link now exists.
    AddLink { key: LinkKey },
    /// A link no longer exists.
    RemoveLink { key: LinkKey },
    /// Revision advancement only; sent to non-originators on Confirm and
    /// Cancel so every participant consumes exactly one revision per
    /// intent.
    Nop,
}

impl Event {
    /// Encode as an outbound server frame. `rev` is the server revision the
    /// frame consumes; `origin` is the echoed client revision on messages
    /// directed at the intent's originator.
    pub fn to_frame(&self, rev: ServerRev, origin: Option<ClientRev>) -> Frame {
        let mut kwargs = Map::new();
        kwargs.insert("rev".into(), json!(rev));
        if let Some(origin) = origin {
            kwargs.insert("origin".into(), json!(origin));
        }
        let (name, args) = match self {
            Event::CreateNode { id } => ("createNode", vec![json!(id.0)]),
            Event::RemoveNode { id } => ("removeNode", vec![json!(id.0)]),
            Event::ChangePorts { id, ports } => {
                ("changePorts", vec![json!(id.0), JsonValue::Array(ports.clone())])
            }
            Event::ChangeState { id, state } => {
                let state = match state {
                    Some(map) => JsonValue::Object(map.clone()),
                    None => JsonValue::Null,
                };
                ("changeState", vec![json!(id.0), state])
            }
            Event::AddLink { key } => ("addLink", link_args(key)),
            Event::RemoveLink { key } => ("removeLink", link_args(key)),
            Event::Nop => ("nop", Vec::new()),
        };
        Frame::new(name, args, kwargs)
    }

    /// Parse an inbound server frame into `(rev, origin, event)`. This is
    /// the client mirror's side of the vocabulary.
    pub fn from_frame(frame: &Frame) -> GraphResult<(ServerRev, Option<ClientRev>, Event)> {
        let rev = frame.kwarg_u64("rev")?;
        let origin = match frame.kwargs.get("origin") {
            None => None,
            Some(value) => Some(value.as_u64().ok_or_else(|| GraphError::MalformedFrame {
                reason: format!("non-integer 'origin' kwarg on '{}'", frame.name),
            })?),
        };
        let event = match frame.name.as_str() {
            "createNode" => Event::CreateNode {
                id: NodeId(frame.arg_str(0)?),
            },
            "removeNode" => Event::RemoveNode {
                id: NodeId(frame.arg_str(0)?),
            },
            "changePorts" => {
                let ports = match frame.args.get(1) {
                    Some(JsonValue::Array(ports)) => ports.clone(),
                    _ => {
                        return Err(GraphError::MalformedFrame {
                            reason: "'changePorts' argument 1 must be an array".into(),
                        })
                    }
                };
                Event::ChangePorts {
                    id: NodeId(frame.arg_str(0)?),
                    ports,
                }
            }
            "changeState" => {
                let state = match frame.args.get(1) {
                    Some(JsonValue::Object(map)) => Some(map.clone()),
                    Some(JsonValue::Null) => None,
                    _ => {
                        return Err(GraphError::MalformedFrame {
                            reason: "'changeState' argument 1 must be an object or null".into(),
                        })
                    }
                };
                Event::ChangeState {
                    id: NodeId(frame.arg_str(0)?),
                    state,
                }
            }
            "addLink" => Event::AddLink {
                key: frame.arg_link_key()?,
            },
            "removeLink" => Event::RemoveLink {
                key: frame.arg_link_key()?,
            },
            "nop" => Event::Nop,
            other => {
                return Err(GraphError::InvalidCommand {
                    name: other.to_string(),
                })
            }
        };
        Ok((rev, origin, event))
    }
}

fn link_args(key: &LinkKey) -> Vec<JsonValue> {
    vec![
        json!(key.start_id.0),
        json!(key.start_name),
        json!(key.end_id.0),
        json!(key.end_name),
    ]
}
