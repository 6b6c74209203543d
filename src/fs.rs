/// Filesystem materializer: a session that mirrors a directory tree.
///
/// This specialization interprets certain state shapes as commands. Creating
/// a node installs a *root* with state `{"__type__": "Root", "path": null}`;
/// changing the root's state to `{"path": …}` tears down everything reachable
/// from the root and re-materializes the subtree under `path`: one node per
/// directory entry, an `"in"` port on each child, an entry-named port on the
/// parent, and a link `parent:entry → child:in`, recursing into directories.
///
/// Every allocation fans out to all participants un-echoed, so observers
/// receive the whole materialization. There is no transactional rollback: a
/// directory entry that fails to read is skipped with a warning, and
/// already-broadcast allocations remain.
use crate::classifier::{Conflict, ConflictPolicy, Verdict};
use crate::error::GraphResult;
use crate::protocol::{Event, Frame, Intent};
use crate::session::{GraphModel, Origin, SessionModel};
use crate::storage::{Graph, Node};
use crate::types::{LinkKey, NodeId, Port, StateMap, UserId};
use serde_json::{json, Value as JsonValue};
use std::path::Path;
use tokio::sync::mpsc;
use tracing::warn;

/// State type tag for the materializer root.
const TYPE_ROOT: &str = "Root";
/// State type tag for regular files.
const TYPE_FILE: &str = "File";
/// State type tag for directories.
const TYPE_FOLDER: &str = "Folder";

/// Classifier for the materializer: replaces only the `changeState` check.
///
/// A state change is applicable only against a root node, with an incoming
/// state that omits the reserved `__type__` key and carries a `path`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsPolicy;

impl ConflictPolicy for FsPolicy {
    fn check_change_state(&self, graph: &Graph, id: &NodeId, state: &StateMap) -> Verdict {
        let node = match graph.get_node(id) {
            Ok(node) => node,
            Err(_) => return Verdict::Cancel(Conflict::NoSuchNode(id.clone())),
        };
        if node.state().get("__type__").and_then(JsonValue::as_str) != Some(TYPE_ROOT) {
            return Verdict::Cancel(Conflict::NotARoot(id.clone()));
        }
        if state.contains_key("__type__") {
            return Verdict::Cancel(Conflict::TypedState(id.clone()));
        }
        if !state.contains_key("path") {
            return Verdict::Cancel(Conflict::MissingPath(id.clone()));
        }
        Verdict::Apply
    }
}

/// A graph session that materializes filesystem subtrees.
///
/// Overrides the `createNode` and `changeState` intents; everything else
/// behaves exactly like [`GraphModel`].
pub struct FsModel {
    inner: GraphModel,
    policy: FsPolicy,
}

impl FsModel {
    /// Create an empty materializer session.
    pub fn new() -> Self {
        Self {
            inner: GraphModel::new(),
            policy: FsPolicy,
        }
    }

    /// The underlying graph session.
    pub fn inner(&self) -> &GraphModel {
        &self.inner
    }

    /// `createNode`: install a materializer root.
    ///
    /// The root starts with no ports and the state
    /// `{"__type__": "Root", "path": null}`.
    pub fn create_node(&mut self, origin: Option<&Origin>, id: &NodeId) {
        match self.inner.policy().check_create_node(self.inner.graph(), id) {
            Verdict::Apply => {
                let mut state = StateMap::new();
                state.insert("__type__".into(), json!(TYPE_ROOT));
                state.insert("path".into(), JsonValue::Null);

                let mut node = Node::new(id.clone());
                node.set_state(state.clone());
                self.inner.graph_mut().add_node(node);

                self.inner
                    .call_all(origin, Event::CreateNode { id: id.clone() });
                self.inner.call_all(None, Event::ChangePorts {
                    id: id.clone(),
                    ports: Vec::new(),
                });
                self.inner.call_all(None, Event::ChangeState {
                    id: id.clone(),
                    state: Some(state),
                });
            }
            Verdict::Confirm(_) => {
                self.inner
                    .call_self(origin, Event::CreateNode { id: id.clone() });
            }
            Verdict::Cancel(_) => {
                self.inner
                    .call_self(origin, Event::RemoveNode { id: id.clone() });
            }
        }
    }

    /// `changeState`: re-materialize the root from the given path.
    pub fn change_state(&mut self, origin: Option<&Origin>, id: &NodeId, state: StateMap) {
        match self.policy.check_change_state(self.inner.graph(), id, &state) {
            Verdict::Apply => self.materialize(origin, id, &state),
            Verdict::Cancel(_) | Verdict::Confirm(_) => {
                self.inner.call_self(origin, Event::ChangeState {
                    id: id.clone(),
                    state: None,
                });
            }
        }
    }

    /// Tear down everything reachable from the root, then rebuild it from
    /// the directory tree under the new path.
    fn materialize(&mut self, origin: Option<&Origin>, id: &NodeId, state: &StateMap) {
        let path = state.get("path").cloned().unwrap_or(JsonValue::Null);

        // The root keeps its type; only the path changes.
        let mut root_state = self
            .inner
            .graph()
            .get_node(id)
            .expect("materialize root checked by classifier")
            .state()
            .clone();
        root_state.insert("path".into(), path.clone());

        // Cascade the previous materialization: links first, then nodes,
        // then the root's entry ports.
        let (sub_nodes, sub_links) = reachable_from(self.inner.graph(), id);
        for key in sub_links {
            self.inner.graph_mut().remove_link(&key);
            self.inner.call_all(None, Event::RemoveLink { key });
        }
        for sub_id in sub_nodes {
            if &sub_id == id {
                continue;
            }
            // Links added from outside the materialized subtree still hang
            // off these nodes; cascade them like a normal node removal.
            for key in self.inner.graph().find_links_startswith(&sub_id) {
                self.inner.graph_mut().remove_link(&key);
                self.inner.call_all(None, Event::RemoveLink { key });
            }
            for key in self.inner.graph().find_links_endswith(&sub_id) {
                self.inner.graph_mut().remove_link(&key);
                self.inner.call_all(None, Event::RemoveLink { key });
            }
            self.inner.graph_mut().remove_node(&sub_id);
            self.inner.call_all(None, Event::RemoveNode { id: sub_id });
        }
        let old_ports: Vec<String> = self
            .inner
            .graph()
            .get_node(id)
            .expect("materialize root checked by classifier")
            .ports()
            .iter()
            .map(|p| p.name.clone())
            .collect();
        for name in old_ports {
            self.inner
                .graph_mut()
                .remove_port(id, &name)
                .expect("root present during port cleanup");
        }

        if let Some(path) = path.as_str() {
            self.fill_node(Path::new(path), id);
        }

        let ports = self
            .inner
            .graph()
            .get_node(id)
            .expect("materialize root checked by classifier")
            .serialized_ports();
        self.inner.call_all(None, Event::ChangePorts {
            id: id.clone(),
            ports,
        });
        self.inner
            .graph_mut()
            .set_state(id, root_state.clone())
            .expect("materialize root checked by classifier");
        self.inner.call_all(origin, Event::ChangeState {
            id: id.clone(),
            state: Some(root_state),
        });
    }

    /// Materialize one directory level under `parent`.
    ///
    /// Entries are visited in name order so the fan-out is deterministic.
    /// A failing entry is skipped; what was already broadcast stays.
    fn fill_node(&mut self, path: &Path, parent: &NodeId) {
        let reader = match std::fs::read_dir(path) {
            Ok(reader) => reader,
            Err(error) => {
                warn!(path = %path.display(), %error, "skipping unreadable directory");
                return;
            }
        };
        let mut entries: Vec<_> = reader
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(error) => {
                    warn!(path = %path.display(), %error, "skipping unreadable entry");
                    None
                }
            })
            .collect();
        entries.sort_by_key(|entry| entry.file_name());

        for entry in entries {
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(raw) => {
                    warn!(?raw, "skipping entry with non-UTF-8 name");
                    continue;
                }
            };
            let sub_path = entry.path();
            let is_dir = match entry.file_type() {
                Ok(file_type) => file_type.is_dir(),
                Err(error) => {
                    warn!(path = %sub_path.display(), %error, "skipping unreadable entry");
                    continue;
                }
            };

            let child = NodeId::generate();
            self.inner.graph_mut().add_node(Node::new(child.clone()));
            self.inner
                .call_all(None, Event::CreateNode { id: child.clone() });

            let mut state = StateMap::new();
            state.insert(
                "__type__".into(),
                json!(if is_dir { TYPE_FOLDER } else { TYPE_FILE }),
            );
            state.insert("path".into(), json!(sub_path.to_string_lossy()));
            self.inner
                .graph_mut()
                .set_state(&child, state.clone())
                .expect("child inserted above");
            self.inner.call_all(None, Event::ChangeState {
                id: child.clone(),
                state: Some(state),
            });

            self.inner
                .graph_mut()
                .add_port(&child, Port::new("in", ""), None)
                .expect("child inserted above");
            self.inner
                .graph_mut()
                .add_port(parent, Port::new(name.clone(), name.clone()), None)
                .expect("parent present during fill");

            if is_dir {
                self.fill_node(&sub_path, &child);
            }

            let ports = self
                .inner
                .graph()
                .get_node(&child)
                .expect("child inserted above")
                .serialized_ports();
            self.inner.call_all(None, Event::ChangePorts {
                id: child.clone(),
                ports,
            });

            let key = LinkKey::new(parent.clone(), name, child, "in");
            self.inner.graph_mut().add_link(key.clone());
            self.inner.call_all(None, Event::AddLink { key });
        }
    }
}

impl Default for FsModel {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionModel for FsModel {
    fn open_channel(&mut self, outbound: mpsc::UnboundedSender<Frame>) -> UserId {
        self.inner.create_new_user(outbound)
    }

    fn close_channel(&mut self, user: &UserId) {
        self.inner.close_channel(user);
    }

    fn handle(&mut self, user: &UserId, frame: Frame) -> GraphResult<()> {
        let (rev, intent) = Intent::from_frame(&frame)?;
        let origin = Origin::new(user.clone(), rev);
        match intent {
            Intent::CreateNode { id } => self.create_node(Some(&origin), &id),
            Intent::ChangeState { id, state } => self.change_state(Some(&origin), &id, state),
            other => self.inner.dispatch(Some(&origin), other),
        }
        Ok(())
    }
}

/// Collect the nodes and links reachable from `root` along outgoing links.
///
/// Links come back in discovery order (insertion order per node, depth
/// first), which is also safe removal order.
fn reachable_from(graph: &Graph, root: &NodeId) -> (Vec<NodeId>, Vec<LinkKey>) {
    let mut nodes = Vec::new();
    let mut links = Vec::new();
    let mut stack = vec![root.clone()];
    while let Some(id) = stack.pop() {
        if nodes.contains(&id) {
            continue;
        }
        nodes.push(id.clone());
        for key in graph.find_links_startswith(&id) {
            if !links.contains(&key) {
                stack.push(key.end_id.clone());
                links.push(key);
            }
        }
    }
    (nodes, links)
}
