/// End-to-end fan-out scenarios.
///
/// These drive the session through its wire surface — encoded intent frames
/// in, encoded event frames out — and assert the exact reply streams for
/// both the originator and a silent observer, revision by revision.
use serde_json::json;
use syngraph::protocol::{Frame, Intent};
use syngraph::session::SessionModel;
use syngraph::{ClientRev, GraphModel, LinkKey, NodeId, StateMap, UserId};
use tokio::sync::mpsc;

/// A connected fake client: remembers its id, drains its frames, and stamps
/// outgoing intents with its own revision counter.
struct FakeUser {
    id: UserId,
    rx: mpsc::UnboundedReceiver<Frame>,
    rev: ClientRev,
}

impl FakeUser {
    fn join(model: &mut GraphModel) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = model.create_new_user(tx);
        let auth = rx.try_recv().expect("auth on open");
        assert_eq!(auth.name, "auth");
        assert_eq!(auth.kwargs.get("id"), Some(&json!(id.0)));
        Self { id, rx, rev: 0 }
    }

    fn send(&mut self, model: &mut GraphModel, intent: Intent) {
        let frame = intent.to_frame(self.rev);
        self.rev += 1;
        model.handle(&self.id, frame).expect("intent accepted");
    }

    fn messages(&mut self) -> Vec<String> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.rx.try_recv() {
            frames.push(frame.encode());
        }
        frames
    }
}

fn create(id: &str) -> Intent {
    Intent::CreateNode {
        id: NodeId::from(id),
    }
}

fn remove(id: &str) -> Intent {
    Intent::RemoveNode {
        id: NodeId::from(id),
    }
}

fn add_link() -> Intent {
    Intent::AddLink {
        key: LinkKey::new("N1", "start", "N2", "end"),
    }
}

const PORTS: &str = r#"[{"name":"start","title":""},{"name":"end","title":""}]"#;

#[test]
fn scenario_single_create() {
    let mut model = GraphModel::new();
    let mut user = FakeUser::join(&mut model);
    let mut observer = FakeUser::join(&mut model);

    user.send(&mut model, create("N1"));

    assert_eq!(
        user.messages(),
        vec![
            r#"["createNode",["N1"],{"origin":0,"rev":0}]"#.to_string(),
            format!(r#"["changePorts",["N1",{}],{{"rev":1}}]"#, PORTS),
            r#"["changeState",["N1",{}],{"rev":2}]"#.to_string(),
        ]
    );
    assert_eq!(
        observer.messages(),
        vec![
            r#"["createNode",["N1"],{"rev":0}]"#.to_string(),
            format!(r#"["changePorts",["N1",{}],{{"rev":1}}]"#, PORTS),
            r#"["changeState",["N1",{}],{"rev":2}]"#.to_string(),
        ]
    );
}

#[test]
fn scenario_duplicate_create() {
    let mut model = GraphModel::new();
    let mut user = FakeUser::join(&mut model);
    let mut observer = FakeUser::join(&mut model);

    user.send(&mut model, create("N1"));
    user.send(&mut model, create("N1"));

    assert_eq!(
        user.messages(),
        vec![
            r#"["createNode",["N1"],{"origin":0,"rev":0}]"#.to_string(),
            format!(r#"["changePorts",["N1",{}],{{"rev":1}}]"#, PORTS),
            r#"["changeState",["N1",{}],{"rev":2}]"#.to_string(),
            r#"["createNode",["N1"],{"origin":1,"rev":3}]"#.to_string(),
        ]
    );
    assert_eq!(
        observer.messages(),
        vec![
            r#"["createNode",["N1"],{"rev":0}]"#.to_string(),
            format!(r#"["changePorts",["N1",{}],{{"rev":1}}]"#, PORTS),
            r#"["changeState",["N1",{}],{"rev":2}]"#.to_string(),
            r#"["nop",[],{"rev":3}]"#.to_string(),
        ]
    );
}

#[test]
fn scenario_remove_non_existent() {
    let mut model = GraphModel::new();
    let mut user = FakeUser::join(&mut model);
    let mut observer = FakeUser::join(&mut model);

    user.send(&mut model, remove("N1"));

    assert_eq!(
        user.messages(),
        vec![r#"["removeNode",["N1"],{"origin":0,"rev":0}]"#]
    );
    assert_eq!(observer.messages(), vec![r#"["nop",[],{"rev":0}]"#]);
}

#[test]
fn scenario_change_state_of_missing_node() {
    let mut model = GraphModel::new();
    let mut user = FakeUser::join(&mut model);
    let mut observer = FakeUser::join(&mut model);

    let mut state = StateMap::new();
    state.insert("state".into(), json!(true));
    user.send(
        &mut model,
        Intent::ChangeState {
            id: NodeId::from("N1"),
            state,
        },
    );

    assert_eq!(
        user.messages(),
        vec![r#"["changeState",["N1",null],{"origin":0,"rev":0}]"#]
    );
    assert_eq!(observer.messages(), vec![r#"["nop",[],{"rev":0}]"#]);
}

#[test]
fn scenario_link_add_twice() {
    let mut model = GraphModel::new();
    let mut user = FakeUser::join(&mut model);
    let mut observer = FakeUser::join(&mut model);

    // N1 and N2 advance R to 6 and O to 2.
    user.send(&mut model, create("N1"));
    user.send(&mut model, create("N2"));
    user.messages();
    observer.messages();

    user.send(&mut model, add_link());
    user.send(&mut model, add_link());

    assert_eq!(
        user.messages(),
        vec![
            r#"["addLink",["N1","start","N2","end"],{"origin":2,"rev":6}]"#,
            r#"["addLink",["N1","start","N2","end"],{"origin":3,"rev":7}]"#,
        ]
    );
    assert_eq!(
        observer.messages(),
        vec![
            r#"["addLink",["N1","start","N2","end"],{"rev":6}]"#,
            r#"["nop",[],{"rev":7}]"#,
        ]
    );
}

#[test]
fn scenario_cascade_on_node_removal() {
    let mut model = GraphModel::new();
    let mut user = FakeUser::join(&mut model);
    let mut observer = FakeUser::join(&mut model);

    user.send(&mut model, create("N1"));
    user.send(&mut model, create("N2"));
    user.send(&mut model, add_link());
    user.messages();
    observer.messages();

    user.send(&mut model, remove("N1"));

    assert_eq!(
        user.messages(),
        vec![
            r#"["removeLink",["N1","start","N2","end"],{"rev":7}]"#,
            r#"["removeNode",["N1"],{"origin":3,"rev":8}]"#,
        ]
    );
    assert_eq!(
        observer.messages(),
        vec![
            r#"["removeLink",["N1","start","N2","end"],{"rev":7}]"#,
            r#"["removeNode",["N1"],{"rev":8}]"#,
        ]
    );

    // Cascade completeness: nothing references N1 anymore.
    assert!(!model.graph().has_node(&NodeId::from("N1")));
    assert!(model
        .graph()
        .find_links_startswith(&NodeId::from("N1"))
        .is_empty());
    assert!(model
        .graph()
        .find_links_endswith(&NodeId::from("N1"))
        .is_empty());
    assert_eq!(model.graph().link_count(), 0);
    assert!(model.graph().check_integrity());
}

#[test]
fn scenario_create_remove_create_again() {
    let mut model = GraphModel::new();
    let mut user = FakeUser::join(&mut model);
    let mut observer = FakeUser::join(&mut model);

    user.send(&mut model, create("N1"));
    user.send(&mut model, remove("N1"));
    user.send(&mut model, create("N1"));

    assert_eq!(
        user.messages(),
        vec![
            r#"["createNode",["N1"],{"origin":0,"rev":0}]"#.to_string(),
            format!(r#"["changePorts",["N1",{}],{{"rev":1}}]"#, PORTS),
            r#"["changeState",["N1",{}],{"rev":2}]"#.to_string(),
            r#"["removeNode",["N1"],{"origin":1,"rev":3}]"#.to_string(),
            r#"["createNode",["N1"],{"origin":2,"rev":4}]"#.to_string(),
            format!(r#"["changePorts",["N1",{}],{{"rev":5}}]"#, PORTS),
            r#"["changeState",["N1",{}],{"rev":6}]"#.to_string(),
        ]
    );
    assert_eq!(
        observer.messages(),
        vec![
            r#"["createNode",["N1"],{"rev":0}]"#.to_string(),
            format!(r#"["changePorts",["N1",{}],{{"rev":1}}]"#, PORTS),
            r#"["changeState",["N1",{}],{"rev":2}]"#.to_string(),
            r#"["removeNode",["N1"],{"rev":3}]"#.to_string(),
            r#"["createNode",["N1"],{"rev":4}]"#.to_string(),
            format!(r#"["changePorts",["N1",{}],{{"rev":5}}]"#, PORTS),
            r#"["changeState",["N1",{}],{"rev":6}]"#.to_string(),
        ]
    );
}

#[test]
fn scenario_remove_link_on_missing_everything_confirms() {
    let mut model = GraphModel::new();
    let mut user = FakeUser::join(&mut model);
    let mut observer = FakeUser::join(&mut model);

    user.send(
        &mut model,
        Intent::RemoveLink {
            key: LinkKey::new("N1", "start", "N2", "end"),
        },
    );

    // Nodes absent: the link cannot exist, so removal is confirmed.
    assert_eq!(
        user.messages(),
        vec![r#"["removeLink",["N1","start","N2","end"],{"origin":0,"rev":0}]"#]
    );
    assert_eq!(observer.messages(), vec![r#"["nop",[],{"rev":0}]"#]);
}

#[test]
fn scenario_late_joiner_sees_only_later_revisions() {
    let mut model = GraphModel::new();
    let mut user = FakeUser::join(&mut model);

    user.send(&mut model, create("N1"));
    user.messages();

    // Joins after three revisions were consumed.
    let mut late = FakeUser::join(&mut model);
    user.send(&mut model, create("N2"));

    let late_frames = late.messages();
    assert_eq!(late_frames[0], r#"["createNode",["N2"],{"rev":3}]"#);
}
