/// Name-tagged broadcast session.
///
/// The simplest session model: every participant gets a random display name,
/// joins are announced, and `say(text)` is rebroadcast to everyone with the
/// speaker's name attached. Chat frames carry no revisions — there is no
/// shared state to reconcile — which makes this model the minimal proof of
/// the participant-factory seam.
use crate::error::{GraphError, GraphResult};
use crate::names::random_name;
use crate::protocol::Frame;
use crate::session::{Participant, Roster, SessionModel};
use crate::types::UserId;
use serde_json::{json, Map};
use tokio::sync::mpsc;

/// A broadcast-only chat session.
#[derive(Debug, Default)]
pub struct ChatModel {
    roster: Roster,
}

impl ChatModel {
    /// Create an empty chat session.
    pub fn new() -> Self {
        Self::default()
    }

    /// The participant set.
    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    fn display_name(&self, user: &UserId) -> Option<String> {
        self.roster
            .get(user)?
            .profile()
            .get("name")
            .and_then(|name| name.as_str())
            .map(str::to_string)
    }
}

impl SessionModel for ChatModel {
    fn open_channel(&mut self, outbound: mpsc::UnboundedSender<Frame>) -> UserId {
        let id = UserId::generate();
        let name = random_name();

        let mut profile = Map::new();
        profile.insert("id".into(), json!(id.0));
        profile.insert("name".into(), json!(name.clone()));

        let participant = Participant::new(id.clone(), profile.clone(), outbound);
        participant.send(Frame::auth(profile));
        self.roster.add(participant);

        let mut kwargs = Map::new();
        kwargs.insert("name".into(), json!(name.clone()));
        self.roster.broadcast(Frame::new(
            "notify",
            vec![json!(format!("{} entered the chat", name))],
            kwargs,
        ));
        id
    }

    fn close_channel(&mut self, user: &UserId) {
        self.roster.remove(user);
    }

    fn handle(&mut self, user: &UserId, frame: Frame) -> GraphResult<()> {
        match frame.name.as_str() {
            "say" => {
                let text = frame
                    .args
                    .first()
                    .and_then(|value| value.as_str())
                    .ok_or_else(|| GraphError::MalformedFrame {
                        reason: "'say' argument 0 must be a string".into(),
                    })?;
                let name = self
                    .display_name(user)
                    .unwrap_or_else(|| "anonymous".to_string());
                let mut kwargs = Map::new();
                kwargs.insert("name".into(), json!(name));
                self.roster
                    .broadcast(Frame::new("say", vec![json!(text)], kwargs));
                Ok(())
            }
            other => Err(GraphError::InvalidCommand {
                name: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn drain(rx: &mut UnboundedReceiver<Frame>) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn test_open_sends_auth_then_greeting() {
        let mut model = ChatModel::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        model.open_channel(tx);

        let frames = drain(&mut rx);
        assert_eq!(frames[0].name, "auth");
        assert!(frames[0].kwargs.contains_key("id"));
        assert!(frames[0].kwargs.contains_key("name"));
        assert_eq!(frames[1].name, "notify");
        assert!(frames[1].args[0]
            .as_str()
            .unwrap()
            .ends_with("entered the chat"));
    }

    #[test]
    fn test_say_broadcasts_with_speaker_name() {
        let mut model = ChatModel::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let speaker = model.open_channel(tx_a);
        model.open_channel(tx_b);
        drain(&mut rx_a);
        drain(&mut rx_b);

        model
            .handle(
                &speaker,
                Frame::new("say", vec![json!("hello")], Map::new()),
            )
            .unwrap();

        for rx in [&mut rx_a, &mut rx_b] {
            let frames = drain(rx);
            assert_eq!(frames.len(), 1);
            assert_eq!(frames[0].name, "say");
            assert_eq!(frames[0].args[0], json!("hello"));
            assert!(frames[0].kwargs.contains_key("name"));
        }
    }

    #[test]
    fn test_unknown_chat_command() {
        let mut model = ChatModel::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let user = model.open_channel(tx);

        let result = model.handle(&user, Frame::new("shout", vec![], Map::new()));
        assert!(matches!(result, Err(GraphError::InvalidCommand { .. })));
    }
}
