/// WebSocket transport adapter.
///
/// This module frames the session protocol over a WebSocket endpoint. Each
/// text frame carries one `[name, args, kwargs]` array; binary frames are
/// ignored. The session model itself runs on a single actor task — the one
/// logical task the concurrency model requires — and connections talk to it
/// through a command channel:
///
/// - channel open → `Open` (allocates a participant, sends `auth`)
/// - inbound text frame → `Inbound` (classify → mutate → fan-out, atomically)
/// - transport close or error → `Close` (drops the participant)
///
/// Per-participant outbound order is preserved end to end: the session
/// pushes frames into an unbounded queue in fan-out order and the
/// connection's writer drains it into the socket FIFO.
use crate::error::{GraphError, GraphResult};
use crate::protocol::Frame;
use crate::session::SessionModel;
use crate::types::UserId;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Commands a connection sends to the session actor.
enum SessionCommand {
    /// A channel opened: allocate a participant for this outbound sink.
    Open {
        outbound: mpsc::UnboundedSender<Frame>,
        reply: oneshot::Sender<UserId>,
    },
    /// A frame arrived from a participant.
    Inbound { user: UserId, frame: Frame },
    /// A participant's transport closed.
    Close { user: UserId },
}

/// A cloneable handle to the session actor.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    /// Register a new participant and wait for its id.
    pub async fn open(&self, outbound: mpsc::UnboundedSender<Frame>) -> GraphResult<UserId> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::Open { outbound, reply })
            .map_err(|_| GraphError::Transport("session task is gone".into()))?;
        rx.await
            .map_err(|_| GraphError::Transport("session task is gone".into()))
    }

    /// Forward an inbound frame.
    pub fn inbound(&self, user: UserId, frame: Frame) {
        let _ = self.tx.send(SessionCommand::Inbound { user, frame });
    }

    /// Report a closed transport.
    pub fn close(&self, user: UserId) {
        let _ = self.tx.send(SessionCommand::Close { user });
    }
}

/// Spawn the session actor owning `model`.
///
/// All graph mutations and fan-outs happen on this task, serially per
/// command, which makes every intent atomic with respect to the others.
pub fn spawn_session(mut model: Box<dyn SessionModel>) -> SessionHandle {
    let (tx, mut rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(command) = rx.recv().await {
            match command {
                SessionCommand::Open { outbound, reply } => {
                    let user = model.open_channel(outbound);
                    let _ = reply.send(user);
                }
                SessionCommand::Inbound { user, frame } => {
                    if let Err(error) = model.handle(&user, frame) {
                        // Invalid or malformed commands drop the frame only;
                        // the participant stays connected.
                        warn!(%user, %error, "dropping inbound frame");
                    }
                }
                SessionCommand::Close { user } => {
                    model.close_channel(&user);
                    debug!(%user, "participant removed");
                }
            }
        }
    });
    SessionHandle { tx }
}

/// The WebSocket server hosting one session.
pub struct SessionServer {
    addr: String,
}

impl SessionServer {
    /// Create a server that will bind `addr` (`host:port`).
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    /// Bind and serve forever.
    ///
    /// Returns only on listener failure; connection-level errors are logged
    /// and confined to their connection.
    pub async fn run(self, model: Box<dyn SessionModel>) -> GraphResult<()> {
        let listener = TcpListener::bind(&self.addr)
            .await
            .map_err(|e| GraphError::Transport(format!("cannot bind {}: {}", self.addr, e)))?;
        Self::serve(listener, model).await
    }

    /// Serve connections from an already-bound listener.
    pub async fn serve(listener: TcpListener, model: Box<dyn SessionModel>) -> GraphResult<()> {
        if let Ok(addr) = listener.local_addr() {
            info!("listening on ws://{}", addr);
        }

        let session = spawn_session(model);
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let session = session.clone();
                    tokio::spawn(async move {
                        if let Err(error) = handle_connection(stream, peer, session).await {
                            warn!(%peer, %error, "connection ended with error");
                        }
                    });
                }
                Err(error) => {
                    error!(%error, "accept failed");
                }
            }
        }
    }
}

/// Serve one WebSocket connection until it closes.
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    session: SessionHandle,
) -> GraphResult<()> {
    let ws = accept_async(stream)
        .await
        .map_err(|e| GraphError::Transport(format!("handshake with {} failed: {}", peer, e)))?;
    let (mut write, mut read) = ws.split();

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let user = session.open(outbound_tx).await?;
    info!(%peer, %user, "participant connected");

    loop {
        tokio::select! {
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => match Frame::decode(&text) {
                    Ok(frame) => session.inbound(user.clone(), frame),
                    Err(error) => warn!(%peer, %error, "dropping malformed frame"),
                },
                // Binary frames are ignored by contract.
                Some(Ok(Message::Binary(_))) => {}
                Some(Ok(Message::Ping(data))) => {
                    if write.send(Message::Pong(data)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(error)) => {
                    warn!(%peer, %error, "read failed");
                    break;
                }
            },
            frame = outbound_rx.recv() => match frame {
                Some(frame) => {
                    if write.send(Message::Text(frame.encode())).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
        }
    }

    session.close(user.clone());
    info!(%peer, %user, "participant disconnected");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::GraphModel;
    use serde_json::{json, Map};

    #[tokio::test]
    async fn test_session_actor_round_trip() {
        let session = spawn_session(Box::new(GraphModel::new()));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let user = session.open(tx).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().name, "auth");

        let mut kwargs = Map::new();
        kwargs.insert("rev".into(), json!(0));
        session.inbound(
            user.clone(),
            Frame::new("nodeCreated", vec![json!("N1")], kwargs),
        );

        assert_eq!(rx.recv().await.unwrap().name, "createNode");
        assert_eq!(rx.recv().await.unwrap().name, "changePorts");
        assert_eq!(rx.recv().await.unwrap().name, "changeState");
    }

    #[tokio::test]
    async fn test_unknown_command_keeps_session_alive() {
        let session = spawn_session(Box::new(GraphModel::new()));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let user = session.open(tx).await.unwrap();
        rx.recv().await.unwrap();

        session.inbound(user.clone(), Frame::new("bogus", vec![], Map::new()));

        // The frame was dropped; the session still answers.
        let mut kwargs = Map::new();
        kwargs.insert("rev".into(), json!(0));
        session.inbound(
            user,
            Frame::new("nodeCreated", vec![json!("N1")], kwargs),
        );
        assert_eq!(rx.recv().await.unwrap().name, "createNode");
    }

    #[tokio::test]
    async fn test_close_stops_fan_out() {
        let session = spawn_session(Box::new(GraphModel::new()));

        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let user_a = session.open(tx_a).await.unwrap();
        rx_a.recv().await.unwrap();

        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let user_b = session.open(tx_b).await.unwrap();
        rx_b.recv().await.unwrap();

        session.close(user_b);

        let mut kwargs = Map::new();
        kwargs.insert("rev".into(), json!(0));
        session.inbound(
            user_a,
            Frame::new("nodeCreated", vec![json!("N1")], kwargs),
        );
        assert_eq!(rx_a.recv().await.unwrap().name, "createNode");
        // The removed participant's queue stays silent and then closes.
        assert!(rx_b.try_recv().is_err());
    }
}
