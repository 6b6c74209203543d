//! # Syngraph — collaborative graph editing over a revision stream
//!
//! Syngraph is a server for concurrent editing of one shared directed
//! multigraph. Many clients connect to a single authoritative session,
//! mutate optimistically on their side, and reconcile against the server's
//! replies:
//!
//! - **Typed multigraph** - nodes with ordered ports and opaque state,
//!   links identified by their endpoint 4-tuple, cascading deletions
//! - **Conflict algebra** - every intent classifies as Apply, Confirm or
//!   Cancel against current state; Confirm echoes idempotent re-issues,
//!   Cancel replies with the protocol inverse
//! - **Revision-exact fan-out** - one strictly monotonic server revision per
//!   outbound frame, gap-free for every participant, with the originator's
//!   client revision echoed back as `origin`
//! - **Client mirror** - a per-key reconciliation buffer holding a confirmed
//!   branch, a conflict branch and the queue of writes awaiting their echo
//!
//! ## Quick Start
//!
//! ```ignore
//! use syngraph::{Config, SessionServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let server = SessionServer::new(config.addr());
//!     server.run(config.build_model()).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! The session owns the graph and the participant set and runs on one
//! logical task, so `classify → mutate → fan-out → rev++` is atomic per
//! intent. The transport ([`server`]) frames messages as 3-element JSON
//! arrays over WebSocket and only ever suspends between whole intents.
//! Specializations plug in at three seams: the conflict policy
//! ([`classifier::ConflictPolicy`]), the node factory
//! ([`session::NodeFactory`]) and the session model itself
//! ([`session::SessionModel`]) — the filesystem materializer ([`fs`]) and
//! the chat session ([`chat`]) are the two shipped examples.

pub mod chat;
pub mod classifier;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod fs;
pub mod names;
pub mod protocol;
pub mod server;
pub mod session;
pub mod storage;
pub mod types;

// Re-export the primary API at the crate root.
pub use chat::ChatModel;
pub use classifier::{Conflict, ConflictPolicy, DefaultPolicy, Verdict};
pub use client::{ClientGraph, ClientGraphModel, Existence, Repo};
pub use config::{Config, ModelKind};
pub use error::{GraphError, GraphResult};
pub use fs::FsModel;
pub use protocol::{Event, Frame, Intent};
pub use server::{SessionHandle, SessionServer};
pub use session::{GraphModel, Origin, Participant, Roster, SessionModel};
pub use storage::{Graph, Node};
pub use types::{ClientRev, LinkKey, NodeId, Port, ServerRev, StateMap, UserId};

// Convenience re-export so tests and binaries can build JSON payloads
// without importing serde_json directly.
pub use serde_json::json;
