/// Error types for syngraph operations.
///
/// This module provides the error hierarchy for the whole crate. All errors
/// are well-typed and can be pattern-matched for precise handling. Note that
/// conflict classification (Confirm / Cancel) is *not* an error — see
/// `classifier::Verdict` — and structural corruption inside an apply path is
/// a bug that crashes the session rather than a recoverable error.
use thiserror::Error;

/// The main error type for syngraph operations.
///
/// All fallible operations return `Result<T, GraphError>`.
#[derive(Error, Debug)]
pub enum GraphError {
    /// A wire command name that neither side knows. The offending frame is
    /// dropped; the connection stays up.
    #[error("Command '{name}' was not found")]
    InvalidCommand {
        /// The unknown command name
        name: String,
    },

    /// A frame that is not a well-formed `[name, args, kwargs]` triple, or
    /// whose arguments do not match the command's arity or types.
    #[error("Malformed frame: {reason}")]
    MalformedFrame {
        /// Description of what was wrong with the frame
        reason: String,
    },

    /// Node lookup failed.
    #[error("No such node '{id}'")]
    NoSuchNode {
        /// The node id that was not found
        id: String,
    },

    /// The client mirror observed a revision it did not expect: either a
    /// server revision out of sequence, or an origin echo that does not
    /// match the head of the unresolved queue. The mirror is considered
    /// desynchronized and must re-establish from scratch.
    #[error("Expected revision {expected} but got {got}")]
    RevisionMismatch {
        /// The revision that arrived
        got: u64,
        /// The revision that was expected
        expected: u64,
    },

    /// `resolve` was called on a repo with no outstanding optimistic writes.
    #[error("Origin echo {origin} arrived with no unresolved revisions")]
    EmptyResolveQueue {
        /// The echoed client revision that had no match
        origin: u64,
    },

    /// A branch cell was written twice at the same revision.
    #[error("Revision {rev} already holds a value")]
    CellOccupied {
        /// The revision whose cell was occupied
        rev: u64,
    },

    /// A branch cell was read before ever being written.
    #[error("Revision {rev} holds no value")]
    CellEmpty {
        /// The revision whose cell was empty
        rev: u64,
    },

    /// Configuration could not be loaded or is invalid.
    #[error("Config error: {0}")]
    Config(String),

    /// Serialization error when converting frames to/from JSON.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Transport-level failure. Propagates to the session as a disconnect.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Filesystem error in the materializer.
    #[error("Filesystem error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for syngraph operations.
pub type GraphResult<T> = Result<T, GraphError>;
