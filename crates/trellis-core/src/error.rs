use std::any::Any;
use std::fmt;

use smallvec::SmallVec;

use crate::{ConnectionId, NodeId, NodeKind};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised by cells, signal hubs and the node graph.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("node {0:?} is not live (removed or never allocated)")]
    UnknownNode(NodeId),

    #[error("parent {0:?} is not live")]
    UnknownParent(NodeId),

    #[error("node {0:?} is still configuring")]
    NotFinalized(NodeId),

    #[error("node {child:?} is not a child of {parent:?}")]
    NotAChild { parent: NodeId, child: NodeId },

    #[error("index {index} out of range for {len} children")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("{kind:?} node has no cell named '{name}'")]
    UnknownCell { kind: NodeKind, name: String },

    #[error("{kind:?} node has no signal named '{name}'")]
    UnknownSignal { kind: NodeKind, name: String },

    #[error("member '{name}' is already declared on this node")]
    DuplicateMember { name: String },

    #[error("member '{name}' holds {declared}, not {requested}")]
    TypeMismatch {
        name: String,
        declared: &'static str,
        requested: &'static str,
    },

    #[error("handle to {0:?} is capture-only until the current build finishes")]
    CaptureOnly(NodeId),

    #[error("no finalized sibling is bound to '{0}'")]
    UnboundName(String),

    #[error("reentrant write limit of {limit} exceeded")]
    ReentrancyLimitExceeded { limit: usize },

    #[error(transparent)]
    SignalEmissionFailed(#[from] EmissionFailure),

    #[error("another construction is already in progress on this graph")]
    GraphBusy,
}

/// Raised by the graph builder. An `InitializerFailed` node has already been
/// unwound by the time the caller sees it.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("initializer for {kind:?} node failed: {source}")]
    InitializerFailed {
        kind: NodeKind,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Graph(#[from] Error),
}

impl BuildError {
    /// The graph error, if this is not an initializer failure.
    pub fn graph_error(&self) -> Option<&Error> {
        match self {
            BuildError::Graph(e) => Some(e),
            BuildError::InitializerFailed { .. } => None,
        }
    }
}

/// Why one connection failed during an emission.
#[derive(Debug)]
pub enum SlotFault {
    Returned(anyhow::Error),
    Panicked(String),
}

impl fmt::Display for SlotFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotFault::Returned(e) => write!(f, "{e:#}"),
            SlotFault::Panicked(msg) => write!(f, "panicked: {msg}"),
        }
    }
}

#[derive(Debug)]
pub struct SlotFailure {
    pub connection: ConnectionId,
    pub fault: SlotFault,
}

/// Aggregate of every subscriber failure from one `emit` call.
#[derive(Debug, thiserror::Error)]
#[error("{} of {attempted} subscribers failed on '{signal}': {}", .failures.len(), summary(.failures))]
pub struct EmissionFailure {
    pub signal: String,
    pub attempted: usize,
    pub failures: SmallVec<[SlotFailure; 2]>,
}

fn summary(failures: &[SlotFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("#{}: {}", f.connection, f.fault))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Best-effort text for a `catch_unwind` payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "Unknown panic".to_string()
    }
}
