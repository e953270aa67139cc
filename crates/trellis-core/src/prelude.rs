pub use crate::builder::NodeBuilder;
pub use crate::cell::Cell;
pub use crate::config::GraphConfig;
pub use crate::error::{BuildError, EmissionFailure, Error, Result};
pub use crate::graph::{GraphEvent, NodeGraph, NodeId, NodeState};
pub use crate::handle::{CellHandle, InConstructionHandle, NodeRef, SignalHandle, StableHandle};
pub use crate::kind::{Capabilities, NodeKind, members};
pub use crate::signal::SignalHub;
pub use crate::subscription::{ConnectionId, Subscription, SubscriptionGuard};
