use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::cell::Cell;
use crate::error::{Error, Result};
use crate::graph::{GraphInner, NodeGraph, NodeId, NodeState};
use crate::kind::NodeKind;
use crate::signal::SignalHub;
use crate::subscription::Subscription;

/// Id-based reference to a node, valid until the node is removed.
///
/// Holds the graph weakly: callbacks may capture handles to their own
/// ancestors without keeping the graph alive.
///
/// Handles a builder gives out for ancestors and siblings are *capture-only*
/// while that build runs: reads work, but writes, connections, emissions and
/// removal fail with [`Error::CaptureOnly`] until the build returns. Connect
/// to those nodes through [`NodeBuilder::subscribe_to`] and
/// [`NodeBuilder::connect_to`] so an abort can undo it.
///
/// [`NodeBuilder::subscribe_to`]: crate::NodeBuilder::subscribe_to
/// [`NodeBuilder::connect_to`]: crate::NodeBuilder::connect_to
#[derive(Clone)]
pub struct StableHandle {
    graph: Weak<GraphInner>,
    id: NodeId,
    /// Set while the build that handed this handle out is running.
    gate: Option<Arc<AtomicBool>>,
}

impl StableHandle {
    pub(crate) fn new(graph: Weak<GraphInner>, id: NodeId) -> Self {
        Self {
            graph,
            id,
            gate: None,
        }
    }

    pub(crate) fn capture_only(mut self, gate: &Arc<AtomicBool>) -> Self {
        self.gate = Some(gate.clone());
        self
    }

    /// Handles reached through this one inherit its gate.
    fn related(&self, mut other: StableHandle) -> StableHandle {
        other.gate = self.gate.clone();
        other
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub(crate) fn graph(&self) -> Result<NodeGraph> {
        NodeGraph::from_weak(&self.graph).ok_or(Error::UnknownNode(self.id))
    }

    pub fn is_alive(&self) -> bool {
        self.graph().is_ok_and(|g| g.contains(self.id))
    }

    pub fn kind(&self) -> Result<NodeKind> {
        self.graph()?.kind(self.id)
    }

    pub fn state(&self) -> Result<NodeState> {
        self.graph()?.state(self.id)
    }

    pub fn name(&self) -> Result<Option<String>> {
        self.graph()?.name(self.id)
    }

    pub fn parent(&self) -> Result<Option<StableHandle>> {
        let graph = self.graph()?;
        Ok(graph
            .parent(self.id)?
            .map(|p| self.related(graph.handle(p))))
    }

    pub fn children(&self) -> Result<Vec<StableHandle>> {
        let graph = self.graph()?;
        Ok(graph
            .children(self.id)?
            .into_iter()
            .map(|c| self.related(graph.handle(c)))
            .collect())
    }

    pub fn cell<T: Clone + Send + Sync + 'static>(&self, name: &str) -> Result<CellHandle<T>> {
        Ok(self.graph()?.cell(self.id, name)?.gated(self.gate.clone()))
    }

    pub fn get<T: Clone + Send + Sync + 'static>(&self, name: &str) -> Result<T> {
        self.cell::<T>(name)?.get()
    }

    pub fn set<T: Clone + Send + Sync + 'static>(&self, name: &str, value: T) -> Result<()> {
        self.cell::<T>(name)?.set(value)
    }

    pub fn subscribe<T: Clone + Send + Sync + 'static>(
        &self,
        name: &str,
        f: impl Fn(&T, &T) + Send + Sync + 'static,
    ) -> Result<Subscription> {
        self.cell::<T>(name)?.subscribe(f)
    }

    pub fn signal<A: 'static>(&self, name: &str) -> Result<SignalHandle<A>> {
        Ok(self.graph()?.signal(self.id, name)?.gated(self.gate.clone()))
    }

    pub fn connect<A: 'static>(
        &self,
        name: &str,
        f: impl Fn(&A) + Send + Sync + 'static,
    ) -> Result<Subscription> {
        self.signal::<A>(name)?.connect(f)
    }

    pub fn emit<A: 'static>(&self, name: &str, args: A) -> Result<()> {
        self.signal::<A>(name)?.emit(args)
    }

    /// Removes this node and its subtree from the graph.
    pub fn remove(&self) -> Result<()> {
        writable(&self.gate, self.id)?;
        self.graph()?.remove(self.id)
    }
}

impl PartialEq for StableHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && Weak::ptr_eq(&self.graph, &other.graph)
    }
}

impl Eq for StableHandle {}

impl fmt::Debug for StableHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StableHandle").field(&self.id).finish()
    }
}

/// Read-only view of an ancestor whose initializer is still running.
///
/// Exposes the node's public members for reading; writes go through the
/// node's own builder. Call [`InConstructionHandle::to_stable`] to capture it
/// in a callback that runs later; the stable handle is capture-only until the
/// build returns.
#[derive(Clone, PartialEq, Eq)]
pub struct InConstructionHandle(StableHandle);

impl InConstructionHandle {
    pub(crate) fn new(handle: StableHandle) -> Self {
        Self(handle)
    }

    pub fn id(&self) -> NodeId {
        self.0.id
    }

    pub fn kind(&self) -> Result<NodeKind> {
        self.0.kind()
    }

    pub fn state(&self) -> Result<NodeState> {
        self.0.state()
    }

    pub fn get<T: Clone + Send + Sync + 'static>(&self, name: &str) -> Result<T> {
        self.0.get(name)
    }

    pub fn children(&self) -> Result<Vec<NodeId>> {
        self.0.graph()?.children(self.0.id)
    }

    pub fn to_stable(&self) -> StableHandle {
        self.0.clone()
    }
}

impl fmt::Debug for InConstructionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("InConstructionHandle").field(&self.0.id).finish()
    }
}

mod sealed {
    pub trait Sealed {
        fn stable(&self) -> &crate::StableHandle;
    }
}

/// Anything a builder can subscribe through: stable or in-construction handles.
pub trait NodeRef: sealed::Sealed {
    fn node_id(&self) -> NodeId;
}

impl sealed::Sealed for StableHandle {
    fn stable(&self) -> &StableHandle {
        self
    }
}

impl NodeRef for StableHandle {
    fn node_id(&self) -> NodeId {
        self.id
    }
}

impl sealed::Sealed for InConstructionHandle {
    fn stable(&self) -> &StableHandle {
        &self.0
    }
}

impl NodeRef for InConstructionHandle {
    fn node_id(&self) -> NodeId {
        self.0.id
    }
}

pub(crate) fn stable_of<R: NodeRef>(node: &R) -> &StableHandle {
    sealed::Sealed::stable(node)
}

fn writable(gate: &Option<Arc<AtomicBool>>, node: NodeId) -> Result<()> {
    match gate {
        Some(open) if open.load(Ordering::Acquire) => Err(Error::CaptureOnly(node)),
        _ => Ok(()),
    }
}

/// A node's cell, checked against the node's liveness on every use.
pub struct CellHandle<T> {
    node: NodeId,
    alive: Arc<AtomicBool>,
    gate: Option<Arc<AtomicBool>>,
    cell: Cell<T>,
}

impl<T> Clone for CellHandle<T> {
    fn clone(&self) -> Self {
        Self {
            node: self.node,
            alive: self.alive.clone(),
            gate: self.gate.clone(),
            cell: self.cell.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> CellHandle<T> {
    pub(crate) fn new(node: NodeId, alive: Arc<AtomicBool>, cell: Cell<T>) -> Self {
        Self {
            node,
            alive,
            gate: None,
            cell,
        }
    }

    pub(crate) fn gated(mut self, gate: Option<Arc<AtomicBool>>) -> Self {
        self.gate = gate;
        self
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    fn live(&self) -> Result<&Cell<T>> {
        if self.alive.load(Ordering::Acquire) {
            Ok(&self.cell)
        } else {
            Err(Error::UnknownNode(self.node))
        }
    }

    pub fn get(&self) -> Result<T> {
        Ok(self.live()?.get())
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R> {
        Ok(self.live()?.with(f))
    }

    pub fn version(&self) -> Result<u64> {
        Ok(self.live()?.version())
    }

    pub fn set(&self, value: T) -> Result<()> {
        writable(&self.gate, self.node)?;
        self.live()?.set(value)
    }

    pub fn update(&self, f: impl FnOnce(&mut T) + Send + 'static) -> Result<()> {
        writable(&self.gate, self.node)?;
        self.live()?.update(f)
    }

    pub fn subscribe(&self, f: impl Fn(&T, &T) + Send + Sync + 'static) -> Result<Subscription> {
        writable(&self.gate, self.node)?;
        Ok(self.live()?.subscribe(f))
    }
}

impl<T: fmt::Debug> fmt::Debug for CellHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CellHandle")
            .field("node", &self.node)
            .field("cell", &self.cell)
            .finish()
    }
}

/// A node's signal hub, checked against the node's liveness on every use.
pub struct SignalHandle<A> {
    node: NodeId,
    alive: Arc<AtomicBool>,
    gate: Option<Arc<AtomicBool>>,
    hub: SignalHub<A>,
}

impl<A> Clone for SignalHandle<A> {
    fn clone(&self) -> Self {
        Self {
            node: self.node,
            alive: self.alive.clone(),
            gate: self.gate.clone(),
            hub: self.hub.clone(),
        }
    }
}

impl<A: 'static> SignalHandle<A> {
    pub(crate) fn new(node: NodeId, alive: Arc<AtomicBool>, hub: SignalHub<A>) -> Self {
        Self {
            node,
            alive,
            gate: None,
            hub,
        }
    }

    pub(crate) fn gated(mut self, gate: Option<Arc<AtomicBool>>) -> Self {
        self.gate = gate;
        self
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    fn live(&self) -> Result<&SignalHub<A>> {
        if self.alive.load(Ordering::Acquire) {
            Ok(&self.hub)
        } else {
            Err(Error::UnknownNode(self.node))
        }
    }

    pub fn connect(&self, f: impl Fn(&A) + Send + Sync + 'static) -> Result<Subscription> {
        writable(&self.gate, self.node)?;
        Ok(self.live()?.connect(f))
    }

    pub fn try_connect(
        &self,
        f: impl Fn(&A) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Result<Subscription> {
        writable(&self.gate, self.node)?;
        Ok(self.live()?.try_connect(f))
    }

    /// Disconnecting stays possible after the node is gone.
    pub fn disconnect(&self, sub: &Subscription) {
        self.hub.disconnect(sub);
    }

    pub fn emit(&self, args: A) -> Result<()> {
        writable(&self.gate, self.node)?;
        self.live()?.emit(args)
    }

    pub fn connection_count(&self) -> Result<usize> {
        Ok(self.live()?.connection_count())
    }
}

impl<A> fmt::Debug for SignalHandle<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalHandle")
            .field("node", &self.node)
            .field("hub", &self.hub)
            .finish()
    }
}
