//! # Node graph
//!
//! [`NodeGraph`] is the single owner of every node. Nodes live in a
//! generational arena keyed by [`NodeId`]; a parent owns its children through
//! an ordered id list and a child refers back to its parent by id only.
//! Handles ([`StableHandle`], [`CellHandle`], [`SignalHandle`]) resolve through
//! the graph, so using one after its node is removed reports
//! [`Error::UnknownNode`] instead of touching freed state.
//!
//! ```rust
//! use trellis_core::*;
//!
//! let graph = NodeGraph::new();
//! let window = graph.create_node(NodeKind::Window, None).unwrap();
//! let label = graph.create_node(NodeKind::Label, Some(window)).unwrap();
//! assert_eq!(graph.children(window).unwrap(), [label]);
//!
//! graph.remove(window).unwrap();
//! assert!(matches!(graph.get(label), Err(Error::UnknownNode(_))));
//! ```
//!
//! Structural changes are published on [`NodeGraph::events`]. An observer that
//! fails never undoes `create_node`, `remove` or `move_child`; the failure is
//! logged at `warn`.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use slotmap::{SlotMap, new_key_type};
use smallvec::SmallVec;

use crate::config::GraphConfig;
use crate::error::{Error, Result};
use crate::handle::{CellHandle, SignalHandle, StableHandle};
use crate::kind::NodeKind;
use crate::registry::Members;
use crate::signal::SignalHub;

new_key_type! {
    /// Generational id of a node; a removed node's id never resolves again.
    pub struct NodeId;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeState {
    /// Allocated and parented; its initializer is still running.
    Configuring,
    Finalized,
}

/// Structural change notifications.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GraphEvent {
    Attached {
        node: NodeId,
        parent: Option<NodeId>,
        index: usize,
    },
    Finalized {
        node: NodeId,
    },
    Moved {
        parent: NodeId,
        child: NodeId,
        from: usize,
        to: usize,
    },
    Detached {
        node: NodeId,
        parent: Option<NodeId>,
    },
    Released {
        node: NodeId,
    },
}

pub(crate) struct NodeEntry {
    pub(crate) kind: NodeKind,
    pub(crate) name: Option<String>,
    pub(crate) state: NodeState,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: SmallVec<[NodeId; 4]>,
    pub(crate) members: Members,
    pub(crate) alive: Arc<AtomicBool>,
}

#[derive(Default)]
struct Arena {
    nodes: SlotMap<NodeId, NodeEntry>,
    roots: Vec<NodeId>,
}

impl Arena {
    fn entry(&self, id: NodeId) -> Result<&NodeEntry> {
        self.nodes.get(id).ok_or(Error::UnknownNode(id))
    }

    fn entry_mut(&mut self, id: NodeId) -> Result<&mut NodeEntry> {
        self.nodes.get_mut(id).ok_or(Error::UnknownNode(id))
    }

    /// `id` followed by its descendants, depth first.
    fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if let Some(entry) = self.nodes.get(next) {
                out.push(next);
                stack.extend(entry.children.iter().rev().copied());
            }
        }
        out
    }

    /// Detaches `id` from its parent (or the roots) and drops its subtree.
    /// Returns the events describing the change; the caller publishes them.
    fn release(&mut self, id: NodeId) -> Result<Vec<GraphEvent>> {
        let parent = self.entry(id)?.parent;
        match parent {
            Some(parent) => {
                if let Ok(entry) = self.entry_mut(parent) {
                    entry.children.retain(|c| *c != id);
                }
            }
            None => self.roots.retain(|r| *r != id),
        }

        let doomed = self.subtree(id);
        let mut events = Vec::with_capacity(doomed.len() + 1);
        events.push(GraphEvent::Detached { node: id, parent });
        for node in doomed {
            if let Some(entry) = self.nodes.remove(node) {
                entry.alive.store(false, Ordering::Release);
                events.push(GraphEvent::Released { node });
            }
        }
        log::debug!("released {} node(s) rooted at {id:?}", events.len() - 1);
        Ok(events)
    }
}

pub(crate) struct GraphInner {
    arena: RwLock<Arena>,
    building: AtomicBool,
    events: SignalHub<GraphEvent>,
    config: GraphConfig,
}

impl Drop for GraphInner {
    fn drop(&mut self) {
        for entry in self.arena.get_mut().nodes.values() {
            entry.alive.store(false, Ordering::Release);
        }
    }
}

/// Owner of a tree (or forest) of nodes. Cloning shares the same graph.
#[derive(Clone)]
pub struct NodeGraph(pub(crate) Arc<GraphInner>);

impl Default for NodeGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeGraph {
    pub fn new() -> Self {
        Self::with_config(GraphConfig::default())
    }

    pub fn with_config(config: GraphConfig) -> Self {
        Self(Arc::new(GraphInner {
            arena: RwLock::new(Arena::default()),
            building: AtomicBool::new(false),
            events: SignalHub::with_max_depth("graph-events", config.max_reentrancy),
            config,
        }))
    }

    pub(crate) fn from_weak(weak: &Weak<GraphInner>) -> Option<Self> {
        weak.upgrade().map(Self)
    }

    pub(crate) fn downgrade(&self) -> Weak<GraphInner> {
        Arc::downgrade(&self.0)
    }

    pub fn config(&self) -> GraphConfig {
        self.0.config
    }

    /// Structural change notifications, published after each change commits.
    pub fn events(&self) -> SignalHub<GraphEvent> {
        self.0.events.clone()
    }

    /// Allocates a finalized node with no initializer. With a parent, the node
    /// is appended to the parent's children in the same step.
    pub fn create_node(&self, kind: NodeKind, parent: Option<NodeId>) -> Result<NodeId> {
        let (id, index) = self.allocate(kind, parent, None, NodeState::Finalized)?;
        log::debug!("created {kind} {id:?} under {parent:?}");
        self.announce([GraphEvent::Attached {
            node: id,
            parent,
            index,
        }]);
        Ok(id)
    }

    /// Stable handle to a finalized node.
    pub fn get(&self, id: NodeId) -> Result<StableHandle> {
        match self.state(id)? {
            NodeState::Finalized => Ok(self.handle(id)),
            NodeState::Configuring => Err(Error::NotFinalized(id)),
        }
    }

    /// Detaches `id` and releases its whole subtree.
    pub fn remove(&self, id: NodeId) -> Result<()> {
        let events = {
            let mut arena = self.0.arena.write();
            let entry = arena.entry(id)?;
            if let Some(parent) = entry.parent
                && arena.entry(parent)?.state == NodeState::Configuring
            {
                return Err(Error::NotFinalized(parent));
            }
            for node in arena.subtree(id) {
                if arena.entry(node)?.state == NodeState::Configuring {
                    return Err(Error::NotFinalized(node));
                }
            }
            arena.release(id)?
        };
        self.announce(events);
        Ok(())
    }

    /// Moves `child` to `new_index` within `parent`'s children.
    pub fn move_child(&self, parent: NodeId, child: NodeId, new_index: usize) -> Result<()> {
        let from = {
            let mut arena = self.0.arena.write();
            arena.entry(child)?;
            let entry = arena.entry_mut(parent)?;
            if entry.state == NodeState::Configuring {
                return Err(Error::NotFinalized(parent));
            }
            let from = entry
                .children
                .iter()
                .position(|c| *c == child)
                .ok_or(Error::NotAChild { parent, child })?;
            let len = entry.children.len();
            if new_index >= len {
                return Err(Error::IndexOutOfRange {
                    index: new_index,
                    len,
                });
            }
            let moved = entry.children.remove(from);
            entry.children.insert(new_index, moved);
            from
        };
        if from != new_index {
            self.announce([GraphEvent::Moved {
                parent,
                child,
                from,
                to: new_index,
            }]);
        }
        Ok(())
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.0.arena.read().nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.0.arena.read().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn roots(&self) -> Vec<NodeId> {
        self.0.arena.read().roots.clone()
    }

    pub fn children(&self, id: NodeId) -> Result<Vec<NodeId>> {
        self.with_entry(id, |e| e.children.to_vec())
    }

    pub fn parent(&self, id: NodeId) -> Result<Option<NodeId>> {
        self.with_entry(id, |e| e.parent)
    }

    pub fn kind(&self, id: NodeId) -> Result<NodeKind> {
        self.with_entry(id, |e| e.kind)
    }

    pub fn state(&self, id: NodeId) -> Result<NodeState> {
        self.with_entry(id, |e| e.state)
    }

    /// Name the node was bound to when built with `named_child`.
    pub fn name(&self, id: NodeId) -> Result<Option<String>> {
        self.with_entry(id, |e| e.name.clone())
    }

    /// Declared cell names, in declaration order.
    pub fn cell_names(&self, id: NodeId) -> Result<Vec<&'static str>> {
        self.with_entry(id, |e| e.members.cell_names().collect())
    }

    pub fn signal_names(&self, id: NodeId) -> Result<Vec<&'static str>> {
        self.with_entry(id, |e| e.members.signal_names().collect())
    }

    pub fn cell<T>(&self, id: NodeId, name: &str) -> Result<CellHandle<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        let (cell, alive) = self.with_entry(id, |e| {
            e.members
                .cell::<T>(e.kind, name)
                .map(|cell| (cell, e.alive.clone()))
        })??;
        Ok(CellHandle::new(id, alive, cell))
    }

    pub fn signal<A: 'static>(&self, id: NodeId, name: &str) -> Result<SignalHandle<A>> {
        let (hub, alive) = self.with_entry(id, |e| {
            e.members
                .signal::<A>(e.kind, name)
                .map(|hub| (hub, e.alive.clone()))
        })??;
        Ok(SignalHandle::new(id, alive, hub))
    }

    /// Indented dump of every tree, one node per line.
    pub fn describe(&self) -> String {
        let arena = self.0.arena.read();
        let mut out = String::new();
        for root in &arena.roots {
            let mut stack = vec![(*root, 0usize)];
            while let Some((id, depth)) = stack.pop() {
                let Some(entry) = arena.nodes.get(id) else {
                    continue;
                };
                if !out.is_empty() {
                    out.push('\n');
                }
                let _ = write!(out, "{:indent$}{}", "", entry.kind, indent = depth * 2);
                if let Some(name) = &entry.name {
                    let _ = write!(out, " {name:?}");
                }
                if entry.state == NodeState::Configuring {
                    out.push_str(" (configuring)");
                }
                stack.extend(entry.children.iter().rev().map(|c| (*c, depth + 1)));
            }
        }
        out
    }

    pub(crate) fn handle(&self, id: NodeId) -> StableHandle {
        StableHandle::new(self.downgrade(), id)
    }

    pub(crate) fn with_entry<R>(&self, id: NodeId, f: impl FnOnce(&NodeEntry) -> R) -> Result<R> {
        let arena = self.0.arena.read();
        arena.entry(id).map(f)
    }

    pub(crate) fn with_entry_mut<R>(
        &self,
        id: NodeId,
        f: impl FnOnce(&mut NodeEntry) -> R,
    ) -> Result<R> {
        let mut arena = self.0.arena.write();
        arena.entry_mut(id).map(f)
    }

    /// Creates the slot and links it under `parent` atomically. Returns the
    /// new id and its index among the parent's children (or roots).
    pub(crate) fn allocate(
        &self,
        kind: NodeKind,
        parent: Option<NodeId>,
        name: Option<String>,
        state: NodeState,
    ) -> Result<(NodeId, usize)> {
        let mut members = Members::new(self.0.config.max_reentrancy);
        kind.declare(&mut members)?;

        let mut arena = self.0.arena.write();
        if let Some(parent) = parent
            && !arena.nodes.contains_key(parent)
        {
            return Err(Error::UnknownParent(parent));
        }
        let id = arena.nodes.insert(NodeEntry {
            kind,
            name,
            state,
            parent,
            children: SmallVec::new(),
            members,
            alive: Arc::new(AtomicBool::new(true)),
        });
        let index = match parent {
            Some(parent) => {
                let siblings = &mut arena.entry_mut(parent)?.children;
                siblings.push(id);
                siblings.len() - 1
            }
            None => {
                arena.roots.push(id);
                arena.roots.len() - 1
            }
        };
        Ok((id, index))
    }

    /// Detaches `id` and drops its subtree without any state checks.
    pub(crate) fn release(&self, id: NodeId) -> Result<Vec<GraphEvent>> {
        self.0.arena.write().release(id)
    }

    /// Emits each event; every event is delivered even if an earlier one fails.
    pub(crate) fn publish(&self, events: impl IntoIterator<Item = GraphEvent>) -> Result<()> {
        let mut first_err = None;
        for event in events {
            if let Err(e) = self.0.events.emit(event) {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Publishes events for a change that has already committed. Observer
    /// failures cannot undo it, so they are logged instead of returned.
    pub(crate) fn announce(&self, events: impl IntoIterator<Item = GraphEvent>) {
        if let Err(e) = self.publish(events) {
            log::warn!("graph observer failed after a committed change: {e}");
        }
    }

    /// Claims the graph for one construction call tree.
    pub(crate) fn begin_build(&self) -> Result<BuildGuard<'_>> {
        self.0
            .building
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::GraphBusy)?;
        Ok(BuildGuard {
            busy: &self.0.building,
            open: Arc::new(AtomicBool::new(true)),
        })
    }
}

/// Clears the busy flag when construction ends, including by unwinding, and
/// releases the capture-only handles the build gave out.
pub(crate) struct BuildGuard<'a> {
    busy: &'a AtomicBool,
    open: Arc<AtomicBool>,
}

impl BuildGuard<'_> {
    pub(crate) fn gate(&self) -> Arc<AtomicBool> {
        self.open.clone()
    }
}

impl Drop for BuildGuard<'_> {
    fn drop(&mut self) {
        self.open.store(false, Ordering::Release);
        self.busy.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for NodeGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeGraph")
            .field("nodes", &self.len())
            .field("roots", &self.roots())
            .finish()
    }
}
