//! # Declarative construction
//!
//! Nodes are built in two phases. The node is first allocated and appended to
//! its parent, then its initializer runs with a [`NodeBuilder`]: writes go to
//! the node itself, reads may reach any ancestor still under construction, and
//! names bound by earlier siblings resolve to their stable handles.
//!
//! ```rust
//! use trellis_core::*;
//! use trellis_core::members::{CLICKED, TEXT, WIDTH};
//!
//! let graph = NodeGraph::new();
//! let window = graph
//!     .build_root(NodeKind::Window, |w| {
//!         w.set(WIDTH, 320.0_f64)?;
//!         w.named_child("label", NodeKind::Label, |l| {
//!             // the window's initializer has not returned yet
//!             let width: f64 = l.nearest(NodeKind::Window).unwrap().get(WIDTH)?;
//!             l.set(TEXT, format!("{width}px"))?;
//!             Ok(())
//!         })?;
//!         w.child(NodeKind::Button, |b| {
//!             let label = b.sibling("label")?;
//!             b.connect(CLICKED, move |_: &()| {
//!                 let _ = label.set(TEXT, String::from("clicked"));
//!             })?;
//!             Ok(())
//!         })?;
//!         Ok(())
//!     })
//!     .unwrap();
//!
//! let children = window.children().unwrap();
//! assert_eq!(children[0].get::<String>(TEXT).unwrap(), "320px");
//! children[1].emit(CLICKED, ()).unwrap();
//! assert_eq!(children[0].get::<String>(TEXT).unwrap(), "clicked");
//! ```
//!
//! If an initializer returns an error (or panics) the node is unwound before
//! the error reaches the caller: connections made through its builder are
//! disconnected and the node is detached and released together with any
//! children it had already built.

use std::panic::{AssertUnwindSafe, catch_unwind};

use crate::error::{BuildError, Error, Result, panic_message};
use crate::graph::{GraphEvent, NodeGraph, NodeId, NodeState};
use crate::handle::{
    CellHandle, InConstructionHandle, NodeRef, SignalHandle, StableHandle, stable_of,
};
use crate::kind::NodeKind;
use crate::scope::{ConstructionScope, Frame};
use crate::subscription::Subscription;

impl NodeGraph {
    /// Builds a parentless node and everything its initializer declares.
    pub fn build_root<F>(&self, kind: NodeKind, init: F) -> Result<StableHandle, BuildError>
    where
        F: FnOnce(&mut NodeBuilder<'_>) -> anyhow::Result<()>,
    {
        let busy = self.begin_build()?;
        let mut scope = ConstructionScope::new(busy.gate());
        construct(self, &mut scope, None, kind, None, init)
    }

    /// Builds a node under an already finalized `parent`.
    pub fn build_child<F>(
        &self,
        parent: &StableHandle,
        kind: NodeKind,
        init: F,
    ) -> Result<StableHandle, BuildError>
    where
        F: FnOnce(&mut NodeBuilder<'_>) -> anyhow::Result<()>,
    {
        self.build_under(parent, None, kind, init)
    }

    /// Like [`NodeGraph::build_child`], binding `name` for later siblings.
    pub fn build_named_child<F>(
        &self,
        parent: &StableHandle,
        name: impl Into<String>,
        kind: NodeKind,
        init: F,
    ) -> Result<StableHandle, BuildError>
    where
        F: FnOnce(&mut NodeBuilder<'_>) -> anyhow::Result<()>,
    {
        self.build_under(parent, Some(name.into()), kind, init)
    }

    fn build_under<F>(
        &self,
        parent: &StableHandle,
        name: Option<String>,
        kind: NodeKind,
        init: F,
    ) -> Result<StableHandle, BuildError>
    where
        F: FnOnce(&mut NodeBuilder<'_>) -> anyhow::Result<()>,
    {
        let busy = self.begin_build()?;
        let parent_id = parent.id();
        if self.handle(parent_id) != *parent {
            return Err(Error::UnknownParent(parent_id).into());
        }
        match self.state(parent_id) {
            Ok(NodeState::Finalized) => {}
            Ok(NodeState::Configuring) => return Err(Error::NotFinalized(parent_id).into()),
            Err(_) => return Err(Error::UnknownParent(parent_id).into()),
        }

        // earlier named children stay nameable from the new one
        let mut bindings = Vec::new();
        for child in self.children(parent_id)? {
            if let Some(child_name) = self.name(child)? {
                bindings.push((child_name, self.handle(child)));
            }
        }
        if let Some(name) = &name
            && bindings.iter().any(|(bound, _)| bound == name)
        {
            return Err(Error::DuplicateMember { name: name.clone() }.into());
        }

        let mut scope = ConstructionScope::new(busy.gate());
        let host = parent.clone().capture_only(scope.gate());
        scope.push(Frame::with_bindings(InConstructionHandle::new(host), bindings));
        construct(self, &mut scope, Some(parent_id), kind, name, init)
    }
}

fn construct<F>(
    graph: &NodeGraph,
    scope: &mut ConstructionScope,
    parent: Option<NodeId>,
    kind: NodeKind,
    name: Option<String>,
    init: F,
) -> Result<StableHandle, BuildError>
where
    F: FnOnce(&mut NodeBuilder<'_>) -> anyhow::Result<()>,
{
    let (id, index) = graph.allocate(kind, parent, name.clone(), NodeState::Configuring)?;
    let handle = graph.handle(id);
    log::debug!("configuring {kind} {id:?} at index {index} under {parent:?}");

    // descendants see this node through a handle they cannot write through
    let frame = Frame::new(InConstructionHandle::new(
        handle.clone().capture_only(scope.gate()),
    ));
    if let Err(e) = graph.publish([GraphEvent::Attached {
        node: id,
        parent,
        index,
    }]) {
        abort(graph, id, kind, frame);
        return Err(e.into());
    }

    scope.push(frame);
    let outcome = {
        let mut builder = NodeBuilder {
            graph,
            scope: &mut *scope,
            this: handle.clone(),
            kind,
        };
        catch_unwind(AssertUnwindSafe(move || init(&mut builder)))
    };
    let frame = scope
        .pop()
        .expect("nested construction leaves the scope balanced");

    let source = match outcome {
        Ok(Ok(())) => return finalize(graph, scope, handle, kind, name, frame),
        Ok(Err(source)) => source,
        Err(payload) => anyhow::anyhow!("initializer panicked: {}", panic_message(payload.as_ref())),
    };
    abort(graph, id, kind, frame);
    Err(BuildError::InitializerFailed { kind, source })
}

fn finalize(
    graph: &NodeGraph,
    scope: &mut ConstructionScope,
    handle: StableHandle,
    kind: NodeKind,
    name: Option<String>,
    frame: Frame,
) -> Result<StableHandle, BuildError> {
    let id = handle.id();
    graph.with_entry_mut(id, |e| e.state = NodeState::Finalized)?;
    if let Err(e) = graph.publish([GraphEvent::Finalized { node: id }]) {
        abort(graph, id, kind, frame);
        return Err(e.into());
    }

    scope.absorb(frame.ledger);
    if let Some(name) = name {
        scope.bind(name, handle.clone());
    }
    log::debug!("finalized {kind} {id:?}");
    Ok(handle)
}

/// Disconnects the frame's ledger and releases the node's subtree.
fn abort(graph: &NodeGraph, id: NodeId, kind: NodeKind, frame: Frame) {
    let disconnected = frame.roll_back();
    match graph.release(id) {
        Ok(events) => graph.announce(events),
        Err(e) => log::warn!("could not release {kind} {id:?}: {e}"),
    }
    log::warn!("aborted {kind} {id:?}; disconnected {disconnected} connection(s)");
}

/// The handle an initializer receives for the node it is configuring.
pub struct NodeBuilder<'a> {
    graph: &'a NodeGraph,
    scope: &'a mut ConstructionScope,
    this: StableHandle,
    kind: NodeKind,
}

impl<'a> NodeBuilder<'a> {
    pub fn id(&self) -> NodeId {
        self.this.id()
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn graph(&self) -> &NodeGraph {
        self.graph
    }

    pub fn this(&self) -> InConstructionHandle {
        InConstructionHandle::new(self.this.clone())
    }

    /// Handle to this node for capturing in callbacks; usable once the
    /// node is finalized and until it is removed.
    pub fn stable(&self) -> StableHandle {
        self.this.clone()
    }

    pub fn scope(&self) -> &ConstructionScope {
        &*self.scope
    }

    pub fn cell<T: Clone + Send + Sync + 'static>(&self, name: &str) -> Result<CellHandle<T>> {
        self.this.cell(name)
    }

    pub fn get<T: Clone + Send + Sync + 'static>(&self, name: &str) -> Result<T> {
        self.this.get(name)
    }

    pub fn set<T: Clone + Send + Sync + 'static>(&self, name: &str, value: T) -> Result<()> {
        self.this.set(name, value)
    }

    pub fn update<T: Clone + Send + Sync + 'static>(
        &self,
        name: &str,
        f: impl FnOnce(&mut T) + Send + 'static,
    ) -> Result<()> {
        self.this.cell::<T>(name)?.update(f)
    }

    pub fn signal<A: 'static>(&self, name: &str) -> Result<SignalHandle<A>> {
        self.this.signal(name)
    }

    /// Subscribes to one of this node's cells.
    pub fn subscribe<T: Clone + Send + Sync + 'static>(
        &mut self,
        name: &str,
        f: impl Fn(&T, &T) + Send + Sync + 'static,
    ) -> Result<Subscription> {
        let sub = self.this.subscribe(name, f)?;
        self.scope.record(sub.clone());
        Ok(sub)
    }

    /// Connects to one of this node's signals.
    pub fn connect<A: 'static>(
        &mut self,
        name: &str,
        f: impl Fn(&A) + Send + Sync + 'static,
    ) -> Result<Subscription> {
        let sub = self.this.connect(name, f)?;
        self.scope.record(sub.clone());
        Ok(sub)
    }

    pub fn try_connect<A: 'static>(
        &mut self,
        name: &str,
        f: impl Fn(&A) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Result<Subscription> {
        let sub = self.this.signal::<A>(name)?.try_connect(f)?;
        self.scope.record(sub.clone());
        Ok(sub)
    }

    /// Subscribes to a cell of an ancestor or earlier sibling. Undone if this
    /// node's construction is aborted.
    pub fn subscribe_to<T, R>(
        &mut self,
        node: &R,
        name: &str,
        f: impl Fn(&T, &T) + Send + Sync + 'static,
    ) -> Result<Subscription>
    where
        T: Clone + Send + Sync + 'static,
        R: NodeRef,
    {
        let node = stable_of(node);
        let sub = node.graph()?.cell::<T>(node.id(), name)?.subscribe(f)?;
        self.scope.record(sub.clone());
        Ok(sub)
    }

    /// Connects to a signal of an ancestor or earlier sibling. Undone if this
    /// node's construction is aborted.
    pub fn connect_to<A, R>(
        &mut self,
        node: &R,
        name: &str,
        f: impl Fn(&A) + Send + Sync + 'static,
    ) -> Result<Subscription>
    where
        A: 'static,
        R: NodeRef,
    {
        let node = stable_of(node);
        let sub = node.graph()?.signal::<A>(node.id(), name)?.connect(f)?;
        self.scope.record(sub.clone());
        Ok(sub)
    }

    /// Adds a cell beyond the ones the node's kind declares.
    pub fn declare_cell<T: Clone + Send + Sync + 'static>(
        &mut self,
        name: &'static str,
        initial: T,
    ) -> Result<CellHandle<T>> {
        let id = self.id();
        let (cell, alive) = self.graph.with_entry_mut(id, |e| {
            e.members
                .declare_cell(name, initial)
                .map(|cell| (cell, e.alive.clone()))
        })??;
        Ok(CellHandle::new(id, alive, cell))
    }

    /// Adds a signal beyond the ones the node's kind declares.
    pub fn declare_signal<A: 'static>(&mut self, name: &'static str) -> Result<SignalHandle<A>> {
        let id = self.id();
        let (hub, alive) = self.graph.with_entry_mut(id, |e| {
            e.members
                .declare_signal::<A>(name)
                .map(|hub| (hub, e.alive.clone()))
        })??;
        Ok(SignalHandle::new(id, alive, hub))
    }

    /// Ancestors whose initializers are running, outermost first.
    pub fn ancestors(&self) -> Vec<InConstructionHandle> {
        let below = self.scope.depth().saturating_sub(1);
        self.scope.handles().take(below).cloned().collect()
    }

    pub fn parent(&self) -> Option<InConstructionHandle> {
        self.ancestors().pop()
    }

    /// Closest ancestor of the given kind.
    pub fn nearest(&self, kind: NodeKind) -> Option<InConstructionHandle> {
        self.ancestors()
            .into_iter()
            .rev()
            .find(|a| a.kind().is_ok_and(|k| k == kind))
    }

    /// An earlier, already finalized sibling bound with `named_child`.
    ///
    /// The handle is capture-only until the build returns; connect to the
    /// sibling with [`NodeBuilder::connect_to`] or
    /// [`NodeBuilder::subscribe_to`].
    pub fn sibling(&self, name: &str) -> Result<StableHandle> {
        self.scope
            .sibling(name)
            .map(|h| h.clone().capture_only(self.scope.gate()))
            .ok_or_else(|| Error::UnboundName(name.to_string()))
    }

    pub fn child<F>(&mut self, kind: NodeKind, init: F) -> Result<StableHandle, BuildError>
    where
        F: FnOnce(&mut NodeBuilder<'_>) -> anyhow::Result<()>,
    {
        construct(self.graph, self.scope, Some(self.id()), kind, None, init)
    }

    /// Builds a child and, once it is finalized, binds `name` to it so later
    /// children can reach it through [`NodeBuilder::sibling`].
    pub fn named_child<F>(
        &mut self,
        name: impl Into<String>,
        kind: NodeKind,
        init: F,
    ) -> Result<StableHandle, BuildError>
    where
        F: FnOnce(&mut NodeBuilder<'_>) -> anyhow::Result<()>,
    {
        let name = name.into();
        if self.scope.is_bound(&name) {
            return Err(Error::DuplicateMember { name }.into());
        }
        construct(self.graph, self.scope, Some(self.id()), kind, Some(name), init)
    }
}

impl std::fmt::Debug for NodeBuilder<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeBuilder")
            .field("node", &self.this.id())
            .field("kind", &self.kind)
            .field("scope", &self.scope)
            .finish()
    }
}
