use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use crate::handle::{InConstructionHandle, StableHandle};
use crate::subscription::Subscription;

pub(crate) struct Frame {
    pub(crate) node: InConstructionHandle,
    /// Finalized children of `node`, by the name they were declared with.
    bindings: HashMap<String, StableHandle>,
    /// Connections made while `node` (or a finalized descendant) was building.
    pub(crate) ledger: Vec<Subscription>,
}

impl Frame {
    pub(crate) fn new(node: InConstructionHandle) -> Self {
        Self {
            node,
            bindings: HashMap::new(),
            ledger: Vec::new(),
        }
    }

    pub(crate) fn with_bindings(
        node: InConstructionHandle,
        bindings: impl IntoIterator<Item = (String, StableHandle)>,
    ) -> Self {
        Self {
            bindings: bindings.into_iter().collect(),
            ..Self::new(node)
        }
    }

    /// Disconnects everything recorded for this frame.
    pub(crate) fn roll_back(self) -> usize {
        let count = self.ledger.len();
        for sub in self.ledger.into_iter().rev() {
            sub.unsubscribe();
        }
        count
    }
}

/// Stack of nodes whose initializers are running, root first.
///
/// Each nested builder sees exactly the frames below its own; nothing is
/// shared through globals.
pub struct ConstructionScope {
    frames: Vec<Frame>,
    /// Open until the outermost build call returns.
    gate: Arc<AtomicBool>,
}

impl ConstructionScope {
    pub(crate) fn new(gate: Arc<AtomicBool>) -> Self {
        Self {
            frames: Vec::new(),
            gate,
        }
    }

    pub(crate) fn gate(&self) -> &Arc<AtomicBool> {
        &self.gate
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// In-construction handles, outermost first.
    pub fn handles(&self) -> impl Iterator<Item = &InConstructionHandle> + '_ {
        self.frames.iter().map(|f| &f.node)
    }

    pub(crate) fn push(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    pub(crate) fn pop(&mut self) -> Option<Frame> {
        self.frames.pop()
    }

    /// Records a connection against the innermost frame.
    pub(crate) fn record(&mut self, sub: Subscription) {
        if let Some(top) = self.frames.last_mut() {
            top.ledger.push(sub);
        }
    }

    /// Hands a finalized child's connections to its parent's frame so an
    /// enclosing abort still disconnects them. At the root they are kept.
    pub(crate) fn absorb(&mut self, ledger: Vec<Subscription>) {
        if let Some(top) = self.frames.last_mut() {
            top.ledger.extend(ledger);
        }
    }

    pub(crate) fn bind(&mut self, name: String, handle: StableHandle) {
        if let Some(top) = self.frames.last_mut() {
            top.bindings.insert(name, handle);
        }
    }

    /// Whether the innermost node already has a child bound to `name`.
    pub(crate) fn is_bound(&self, name: &str) -> bool {
        self.frames
            .last()
            .is_some_and(|top| top.bindings.contains_key(name))
    }

    /// Looks `name` up among the finalized siblings of the innermost node.
    pub(crate) fn sibling(&self, name: &str) -> Option<&StableHandle> {
        let parent = self.frames.len().checked_sub(2)?;
        self.frames[parent].bindings.get(name)
    }
}

impl std::fmt::Debug for ConstructionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.handles()).finish()
    }
}
