use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

/// Identifies one connection within the cell or hub that issued it.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub(crate) struct Slot<F: ?Sized> {
    pub(crate) id: ConnectionId,
    live: AtomicBool,
    pub(crate) callback: Box<F>,
}

impl<F: ?Sized> Slot<F> {
    /// False once disconnected; emissions already holding this slot skip it.
    pub(crate) fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }
}

struct Connections<F: ?Sized> {
    slots: Mutex<Vec<Arc<Slot<F>>>>,
    next_id: AtomicU64,
}

trait Detach: Send + Sync {
    fn detach(&self, id: ConnectionId) -> bool;
    fn contains(&self, id: ConnectionId) -> bool;
}

impl<F: ?Sized + Send + Sync> Detach for Connections<F> {
    fn detach(&self, id: ConnectionId) -> bool {
        let mut slots = self.slots.lock();
        match slots.iter().position(|s| s.id == id) {
            Some(pos) => {
                let slot = slots.remove(pos);
                slot.live.store(false, Ordering::Release);
                true
            }
            None => false,
        }
    }

    fn contains(&self, id: ConnectionId) -> bool {
        self.slots.lock().iter().any(|s| s.id == id)
    }
}

/// Ordered connection list shared by `Cell` and `SignalHub`.
pub(crate) struct SlotList<F: ?Sized>(Arc<Connections<F>>);

impl<F: ?Sized + Send + Sync + 'static> SlotList<F> {
    pub(crate) fn new() -> Self {
        Self(Arc::new(Connections {
            slots: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }))
    }

    pub(crate) fn push(&self, callback: Box<F>) -> Subscription {
        let id = ConnectionId(self.0.next_id.fetch_add(1, Ordering::Relaxed));
        self.0.slots.lock().push(Arc::new(Slot {
            id,
            live: AtomicBool::new(true),
            callback,
        }));
        let list: Weak<dyn Detach> = Arc::downgrade(&self.0) as Weak<dyn Detach>;
        Subscription {
            id,
            source: self.source(),
            list,
        }
    }

    /// Clones the live slots so callbacks run without the list lock held.
    pub(crate) fn snapshot(&self) -> Vec<Arc<Slot<F>>> {
        self.0.slots.lock().clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.0.slots.lock().len()
    }

    pub(crate) fn source(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    pub(crate) fn owns(&self, sub: &Subscription) -> bool {
        sub.source == self.source()
    }
}

/// Token returned by `subscribe`/`connect`.
///
/// Dropping it leaves the connection in place; call [`Subscription::unsubscribe`]
/// or wrap it in a [`SubscriptionGuard`].
#[derive(Clone)]
pub struct Subscription {
    id: ConnectionId,
    source: usize,
    list: Weak<dyn Detach>,
}

impl Subscription {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Removes the connection. Safe to call any number of times; returns
    /// whether this call did the removal.
    pub fn unsubscribe(&self) -> bool {
        match self.list.upgrade() {
            Some(list) => list.detach(self.id),
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.list
            .upgrade()
            .is_some_and(|list| list.contains(self.id))
    }

    /// Ties the connection's lifetime to the returned guard.
    pub fn guard(self) -> SubscriptionGuard {
        SubscriptionGuard {
            sub: self,
            armed: true,
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Unsubscribes on drop.
#[derive(Debug)]
pub struct SubscriptionGuard {
    sub: Subscription,
    armed: bool,
}

impl SubscriptionGuard {
    /// Gives the subscription back without disconnecting it.
    pub fn disarm(mut self) -> Subscription {
        self.armed = false;
        self.sub.clone()
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if self.armed {
            self.sub.unsubscribe();
        }
    }
}
