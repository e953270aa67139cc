//! Multi-subscriber event channels.
//!
//! A [`SignalHub`] broadcasts an argument value to every connected callback,
//! in connection order. One failing callback never stops the others; the
//! emitter gets an aggregate [`EmissionFailure`] afterwards.
//!
//! ```rust
//! use trellis_core::SignalHub;
//!
//! let clicked: SignalHub<()> = SignalHub::named("clicked");
//! let _sub = clicked.connect(|_| log::info!("clicked"));
//! clicked.emit(()).unwrap();
//! ```
//!
//! No lock is held while callbacks run, so different threads may emit on the
//! same hub at once. Nested emission is counted per thread and bounded by the
//! hub's depth limit.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::config::DEFAULT_MAX_REENTRANCY;
use crate::error::{EmissionFailure, Error, Result, SlotFailure, SlotFault, panic_message};
use crate::subscription::{SlotList, Subscription};

type Listener<A> = dyn Fn(&A) -> anyhow::Result<()> + Send + Sync;

pub struct SignalHub<A>(Arc<HubInner<A>>);

struct HubInner<A> {
    name: &'static str,
    listeners: SlotList<Listener<A>>,
    /// Emissions in progress, per emitting thread.
    nesting: Mutex<SmallVec<[(ThreadId, usize); 2]>>,
    max_depth: usize,
}

impl<A> Clone for SignalHub<A> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<A: 'static> Default for SignalHub<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: 'static> SignalHub<A> {
    pub fn new() -> Self {
        Self::named("signal")
    }

    pub fn named(name: &'static str) -> Self {
        Self::with_max_depth(name, DEFAULT_MAX_REENTRANCY)
    }

    pub fn with_max_depth(name: &'static str, max_depth: usize) -> Self {
        Self(Arc::new(HubInner {
            name,
            listeners: SlotList::new(),
            nesting: Mutex::new(SmallVec::new()),
            max_depth,
        }))
    }

    pub fn name(&self) -> &'static str {
        self.0.name
    }

    pub fn connect(&self, f: impl Fn(&A) + Send + Sync + 'static) -> Subscription {
        self.try_connect(move |args| {
            f(args);
            Ok(())
        })
    }

    /// Connects a callback whose `Err` is reported through `emit`.
    pub fn try_connect(
        &self,
        f: impl Fn(&A) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Subscription {
        self.0.listeners.push(Box::new(f))
    }

    /// No-op when `sub` is already disconnected or belongs to another hub.
    pub fn disconnect(&self, sub: &Subscription) {
        if self.0.listeners.owns(sub) {
            sub.unsubscribe();
        }
    }

    pub fn is_connected(&self, sub: &Subscription) -> bool {
        self.0.listeners.owns(sub) && sub.is_active()
    }

    pub fn connection_count(&self) -> usize {
        self.0.listeners.len()
    }

    /// Calls every connection live at the start of this call.
    pub fn emit(&self, args: A) -> Result<()> {
        let _nesting = self.enter()?;

        let listeners = self.0.listeners.snapshot();
        log::trace!("emit '{}' to {} connections", self.0.name, listeners.len());

        let mut attempted = 0;
        let mut failures: SmallVec<[SlotFailure; 2]> = SmallVec::new();
        for listener in listeners {
            if !listener.is_live() {
                continue;
            }
            attempted += 1;
            let fault = match catch_unwind(AssertUnwindSafe(|| (listener.callback)(&args))) {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => SlotFault::Returned(e),
                Err(payload) => SlotFault::Panicked(panic_message(payload.as_ref())),
            };
            log::debug!("'{}' connection #{} failed: {fault}", self.0.name, listener.id);
            failures.push(SlotFailure {
                connection: listener.id,
                fault,
            });
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(EmissionFailure {
                signal: self.0.name.to_string(),
                attempted,
                failures,
            }
            .into())
        }
    }

    /// Counts this thread into the hub; nested emissions beyond the limit fail.
    fn enter(&self) -> Result<Nesting<'_>> {
        let me = thread::current().id();
        let mut nesting = self.0.nesting.lock();
        let pos = match nesting.iter().position(|(t, _)| *t == me) {
            Some(pos) => pos,
            None => {
                nesting.push((me, 0));
                nesting.len() - 1
            }
        };
        let depth = nesting[pos].1;
        if depth >= self.0.max_depth {
            if depth == 0 {
                nesting.swap_remove(pos);
            }
            log::warn!(
                "'{}' re-emitted at depth {depth} (limit {})",
                self.0.name,
                self.0.max_depth
            );
            return Err(Error::ReentrancyLimitExceeded {
                limit: self.0.max_depth,
            });
        }
        nesting[pos].1 += 1;
        Ok(Nesting {
            counts: &self.0.nesting,
            thread: me,
        })
    }
}

struct Nesting<'a> {
    counts: &'a Mutex<SmallVec<[(ThreadId, usize); 2]>>,
    thread: ThreadId,
}

impl Drop for Nesting<'_> {
    fn drop(&mut self) {
        let mut counts = self.counts.lock();
        if let Some(pos) = counts.iter().position(|(t, _)| *t == self.thread) {
            counts[pos].1 -= 1;
            if counts[pos].1 == 0 {
                counts.swap_remove(pos);
            }
        }
    }
}

impl<A> fmt::Debug for SignalHub<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalHub")
            .field("name", &self.0.name)
            .finish_non_exhaustive()
    }
}
