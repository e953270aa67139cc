//! Observable single-value storage.
//!
//! A [`Cell`] is a cloneable, thread-safe handle to a value plus an ordered
//! list of change subscribers:
//!
//! ```rust
//! use trellis_core::Cell;
//!
//! let width = Cell::new(0.0_f64);
//! let _sub = width.subscribe(|old, new| log::info!("width {old} -> {new}"));
//! width.set(100.0).unwrap();
//! assert_eq!(width.get(), 100.0);
//! assert_eq!(width.version(), 1);
//! ```
//!
//! Every `set` notifies, even when the new value equals the old one.
//!
//! One thread at a time commits and notifies: the *sweeper*. A write made while
//! a sweep is running, from a subscriber or from any other thread, does not
//! wait for it. It is queued and the sweeper commits it after the current
//! notification round, so subscribers observe writes in the order they were
//! queued. No lock is held while subscribers run.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::{Mutex, RwLock};

use crate::config::DEFAULT_MAX_REENTRANCY;
use crate::error::{Error, Result};
use crate::subscription::{SlotList, Subscription};

type Observer<T> = dyn Fn(&T, &T) + Send + Sync;

pub struct Cell<T>(Arc<Inner<T>>);

struct Inner<T> {
    slot: RwLock<Versioned<T>>,
    writer: Mutex<WriterState<T>>,
    observers: SlotList<Observer<T>>,
    max_depth: usize,
}

struct Versioned<T> {
    value: T,
    version: u64,
}

enum Write<T> {
    Replace(T),
    Modify(Box<dyn FnOnce(&mut T) + Send>),
}

struct WriterState<T> {
    sweeper: Option<ThreadId>,
    /// Generation of the write being committed. Writes queued by its
    /// subscribers get one more; writes from other threads start at zero.
    depth: usize,
    overflowed: bool,
    pending: VecDeque<(Write<T>, usize)>,
}

/// Hands the writer back if a subscriber panics mid-sweep.
struct Sweep<'a, T> {
    state: &'a Mutex<WriterState<T>>,
    finished: bool,
}

impl<T> Drop for Sweep<'_, T> {
    fn drop(&mut self) {
        if !self.finished {
            let mut state = self.state.lock();
            state.sweeper = None;
            state.depth = 0;
            state.pending.clear();
        }
    }
}

impl<T> Clone for Cell<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: Clone + Send + Sync + 'static> Cell<T> {
    pub fn new(value: T) -> Self {
        Self::with_max_depth(value, DEFAULT_MAX_REENTRANCY)
    }

    pub fn with_max_depth(value: T, max_depth: usize) -> Self {
        Self(Arc::new(Inner {
            slot: RwLock::new(Versioned { value, version: 0 }),
            writer: Mutex::new(WriterState {
                sweeper: None,
                depth: 0,
                overflowed: false,
                pending: VecDeque::new(),
            }),
            observers: SlotList::new(),
            max_depth,
        }))
    }

    pub fn get(&self) -> T {
        self.0.slot.read().value.clone()
    }

    /// Borrow the current value without cloning it.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.0.slot.read().value)
    }

    /// Number of committed writes so far.
    pub fn version(&self) -> u64 {
        self.0.slot.read().version
    }

    /// Commits `value` and notifies every subscriber, or queues it behind the
    /// sweep already in progress.
    pub fn set(&self, value: T) -> Result<()> {
        self.write(Write::Replace(value))
    }

    /// Read-modify-write against the latest value. When queued, `f` runs on
    /// whatever the writes queued before it produced.
    pub fn update(&self, f: impl FnOnce(&mut T) + Send + 'static) -> Result<()> {
        self.write(Write::Modify(Box::new(f)))
    }

    /// Registers `f(old, new)`; it runs once per committed write from now on.
    pub fn subscribe(&self, f: impl Fn(&T, &T) + Send + Sync + 'static) -> Subscription {
        self.0.observers.push(Box::new(f))
    }

    pub fn subscriber_count(&self) -> usize {
        self.0.observers.len()
    }

    fn write(&self, write: Write<T>) -> Result<()> {
        let me = thread::current().id();
        {
            let mut state = self.0.writer.lock();
            if let Some(sweeper) = state.sweeper {
                // only writes made from inside the sweep nest
                let depth = if sweeper == me { state.depth + 1 } else { 0 };
                if depth > self.0.max_depth {
                    state.overflowed = true;
                    log::warn!(
                        "cell write rejected at reentrancy depth {depth} (limit {})",
                        self.0.max_depth
                    );
                    return Err(Error::ReentrancyLimitExceeded {
                        limit: self.0.max_depth,
                    });
                }
                if sweeper != me {
                    log::trace!("cell write queued for sweeping thread {sweeper:?}");
                }
                state.pending.push_back((write, depth));
                return Ok(());
            }
            state.sweeper = Some(me);
            state.depth = 0;
            state.overflowed = false;
        }

        let mut sweep = Sweep {
            state: &self.0.writer,
            finished: false,
        };
        let mut next = write;
        let overflowed = loop {
            self.commit(next);
            let mut state = self.0.writer.lock();
            match state.pending.pop_front() {
                Some((write, depth)) => {
                    state.depth = depth;
                    next = write;
                }
                None => {
                    state.sweeper = None;
                    sweep.finished = true;
                    break std::mem::take(&mut state.overflowed);
                }
            }
        };

        if overflowed {
            Err(Error::ReentrancyLimitExceeded {
                limit: self.0.max_depth,
            })
        } else {
            Ok(())
        }
    }

    // Only the sweeper commits, so the read below cannot race another commit.
    fn commit(&self, write: Write<T>) {
        let value = match write {
            Write::Replace(value) => value,
            Write::Modify(f) => {
                let mut value = self.get();
                f(&mut value);
                value
            }
        };
        let (old, new, version) = {
            let mut slot = self.0.slot.write();
            let old = std::mem::replace(&mut slot.value, value);
            slot.version += 1;
            (old, slot.value.clone(), slot.version)
        };
        let observers = self.0.observers.snapshot();
        log::trace!("cell v{version}: notifying {} subscribers", observers.len());
        for observer in observers {
            if observer.is_live() {
                (observer.callback)(&old, &new);
            }
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Cell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.0.slot.read();
        f.debug_struct("Cell")
            .field("value", &slot.value)
            .field("version", &slot.version)
            .finish()
    }
}
