//! # Reactive object graphs
//!
//! Trellis builds trees of typed nodes (windows, labels, buttons) whose
//! properties are observable and whose events are broadcast to any number of
//! listeners. There are four main pieces:
//!
//! - [`Cell<T>`]: an observable value that tells subscribers `(old, new)` on
//!   every write.
//! - [`SignalHub<A>`]: a multicast event source with per-listener isolation.
//! - [`NodeGraph`]: the arena that owns every node and its members.
//! - [`NodeBuilder`]: the two-phase construction protocol used by
//!   [`NodeGraph::build_root`] and [`NodeGraph::build_child`].
//!
//! ## Cells
//!
//! ```rust
//! use std::sync::{Arc, Mutex};
//! use trellis_core::*;
//!
//! let count = Cell::new(0);
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let sub = count.subscribe({
//!     let seen = seen.clone();
//!     move |old: &i32, new: &i32| seen.lock().unwrap().push((*old, *new))
//! });
//!
//! count.set(1).unwrap();
//! count.update(|v| *v += 1).unwrap();
//! sub.unsubscribe();
//! count.set(5).unwrap();
//! assert_eq!(*seen.lock().unwrap(), [(0, 1), (1, 2)]);
//! ```
//!
//! A write made while a notification sweep is running, whether from one of the
//! cell's own subscribers or from another thread, is queued and applied after
//! that sweep, so every subscriber observes values in write order. A feedback loop is cut off once the
//! configured depth ([`GraphConfig::max_reentrancy`]) is exceeded.
//!
//! ## Building a tree
//!
//! ```rust
//! use trellis_core::*;
//! use trellis_core::members::{TEXT, TITLE};
//!
//! let graph = NodeGraph::new();
//! let window = graph
//!     .build_root(NodeKind::Window, |w| {
//!         w.set(TITLE, String::from("Hello"))?;
//!         w.child(NodeKind::Label, |l| {
//!             let title: String = l.parent().unwrap().get(TITLE)?;
//!             l.set(TEXT, format!("{title}, world"))?;
//!             Ok(())
//!         })?;
//!         Ok(())
//!     })
//!     .unwrap();
//!
//! let label = &window.children().unwrap()[0];
//! assert_eq!(label.get::<String>(TEXT).unwrap(), "Hello, world");
//! ```
//!
//! A failing initializer aborts only the node it belongs to: its subtree is
//! released, connections made through its builder are disconnected, and the
//! caller receives [`BuildError::InitializerFailed`].

pub mod builder;
pub mod cell;
pub mod config;
pub mod error;
pub mod graph;
pub mod handle;
pub mod kind;
pub mod prelude;
mod registry;
pub mod scope;
pub mod signal;
pub mod subscription;
pub mod tests;

pub use builder::*;
pub use cell::*;
pub use config::*;
pub use error::*;
pub use graph::*;
pub use handle::*;
pub use kind::*;
pub use scope::*;
pub use signal::*;
pub use subscription::*;
