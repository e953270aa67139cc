use std::any::{Any, type_name};

use smallvec::SmallVec;

use crate::cell::Cell;
use crate::error::{Error, Result};
use crate::kind::NodeKind;
use crate::signal::SignalHub;

struct Member {
    name: &'static str,
    type_name: &'static str,
    value: Box<dyn Any + Send + Sync>,
}

/// A node's named cells and signals, type-erased.
pub(crate) struct Members {
    cells: SmallVec<[Member; 4]>,
    signals: SmallVec<[Member; 2]>,
    max_depth: usize,
}

impl Members {
    pub(crate) fn new(max_depth: usize) -> Self {
        Self {
            cells: SmallVec::new(),
            signals: SmallVec::new(),
            max_depth,
        }
    }

    fn is_declared(&self, name: &str) -> bool {
        self.cells.iter().chain(self.signals.iter()).any(|m| m.name == name)
    }

    pub(crate) fn declare_cell<T>(&mut self, name: &'static str, initial: T) -> Result<Cell<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        if self.is_declared(name) {
            return Err(Error::DuplicateMember {
                name: name.to_string(),
            });
        }
        let cell = Cell::with_max_depth(initial, self.max_depth);
        self.cells.push(Member {
            name,
            type_name: type_name::<T>(),
            value: Box::new(cell.clone()),
        });
        Ok(cell)
    }

    pub(crate) fn declare_signal<A: 'static>(&mut self, name: &'static str) -> Result<SignalHub<A>> {
        if self.is_declared(name) {
            return Err(Error::DuplicateMember {
                name: name.to_string(),
            });
        }
        let hub = SignalHub::with_max_depth(name, self.max_depth);
        self.signals.push(Member {
            name,
            type_name: type_name::<A>(),
            value: Box::new(hub.clone()),
        });
        Ok(hub)
    }

    pub(crate) fn cell<T: 'static>(&self, kind: NodeKind, name: &str) -> Result<Cell<T>> {
        let member = self
            .cells
            .iter()
            .find(|m| m.name == name)
            .ok_or_else(|| Error::UnknownCell {
                kind,
                name: name.to_string(),
            })?;
        member
            .value
            .downcast_ref::<Cell<T>>()
            .cloned()
            .ok_or_else(|| Error::TypeMismatch {
                name: name.to_string(),
                declared: member.type_name,
                requested: type_name::<T>(),
            })
    }

    pub(crate) fn signal<A: 'static>(&self, kind: NodeKind, name: &str) -> Result<SignalHub<A>> {
        let member = self
            .signals
            .iter()
            .find(|m| m.name == name)
            .ok_or_else(|| Error::UnknownSignal {
                kind,
                name: name.to_string(),
            })?;
        member
            .value
            .downcast_ref::<SignalHub<A>>()
            .cloned()
            .ok_or_else(|| Error::TypeMismatch {
                name: name.to_string(),
                declared: member.type_name,
                requested: type_name::<A>(),
            })
    }

    pub(crate) fn cell_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.cells.iter().map(|m| m.name)
    }

    pub(crate) fn signal_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.signals.iter().map(|m| m.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_unique_across_cells_and_signals() {
        let mut m = Members::new(4);
        m.declare_cell("count", 0_i64).unwrap();
        assert!(matches!(
            m.declare_signal::<()>("count"),
            Err(Error::DuplicateMember { .. })
        ));
        assert!(matches!(
            m.declare_cell("count", 1_i64),
            Err(Error::DuplicateMember { .. })
        ));
    }

    #[test]
    fn lookups_check_the_declared_type() {
        let mut m = Members::new(4);
        m.declare_cell("count", 3_i64).unwrap();
        m.declare_signal::<String>("renamed").unwrap();

        assert_eq!(m.cell::<i64>(NodeKind::Widget, "count").unwrap().get(), 3);
        match m.cell::<u8>(NodeKind::Widget, "count") {
            Err(Error::TypeMismatch {
                declared,
                requested,
                ..
            }) => {
                assert_eq!(declared, "i64");
                assert_eq!(requested, "u8");
            }
            other => panic!("expected a type mismatch, got {other:?}"),
        }
        assert!(matches!(
            m.signal::<()>(NodeKind::Widget, "renamed"),
            Err(Error::TypeMismatch { .. })
        ));
        assert!(matches!(
            m.cell::<i64>(NodeKind::Widget, "missing"),
            Err(Error::UnknownCell { .. })
        ));
    }
}
