//! Runner hooks
//!
//! A runner sits between "a dependency was written" and "re-evaluate". It is
//! handed a [`Trigger`] and fires it whenever it sees fit: right away, on the
//! next tick, after a debounce window, or never. Tracking and comparison are
//! unaffected: a fired trigger still only re-runs what actually changed.

use std::fmt;
use std::rc::Rc;

use super::runtime::Runtime;
use crate::error::Result;
use crate::graph::{NodeId, NodeKind};

/// Scheduling hook for a computed value or an effect.
pub type Runner = Rc<dyn Fn(Trigger)>;

/// Re-evaluation handle passed to a [`Runner`].
///
/// Firing a trigger more than once, or after its node was disposed, is
/// harmless.
#[derive(Clone)]
pub struct Trigger {
    rt: Runtime,
    node: NodeId,
}

impl Trigger {
    pub(crate) fn new(rt: Runtime, node: NodeId) -> Self {
        Self { rt, node }
    }

    /// The node this trigger re-evaluates.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Re-evaluate now.
    ///
    /// For an effect this queues it; it runs if a dependency changed. For a
    /// computed value this refreshes it and releases the effects below it
    /// that were held back. Either way the resulting effects have run by the
    /// time this returns, unless it is called from inside another dispatch.
    pub fn fire(&self) -> Result<()> {
        let inner = self.rt.inner();
        let kind = inner.graph.borrow().node(self.node).map(|node| node.kind);
        match kind {
            Some(NodeKind::Effect) => inner.dispatch(|| {
                inner.graph.borrow_mut().enqueue(self.node);
                Ok(())
            }),
            Some(NodeKind::Computed) => inner.dispatch(|| {
                let refreshed = inner.refresh(self.node);
                inner.graph.borrow_mut().propagate(self.node, true);
                refreshed
            }),
            Some(NodeKind::Signal | NodeKind::Scope) | None => Ok(()),
        }
    }
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trigger").field("node", &self.node).finish()
    }
}
