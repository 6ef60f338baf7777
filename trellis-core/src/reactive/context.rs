//! Reactive Context
//!
//! The reactive context tracks which computation is currently running and
//! which node owns newly created effects. This enables automatic dependency
//! tracking: when a signal is read, the current observer is linked to it.
//!
//! # Implementation
//!
//! The context lives on the runtime as two cells: the observer (the subscriber
//! that reads link to) and the owner (the effect or scope that adopts new
//! effects). Entering a context swaps new values in and returns a guard; the
//! guard puts the previous values back when dropped, even if the computation
//! panics. Nested contexts (a computed read inside an effect) therefore
//! unwind naturally.

use super::runtime::RuntimeInner;
use crate::graph::NodeId;

/// Guard that restores the previous context when dropped.
pub(crate) struct ReactiveContext<'rt> {
    rt: &'rt RuntimeInner,
    previous_observer: Option<NodeId>,
    previous_owner: Option<NodeId>,
    /// Subscriber whose dependency tracking this guard closes.
    tracked: Option<NodeId>,
}

impl<'rt> ReactiveContext<'rt> {
    /// Run as `subscriber`: reads link to it, and it owns nested effects when
    /// `owns` is set.
    ///
    /// Tracking starts immediately; stale links are pruned when the guard is
    /// dropped.
    pub fn track(rt: &'rt RuntimeInner, subscriber: NodeId, owns: bool) -> Self {
        rt.graph.borrow_mut().start_tracking(subscriber);
        let previous_observer = rt.observer.replace(Some(subscriber));
        let previous_owner = if owns {
            rt.owner.replace(Some(subscriber))
        } else {
            rt.owner.get()
        };
        Self {
            rt,
            previous_observer,
            previous_owner,
            tracked: Some(subscriber),
        }
    }

    /// Run with `owner` adopting new effects and nothing tracking reads.
    pub fn own(rt: &'rt RuntimeInner, owner: NodeId) -> Self {
        Self {
            rt,
            previous_observer: rt.observer.replace(None),
            previous_owner: rt.owner.replace(Some(owner)),
            tracked: None,
        }
    }

    /// Run with nothing tracking reads; ownership is unchanged.
    pub fn untracked(rt: &'rt RuntimeInner) -> Self {
        Self {
            rt,
            previous_observer: rt.observer.replace(None),
            previous_owner: rt.owner.get(),
            tracked: None,
        }
    }
}

impl Drop for ReactiveContext<'_> {
    fn drop(&mut self) {
        self.rt.observer.set(self.previous_observer);
        self.rt.owner.set(self.previous_owner);

        if let Some(subscriber) = self.tracked {
            // A panic unwinding out of engine code may still hold the graph;
            // leaving the links in place is the only safe option then.
            match self.rt.graph.try_borrow_mut() {
                Ok(mut graph) => graph.end_tracking(subscriber),
                Err(_) => tracing::warn!(node = ?subscriber, "graph busy; tracking not closed"),
            }
        }
    }
}
