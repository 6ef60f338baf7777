//! Activation Tracking
//!
//! Signals and computed values can carry activation handlers: callbacks told
//! when something active starts depending on the node (`true`) and when
//! nothing does any more (`false`). Consumers use them to start and stop a
//! backing resource exactly while it has a real consumer.
//!
//! The graph counts active subscribers and reports 0→1 and 1→0 transitions
//! of observed nodes. This tracker turns those transitions into handler calls:
//!
//! - A node is *mounted* between a `true` call and the matching `false`.
//! - Deactivation is debounced. The `false` call is scheduled at
//!   `now + teardown_delay`; reactivating before then cancels it and no
//!   handler is called at all.
//!
//! The tracker never calls handlers itself. It hands them back to the
//! runtime, which calls them once it holds no borrow of the tracker.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use indexmap::IndexMap;
use slotmap::SecondaryMap;
use tokio::time::Instant;

use crate::graph::NodeId;

/// An activation handler.
pub(crate) type Handler = Rc<RefCell<dyn FnMut(bool)>>;

#[derive(Default)]
struct Entry {
    handlers: Vec<(u64, Handler)>,
    mounted: bool,
}

impl Entry {
    fn handlers(&self) -> Vec<Handler> {
        self.handlers.iter().map(|(_, handler)| handler.clone()).collect()
    }
}

pub(crate) struct ActivationTracker {
    entries: SecondaryMap<NodeId, Entry>,
    /// Scheduled teardowns, in scheduling order.
    teardowns: IndexMap<NodeId, Instant>,
    delay: Duration,
    next_key: u64,
}

impl ActivationTracker {
    pub fn new(delay: Duration) -> Self {
        Self {
            entries: SecondaryMap::new(),
            teardowns: IndexMap::new(),
            delay,
            next_key: 0,
        }
    }

    /// Add a handler. Returns its key, and the handler itself when it has to
    /// be told `true` right away because the node is already active or
    /// still mounted.
    pub fn register(
        &mut self,
        node: NodeId,
        handler: Handler,
        active: bool,
    ) -> (u64, Option<Handler>) {
        let key = self.next_key;
        self.next_key += 1;

        let Some(entry) = self.entries.entry(node) else {
            return (key, None);
        };
        let entry = entry.or_default();
        entry.handlers.push((key, handler.clone()));
        if active || entry.mounted {
            entry.mounted = true;
            return (key, Some(handler));
        }
        (key, None)
    }

    /// Remove a handler. Returns it when it has to be told `false` because
    /// the node is mounted, and whether the node has no handlers left.
    pub fn unregister(&mut self, node: NodeId, key: u64) -> (Option<Handler>, bool) {
        let Some(entry) = self.entries.get_mut(node) else {
            return (None, true);
        };
        let Some(index) = entry.handlers.iter().position(|(k, _)| *k == key) else {
            return (None, entry.handlers.is_empty());
        };
        let (_, handler) = entry.handlers.remove(index);
        let unmount = entry.mounted.then_some(handler);

        if entry.handlers.is_empty() {
            self.entries.remove(node);
            self.teardowns.shift_remove(&node);
            return (unmount, true);
        }
        (unmount, false)
    }

    /// Turn activation changes into handler calls, in the order they
    /// happened.
    pub fn apply(
        &mut self,
        changes: Vec<(NodeId, bool)>,
        now: Instant,
    ) -> Vec<(Vec<Handler>, bool)> {
        let mut calls = Vec::new();
        for (node, active) in changes {
            let Some(entry) = self.entries.get_mut(node) else {
                continue;
            };
            if active {
                if self.teardowns.shift_remove(&node).is_some() {
                    tracing::debug!(node = ?node, "teardown cancelled");
                    continue;
                }
                if !entry.mounted {
                    entry.mounted = true;
                    tracing::debug!(node = ?node, "mounted");
                    calls.push((entry.handlers(), true));
                }
            } else if entry.mounted && !self.teardowns.contains_key(&node) {
                tracing::trace!(node = ?node, delay = ?self.delay, "teardown scheduled");
                self.teardowns.insert(node, now + self.delay);
            }
        }
        calls
    }

    /// Unmount every node whose teardown is due by `until` (every scheduled
    /// one for `None`). Returns the handlers to tell `false`.
    pub fn take_due(&mut self, until: Option<Instant>) -> Vec<(NodeId, Vec<Handler>)> {
        let due: Vec<NodeId> = self
            .teardowns
            .iter()
            .filter(|(_, deadline)| until.map_or(true, |until| **deadline <= until))
            .map(|(node, _)| *node)
            .collect();

        let mut out = Vec::with_capacity(due.len());
        for node in due {
            self.teardowns.shift_remove(&node);
            if let Some(entry) = self.entries.get_mut(node) {
                entry.mounted = false;
                out.push((node, entry.handlers()));
            }
        }
        out
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.teardowns.values().min().copied()
    }

    /// Drop everything known about a released node. Returns the handlers to
    /// tell `false` if it was mounted.
    pub fn forget(&mut self, node: NodeId) -> Vec<Handler> {
        self.teardowns.shift_remove(&node);
        match self.entries.remove(node) {
            Some(entry) if entry.mounted => entry.handlers(),
            _ => Vec::new(),
        }
    }

    #[cfg(test)]
    fn is_mounted(&self, node: NodeId) -> bool {
        self.entries.get(node).is_some_and(|entry| entry.mounted)
    }
}
