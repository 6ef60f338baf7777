//! Update Scheduler
//!
//! Push half of the push-pull algorithm. A write walks the subscriber lists
//! downstream of the written node and only marks:
//!
//! 1. Computed values become `PENDING`. A computed that already was pending
//!    has already passed the mark on, so the walk stops there. This keeps
//!    diamonds linear instead of exponential.
//! 2. Effects become `PENDING` and, unless already queued or held, are
//!    appended to the dispatch queue in the order the walk reaches them.
//! 3. Nodes with a runner hand their trigger to the runner instead. Effects
//!    below a computed runner are marked but left for its trigger to queue.
//!
//! Whether anything actually re-runs is decided later, on the pull side, by
//! comparing the versions each subscriber observed against the current ones.

use std::collections::{HashSet, VecDeque};

use super::flags::Flags;
use super::link::LinkId;
use super::node::{NodeId, NodeKind};
use super::Graph;

/// Work produced by propagation and consumed by the runtime's flush loop.
#[derive(Debug, Default)]
pub(crate) struct DispatchQueue {
    /// Effects to revalidate and run, in notification order.
    pub effects: VecDeque<NodeId>,
    /// Nodes whose runner must be handed a trigger.
    pub runners: Vec<NodeId>,
}

impl DispatchQueue {
    pub fn is_empty(&self) -> bool {
        self.effects.is_empty() && self.runners.is_empty()
    }
}

impl Graph {
    /// Mark everything downstream of `source`.
    ///
    /// With `force` the walk does not stop at computed values that are already
    /// pending. That is what a computed's runner trigger uses: its subtree was
    /// marked earlier, but the effects below it were never queued.
    pub fn propagate(&mut self, source: NodeId, force: bool) {
        let Some(head) = self.nodes.get(source).map(|node| node.subs) else {
            return;
        };
        let mut visited: HashSet<NodeId> = HashSet::new();
        let mut stack: Vec<(Option<LinkId>, bool)> = vec![(head, false)];

        while let Some(frame) = stack.last_mut() {
            let Some(link) = frame.0 else {
                stack.pop();
                continue;
            };
            let gated = frame.1;
            let Some(link) = self.links.get(link) else {
                stack.pop();
                continue;
            };
            frame.0 = link.next_sub;
            let sub = link.sub;

            let Some(node) = self.nodes.get_mut(sub) else {
                continue;
            };
            if node.is_disposed() {
                continue;
            }

            match node.kind {
                NodeKind::Computed => {
                    let has_runner = node.runner.is_some();
                    let was_pending = node.flags.contains(Flags::PENDING);
                    node.flags.insert(Flags::PENDING);
                    let first_visit = if force {
                        visited.insert(sub)
                    } else {
                        !was_pending
                    };
                    if !first_visit {
                        continue;
                    }
                    if has_runner && !gated {
                        self.dispatch.runners.push(sub);
                    }
                    let subs = node.subs;
                    stack.push((subs, gated || has_runner));
                }
                NodeKind::Effect => {
                    node.flags.insert(Flags::PENDING);
                    if gated || node.flags.intersects(Flags::HELD) {
                        continue;
                    }
                    if node.runner.is_some() {
                        self.dispatch.runners.push(sub);
                    } else if !node.flags.contains(Flags::NOTIFIED) {
                        node.flags.insert(Flags::NOTIFIED);
                        self.dispatch.effects.push_back(sub);
                    }
                }
                NodeKind::Signal | NodeKind::Scope => {}
            }
        }

        tracing::trace!(
            source = ?source,
            queued = self.dispatch.effects.len(),
            runners = self.dispatch.runners.len(),
            "propagated"
        );
    }

    /// Queue a single effect, as its runner's trigger does.
    pub fn enqueue(&mut self, effect: NodeId) {
        if let Some(node) = self.nodes.get_mut(effect) {
            if node.is_disposed() || node.flags.contains(Flags::NOTIFIED) {
                return;
            }
            node.flags.insert(Flags::NOTIFIED);
            self.dispatch.effects.push_back(effect);
        }
    }
}
