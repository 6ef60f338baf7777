//! Links
//!
//! A link is the edge between one dependency and one subscriber. It carries
//! the dependency version the subscriber observed when it last read it, which
//! is how a subscriber later tells "the epoch moved" apart from "a value I
//! read actually changed".
//!
//! # Re-tracking
//!
//! When a subscriber re-runs, its dependency list is walked with a cursor
//! (`deps_tail`). Each read tries, in order:
//!
//! 1. the link right after the cursor (stable order, the common case),
//! 2. the link one position further (one dependency dropped or reordered),
//!    which is moved under the cursor,
//! 3. the dependency's newest subscriber link, when it belongs to this
//!    subscriber and was already visited in this pass (a repeated read).
//!
//! Only when all three miss is a new link allocated. Whatever is left after
//! the cursor when the run ends was not read this time and is unlinked.

use slotmap::new_key_type;
use smallvec::SmallVec;

use super::flags::Flags;
use super::node::{NodeId, NodeKind};
use super::Graph;

new_key_type! {
    /// Handle of a link in the graph's link arena.
    pub(crate) struct LinkId;
}

/// An edge from `dep` to `sub`, threaded through both nodes' lists.
#[derive(Debug, Clone)]
pub(crate) struct Link {
    pub dep: NodeId,
    pub sub: NodeId,

    /// `dep.version` as seen by `sub` at its last read.
    pub observed: u64,

    /// Neighbours in the dependency's subscriber list.
    pub prev_sub: Option<LinkId>,
    pub next_sub: Option<LinkId>,

    /// Neighbours in the subscriber's dependency list.
    pub prev_dep: Option<LinkId>,
    pub next_dep: Option<LinkId>,
}

impl Graph {
    /// Reset the dependency cursor of `sub` before it runs.
    pub fn start_tracking(&mut self, sub: NodeId) {
        if let Some(node) = self.nodes.get_mut(sub) {
            node.deps_tail = None;
            node.flags.insert(Flags::TRACKING | Flags::RECURSED);
            node.flags.remove(Flags::DIRTY | Flags::PENDING);
        }
    }

    /// Unlink everything `sub` did not read during this run.
    pub fn end_tracking(&mut self, sub: NodeId) {
        let Some(node) = self.nodes.get_mut(sub) else {
            return;
        };
        node.flags.remove(Flags::TRACKING | Flags::RECURSED);
        let mut stale = match node.deps_tail {
            Some(tail) => self.links.get(tail).and_then(|link| link.next_dep),
            None => node.deps,
        };
        while let Some(id) = stale {
            stale = self.links.get(id).and_then(|link| link.next_dep);
            self.unlink(id);
        }
    }

    /// Record that `sub` read `dep`, reusing an existing link when possible.
    pub fn link(&mut self, dep: NodeId, sub: NodeId) {
        let Some(version) = self.nodes.get(dep).map(|node| node.version) else {
            return;
        };
        let Some(node) = self.nodes.get(sub) else {
            return;
        };
        if !node.flags.contains(Flags::TRACKING) {
            return;
        }
        let cursor = node.deps_tail;

        // Same dependency read twice in a row.
        if let Some(current) = cursor {
            if self.links[current].dep == dep {
                self.links[current].observed = version;
                return;
            }
        }

        let next = match cursor {
            Some(current) => self.links[current].next_dep,
            None => node.deps,
        };

        if let Some(next) = next {
            if self.links[next].dep == dep {
                self.links[next].observed = version;
                self.nodes[sub].deps_tail = Some(next);
                return;
            }
            if let Some(after) = self.links[next].next_dep {
                if self.links[after].dep == dep {
                    self.links[after].observed = version;
                    self.move_under_cursor(sub, cursor, after);
                    return;
                }
            }
        }

        if let Some(newest) = self.nodes[dep].subs_tail {
            if self.links[newest].sub == sub && self.is_valid_link(newest, sub) {
                self.links[newest].observed = version;
                return;
            }
        }

        let prev_sub = self.nodes[dep].subs_tail;
        let id = self.links.insert(Link {
            dep,
            sub,
            observed: version,
            prev_sub,
            next_sub: None,
            prev_dep: cursor,
            next_dep: next,
        });

        match prev_sub {
            Some(prev) => self.links[prev].next_sub = Some(id),
            None => self.nodes[dep].subs = Some(id),
        }
        self.nodes[dep].subs_tail = Some(id);

        match cursor {
            Some(current) => self.links[current].next_dep = Some(id),
            None => self.nodes[sub].deps = Some(id),
        }
        if let Some(next) = next {
            self.links[next].prev_dep = Some(id);
        }
        self.nodes[sub].deps_tail = Some(id);

        tracing::trace!(dep = ?dep, sub = ?sub, "linked");

        if self.nodes[sub].counts_as_active() {
            self.increment_active(dep);
        }
    }

    /// Whether `link` lies in the part of `sub`'s dependency list that has
    /// already been visited in the current run.
    pub fn is_valid_link(&self, link: LinkId, sub: NodeId) -> bool {
        let Some(node) = self.nodes.get(sub) else {
            return false;
        };
        let Some(tail) = node.deps_tail else {
            return false;
        };
        let mut cursor = node.deps;
        while let Some(id) = cursor {
            if id == link {
                return true;
            }
            if id == tail {
                break;
            }
            cursor = self.links.get(id).and_then(|link| link.next_dep);
        }
        false
    }

    /// Move `id`, which sits beyond the cursor, to right after it.
    fn move_under_cursor(&mut self, sub: NodeId, cursor: Option<LinkId>, id: LinkId) {
        let (prev, next) = (self.links[id].prev_dep, self.links[id].next_dep);
        if let Some(prev) = prev {
            self.links[prev].next_dep = next;
        }
        if let Some(next) = next {
            self.links[next].prev_dep = prev;
        }

        let after = match cursor {
            Some(current) => self.links[current].next_dep,
            None => self.nodes[sub].deps,
        };
        self.links[id].prev_dep = cursor;
        self.links[id].next_dep = after;
        match cursor {
            Some(current) => self.links[current].next_dep = Some(id),
            None => self.nodes[sub].deps = Some(id),
        }
        if let Some(after) = after {
            self.links[after].prev_dep = Some(id);
        }
        self.nodes[sub].deps_tail = Some(id);
    }

    /// Remove a link from both lists.
    ///
    /// When this was the dependency's last subscriber and the dependency is a
    /// computed value, the computed goes cold: it is marked dirty and sheds
    /// its own links, cascading upstream.
    pub fn unlink(&mut self, id: LinkId) {
        let mut pending: SmallVec<[LinkId; 8]> = SmallVec::new();
        pending.push(id);

        while let Some(id) = pending.pop() {
            let Some(link) = self.links.remove(id) else {
                continue;
            };

            match link.prev_dep {
                Some(prev) => self.links[prev].next_dep = link.next_dep,
                None => {
                    if let Some(sub) = self.nodes.get_mut(link.sub) {
                        sub.deps = link.next_dep;
                    }
                }
            }
            match link.next_dep {
                Some(next) => self.links[next].prev_dep = link.prev_dep,
                None => {
                    if let Some(sub) = self.nodes.get_mut(link.sub) {
                        sub.deps_tail = link.prev_dep;
                    }
                }
            }

            match link.prev_sub {
                Some(prev) => self.links[prev].next_sub = link.next_sub,
                None => {
                    if let Some(dep) = self.nodes.get_mut(link.dep) {
                        dep.subs = link.next_sub;
                    }
                }
            }
            match link.next_sub {
                Some(next) => self.links[next].prev_sub = link.prev_sub,
                None => {
                    if let Some(dep) = self.nodes.get_mut(link.dep) {
                        dep.subs_tail = link.prev_sub;
                    }
                }
            }

            if self
                .nodes
                .get(link.sub)
                .is_some_and(|sub| sub.counts_as_active())
            {
                self.decrement_active(link.dep);
            }

            let Some(dep) = self.nodes.get_mut(link.dep) else {
                continue;
            };
            if dep.kind == NodeKind::Computed && dep.subs.is_none() {
                dep.flags.insert(Flags::DIRTY);
                let mut cursor = dep.deps;
                while let Some(upstream) = cursor {
                    pending.push(upstream);
                    cursor = self.links.get(upstream).and_then(|link| link.next_dep);
                }
                tracing::trace!(node = ?link.dep, "computed went cold");
            }
        }
    }

    /// Unlink every dependency of `sub`.
    pub fn unlink_all(&mut self, sub: NodeId) {
        let mut cursor = self.nodes.get(sub).and_then(|node| node.deps);
        while let Some(id) = cursor {
            cursor = self.links.get(id).and_then(|link| link.next_dep);
            self.unlink(id);
        }
    }

    /// Unlink every subscriber of `dep`, marking them dirty.
    pub fn unlink_subscribers(&mut self, dep: NodeId) {
        let mut cursor = self.nodes.get(dep).and_then(|node| node.subs);
        while let Some(id) = cursor {
            let Some(link) = self.links.get(id) else {
                break;
            };
            cursor = link.next_sub;
            if let Some(sub) = self.nodes.get_mut(link.sub) {
                sub.flags.insert(Flags::DIRTY);
            }
            self.unlink(id);
        }
    }

    /// Count one more active subscriber on `dep`, propagating upstream when
    /// it becomes active.
    pub fn increment_active(&mut self, dep: NodeId) {
        let mut stack: SmallVec<[NodeId; 8]> = SmallVec::new();
        stack.push(dep);
        while let Some(id) = stack.pop() {
            let Some(node) = self.nodes.get_mut(id) else {
                continue;
            };
            node.active += 1;
            if node.active != 1 {
                continue;
            }
            if node.flags.contains(Flags::OBSERVED) {
                self.activations.push((id, true));
            }
            if node.kind == NodeKind::Computed {
                let mut cursor = node.deps;
                while let Some(link) = cursor.and_then(|link| self.links.get(link)) {
                    stack.push(link.dep);
                    cursor = link.next_dep;
                }
            }
        }
    }

    /// Count one fewer active subscriber on `dep`, propagating upstream when
    /// it becomes inactive.
    pub fn decrement_active(&mut self, dep: NodeId) {
        let mut stack: SmallVec<[NodeId; 8]> = SmallVec::new();
        stack.push(dep);
        while let Some(id) = stack.pop() {
            let Some(node) = self.nodes.get_mut(id) else {
                continue;
            };
            if node.active == 0 {
                tracing::warn!(node = ?id, "active count underflow ignored");
                continue;
            }
            node.active -= 1;
            if node.active != 0 {
                continue;
            }
            if node.flags.contains(Flags::OBSERVED) {
                self.activations.push((id, false));
            }
            if node.kind == NodeKind::Computed {
                let mut cursor = node.deps;
                while let Some(link) = cursor.and_then(|link| self.links.get(link)) {
                    stack.push(link.dep);
                    cursor = link.next_dep;
                }
            }
        }
    }
}
