//! Dependency Graph
//!
//! This module implements the graph that tracks relationships between
//! reactive values and the computations reading them.
//!
//! # Overview
//!
//! - Nodes represent signals, computed values, effects and scopes.
//! - Edges are [`Link`] objects: one per (dependency, subscriber) pair. Each
//!   link sits in two doubly linked lists at once, the dependency's subscriber
//!   list and the subscriber's dependency list, so it can be inserted and
//!   removed from either side in O(1).
//!
//! # Design Decisions
//!
//! 1. Nodes and links live in generational arenas (`slotmap`) and refer to
//!    each other by key. There are no owning cycles between them.
//!
//! 2. Links are reused positionally when a subscriber re-runs: a stable
//!    dependency order re-evaluates without allocating.
//!
//! 3. Propagation only marks nodes. It never runs user code, so the graph can
//!    be walked while it is mutably borrowed. Effects to run and activation
//!    changes are collected and handed back to the runtime afterwards.

mod flags;
mod link;
mod node;
mod scheduler;

pub use flags::Flags;
pub use node::{NodeId, NodeKind};

pub(crate) use link::{Link, LinkId};
pub(crate) use node::{Node, Payload};
pub(crate) use scheduler::DispatchQueue;

use indexmap::IndexSet;
use slotmap::SlotMap;

/// Arena holding every node and link of one runtime.
pub(crate) struct Graph {
    nodes: SlotMap<NodeId, Node>,
    links: SlotMap<LinkId, Link>,

    /// Incremented once per external write.
    epoch: u64,

    /// Effects and scopes without an owner, in creation order.
    roots: IndexSet<NodeId>,

    /// Activation changes collected during a traversal, flushed afterwards.
    activations: Vec<(NodeId, bool)>,

    /// Effects and runners waiting for the current flush.
    pub dispatch: DispatchQueue,
}

impl Graph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self {
            nodes: SlotMap::with_key(),
            links: SlotMap::with_key(),
            epoch: 0,
            roots: IndexSet::new(),
            activations: Vec::new(),
            dispatch: DispatchQueue::default(),
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Add a node, registering it with its owner (or as a root when it is an
    /// owner-less effect or scope).
    pub fn insert(&mut self, node: Node) -> NodeId {
        let owner = node.owner;
        let owned = matches!(node.kind, NodeKind::Effect | NodeKind::Scope);
        let id = self.nodes.insert(node);
        if owned {
            match owner.and_then(|owner| self.nodes.get_mut(owner)) {
                Some(owner) => {
                    owner.children.insert(id);
                }
                None => {
                    self.roots.insert(id);
                }
            }
        }
        id
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    pub fn link_at(&self, id: LinkId) -> Option<&Link> {
        self.links.get(id)
    }

    /// Detach a node from every list it belongs to and take it out of the
    /// arena. The caller drops the returned node once no borrow of the graph
    /// is held, since dropping it can run user destructors.
    pub fn remove(&mut self, id: NodeId) -> Option<Node> {
        self.unlink_subscribers(id);
        self.unlink_all(id);
        let node = self.nodes.remove(id)?;
        match node.owner.and_then(|owner| self.nodes.get_mut(owner)) {
            Some(owner) => {
                owner.children.shift_remove(&id);
            }
            None => {
                self.roots.shift_remove(&id);
            }
        }
        Some(node)
    }

    /// Record a write: advance the epoch and the node's own version.
    pub fn mark_written(&mut self, id: NodeId) {
        self.epoch = self.epoch.wrapping_add(1);
        if let Some(node) = self.nodes.get_mut(id) {
            node.version = node.version.wrapping_add(1);
        }
    }

    /// Whether `id` or any of its owners is a deferred scope that has not
    /// been started yet.
    pub fn is_deferred(&self, mut id: Option<NodeId>) -> bool {
        while let Some(node) = id.and_then(|id| self.nodes.get(id)) {
            if node.flags.contains(Flags::DEFERRED) {
                return true;
            }
            id = node.owner;
        }
        false
    }

    /// Owner-less effects and scopes in creation order.
    pub fn roots(&self) -> Vec<NodeId> {
        self.roots.iter().copied().collect()
    }

    /// Descendants of an owner in creation order, depth first.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = match self.nodes.get(id) {
            Some(node) => node.children.iter().rev().copied().collect(),
            None => return out,
        };
        while let Some(next) = stack.pop() {
            out.push(next);
            if let Some(node) = self.nodes.get(next) {
                stack.extend(node.children.iter().rev().copied());
            }
        }
        out
    }

    /// Take the activation changes collected so far.
    pub fn take_activations(&mut self) -> Vec<(NodeId, bool)> {
        std::mem::take(&mut self.activations)
    }

    pub fn subscriber_count(&self, id: NodeId) -> usize {
        let mut count = 0;
        let mut cursor = self.nodes.get(id).and_then(|node| node.subs);
        while let Some(link) = cursor.and_then(|id| self.links.get(id)) {
            count += 1;
            cursor = link.next_sub;
        }
        count
    }

    pub fn dependency_count(&self, id: NodeId) -> usize {
        let mut count = 0;
        let mut cursor = self.nodes.get(id).and_then(|node| node.deps);
        while let Some(link) = cursor.and_then(|id| self.links.get(id)) {
            count += 1;
            cursor = link.next_dep;
        }
        count
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}
