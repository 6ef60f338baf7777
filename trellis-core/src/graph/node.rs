//! Graph Nodes
//!
//! This module defines the node type that lives in the dependency graph.
//! A node plays up to two roles:
//!
//! - Dependency: it has a subscriber list (`subs`..`subs_tail`) and an
//!   active-subscriber count.
//! - Subscriber: it has a dependency list (`deps`..`deps_tail`) and flags.
//!
//! Signals are dependencies only, effects are subscribers only, computed
//! values are both. Scopes own effects but take no part in propagation.

use std::rc::{Rc, Weak};

use indexmap::IndexSet;
use slotmap::new_key_type;
use smallvec::SmallVec;

use super::flags::Flags;
use super::link::LinkId;
use crate::reactive::{Cleanup, Derive, EffectJob, Runner};

new_key_type! {
    /// Generational handle of a node in the dependency graph.
    ///
    /// Stale handles (a released signal, a disposed effect) never alias a
    /// newer node; lookups through them simply find nothing.
    pub struct NodeId;
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A writable cell. Has dependents, never dependencies.
    Signal,

    /// A memoized derivation. Has dependencies and may have dependents.
    Computed,

    /// A side-effecting subscriber. Has dependencies, never dependents.
    Effect,

    /// A lifecycle owner for nested effects and scopes.
    Scope,
}

/// What the runtime needs to re-evaluate a node without knowing its type.
pub(crate) enum Payload {
    None,
    /// Owned by the typed `Computed` handles; released when they go away.
    Computed(Weak<dyn Derive>),
    /// Owned by the graph until the effect is disposed.
    Effect(Rc<EffectJob>),
}

/// A node in the dependency graph.
pub(crate) struct Node {
    pub kind: NodeKind,
    pub flags: Flags,

    /// Head and tail of this node's subscriber list.
    pub subs: Option<LinkId>,
    pub subs_tail: Option<LinkId>,

    /// Head and tail of this node's dependency list. While tracking, the tail
    /// is the cursor: everything after it is a candidate for reuse or pruning.
    pub deps: Option<LinkId>,
    pub deps_tail: Option<LinkId>,

    /// Bumped whenever the value actually changes.
    pub version: u64,

    /// Epoch at which a computed value was last confirmed current.
    pub verified_at: u64,

    /// Number of active subscribers (effects, or computed values that are
    /// themselves active).
    pub active: u32,

    /// Effect or scope that created this node, if any.
    pub owner: Option<NodeId>,

    /// Effects and scopes created while this node was the owner, in creation
    /// order.
    pub children: IndexSet<NodeId>,

    /// Run before the next run and on disposal.
    pub cleanups: SmallVec<[Cleanup; 1]>,

    pub payload: Payload,

    /// Scheduling hook wrapping re-evaluation triggers.
    pub runner: Option<Runner>,
}

impl Node {
    /// Create a new node with the given kind.
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            flags: match kind {
                NodeKind::Signal | NodeKind::Scope => Flags::empty(),
                // Start dirty to ensure the first evaluation happens.
                NodeKind::Computed | NodeKind::Effect => Flags::DIRTY,
            },
            subs: None,
            subs_tail: None,
            deps: None,
            deps_tail: None,
            version: 0,
            verified_at: 0,
            active: 0,
            owner: None,
            children: IndexSet::new(),
            cleanups: SmallVec::new(),
            payload: Payload::None,
            runner: None,
        }
    }

    pub fn with_flags(mut self, flags: Flags) -> Self {
        self.flags.insert(flags);
        self
    }

    pub fn with_owner(mut self, owner: Option<NodeId>) -> Self {
        self.owner = owner;
        self
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_runner(mut self, runner: Option<Runner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn is_disposed(&self) -> bool {
        self.flags.contains(Flags::DISPOSED)
    }

    /// Whether links from this node count towards its dependencies'
    /// active-subscriber totals.
    ///
    /// Effects only hold links once they have run, so every effect link
    /// counts. A computed value counts only while something active reads it.
    pub fn counts_as_active(&self) -> bool {
        match self.kind {
            NodeKind::Effect => true,
            NodeKind::Computed => self.active > 0,
            NodeKind::Signal | NodeKind::Scope => false,
        }
    }
}
