//! Node Flags
//!
//! Per-node phase bits. The node kind (signal, computed, effect, scope) lives
//! in [`NodeKind`](super::NodeKind); these bits describe where a node is in its
//! lifecycle and what the propagation pass has done to it.

use bitflags::bitflags;

bitflags! {
    /// Phase bits carried by every node in the graph.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Flags: u16 {
        /// Currently collecting dependencies; reads link to this node.
        const TRACKING = 1 << 0;
        /// Must re-run regardless of what its dependencies say.
        const DIRTY = 1 << 1;
        /// Something upstream was written; revalidate before trusting the cache.
        const PENDING = 1 << 2;
        /// Sitting in the dispatch queue (effects only).
        const NOTIFIED = 1 << 3;
        /// Running right now. A read of a computed carrying this bit is a cycle.
        const RECURSED = 1 << 4;
        /// Effect that waits for an explicit start.
        const LAZY = 1 << 5;
        /// Effect or scope held back until its deferred scope is started.
        const DEFERRED = 1 << 6;
        /// A computed value has been produced at least once.
        const HAS_VALUE = 1 << 7;
        /// Someone registered activation handlers on this node.
        const OBSERVED = 1 << 8;
        /// Terminal state for effects and scopes.
        const DISPOSED = 1 << 9;
    }
}

impl Flags {
    /// Effects carrying any of these bits are not started yet.
    pub const HELD: Flags = Flags::LAZY.union(Flags::DEFERRED);

    /// Whether the node must be revalidated or re-run.
    pub fn is_stale(self) -> bool {
        self.intersects(Flags::DIRTY | Flags::PENDING)
    }
}
