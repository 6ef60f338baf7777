//! Error types for trellis-core
//!
//! Engine errors are plain values. User code plugs in through [`BoxError`]:
//! derivations and effect bodies return any error type, and the engine wraps
//! it with the node that produced it. Engine errors that travel through user
//! code (a computed failing inside another computed's derivation, say) come
//! back out unwrapped so callers always see the root cause.

use thiserror::Error;

use crate::graph::NodeId;

/// Result type for trellis-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error returned by user derivations and effect bodies.
pub type BoxError = Box<dyn std::error::Error>;

/// Errors that can occur while reading, writing or running reactive nodes
#[derive(Debug, Error)]
pub enum Error {
    /// A computed value was read while it was being computed.
    #[error("cycle detected while computing {0:?}")]
    Cycle(NodeId),

    /// The node was released or disposed before the operation ran.
    #[error("reactive node {0:?} is no longer alive")]
    Disposed(NodeId),

    /// A derivation function returned an error.
    #[error("derivation of {node:?} failed: {source}")]
    Derivation {
        node: NodeId,
        #[source]
        source: BoxError,
    },

    /// An effect body returned an error.
    #[error("effect {node:?} failed: {source}")]
    Effect {
        node: NodeId,
        #[source]
        source: BoxError,
    },

    /// Effects kept re-triggering each other within a single flush.
    #[error("effect dispatch exceeded {limit} runs in one flush")]
    DispatchOverflow { limit: usize },

    /// Runtime configuration could not be parsed.
    #[error("invalid runtime configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl Error {
    /// Wrap an error coming out of a derivation.
    pub(crate) fn derivation(node: NodeId, source: BoxError) -> Self {
        match source.downcast::<Error>() {
            Ok(inner) => *inner,
            Err(source) => Error::Derivation { node, source },
        }
    }

    /// Wrap an error coming out of an effect body.
    pub(crate) fn effect(node: NodeId, source: BoxError) -> Self {
        match source.downcast::<Error>() {
            Ok(inner) => *inner,
            Err(source) => Error::Effect { node, source },
        }
    }

    /// The node this error is attributed to, if any.
    pub fn node(&self) -> Option<NodeId> {
        match self {
            Error::Cycle(node) | Error::Disposed(node) => Some(*node),
            Error::Derivation { node, .. } | Error::Effect { node, .. } => Some(*node),
            Error::DispatchOverflow { .. } | Error::Config(_) => None,
        }
    }
}
