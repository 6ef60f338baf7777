//! Effect Scopes
//!
//! A scope owns the effects (and nested scopes) created while it is the
//! current owner. Disposing it disposes them in creation order, then runs the
//! scope's own cleanups.
//!
//! A deferred scope runs its setup right away but holds every effect created
//! inside it until [`DeferredScope::start`]. This lets a consumer build a
//! whole subtree and only switch it on once it is attached.

use std::fmt;

use super::context::ReactiveContext;
use super::runtime::Runtime;
use crate::error::{Error, Result};
use crate::graph::{Flags, Node, NodeId, NodeKind};

/// Handle to an effect scope.
#[derive(Clone)]
pub struct EffectScope {
    rt: Runtime,
    id: NodeId,
}

/// A scope whose effects are held until it is started.
#[derive(Debug)]
pub struct DeferredScope {
    scope: EffectScope,
}

impl Runtime {
    /// Run `f` inside a new scope and return the scope with `f`'s result.
    ///
    /// # Example
    ///
    /// ```
    /// use trellis_core::Runtime;
    ///
    /// let rt = Runtime::new();
    /// let a = rt.signal(0);
    /// let (scope, effect) = rt.scope(|| {
    ///     let a = a.clone();
    ///     rt.effect(move || { a.get(); })
    /// });
    /// let effect = effect?;
    ///
    /// scope.dispose();
    /// assert!(effect.is_disposed());
    /// # Ok::<(), trellis_core::Error>(())
    /// ```
    pub fn scope<R>(&self, f: impl FnOnce() -> R) -> (EffectScope, R) {
        let scope = self.create_scope(Flags::empty());
        let result = scope.enter(f);
        (scope, result)
    }

    /// Run `f` inside a new deferred scope. Effects created inside do not run
    /// until the scope is started.
    pub fn defer_scope<R>(&self, f: impl FnOnce() -> R) -> (DeferredScope, R) {
        let scope = self.create_scope(Flags::DEFERRED);
        let result = scope.enter(f);
        (DeferredScope { scope }, result)
    }

    fn create_scope(&self, flags: Flags) -> EffectScope {
        let inner = self.inner();
        let owner = inner.owner.get();
        let id = inner
            .graph
            .borrow_mut()
            .insert(Node::new(NodeKind::Scope).with_flags(flags).with_owner(owner));
        tracing::debug!(node = ?id, deferred = flags.contains(Flags::DEFERRED), "scope created");
        EffectScope {
            rt: self.clone(),
            id,
        }
    }
}

impl EffectScope {
    pub fn id(&self) -> NodeId {
        self.id
    }

    fn enter<R>(&self, f: impl FnOnce() -> R) -> R {
        let _cx = ReactiveContext::own(self.rt.inner(), self.id);
        f()
    }

    /// Run `f` with this scope as the owner, adding what it creates to the
    /// scope.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> Result<R> {
        if self.is_disposed() {
            return Err(Error::Disposed(self.id));
        }
        Ok(self.enter(f))
    }

    /// Dispose every child in creation order, then run the scope's cleanups.
    /// Calling this again does nothing.
    pub fn dispose(&self) {
        let inner = self.rt.inner();
        let result = inner.dispatch(|| {
            inner.dispose_node(self.id);
            Ok(())
        });
        if let Err(err) = result {
            tracing::error!(node = ?self.id, error = %err, "effect failed during scope disposal");
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.rt
            .inner()
            .graph
            .borrow()
            .node(self.id)
            .map_or(true, |node| node.is_disposed())
    }

    /// Number of effects and scopes directly owned by this scope.
    pub fn child_count(&self) -> usize {
        self.rt
            .inner()
            .graph
            .borrow()
            .node(self.id)
            .map_or(0, |node| node.children.len())
    }
}

impl fmt::Debug for EffectScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectScope")
            .field("id", &self.id)
            .field("children", &self.child_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl DeferredScope {
    pub fn id(&self) -> NodeId {
        self.scope.id
    }

    /// Run `f` inside the scope. Effects it creates are held like the rest.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> Result<R> {
        self.scope.run(f)
    }

    /// Release the held effects and run them in creation order.
    ///
    /// Every held effect runs even if an earlier one fails; the first error
    /// is returned. Lazy effects stay lazy.
    pub fn start(self) -> Result<EffectScope> {
        let inner = self.scope.rt.inner();
        let id = self.scope.id;
        inner.dispatch(|| {
            let held: Vec<NodeId> = {
                let mut graph = inner.graph.borrow_mut();
                match graph.node_mut(id) {
                    Some(node) => node.flags.remove(Flags::DEFERRED),
                    None => return Err(Error::Disposed(id)),
                }
                graph
                    .descendants(id)
                    .into_iter()
                    .filter(|child| {
                        graph
                            .node(*child)
                            .is_some_and(|node| node.flags.contains(Flags::DEFERRED))
                    })
                    .collect()
            };
            tracing::debug!(node = ?id, held = held.len(), "deferred scope started");

            let mut first = None;
            for effect in held {
                let released = match inner.graph.borrow_mut().node_mut(effect) {
                    Some(node) => {
                        node.flags.remove(Flags::DEFERRED);
                        true
                    }
                    None => false,
                };
                if !released || !inner.should_run(effect) {
                    continue;
                }
                if let Err(err) = inner.run_effect(effect) {
                    match first {
                        None => first = Some(err),
                        Some(_) => tracing::error!(
                            node = ?effect,
                            error = %err,
                            "held effect failed after an earlier error"
                        ),
                    }
                }
            }
            first.map_or(Ok(()), Err)
        })?;
        Ok(self.scope)
    }

    pub fn dispose(&self) {
        self.scope.dispose()
    }

    pub fn is_disposed(&self) -> bool {
        self.scope.is_disposed()
    }
}
