//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects signals, computed
//! values and effects. It owns the dependency graph and schedules updates
//! when signals change.
//!
//! # How It Works
//!
//! 1. When a signal, computed value or effect is created, it gets a node in
//!    the runtime's graph.
//!
//! 2. When a computed value or effect reads a node, the runtime links the two.
//!
//! 3. When a signal's value changes, the runtime:
//!    a. Advances the epoch and the signal's version
//!    b. Marks everything downstream as pending
//!    c. Queues the effects it reached
//!    d. Runs the queued effects whose dependencies actually changed
//!
//! Computed values are lazy: they revalidate on the next read.
//!
//! # Dispatch
//!
//! Every public operation that can change the graph runs inside
//! [`RuntimeInner::dispatch`]. Nested dispatches (an effect writing a signal)
//! only queue work; the outermost one drains the queue before returning. So a
//! write's whole fan-out, including re-entrant writes, has completed by the
//! time `set()` returns.
//!
//! # Threading
//!
//! A runtime is single-threaded. Handles share it through `Rc`, so none of
//! them are `Send`. Independent runtimes do not interact.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexSet;
use tokio::time::Instant;

use super::activation::{ActivationTracker, Handler};
use super::context::ReactiveContext;
use super::disposer::Disposer;
use super::effect::Cleanup;
use super::trigger::Trigger;
use crate::config::RuntimeConfig;
use crate::error::{Error, Result};
use crate::graph::{Flags, Graph, NodeId, NodeKind, Payload};

/// Shared state behind a [`Runtime`] handle.
pub(crate) struct RuntimeInner {
    pub graph: RefCell<Graph>,

    /// Subscriber that reads link to.
    pub observer: Cell<Option<NodeId>>,

    /// Owner adopting newly created effects and scopes.
    pub owner: Cell<Option<NodeId>>,

    /// Number of dispatches currently on the stack.
    depth: Cell<usize>,

    activation: RefCell<ActivationTracker>,

    config: RuntimeConfig,

    /// Back-reference for handing out `Runtime` handles from inside.
    this: Weak<RuntimeInner>,
}

/// A reactive runtime.
///
/// Cloning is cheap and yields another handle to the same runtime. Effects
/// keep the runtime alive until they are disposed, see
/// [`Runtime::dispose_all`].
///
/// # Example
///
/// ```
/// use trellis_core::Runtime;
///
/// let rt = Runtime::new();
/// let count = rt.signal(1);
/// let doubled = rt.computed({
///     let count = count.clone();
///     move || count.get() * 2
/// });
/// assert_eq!(doubled.get().unwrap(), 2);
///
/// count.set(5).unwrap();
/// assert_eq!(doubled.get().unwrap(), 10);
/// ```
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RuntimeInner>,
}

impl Runtime {
    /// Create a runtime with the default configuration.
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a runtime with the given configuration.
    pub fn with_config(config: RuntimeConfig) -> Self {
        Self {
            inner: Rc::new_cyclic(|this| RuntimeInner {
                graph: RefCell::new(Graph::new()),
                observer: Cell::new(None),
                owner: Cell::new(None),
                depth: Cell::new(0),
                activation: RefCell::new(ActivationTracker::new(config.teardown_delay())),
                config,
                this: this.clone(),
            }),
        }
    }

    pub(crate) fn inner(&self) -> &RuntimeInner {
        &self.inner
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Run `f` without tracking any reads it makes.
    pub fn untrack<R>(&self, f: impl FnOnce() -> R) -> R {
        let _cx = ReactiveContext::untracked(&self.inner);
        f()
    }

    /// Run `f` with effects held back until it returns.
    ///
    /// Effects triggered by writes inside `f` run once, after `f`, and the
    /// first error they raise is returned.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> Result<R> {
        self.inner.dispatch(|| Ok(f()))
    }

    /// Register a cleanup on the current owner (the running effect or the
    /// scope being set up).
    ///
    /// Returns `false`, and drops `f` without running it, when there is no
    /// owner.
    pub fn on_cleanup(&self, f: impl FnOnce() + 'static) -> bool {
        let owner = self.inner.owner.get();
        {
            let mut graph = self.inner.graph.borrow_mut();
            if let Some(node) = owner.and_then(|id| graph.node_mut(id)) {
                if !node.is_disposed() {
                    node.cleanups.push(Cleanup::new(f));
                    return true;
                }
            }
        }
        tracing::warn!(owner = ?owner, "cleanup registered outside of an owner; dropped");
        false
    }

    /// Dispose every effect and scope that has no owner.
    pub fn dispose_all(&self) {
        let result = self.inner.dispatch(|| {
            let roots = self.inner.graph.borrow().roots();
            for root in roots {
                self.inner.dispose_node(root);
            }
            Ok(())
        });
        if let Err(err) = result {
            tracing::error!(error = %err, "effect failed while disposing the runtime");
        }
    }

    /// Current epoch. Advances once per write that changed a value.
    pub fn epoch(&self) -> u64 {
        self.inner.graph.borrow().epoch()
    }

    /// Number of subscribers linked to `node`.
    pub fn subscriber_count(&self, node: NodeId) -> usize {
        self.inner.graph.borrow().subscriber_count(node)
    }

    /// Number of dependencies `node` is linked to.
    pub fn dependency_count(&self, node: NodeId) -> usize {
        self.inner.graph.borrow().dependency_count(node)
    }

    /// Whether anything active (an effect, directly or through computed
    /// values) depends on `node`.
    pub fn is_active(&self, node: NodeId) -> bool {
        self.inner
            .graph
            .borrow()
            .node(node)
            .is_some_and(|node| node.active > 0)
    }

    /// Earliest pending teardown, if any.
    pub fn next_teardown(&self) -> Option<Instant> {
        self.inner.activation.borrow().next_deadline()
    }

    /// Run the teardowns whose debounce window ended at or before `now`.
    /// Returns how many nodes were torn down.
    pub fn run_due_teardowns(&self, now: Instant) -> Result<usize> {
        self.inner.dispatch(|| Ok(self.inner.run_teardowns(Some(now))))
    }

    /// Run every pending teardown regardless of its deadline.
    pub fn flush_teardowns(&self) -> Result<usize> {
        self.inner.dispatch(|| Ok(self.inner.run_teardowns(None)))
    }

    /// Sleep until each pending teardown is due and run it. Resolves once no
    /// teardown is pending.
    pub async fn drive_teardowns(&self) -> Result<()> {
        while let Some(deadline) = self.next_teardown() {
            tokio::time::sleep_until(deadline).await;
            self.run_due_teardowns(Instant::now())?;
        }
        Ok(())
    }

    /// Register an activation handler on `node`.
    pub(crate) fn on_activate(
        &self,
        node: NodeId,
        handler: impl FnMut(bool) + 'static,
    ) -> Disposer {
        let handler: Handler = Rc::new(RefCell::new(handler));
        let active = {
            let mut graph = self.inner.graph.borrow_mut();
            match graph.node_mut(node) {
                Some(entry) => {
                    entry.flags.insert(Flags::OBSERVED);
                    entry.active > 0
                }
                None => {
                    tracing::warn!(node = ?node, "activation handler registered on a released node");
                    return Disposer::disposed();
                }
            }
        };

        let (key, mount) = self
            .inner
            .activation
            .borrow_mut()
            .register(node, handler, active);
        if let Some(handler) = mount {
            self.inner.call_handlers(vec![handler], true);
        }

        let rt = self.clone();
        Disposer::new(move || rt.inner.remove_handler(node, key))
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let graph = self.inner.graph.borrow();
        f.debug_struct("Runtime")
            .field("epoch", &graph.epoch())
            .field("nodes", &graph.node_count())
            .field("links", &graph.link_count())
            .finish()
    }
}

/// Restores the dispatch depth when a dispatch unwinds.
struct DepthGuard<'rt> {
    depth: &'rt Cell<usize>,
    previous: usize,
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.depth.set(self.previous);
    }
}

/// Keep the first error of a flush, log the rest.
fn record(first: &mut Option<Error>, err: Error) {
    match first {
        None => *first = Some(err),
        Some(_) => tracing::error!(error = %err, "effect failed after an earlier error in the same flush"),
    }
}

impl RuntimeInner {
    /// Run `f`, then drain every effect, runner and activation change it
    /// caused, unless an outer dispatch is already doing so.
    pub fn dispatch<R>(&self, f: impl FnOnce() -> Result<R>) -> Result<R> {
        let previous = self.depth.get();
        self.depth.set(previous + 1);
        let _guard = DepthGuard {
            depth: &self.depth,
            previous,
        };

        let result = f();
        if previous > 0 {
            return result;
        }

        let flushed = self.flush();
        match (result, flushed) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(err)) => Err(err),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(later)) => {
                tracing::error!(error = %later, "effect failed after an earlier error in the same flush");
                Err(err)
            }
        }
    }

    /// Drain the dispatch queue: effects first, then runner triggers, then
    /// activation changes, then due teardowns, until nothing is left.
    fn flush(&self) -> Result<()> {
        let limit = self.config.max_effect_runs();
        let mut runs = 0usize;
        let mut first: Option<Error> = None;

        loop {
            let next = self.graph.borrow_mut().dispatch.effects.pop_front();
            if let Some(effect) = next {
                if let Some(node) = self.graph.borrow_mut().node_mut(effect) {
                    node.flags.remove(Flags::NOTIFIED);
                }
                if !self.should_run(effect) {
                    continue;
                }
                runs += 1;
                if runs > limit {
                    self.abandon_queue();
                    tracing::error!(limit, "effects kept re-triggering each other");
                    record(&mut first, Error::DispatchOverflow { limit });
                    continue;
                }
                if let Err(err) = self.run_effect(effect) {
                    record(&mut first, err);
                }
                continue;
            }

            let runners: IndexSet<NodeId> = {
                let mut graph = self.graph.borrow_mut();
                if graph.dispatch.is_empty() {
                    IndexSet::new()
                } else {
                    graph.dispatch.runners.drain(..).collect()
                }
            };
            if !runners.is_empty() {
                for node in runners {
                    self.call_runner(node);
                }
                continue;
            }

            let changes = self.graph.borrow_mut().take_activations();
            if !changes.is_empty() {
                let calls = self.activation.borrow_mut().apply(changes, Instant::now());
                for (handlers, active) in calls {
                    self.call_handlers(handlers, active);
                }
                continue;
            }

            if self.run_teardowns(Some(Instant::now())) > 0 {
                continue;
            }

            break;
        }

        if runs > 0 {
            tracing::debug!(runs, "flushed effects");
        }
        first.map_or(Ok(()), Err)
    }

    /// Drop everything still queued after an overflow.
    fn abandon_queue(&self) {
        let mut graph = self.graph.borrow_mut();
        let queued: Vec<NodeId> = graph.dispatch.effects.drain(..).collect();
        graph.dispatch.runners.clear();
        for effect in queued {
            if let Some(node) = graph.node_mut(effect) {
                node.flags.remove(Flags::NOTIFIED);
            }
        }
    }

    fn call_runner(&self, node: NodeId) {
        let runner = self
            .graph
            .borrow()
            .node(node)
            .and_then(|entry| entry.runner.clone());
        let (Some(runner), Some(rt)) = (runner, self.handle()) else {
            return;
        };
        tracing::trace!(node = ?node, "handing trigger to runner");
        runner(Trigger::new(rt, node));
    }

    /// A `Runtime` handle for values that outlive this borrow.
    fn handle(&self) -> Option<Runtime> {
        self.this.upgrade().map(|inner| Runtime { inner })
    }

    /// Link the current observer to `dep`.
    pub fn track(&self, dep: NodeId) {
        if let Some(observer) = self.observer.get() {
            self.graph.borrow_mut().link(dep, observer);
        }
    }

    /// Mark a written signal and everything downstream of it.
    pub fn notify(&self, node: NodeId) -> Result<()> {
        self.dispatch(|| {
            let mut graph = self.graph.borrow_mut();
            graph.mark_written(node);
            graph.propagate(node, false);
            Ok(())
        })
    }

    /// Bring a computed value up to date.
    ///
    /// Cheap when nothing upstream was written since the last check; checks
    /// dependency versions when something was; re-derives only when one of
    /// them actually changed.
    pub fn refresh(&self, node: NodeId) -> Result<()> {
        let (kind, flags, verified_at, epoch) = {
            let graph = self.graph.borrow();
            let entry = graph.node(node).ok_or(Error::Disposed(node))?;
            (entry.kind, entry.flags, entry.verified_at, graph.epoch())
        };
        if kind != NodeKind::Computed {
            return Ok(());
        }
        if flags.contains(Flags::RECURSED) {
            return Err(Error::Cycle(node));
        }

        if flags.contains(Flags::HAS_VALUE) && !flags.contains(Flags::DIRTY) {
            let current = !flags.contains(Flags::PENDING) || verified_at == epoch;
            if current || !self.deps_changed(node) {
                self.mark_verified(node);
                return Ok(());
            }
        }

        self.recompute(node)
    }

    fn mark_verified(&self, node: NodeId) {
        let mut graph = self.graph.borrow_mut();
        let epoch = graph.epoch();
        if let Some(entry) = graph.node_mut(node) {
            entry.flags.remove(Flags::PENDING);
            entry.verified_at = epoch;
        }
    }

    /// Whether any dependency of `node` changed since `node` last read it.
    ///
    /// Computed dependencies are refreshed first. One that fails to refresh
    /// counts as changed, so the reader re-runs and sees the error itself.
    fn deps_changed(&self, node: NodeId) -> bool {
        let mut cursor = self.graph.borrow().node(node).and_then(|entry| entry.deps);
        while let Some(link) = cursor {
            let dep = match self.graph.borrow().link_at(link) {
                Some(link) => link.dep,
                None => return true,
            };
            if self.refresh(dep).is_err() {
                return true;
            }

            let graph = self.graph.borrow();
            let Some(link) = graph.link_at(link) else {
                return true;
            };
            let version = graph.node(dep).map(|entry| entry.version);
            if version != Some(link.observed) {
                return true;
            }
            cursor = link.next_dep;
        }
        false
    }

    /// Re-run a computed value's derivation inside a tracking context.
    fn recompute(&self, node: NodeId) -> Result<()> {
        let upgraded = match self.graph.borrow().node(node).map(|entry| &entry.payload) {
            Some(Payload::Computed(derive)) => derive.upgrade(),
            _ => None,
        };
        let derive = upgraded.ok_or(Error::Disposed(node))?;

        let result = {
            let _cx = ReactiveContext::track(self, node, false);
            derive.derive()
        };
        drop(derive);

        let mut graph = self.graph.borrow_mut();
        let epoch = graph.epoch();
        let entry = graph.node_mut(node).ok_or(Error::Disposed(node))?;
        match result {
            Ok(changed) => {
                if changed {
                    entry.version = entry.version.wrapping_add(1);
                }
                entry.flags.insert(Flags::HAS_VALUE);
                entry.flags.remove(Flags::DIRTY | Flags::PENDING);
                entry.verified_at = epoch;
                tracing::trace!(node = ?node, changed, "recomputed");
                Ok(())
            }
            Err(err) => {
                entry.flags.insert(Flags::DIRTY);
                Err(Error::derivation(node, err))
            }
        }
    }

    /// Whether a queued or triggered effect has to run.
    pub fn should_run(&self, effect: NodeId) -> bool {
        let flags = match self.graph.borrow().node(effect) {
            Some(entry) => entry.flags,
            None => return false,
        };
        if flags.intersects(Flags::DISPOSED | Flags::HELD) || !flags.is_stale() {
            return false;
        }
        if flags.contains(Flags::DIRTY) {
            return true;
        }
        if self.deps_changed(effect) {
            return true;
        }
        if let Some(entry) = self.graph.borrow_mut().node_mut(effect) {
            entry.flags.remove(Flags::PENDING);
        }
        false
    }

    /// Run an effect: dispose what its previous run created, run its
    /// cleanups, then run its body inside a tracking context.
    pub fn run_effect(&self, effect: NodeId) -> Result<()> {
        let (job, children, cleanups) = {
            let mut graph = self.graph.borrow_mut();
            let Some(entry) = graph.node_mut(effect) else {
                return Ok(());
            };
            if entry.is_disposed() || entry.flags.contains(Flags::RECURSED) {
                return Ok(());
            }
            let Payload::Effect(job) = &entry.payload else {
                return Ok(());
            };
            let job = job.clone();
            let children: Vec<NodeId> = entry.children.iter().copied().collect();
            let cleanups = std::mem::take(&mut entry.cleanups);
            (job, children, cleanups)
        };

        for child in children {
            self.dispose_node(child);
        }
        for cleanup in cleanups {
            cleanup.run();
        }

        let result = {
            let _cx = ReactiveContext::track(self, effect, true);
            job.call()
        };
        tracing::debug!(node = ?effect, runs = job.runs(), "effect ran");

        match result {
            Ok(Some(cleanup)) => {
                let orphan = {
                    let mut graph = self.graph.borrow_mut();
                    match graph.node_mut(effect) {
                        Some(entry) if !entry.is_disposed() => {
                            entry.cleanups.push(cleanup);
                            None
                        }
                        _ => Some(cleanup),
                    }
                };
                // Disposed during its own run: nothing will call it later.
                if let Some(cleanup) = orphan {
                    cleanup.run();
                }
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(err) => Err(Error::effect(effect, err)),
        }
    }

    /// Dispose an effect or scope: its children in creation order first,
    /// then its own links, then its cleanups in registration order.
    pub fn dispose_node(&self, node: NodeId) {
        let children: Vec<NodeId> = {
            let mut graph = self.graph.borrow_mut();
            let Some(entry) = graph.node_mut(node) else {
                return;
            };
            if entry.is_disposed() {
                return;
            }
            entry.flags.insert(Flags::DISPOSED);
            entry.children.iter().copied().collect()
        };

        for child in children {
            self.dispose_node(child);
        }

        let removed = self.graph.borrow_mut().remove(node);
        if let Some(mut entry) = removed {
            for cleanup in std::mem::take(&mut entry.cleanups) {
                cleanup.run();
            }
            drop(entry);
        }
        tracing::debug!(node = ?node, "disposed");
    }

    /// Take a released signal or computed value out of the graph.
    pub fn release(&self, node: NodeId) {
        // Released while the graph is borrowed, which only happens when a
        // panic unwinds through engine code.
        if self.graph.try_borrow_mut().is_err() {
            tracing::warn!(node = ?node, "graph busy; node leaked");
            return;
        }

        let result = self.dispatch(|| {
            let removed = self.graph.borrow_mut().remove(node);
            drop(removed);
            let handlers = self.activation.borrow_mut().forget(node);
            self.call_handlers(handlers, false);
            Ok(())
        });
        if let Err(err) = result {
            tracing::error!(node = ?node, error = %err, "effect failed while releasing a node");
        }
    }

    fn remove_handler(&self, node: NodeId, key: u64) {
        let (unmount, empty) = self.activation.borrow_mut().unregister(node, key);
        if empty {
            if let Some(entry) = self.graph.borrow_mut().node_mut(node) {
                entry.flags.remove(Flags::OBSERVED);
            }
        }
        if let Some(handler) = unmount {
            self.call_handlers(vec![handler], false);
        }
    }

    /// Run teardowns due by `until` (all of them for `None`).
    fn run_teardowns(&self, until: Option<Instant>) -> usize {
        let due = self.activation.borrow_mut().take_due(until);
        let count = due.len();
        for (node, handlers) in due {
            tracing::debug!(node = ?node, "torn down");
            self.call_handlers(handlers, false);
        }
        count
    }

    fn call_handlers(&self, handlers: Vec<Handler>, active: bool) {
        for handler in handlers {
            match handler.try_borrow_mut() {
                Ok(mut handler) => (&mut *handler)(active),
                Err(_) => tracing::warn!(active, "activation handler re-entered; skipped"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn batch_runs_effects_once() {
        let rt = Runtime::new();
        let a = rt.signal(1);
        let b = rt.signal(2);
        let seen = Rc::new(RefCell::new(Vec::new()));

        let _effect = rt
            .effect({
                let (a, b, seen) = (a.clone(), b.clone(), seen.clone());
                move || seen.borrow_mut().push(a.get() + b.get())
            })
            .unwrap();

        rt.batch(|| {
            a.set(10).unwrap();
            b.set(20).unwrap();
        })
        .unwrap();

        assert_eq!(*seen.borrow(), vec![3, 30]);
    }

    #[test]
    fn untrack_does_not_link() {
        let rt = Runtime::new();
        let a = rt.signal(1);
        let effect = rt
            .effect({
                let (rt, a) = (rt.clone(), a.clone());
                move || {
                    rt.untrack(|| a.get());
                }
            })
            .unwrap();

        assert_eq!(rt.dependency_count(effect.id()), 0);
        assert_eq!(a.subscriber_count(), 0);
    }

    #[test]
    fn on_cleanup_needs_an_owner() {
        let rt = Runtime::new();
        assert!(!rt.on_cleanup(|| {}));

        let ran = Rc::new(Cell::new(0));
        let (scope, registered) = rt.scope({
            let (rt, ran) = (rt.clone(), ran.clone());
            move || rt.on_cleanup(move || ran.set(ran.get() + 1))
        });
        assert!(registered);
        scope.dispose();
        assert_eq!(ran.get(), 1);
    }

    #[test]
    fn should_run_only_for_stale_effects() {
        let rt = Runtime::new();
        let a = rt.signal(1);
        let effect = rt
            .effect({
                let a = a.clone();
                move || {
                    a.get();
                }
            })
            .unwrap();
        let inner = rt.inner();
        assert!(!inner.should_run(effect.id()));

        // Pending with unchanged dependencies settles without running.
        inner
            .graph
            .borrow_mut()
            .node_mut(effect.id())
            .unwrap()
            .flags
            .insert(Flags::PENDING);
        assert!(!inner.should_run(effect.id()));
        assert!(!inner.graph.borrow().node(effect.id()).unwrap().flags.is_stale());

        inner
            .graph
            .borrow_mut()
            .node_mut(effect.id())
            .unwrap()
            .flags
            .insert(Flags::DIRTY);
        assert!(inner.should_run(effect.id()));
    }

    #[test]
    fn epoch_advances_only_on_change() {
        let rt = Runtime::new();
        let a = rt.signal(1);
        assert_eq!(rt.epoch(), 0);
        a.set(1).unwrap();
        assert_eq!(rt.epoch(), 0);
        a.set(2).unwrap();
        assert_eq!(rt.epoch(), 1);
    }

    #[test]
    fn runaway_effects_overflow() {
        let rt = Runtime::with_config(RuntimeConfig::default().with_max_effect_runs(5));
        let a = rt.signal(0);
        let err = rt
            .effect({
                let a = a.clone();
                move || -> Result<()> {
                    let value = a.get();
                    a.set(value + 1)
                }
            })
            .unwrap_err();
        assert!(matches!(err, Error::DispatchOverflow { limit: 5 }));
        // The first run plus the five the flush allowed.
        assert_eq!(a.get_untracked(), 6);

        // The runtime stays usable.
        let b = rt.signal(0);
        b.set(1).unwrap();
    }

    #[test]
    fn dispose_all_releases_every_root() {
        let rt = Runtime::new();
        let a = rt.signal(0);
        let first = rt
            .effect({
                let a = a.clone();
                move || {
                    a.get();
                }
            })
            .unwrap();
        let (scope, _) = rt.scope(|| ());

        rt.dispose_all();
        assert!(first.is_disposed());
        assert!(scope.is_disposed());
        assert_eq!(a.subscriber_count(), 0);
    }

    #[test]
    fn debug_shows_graph_size() {
        let rt = Runtime::new();
        let _a = rt.signal(0);
        let text = format!("{rt:?}");
        assert!(text.contains("nodes: 1"));
    }
}
