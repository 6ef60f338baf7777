//! Computed Implementation
//!
//! A Computed is a cached derived value that re-evaluates only when its
//! dependencies change.
//!
//! # How Computed Values Work
//!
//! 1. On first access, the computed runs its derivation and caches the result.
//!
//! 2. When accessed again with no write anywhere since, it returns the cache
//!    without looking at anything else.
//!
//! 3. When a dependency is written, the computed is marked pending.
//!
//! 4. On next access, it re-checks whether any dependency's value actually
//!    changed, refreshing computed dependencies first.
//!
//! 5. If one did, recompute. Otherwise, mark it verified and return the cache.
//!
//! A new result equal to the cached one (`PartialEq`) does not count as a
//! change, so readers further down do not recompute either.
//!
//! # Going Cold
//!
//! When the last subscriber of a computed goes away, it drops its own
//! dependency links and is recomputed on the next read. Nothing upstream
//! keeps it alive or notifies it in the meantime.

use std::cell::RefCell;
use std::fmt::{self, Debug};
use std::rc::{Rc, Weak};

use super::disposer::Disposer;
use super::runtime::Runtime;
use super::trigger::Trigger;
use crate::error::{BoxError, Error, Result};
use crate::graph::{Node, NodeId, NodeKind, Payload};

/// Type-erased re-evaluation, called by the runtime.
pub(crate) trait Derive {
    /// Run the derivation and store its result. Returns whether the stored
    /// value changed.
    fn derive(&self) -> std::result::Result<bool, BoxError>;
}

type Derivation<T> = Box<dyn Fn() -> std::result::Result<T, BoxError>>;

struct ComputedInner<T> {
    rt: Runtime,
    id: NodeId,
    value: RefCell<Option<T>>,
    derivation: Derivation<T>,
}

impl<T: PartialEq> Derive for ComputedInner<T> {
    fn derive(&self) -> std::result::Result<bool, BoxError> {
        let next = (self.derivation)()?;
        let mut value = self.value.borrow_mut();
        if value.as_ref() == Some(&next) {
            return Ok(false);
        }
        *value = Some(next);
        Ok(true)
    }
}

impl<T> Drop for ComputedInner<T> {
    fn drop(&mut self) {
        self.rt.inner().release(self.id);
    }
}

/// A cached derived value that recomputes only when dependencies change.
///
/// # Type Parameters
///
/// - `T`: The type of the computed value. Must be Clone + PartialEq.
///
/// The PartialEq bound is needed to detect when the computed value actually
/// changed (some computed values return the same value even if inputs
/// changed).
pub struct Computed<T> {
    inner: Rc<ComputedInner<T>>,
}

impl Runtime {
    /// Create a computed value. The derivation does not run until the first
    /// read.
    pub fn computed<T, F>(&self, f: F) -> Computed<T>
    where
        T: Clone + PartialEq + 'static,
        F: Fn() -> T + 'static,
    {
        self.try_computed(move || Ok::<T, BoxError>(f()))
    }

    /// Create a computed value whose derivation can fail.
    ///
    /// A failed derivation leaves the cached value at its last successful
    /// state, and the next read tries again.
    pub fn try_computed<T, E, F>(&self, f: F) -> Computed<T>
    where
        T: Clone + PartialEq + 'static,
        E: Into<BoxError>,
        F: Fn() -> std::result::Result<T, E> + 'static,
    {
        let id = self
            .inner()
            .graph
            .borrow_mut()
            .insert(Node::new(NodeKind::Computed));
        let inner = Rc::new(ComputedInner {
            rt: self.clone(),
            id,
            value: RefCell::new(None),
            derivation: Box::new(move || f().map_err(Into::into)),
        });

        let derive: Weak<dyn Derive> = Rc::downgrade(&inner) as Weak<dyn Derive>;
        if let Some(node) = self.inner().graph.borrow_mut().node_mut(id) {
            node.payload = Payload::Computed(derive);
        }
        Computed { inner }
    }
}

impl<T> Computed<T>
where
    T: Clone + PartialEq + 'static,
{
    /// Get the computed's node ID.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Get the current value, recomputing if necessary.
    ///
    /// This is the main entry point for reading a computed value. Inside a
    /// reactive context it also links the reader to this computed.
    pub fn get(&self) -> Result<T> {
        let rt = self.inner.rt.inner();
        let id = self.inner.id;
        rt.dispatch(|| {
            rt.refresh(id)?;
            rt.track(id);
            Ok(())
        })?;
        self.cached()
    }

    /// Get the current value without linking the reader to it.
    pub fn get_untracked(&self) -> Result<T> {
        let rt = self.inner.rt.inner();
        rt.dispatch(|| rt.refresh(self.inner.id))?;
        self.cached()
    }

    fn cached(&self) -> Result<T> {
        self.inner
            .value
            .borrow()
            .clone()
            .ok_or(Error::Disposed(self.inner.id))
    }

    /// Hand re-evaluation triggers to `runner` instead of releasing the
    /// effects below this computed right away.
    ///
    /// Effects reading this computed are marked but not run when an upstream
    /// write reaches it. They run once the runner fires its [`Trigger`]. Reads
    /// are unaffected and always see the current value.
    pub fn with_runner(self, runner: impl Fn(Trigger) + 'static) -> Self {
        if let Some(node) = self.inner.rt.inner().graph.borrow_mut().node_mut(self.inner.id) {
            node.runner = Some(Rc::new(runner));
        }
        self
    }

    /// Register an activation handler, see [`Signal::on_activate`].
    ///
    /// A computed is active while an effect depends on it.
    ///
    /// [`Signal::on_activate`]: super::Signal::on_activate
    pub fn on_activate(&self, handler: impl FnMut(bool) + 'static) -> Disposer {
        self.inner.rt.on_activate(self.inner.id, handler)
    }

    /// Get the number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.rt.subscriber_count(self.inner.id)
    }

    /// Get the number of dependencies read by the last derivation that is
    /// still linked.
    pub fn dependency_count(&self) -> usize {
        self.inner.rt.dependency_count(self.inner.id)
    }

    pub fn is_active(&self) -> bool {
        self.inner.rt.is_active(self.inner.id)
    }
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Computed<T>
where
    T: Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("id", &self.inner.id)
            .field("cached", &*self.inner.value.borrow())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn counted<T: 'static>(
        count: &Rc<Cell<usize>>,
        f: impl Fn() -> T + 'static,
    ) -> impl Fn() -> T + 'static {
        let count = count.clone();
        move || {
            count.set(count.get() + 1);
            f()
        }
    }

    #[test]
    fn computed_caches_value() {
        let rt = Runtime::new();
        let runs = Rc::new(Cell::new(0));
        let computed = rt.computed(counted(&runs, || 42));

        // Not computed yet
        assert_eq!(runs.get(), 0);

        assert_eq!(computed.get().unwrap(), 42);
        assert_eq!(computed.get().unwrap(), 42);
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn computed_recomputes_after_change() {
        let rt = Runtime::new();
        let a = rt.signal(1);
        let runs = Rc::new(Cell::new(0));
        let doubled = rt.computed(counted(&runs, {
            let a = a.clone();
            move || a.get() * 2
        }));

        assert_eq!(doubled.get().unwrap(), 2);
        a.set(3).unwrap();
        assert_eq!(doubled.get().unwrap(), 6);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn unchanged_result_does_not_propagate() {
        let rt = Runtime::new();
        let a = rt.signal(2);
        let parity_runs = Rc::new(Cell::new(0));
        let label_runs = Rc::new(Cell::new(0));
        let parity = rt.computed(counted(&parity_runs, {
            let a = a.clone();
            move || a.get() % 2
        }));
        let label = rt.computed(counted(&label_runs, {
            let parity = parity.clone();
            move || if matches!(parity.get(), Ok(0)) { "even" } else { "odd" }
        }));

        assert_eq!(label.get().unwrap(), "even");
        a.set(4).unwrap();
        assert_eq!(label.get().unwrap(), "even");

        assert_eq!(parity_runs.get(), 2);
        assert_eq!(label_runs.get(), 1);
    }

    #[test]
    fn unrelated_writes_do_not_recompute() {
        let rt = Runtime::new();
        let a = rt.signal(1);
        let other = rt.signal(0);
        let runs = Rc::new(Cell::new(0));
        let doubled = rt.computed(counted(&runs, {
            let a = a.clone();
            move || a.get() * 2
        }));

        doubled.get().unwrap();
        other.set(1).unwrap();
        doubled.get().unwrap();
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn failed_derivation_keeps_last_value_and_retries() {
        let rt = Runtime::new();
        let a = rt.signal(1);
        let computed = rt.try_computed({
            let a = a.clone();
            move || match a.get() {
                n if n < 0 => Err(format!("negative: {n}")),
                n => Ok(n * 10),
            }
        });

        assert_eq!(computed.get().unwrap(), 10);
        a.set(-1).unwrap();
        let err = computed.get().unwrap_err();
        assert!(matches!(err, Error::Derivation { node, .. } if node == computed.id()));
        assert!(err.to_string().contains("negative: -1"));
        assert_eq!(*computed.inner.value.borrow(), Some(10));

        a.set(2).unwrap();
        assert_eq!(computed.get().unwrap(), 20);
    }

    #[test]
    fn reading_itself_is_a_cycle() {
        let rt = Runtime::new();
        let slot: Rc<RefCell<Option<Computed<i32>>>> = Rc::new(RefCell::new(None));
        let computed = rt.try_computed({
            let slot = slot.clone();
            move || -> Result<i32> {
                let this = slot.borrow().clone();
                match this {
                    Some(this) => Ok(this.get()? + 1),
                    None => Ok(0),
                }
            }
        });
        *slot.borrow_mut() = Some(computed.clone());

        let err = computed.get().unwrap_err();
        assert!(matches!(err, Error::Cycle(node) if node == computed.id()));
        slot.borrow_mut().take();
    }

    #[test]
    fn losing_last_subscriber_goes_cold() {
        let rt = Runtime::new();
        let a = rt.signal(1);
        let doubled = rt.computed({
            let a = a.clone();
            move || a.get() * 2
        });
        let effect = rt
            .effect({
                let doubled = doubled.clone();
                move || -> Result<()> {
                    doubled.get()?;
                    Ok(())
                }
            })
            .unwrap();
        assert!(doubled.is_active());
        assert!(a.is_active());
        assert_eq!(doubled.dependency_count(), 1);

        effect.dispose();
        assert!(!doubled.is_active());
        assert_eq!(doubled.dependency_count(), 0);
        assert_eq!(a.subscriber_count(), 0);

        // Still readable; it simply recomputes.
        a.set(5).unwrap();
        assert_eq!(doubled.get().unwrap(), 10);
    }

    #[test]
    fn warmup_read_does_not_activate() {
        let rt = Runtime::new();
        let a = rt.signal(1);
        let mounted = Rc::new(Cell::new(false));
        let _handler = a.on_activate({
            let mounted = mounted.clone();
            move |active| mounted.set(active)
        });
        let doubled = rt.computed({
            let a = a.clone();
            move || a.get() * 2
        });

        assert_eq!(doubled.get().unwrap(), 2);
        assert!(!mounted.get());
        assert!(!a.is_active());
    }
}
