//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive. It holds a value and
//! tracks which computations depend on it.
//!
//! # How Signals Work
//!
//! 1. When a signal is read within a reactive context (computed/effect), the
//!    signal is linked to that context.
//!
//! 2. When a signal is written with a value that differs from the current one,
//!    everything downstream is marked and the affected effects run before
//!    `set()` returns.
//!
//! 3. Writing an equal value does nothing at all: no epoch advance, no
//!    notification.
//!
//! # Memory Layout
//!
//! Each signal handle is one `Rc` to:
//! - The runtime handle
//! - The graph node ID (a generational key)
//! - The value, behind a `RefCell`
//!
//! Subscriber lists live in the runtime's graph, not in the signal.

use std::cell::RefCell;
use std::fmt::{self, Debug};
use std::rc::Rc;

use super::disposer::Disposer;
use super::runtime::Runtime;
use crate::error::Result;
use crate::graph::{Node, NodeId, NodeKind};

struct SignalInner<T> {
    rt: Runtime,
    id: NodeId,
    value: RefCell<T>,
}

impl<T> Drop for SignalInner<T> {
    fn drop(&mut self) {
        self.rt.inner().release(self.id);
    }
}

/// A reactive signal holding a value of type T.
///
/// # Type Parameters
///
/// - `T`: The type of value stored in the signal. Writes compare against the
///   current value with `PartialEq`.
///
/// # Example
///
/// ```
/// use trellis_core::Runtime;
///
/// let rt = Runtime::new();
/// let count = rt.signal(0);
///
/// // Read the value
/// assert_eq!(count.get(), 0);
///
/// // Update the value (notifies subscribers)
/// count.set(5)?;
/// count.update(|n| n + 1)?;
/// assert_eq!(count.get(), 6);
/// # Ok::<(), trellis_core::Error>(())
/// ```
pub struct Signal<T> {
    inner: Rc<SignalInner<T>>,
}

impl Runtime {
    /// Create a new signal with the given initial value.
    pub fn signal<T>(&self, value: T) -> Signal<T>
    where
        T: Clone + PartialEq + 'static,
    {
        let id = self
            .inner()
            .graph
            .borrow_mut()
            .insert(Node::new(NodeKind::Signal));
        Signal {
            inner: Rc::new(SignalInner {
                rt: self.clone(),
                id,
                value: RefCell::new(value),
            }),
        }
    }
}

impl<T> Signal<T>
where
    T: Clone + PartialEq + 'static,
{
    /// Get the signal's node ID.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Get the current value.
    ///
    /// If called within a reactive context, this also links the current
    /// computation to this signal.
    pub fn get(&self) -> T {
        self.inner.rt.inner().track(self.inner.id);
        self.inner.value.borrow().clone()
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T {
        self.inner.value.borrow().clone()
    }

    /// Borrow the current value, tracking the read.
    ///
    /// # Panics
    ///
    /// Panics if `f` writes this signal.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.inner.rt.inner().track(self.inner.id);
        f(&self.inner.value.borrow())
    }

    /// Set a new value and notify subscribers.
    ///
    /// Returns the first error raised by an effect this write ran.
    pub fn set(&self, value: T) -> Result<()> {
        {
            let mut current = self.inner.value.borrow_mut();
            if *current == value {
                return Ok(());
            }
            *current = value;
        }
        tracing::trace!(node = ?self.inner.id, "signal written");
        self.inner.rt.inner().notify(self.inner.id)
    }

    /// Update the value using a function.
    ///
    /// This is useful for updates that depend on the current value.
    pub fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&T) -> T,
    {
        let next = f(&self.inner.value.borrow());
        self.set(next)
    }

    /// Call `f` with the current value now and again after every change.
    ///
    /// The subscription is an effect owned by the current owner, if any.
    pub fn subscribe(&self, mut f: impl FnMut(&T) + 'static) -> Result<Disposer> {
        let signal = self.clone();
        let rt = self.inner.rt.clone();
        let effect = self.inner.rt.effect(move || {
            let value = signal.get();
            rt.untrack(|| f(&value));
        })?;
        Ok(Disposer::new(move || effect.dispose()))
    }

    /// Call `f` after every change, but not with the current value.
    pub fn listen(&self, mut f: impl FnMut(&T) + 'static) -> Result<Disposer> {
        let mut first = true;
        self.subscribe(move |value| {
            if first {
                first = false;
            } else {
                f(value);
            }
        })
    }

    /// Register an activation handler: called with `true` when something
    /// active starts depending on this signal, and with `false` once nothing
    /// has for the configured teardown delay.
    ///
    /// If the signal is already active the handler is called with `true`
    /// before this returns. Disposing the returned handle while the signal is
    /// mounted calls it with `false`.
    pub fn on_activate(&self, handler: impl FnMut(bool) + 'static) -> Disposer {
        self.inner.rt.on_activate(self.inner.id, handler)
    }

    /// Get the number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.rt.subscriber_count(self.inner.id)
    }

    /// Whether an effect depends on this signal, directly or through
    /// computed values.
    pub fn is_active(&self) -> bool {
        self.inner.rt.is_active(self.inner.id)
    }
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Signal<T>
where
    T: Clone + PartialEq + Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.inner.id)
            .field("value", &self.get_untracked())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
