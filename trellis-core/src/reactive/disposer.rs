//! Disposers
//!
//! A [`Disposer`] undoes a registration (a subscription, an activation
//! handler). Disposing is idempotent: the second call finds nothing to do.

use std::cell::Cell;
use std::fmt;

/// Handle that undoes a registration once.
pub struct Disposer {
    dispose: Cell<Option<Box<dyn FnOnce()>>>,
}

impl Disposer {
    pub(crate) fn new(f: impl FnOnce() + 'static) -> Self {
        Self {
            dispose: Cell::new(Some(Box::new(f))),
        }
    }

    /// A disposer with nothing left to undo.
    pub(crate) fn disposed() -> Self {
        Self {
            dispose: Cell::new(None),
        }
    }

    /// Undo the registration. Later calls do nothing.
    pub fn dispose(&self) {
        if let Some(dispose) = self.dispose.take() {
            dispose();
        }
    }

    pub fn is_disposed(&self) -> bool {
        // Cell<Option<Box<_>>> has no peek; take and put back.
        let current = self.dispose.take();
        let disposed = current.is_none();
        self.dispose.set(current);
        disposed
    }
}

impl fmt::Debug for Disposer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposer")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
