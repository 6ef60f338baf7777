//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately to establish
//!    initial dependencies.
//!
//! 2. When any dependency is written, the effect is queued. Before it runs,
//!    its dependencies are revalidated: if none of them actually changed
//!    value, it stays idle.
//!
//! 3. Each run re-tracks dependencies, reusing the links of the previous run.
//!
//! # Differences from Computed
//!
//! - Computed values return a value; effects do not.
//! - Computed values are lazy (compute on access); effects are eager (run
//!   when deps change).
//! - Effects own what they create: effects and scopes created during a run
//!   are disposed before the next run.
//!
//! # Cleanup
//!
//! Effects can return a [`Cleanup`]. It runs before the effect re-runs and
//! when the effect is disposed, exactly once per run.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use super::runtime::Runtime;
use super::trigger::Runner;
use crate::error::{BoxError, Result};
use crate::graph::{Flags, Node, NodeId, NodeKind, Payload};

/// A function run before an effect's next run or on its disposal.
pub struct Cleanup(Box<dyn FnOnce()>);

impl Cleanup {
    pub fn new(f: impl FnOnce() + 'static) -> Self {
        Self(Box::new(f))
    }

    pub(crate) fn run(self) {
        (self.0)()
    }
}

impl fmt::Debug for Cleanup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Cleanup")
    }
}

/// What an effect body may return.
///
/// Implemented for `()`, [`Cleanup`], `Option<Cleanup>` and `Result`s of
/// those, so bodies can use `?`.
pub trait EffectOutput {
    fn into_cleanup(self) -> std::result::Result<Option<Cleanup>, BoxError>;
}

impl EffectOutput for () {
    fn into_cleanup(self) -> std::result::Result<Option<Cleanup>, BoxError> {
        Ok(None)
    }
}

impl EffectOutput for Cleanup {
    fn into_cleanup(self) -> std::result::Result<Option<Cleanup>, BoxError> {
        Ok(Some(self))
    }
}

impl EffectOutput for Option<Cleanup> {
    fn into_cleanup(self) -> std::result::Result<Option<Cleanup>, BoxError> {
        Ok(self)
    }
}

impl<O, E> EffectOutput for std::result::Result<O, E>
where
    O: EffectOutput,
    E: Into<BoxError>,
{
    fn into_cleanup(self) -> std::result::Result<Option<Cleanup>, BoxError> {
        self.map_err(Into::into)?.into_cleanup()
    }
}

type Body = Box<dyn FnMut() -> std::result::Result<Option<Cleanup>, BoxError>>;

/// The body of an effect, held by its graph node.
pub(crate) struct EffectJob {
    body: RefCell<Body>,
    runs: Rc<Cell<usize>>,
}

impl EffectJob {
    pub fn call(&self) -> std::result::Result<Option<Cleanup>, BoxError> {
        let Ok(mut body) = self.body.try_borrow_mut() else {
            tracing::warn!("effect body re-entered; skipped");
            return Ok(None);
        };
        self.runs.set(self.runs.get() + 1);
        (&mut *body)()
    }

    pub fn runs(&self) -> usize {
        self.runs.get()
    }
}

/// How an effect is created.
#[derive(Clone, Default)]
pub struct EffectOptions {
    /// Do not run until [`Effect::start`] is called.
    pub lazy: bool,

    /// Decide when re-runs happen. The runner receives a [`Trigger`] each
    /// time a dependency is written and fires it when the effect should
    /// re-run. The first run is never deferred.
    ///
    /// [`Trigger`]: super::Trigger
    pub runner: Option<Runner>,
}

impl EffectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lazy(mut self) -> Self {
        self.lazy = true;
        self
    }

    pub fn runner(mut self, runner: impl Fn(super::Trigger) + 'static) -> Self {
        self.runner = Some(Rc::new(runner));
        self
    }
}

impl fmt::Debug for EffectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectOptions")
            .field("lazy", &self.lazy)
            .field("runner", &self.runner.is_some())
            .finish()
    }
}

/// Handle to an effect.
///
/// Dropping the handle does not stop the effect; it lives until it is
/// disposed directly, through its owner, or by [`Runtime::dispose_all`].
#[derive(Clone)]
pub struct Effect {
    rt: Runtime,
    id: NodeId,
    runs: Rc<Cell<usize>>,
}

impl Runtime {
    /// Create an effect and run it once.
    ///
    /// If that first run (or anything it triggers) fails, the effect is
    /// disposed and the error returned.
    ///
    /// # Example
    ///
    /// ```
    /// use std::cell::RefCell;
    /// use std::rc::Rc;
    /// use trellis_core::Runtime;
    ///
    /// let rt = Runtime::new();
    /// let name = rt.signal("world");
    /// let log = Rc::new(RefCell::new(Vec::new()));
    ///
    /// let effect = rt.effect({
    ///     let (name, log) = (name.clone(), log.clone());
    ///     move || log.borrow_mut().push(format!("hello {}", name.get()))
    /// })?;
    ///
    /// name.set("trellis")?;
    /// assert_eq!(*log.borrow(), ["hello world", "hello trellis"]);
    ///
    /// effect.dispose();
    /// name.set("again")?;
    /// assert_eq!(log.borrow().len(), 2);
    /// # Ok::<(), trellis_core::Error>(())
    /// ```
    pub fn effect<F, O>(&self, f: F) -> Result<Effect>
    where
        F: FnMut() -> O + 'static,
        O: EffectOutput,
    {
        self.effect_with(EffectOptions::default(), f)
    }

    /// Create an effect that does not run until [`Effect::start`] is called.
    pub fn lazy_effect<F, O>(&self, f: F) -> Effect
    where
        F: FnMut() -> O + 'static,
        O: EffectOutput,
    {
        let (effect, _) = self.create_effect(EffectOptions::new().lazy(), f);
        effect
    }

    /// Create an effect with explicit options.
    pub fn effect_with<F, O>(&self, options: EffectOptions, f: F) -> Result<Effect>
    where
        F: FnMut() -> O + 'static,
        O: EffectOutput,
    {
        let (effect, held) = self.create_effect(options, f);
        if held {
            return Ok(effect);
        }

        let inner = self.inner();
        match inner.dispatch(|| inner.run_effect(effect.id)) {
            Ok(()) => Ok(effect),
            Err(err) => {
                effect.dispose();
                Err(err)
            }
        }
    }

    fn create_effect<F, O>(&self, options: EffectOptions, mut f: F) -> (Effect, bool)
    where
        F: FnMut() -> O + 'static,
        O: EffectOutput,
    {
        let runs = Rc::new(Cell::new(0));
        let job = Rc::new(EffectJob {
            body: RefCell::new(Box::new(move || f().into_cleanup())),
            runs: runs.clone(),
        });

        let inner = self.inner();
        let owner = inner.owner.get();
        let mut graph = inner.graph.borrow_mut();
        let mut flags = Flags::empty();
        if options.lazy {
            flags.insert(Flags::LAZY);
        }
        if graph.is_deferred(owner) {
            flags.insert(Flags::DEFERRED);
        }
        let id = graph.insert(
            Node::new(NodeKind::Effect)
                .with_flags(flags)
                .with_owner(owner)
                .with_payload(Payload::Effect(job))
                .with_runner(options.runner),
        );
        drop(graph);

        tracing::debug!(node = ?id, lazy = options.lazy, "effect created");
        let effect = Effect {
            rt: self.clone(),
            id,
            runs,
        };
        (effect, flags.intersects(Flags::HELD))
    }
}

impl Effect {
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Dispose the effect: dispose what it created, unlink it, and run its
    /// cleanups. Calling this again does nothing.
    pub fn dispose(&self) {
        let inner = self.rt.inner();
        let result = inner.dispatch(|| {
            inner.dispose_node(self.id);
            Ok(())
        });
        if let Err(err) = result {
            tracing::error!(node = ?self.id, error = %err, "effect failed during disposal");
        }
    }

    /// Release a lazy effect: it runs now if it never ran or a dependency
    /// changed, and from then on like any other effect.
    ///
    /// Effects inside a deferred scope stay held until the scope starts.
    pub fn start(&self) -> Result<()> {
        let inner = self.rt.inner();
        inner.dispatch(|| {
            match inner.graph.borrow_mut().node_mut(self.id) {
                Some(node) => node.flags.remove(Flags::LAZY),
                None => return Ok(()),
            }
            if inner.should_run(self.id) {
                inner.run_effect(self.id)
            } else {
                Ok(())
            }
        })
    }

    /// Run the effect now, whether or not a dependency changed. A no-op on a
    /// disposed effect.
    pub fn run(&self) -> Result<()> {
        let inner = self.rt.inner();
        inner.dispatch(|| inner.run_effect(self.id))
    }

    /// How many times the body has run.
    pub fn run_count(&self) -> usize {
        self.runs.get()
    }

    pub fn is_disposed(&self) -> bool {
        self.rt
            .inner()
            .graph
            .borrow()
            .node(self.id)
            .map_or(true, |node| node.is_disposed())
    }

    /// Number of dependencies read by the last run.
    pub fn dependency_count(&self) -> usize {
        self.rt.dependency_count(self.id)
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.id)
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
