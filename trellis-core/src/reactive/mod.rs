//! Reactive Primitives
//!
//! This module implements the reactive system: signals, computed values,
//! effects and scopes, all living in a [`Runtime`].
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. When a signal's value is read
//! within a tracking context (such as a computed value or effect), the signal
//! is linked to that context. When the signal's value changes, everything
//! downstream is marked and the affected effects run.
//!
//! ## Computed Values
//!
//! A Computed is a derived value that caches its result. It re-evaluates only
//! when one of its dependencies actually changed, and only when read.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change. Effects are used to synchronize reactive state with
//! external systems.
//!
//! ## Scopes
//!
//! A scope owns the effects created inside it and disposes them together.
//!
//! ## Activation
//!
//! Signals and computed values can be told when something active starts and
//! stops depending on them, to run a backing resource only while it is used.
//!
//! # Implementation Notes
//!
//! The runtime keeps the current observer in a cell. When a node is read, the
//! observer (if any) is linked to it. This approach (sometimes called
//! "automatic dependency tracking" or "transparent reactivity") is used by
//! SolidJS, Vue 3, and Leptos.

mod activation;
mod computed;
mod context;
mod disposer;
mod effect;
mod runtime;
mod scope;
mod signal;
mod trigger;

pub use computed::Computed;
pub use disposer::Disposer;
pub use effect::{Cleanup, Effect, EffectOptions, EffectOutput};
pub use runtime::Runtime;
pub use scope::{DeferredScope, EffectScope};
pub use signal::Signal;
pub use trigger::{Runner, Trigger};

pub(crate) use computed::Derive;
pub(crate) use effect::EffectJob;
