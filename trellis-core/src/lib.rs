//! Trellis Core
//!
//! This crate provides a fine-grained reactive dependency-tracking engine.
//! It implements:
//!
//! - Reactive primitives (signals, computed values, effects, scopes)
//! - Glitch-free push-pull propagation over a reusable link graph
//! - Activation tracking with debounced teardown, for resources that should
//!   only run while something consumes them
//!
//! # Architecture
//!
//! The crate is organized into two modules:
//!
//! - `graph`: node and link arenas, dependency tracking, propagation
//! - `reactive`: the runtime and the typed handles built on it
//!
//! # Example
//!
//! ```rust
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use trellis_core::Runtime;
//!
//! let rt = Runtime::new();
//!
//! // Create a signal
//! let count = rt.signal(1);
//!
//! // Create a derived value
//! let doubled = rt.computed({
//!     let count = count.clone();
//!     move || count.get() * 2
//! });
//!
//! // Create an effect
//! let log = Rc::new(RefCell::new(Vec::new()));
//! let _effect = rt.effect({
//!     let (doubled, log) = (doubled.clone(), log.clone());
//!     move || -> trellis_core::Result<()> {
//!         log.borrow_mut().push(doubled.get()?);
//!         Ok(())
//!     }
//! })?;
//!
//! // Writing an equal value notifies nobody
//! count.set(1)?;
//! assert_eq!(*log.borrow(), vec![2]);
//!
//! // Update the signal; the effect has run by the time `set` returns
//! count.set(5)?;
//! assert_eq!(*log.borrow(), vec![2, 10]);
//! # Ok::<(), trellis_core::Error>(())
//! ```

mod config;
mod error;
mod graph;
pub mod reactive;

pub use config::{RuntimeConfig, DEFAULT_MAX_EFFECT_RUNS};
pub use error::{BoxError, Error, Result};
pub use graph::{NodeId, NodeKind};
pub use reactive::{
    Cleanup, Computed, DeferredScope, Disposer, Effect, EffectOptions, EffectOutput, EffectScope,
    Runner, Runtime, Signal, Trigger,
};
