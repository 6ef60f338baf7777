//! Integration Tests for Reactive System
//!
//! These tests verify that signals, computed values, effects and the
//! activation tracker work together correctly.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use trellis_core::{Cleanup, Error, Result, Runtime, RuntimeConfig, Signal};

fn log<T>() -> Rc<RefCell<Vec<T>>> {
    Rc::new(RefCell::new(Vec::new()))
}

fn counter() -> Rc<Cell<usize>> {
    Rc::new(Cell::new(0))
}

fn bump(count: &Rc<Cell<usize>>) {
    count.set(count.get() + 1);
}

/// A read-only effect on `signal`, returned for later disposal.
fn watch(rt: &Runtime, signal: &Signal<i32>) -> trellis_core::Effect {
    let signal = signal.clone();
    rt.effect(move || {
        signal.get();
    })
    .unwrap()
}

/// `a = 1; b = a * 2; effect logs b` → [2]; same write → [2]; a = 5 → [2, 10].
#[test]
fn same_value_write_is_silent() {
    let rt = Runtime::new();
    let a = rt.signal(1);
    let b = rt.computed({
        let a = a.clone();
        move || a.get() * 2
    });
    let seen = log();
    let _effect = rt
        .effect({
            let (b, seen) = (b.clone(), seen.clone());
            move || -> Result<()> {
                seen.borrow_mut().push(b.get()?);
                Ok(())
            }
        })
        .unwrap();
    assert_eq!(*seen.borrow(), vec![2]);

    a.set(1).unwrap();
    assert_eq!(*seen.borrow(), vec![2]);

    a.set(5).unwrap();
    assert_eq!(*seen.borrow(), vec![2, 10]);
}

/// Diamond: `b` and `c` both read `a`, `d` reads both. Each write derives
/// `d` exactly once, never from a half-updated pair.
#[test]
fn diamond_is_glitch_free() {
    let rt = Runtime::new();
    let a = rt.signal(1);
    let b = rt.computed({
        let a = a.clone();
        move || a.get() + 1
    });
    let c = rt.computed({
        let a = a.clone();
        move || a.get() * 10
    });
    let d_runs = counter();
    let d = rt.try_computed({
        let (b, c, d_runs) = (b.clone(), c.clone(), d_runs.clone());
        move || -> Result<(i32, i32)> {
            bump(&d_runs);
            Ok((b.get()?, c.get()?))
        }
    });

    let seen = log();
    let _effect = rt
        .effect({
            let (d, seen) = (d.clone(), seen.clone());
            move || -> Result<()> {
                seen.borrow_mut().push(d.get()?);
                Ok(())
            }
        })
        .unwrap();
    assert_eq!(d_runs.get(), 1);

    for value in 2..=5 {
        a.set(value).unwrap();
        assert_eq!(d_runs.get(), value as usize);
    }

    // Every observed pair is consistent.
    for (b, c) in seen.borrow().iter() {
        assert_eq!((b - 1) * 10, *c);
    }
    assert_eq!(seen.borrow().len(), 5);
}

/// A write that leaves every dependency value unchanged does not re-derive.
#[test]
fn no_redundant_recompute() {
    let rt = Runtime::new();
    let a = rt.signal(12);
    let unrelated = rt.signal(0);
    let clamped_runs = counter();
    let clamped = rt.computed({
        let (a, clamped_runs) = (a.clone(), clamped_runs.clone());
        move || {
            bump(&clamped_runs);
            a.get().min(10)
        }
    });
    let label_runs = counter();
    let label = rt.try_computed({
        let (clamped, label_runs) = (clamped.clone(), label_runs.clone());
        move || -> Result<String> {
            bump(&label_runs);
            Ok(format!("value {}", clamped.get()?))
        }
    });
    let _effect = rt
        .effect({
            let label = label.clone();
            move || -> Result<()> {
                label.get()?;
                Ok(())
            }
        })
        .unwrap();

    unrelated.set(1).unwrap();
    assert_eq!((clamped_runs.get(), label_runs.get()), (1, 1));

    // Changes `a` but not `clamped`: only `clamped` re-derives.
    a.set(20).unwrap();
    a.set(30).unwrap();
    assert_eq!((clamped_runs.get(), label_runs.get()), (3, 1));
    assert_eq!(label.get().unwrap(), "value 10");
}

/// Branch not taken is unlinked; writes to it are ignored until read again.
#[test]
fn dependency_pruning() {
    let rt = Runtime::new();
    let flag = rt.signal(true);
    let x = rt.signal(1);
    let y = rt.signal(2);
    let runs = counter();
    let pick = rt.computed({
        let (flag, x, y, runs) = (flag.clone(), x.clone(), y.clone(), runs.clone());
        move || {
            bump(&runs);
            if flag.get() {
                x.get()
            } else {
                y.get()
            }
        }
    });
    let _effect = rt
        .effect({
            let pick = pick.clone();
            move || -> Result<()> {
                pick.get()?;
                Ok(())
            }
        })
        .unwrap();
    assert_eq!(y.subscriber_count(), 0);
    assert_eq!(x.subscriber_count(), 1);

    flag.set(false).unwrap();
    assert_eq!(runs.get(), 2);
    assert_eq!(x.subscriber_count(), 0);
    assert_eq!(y.subscriber_count(), 1);
    assert!(!x.is_active());

    x.set(100).unwrap();
    assert_eq!(runs.get(), 2);

    y.set(5).unwrap();
    assert_eq!(runs.get(), 3);
    assert_eq!(pick.get().unwrap(), 5);
}

/// Two effects attached in one batch mount once; removing both unmounts once,
/// after the debounce window.
#[tokio::test(start_paused = true)]
async fn activation_exactly_once_with_debounce() {
    let rt = Runtime::with_config(
        RuntimeConfig::default().with_teardown_delay(Duration::from_millis(200)),
    );
    let source = rt.signal(0);
    let transitions = log();
    let _handler = source.on_activate({
        let transitions = transitions.clone();
        move |active| transitions.borrow_mut().push(active)
    });

    let (first, second) = rt
        .batch(|| (watch(&rt, &source), watch(&rt, &source)))
        .unwrap();
    assert_eq!(*transitions.borrow(), vec![true]);

    first.dispose();
    second.dispose();
    second.dispose();
    assert_eq!(*transitions.borrow(), vec![true]);
    assert!(rt.next_teardown().is_some());

    tokio::time::advance(Duration::from_millis(199)).await;
    assert_eq!(rt.run_due_teardowns(tokio::time::Instant::now()).unwrap(), 0);

    rt.drive_teardowns().await.unwrap();
    assert_eq!(*transitions.borrow(), vec![true, false]);
    assert!(rt.next_teardown().is_none());
}

/// Remounting inside the window cancels the teardown entirely.
#[tokio::test(start_paused = true)]
async fn remount_inside_window_cancels_teardown() {
    let rt = Runtime::with_config(
        RuntimeConfig::default().with_teardown_delay(Duration::from_millis(50)),
    );
    let source = rt.signal(0);
    let transitions = log();
    let _handler = source.on_activate({
        let transitions = transitions.clone();
        move |active| transitions.borrow_mut().push(active)
    });

    let effect = watch(&rt, &source);
    effect.dispose();
    tokio::time::advance(Duration::from_millis(20)).await;
    let again = watch(&rt, &source);
    assert!(rt.next_teardown().is_none());

    rt.drive_teardowns().await.unwrap();
    assert_eq!(*transitions.borrow(), vec![true]);

    again.dispose();
    rt.drive_teardowns().await.unwrap();
    assert_eq!(*transitions.borrow(), vec![true, false]);
}

/// Activation travels through computed values, and a zero delay tears down
/// at the end of the pass.
#[test]
fn activation_through_computed_chain() {
    let rt = Runtime::new();
    let source = rt.signal(2);
    let mounted = Rc::new(Cell::new(false));
    let _handler = source.on_activate({
        let mounted = mounted.clone();
        move |active| mounted.set(active)
    });
    let squared = rt.computed({
        let source = source.clone();
        move || source.get() * source.get()
    });

    assert_eq!(squared.get().unwrap(), 4);
    assert!(!mounted.get());

    let effect = rt
        .effect({
            let squared = squared.clone();
            move || -> Result<()> {
                squared.get()?;
                Ok(())
            }
        })
        .unwrap();
    assert!(mounted.get());
    assert!(squared.is_active());

    effect.dispose();
    assert!(!mounted.get());
    assert!(!squared.is_active());
}

/// A handler registered on a node that is already active is told at once,
/// and disposing it while mounted tells it `false`.
#[test]
fn late_handler_sees_current_state() {
    let rt = Runtime::new();
    let source = rt.signal(0);
    let _effect = watch(&rt, &source);

    let transitions = log();
    let handler = source.on_activate({
        let transitions = transitions.clone();
        move |active| transitions.borrow_mut().push(active)
    });
    assert_eq!(*transitions.borrow(), vec![true]);

    handler.dispose();
    handler.dispose();
    assert_eq!(*transitions.borrow(), vec![true, false]);
}

/// Cleanups run before each re-run and once on disposal, never twice.
#[test]
fn cleanup_ordering() {
    let rt = Runtime::new();
    let a = rt.signal(0);
    let events = log();
    let effect = rt
        .effect({
            let (a, events) = (a.clone(), events.clone());
            move || {
                let value = a.get();
                events.borrow_mut().push(format!("run {value}"));
                let events = events.clone();
                Cleanup::new(move || events.borrow_mut().push(format!("cleanup {value}")))
            }
        })
        .unwrap();

    a.set(1).unwrap();
    a.set(2).unwrap();
    effect.dispose();
    effect.dispose();
    a.set(3).unwrap();

    assert_eq!(
        *events.borrow(),
        ["run 0", "cleanup 0", "run 1", "cleanup 1", "run 2", "cleanup 2"]
    );
}

/// Disposing twice neither fails nor double-decrements activation counts.
#[test]
fn idempotent_disposal() {
    let rt = Runtime::new();
    let source = rt.signal(0);
    let transitions = log();
    let _handler = source.on_activate({
        let transitions = transitions.clone();
        move |active| transitions.borrow_mut().push(active)
    });

    let first = watch(&rt, &source);
    let second = watch(&rt, &source);
    first.dispose();
    first.dispose();
    first.dispose();
    assert!(source.is_active());
    assert_eq!(*transitions.borrow(), vec![true]);

    second.dispose();
    assert!(!source.is_active());
    assert_eq!(*transitions.borrow(), vec![true, false]);
}

/// Effects writing signals re-enter the queue; the outermost write drains it.
#[test]
fn reentrant_writes_settle_before_set_returns() {
    let rt = Runtime::new();
    let celsius = rt.signal(0);
    let fahrenheit = rt.signal(32);
    let _sync = rt
        .effect({
            let (celsius, fahrenheit) = (celsius.clone(), fahrenheit.clone());
            move || fahrenheit.set(celsius.get() * 9 / 5 + 32)
        })
        .unwrap();
    let seen = log();
    let _watch = rt
        .effect({
            let (fahrenheit, seen) = (fahrenheit.clone(), seen.clone());
            move || seen.borrow_mut().push(fahrenheit.get())
        })
        .unwrap();

    celsius.set(100).unwrap();
    assert_eq!(fahrenheit.get(), 212);
    assert_eq!(*seen.borrow(), vec![32, 212]);
}

/// Effects run in the order they subscribed.
#[test]
fn notification_order_follows_subscription_order() {
    let rt = Runtime::new();
    let a = rt.signal(0);
    let order = log();
    for name in ["first", "second", "third"] {
        let (a, order) = (a.clone(), order.clone());
        rt.effect(move || {
            if a.get() > 0 {
                order.borrow_mut().push(name);
            }
        })
        .unwrap();
    }

    a.set(1).unwrap();
    assert_eq!(*order.borrow(), ["first", "second", "third"]);
}

/// Disposing a queued sibling and creating a new effect mid-write: the
/// disposed one never runs, the rest keep their order, the new one runs once.
#[test]
fn listener_set_changes_during_dispatch() {
    let rt = Runtime::new();
    let a = rt.signal(0);
    let order = log();
    let doomed: Rc<RefCell<Option<trellis_core::Effect>>> = Rc::new(RefCell::new(None));

    let _first = rt
        .effect({
            let (rt, a, order, doomed) = (rt.clone(), a.clone(), order.clone(), doomed.clone());
            move || -> Result<()> {
                if a.get() == 0 {
                    return Ok(());
                }
                order.borrow_mut().push("first");
                let second = doomed.borrow_mut().take();
                if let Some(second) = second {
                    second.dispose();
                }
                let (a, order) = (a.clone(), order.clone());
                rt.effect(move || {
                    a.get();
                    order.borrow_mut().push("created");
                })?;
                Ok(())
            }
        })
        .unwrap();
    let second = rt
        .effect({
            let (a, order) = (a.clone(), order.clone());
            move || {
                if a.get() > 0 {
                    order.borrow_mut().push("second");
                }
            }
        })
        .unwrap();
    *doomed.borrow_mut() = Some(second.clone());
    let _third = rt
        .effect({
            let (a, order) = (a.clone(), order.clone());
            move || {
                if a.get() > 0 {
                    order.borrow_mut().push("third");
                }
            }
        })
        .unwrap();

    a.set(1).unwrap();
    assert_eq!(*order.borrow(), ["first", "created", "third"]);
    assert!(second.is_disposed());
    assert_eq!(second.run_count(), 1);
}

/// A failing effect does not stop its siblings; the first error is returned.
#[test]
fn failing_effect_does_not_starve_siblings() {
    let rt = Runtime::new();
    let a = rt.signal(0);
    let ran = log();
    for name in ["before", "failing", "also failing", "after"] {
        let (a, ran) = (a.clone(), ran.clone());
        rt.effect(move || -> std::result::Result<(), String> {
            let value = a.get();
            if value > 0 {
                ran.borrow_mut().push(name);
                if name.contains("failing") {
                    return Err(format!("{name} failed"));
                }
            }
            Ok(())
        })
        .unwrap();
    }

    let err = a.set(1).unwrap_err();
    match err {
        Error::Effect { source, .. } => assert_eq!(source.to_string(), "failing failed"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(*ran.borrow(), ["before", "failing", "also failing", "after"]);
}

/// Derivation errors surface from the read that triggered the recompute.
#[test]
fn derivation_errors_reach_the_reader() {
    let rt = Runtime::new();
    let input = rt.signal("12".to_string());
    let parsed = rt.try_computed({
        let input = input.clone();
        move || input.get().parse::<i32>()
    });
    assert_eq!(parsed.get().unwrap(), 12);

    input.set("twelve".to_string()).unwrap();
    assert!(matches!(parsed.get(), Err(Error::Derivation { .. })));
    // Still dirty: the next read retries.
    assert!(matches!(parsed.get(), Err(Error::Derivation { .. })));

    input.set("13".to_string()).unwrap();
    assert_eq!(parsed.get().unwrap(), 13);
}

/// Steady-state re-evaluation reuses its links.
#[test]
fn stable_dependencies_are_relinked_not_reallocated() {
    let rt = Runtime::new();
    let signals: Vec<Signal<i32>> = (0..4).map(|i| rt.signal(i)).collect();
    let total = rt.computed({
        let signals = signals.clone();
        move || signals.iter().map(Signal::get).sum::<i32>()
    });
    let effect = rt
        .effect({
            let total = total.clone();
            move || -> Result<()> {
                total.get()?;
                Ok(())
            }
        })
        .unwrap();

    for round in 1..10 {
        signals[round % 4].update(|v| v + 1).unwrap();
        assert_eq!(total.dependency_count(), 4);
        assert_eq!(effect.dependency_count(), 1);
    }
    for signal in &signals {
        assert_eq!(signal.subscriber_count(), 1);
    }
}

/// Independent runtimes do not see each other.
#[test]
fn runtimes_are_isolated() {
    let first = Runtime::new();
    let second = Runtime::new();
    let a = first.signal(0);
    let b = second.signal(0);
    a.set(1).unwrap();
    assert_eq!(first.epoch(), 1);
    assert_eq!(second.epoch(), 0);
    assert_eq!(b.get(), 0);
}
