//! Signal Implementation
//!
//! A Signal is the fundamental observed value: a single cell that reports
//! reads to the tracking table and writes to the trigger path.
//!
//! # How Signals Work
//!
//! 1. When a signal is read while an effect runs, the read is recorded
//!    against that effect and its execution context.
//!
//! 2. When a signal is written with a different value, every dependent
//!    effect is handed to its context for scheduling.
//!
//! 3. Writing an equal value is a no-op: no trigger, no re-runs.
//!
//! Signals are not owned by any context. The same signal can be read by
//! effects in several contexts; each context is notified separately.

use std::cell::RefCell;
use std::fmt::{self, Debug};
use std::rc::Rc;

use tracing::warn;

use crate::error::ReactiveError;

use super::tracking::{self, TriggerValues};
use super::{OpType, TargetId, TargetKind, TrackKey};

struct SignalInner<T> {
    target: TargetId,
    value: RefCell<T>,
}

impl<T> Drop for SignalInner<T> {
    fn drop(&mut self) {
        tracking::forget_target(self.target);
    }
}

/// A reactive value cell.
///
/// Cloning a signal creates another handle to the same cell.
///
/// # Example
///
/// ```rust
/// use trellis_core::reactive::Signal;
///
/// let count = Signal::new(0);
/// count.set(5);
/// count.update(|v| v + 1);
/// assert_eq!(count.get(), 6);
/// ```
pub struct Signal<T> {
    inner: Rc<SignalInner<T>>,
    readonly: bool,
}

impl<T> Signal<T>
where
    T: Clone + PartialEq + Debug + 'static,
{
    /// Create a new signal with the given initial value.
    pub fn new(value: T) -> Self {
        Self {
            inner: Rc::new(SignalInner {
                target: TargetId::new(TargetKind::Value),
                value: RefCell::new(value),
            }),
            readonly: false,
        }
    }

    /// The signal's identity as an observed target.
    pub fn id(&self) -> TargetId {
        self.inner.target
    }

    /// Get the current value, tracking the read.
    pub fn get(&self) -> T {
        tracking::track(self.inner.target, TrackKey::Value, OpType::Get);
        self.inner.value.borrow().clone()
    }

    /// Call `f` with a snapshot of the current value, tracking the read.
    ///
    /// `f` may write to this signal.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.get())
    }

    /// Get the current value without tracking.
    pub fn get_untracked(&self) -> T {
        self.inner.value.borrow().clone()
    }

    /// Replace the value and notify dependents if it changed.
    pub fn set(&self, value: T) {
        if self.readonly {
            warn!(
                "{}",
                ReactiveError::ReadonlyViolation {
                    target: self.inner.target
                }
            );
            return;
        }

        let old = {
            let mut slot = self.inner.value.borrow_mut();
            if *slot == value {
                return;
            }
            std::mem::replace(&mut *slot, value.clone())
        };

        tracking::trigger(
            self.inner.target,
            TrackKey::Value,
            OpType::Set,
            TriggerValues::new(Some(&old), Some(&value)),
        );
    }

    /// Update the value using a function of the current one.
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        let current = self.get_untracked();
        self.set(f(&current));
    }

    /// A handle to the same cell that rejects writes.
    pub fn readonly(&self) -> Signal<T> {
        Self {
            inner: Rc::clone(&self.inner),
            readonly: true,
        }
    }

    /// Whether writes through this handle are rejected.
    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    /// Number of effects currently depending on this signal.
    pub fn subscriber_count(&self) -> usize {
        tracking::dependent_count(self.inner.target, &TrackKey::Value)
    }
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
            readonly: self.readonly,
        }
    }
}

impl<T: Debug> Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("target", &self.inner.target)
            .field("value", &*self.inner.value.borrow())
            .field("readonly", &self.readonly)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Context;
    use std::cell::Cell;

    #[test]
    fn signal_get_and_set() {
        let signal = Signal::new(0);
        assert_eq!(signal.get(), 0);

        signal.set(42);
        assert_eq!(signal.get(), 42);
    }

    #[test]
    fn signal_update() {
        let signal = Signal::new(10);
        signal.update(|v| v + 5);
        assert_eq!(signal.get(), 15);
    }

    #[test]
    fn closures_may_write_back() {
        let signal = Signal::new(1);
        signal.with(|v| signal.set(v + 1));
        assert_eq!(signal.get(), 2);

        signal.update(|v| {
            assert_eq!(signal.get_untracked(), *v);
            v * 10
        });
        assert_eq!(signal.get(), 20);
    }

    #[test]
    fn signal_clone_shares_state() {
        let signal1 = Signal::new(0);
        let signal2 = signal1.clone();

        signal1.set(42);
        assert_eq!(signal2.get(), 42);
        assert_eq!(signal1.id(), signal2.id());
    }

    #[test]
    fn equal_write_does_not_notify() {
        let ctx = Context::immediate();
        let signal = Signal::new(3);
        let runs = Rc::new(Cell::new(0));

        let (s, r) = (signal.clone(), runs.clone());
        ctx.effect(move |_| {
            s.get();
            r.set(r.get() + 1);
        });

        signal.set(3);
        assert_eq!(runs.get(), 1);
        signal.set(4);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn readonly_handle_rejects_writes() {
        let signal = Signal::new(1);
        let view = signal.readonly();

        view.set(2);
        assert_eq!(signal.get(), 1);
        assert!(view.is_readonly());

        signal.set(3);
        assert_eq!(view.get(), 3);
    }

    #[test]
    fn subscriber_count_follows_effects() {
        let ctx = Context::immediate();
        let signal = Signal::new(0);
        assert_eq!(signal.subscriber_count(), 0);

        let s = signal.clone();
        let handle = ctx.effect(move |_| {
            s.get();
        });
        assert_eq!(signal.subscriber_count(), 1);

        handle.stop();
        assert_eq!(signal.subscriber_count(), 0);
    }
}
