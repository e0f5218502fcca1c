//! Memo Implementation
//!
//! A Memo is a cached derived value that re-evaluates only when its
//! dependencies change, and only when somebody reads it.
//!
//! # How Memos Work
//!
//! 1. On first access, the memo runs its getter inside its own tracking frame
//!    and caches the result.
//!
//! 2. When a dependency changes, the owning context runs the memo unit, which
//!    only sets `should_compute` and tells the memo's readers that its value
//!    may have changed. Nothing is recomputed yet.
//!
//! 3. On next access, the memo recomputes. The value version is bumped only if
//!    the new value differs from the cached one.
//!
//! 4. A reader queued because of a memo first refreshes the memos it read
//!    and compares versions. If nothing changed it does not run.
//!
//! Step 4 is what lets `s % 2` collapse: moving `s` from 0 to 2 invalidates
//! the memo, but the reader sees the same version and stays idle.

use std::cell::{Cell, RefCell};
use std::fmt::{self, Debug};
use std::rc::{Rc, Weak};

use tracing::warn;

use crate::error::ReactiveError;
use crate::scheduler::FlushPhase;

use super::context::ContextInner;
use super::effect::{DebugHooks, EffectCore, EffectUnit, MemoProbe, RunReason};
use super::{frame, scope, tracking, EffectId, EffectKind, OpType, TargetId, TargetKind, TrackKey};

struct MemoInner<T> {
    core: EffectCore,
    target: TargetId,
    context: Weak<ContextInner>,
    getter: Box<dyn Fn() -> T>,
    value: RefCell<Option<T>>,
    should_compute: Cell<bool>,
    version: Cell<u64>,
}

impl<T> MemoInner<T>
where
    T: Clone + PartialEq + 'static,
{
    /// Recompute if invalidated and return the current value.
    fn compute(&self) -> T {
        if !self.should_compute.get() {
            if let Some(value) = self.value.borrow().as_ref() {
                return value.clone();
            }
        }

        let next = match self.context.upgrade() {
            Some(context) => context.run_tracked(&self.core, || (self.getter)()),
            None => (self.getter)(),
        };
        self.should_compute.set(false);
        self.core.mark_ran();

        let mut slot = self.value.borrow_mut();
        if slot.as_ref() != Some(&next) {
            self.version.set(self.version.get() + 1);
            *slot = Some(next.clone());
        }
        next
    }
}

impl<T> EffectUnit for MemoInner<T>
where
    T: Clone + PartialEq + 'static,
{
    fn core(&self) -> &EffectCore {
        &self.core
    }

    fn run(&self, _context: &Rc<ContextInner>, _reason: RunReason) {
        // Readers were already told on the previous invalidation and nobody
        // has recomputed since.
        if self.should_compute.replace(true) {
            return;
        }
        tracking::trigger_memo_readers(self.target);
    }

    fn stop(&self) {}
}

impl<T> MemoProbe for MemoInner<T>
where
    T: Clone + PartialEq + 'static,
{
    fn refresh(&self) -> u64 {
        self.compute();
        self.version.get()
    }
}

impl<T> Drop for MemoInner<T> {
    fn drop(&mut self) {
        tracking::forget_target(self.target);
    }
}

/// A cached derived value that recomputes lazily after invalidation.
///
/// # Example
///
/// ```rust
/// use trellis_core::reactive::{Context, Signal};
///
/// let ctx = Context::immediate();
/// let count = Signal::new(3);
///
/// let c = count.clone();
/// let doubled = ctx.memo(move || c.get() * 2);
/// assert_eq!(doubled.get(), 6);
///
/// count.set(5);
/// assert_eq!(doubled.get(), 10);
/// ```
pub struct Memo<T>
where
    T: Clone + PartialEq + 'static,
{
    inner: Rc<MemoInner<T>>,
}

impl<T> Memo<T>
where
    T: Clone + PartialEq + 'static,
{
    /// Get the current value, recomputing if necessary.
    ///
    /// Inside a running effect this also records the memo as a dependency.
    pub fn get(&self) -> T {
        let value = self.inner.compute();

        if let Some((context, effect)) = frame::current() {
            tracking::track_in(&context, self.inner.target, TrackKey::Value, OpType::Get, effect);
            if let Some(unit) = context.unit(effect) {
                let probe: Rc<dyn MemoProbe> = self.inner.clone();
                unit.core().observe_memo(probe, self.inner.version.get());
            }
        }

        value
    }

    /// Get the current value without recording a dependency.
    pub fn get_untracked(&self) -> T {
        self.inner.compute()
    }

    /// Memos are derived; writing to one is a warned no-op.
    pub fn set(&self, _value: T) {
        warn!(
            "{}",
            ReactiveError::ReadonlyViolation {
                target: self.inner.target
            }
        );
    }

    /// The memo's identity as an observed target.
    pub fn id(&self) -> TargetId {
        self.inner.target
    }

    /// The memo's effect id within its context.
    pub fn effect_id(&self) -> EffectId {
        self.inner.core.id
    }

    /// Whether the next read will recompute.
    pub fn is_stale(&self) -> bool {
        self.inner.should_compute.get()
    }

    /// How many times the getter has run.
    pub fn compute_count(&self) -> u64 {
        self.inner.core.run_count()
    }

    /// Incremented every time a recomputation produced a different value.
    pub fn version(&self) -> u64 {
        self.inner.version.get()
    }
}

impl<T> Clone for Memo<T>
where
    T: Clone + PartialEq + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Memo<T>
where
    T: Clone + PartialEq + Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memo")
            .field("target", &self.inner.target)
            .field("value", &*self.inner.value.borrow())
            .field("stale", &self.is_stale())
            .field("version", &self.version())
            .finish()
    }
}

/// Create a memo owned by `context`. Nothing is computed until first read.
pub(crate) fn create_memo<T>(
    context: &Rc<ContextInner>,
    getter: Box<dyn Fn() -> T>,
    hooks: DebugHooks,
) -> Memo<T>
where
    T: Clone + PartialEq + 'static,
{
    let id = context.next_effect_id();
    let inner = Rc::new(MemoInner {
        core: EffectCore::new(id, EffectKind::Memo, FlushPhase::Pre, hooks),
        target: TargetId::new(TargetKind::Value),
        context: Rc::downgrade(context),
        getter,
        value: RefCell::new(None),
        should_compute: Cell::new(true),
        version: Cell::new(0),
    });
    context.insert_unit(inner.clone());
    scope::register_effect(&super::EffectHandle::new(context, id));

    Memo { inner }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Context, Signal};

    #[test]
    fn memo_computes_on_first_access() {
        let ctx = Context::immediate();
        let memo = ctx.memo(|| 42);

        // Not computed yet
        assert!(memo.is_stale());
        assert_eq!(memo.compute_count(), 0);

        assert_eq!(memo.get(), 42);
        assert_eq!(memo.compute_count(), 1);
        assert!(!memo.is_stale());
    }

    #[test]
    fn memo_caches_value_when_clean() {
        let ctx = Context::immediate();
        let memo = ctx.memo(|| 42);

        memo.get();
        memo.get();
        memo.get();
        assert_eq!(memo.compute_count(), 1);
    }

    #[test]
    fn invalidation_does_not_recompute() {
        let ctx = Context::immediate();
        let signal = Signal::new(1);
        let s = signal.clone();
        let memo = ctx.memo(move || s.get() + 1);
        assert_eq!(memo.get(), 2);

        signal.set(5);
        assert!(memo.is_stale());
        assert_eq!(memo.compute_count(), 1);

        assert_eq!(memo.get(), 6);
        assert_eq!(memo.compute_count(), 2);
    }

    #[test]
    fn version_tracks_value_changes_only() {
        let ctx = Context::immediate();
        let signal = Signal::new(0);
        let s = signal.clone();
        let parity = ctx.memo(move || s.get() % 2);

        parity.get();
        let v = parity.version();

        signal.set(2);
        parity.get();
        assert_eq!(parity.version(), v);

        signal.set(3);
        parity.get();
        assert_eq!(parity.version(), v + 1);
    }

    #[test]
    fn memo_depends_on_memo() {
        let ctx = Context::immediate();
        let base = Signal::new(5);

        let b = base.clone();
        let doubled = ctx.memo(move || b.get() * 2);
        let d = doubled.clone();
        let plus_ten = ctx.memo(move || d.get() + 10);

        assert_eq!(plus_ten.get(), 20);

        base.set(10);
        assert!(doubled.is_stale());
        assert!(plus_ten.is_stale());
        assert_eq!(plus_ten.get(), 30);
    }

    #[test]
    fn writing_a_memo_is_ignored() {
        let ctx = Context::immediate();
        let memo = ctx.memo(|| 1);
        memo.set(9);
        assert_eq!(memo.get(), 1);
    }
}
