//! Effect Scopes
//!
//! An effect scope groups effect units and child scopes so they can be
//! stopped together.
//!
//! # How Scopes Work
//!
//! 1. While `scope.run(f)` executes, the scope is the active scope. Every
//!    effect, watcher or memo created inside `f` registers into it, and so
//!    does every scope created with [`EffectScope::new`].
//!
//! 2. `stop()` stops every owned effect, stops every child scope, runs every
//!    dispose callback once, and detaches the scope from its parent.
//!
//! 3. A stopped scope stays stopped. Running it again only logs a warning.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use tracing::warn;

use crate::error::ReactiveError;

use super::effect::EffectHandle;

thread_local! {
    static ACTIVE_SCOPES: RefCell<Vec<EffectScope>> = const { RefCell::new(Vec::new()) };
}

struct ScopeInner {
    id: u64,
    active: Cell<bool>,
    effects: RefCell<Vec<EffectHandle>>,
    children: RefCell<IndexMap<u64, EffectScope>>,
    disposers: RefCell<Vec<Box<dyn FnOnce()>>>,
    parent: RefCell<Weak<ScopeInner>>,
}

/// A container that owns effects and child scopes.
///
/// # Example
///
/// ```rust
/// use trellis_core::reactive::{Context, EffectScope, Signal};
///
/// let ctx = Context::immediate();
/// let count = Signal::new(0);
///
/// let scope = EffectScope::detached();
/// let c = count.clone();
/// let handle = scope.run(|| ctx.effect(move |_| { c.get(); })).unwrap();
///
/// scope.stop();
/// assert!(!handle.is_active());
/// ```
#[derive(Clone)]
pub struct EffectScope {
    inner: Rc<ScopeInner>,
}

impl EffectScope {
    /// Create a scope owned by the active scope, if there is one.
    pub fn new() -> Self {
        let scope = Self::detached();
        if let Some(parent) = current_scope() {
            parent.add_scope(&scope);
        }
        scope
    }

    /// Create a scope with no parent.
    pub fn detached() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(0);
        Self {
            inner: Rc::new(ScopeInner {
                id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
                active: Cell::new(true),
                effects: RefCell::new(Vec::new()),
                children: RefCell::new(IndexMap::new()),
                disposers: RefCell::new(Vec::new()),
                parent: RefCell::new(Weak::new()),
            }),
        }
    }

    /// Whether the scope has not been stopped.
    pub fn is_active(&self) -> bool {
        self.inner.active.get()
    }

    /// Run `f` with this scope active.
    ///
    /// Returns `None`, with a warning, if the scope has been stopped.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        if !self.is_active() {
            warn!("{}", ReactiveError::InactiveScope);
            return None;
        }
        let _active = ActiveScopeGuard::enter(self);
        Some(f())
    }

    /// Take ownership of an effect.
    pub fn add_effect(&self, effect: EffectHandle) {
        self.inner.effects.borrow_mut().push(effect);
    }

    /// Take ownership of a child scope, detaching it from any previous parent.
    pub fn add_scope(&self, child: &EffectScope) {
        child.detach();
        *child.inner.parent.borrow_mut() = Rc::downgrade(&self.inner);
        self.inner
            .children
            .borrow_mut()
            .insert(child.inner.id, child.clone());
    }

    /// Register a callback to run when the scope stops.
    pub fn on_dispose(&self, f: impl FnOnce() + 'static) {
        self.inner.disposers.borrow_mut().push(Box::new(f));
    }

    /// Stop everything the scope owns. Stopping twice is a no-op.
    pub fn stop(&self) {
        if !self.inner.active.replace(false) {
            return;
        }

        let effects = std::mem::take(&mut *self.inner.effects.borrow_mut());
        for effect in effects {
            effect.stop();
        }

        let children = std::mem::take(&mut *self.inner.children.borrow_mut());
        for child in children.into_values() {
            child.stop();
        }

        let disposers = std::mem::take(&mut *self.inner.disposers.borrow_mut());
        for dispose in disposers {
            dispose();
        }

        self.detach();
    }

    /// Number of live child scopes.
    pub fn child_count(&self) -> usize {
        self.inner.children.borrow().len()
    }

    /// Number of effects registered in this scope.
    pub fn effect_count(&self) -> usize {
        self.inner.effects.borrow().len()
    }

    fn detach(&self) {
        let parent = std::mem::take(&mut *self.inner.parent.borrow_mut());
        if let Some(parent) = parent.upgrade() {
            parent.children.borrow_mut().shift_remove(&self.inner.id);
        }
    }
}

impl Default for EffectScope {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EffectScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectScope")
            .field("id", &self.inner.id)
            .field("active", &self.is_active())
            .field("effects", &self.effect_count())
            .field("children", &self.child_count())
            .finish()
    }
}

/// Makes a scope active until dropped.
pub(crate) struct ActiveScopeGuard(());

impl ActiveScopeGuard {
    pub(crate) fn enter(scope: &EffectScope) -> Self {
        ACTIVE_SCOPES.with(|stack| stack.borrow_mut().push(scope.clone()));
        Self(())
    }
}

impl Drop for ActiveScopeGuard {
    fn drop(&mut self) {
        let _ = ACTIVE_SCOPES.try_with(|stack| stack.borrow_mut().pop());
    }
}

/// The innermost active scope.
pub fn current_scope() -> Option<EffectScope> {
    ACTIVE_SCOPES.with(|stack| stack.borrow().last().cloned())
}

/// Register `f` to run when the active scope stops.
///
/// Without an active scope this only logs a warning.
pub fn on_scope_dispose(f: impl FnOnce() + 'static) {
    match current_scope() {
        Some(scope) => scope.on_dispose(f),
        None => warn!("on_scope_dispose called with no active effect scope"),
    }
}

/// Register a newly created effect with the active scope.
pub(crate) fn register_effect(effect: &EffectHandle) {
    if let Some(scope) = current_scope().filter(EffectScope::is_active) {
        scope.add_effect(effect.clone());
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Context, Signal};

    #[test]
    fn run_activates_scope() {
        let scope = EffectScope::detached();
        assert!(current_scope().is_none());

        let inner_id = scope.run(|| current_scope().map(|s| s.inner.id)).unwrap();
        assert_eq!(inner_id, Some(scope.inner.id));
        assert!(current_scope().is_none());
    }

    #[test]
    fn stopped_scope_refuses_to_run() {
        let scope = EffectScope::detached();
        scope.stop();
        assert_eq!(scope.run(|| 1), None);
    }

    fn nest(
        depth: usize,
        ctx: &Context,
        signal: &Signal<i32>,
        disposed: &Rc<Cell<i32>>,
        handles: &mut Vec<EffectHandle>,
    ) {
        if depth == 0 {
            return;
        }
        let child = EffectScope::new();
        child.run(|| {
            let s = signal.clone();
            handles.push(ctx.effect(move |_| {
                s.get();
            }));
            let d = disposed.clone();
            on_scope_dispose(move || d.set(d.get() + 1));
            nest(depth - 1, ctx, signal, disposed, handles);
        });
    }

    #[test]
    fn stop_cascades_through_nested_scopes() {
        let ctx = Context::immediate();
        let signal = Signal::new(0);
        let disposed = Rc::new(Cell::new(0));
        let mut handles = Vec::new();

        let root = EffectScope::detached();
        root.run(|| nest(4, &ctx, &signal, &disposed, &mut handles));
        assert_eq!(root.child_count(), 1);
        assert_eq!(signal.subscriber_count(), 4);

        root.stop();
        root.stop();
        assert_eq!(disposed.get(), 4);
        assert!(handles.iter().all(|h| !h.is_active()));
        assert_eq!(signal.subscriber_count(), 0);
    }

    #[test]
    fn stopping_a_child_detaches_it() {
        let parent = EffectScope::detached();
        let child = parent.run(EffectScope::new).unwrap();
        assert_eq!(parent.child_count(), 1);

        child.stop();
        assert_eq!(parent.child_count(), 0);
        assert!(parent.is_active());
    }

    #[test]
    fn dispose_without_scope_is_harmless() {
        let ran = Rc::new(Cell::new(false));
        let r = ran.clone();
        on_scope_dispose(move || r.set(true));
        assert!(!ran.get());
    }
}
