//! Store-Backed Hooks and Lifecycle Hooks
//!
//! Reusable logic that runs once per render pass keeps its state in the
//! context's value store. Each `use_*` call claims the next store slot of the
//! pass, so the same call site gets the same slot on every pass as long as
//! calls happen in the same order.
//!
//! The free functions in this module work on the ambient context (the one
//! currently rendering, or entered with [`Context::enter`]). With no ambient
//! context they fail with [`ReactiveError::NoActiveContext`].
//!
//! # Lifecycle Ordering
//!
//! Hosts render parents before children, and run after-commit checkpoints
//! child first. So "before" hooks fire outer to inner and "after" hooks inner
//! to outer.

use std::cell::RefCell;
use std::fmt::{self, Debug};
use std::rc::{Rc, Weak};

use tracing::{trace, warn};

use crate::error::{ReactiveError, Result};

use super::context::{Context, ContextInner};
use super::effect::{Cleanup, EffectHandle};
use super::memo::Memo;
use super::signal::Signal;
use super::watcher::WatchOptions;

type Hook = Box<dyn FnMut()>;

/// A point in a context's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LifecycleStage {
    BeforeMount,
    Mounted,
    BeforeUpdate,
    Updated,
    Unmounted,
}

impl LifecycleStage {
    /// Whether hooks of this stage fire on every pass, not just once.
    fn repeats(self) -> bool {
        matches!(self, LifecycleStage::BeforeUpdate | LifecycleStage::Updated)
    }
}

/// Lifecycle callbacks of one context.
#[derive(Default)]
pub(crate) struct LifecycleHooks {
    before_mount: RefCell<Vec<Hook>>,
    mounted: RefCell<Vec<Hook>>,
    before_update: RefCell<Vec<Hook>>,
    updated: RefCell<Vec<Hook>>,
    unmounted: RefCell<Vec<Hook>>,
}

impl LifecycleHooks {
    fn list(&self, stage: LifecycleStage) -> &RefCell<Vec<Hook>> {
        match stage {
            LifecycleStage::BeforeMount => &self.before_mount,
            LifecycleStage::Mounted => &self.mounted,
            LifecycleStage::BeforeUpdate => &self.before_update,
            LifecycleStage::Updated => &self.updated,
            LifecycleStage::Unmounted => &self.unmounted,
        }
    }

    pub(crate) fn register(&self, stage: LifecycleStage, hook: Hook) {
        self.list(stage).borrow_mut().push(hook);
    }

    /// Run the hooks of `stage`. One-shot stages are emptied.
    pub(crate) fn run(&self, stage: LifecycleStage) {
        let list = self.list(stage);
        let mut hooks = std::mem::take(&mut *list.borrow_mut());
        for hook in hooks.iter_mut() {
            hook();
        }
        if stage.repeats() {
            let mut slot = list.borrow_mut();
            hooks.append(&mut slot);
            *slot = hooks;
        }
    }

    #[cfg(test)]
    fn len(&self, stage: LifecycleStage) -> usize {
        self.list(stage).borrow().len()
    }
}

/// A store-backed state cell that refuses writes while its context renders.
pub struct StateHandle<T> {
    signal: Signal<T>,
    context: Weak<ContextInner>,
}

impl<T> StateHandle<T>
where
    T: Clone + PartialEq + Debug + 'static,
{
    /// Get the current value, tracking the read.
    pub fn get(&self) -> T {
        self.signal.get()
    }

    /// Get the current value without tracking.
    pub fn get_untracked(&self) -> T {
        self.signal.get_untracked()
    }

    /// Replace the value.
    ///
    /// Fails while the owning context is rendering or running its
    /// before-update hooks.
    pub fn set(&self, value: T) -> Result<()> {
        self.check_writable()?;
        self.signal.set(value);
        Ok(())
    }

    /// Update the value using a function of the current one.
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> Result<()> {
        self.check_writable()?;
        self.signal.update(f);
        Ok(())
    }

    /// A readonly signal view of this state.
    pub fn signal(&self) -> Signal<T> {
        self.signal.readonly()
    }

    fn check_writable(&self) -> Result<()> {
        match self.context.upgrade() {
            Some(context) if context.is_restricted() => Err(ReactiveError::MutationDuringRestrictedPhase {
                context: context.id(),
            }),
            _ => Ok(()),
        }
    }
}

impl<T> Clone for StateHandle<T> {
    fn clone(&self) -> Self {
        Self {
            signal: self.signal.clone(),
            context: self.context.clone(),
        }
    }
}

impl<T: Debug> Debug for StateHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateHandle")
            .field("signal", &self.signal)
            .finish()
    }
}

impl Context {
    /// Claim the next store slot, creating its value on first use.
    fn slot<V>(&self, operation: &'static str, create: impl FnOnce() -> V) -> V
    where
        V: Clone + 'static,
    {
        let index = self.inner.next_slot();
        if let Some(existing) = self.get_value_at::<V>(index) {
            return existing;
        }

        let replacing = index < self.store_len();
        if !replacing {
            // Reserve the slot before `create` can claim others.
            self.add_to_store(());
        }
        let value = create();
        if replacing {
            warn!(
                context = %self.id(),
                index,
                operation,
                "store slot holds a value of another type; replacing it"
            );
        }
        self.set_store_value_at(index, value.clone());
        value
    }

    /// Store-backed state that rejects writes during render.
    pub fn use_state<T>(&self, init: impl FnOnce() -> T) -> StateHandle<T>
    where
        T: Clone + PartialEq + Debug + 'static,
    {
        let signal = self.slot("use_state", || Signal::new(init()));
        StateHandle {
            signal,
            context: Rc::downgrade(&self.inner),
        }
    }

    /// A store-backed signal.
    pub fn use_signal<T>(&self, init: impl FnOnce() -> T) -> Signal<T>
    where
        T: Clone + PartialEq + Debug + 'static,
    {
        self.slot("use_signal", || Signal::new(init()))
    }

    /// A store-backed memo. The getter of later passes is ignored.
    pub fn use_memo<T>(&self, getter: impl Fn() -> T + 'static) -> Memo<T>
    where
        T: Clone + PartialEq + 'static,
    {
        self.slot("use_memo", || self.memo(getter))
    }

    /// A store-backed effect. It is created, and first run, on the first
    /// pass only.
    pub fn use_effect(&self, f: impl FnMut(&mut Cleanup) + 'static) -> EffectHandle {
        self.slot("use_effect", || self.effect(f))
    }

    /// A store-backed watcher, created on the first pass only.
    pub fn use_watch<T, S, F>(&self, source: S, callback: F, options: WatchOptions) -> EffectHandle
    where
        T: Clone + PartialEq + 'static,
        S: Fn() -> T + 'static,
        F: FnMut(&T, Option<&T>, &mut Cleanup) + 'static,
    {
        self.slot("use_watch", || self.watch(source, callback, options))
    }

    fn register_hook(&self, stage: LifecycleStage, hook: impl FnMut() + 'static) {
        if !self.inner.accepts_hooks() {
            trace!(context = %self.id(), ?stage, "lifecycle hook registered after the first pass ignored");
            return;
        }
        self.inner.hooks().register(stage, Box::new(hook));
    }

    /// Run `f` after the first pass renders, before its commit.
    pub fn on_before_mount(&self, f: impl FnMut() + 'static) {
        self.register_hook(LifecycleStage::BeforeMount, f);
    }

    /// Run `f` once the first commit has completed.
    pub fn on_mounted(&self, f: impl FnMut() + 'static) {
        self.register_hook(LifecycleStage::Mounted, f);
    }

    /// Run `f` at the start of every later render pass.
    pub fn on_before_update(&self, f: impl FnMut() + 'static) {
        self.register_hook(LifecycleStage::BeforeUpdate, f);
    }

    /// Run `f` after every later commit.
    pub fn on_updated(&self, f: impl FnMut() + 'static) {
        self.register_hook(LifecycleStage::Updated, f);
    }

    /// Run `f` when the context unmounts.
    pub fn on_unmounted(&self, f: impl FnMut() + 'static) {
        self.register_hook(LifecycleStage::Unmounted, f);
    }
}

fn active(operation: &'static str) -> Result<Context> {
    Context::current().ok_or(ReactiveError::NoActiveContext { operation })
}

/// [`Context::use_state`] on the ambient context.
pub fn use_state<T>(init: impl FnOnce() -> T) -> Result<StateHandle<T>>
where
    T: Clone + PartialEq + Debug + 'static,
{
    Ok(active("use_state")?.use_state(init))
}

/// [`Context::use_signal`] on the ambient context.
pub fn use_signal<T>(init: impl FnOnce() -> T) -> Result<Signal<T>>
where
    T: Clone + PartialEq + Debug + 'static,
{
    Ok(active("use_signal")?.use_signal(init))
}

/// [`Context::use_memo`] on the ambient context.
pub fn use_memo<T>(getter: impl Fn() -> T + 'static) -> Result<Memo<T>>
where
    T: Clone + PartialEq + 'static,
{
    Ok(active("use_memo")?.use_memo(getter))
}

/// [`Context::use_effect`] on the ambient context.
pub fn use_effect(f: impl FnMut(&mut Cleanup) + 'static) -> Result<EffectHandle> {
    Ok(active("use_effect")?.use_effect(f))
}

/// [`Context::use_watch`] on the ambient context.
pub fn use_watch<T, S, F>(source: S, callback: F, options: WatchOptions) -> Result<EffectHandle>
where
    T: Clone + PartialEq + 'static,
    S: Fn() -> T + 'static,
    F: FnMut(&T, Option<&T>, &mut Cleanup) + 'static,
{
    Ok(active("use_watch")?.use_watch(source, callback, options))
}

/// [`Context::on_before_mount`] on the ambient context.
pub fn on_before_mount(f: impl FnMut() + 'static) -> Result<()> {
    active("on_before_mount")?.on_before_mount(f);
    Ok(())
}

/// [`Context::on_mounted`] on the ambient context.
pub fn on_mounted(f: impl FnMut() + 'static) -> Result<()> {
    active("on_mounted")?.on_mounted(f);
    Ok(())
}

/// [`Context::on_before_update`] on the ambient context.
pub fn on_before_update(f: impl FnMut() + 'static) -> Result<()> {
    active("on_before_update")?.on_before_update(f);
    Ok(())
}

/// [`Context::on_updated`] on the ambient context.
pub fn on_updated(f: impl FnMut() + 'static) -> Result<()> {
    active("on_updated")?.on_updated(f);
    Ok(())
}

/// [`Context::on_unmounted`] on the ambient context.
pub fn on_unmounted(f: impl FnMut() + 'static) -> Result<()> {
    active("on_unmounted")?.on_unmounted(f);
    Ok(())
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::CommitRegistry;
    use std::cell::Cell;

    #[test]
    fn hooks_outside_a_context_are_usage_errors() {
        let err = use_state(|| 0).unwrap_err();
        assert_eq!(err, ReactiveError::NoActiveContext { operation: "use_state" });
        assert!(on_mounted(|| {}).is_err());
    }

    #[test]
    fn same_call_order_returns_same_slots() {
        let ctx = Context::immediate();

        let first = ctx.render(|| {
            let a = use_signal(|| 1).unwrap();
            let b = use_signal(|| String::from("b")).unwrap();
            a.set(5);
            (a, b)
        });
        let second = ctx.render(|| {
            let a = use_signal(|| 100).unwrap();
            let b = use_signal(|| String::new()).unwrap();
            (a, b)
        });

        assert_eq!(second.0.get(), 5);
        assert_eq!(second.1.get(), "b");
        assert_eq!(first.0.id(), second.0.id());
        assert_eq!(ctx.store_len(), 2);
    }

    #[test]
    fn mismatched_slot_type_is_replaced() {
        let ctx = Context::immediate();
        ctx.render(|| use_signal(|| 1_u8).unwrap());
        let replaced = ctx.render(|| use_signal(|| String::from("new")).unwrap());
        assert_eq!(replaced.get(), "new");
        assert_eq!(ctx.store_len(), 1);
    }

    #[test]
    fn state_rejects_writes_while_rendering() {
        let ctx = Context::immediate();
        let state = ctx.render(|| {
            let state = use_state(|| 0).unwrap();
            let err = state.set(1).unwrap_err();
            assert_eq!(err, ReactiveError::MutationDuringRestrictedPhase { context: ctx.id() });
            state
        });

        state.set(2).unwrap();
        assert_eq!(state.get(), 2);
    }

    #[test]
    fn state_rejects_writes_in_before_update_hooks() {
        let ctx = Context::immediate();
        let outcome = Rc::new(RefCell::new(None));

        let o = outcome.clone();
        let state = ctx.render(|| {
            let state = use_state(|| 0).unwrap();
            let s = state.clone();
            on_before_update(move || *o.borrow_mut() = Some(s.set(9).is_err())).unwrap();
            state
        });
        ctx.render(|| ());

        assert_eq!(*outcome.borrow(), Some(true));
        assert_eq!(state.get(), 0);
    }

    #[test]
    fn effects_are_created_on_first_pass_only() {
        let ctx = Context::immediate();
        let runs = Rc::new(Cell::new(0));

        for _ in 0..3 {
            let r = runs.clone();
            ctx.render(|| use_effect(move |_| r.set(r.get() + 1)).unwrap());
        }
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn hooks_are_collected_from_the_first_pass_only() {
        let ctx = Context::immediate();
        let mounted = Rc::new(Cell::new(0));

        for _ in 0..2 {
            let m = mounted.clone();
            ctx.render(|| ctx.on_mounted(move || m.set(m.get() + 1)));
        }

        let mut registry = CommitRegistry::new();
        ctx.run_effects(&mut registry);
        registry.run_commit();
        assert!(ctx.is_mounted());
        assert_eq!(mounted.get(), 1);
    }

    #[test]
    fn repeating_stages_keep_their_hooks() {
        let hooks = LifecycleHooks::default();
        hooks.register(LifecycleStage::Updated, Box::new(|| {}));
        hooks.run(LifecycleStage::Updated);
        assert_eq!(hooks.len(LifecycleStage::Updated), 1);

        hooks.register(LifecycleStage::Mounted, Box::new(|| {}));
        hooks.run(LifecycleStage::Mounted);
        assert_eq!(hooks.len(LifecycleStage::Mounted), 0);
    }
}
