//! Execution Contexts
//!
//! An execution context isolates one instantiation of reactive logic. It owns
//! its effect units, a value store, the pending and disabled effect sets, and
//! the stack of currently running effects.
//!
//! # Strategies
//!
//! Every context runs the same drain algorithm; they differ only in when the
//! drain happens.
//!
//! - **Global**: a trigger drains the pending set before the mutation
//!   returns. There is one global context per thread, and
//!   [`Context::immediate`] creates standalone ones.
//! - **Local**: memos are invalidated synchronously, everything else is
//!   queued on a [`Scheduler`] under its flush phase and drained when the
//!   host reaches that checkpoint.
//!
//! # Draining
//!
//! A drain repeatedly takes the lowest pending id (memos first, then plain
//! effects, then watchers) and runs it. Effects queued while a drain is in
//! progress are merged into the pending set and picked up by the same loop,
//! so long dependency chains never recurse.

use std::any::Any;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::{Rc, Weak};

use serde_json::{Map, Value};
use tracing::{debug, trace, warn};

use crate::config::ReactiveConfig;
use crate::error::ReactiveError;
use crate::host::{CheckpointRegistry, HostCheckpoint};
use crate::scheduler::{FlushPhase, Job, JobId, Scheduler};

use super::collections::ObservedMap;
use super::effect::{self, Cleanup, DebugHooks, EffectCore, EffectHandle, EffectOptions, EffectUnit, RunReason};
use super::frame::FrameGuard;
use super::hooks::{LifecycleHooks, LifecycleStage};
use super::memo::{self, Memo};
use super::pending::PendingSet;
use super::scope::{ActiveScopeGuard, EffectScope};
use super::tracking::{self, TriggerOrigin};
use super::watcher::{self, WatchOptions};
use super::{ContextId, EffectId, EffectKind};

thread_local! {
    static GLOBAL: Context = Context::build(Strategy::Global, ReactiveConfig::default(), None);
    static ACTIVE: RefCell<Vec<Context>> = const { RefCell::new(Vec::new()) };
}

enum Strategy {
    Global,
    Local {
        scheduler: Scheduler,
        position: u64,
        jobs: [JobId; FlushPhase::COUNT],
    },
}

impl Strategy {
    fn local(scheduler: &Scheduler) -> Self {
        Strategy::Local {
            scheduler: scheduler.clone(),
            position: scheduler.register_context(),
            jobs: std::array::from_fn(|_| JobId::new()),
        }
    }
}

#[derive(Default)]
struct ContextState {
    pending: PendingSet,
    disabled: HashSet<EffectId>,
    running: Vec<EffectId>,
    draining: bool,
    draining_memos: bool,
    restricted: bool,
    mounted: bool,
    unmounted: bool,
    passes: u64,
    /// Last pass whose updated hooks have run.
    updated_pass: u64,
}

#[derive(Default)]
struct ValueStore {
    slots: Vec<Box<dyn Any>>,
    cursor: usize,
}

/// The unit that stands for the context's own render pass.
struct RenderUnit {
    core: EffectCore,
}

impl EffectUnit for RenderUnit {
    fn core(&self) -> &EffectCore {
        &self.core
    }

    // Triggers of the render unit turn into re-render requests instead.
    fn run(&self, _context: &Rc<ContextInner>, _reason: RunReason) {}

    fn stop(&self) {}
}

pub(crate) struct ContextInner {
    id: ContextId,
    strategy: Strategy,
    config: RefCell<ReactiveConfig>,
    parent: Option<Weak<ContextInner>>,
    children: RefCell<Vec<Weak<ContextInner>>>,
    units: RefCell<Vec<Rc<dyn EffectUnit>>>,
    state: RefCell<ContextState>,
    store: RefCell<ValueStore>,
    hooks: LifecycleHooks,
    scope: EffectScope,
    props: ObservedMap<Value>,
    render: Rc<RenderUnit>,
}

impl ContextInner {
    pub(crate) fn id(&self) -> ContextId {
        self.id
    }

    pub(crate) fn unit(&self, id: EffectId) -> Option<Rc<dyn EffectUnit>> {
        self.units.borrow().get(id.index()).cloned()
    }

    pub(crate) fn next_effect_id(&self) -> EffectId {
        EffectId::from_index(self.units.borrow().len())
    }

    pub(crate) fn insert_unit(&self, unit: Rc<dyn EffectUnit>) {
        let mut units = self.units.borrow_mut();
        debug_assert_eq!(unit.core().id.index(), units.len());
        units.push(unit);
    }

    /// The innermost effect currently running in this context.
    pub(crate) fn current_effect(&self) -> Option<EffectId> {
        self.state.borrow().running.last().copied()
    }

    fn is_running(&self, id: EffectId) -> bool {
        self.state.borrow().running.contains(&id)
    }

    pub(crate) fn is_disabled(&self, id: EffectId) -> bool {
        self.state.borrow().disabled.contains(&id)
    }

    pub(crate) fn is_restricted(&self) -> bool {
        self.state.borrow().restricted
    }

    pub(crate) fn is_mounted(&self) -> bool {
        self.state.borrow().mounted
    }

    /// Lifecycle hooks are only collected up to the first render pass.
    pub(crate) fn accepts_hooks(&self) -> bool {
        let state = self.state.borrow();
        !state.mounted && state.passes <= 1
    }

    pub(crate) fn hooks(&self) -> &LifecycleHooks {
        &self.hooks
    }

    /// Claim the next store slot of the current pass.
    pub(crate) fn next_slot(&self) -> usize {
        let mut store = self.store.borrow_mut();
        let index = store.cursor;
        store.cursor += 1;
        index
    }

    /// Run `f` as `core`'s body: previous dependencies are dropped and every
    /// read inside `f` is attributed to `core` in this context.
    pub(crate) fn run_tracked<R>(self: &Rc<Self>, core: &EffectCore, f: impl FnOnce() -> R) -> R {
        let previous = core.take_dependencies();
        tracking::untrack(self.id, core.id, &previous);

        let _running = RunGuard::enter(self, core.id);
        f()
    }

    /// Run `f` on behalf of effect `id` without tracking its reads. The
    /// effect still counts as running, so its own writes do not re-queue it.
    pub(crate) fn run_untracked<R>(self: &Rc<Self>, id: EffectId, f: impl FnOnce() -> R) -> R {
        let _running = RunGuard::paused(self, id);
        f()
    }

    /// Run one unit outside a drain, then settle work it left behind.
    pub(crate) fn run_unit(self: &Rc<Self>, id: EffectId, reason: RunReason) {
        self.execute(id, reason);
        self.settle();
    }

    fn execute(self: &Rc<Self>, id: EffectId, reason: RunReason) {
        if self.is_disabled(id) || self.is_running(id) {
            return;
        }
        let Some(unit) = self.unit(id) else {
            return;
        };
        trace!(context = %self.id, effect = %id, ?reason, "run");
        unit.run(self, reason);
    }

    /// Pick up ids that were busy when their drain passed them.
    fn settle(self: &Rc<Self>) {
        let leftover = {
            let state = self.state.borrow();
            !state.draining && state.running.is_empty() && !state.pending.is_empty()
        };
        if !leftover {
            return;
        }
        match &self.strategy {
            Strategy::Global => self.drain(None),
            Strategy::Local { .. } => {
                let phases: Vec<FlushPhase> = {
                    let state = self.state.borrow();
                    FlushPhase::ALL
                        .into_iter()
                        .filter(|phase| state.pending.has_phase(*phase))
                        .collect()
                };
                self.schedule(&phases, false);
            }
        }
    }

    /// Stop a unit: run its cleanup, drop its dependencies, disable it.
    pub(crate) fn stop_effect(&self, id: EffectId) {
        {
            let mut state = self.state.borrow_mut();
            if !state.disabled.insert(id) {
                return;
            }
            state.pending.remove(id);
        }
        if let Some(unit) = self.unit(id) {
            unit.stop();
            let deps = unit.core().take_dependencies();
            tracking::untrack(self.id, id, &deps);
        }
        trace!(context = %self.id, effect = %id, "stopped");
    }

    /// Merge triggered ids into the pending set and schedule them.
    pub(crate) fn enqueue(self: &Rc<Self>, ids: &[EffectId], force: bool, origin: TriggerOrigin) {
        let mut rerender = false;
        let mut render_maybe_stale = false;
        let mut memos = false;
        let mut phases = Vec::new();
        {
            let mut state = self.state.borrow_mut();
            if state.unmounted {
                return;
            }
            for &id in ids {
                if state.disabled.contains(&id) {
                    continue;
                }
                let Some(unit) = self.unit(id) else {
                    continue;
                };
                let core = unit.core();
                if core.is_root_render {
                    match origin {
                        TriggerOrigin::Memo => render_maybe_stale = true,
                        TriggerOrigin::Mutation => rerender = true,
                    }
                    continue;
                }

                let phase = match self.strategy {
                    Strategy::Global => FlushPhase::Pre,
                    Strategy::Local { .. } => core.flush,
                };
                state.pending.insert(
                    id,
                    core.kind,
                    phase,
                    force,
                    origin == TriggerOrigin::Mutation,
                );
                match core.kind {
                    EffectKind::Memo => memos = true,
                    _ if !phases.contains(&phase) => phases.push(phase),
                    _ => {}
                }
            }
        }

        // The render pass only repeats if a memo it read now holds a new value.
        if render_maybe_stale && !rerender {
            rerender = self.render.core.memo_sources_changed();
        }

        match &self.strategy {
            Strategy::Global => self.drain(None),
            Strategy::Local { scheduler, .. } => {
                if memos {
                    self.drain_memos();
                }
                if rerender {
                    scheduler.mark_dirty(self.id);
                }
                self.schedule(&phases, rerender);
            }
        }
    }

    /// Queue this context's drain job for each phase and ask for a cycle.
    fn schedule(self: &Rc<Self>, phases: &[FlushPhase], rerender: bool) {
        let Strategy::Local {
            scheduler,
            position,
            jobs,
        } = &self.strategy
        else {
            return;
        };

        for &phase in phases {
            let context = Rc::downgrade(self);
            let job = Job::new(move || {
                if let Some(context) = context.upgrade() {
                    context.drain(Some(phase));
                }
            })
            .with_id(jobs[phase.index()])
            .at(*position)
            .owned_by(self.id);
            scheduler.queue_phase_job(phase, job);
        }

        if rerender || !phases.is_empty() {
            scheduler.request_cycle(self.id);
        }
    }

    /// Run pending units of `phase` (or of every phase) until none are left.
    ///
    /// A drain that is already in progress absorbs the request.
    fn drain(self: &Rc<Self>, phase: Option<FlushPhase>) {
        let Some(_draining) = DrainGuard::enter(self, DrainKind::All) else {
            return;
        };
        let limit = self.config.borrow().recursion_limit;
        let mut runs: HashMap<EffectId, u32> = HashMap::new();

        loop {
            let next = {
                let mut state = self.state.borrow_mut();
                let ContextState {
                    pending, running, ..
                } = &mut *state;
                pending.take_next(phase, |id| running.contains(&id))
            };
            let Some((id, reason)) = next else {
                break;
            };

            let count = runs.entry(id).or_insert(0);
            *count += 1;
            if *count > limit {
                warn!(
                    context = %self.id,
                    "{}",
                    ReactiveError::RecursionLimit { effect: id, limit }
                );
                continue;
            }
            self.execute(id, reason);
        }
    }

    /// Invalidate pending memos right away.
    fn drain_memos(self: &Rc<Self>) {
        let Some(_draining) = DrainGuard::enter(self, DrainKind::Memos) else {
            return;
        };
        loop {
            let next = {
                let mut state = self.state.borrow_mut();
                let ContextState {
                    pending, running, ..
                } = &mut *state;
                pending.take_memo(|id| running.contains(&id))
            };
            let Some(id) = next else {
                break;
            };
            self.execute(id, RunReason::Triggered);
        }
    }

    /// The callback a host checkpoint invokes.
    fn flush_checkpoint(self: &Rc<Self>, phase: FlushPhase) {
        match &self.strategy {
            Strategy::Global => self.drain(None),
            Strategy::Local {
                scheduler,
                position,
                ..
            } => {
                scheduler.flush_phase_until(phase, *position);
            }
        }
        if phase == FlushPhase::Post {
            self.after_commit();
        }
    }

    fn after_commit(&self) {
        let stage = {
            let mut state = self.state.borrow_mut();
            if state.unmounted || state.passes == 0 {
                return;
            }
            if !state.mounted {
                state.mounted = true;
                state.updated_pass = state.passes;
                Some(LifecycleStage::Mounted)
            } else if state.updated_pass != state.passes {
                state.updated_pass = state.passes;
                Some(LifecycleStage::Updated)
            } else {
                None
            }
        };
        if let Some(stage) = stage {
            self.hooks.run(stage);
        }
    }

    fn unmount(self: &Rc<Self>) {
        {
            let mut state = self.state.borrow_mut();
            if state.unmounted {
                return;
            }
            state.unmounted = true;
            state.pending = PendingSet::default();
        }

        let children: Vec<Rc<ContextInner>> = self
            .children
            .take()
            .iter()
            .rev()
            .filter_map(Weak::upgrade)
            .collect();
        for child in children {
            child.unmount();
        }

        self.scope.stop();
        let count = self.units.borrow().len();
        for index in 0..count {
            self.stop_effect(EffectId::from_index(index));
        }
        if let Strategy::Local { scheduler, .. } = &self.strategy {
            scheduler.mark_rendered(self.id);
        }

        self.hooks.run(LifecycleStage::Unmounted);
        tracking::forget_context(self.id);
        debug!(context = %self.id, "unmounted");
    }
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        tracking::forget_context(self.id);
    }
}

/// Marks an effect as running until dropped.
struct RunGuard<'a> {
    context: &'a ContextInner,
    _frame: FrameGuard,
}

impl<'a> RunGuard<'a> {
    fn enter(context: &'a Rc<ContextInner>, id: EffectId) -> Self {
        context.state.borrow_mut().running.push(id);
        Self {
            context,
            _frame: FrameGuard::enter(context, id),
        }
    }

    /// Like `enter`, but reads are not tracked.
    fn paused(context: &'a Rc<ContextInner>, id: EffectId) -> Self {
        context.state.borrow_mut().running.push(id);
        Self {
            context,
            _frame: FrameGuard::paused(),
        }
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.context.state.try_borrow_mut() {
            state.running.pop();
        }
    }
}

#[derive(Clone, Copy)]
enum DrainKind {
    All,
    Memos,
}

/// Holds a context's drain flag until dropped.
struct DrainGuard<'a> {
    context: &'a ContextInner,
    kind: DrainKind,
}

impl<'a> DrainGuard<'a> {
    fn enter(context: &'a ContextInner, kind: DrainKind) -> Option<Self> {
        let mut state = context.state.borrow_mut();
        let flag = match kind {
            DrainKind::All => &mut state.draining,
            DrainKind::Memos => &mut state.draining_memos,
        };
        if std::mem::replace(flag, true) {
            return None;
        }
        Some(Self { context, kind })
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.context.state.try_borrow_mut() {
            match self.kind {
                DrainKind::All => state.draining = false,
                DrainKind::Memos => state.draining_memos = false,
            }
        }
    }
}

/// Restricts state mutation until dropped.
struct RestrictGuard<'a> {
    context: &'a ContextInner,
    previous: bool,
}

impl<'a> RestrictGuard<'a> {
    fn enter(context: &'a ContextInner) -> Self {
        let previous = std::mem::replace(&mut context.state.borrow_mut().restricted, true);
        Self { context, previous }
    }
}

impl Drop for RestrictGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.context.state.try_borrow_mut() {
            state.restricted = self.previous;
        }
    }
}

/// Makes a context the ambient one until dropped.
struct ActiveContextGuard(());

impl ActiveContextGuard {
    fn enter(context: &Context) -> Self {
        ACTIVE.with(|stack| stack.borrow_mut().push(context.clone()));
        Self(())
    }
}

impl Drop for ActiveContextGuard {
    fn drop(&mut self) {
        let _ = ACTIVE.try_with(|stack| stack.borrow_mut().pop());
    }
}

/// An execution context.
///
/// Cloning a context creates another handle to the same instance.
///
/// # Example
///
/// ```rust
/// use std::cell::Cell;
/// use std::rc::Rc;
/// use trellis_core::reactive::{Context, Signal};
///
/// let ctx = Context::immediate();
/// let count = Signal::new(0);
/// let seen = Rc::new(Cell::new(-1));
///
/// let (c, s) = (count.clone(), seen.clone());
/// ctx.effect(move |_| s.set(c.get()));
///
/// count.set(3);
/// assert_eq!(seen.get(), 3);
/// ```
#[derive(Clone)]
pub struct Context {
    pub(crate) inner: Rc<ContextInner>,
}

impl Context {
    fn build(strategy: Strategy, config: ReactiveConfig, parent: Option<Weak<ContextInner>>) -> Self {
        let id = ContextId::new();
        let render = Rc::new(RenderUnit {
            core: EffectCore::root_render(EffectId::from_index(0)),
        });
        let render_unit: Rc<dyn EffectUnit> = render.clone();
        let inner = Rc::new(ContextInner {
            id,
            strategy,
            config: RefCell::new(config),
            parent,
            children: RefCell::new(Vec::new()),
            units: RefCell::new(vec![render_unit]),
            state: RefCell::new(ContextState::default()),
            store: RefCell::new(ValueStore::default()),
            hooks: LifecycleHooks::default(),
            scope: EffectScope::detached(),
            props: ObservedMap::new(),
            render,
        });
        debug!(context = %id, "context created");
        Self { inner }
    }

    /// The per-thread global context.
    ///
    /// Triggers in the global context run effects before the mutation
    /// returns.
    pub fn global() -> Self {
        GLOBAL.with(Clone::clone)
    }

    /// A standalone context with the global, synchronous strategy.
    pub fn immediate() -> Self {
        Self::build(Strategy::Global, ReactiveConfig::default(), None)
    }

    /// A host-synchronized context whose effects run at `scheduler`'s
    /// checkpoints.
    pub fn local(scheduler: &Scheduler) -> Self {
        Self::local_with_config(scheduler, scheduler.config().clone())
    }

    /// A host-synchronized context with explicit configuration.
    pub fn local_with_config(scheduler: &Scheduler, config: ReactiveConfig) -> Self {
        Self::build(Strategy::local(scheduler), config, None)
    }

    /// A nested context sharing this context's strategy.
    ///
    /// The child's root scope is owned by this context's root scope, and a
    /// local child registers after its parent so parent jobs drain first.
    /// Unmounting this context unmounts its live children first.
    pub fn child(&self) -> Self {
        let strategy = match &self.inner.strategy {
            Strategy::Global => Strategy::Global,
            Strategy::Local { scheduler, .. } => Strategy::local(scheduler),
        };
        let child = Self::build(
            strategy,
            self.inner.config.borrow().clone(),
            Some(Rc::downgrade(&self.inner)),
        );
        self.inner.scope.add_scope(&child.inner.scope);
        self.inner
            .children
            .borrow_mut()
            .push(Rc::downgrade(&child.inner));
        child
    }

    /// The context's id.
    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    /// Whether the context drains synchronously.
    pub fn is_global(&self) -> bool {
        matches!(self.inner.strategy, Strategy::Global)
    }

    /// The scheduler of a local context.
    pub fn scheduler(&self) -> Option<&Scheduler> {
        match &self.inner.strategy {
            Strategy::Global => None,
            Strategy::Local { scheduler, .. } => Some(scheduler),
        }
    }

    /// The parent context, if this is a child that is still alive.
    pub fn parent(&self) -> Option<Context> {
        self.inner
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| Context { inner })
    }

    /// The current configuration.
    pub fn config(&self) -> ReactiveConfig {
        self.inner.config.borrow().clone()
    }

    /// Replace the configuration.
    pub fn configure(&self, config: ReactiveConfig) {
        *self.inner.config.borrow_mut() = config;
    }

    /// The context's root scope. Effects created while rendering belong to
    /// it.
    pub fn scope(&self) -> EffectScope {
        self.inner.scope.clone()
    }

    // ---- Effect units ----

    /// Create an effect and run it once.
    pub fn effect(&self, f: impl FnMut(&mut Cleanup) + 'static) -> EffectHandle {
        self.effect_with(f, EffectOptions::default())
    }

    /// Create an effect with a flush phase and debug hooks.
    pub fn effect_with(
        &self,
        f: impl FnMut(&mut Cleanup) + 'static,
        options: EffectOptions,
    ) -> EffectHandle {
        effect::create_effect(&self.inner, Box::new(f), options)
    }

    /// Watch `source` and call `callback` when its value changes.
    pub fn watch<T, S, F>(&self, source: S, callback: F, options: WatchOptions) -> EffectHandle
    where
        T: Clone + PartialEq + 'static,
        S: Fn() -> T + 'static,
        F: FnMut(&T, Option<&T>, &mut Cleanup) + 'static,
    {
        watcher::create_watcher(&self.inner, Box::new(source), Box::new(callback), options)
    }

    /// Create a lazily computed memo.
    pub fn memo<T>(&self, getter: impl Fn() -> T + 'static) -> Memo<T>
    where
        T: Clone + PartialEq + 'static,
    {
        self.memo_with(getter, DebugHooks::default())
    }

    /// Create a memo with debug hooks.
    pub fn memo_with<T>(&self, getter: impl Fn() -> T + 'static, hooks: DebugHooks) -> Memo<T>
    where
        T: Clone + PartialEq + 'static,
    {
        memo::create_memo(&self.inner, Box::new(getter), hooks)
    }

    // ---- Pending set ----

    /// Merge `ids` into the pending set and schedule them.
    ///
    /// With `force`, watchers among them run their callback without diffing.
    pub fn queue_pending_effects(&self, ids: &[EffectId], force: bool) {
        self.inner.enqueue(ids, force, TriggerOrigin::Mutation);
    }

    /// Run every pending effect now, regardless of flush phase.
    pub fn drain_pending(&self) {
        self.inner.drain(None);
    }

    /// Whether any effect is waiting to run.
    pub fn has_pending(&self) -> bool {
        !self.inner.state.borrow().pending.is_empty()
    }

    // ---- Value store ----

    /// Append a value to the store and return its index.
    pub fn add_to_store<T: 'static>(&self, value: T) -> usize {
        let mut store = self.inner.store.borrow_mut();
        store.slots.push(Box::new(value));
        store.slots.len() - 1
    }

    /// The value at `index`, if it exists and has type `T`.
    pub fn get_value_at<T: Clone + 'static>(&self, index: usize) -> Option<T> {
        self.inner
            .store
            .borrow()
            .slots
            .get(index)
            .and_then(|slot| slot.downcast_ref::<T>())
            .cloned()
    }

    /// Overwrite the value at `index`. Returns `false` if there is no slot.
    pub fn set_store_value_at<T: 'static>(&self, index: usize, value: T) -> bool {
        match self.inner.store.borrow_mut().slots.get_mut(index) {
            Some(slot) => {
                *slot = Box::new(value);
                true
            }
            None => false,
        }
    }

    /// Number of store slots.
    pub fn store_len(&self) -> usize {
        self.inner.store.borrow().slots.len()
    }

    // ---- Host interface ----

    /// Merge host-supplied props into the reactive prop store.
    ///
    /// New keys are added, changed values are set, and keys missing from
    /// `props` are deleted.
    pub fn track_props(&self, props: Map<String, Value>) {
        let stale: Vec<String> = self
            .inner
            .props
            .keys_untracked()
            .into_iter()
            .filter(|key| !props.contains_key(key))
            .collect();
        for (key, value) in props {
            self.inner.props.insert(key, value);
        }
        for key in stale {
            self.inner.props.remove(&key);
        }
    }

    /// A readonly view of the props.
    pub fn props(&self) -> ObservedMap<Value> {
        self.inner.props.readonly()
    }

    /// Run one render pass.
    ///
    /// The context becomes the ambient one and its root scope the active
    /// scope. On the first pass before-mount hooks run after `f`; on later
    /// passes before-update hooks run before it. State handles reject writes
    /// during `f` and during before-update hooks.
    pub fn render<R>(&self, f: impl FnOnce() -> R) -> R {
        let inner = &self.inner;
        let first = {
            let mut state = inner.state.borrow_mut();
            state.passes += 1;
            !state.mounted && state.passes == 1
        };
        inner.store.borrow_mut().cursor = 0;
        if let Strategy::Local { scheduler, .. } = &inner.strategy {
            scheduler.mark_rendered(inner.id);
        }
        trace!(context = %inner.id, first, "render");

        let _ambient = ActiveContextGuard::enter(self);
        let _scope = ActiveScopeGuard::enter(&inner.scope);

        if !first {
            let _restricted = RestrictGuard::enter(inner);
            inner.hooks.run(LifecycleStage::BeforeUpdate);
        }

        let output = {
            let _restricted = RestrictGuard::enter(inner);
            inner.run_tracked(&inner.render.core, f)
        };

        if first {
            inner.hooks.run(LifecycleStage::BeforeMount);
        }
        output
    }

    /// Register this pass's checkpoint callbacks with the host.
    pub fn run_effects(&self, registry: &mut dyn CheckpointRegistry) {
        for phase in FlushPhase::ALL {
            let context = Rc::downgrade(&self.inner);
            registry.register(
                phase.into(),
                Box::new(move || {
                    if let Some(context) = context.upgrade() {
                        context.flush_checkpoint(phase);
                    }
                }),
            );
        }

        let context = Rc::downgrade(&self.inner);
        registry.register(
            HostCheckpoint::Unmount,
            Box::new(move || {
                if let Some(context) = context.upgrade() {
                    context.unmount();
                }
            }),
        );
    }

    /// Tear the context down: stop every unit and scope, run unmounted hooks
    /// and forget all tracking entries. Idempotent.
    pub fn unmount(&self) {
        self.inner.unmount();
    }

    /// Whether the first commit has completed.
    pub fn is_mounted(&self) -> bool {
        self.inner.is_mounted()
    }

    /// Whether the context has been unmounted.
    pub fn is_unmounted(&self) -> bool {
        self.inner.state.borrow().unmounted
    }

    /// Number of render passes so far.
    pub fn pass_count(&self) -> u64 {
        self.inner.state.borrow().passes
    }

    // ---- Ambient context ----

    /// The innermost context entered with [`Context::enter`] or rendering.
    pub fn current() -> Option<Context> {
        ACTIVE.with(|stack| stack.borrow().last().cloned())
    }

    /// Run `f` with this context as the ambient one.
    pub fn enter<R>(&self, f: impl FnOnce() -> R) -> R {
        let _ambient = ActiveContextGuard::enter(self);
        f()
    }
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Context {}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("Context")
            .field("id", &self.inner.id)
            .field("global", &self.is_global())
            .field("units", &self.inner.units.borrow().len())
            .field("passes", &state.passes)
            .field("mounted", &state.mounted)
            .finish()
    }
}

fn ambient() -> Context {
    Context::current().unwrap_or_else(Context::global)
}

/// Create an effect in the ambient context, or the global one.
pub fn effect(f: impl FnMut(&mut Cleanup) + 'static) -> EffectHandle {
    ambient().effect(f)
}

/// Watch a source in the ambient context, or the global one.
pub fn watch<T, S, F>(source: S, callback: F, options: WatchOptions) -> EffectHandle
where
    T: Clone + PartialEq + 'static,
    S: Fn() -> T + 'static,
    F: FnMut(&T, Option<&T>, &mut Cleanup) + 'static,
{
    ambient().watch(source, callback, options)
}

/// Create a memo in the ambient context, or the global one.
pub fn memo<T>(getter: impl Fn() -> T + 'static) -> Memo<T>
where
    T: Clone + PartialEq + 'static,
{
    ambient().memo(getter)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
