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
//! 2. When any dependency changes, the owning context queues the effect. The
//!    global context runs it before the mutation returns; host-synchronized
//!    contexts run it at the checkpoint of its flush phase.
//!
//! 3. Before re-running, the effect runs the cleanup it registered last time,
//!    clears its old dependencies and tracks new ones during execution.
//!
//! # Effect Units
//!
//! Effects, watchers and memos share one internal trait, [`EffectUnit`], over
//! a common [`EffectCore`]. The owning context stores units in an arena
//! indexed by [`EffectId`]; everything else refers to them by id, or through
//! an [`EffectHandle`] that holds only a weak reference to the context.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use smallvec::SmallVec;
use tracing::warn;

use crate::error::ReactiveError;
use crate::scheduler::FlushPhase;

use super::context::ContextInner;
use super::{scope, EffectId, EffectKind, OpType, TargetId, TrackKey};

/// Information handed to `on_track` and `on_trigger` debug hooks.
#[derive(Debug, Clone, PartialEq)]
pub struct DebugEvent {
    /// The effect being tracked or triggered.
    pub effect: EffectId,
    /// The observed target.
    pub target: TargetId,
    /// The access or mutation.
    pub op: OpType,
    /// The key that was read or written.
    pub key: TrackKey,
    /// The previous value, rendered with `Debug` (triggers only).
    pub old_value: Option<String>,
    /// The new value, rendered with `Debug` (triggers only).
    pub new_value: Option<String>,
}

/// A debug callback.
pub type DebugHook = Rc<dyn Fn(&DebugEvent)>;

/// Optional debug callbacks attached to an effect unit.
#[derive(Clone, Default)]
pub struct DebugHooks {
    /// Called whenever the effect records a new dependency.
    pub on_track: Option<DebugHook>,
    /// Called whenever a mutation queues the effect.
    pub on_trigger: Option<DebugHook>,
}

impl fmt::Debug for DebugHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebugHooks")
            .field("on_track", &self.on_track.is_some())
            .field("on_trigger", &self.on_trigger.is_some())
            .finish()
    }
}

/// Options for [`Context::effect_with`](super::Context::effect_with).
#[derive(Debug, Clone, Default)]
pub struct EffectOptions {
    /// The host checkpoint at which the effect re-runs.
    pub flush: FlushPhase,
    /// Debug callbacks.
    pub hooks: DebugHooks,
}

/// Collects cleanup callbacks registered by an effect run.
///
/// The callbacks run before the next run of the same effect, and when the
/// effect is stopped.
#[derive(Default)]
pub struct Cleanup {
    callbacks: Vec<Box<dyn FnOnce()>>,
}

impl Cleanup {
    /// Register a callback to run before the next execution or on stop.
    pub fn on_cleanup(&mut self, f: impl FnOnce() + 'static) {
        self.callbacks.push(Box::new(f));
    }

    /// Whether any callback is registered.
    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    pub(crate) fn run(self) {
        for callback in self.callbacks {
            callback();
        }
    }
}

impl fmt::Debug for Cleanup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cleanup")
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

/// Why a unit is being run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunReason {
    /// First run, right after creation.
    Initial,
    /// A dependency definitely changed.
    Triggered,
    /// Only a memo the unit read may have changed.
    MaybeStale,
    /// Explicitly requested; watchers skip their diff.
    Forced,
}

/// A memo as seen by the effects that read it.
pub(crate) trait MemoProbe {
    /// Bring the memo up to date and return its value version.
    fn refresh(&self) -> u64;
}

/// State shared by every kind of effect unit.
pub(crate) struct EffectCore {
    pub(crate) id: EffectId,
    pub(crate) kind: EffectKind,
    pub(crate) flush: FlushPhase,
    pub(crate) hooks: DebugHooks,
    /// Set on a context's render unit; its triggers request a re-render
    /// instead of being queued.
    pub(crate) is_root_render: bool,
    deps: RefCell<SmallVec<[(TargetId, TrackKey); 4]>>,
    memo_reads: RefCell<SmallVec<[(Rc<dyn MemoProbe>, u64); 2]>>,
    run_count: Cell<u64>,
}

impl EffectCore {
    pub(crate) fn new(id: EffectId, kind: EffectKind, flush: FlushPhase, hooks: DebugHooks) -> Self {
        Self {
            id,
            kind,
            flush,
            hooks,
            is_root_render: false,
            deps: RefCell::new(SmallVec::new()),
            memo_reads: RefCell::new(SmallVec::new()),
            run_count: Cell::new(0),
        }
    }

    pub(crate) fn root_render(id: EffectId) -> Self {
        Self {
            is_root_render: true,
            ..Self::new(id, EffectKind::Effect, FlushPhase::Pre, DebugHooks::default())
        }
    }

    pub(crate) fn record_dependency(&self, target: TargetId, key: TrackKey) {
        self.deps.borrow_mut().push((target, key));
    }

    /// Remember the version of a memo read during the current run.
    pub(crate) fn observe_memo(&self, memo: Rc<dyn MemoProbe>, version: u64) {
        let mut reads = self.memo_reads.borrow_mut();
        if !reads.iter().any(|(seen, _)| Rc::ptr_eq(seen, &memo)) {
            reads.push((memo, version));
        }
    }

    /// Take the dependencies of the previous run, forgetting memo reads too.
    pub(crate) fn take_dependencies(&self) -> SmallVec<[(TargetId, TrackKey); 4]> {
        self.memo_reads.borrow_mut().clear();
        std::mem::take(&mut *self.deps.borrow_mut())
    }

    /// Whether any memo read during the last run now holds a different value.
    pub(crate) fn memo_sources_changed(&self) -> bool {
        let reads: SmallVec<[(Rc<dyn MemoProbe>, u64); 2]> = self.memo_reads.borrow().clone();
        // A unit queued as maybe-stale without memo reads has nothing to verify.
        reads.is_empty() || reads.iter().any(|(memo, seen)| memo.refresh() != *seen)
    }

    pub(crate) fn dependency_count(&self) -> usize {
        self.deps.borrow().len()
    }

    pub(crate) fn mark_ran(&self) {
        self.run_count.set(self.run_count.get() + 1);
    }

    pub(crate) fn run_count(&self) -> u64 {
        self.run_count.get()
    }
}

/// Behavior shared by effects, watchers and memos.
pub(crate) trait EffectUnit {
    fn core(&self) -> &EffectCore;

    /// Execute the unit. Only the owning context calls this.
    fn run(&self, context: &Rc<ContextInner>, reason: RunReason);

    /// Release resources when the unit is stopped.
    fn stop(&self);
}

/// A fire-and-forget side effect with optional cleanup.
struct SideEffect {
    core: EffectCore,
    callback: RefCell<Box<dyn FnMut(&mut Cleanup)>>,
    cleanup: RefCell<Cleanup>,
}

impl EffectUnit for SideEffect {
    fn core(&self) -> &EffectCore {
        &self.core
    }

    fn run(&self, context: &Rc<ContextInner>, reason: RunReason) {
        if reason == RunReason::MaybeStale && !self.core.memo_sources_changed() {
            return;
        }

        let Ok(mut callback) = self.callback.try_borrow_mut() else {
            warn!(effect = %self.core.id, "effect re-entered itself; run skipped");
            return;
        };

        self.cleanup.take().run();

        let mut cleanup = Cleanup::default();
        context.run_tracked(&self.core, || callback(&mut cleanup));
        self.core.mark_ran();
        *self.cleanup.borrow_mut() = cleanup;
    }

    fn stop(&self) {
        self.cleanup.take().run();
    }
}

/// Create an effect in `context`, register it with the active scope and run
/// it once.
pub(crate) fn create_effect(
    context: &Rc<ContextInner>,
    callback: Box<dyn FnMut(&mut Cleanup)>,
    options: EffectOptions,
) -> EffectHandle {
    let id = context.next_effect_id();
    let unit = Rc::new(SideEffect {
        core: EffectCore::new(id, EffectKind::Effect, options.flush, options.hooks),
        callback: RefCell::new(callback),
        cleanup: RefCell::new(Cleanup::default()),
    });
    context.insert_unit(unit);

    let handle = EffectHandle::new(context, id);
    scope::register_effect(&handle);
    context.run_unit(id, RunReason::Initial);
    handle
}

/// A handle to an effect unit owned by a context.
///
/// Dropping the handle does not stop the effect; the owning context (and the
/// scope it was created in) keep it alive.
#[derive(Clone)]
pub struct EffectHandle {
    context: Weak<ContextInner>,
    id: EffectId,
}

impl EffectHandle {
    pub(crate) fn new(context: &Rc<ContextInner>, id: EffectId) -> Self {
        Self {
            context: Rc::downgrade(context),
            id,
        }
    }

    /// The effect's id within its context.
    pub fn id(&self) -> EffectId {
        self.id
    }

    /// Stop the effect: run its cleanup and ignore all future triggers.
    ///
    /// Stopping twice is a no-op.
    pub fn stop(&self) {
        if let Some(context) = self.context.upgrade() {
            context.stop_effect(self.id);
        }
    }

    /// Whether the effect still reacts to triggers.
    pub fn is_active(&self) -> bool {
        self.context
            .upgrade()
            .map(|context| !context.is_disabled(self.id))
            .unwrap_or(false)
    }

    /// Run the effect now, bypassing any diff a watcher would perform.
    ///
    /// Running a stopped effect is a warned no-op.
    pub fn run(&self) {
        let Some(context) = self.context.upgrade() else {
            return;
        };
        if context.is_disabled(self.id) {
            warn!("{}", ReactiveError::InactiveEffect { effect: self.id });
            return;
        }
        context.run_unit(self.id, RunReason::Forced);
    }

    /// How many times the effect body has executed.
    pub fn run_count(&self) -> u64 {
        self.context
            .upgrade()
            .and_then(|context| context.unit(self.id))
            .map(|unit| unit.core().run_count())
            .unwrap_or(0)
    }

    /// Number of (target, key) pairs the last run depended on.
    pub fn dependency_count(&self) -> usize {
        self.context
            .upgrade()
            .and_then(|context| context.unit(self.id))
            .map(|unit| unit.core().dependency_count())
            .unwrap_or(0)
    }
}

impl fmt::Debug for EffectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectHandle")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .field("run_count", &self.run_count())
            .finish()
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
    fn effect_runs_on_creation() {
        let ctx = Context::immediate();
        let runs = Rc::new(Cell::new(0));
        let runs_clone = runs.clone();

        let handle = ctx.effect(move |_| runs_clone.set(runs_clone.get() + 1));

        assert_eq!(runs.get(), 1);
        assert_eq!(handle.run_count(), 1);
    }

    #[test]
    fn effect_reruns_when_dependency_changes() {
        let ctx = Context::immediate();
        let signal = Signal::new(1);
        let seen = Rc::new(Cell::new(0));

        let (s, out) = (signal.clone(), seen.clone());
        let handle = ctx.effect(move |_| out.set(s.get()));

        signal.set(7);
        assert_eq!(seen.get(), 7);
        assert_eq!(handle.run_count(), 2);
        assert_eq!(handle.dependency_count(), 1);
    }

    #[test]
    fn cleanup_runs_before_next_execution_and_on_stop() {
        let ctx = Context::immediate();
        let signal = Signal::new(0);
        let cleanups = Rc::new(Cell::new(0));

        let (s, c) = (signal.clone(), cleanups.clone());
        let handle = ctx.effect(move |cleanup| {
            s.get();
            let c = c.clone();
            cleanup.on_cleanup(move || c.set(c.get() + 1));
        });
        assert_eq!(cleanups.get(), 0);

        signal.set(1);
        assert_eq!(cleanups.get(), 1);

        handle.stop();
        assert_eq!(cleanups.get(), 2);

        // Stopping twice does not clean up twice
        handle.stop();
        assert_eq!(cleanups.get(), 2);
    }

    #[test]
    fn stopped_effect_ignores_triggers_and_manual_runs() {
        let ctx = Context::immediate();
        let signal = Signal::new(0);
        let runs = Rc::new(Cell::new(0));

        let (s, r) = (signal.clone(), runs.clone());
        let handle = ctx.effect(move |_| {
            s.get();
            r.set(r.get() + 1);
        });
        handle.stop();
        assert!(!handle.is_active());

        signal.set(1);
        handle.run();
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn manual_run_reexecutes() {
        let ctx = Context::immediate();
        let runs = Rc::new(Cell::new(0));
        let r = runs.clone();
        let handle = ctx.effect(move |_| r.set(r.get() + 1));

        handle.run();
        handle.run();
        assert_eq!(runs.get(), 3);
    }

    #[test]
    fn debug_hooks_observe_track_and_trigger() {
        let ctx = Context::immediate();
        let signal = Signal::new(String::from("a"));
        let events = Rc::new(RefCell::new(Vec::new()));

        let (tracked, triggered) = (events.clone(), events.clone());
        let options = EffectOptions {
            hooks: DebugHooks {
                on_track: Some(Rc::new(move |e: &DebugEvent| tracked.borrow_mut().push(e.clone()))),
                on_trigger: Some(Rc::new(move |e: &DebugEvent| {
                    triggered.borrow_mut().push(e.clone())
                })),
            },
            ..EffectOptions::default()
        };
        let s = signal.clone();
        ctx.effect_with(
            move |_| {
                s.get();
                s.get();
            },
            options,
        );

        // Two reads, one dependency
        assert_eq!(events.borrow().len(), 1);
        assert_eq!(events.borrow()[0].op, OpType::Get);

        signal.set(String::from("b"));
        let events = events.borrow();
        let trigger = events.iter().find(|e| e.op == OpType::Set).unwrap();
        assert_eq!(trigger.old_value.as_deref(), Some("\"a\""));
        assert_eq!(trigger.new_value.as_deref(), Some("\"b\""));
        assert_eq!(trigger.target, signal.id());
    }
}
