//! Watcher Implementation
//!
//! A watcher re-reads a source whenever one of the source's dependencies
//! changes, compares the result with what it saw last time, and calls its
//! callback only when the value actually changed.
//!
//! # Options
//!
//! - `immediate`: call the callback on creation, with no previous value.
//! - `once`: stop the watcher after the callback has run once.
//! - `deep`: treat every re-read as a change. Use this when the source
//!   returns a collection whose contents matter more than its identity.
//!
//! Watching several sources is done by returning a tuple from the source.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use super::context::ContextInner;
use super::effect::{Cleanup, DebugHooks, EffectCore, EffectHandle, EffectUnit, RunReason};
use super::{scope, EffectKind};
use crate::scheduler::FlushPhase;

/// Options for [`Context::watch`](super::Context::watch).
#[derive(Debug, Clone, Default)]
pub struct WatchOptions {
    /// Run the callback right away with no previous value.
    pub immediate: bool,
    /// Stop after the first callback.
    pub once: bool,
    /// Consider every re-read a change.
    pub deep: bool,
    /// The host checkpoint at which the watcher re-runs.
    pub flush: FlushPhase,
    /// Debug callbacks.
    pub hooks: DebugHooks,
}

type WatchCallback<T> = Box<dyn FnMut(&T, Option<&T>, &mut Cleanup)>;

struct WatcherEffect<T> {
    core: EffectCore,
    source: Box<dyn Fn() -> T>,
    callback: RefCell<WatchCallback<T>>,
    /// The value seen by the most recent `check_deps`.
    value: RefCell<Option<T>>,
    immediate: bool,
    once: bool,
    deep: bool,
    has_run: Cell<bool>,
    cleanup: RefCell<Cleanup>,
}

impl<T> WatcherEffect<T>
where
    T: Clone + PartialEq + 'static,
{
    /// Re-read the source, re-tracking its dependencies.
    ///
    /// Returns the fresh value, the previous one, and whether they differ.
    fn check_deps(&self, context: &Rc<ContextInner>) -> (T, Option<T>, bool) {
        let next = context.run_tracked(&self.core, || (self.source)());
        let previous = self.value.replace(Some(next.clone()));
        let changed = self.deep || previous.as_ref() != Some(&next);
        (next, previous, changed)
    }

    fn execute(&self, context: &Rc<ContextInner>, value: &T, previous: Option<&T>) {
        let Ok(mut callback) = self.callback.try_borrow_mut() else {
            return;
        };

        self.cleanup.take().run();

        let mut cleanup = Cleanup::default();
        context.run_untracked(self.core.id, || callback(value, previous, &mut cleanup));
        self.core.mark_ran();
        *self.cleanup.borrow_mut() = cleanup;
        drop(callback);

        if self.once {
            context.stop_effect(self.core.id);
        }
    }
}

impl<T> EffectUnit for WatcherEffect<T>
where
    T: Clone + PartialEq + 'static,
{
    fn core(&self) -> &EffectCore {
        &self.core
    }

    fn run(&self, context: &Rc<ContextInner>, reason: RunReason) {
        let first = !self.has_run.replace(true);
        let (value, previous, changed) = self.check_deps(context);

        let should_execute = match reason {
            RunReason::Initial => self.immediate,
            RunReason::Forced => true,
            RunReason::Triggered | RunReason::MaybeStale => changed || (first && self.immediate),
        };

        if should_execute {
            self.execute(context, &value, previous.as_ref());
        }
    }

    fn stop(&self) {
        self.cleanup.take().run();
    }
}

/// Create a watcher in `context` and run its initial dependency pass.
pub(crate) fn create_watcher<T>(
    context: &Rc<ContextInner>,
    source: Box<dyn Fn() -> T>,
    callback: WatchCallback<T>,
    options: WatchOptions,
) -> EffectHandle
where
    T: Clone + PartialEq + 'static,
{
    let id = context.next_effect_id();
    let unit = Rc::new(WatcherEffect {
        core: EffectCore::new(id, EffectKind::Watcher, options.flush, options.hooks),
        source,
        callback: RefCell::new(callback),
        value: RefCell::new(None),
        immediate: options.immediate,
        once: options.once,
        deep: options.deep,
        has_run: Cell::new(false),
        cleanup: RefCell::new(Cleanup::default()),
    });
    context.insert_unit(unit);

    let handle = EffectHandle::new(context, id);
    scope::register_effect(&handle);
    context.run_unit(id, RunReason::Initial);
    handle
}
