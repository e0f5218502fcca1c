//! Tracking Table
//!
//! The tracking table is the central record of who read what. It maps an
//! observed target to its keys, each key to the contexts that read it, and
//! each context to the set of effect ids that depend on the key.
//!
//! # How It Works
//!
//! 1. When observed state is read while an effect runs, [`track`] records
//!    `(target, key, context) -> effect`. Reading the same key twice in one
//!    run records it once.
//!
//! 2. Before an effect re-runs, its previous entries are removed, so an entry
//!    exists iff the effect's most recent run read that key.
//!
//! 3. When observed state mutates, [`trigger`] resolves every affected key
//!    (structural operations also invalidate iteration and length keys),
//!    collects the dependent effects per context, drops each context's
//!    currently running effect, and hands the rest to that context.
//!
//! # Thread Model
//!
//! The table is thread-local. Targets and contexts created on one thread are
//! only ever tracked on that thread, which keeps isolated tests independent.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::Debug;
use std::rc::{Rc, Weak};

use indexmap::{IndexMap, IndexSet};
use tracing::trace;

use super::context::ContextInner;
use super::effect::DebugEvent;
use super::frame;
use super::{ContextId, EffectId, OpType, TargetId, TargetKind, TrackKey};

thread_local! {
    static TABLE: RefCell<TrackingTable> = RefCell::new(TrackingTable::default());
}

type EffectSet = IndexSet<EffectId>;
type ContextDeps = IndexMap<ContextId, EffectSet>;

/// Old and new values of a mutation, forwarded to `on_trigger` hooks.
#[derive(Clone, Copy, Default)]
pub struct TriggerValues<'a> {
    /// The value before the mutation, if there was one.
    pub old_value: Option<&'a dyn Debug>,
    /// The value after the mutation, if there is one.
    pub new_value: Option<&'a dyn Debug>,
}

impl<'a> TriggerValues<'a> {
    /// No values to report.
    pub fn none() -> Self {
        Self::default()
    }

    /// Report both sides of a write.
    pub fn new(old_value: Option<&'a dyn Debug>, new_value: Option<&'a dyn Debug>) -> Self {
        Self {
            old_value,
            new_value,
        }
    }
}

/// How a trigger should be treated by the receiving contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TriggerOrigin {
    /// Observed state definitely changed.
    Mutation,
    /// A memo was invalidated; its value may or may not have changed.
    Memo,
}

/// Global association from (target, key, context) to dependent effects.
#[derive(Default)]
pub(crate) struct TrackingTable {
    targets: HashMap<TargetId, HashMap<TrackKey, ContextDeps>>,
    contexts: HashMap<ContextId, Weak<ContextInner>>,
}

impl TrackingTable {
    /// Record that `effect`, running in `context`, read `key` of `target`.
    ///
    /// Returns `false` if the dependency was already recorded.
    fn insert(
        &mut self,
        context: &Rc<ContextInner>,
        target: TargetId,
        key: TrackKey,
        effect: EffectId,
    ) -> bool {
        self.contexts
            .entry(context.id())
            .or_insert_with(|| Rc::downgrade(context));

        self.targets
            .entry(target)
            .or_default()
            .entry(key)
            .or_default()
            .entry(context.id())
            .or_default()
            .insert(effect)
    }

    /// Remove one recorded dependency.
    fn remove(&mut self, context: ContextId, target: TargetId, key: &TrackKey, effect: EffectId) {
        let Some(keys) = self.targets.get_mut(&target) else {
            return;
        };
        if let Some(deps) = keys.get_mut(key) {
            if let Some(set) = deps.get_mut(&context) {
                set.shift_remove(&effect);
                if set.is_empty() {
                    deps.shift_remove(&context);
                }
            }
            if deps.is_empty() {
                keys.remove(key);
            }
        }
        if keys.is_empty() {
            self.targets.remove(&target);
        }
    }

    /// Collect the effects affected by a mutation, grouped by context.
    fn resolve(
        &self,
        target: TargetId,
        key: &TrackKey,
        op: OpType,
        new_len: Option<usize>,
    ) -> ContextDeps {
        let mut out = ContextDeps::new();
        let Some(keys) = self.targets.get(&target) else {
            return out;
        };

        if op == OpType::Clear {
            for deps in keys.values() {
                merge(&mut out, deps);
            }
            return out;
        }

        if let (TrackKey::Length, Some(new_len), TargetKind::Array) = (key, new_len, target.kind()) {
            for (k, deps) in keys {
                match k {
                    TrackKey::Length => merge(&mut out, deps),
                    TrackKey::Index(i) if *i >= new_len => merge(&mut out, deps),
                    _ => {}
                }
            }
            return out;
        }

        if let Some(deps) = keys.get(key) {
            merge(&mut out, deps);
        }

        let structural = match (op, target.kind(), key) {
            (OpType::Add, TargetKind::Array, TrackKey::Index(_)) => Some(TrackKey::Length),
            (OpType::Add | OpType::Delete, TargetKind::Object | TargetKind::Collection, _) => {
                Some(TrackKey::Iterate)
            }
            (OpType::Set, TargetKind::Collection, _) => Some(TrackKey::Iterate),
            _ => None,
        };
        if let Some(extra) = structural {
            if let Some(deps) = keys.get(&extra) {
                merge(&mut out, deps);
            }
        }

        out
    }

    fn context(&self, id: ContextId) -> Option<Rc<ContextInner>> {
        self.contexts.get(&id).and_then(Weak::upgrade)
    }

    fn forget_context(&mut self, id: ContextId) {
        self.contexts.remove(&id);
        self.targets.retain(|_, keys| {
            keys.retain(|_, deps| {
                deps.shift_remove(&id);
                !deps.is_empty()
            });
            !keys.is_empty()
        });
    }

    fn dependents(&self, target: TargetId, key: &TrackKey) -> usize {
        self.targets
            .get(&target)
            .and_then(|keys| keys.get(key))
            .map(|deps| deps.values().map(IndexSet::len).sum())
            .unwrap_or(0)
    }
}

fn merge(out: &mut ContextDeps, deps: &ContextDeps) {
    for (context, set) in deps {
        out.entry(*context).or_default().extend(set.iter().copied());
    }
}

/// Record a read of `key` on `target` against the running effect.
///
/// No-op when no effect is running or tracking is paused.
pub fn track(target: TargetId, key: TrackKey, op: OpType) {
    let Some((context, effect)) = frame::current() else {
        return;
    };
    track_in(&context, target, key, op, effect);
}

/// Record a read against an explicit context and effect.
pub(crate) fn track_in(
    context: &Rc<ContextInner>,
    target: TargetId,
    key: TrackKey,
    op: OpType,
    effect: EffectId,
) {
    let Some(unit) = context.unit(effect) else {
        return;
    };

    let inserted = TABLE.with(|table| {
        table
            .borrow_mut()
            .insert(context, target, key.clone(), effect)
    });
    if !inserted {
        return;
    }

    let core = unit.core();
    core.record_dependency(target, key.clone());

    if let Some(hook) = core.hooks.on_track.clone() {
        hook(&DebugEvent {
            effect,
            target,
            op,
            key,
            old_value: None,
            new_value: None,
        });
    }
}

/// Propagate a mutation of `key` on `target` to every dependent effect.
pub fn trigger(target: TargetId, key: TrackKey, op: OpType, values: TriggerValues<'_>) {
    dispatch(target, key, op, None, values, TriggerOrigin::Mutation);
}

/// Propagate an array length change.
///
/// Effects that read the length, or any index at or beyond `new_len`, are
/// affected.
pub fn trigger_length(target: TargetId, new_len: usize, old_len: usize) {
    dispatch(
        target,
        TrackKey::Length,
        OpType::Set,
        Some(new_len),
        TriggerValues::new(Some(&old_len), Some(&new_len)),
        TriggerOrigin::Mutation,
    );
}

/// Notify readers of a memo that its value may have changed.
pub(crate) fn trigger_memo_readers(target: TargetId) {
    dispatch(
        target,
        TrackKey::Value,
        OpType::Set,
        None,
        TriggerValues::none(),
        TriggerOrigin::Memo,
    );
}

fn dispatch(
    target: TargetId,
    key: TrackKey,
    op: OpType,
    new_len: Option<usize>,
    values: TriggerValues<'_>,
    origin: TriggerOrigin,
) {
    // Resolve everything up front; contexts re-enter the table while running.
    let affected: Vec<(Rc<ContextInner>, Vec<EffectId>)> = TABLE.with(|table| {
        let table = table.borrow();
        table
            .resolve(target, &key, op, new_len)
            .into_iter()
            .filter_map(|(id, set)| {
                table
                    .context(id)
                    .map(|ctx| (ctx, set.into_iter().collect()))
            })
            .collect()
    });

    for (context, mut effects) in affected {
        let running = context.current_effect();
        effects.retain(|id| Some(*id) != running && !context.is_disabled(*id));
        if effects.is_empty() {
            continue;
        }

        trace!(
            context = %context.id(),
            %target,
            %key,
            %op,
            count = effects.len(),
            "trigger"
        );

        for id in &effects {
            let Some(unit) = context.unit(*id) else {
                continue;
            };
            if let Some(hook) = unit.core().hooks.on_trigger.clone() {
                hook(&DebugEvent {
                    effect: *id,
                    target,
                    op,
                    key: key.clone(),
                    old_value: values.old_value.map(|v| format!("{v:?}")),
                    new_value: values.new_value.map(|v| format!("{v:?}")),
                });
            }
        }

        context.enqueue(&effects, false, origin);
    }
}

/// Remove the dependencies an effect recorded during its previous run.
pub(crate) fn untrack(context: ContextId, effect: EffectId, deps: &[(TargetId, TrackKey)]) {
    if deps.is_empty() {
        return;
    }
    let _ = TABLE.try_with(|table| {
        if let Ok(mut table) = table.try_borrow_mut() {
            for (target, key) in deps {
                table.remove(context, *target, key, effect);
            }
        }
    });
}

/// Drop every entry recorded for `target`.
///
/// Called when the last handle to an observed value is dropped.
pub fn forget_target(target: TargetId) {
    let _ = TABLE.try_with(|table| {
        if let Ok(mut table) = table.try_borrow_mut() {
            table.targets.remove(&target);
        }
    });
}

/// Drop every entry recorded for a context.
pub(crate) fn forget_context(context: ContextId) {
    let _ = TABLE.try_with(|table| {
        if let Ok(mut table) = table.try_borrow_mut() {
            table.forget_context(context);
        }
    });
}

/// Number of effects (across all contexts) that depend on `key` of `target`.
pub fn dependent_count(target: TargetId, key: &TrackKey) -> usize {
    TABLE.with(|table| table.borrow().dependents(target, key))
}
