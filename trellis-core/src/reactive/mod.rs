//! Reactive Primitives
//!
//! This module implements the core reactive system: observed state, the
//! tracking table, effect units and the execution contexts that schedule
//! them.
//!
//! # Concepts
//!
//! ## Observed State
//!
//! [`Signal`], [`ObservedMap`] and [`ObservedVec`] report every read to the
//! tracking table and every write to the trigger path. Reads are recorded per
//! key, so an effect only re-runs when a key it actually read changes.
//!
//! ## Effect Units
//!
//! - An effect runs a closure and re-runs it when its dependencies change.
//! - A watcher evaluates a source and only calls its
//!   callback when the source value changes.
//! - A memo caches a derived value and recomputes it lazily.
//!
//! ## Execution Contexts
//!
//! Every unit belongs to a [`Context`]. The global context runs effects
//! before a mutation returns; local contexts defer them to host checkpoints
//! driven by a [`Scheduler`](crate::scheduler::Scheduler).
//!
//! ## Scopes
//!
//! An [`EffectScope`] collects units and child scopes so they can be stopped
//! together.
//!
//! # Implementation Notes
//!
//! Dependency detection is automatic: while a unit runs, a thread-local
//! tracking frame names it, and every read of observed state is attributed
//! to that frame. The tracking table and frame stack are thread-local, so the
//! whole system is single-threaded by construction.

mod collections;
mod context;
mod effect;
mod frame;
mod hooks;
mod id;
mod memo;
mod pending;
mod scope;
mod signal;
mod tracking;
mod watcher;

pub use collections::{ObservedMap, ObservedVec};
pub use context::{effect, memo, watch, Context};
pub use effect::{Cleanup, DebugEvent, DebugHook, DebugHooks, EffectHandle, EffectOptions};
pub use frame::{is_tracking, untracked};
pub use hooks::{
    on_before_mount, on_before_update, on_mounted, on_unmounted, on_updated, use_effect,
    use_memo, use_signal, use_state, use_watch, StateHandle,
};
pub use id::{ContextId, EffectId, EffectKind, OpType, TargetId, TargetKind, TrackKey};
pub use memo::Memo;
pub use scope::{current_scope, on_scope_dispose, EffectScope};
pub use signal::Signal;
pub use tracking::{dependent_count, forget_target, track, trigger, trigger_length, TriggerValues};
pub use watcher::WatchOptions;
