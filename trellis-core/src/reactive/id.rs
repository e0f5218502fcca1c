//! Identifiers and keys for the reactive system.
//!
//! Every observed target, execution context and effect unit gets a compact
//! identifier. Effect ids are assigned per context and are never reused while
//! that context lives; context and target ids are unique per process.

use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for an effect unit within its owning context.
///
/// Effect ids double as registration positions: a lower id was created
/// earlier, and drains run pending effects in ascending id order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EffectId(u32);

impl EffectId {
    pub(crate) fn from_index(index: usize) -> Self {
        Self(index as u32)
    }

    /// Position of this effect in its context's arena.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for EffectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// Unique identifier for an execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
    /// Generate a new unique context ID.
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx{}", self.0)
    }
}

/// The shape of an observed target.
///
/// The kind decides which extra keys a structural mutation invalidates
/// (see [`trigger`](super::trigger)).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    /// A single value cell (signals, memos).
    Value,
    /// A plain keyed object. Adding or removing a key invalidates iteration.
    Object,
    /// An index-addressed array with a tracked length.
    Array,
    /// A map-like collection. Any write invalidates iteration.
    Collection,
}

/// Identity of an observed target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetId {
    raw: u64,
    kind: TargetKind,
}

impl TargetId {
    /// Allocate a fresh target identity of the given kind.
    pub fn new(kind: TargetKind) -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self {
            raw: COUNTER.fetch_add(1, Ordering::Relaxed),
            kind,
        }
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.raw
    }

    /// The shape of this target.
    pub fn kind(&self) -> TargetKind {
        self.kind
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.raw)
    }
}

/// A key of an observed target that effects can depend on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TrackKey {
    /// The whole value of a single cell.
    Value,
    /// A named property.
    Prop(Rc<str>),
    /// An array index.
    Index(usize),
    /// An array's length.
    Length,
    /// The key set of a collection, read by iteration.
    Iterate,
}

impl TrackKey {
    /// Shorthand for [`TrackKey::Prop`].
    pub fn prop(name: &str) -> Self {
        Self::Prop(Rc::from(name))
    }
}

impl fmt::Display for TrackKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value => f.write_str("value"),
            Self::Prop(name) => write!(f, ".{name}"),
            Self::Index(i) => write!(f, "[{i}]"),
            Self::Length => f.write_str("length"),
            Self::Iterate => f.write_str("<iterate>"),
        }
    }
}

/// The kind of access reported to tracking and triggering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpType {
    /// A key was read.
    Get,
    /// A key's presence was tested.
    Has,
    /// The key set was iterated.
    Iterate,
    /// An existing key was overwritten.
    Set,
    /// A new key was added.
    Add,
    /// A key was removed.
    Delete,
    /// Every key was removed.
    Clear,
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Get => "get",
            Self::Has => "has",
            Self::Iterate => "iterate",
            Self::Set => "set",
            Self::Add => "add",
            Self::Delete => "delete",
            Self::Clear => "clear",
        };
        f.write_str(name)
    }
}

/// The concrete type of an effect unit.
///
/// The variant order is the drain order: memos are invalidated before plain
/// effects run, and watchers run last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EffectKind {
    /// A lazily recomputed derived value.
    Memo,
    /// A fire-and-forget side effect.
    Effect,
    /// A source-diffing watcher.
    Watcher,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_ids_are_unique() {
        let a = ContextId::new();
        let b = ContextId::new();
        assert_ne!(a, b);
        assert!(a < b);
    }

    #[test]
    fn target_ids_keep_their_kind() {
        let t = TargetId::new(TargetKind::Array);
        assert_eq!(t.kind(), TargetKind::Array);
        assert_ne!(t, TargetId::new(TargetKind::Array));
    }

    #[test]
    fn effect_kinds_sort_in_drain_order() {
        let mut kinds = vec![EffectKind::Watcher, EffectKind::Effect, EffectKind::Memo];
        kinds.sort();
        assert_eq!(kinds, vec![EffectKind::Memo, EffectKind::Effect, EffectKind::Watcher]);
    }

    #[test]
    fn keys_display_readably() {
        assert_eq!(TrackKey::prop("name").to_string(), ".name");
        assert_eq!(TrackKey::Index(3).to_string(), "[3]");
        assert_eq!(OpType::Delete.to_string(), "delete");
    }
}
