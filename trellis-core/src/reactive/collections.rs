//! Observed Collections
//!
//! Keyed and indexed containers that report reads and writes per key, so an
//! effect only re-runs when a key it actually read changes.
//!
//! - [`ObservedMap`] reads track the property (or its presence); iteration
//!   tracks the key set. Adding or deleting a key invalidates iteration. A
//!   map created with [`ObservedMap::collection`] also invalidates iteration
//!   when a value is overwritten.
//! - [`ObservedVec`] reads track the index or the length. Shrinking the
//!   array invalidates the length and every index past the new end.

use std::cell::RefCell;
use std::fmt::{self, Debug};
use std::rc::Rc;

use indexmap::IndexMap;
use tracing::warn;

use crate::error::ReactiveError;

use super::tracking::{self, TriggerValues};
use super::{OpType, TargetId, TargetKind, TrackKey};

struct Observed<C> {
    target: TargetId,
    data: RefCell<C>,
}

impl<C> Drop for Observed<C> {
    fn drop(&mut self) {
        tracking::forget_target(self.target);
    }
}

fn reject_write(target: TargetId) {
    warn!("{}", ReactiveError::ReadonlyViolation { target });
}

/// A reactive string-keyed map.
///
/// Cloning creates another handle to the same map.
///
/// # Example
///
/// ```rust
/// use std::cell::Cell;
/// use std::rc::Rc;
/// use trellis_core::reactive::{Context, ObservedMap};
///
/// let ctx = Context::immediate();
/// let map = ObservedMap::new();
/// let present = Rc::new(Cell::new(false));
///
/// let (m, p) = (map.clone(), present.clone());
/// ctx.effect(move |_| p.set(m.contains_key("a")));
///
/// map.insert("a".to_string(), 1);
/// assert!(present.get());
/// ```
pub struct ObservedMap<V> {
    inner: Rc<Observed<IndexMap<String, V>>>,
    readonly: bool,
}

impl<V> ObservedMap<V>
where
    V: Clone + PartialEq + Debug + 'static,
{
    fn with_kind(kind: TargetKind) -> Self {
        Self {
            inner: Rc::new(Observed {
                target: TargetId::new(kind),
                data: RefCell::new(IndexMap::new()),
            }),
            readonly: false,
        }
    }

    /// An empty map with plain-object semantics.
    pub fn new() -> Self {
        Self::with_kind(TargetKind::Object)
    }

    /// An empty map whose iteration also depends on every value.
    pub fn collection() -> Self {
        Self::with_kind(TargetKind::Collection)
    }

    /// The map's identity as an observed target.
    pub fn id(&self) -> TargetId {
        self.inner.target
    }

    /// Get the value of `key`, tracking the read.
    pub fn get(&self, key: &str) -> Option<V> {
        tracking::track(self.inner.target, TrackKey::prop(key), OpType::Get);
        self.inner.data.borrow().get(key).cloned()
    }

    /// Whether `key` is present, tracking the presence test.
    pub fn contains_key(&self, key: &str) -> bool {
        tracking::track(self.inner.target, TrackKey::prop(key), OpType::Has);
        self.inner.data.borrow().contains_key(key)
    }

    /// The keys in insertion order, tracking iteration.
    pub fn keys(&self) -> Vec<String> {
        tracking::track(self.inner.target, TrackKey::Iterate, OpType::Iterate);
        self.keys_untracked()
    }

    /// The keys in insertion order, without tracking.
    pub fn keys_untracked(&self) -> Vec<String> {
        self.inner.data.borrow().keys().cloned().collect()
    }

    /// Every entry, tracking iteration and each value.
    pub fn entries(&self) -> Vec<(String, V)> {
        tracking::track(self.inner.target, TrackKey::Iterate, OpType::Iterate);
        let entries: Vec<(String, V)> = self
            .inner
            .data
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (key, _) in &entries {
            tracking::track(self.inner.target, TrackKey::prop(key), OpType::Get);
        }
        entries
    }

    /// Number of entries, tracking iteration.
    pub fn len(&self) -> usize {
        tracking::track(self.inner.target, TrackKey::Iterate, OpType::Iterate);
        self.inner.data.borrow().len()
    }

    /// Whether the map is empty, tracking iteration.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert or overwrite `key`. Writing an equal value is a no-op.
    pub fn insert(&self, key: String, value: V) {
        if self.readonly {
            return reject_write(self.inner.target);
        }

        let old = {
            let mut data = self.inner.data.borrow_mut();
            match data.get_mut(&key) {
                Some(slot) if *slot == value => return,
                Some(slot) => Some(std::mem::replace(slot, value.clone())),
                None => {
                    data.insert(key.clone(), value.clone());
                    None
                }
            }
        };

        let op = if old.is_some() { OpType::Set } else { OpType::Add };
        tracking::trigger(
            self.inner.target,
            TrackKey::prop(&key),
            op,
            TriggerValues::new(old.as_ref().map(|v| v as &dyn Debug), Some(&value)),
        );
    }

    /// Remove `key`, returning its value if it was present.
    pub fn remove(&self, key: &str) -> Option<V> {
        if self.readonly {
            reject_write(self.inner.target);
            return None;
        }

        let old = self.inner.data.borrow_mut().shift_remove(key)?;
        tracking::trigger(
            self.inner.target,
            TrackKey::prop(key),
            OpType::Delete,
            TriggerValues::new(Some(&old), None),
        );
        Some(old)
    }

    /// Remove every entry.
    pub fn clear(&self) {
        if self.readonly {
            return reject_write(self.inner.target);
        }

        let was_empty = {
            let mut data = self.inner.data.borrow_mut();
            let was_empty = data.is_empty();
            data.clear();
            was_empty
        };
        if !was_empty {
            tracking::trigger(self.inner.target, TrackKey::Iterate, OpType::Clear, TriggerValues::none());
        }
    }

    /// A handle to the same map that rejects writes.
    pub fn readonly(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
            readonly: true,
        }
    }

    /// Whether writes through this handle are rejected.
    pub fn is_readonly(&self) -> bool {
        self.readonly
    }
}

impl<V> Default for ObservedMap<V>
where
    V: Clone + PartialEq + Debug + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Clone for ObservedMap<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
            readonly: self.readonly,
        }
    }
}

impl<V: Debug> Debug for ObservedMap<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservedMap")
            .field("target", &self.inner.target)
            .field("entries", &*self.inner.data.borrow())
            .field("readonly", &self.readonly)
            .finish()
    }
}

/// A reactive array.
///
/// Cloning creates another handle to the same array.
pub struct ObservedVec<T> {
    inner: Rc<Observed<Vec<T>>>,
    readonly: bool,
}

impl<T> ObservedVec<T>
where
    T: Clone + PartialEq + Debug + 'static,
{
    /// Wrap `items` in a reactive array.
    pub fn new(items: Vec<T>) -> Self {
        Self {
            inner: Rc::new(Observed {
                target: TargetId::new(TargetKind::Array),
                data: RefCell::new(items),
            }),
            readonly: false,
        }
    }

    /// The array's identity as an observed target.
    pub fn id(&self) -> TargetId {
        self.inner.target
    }

    /// Get the item at `index`, tracking the read.
    pub fn get(&self, index: usize) -> Option<T> {
        tracking::track(self.inner.target, TrackKey::Index(index), OpType::Get);
        self.inner.data.borrow().get(index).cloned()
    }

    /// The length, tracking it.
    pub fn len(&self) -> usize {
        tracking::track(self.inner.target, TrackKey::Length, OpType::Get);
        self.inner.data.borrow().len()
    }

    /// Whether the array is empty, tracking the length.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy the items out, tracking the length and every index.
    pub fn to_vec(&self) -> Vec<T> {
        let items = self.inner.data.borrow().clone();
        tracking::track(self.inner.target, TrackKey::Length, OpType::Get);
        for index in 0..items.len() {
            tracking::track(self.inner.target, TrackKey::Index(index), OpType::Get);
        }
        items
    }

    /// Overwrite the item at `index`.
    ///
    /// Out-of-range writes are ignored with a warning; use [`push`](Self::push)
    /// to grow the array.
    pub fn set(&self, index: usize, value: T) {
        if self.readonly {
            return reject_write(self.inner.target);
        }

        let old = {
            let mut data = self.inner.data.borrow_mut();
            let len = data.len();
            let Some(slot) = data.get_mut(index) else {
                warn!(target_id = %self.inner.target, index, len, "array write out of range ignored");
                return;
            };
            if *slot == value {
                return;
            }
            std::mem::replace(slot, value.clone())
        };

        tracking::trigger(
            self.inner.target,
            TrackKey::Index(index),
            OpType::Set,
            TriggerValues::new(Some(&old), Some(&value)),
        );
    }

    /// Append an item.
    pub fn push(&self, value: T) {
        if self.readonly {
            return reject_write(self.inner.target);
        }

        let index = {
            let mut data = self.inner.data.borrow_mut();
            data.push(value.clone());
            data.len() - 1
        };
        tracking::trigger(
            self.inner.target,
            TrackKey::Index(index),
            OpType::Add,
            TriggerValues::new(None, Some(&value)),
        );
    }

    /// Remove and return the last item.
    pub fn pop(&self) -> Option<T> {
        if self.readonly {
            reject_write(self.inner.target);
            return None;
        }

        let (item, len) = {
            let mut data = self.inner.data.borrow_mut();
            let item = data.pop()?;
            (item, data.len())
        };
        tracking::trigger_length(self.inner.target, len, len + 1);
        Some(item)
    }

    /// Shorten the array to `len` items. Longer lengths are a no-op.
    pub fn truncate(&self, len: usize) {
        if self.readonly {
            return reject_write(self.inner.target);
        }

        let old_len = {
            let mut data = self.inner.data.borrow_mut();
            let old_len = data.len();
            data.truncate(len);
            old_len
        };
        if len < old_len {
            tracking::trigger_length(self.inner.target, len, old_len);
        }
    }

    /// Remove every item.
    pub fn clear(&self) {
        if self.readonly {
            return reject_write(self.inner.target);
        }

        let was_empty = {
            let mut data = self.inner.data.borrow_mut();
            let was_empty = data.is_empty();
            data.clear();
            was_empty
        };
        if !was_empty {
            tracking::trigger(self.inner.target, TrackKey::Length, OpType::Clear, TriggerValues::none());
        }
    }

    /// A handle to the same array that rejects writes.
    pub fn readonly(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
            readonly: true,
        }
    }
}

impl<T> Clone for ObservedVec<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
            readonly: self.readonly,
        }
    }
}

impl<T: Debug> Debug for ObservedVec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservedVec")
            .field("target", &self.inner.target)
            .field("items", &*self.inner.data.borrow())
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

    fn counting(ctx: &Context, read: impl Fn() + 'static) -> Rc<Cell<u32>> {
        let runs = Rc::new(Cell::new(0));
        let r = runs.clone();
        ctx.effect(move |_| {
            read();
            r.set(r.get() + 1);
        });
        runs
    }

    #[test]
    fn presence_toggling() {
        let ctx = Context::immediate();
        let map: ObservedMap<i32> = ObservedMap::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let (m, s) = (map.clone(), seen.clone());
        ctx.effect(move |_| s.borrow_mut().push(m.contains_key("a")));

        map.insert("a".into(), 1);
        map.insert("b".into(), 2);
        map.remove("a");
        map.remove("a");

        assert_eq!(*seen.borrow(), vec![false, true, false]);
    }

    #[test]
    fn overwriting_a_value_leaves_object_iteration_alone() {
        let ctx = Context::immediate();
        let map = ObservedMap::new();
        map.insert("a".into(), 1);

        let m = map.clone();
        let runs = counting(&ctx, move || {
            m.keys();
        });

        map.insert("a".into(), 2);
        assert_eq!(runs.get(), 1);
        map.insert("b".into(), 1);
        assert_eq!(runs.get(), 2);
        map.remove("a");
        assert_eq!(runs.get(), 3);
    }

    #[test]
    fn collection_iteration_sees_overwrites() {
        let ctx = Context::immediate();
        let map = ObservedMap::collection();
        map.insert("a".into(), 1);

        let m = map.clone();
        let runs = counting(&ctx, move || {
            m.len();
        });

        map.insert("a".into(), 2);
        assert_eq!(runs.get(), 2);
        map.insert("a".into(), 2);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn clear_notifies_every_reader() {
        let ctx = Context::immediate();
        let map = ObservedMap::new();
        map.insert("a".into(), 1);

        let m = map.clone();
        let runs = counting(&ctx, move || {
            m.get("a");
        });

        map.clear();
        assert_eq!(runs.get(), 2);
        map.clear();
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn readonly_map_rejects_writes() {
        let map = ObservedMap::new();
        map.insert("a".into(), 1);
        let view = map.readonly();

        view.insert("a".into(), 5);
        assert_eq!(view.remove("a"), None);
        view.clear();

        assert_eq!(map.get("a"), Some(1));
        assert!(view.is_readonly());
    }

    #[test]
    fn push_notifies_length_readers() {
        let ctx = Context::immediate();
        let list = ObservedVec::new(vec![1, 2]);

        let l = list.clone();
        let length_runs = counting(&ctx, move || {
            l.len();
        });
        let l = list.clone();
        let first_runs = counting(&ctx, move || {
            l.get(0);
        });

        list.push(3);
        assert_eq!(length_runs.get(), 2);
        assert_eq!(first_runs.get(), 1);
    }

    #[test]
    fn truncate_notifies_indices_past_the_end() {
        let ctx = Context::immediate();
        let list = ObservedVec::new(vec![1, 2, 3, 4]);

        let l = list.clone();
        let low = counting(&ctx, move || {
            l.get(1);
        });
        let l = list.clone();
        let high = counting(&ctx, move || {
            l.get(3);
        });

        list.truncate(2);
        assert_eq!((low.get(), high.get()), (1, 2));

        list.pop();
        assert_eq!((low.get(), high.get()), (2, 3));
        assert_eq!(list.to_vec(), vec![1]);
    }

    #[test]
    fn out_of_range_set_is_ignored() {
        let list = ObservedVec::new(vec![1]);
        list.set(5, 9);
        assert_eq!(list.to_vec(), vec![1]);
    }

    #[test]
    fn equal_writes_do_not_notify() {
        let ctx = Context::immediate();
        let list = ObservedVec::new(vec![7]);

        let l = list.clone();
        let runs = counting(&ctx, move || {
            l.get(0);
        });

        list.set(0, 7);
        assert_eq!(runs.get(), 1);
        list.set(0, 8);
        assert_eq!(runs.get(), 2);
    }
}
