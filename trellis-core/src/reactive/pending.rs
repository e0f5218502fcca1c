//! Pending effect set of one execution context.
//!
//! Ids are bucketed by kind and flush phase and kept sorted, so a drain can
//! always pick the lowest pending id of the highest-priority bucket: memos
//! first, then plain effects, then watchers.

use std::collections::{BTreeSet, HashSet};

use super::effect::RunReason;
use super::{EffectId, EffectKind};
use crate::scheduler::FlushPhase;

#[derive(Debug, Default)]
struct PhaseBucket {
    effects: BTreeSet<EffectId>,
    watchers: BTreeSet<EffectId>,
}

#[derive(Debug, Default)]
pub(crate) struct PendingSet {
    memos: BTreeSet<EffectId>,
    phases: [PhaseBucket; FlushPhase::COUNT],
    /// Watchers that skip their value diff on the next run.
    forced: HashSet<EffectId>,
    /// Ids queued by a direct mutation rather than only by a memo.
    confirmed: HashSet<EffectId>,
}

impl PendingSet {
    pub(crate) fn insert(
        &mut self,
        id: EffectId,
        kind: EffectKind,
        phase: FlushPhase,
        force: bool,
        confirmed: bool,
    ) {
        let bucket = &mut self.phases[phase.index()];
        match kind {
            EffectKind::Memo => self.memos.insert(id),
            EffectKind::Effect => bucket.effects.insert(id),
            EffectKind::Watcher => bucket.watchers.insert(id),
        };
        if force {
            self.forced.insert(id);
        }
        if confirmed || force {
            self.confirmed.insert(id);
        }
    }

    pub(crate) fn remove(&mut self, id: EffectId) {
        self.memos.remove(&id);
        for bucket in &mut self.phases {
            bucket.effects.remove(&id);
            bucket.watchers.remove(&id);
        }
        self.forced.remove(&id);
        self.confirmed.remove(&id);
    }

    /// Take the next memo, skipping ids for which `busy` holds.
    pub(crate) fn take_memo(&mut self, busy: impl Fn(EffectId) -> bool) -> Option<EffectId> {
        let id = self.memos.iter().copied().find(|id| !busy(*id))?;
        self.memos.remove(&id);
        self.confirmed.remove(&id);
        self.forced.remove(&id);
        Some(id)
    }

    /// Take the next id to run from `phase`, or from every phase if `None`.
    pub(crate) fn take_next(
        &mut self,
        phase: Option<FlushPhase>,
        busy: impl Fn(EffectId) -> bool,
    ) -> Option<(EffectId, RunReason)> {
        if let Some(id) = self.take_memo(&busy) {
            return Some((id, RunReason::Triggered));
        }

        let range = match phase {
            Some(phase) => phase.index()..phase.index() + 1,
            None => 0..FlushPhase::COUNT,
        };

        let found = self.phases[range.clone()]
            .iter()
            .find_map(|bucket| bucket.effects.iter().copied().find(|id| !busy(*id)))
            .or_else(|| {
                self.phases[range]
                    .iter()
                    .find_map(|bucket| bucket.watchers.iter().copied().find(|id| !busy(*id)))
            })?;

        let reason = if self.forced.contains(&found) {
            RunReason::Forced
        } else if self.confirmed.contains(&found) {
            RunReason::Triggered
        } else {
            RunReason::MaybeStale
        };
        self.remove(found);
        Some((found, reason))
    }

    pub(crate) fn has_memos(&self) -> bool {
        !self.memos.is_empty()
    }

    pub(crate) fn has_phase(&self, phase: FlushPhase) -> bool {
        let bucket = &self.phases[phase.index()];
        !bucket.effects.is_empty() || !bucket.watchers.is_empty()
    }

    pub(crate) fn is_empty(&self) -> bool {
        !self.has_memos() && FlushPhase::ALL.iter().all(|phase| !self.has_phase(*phase))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: usize) -> EffectId {
        EffectId::from_index(n)
    }

    #[test]
    fn memos_then_effects_then_watchers() {
        let mut pending = PendingSet::default();
        pending.insert(id(1), EffectKind::Watcher, FlushPhase::Pre, false, true);
        pending.insert(id(5), EffectKind::Effect, FlushPhase::Pre, false, true);
        pending.insert(id(3), EffectKind::Effect, FlushPhase::Pre, false, true);
        pending.insert(id(9), EffectKind::Memo, FlushPhase::Pre, false, true);

        let order: Vec<_> = std::iter::from_fn(|| pending.take_next(None, |_| false))
            .map(|(id, _)| id.index())
            .collect();
        assert_eq!(order, vec![9, 3, 5, 1]);
        assert!(pending.is_empty());
    }

    #[test]
    fn reason_reflects_how_an_id_was_queued() {
        let mut pending = PendingSet::default();
        pending.insert(id(0), EffectKind::Effect, FlushPhase::Pre, false, false);
        pending.insert(id(1), EffectKind::Effect, FlushPhase::Pre, false, true);
        pending.insert(id(2), EffectKind::Watcher, FlushPhase::Pre, true, false);

        assert_eq!(pending.take_next(None, |_| false), Some((id(0), RunReason::MaybeStale)));
        assert_eq!(pending.take_next(None, |_| false), Some((id(1), RunReason::Triggered)));
        assert_eq!(pending.take_next(None, |_| false), Some((id(2), RunReason::Forced)));
    }

    #[test]
    fn confirmation_survives_a_later_soft_insert() {
        let mut pending = PendingSet::default();
        pending.insert(id(4), EffectKind::Effect, FlushPhase::Pre, false, true);
        pending.insert(id(4), EffectKind::Effect, FlushPhase::Pre, false, false);

        assert_eq!(pending.take_next(None, |_| false), Some((id(4), RunReason::Triggered)));
    }

    #[test]
    fn busy_ids_stay_pending() {
        let mut pending = PendingSet::default();
        pending.insert(id(0), EffectKind::Effect, FlushPhase::Pre, false, true);

        assert_eq!(pending.take_next(None, |i| i == id(0)), None);
        assert!(!pending.is_empty());
    }

    #[test]
    fn phase_filter_leaves_other_phases() {
        let mut pending = PendingSet::default();
        pending.insert(id(0), EffectKind::Effect, FlushPhase::Post, false, true);
        pending.insert(id(1), EffectKind::Effect, FlushPhase::Pre, false, true);

        assert_eq!(
            pending.take_next(Some(FlushPhase::Post), |_| false).map(|(id, _)| id),
            Some(id(0))
        );
        assert_eq!(pending.take_next(Some(FlushPhase::Post), |_| false), None);
        assert!(pending.has_phase(FlushPhase::Pre));
    }
}
