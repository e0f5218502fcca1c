//! Host Contract
//!
//! The rendering host owns the commit lifecycle. The engine needs two things
//! from it: a way to request a render for a context ([`Host`]), and a place to
//! hang per-checkpoint callbacks during each pass ([`CheckpointRegistry`]).
//!
//! [`CommitRegistry`] is a minimal registry that runs checkpoints the way a
//! tree-shaped host does: before-commit checkpoints parent first, after-commit
//! checkpoints child first.

use std::fmt;

use crate::reactive::ContextId;
use crate::scheduler::FlushPhase;

/// The rendering host, as seen by the scheduler.
pub trait Host {
    /// Schedule a render pass that includes `context`.
    fn request_render(&self, context: ContextId);
}

impl<F> Host for F
where
    F: Fn(ContextId),
{
    fn request_render(&self, context: ContextId) {
        self(context)
    }
}

/// A point in the host's commit at which the engine gets control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostCheckpoint {
    /// Before the commit.
    Pre,
    /// Start of the commit.
    Sync,
    /// Output insertion.
    Insertion,
    /// Layout.
    Layout,
    /// After the commit.
    Post,
    /// The instance is being removed.
    Unmount,
}

impl HostCheckpoint {
    const COUNT: usize = 6;

    /// Checkpoints of one commit, in order. `Unmount` is not part of a commit.
    pub const COMMIT: [HostCheckpoint; 5] = [
        HostCheckpoint::Pre,
        HostCheckpoint::Sync,
        HostCheckpoint::Insertion,
        HostCheckpoint::Layout,
        HostCheckpoint::Post,
    ];

    fn index(self) -> usize {
        self as usize
    }

    /// Whether callbacks at this checkpoint run child first.
    pub fn is_child_first(self) -> bool {
        !matches!(self, HostCheckpoint::Pre | HostCheckpoint::Sync)
    }
}

impl From<FlushPhase> for HostCheckpoint {
    fn from(phase: FlushPhase) -> Self {
        match phase {
            FlushPhase::Pre => HostCheckpoint::Pre,
            FlushPhase::Sync => HostCheckpoint::Sync,
            FlushPhase::Insertion => HostCheckpoint::Insertion,
            FlushPhase::Layout => HostCheckpoint::Layout,
            FlushPhase::Post => HostCheckpoint::Post,
        }
    }
}

/// Receives the callbacks a context wants run at host checkpoints.
pub trait CheckpointRegistry {
    /// Register `callback` to run once at `checkpoint`.
    fn register(&mut self, checkpoint: HostCheckpoint, callback: Box<dyn FnOnce()>);
}

/// Collects checkpoint callbacks for one pass over a context tree.
///
/// Contexts must register in tree order (parent before child).
#[derive(Default)]
pub struct CommitRegistry {
    callbacks: [Vec<Box<dyn FnOnce()>>; HostCheckpoint::COUNT],
}

impl CommitRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run and discard the callbacks registered for `checkpoint`.
    pub fn run(&mut self, checkpoint: HostCheckpoint) {
        let callbacks = std::mem::take(&mut self.callbacks[checkpoint.index()]);
        if checkpoint.is_child_first() {
            callbacks.into_iter().rev().for_each(|callback| callback());
        } else {
            callbacks.into_iter().for_each(|callback| callback());
        }
    }

    /// Run every commit checkpoint in order, leaving `Unmount` callbacks.
    pub fn run_commit(&mut self) {
        for checkpoint in HostCheckpoint::COMMIT {
            self.run(checkpoint);
        }
    }

    /// Number of callbacks waiting at `checkpoint`.
    pub fn len(&self, checkpoint: HostCheckpoint) -> usize {
        self.callbacks[checkpoint.index()].len()
    }

    /// Whether no callbacks are waiting at all.
    pub fn is_empty(&self) -> bool {
        self.callbacks.iter().all(Vec::is_empty)
    }
}

impl CheckpointRegistry for CommitRegistry {
    fn register(&mut self, checkpoint: HostCheckpoint, callback: Box<dyn FnOnce()>) {
        self.callbacks[checkpoint.index()].push(callback);
    }
}

impl fmt::Debug for CommitRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommitRegistry")
            .field(
                "callbacks",
                &self.callbacks.iter().map(Vec::len).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn after_checkpoints_run_child_first() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut registry = CommitRegistry::new();

        for name in ["parent", "child"] {
            let (pre, post) = (log.clone(), log.clone());
            registry.register(
                HostCheckpoint::Pre,
                Box::new(move || pre.borrow_mut().push(format!("pre:{name}"))),
            );
            registry.register(
                HostCheckpoint::Post,
                Box::new(move || post.borrow_mut().push(format!("post:{name}"))),
            );
        }

        registry.run_commit();
        assert_eq!(
            *log.borrow(),
            vec!["pre:parent", "pre:child", "post:child", "post:parent"]
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn unmount_is_not_part_of_the_commit() {
        let ran = Rc::new(RefCell::new(false));
        let mut registry = CommitRegistry::new();
        let r = ran.clone();
        registry.register(HostCheckpoint::Unmount, Box::new(move || *r.borrow_mut() = true));

        registry.run_commit();
        assert!(!*ran.borrow());
        assert_eq!(registry.len(HostCheckpoint::Unmount), 1);

        registry.run(HostCheckpoint::Unmount);
        assert!(*ran.borrow());
    }

    #[test]
    fn phases_map_onto_checkpoints() {
        assert_eq!(HostCheckpoint::from(FlushPhase::Layout), HostCheckpoint::Layout);
        assert!(!HostCheckpoint::Sync.is_child_first());
        assert!(HostCheckpoint::Insertion.is_child_first());
    }
}
