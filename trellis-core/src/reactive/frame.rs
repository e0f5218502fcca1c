//! Tracking Frames
//!
//! A tracking frame records which effect is currently executing, and in
//! which execution context. When observed state is read, the tracking table
//! attributes the read to the innermost frame.
//!
//! # Implementation
//!
//! We use a thread-local stack of frames. Running an effect pushes a frame
//! and the returned guard pops it, so the stack stays balanced even if the
//! effect panics. [`untracked`] pushes a paused frame that hides every outer
//! frame for the duration of a closure.
//!
//! The stack supports nesting: a memo recomputed while an effect reads it
//! pushes its own frame on top of the effect's.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use super::context::ContextInner;
use super::EffectId;

thread_local! {
    static FRAME_STACK: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

/// An entry in the frame stack.
#[derive(Clone)]
enum Frame {
    /// An effect is running inside a context.
    Tracking {
        context: Weak<ContextInner>,
        effect: EffectId,
    },
    /// Tracking is paused until this frame is popped.
    Paused,
}

/// Guard that pops its frame when dropped.
pub(crate) struct FrameGuard {
    effect: Option<EffectId>,
}

impl FrameGuard {
    /// Enter a tracking frame for `effect` running in `context`.
    pub(crate) fn enter(context: &Rc<ContextInner>, effect: EffectId) -> Self {
        FRAME_STACK.with(|stack| {
            stack.borrow_mut().push(Frame::Tracking {
                context: Rc::downgrade(context),
                effect,
            });
        });
        Self {
            effect: Some(effect),
        }
    }

    /// Enter a paused frame.
    pub(crate) fn paused() -> Self {
        FRAME_STACK.with(|stack| stack.borrow_mut().push(Frame::Paused));
        Self { effect: None }
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        let _ = FRAME_STACK.try_with(|stack| {
            let popped = stack.borrow_mut().pop();

            if let Some(Frame::Tracking { effect, .. }) = popped {
                debug_assert_eq!(
                    Some(effect),
                    self.effect,
                    "tracking frame mismatch: expected {:?}, got {:?}",
                    self.effect,
                    effect
                );
            }
        });
    }
}

/// The context and effect that the next read should be attributed to.
///
/// Returns `None` when no effect is running, when tracking is paused, or when
/// the running effect's context has already been dropped.
pub(crate) fn current() -> Option<(Rc<ContextInner>, EffectId)> {
    FRAME_STACK.with(|stack| match stack.borrow().last() {
        Some(Frame::Tracking { context, effect }) => context.upgrade().map(|ctx| (ctx, *effect)),
        _ => None,
    })
}

/// Check whether reads would currently be tracked.
pub fn is_tracking() -> bool {
    FRAME_STACK.with(|stack| matches!(stack.borrow().last(), Some(Frame::Tracking { .. })))
}

/// Run `f` without tracking any reads it performs.
///
/// ```rust
/// use trellis_core::reactive::{untracked, is_tracking};
///
/// assert!(!untracked(is_tracking));
/// ```
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let _paused = FrameGuard::paused();
    f()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paused_frame_hides_tracking() {
        assert!(!is_tracking());
        {
            let _paused = FrameGuard::paused();
            assert!(!is_tracking());
            assert!(current().is_none());
        }
        assert!(!is_tracking());
    }

    #[test]
    fn untracked_returns_closure_result() {
        assert_eq!(untracked(|| 41 + 1), 42);
    }
}
