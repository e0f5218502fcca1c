//! Host-Synchronized Scheduling
//!
//! Local execution contexts do not run triggered effects right away. They
//! hand them to a [`Scheduler`], which queues them by [`FlushPhase`] and
//! releases each queue when the rendering host reaches the matching
//! checkpoint of its commit.
//!
//! # Modes
//!
//! The scheduler is either in `Auto` mode (no host cycle outstanding) or in
//! `Manual` mode (a cycle has been requested and not yet finished). The first
//! mutation in `Auto` requests one host cycle and flips to `Manual`; the
//! scheduler only returns to `Auto` once the host reports a finished cycle
//! with every queue empty. [`Scheduler::next_tick`] lets callers await that
//! moment.

mod phase;
mod queue;
mod tick;

pub use phase::{FlushPhase, SchedulerMode};
pub use queue::{Job, JobId, Scheduler};
pub use tick::NextTick;
