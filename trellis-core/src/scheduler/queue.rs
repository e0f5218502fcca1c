//! Phase Queues
//!
//! The scheduler keeps one ordered job queue per flush phase and decides when
//! a mutation has to ask the host for a new render cycle.
//!
//! # Algorithm
//!
//! 1. Every local context registers once and receives a monotonically
//!    increasing position. Jobs are keyed by `(position, sequence)`, so jobs
//!    of earlier-registered contexts drain first and jobs of the same context
//!    keep their queueing order.
//!
//! 2. A job is queued at most once per phase; queueing it again returns the
//!    position it already holds.
//!
//! 3. A mutation in `Auto` mode flips the scheduler to `Manual` and requests
//!    exactly one host cycle. Further mutations only append to the queues.
//!
//! 4. At each checkpoint the host drains one phase up to a position. Jobs
//!    appended to that phase during the drain are included before the drain
//!    returns; jobs appended to other phases wait for their own checkpoint.
//!
//! 5. When the host reports the cycle finished and nothing is left, the
//!    scheduler returns to `Auto` and resolves every [`NextTick`].

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexSet;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::config::ReactiveConfig;
use crate::host::Host;
use crate::reactive::ContextId;

use super::{FlushPhase, NextTick, SchedulerMode};

/// Identity of a job, used to keep a job queued at most once per phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(u64);

impl JobId {
    /// Allocate a fresh job id.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

/// A unit of queued work.
#[derive(Clone)]
pub struct Job {
    id: JobId,
    position: Option<u64>,
    owner: Option<ContextId>,
    run: Rc<dyn Fn()>,
}

impl Job {
    /// Create a job with a fresh id and no position.
    ///
    /// A job without a position is placed after every context registered so
    /// far when it is queued.
    pub fn new(run: impl Fn() + 'static) -> Self {
        Self {
            id: JobId::new(),
            position: None,
            owner: None,
            run: Rc::new(run),
        }
    }

    /// Reuse an existing id, so that queueing this job again is deduplicated.
    pub fn with_id(mut self, id: JobId) -> Self {
        self.id = id;
        self
    }

    /// Place the job at a registered position.
    pub fn at(mut self, position: u64) -> Self {
        self.position = Some(position);
        self
    }

    /// Attribute the job to a context, which gets a re-render request if the
    /// job is still queued when a cycle finishes.
    pub fn owned_by(mut self, owner: ContextId) -> Self {
        self.owner = Some(owner);
        self
    }

    /// The job's id.
    pub fn id(&self) -> JobId {
        self.id
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("position", &self.position)
            .field("owner", &self.owner)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct JobKey {
    position: u64,
    seq: u64,
}

#[derive(Default)]
struct PhaseQueue {
    jobs: BTreeMap<JobKey, Job>,
    index: HashMap<JobId, JobKey>,
}

impl PhaseQueue {
    fn insert(&mut self, key: JobKey, job: Job) -> u64 {
        if let Some(existing) = self.index.get(&job.id) {
            return existing.position;
        }
        self.index.insert(job.id, key);
        self.jobs.insert(key, job);
        key.position
    }

    /// Remove the first job at or before `until`, or appended since `since`.
    fn pop_until(&mut self, until: u64, since: u64) -> Option<Job> {
        let key = *self
            .jobs
            .keys()
            .find(|key| key.position <= until || key.seq >= since)?;
        let job = self.jobs.remove(&key)?;
        self.index.remove(&job.id);
        Some(job)
    }
}

struct SchedulerState {
    mode: SchedulerMode,
    queues: [PhaseQueue; FlushPhase::COUNT],
    next_position: u64,
    next_seq: u64,
    /// Contexts whose render output is stale.
    dirty: IndexSet<ContextId>,
    tick_waiters: Vec<oneshot::Sender<()>>,
    /// Consecutive cycles that finished with work left over.
    cycles: u32,
}

impl SchedulerState {
    fn is_idle(&self) -> bool {
        self.dirty.is_empty() && self.queues.iter().all(|q| q.jobs.is_empty())
    }
}

/// Host-synchronized job scheduler.
///
/// Cloning a scheduler creates another handle to the same queues.
#[derive(Clone)]
pub struct Scheduler {
    host: Rc<dyn Host>,
    config: ReactiveConfig,
    state: Rc<RefCell<SchedulerState>>,
}

impl Scheduler {
    /// Create a scheduler that requests render cycles from `host`.
    pub fn new(host: impl Host + 'static) -> Self {
        Self::with_config(host, ReactiveConfig::default())
    }

    /// Create a scheduler with explicit configuration.
    pub fn with_config(host: impl Host + 'static, config: ReactiveConfig) -> Self {
        Self {
            host: Rc::new(host),
            config,
            state: Rc::new(RefCell::new(SchedulerState {
                mode: SchedulerMode::Auto,
                queues: Default::default(),
                next_position: 0,
                next_seq: 0,
                dirty: IndexSet::new(),
                tick_waiters: Vec::new(),
                cycles: 0,
            })),
        }
    }

    /// The scheduler's configuration.
    pub fn config(&self) -> &ReactiveConfig {
        &self.config
    }

    /// Hand out the next registration position.
    pub fn register_context(&self) -> u64 {
        let mut state = self.state.borrow_mut();
        let position = state.next_position;
        state.next_position += 1;
        position
    }

    /// Queue a job for the `Pre` checkpoint.
    pub fn queue_job(&self, job: Job) -> u64 {
        self.queue_phase_job(FlushPhase::Pre, job)
    }

    /// Queue a job for the `Post` checkpoint.
    pub fn queue_post_flush_cb(&self, job: Job) -> u64 {
        self.queue_phase_job(FlushPhase::Post, job)
    }

    /// Queue a job for `phase`, returning its position.
    ///
    /// A job that is already queued for this phase keeps its place.
    pub fn queue_phase_job(&self, phase: FlushPhase, job: Job) -> u64 {
        let mut state = self.state.borrow_mut();
        let position = match job.position {
            Some(position) => position,
            None => {
                let position = state.next_position;
                state.next_position += 1;
                position
            }
        };
        let seq = state.next_seq;
        state.next_seq += 1;

        trace!(%phase, job = ?job.id, position, "queue job");
        state.queues[phase.index()].insert(JobKey { position, seq }, job)
    }

    /// Drain the `Pre` queue up to and including `position`.
    pub fn flush_jobs_until(&self, position: u64) -> usize {
        self.flush_phase_until(FlushPhase::Pre, position)
    }

    /// Drain the `Post` queue up to and including `position`.
    pub fn flush_post_jobs_until(&self, position: u64) -> usize {
        self.flush_phase_until(FlushPhase::Post, position)
    }

    /// Drain `phase` up to and including `position`, in ascending order.
    ///
    /// Jobs appended to `phase` while draining run before this returns.
    /// Returns how many jobs ran.
    pub fn flush_phase_until(&self, phase: FlushPhase, position: u64) -> usize {
        let since = self.state.borrow().next_seq;
        let mut ran = 0;

        loop {
            let job = self.state.borrow_mut().queues[phase.index()].pop_until(position, since);
            let Some(job) = job else {
                break;
            };
            (job.run)();
            ran += 1;
        }

        if ran > 0 {
            trace!(%phase, position, ran, "flushed");
        }
        ran
    }

    /// Number of jobs waiting in `phase`.
    pub fn queued(&self, phase: FlushPhase) -> usize {
        self.state.borrow().queues[phase.index()].jobs.len()
    }

    /// The current mode.
    pub fn mode(&self) -> SchedulerMode {
        self.state.borrow().mode
    }

    /// Return to `Auto`, resolving every pending [`NextTick`].
    pub fn switch_to_auto(&self) {
        let waiters = {
            let mut state = self.state.borrow_mut();
            if state.mode == SchedulerMode::Manual {
                debug!("scheduler mode -> auto");
            }
            state.mode = SchedulerMode::Auto;
            state.cycles = 0;
            std::mem::take(&mut state.tick_waiters)
        };
        for waiter in waiters {
            let _ = waiter.send(());
        }
    }

    /// Enter `Manual` without requesting a cycle.
    ///
    /// Hosts call this when they begin a cycle on their own.
    pub fn switch_to_manual(&self) {
        let mut state = self.state.borrow_mut();
        if state.mode == SchedulerMode::Auto {
            debug!("scheduler mode -> manual");
        }
        state.mode = SchedulerMode::Manual;
    }

    /// Ask the host for a render cycle on behalf of `context`.
    ///
    /// Only the first request while `Auto` reaches the host; while a cycle is
    /// outstanding the work simply waits for it.
    pub fn request_cycle(&self, context: ContextId) {
        {
            let mut state = self.state.borrow_mut();
            if state.mode == SchedulerMode::Manual {
                return;
            }
            state.mode = SchedulerMode::Manual;
        }
        debug!(%context, "scheduler mode -> manual, requesting render");
        self.host.request_render(context);
    }

    /// Record that `context` must re-render in the current cycle.
    pub fn mark_dirty(&self, context: ContextId) {
        self.state.borrow_mut().dirty.insert(context);
    }

    /// Record that `context` has rendered.
    pub fn mark_rendered(&self, context: ContextId) {
        self.state.borrow_mut().dirty.shift_remove(&context);
    }

    /// Whether `context` is waiting for a re-render.
    pub fn is_dirty(&self, context: ContextId) -> bool {
        self.state.borrow().dirty.contains(&context)
    }

    /// Called by the host after the last checkpoint of a cycle.
    ///
    /// With nothing left over the scheduler returns to `Auto`. Otherwise it
    /// requests renders for every context that still owns work and stays in
    /// `Manual`.
    pub fn finish_cycle(&self) {
        let leftovers: IndexSet<ContextId> = {
            let mut state = self.state.borrow_mut();
            if state.is_idle() {
                drop(state);
                self.switch_to_auto();
                return;
            }

            state.cycles += 1;
            if state.cycles > self.config.cycle_limit {
                warn!(
                    limit = self.config.cycle_limit,
                    "host cycles keep leaving work behind; discarding queued jobs"
                );
                for queue in state.queues.iter_mut() {
                    *queue = PhaseQueue::default();
                }
                state.dirty.clear();
                drop(state);
                self.switch_to_auto();
                return;
            }

            let mut owners: IndexSet<ContextId> = state.dirty.iter().copied().collect();
            for queue in &state.queues {
                owners.extend(queue.jobs.values().filter_map(|job| job.owner));
            }
            owners
        };

        debug!(contexts = leftovers.len(), "cycle finished with work left over");
        for context in leftovers {
            self.host.request_render(context);
        }
    }

    /// A signal that resolves once the outstanding cycle has fully drained.
    ///
    /// Resolves on first poll when no cycle is outstanding.
    pub fn next_tick(&self) -> NextTick {
        let mut state = self.state.borrow_mut();
        if state.mode == SchedulerMode::Auto && state.is_idle() {
            return NextTick::ready();
        }
        let (sender, tick) = NextTick::pending();
        state.tick_waiters.push(sender);
        tick
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("Scheduler")
            .field("mode", &state.mode)
            .field(
                "queued",
                &state.queues.iter().map(|q| q.jobs.len()).collect::<Vec<_>>(),
            )
            .field("dirty", &state.dirty.len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn recording_scheduler() -> (Scheduler, Rc<RefCell<Vec<ContextId>>>) {
        let requests = Rc::new(RefCell::new(Vec::new()));
        let sink = requests.clone();
        let scheduler = Scheduler::new(move |ctx: ContextId| sink.borrow_mut().push(ctx));
        (scheduler, requests)
    }

    fn log_job(log: &Rc<RefCell<Vec<&'static str>>>, name: &'static str) -> Job {
        let log = log.clone();
        Job::new(move || log.borrow_mut().push(name))
    }

    #[test]
    fn jobs_drain_in_position_order() {
        let (scheduler, _) = recording_scheduler();
        let log = Rc::new(RefCell::new(Vec::new()));

        let late = scheduler.register_context();
        let early = scheduler.register_context();
        assert!(late < early);

        scheduler.queue_job(log_job(&log, "b").at(early));
        scheduler.queue_job(log_job(&log, "a").at(late));

        assert_eq!(scheduler.flush_jobs_until(early), 2);
        assert_eq!(*log.borrow(), vec!["a", "b"]);
    }

    #[test]
    fn queueing_twice_keeps_one_entry() {
        let (scheduler, _) = recording_scheduler();
        let runs = Rc::new(Cell::new(0));
        let r = runs.clone();
        let job = Job::new(move || r.set(r.get() + 1)).at(3);

        assert_eq!(scheduler.queue_post_flush_cb(job.clone()), 3);
        assert_eq!(scheduler.queue_post_flush_cb(job), 3);
        assert_eq!(scheduler.queued(FlushPhase::Post), 1);

        scheduler.flush_post_jobs_until(3);
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn flush_stops_at_position() {
        let (scheduler, _) = recording_scheduler();
        let log = Rc::new(RefCell::new(Vec::new()));

        scheduler.queue_job(log_job(&log, "first").at(1));
        scheduler.queue_job(log_job(&log, "second").at(5));

        scheduler.flush_jobs_until(2);
        assert_eq!(*log.borrow(), vec!["first"]);
        assert_eq!(scheduler.queued(FlushPhase::Pre), 1);
    }

    #[test]
    fn jobs_appended_during_drain_run_in_same_drain() {
        let (scheduler, _) = recording_scheduler();
        let log = Rc::new(RefCell::new(Vec::new()));

        let (s, l) = (scheduler.clone(), log.clone());
        scheduler.queue_job(
            Job::new(move || {
                l.borrow_mut().push("outer");
                s.queue_job(log_job(&l, "nested").at(99));
                s.queue_post_flush_cb(log_job(&l, "post"));
            })
            .at(0),
        );

        scheduler.flush_jobs_until(0);
        assert_eq!(*log.borrow(), vec!["outer", "nested"]);
        assert_eq!(scheduler.queued(FlushPhase::Post), 1);
    }

    #[test]
    fn only_first_request_reaches_host() {
        let (scheduler, requests) = recording_scheduler();
        let ctx = ContextId::new();

        scheduler.request_cycle(ctx);
        scheduler.request_cycle(ctx);
        assert_eq!(scheduler.mode(), SchedulerMode::Manual);
        assert_eq!(requests.borrow().len(), 1);

        scheduler.finish_cycle();
        assert_eq!(scheduler.mode(), SchedulerMode::Auto);

        scheduler.request_cycle(ctx);
        assert_eq!(requests.borrow().len(), 2);
    }

    #[test]
    fn leftover_work_requests_another_render() {
        let (scheduler, requests) = recording_scheduler();
        let ctx = ContextId::new();

        scheduler.request_cycle(ctx);
        scheduler.queue_post_flush_cb(Job::new(|| {}).owned_by(ctx));
        scheduler.finish_cycle();

        assert_eq!(scheduler.mode(), SchedulerMode::Manual);
        assert_eq!(*requests.borrow(), vec![ctx, ctx]);
    }

    #[test]
    fn cycle_limit_discards_leftovers() {
        let config = ReactiveConfig {
            cycle_limit: 2,
            ..ReactiveConfig::default()
        };
        let scheduler = Scheduler::with_config(|_: ContextId| {}, config);
        let ctx = ContextId::new();

        scheduler.request_cycle(ctx);
        scheduler.mark_dirty(ctx);
        scheduler.finish_cycle();
        scheduler.finish_cycle();
        assert_eq!(scheduler.mode(), SchedulerMode::Manual);

        scheduler.finish_cycle();
        assert_eq!(scheduler.mode(), SchedulerMode::Auto);
        assert!(!scheduler.is_dirty(ctx));
    }

    #[test]
    fn rendering_clears_dirty_flag() {
        let (scheduler, _) = recording_scheduler();
        let ctx = ContextId::new();

        scheduler.mark_dirty(ctx);
        assert!(scheduler.is_dirty(ctx));
        scheduler.mark_rendered(ctx);
        assert!(!scheduler.is_dirty(ctx));
    }
}
