//! Test host shared by the integration tests.
//!
//! `App` plays the role of a rendering host: it keeps a tree of local
//! contexts (in registration order, parents before children), renders them
//! all on every commit and runs the checkpoints of a [`CommitRegistry`].

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use trellis_core::host::{CommitRegistry, Host};
use trellis_core::reactive::{Context, ContextId};
use trellis_core::scheduler::Scheduler;

/// Records every render request it receives.
#[derive(Clone, Default)]
pub struct TestHost {
    requests: Rc<RefCell<Vec<ContextId>>>,
}

impl TestHost {
    pub fn take_requests(&self) -> Vec<ContextId> {
        std::mem::take(&mut *self.requests.borrow_mut())
    }

    pub fn request_count(&self) -> usize {
        self.requests.borrow().len()
    }
}

impl Host for TestHost {
    fn request_render(&self, context: ContextId) {
        self.requests.borrow_mut().push(context);
    }
}

type RenderFn = Rc<dyn Fn(&Context)>;

pub struct App {
    pub scheduler: Scheduler,
    pub host: TestHost,
    nodes: RefCell<Vec<(Context, RenderFn)>>,
}

impl App {
    pub fn new() -> Self {
        let host = TestHost::default();
        Self {
            scheduler: Scheduler::new(host.clone()),
            host,
            nodes: RefCell::new(Vec::new()),
        }
    }

    /// Add a context to the tree. Children must be mounted after their parent.
    pub fn mount(&self, parent: Option<&Context>, render: impl Fn(&Context) + 'static) -> Context {
        let context = match parent {
            Some(parent) => parent.child(),
            None => Context::local(&self.scheduler),
        };
        self.nodes
            .borrow_mut()
            .push((context.clone(), Rc::new(render)));
        context
    }

    /// Render every context and run one full commit.
    pub fn commit(&self) {
        self.scheduler.switch_to_manual();
        let nodes = self.nodes.borrow().clone();

        let mut registry = CommitRegistry::new();
        for (context, render) in &nodes {
            context.render(|| render(context));
            context.run_effects(&mut registry);
        }
        registry.run_commit();
        self.scheduler.finish_cycle();
    }

    /// Serve render requests until none are left. Returns the number of
    /// commits.
    pub fn pump(&self) -> usize {
        let mut commits = 0;
        while commits < 16 && !self.host.take_requests().is_empty() {
            self.commit();
            commits += 1;
        }
        commits
    }
}
