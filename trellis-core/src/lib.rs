//! Trellis Core
//!
//! This crate provides the reactive engine behind Trellis components. It
//! implements:
//!
//! - Fine-grained dependency tracking over observed state
//! - Effects, watchers and memos with per-instance execution contexts
//! - Effect scopes for grouped teardown
//! - A scheduler that aligns effect execution with a rendering host's commit
//!   checkpoints
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: observed state, the tracking table, effect units, contexts
//! - `scheduler`: phase queues, auto/manual modes and `next_tick`
//! - `host`: the contract a rendering host implements
//! - `config`: tunables such as the recursion limit
//! - `error`: error and warning types
//!
//! # Example
//!
//! ```rust
//! use std::cell::Cell;
//! use std::rc::Rc;
//! use trellis_core::reactive::{Context, Signal};
//!
//! let ctx = Context::immediate();
//!
//! // Create a signal
//! let count = Signal::new(0);
//!
//! // Create a derived value
//! let c = count.clone();
//! let doubled = ctx.memo(move || c.get() * 2);
//!
//! // Create an effect
//! let seen = Rc::new(Cell::new(0));
//! let (d, s) = (doubled.clone(), seen.clone());
//! ctx.effect(move |_| s.set(d.get()));
//!
//! // Update the signal; the effect runs before `set` returns
//! count.set(5);
//! assert_eq!(seen.get(), 10);
//! ```

pub mod config;
pub mod error;
pub mod host;
pub mod reactive;
pub mod scheduler;

pub use error::{ReactiveError, Result};
