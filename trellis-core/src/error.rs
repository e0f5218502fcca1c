//! Error Types
//!
//! The engine distinguishes fatal usage errors, which are returned to the
//! caller, from soft invariant violations, which are logged through
//! `tracing` and otherwise ignored so that a reactivity misuse cannot take
//! down an otherwise healthy render pass.
//!
//! Fatal:
//!
//! - [`ReactiveError::NoActiveContext`]
//! - [`ReactiveError::MutationDuringRestrictedPhase`]
//!
//! Warned and ignored:
//!
//! - [`ReactiveError::ReadonlyViolation`]
//! - [`ReactiveError::InactiveScope`]
//! - [`ReactiveError::InactiveEffect`]
//! - [`ReactiveError::RecursionLimit`]

use thiserror::Error;

use crate::reactive::{ContextId, EffectId, TargetId};

/// Errors and warnings raised by the reactive engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReactiveError {
    /// A state- or effect-creation call needs an execution context and none
    /// is active.
    #[error("`{operation}` requires an active execution context")]
    NoActiveContext {
        /// The operation that was attempted.
        operation: &'static str,
    },

    /// State was written while its context was rendering or running its
    /// before-update hooks.
    #[error("state of {context} was mutated while it is rendering")]
    MutationDuringRestrictedPhase {
        /// The context whose state was written.
        context: ContextId,
    },

    /// A write was attempted on a derived or readonly value.
    #[error("write to readonly target {target} ignored")]
    ReadonlyViolation {
        /// The target that rejected the write.
        target: TargetId,
    },

    /// A stopped scope was asked to run.
    #[error("cannot run an inactive effect scope")]
    InactiveScope,

    /// A stopped effect was asked to run.
    #[error("effect {effect} has been stopped")]
    InactiveEffect {
        /// The stopped effect.
        effect: EffectId,
    },

    /// An effect re-ran more often than allowed within a single drain.
    #[error("effect {effect} exceeded {limit} runs in a single drain, possible recursive update")]
    RecursionLimit {
        /// The runaway effect.
        effect: EffectId,
        /// The configured limit.
        limit: u32,
    },
}

/// Convenience alias used across the crate.
pub type Result<T, E = ReactiveError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_operation() {
        let err = ReactiveError::NoActiveContext { operation: "use_state" };
        assert_eq!(err.to_string(), "`use_state` requires an active execution context");
    }

    #[test]
    fn recursion_message_includes_limit() {
        let err = ReactiveError::RecursionLimit {
            effect: EffectId::from_index(4),
            limit: 100,
        };
        assert!(err.to_string().contains("e4"));
        assert!(err.to_string().contains("100"));
    }
}
