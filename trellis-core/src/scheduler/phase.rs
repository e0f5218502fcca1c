//! Flush phases and scheduler modes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A named host checkpoint at which queued effects run.
///
/// Within one host cycle the phases are visited in declaration order:
/// `Pre`, `Sync`, `Insertion`, `Layout`, `Post`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlushPhase {
    /// Before the host commits its output.
    #[default]
    Pre,
    /// Synchronously at the start of the commit.
    Sync,
    /// While the host inserts new output.
    Insertion,
    /// After output is in place, before the host yields.
    Layout,
    /// After the commit has completed.
    Post,
}

impl FlushPhase {
    /// Number of phases.
    pub const COUNT: usize = 5;

    /// Every phase, in host cycle order.
    pub const ALL: [FlushPhase; Self::COUNT] = [
        FlushPhase::Pre,
        FlushPhase::Sync,
        FlushPhase::Insertion,
        FlushPhase::Layout,
        FlushPhase::Post,
    ];

    /// Position of this phase in [`FlushPhase::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for FlushPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlushPhase::Pre => "pre",
            FlushPhase::Sync => "sync",
            FlushPhase::Insertion => "insertion",
            FlushPhase::Layout => "layout",
            FlushPhase::Post => "post",
        };
        f.write_str(name)
    }
}

/// Whether triggers request a new host cycle or join an in-flight one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulerMode {
    /// No host cycle is outstanding. The next mutation requests one.
    #[default]
    Auto,
    /// A host cycle is outstanding; queued work waits for its checkpoints.
    Manual,
}

impl fmt::Display for SchedulerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerMode::Auto => f.write_str("auto"),
            SchedulerMode::Manual => f.write_str("manual"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_index_in_cycle_order() {
        for (i, phase) in FlushPhase::ALL.iter().enumerate() {
            assert_eq!(phase.index(), i);
        }
        assert!(FlushPhase::Pre < FlushPhase::Post);
    }

    #[test]
    fn phase_names_round_trip_through_serde() {
        let phase: FlushPhase = serde_json::from_str("\"layout\"").unwrap();
        assert_eq!(phase, FlushPhase::Layout);
        assert_eq!(phase.to_string(), "layout");
    }

    #[test]
    fn mode_displays_lowercase() {
        assert_eq!(SchedulerMode::Manual.to_string(), "manual");
        assert_eq!(SchedulerMode::default().to_string(), "auto");
    }
}
