//! Worker lifecycle as an explicit state machine.
//!
//! A worker version moves strictly forward:
//! `Parsed → Installing → Installed → Activating → Activated`.
//! `Redundant` is terminal and reachable from any other phase when the
//! version fails or is replaced. A version that already activated in an
//! earlier run is restored straight from `Parsed` to `Activated`.

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerPhase {
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
    Redundant,
}

impl WorkerPhase {
    pub fn can_advance_to(self, next: WorkerPhase) -> bool {
        use WorkerPhase::*;
        match (self, next) {
            (Parsed, Installing)
            | (Installing, Installed)
            | (Installed, Activating)
            | (Activating, Activated) => true,
            (Redundant, _) => false,
            (_, Redundant) => true,
            _ => false,
        }
    }

    /// Only an activated worker intercepts requests.
    pub fn is_controlling(self) -> bool {
        self == WorkerPhase::Activated
    }

    pub fn label(self) -> &'static str {
        match self {
            WorkerPhase::Parsed => "parsed",
            WorkerPhase::Installing => "installing",
            WorkerPhase::Installed => "installed",
            WorkerPhase::Activating => "activating",
            WorkerPhase::Activated => "activated",
            WorkerPhase::Redundant => "redundant",
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("Cannot move worker from {} to {}", .from.label(), .to.label())]
    InvalidTransition { from: WorkerPhase, to: WorkerPhase },
}

#[derive(Debug)]
pub struct Lifecycle {
    phase: WorkerPhase,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            phase: WorkerPhase::Parsed,
        }
    }

    pub fn phase(&self) -> WorkerPhase {
        self.phase
    }

    pub fn advance(&mut self, next: WorkerPhase) -> Result<(), LifecycleError> {
        if !self.phase.can_advance_to(next) {
            return Err(LifecycleError::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        self.phase = next;
        Ok(())
    }

    /// Resume a version whose activation is already on record.
    pub fn restore(&mut self) -> Result<(), LifecycleError> {
        if self.phase != WorkerPhase::Parsed {
            return Err(LifecycleError::InvalidTransition {
                from: self.phase,
                to: WorkerPhase::Activated,
            });
        }
        self.phase = WorkerPhase::Activated;
        Ok(())
    }

    pub fn fail(&mut self) {
        self.phase = WorkerPhase::Redundant;
    }
}
