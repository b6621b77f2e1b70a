// ABOUTME: Per-operation state markers for the type state pattern.
// ABOUTME: A step can only be committed or failed once it is in flight; both are terminal.

use super::error::ApplyError;
use crate::plan::Operation;
use std::time::{Duration, Instant};

/// Not started yet.
/// Available actions: `start()`
#[derive(Debug, Clone, Copy, Default)]
pub struct Pending;

/// Driver call issued.
/// Available actions: `commit()`, `fail()`
#[derive(Debug, Clone, Copy)]
pub struct InFlight {
    started: Instant,
}

/// Applied and recorded in the snapshot.
#[derive(Debug, Clone, Copy)]
pub struct Committed {
    elapsed: Duration,
}

/// Driver call failed or timed out. Nothing after it runs.
#[derive(Debug)]
pub struct Failed {
    elapsed: Duration,
    error: ApplyError,
}

/// One operation of a plan, parameterized by its current state.
#[derive(Debug)]
pub struct Step<S> {
    operation: Operation,
    state: S,
}

impl<S> Step<S> {
    pub fn operation(&self) -> &Operation {
        &self.operation
    }
}

impl Step<Pending> {
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            state: Pending,
        }
    }

    #[must_use = "step state must be used"]
    pub fn start(self) -> Step<InFlight> {
        tracing::debug!(operation = %self.operation, "starting");
        Step {
            operation: self.operation,
            state: InFlight {
                started: Instant::now(),
            },
        }
    }
}

impl Step<InFlight> {
    pub fn commit(self) -> Step<Committed> {
        let elapsed = self.state.started.elapsed();
        tracing::info!(
            operation = %self.operation,
            elapsed_ms = elapsed.as_millis() as u64,
            "committed"
        );
        Step {
            operation: self.operation,
            state: Committed { elapsed },
        }
    }

    pub fn fail(self, error: ApplyError) -> Step<Failed> {
        let elapsed = self.state.started.elapsed();
        tracing::error!(operation = %self.operation, %error, "failed");
        Step {
            operation: self.operation,
            state: Failed { elapsed, error },
        }
    }
}

impl Step<Failed> {
    pub fn error(&self) -> &ApplyError {
        &self.state.error
    }
}

/// Erased state of a finished run. An operation is only in flight while
/// the executor holds its `Step<InFlight>`, so no outcome reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Pending,
    Committed,
    Failed,
}

impl OperationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationState::Committed | OperationState::Failed)
    }
}

impl std::fmt::Display for OperationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationState::Pending => write!(f, "pending"),
            OperationState::Committed => write!(f, "committed"),
            OperationState::Failed => write!(f, "failed"),
        }
    }
}

/// Final state of one operation after a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationOutcome {
    pub operation: Operation,
    pub state: OperationState,
    /// Time spent in flight; `None` for operations that never started.
    pub elapsed: Option<Duration>,
}

/// The operation that stopped a run, and why.
#[derive(Debug)]
pub struct ApplyFailure {
    pub operation: Operation,
    pub error: ApplyError,
}

impl From<Step<Pending>> for OperationOutcome {
    fn from(step: Step<Pending>) -> Self {
        Self {
            operation: step.operation,
            state: OperationState::Pending,
            elapsed: None,
        }
    }
}

impl From<Step<Committed>> for OperationOutcome {
    fn from(step: Step<Committed>) -> Self {
        Self {
            operation: step.operation,
            state: OperationState::Committed,
            elapsed: Some(step.state.elapsed),
        }
    }
}

impl Step<Failed> {
    /// Splits a failed step into its reported outcome and the failure cause.
    pub fn into_parts(self) -> (OperationOutcome, ApplyFailure) {
        let outcome = OperationOutcome {
            operation: self.operation.clone(),
            state: OperationState::Failed,
            elapsed: Some(self.state.elapsed),
        };
        let failure = ApplyFailure {
            operation: self.operation,
            error: self.state.error,
        };
        (outcome, failure)
    }
}
