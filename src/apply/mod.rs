// ABOUTME: Apply executor: drives each planned operation through Pending, InFlight and a terminal state.
// ABOUTME: No rollback; a failure leaves the snapshot describing exactly what was committed.

mod error;
mod executor;
mod state;

pub use error::ApplyError;
pub use executor::{DEFAULT_OPERATION_TIMEOUT, Executor, PartialApplyResult};
pub use state::{
    ApplyFailure, Committed, Failed, InFlight, OperationOutcome, OperationState, Pending, Step,
};
