//! Workflow runs: orchestration, rollback and results.
//!
//! [`WorkflowOrchestrator::run`] takes a [`RunRequest`] through validation,
//! step-by-step execution and, when a step fails, rollback of everything the
//! run changed. The outcome is an [`ExecutionResult`].

mod orchestrator;
mod result;
mod rollback;
mod run;

#[cfg(test)]
mod integration_tests;

pub use orchestrator::{RunRequest, WorkflowOrchestrator};
pub use result::ExecutionResult;
pub use rollback::{Cleaner, CleanupAction, CleanupReport, RollbackLedger};
pub use run::{StateChange, WorkflowRun};
