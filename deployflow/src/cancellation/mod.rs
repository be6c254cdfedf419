//! Cooperative cancellation of workflow runs.
//!
//! A single [`CancellationToken`] is shared between the caller (e.g. an
//! interrupt handler), the orchestrator and every stage task of a run.

mod token;

pub use token::CancellationToken;
