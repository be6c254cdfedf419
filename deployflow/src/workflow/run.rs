//! Mutable state of a single workflow run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;
use uuid::Uuid;

use crate::core::WorkflowState;
use crate::errors::DeployflowError;
use crate::project::ProjectRef;

/// A recorded state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    /// State left.
    pub from: WorkflowState,
    /// State entered.
    pub to: WorkflowState,
    /// When the change happened.
    pub at: DateTime<Utc>,
}

/// One execution of a project's workflow. Owned by the orchestrator.
#[derive(Debug, Clone)]
pub struct WorkflowRun {
    /// Run identifier.
    pub id: Uuid,
    /// Target namespace.
    pub namespace: String,
    /// Project being deployed.
    pub project: ProjectRef,
    /// Where the repository is materialized.
    pub cloned_repo_dir: PathBuf,
    /// Commit that was checked out, once known.
    pub commit_hash: Option<String>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    state: WorkflowState,
    history: Vec<StateChange>,
}

impl WorkflowRun {
    /// Creates a run in the `Initializing` state, cloning into a fresh
    /// directory under the system temp dir.
    #[must_use]
    pub fn new(namespace: impl Into<String>, project: ProjectRef) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            namespace: namespace.into(),
            project,
            cloned_repo_dir: std::env::temp_dir().join(format!("deployflow-{id}")),
            commit_hash: None,
            started_at: Utc::now(),
            state: WorkflowState::Initializing,
            history: Vec::new(),
        }
    }

    /// Clones into `dir` instead.
    #[must_use]
    pub fn with_cloned_repo_dir(mut self, dir: PathBuf) -> Self {
        self.cloned_repo_dir = dir;
        self
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> WorkflowState {
        self.state
    }

    /// Every state change so far.
    #[must_use]
    pub fn history(&self) -> &[StateChange] {
        &self.history
    }

    /// Moves to `next`.
    ///
    /// # Errors
    ///
    /// Returns a workflow error if the transition is not allowed.
    pub fn transition(&mut self, next: WorkflowState) -> Result<(), DeployflowError> {
        if !self.state.can_transition_to(next) {
            return Err(DeployflowError::workflow(format!(
                "illegal workflow transition from {} to {next}",
                self.state
            )));
        }
        debug!(run_id = %self.id, from = %self.state, to = %next, "workflow state change");
        self.history.push(StateChange {
            from: self.state,
            to: next,
            at: Utc::now(),
        });
        self.state = next;
        Ok(())
    }

    /// Visited states in order, starting with `Initializing`.
    #[must_use]
    pub fn visited(&self) -> Vec<WorkflowState> {
        std::iter::once(WorkflowState::Initializing)
            .chain(self.history.iter().map(|change| change.to))
            .collect()
    }
}
