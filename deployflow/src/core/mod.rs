//! Core types for deployflow.
//!
//! This module contains the fundamental types used throughout the engine:
//! - Stage and step descriptors
//! - Environment variables
//! - Status enums
//! - Resource naming

mod env;
pub mod naming;
mod stage;
mod status;

pub use env::{EnvVar, EnvVars, FAILURE_MESSAGE_ENV_VAR, GIT_COMMIT_HASH_ENV_VAR};
pub use stage::{
    BatchConfig, ResourceRequests, SecretRef, ServiceConfig, StageKind, StageSpec, Step,
};
pub use status::{JobStatus, RunStatus, StageStatus, WorkflowState};
