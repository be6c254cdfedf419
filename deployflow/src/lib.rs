//! # Deployflow
//!
//! A workflow execution engine that deploys staged machine-learning projects
//! onto a container cluster.
//!
//! A project declares its stages and a DAG such as
//! `prepare >> train_a,train_b >> serve`. Deployflow runs the DAG step by
//! step against the cluster with support for:
//!
//! - **Batch stages**: run-to-completion jobs with retries and timeouts
//! - **Service stages**: deployments that must become ready, exposed as
//!   services and optionally behind an ingress route
//! - **Pre-flight validation**: namespace, stage graph and runtime image are
//!   checked before anything is created
//! - **Rollback**: a failed step reverts every deployment the run touched
//! - **Failure stage**: an optional batch stage run after a failure
//! - **Cancellation**: cooperative cancellation with bounded cleanup
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use deployflow::prelude::*;
//!
//! let orchestrator = WorkflowOrchestrator::new(
//!     cluster,
//!     source,
//!     Arc::new(ImageValidator::new(RegistryConfig::default())?),
//!     Arc::new(StdoutSink),
//!     EngineConfig::default(),
//! );
//!
//! let request = RunRequest::new("ml-prod", ProjectRef::new(url, "main"));
//! let result = orchestrator.run(&request).await?;
//! std::process::exit(result.exit_code());
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod cluster;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod executor;
pub mod graph;
pub mod image;
pub mod logs;
pub mod observability;
pub mod project;
pub mod testing;
pub mod workflow;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::cluster::{ClusterApi, ClusterError, DeploymentHandle, JobHandle};
    pub use crate::config::{EngineConfig, RegistryConfig};
    pub use crate::core::{
        EnvVar, EnvVars, JobStatus, RunStatus, StageKind, StageSpec, StageStatus, WorkflowState,
    };
    pub use crate::errors::{
        ConfigurationError, DeployflowError, RollbackFailure, StageFailure, StageFailureReason,
    };
    pub use crate::events::{ProgressSink, StdoutSink, TracingSink};
    pub use crate::executor::{RetryConfig, StageExecutor, StageOutcome, StepOutcome};
    pub use crate::graph::StageGraph;
    pub use crate::image::{validate_image, ImageRef, ImageRegistry, ImageValidator};
    pub use crate::logs::LogStreamer;
    pub use crate::observability::init_tracing;
    pub use crate::project::{ProjectConfig, ProjectRef, ProjectSource};
    pub use crate::workflow::{ExecutionResult, RunRequest, WorkflowOrchestrator};
}
