//! Stage graph construction and validation.
//!
//! A project orders its stages with a DAG string such as
//! `prepare >> train,score >> serve`: `>>` separates steps and `,`
//! separates stages that may run concurrently. Every stage appears at most
//! once, so the resulting graph is acyclic by construction.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::warn;

use crate::core::naming::{is_valid_name, resource_name};
use crate::core::{StageKind, StageSpec, Step};
use crate::errors::{ConfigurationError, ErrorInfo};
use crate::project::ProjectConfig;

/// Separates consecutive steps.
pub const STEP_SEPARATOR: &str = ">>";

/// Separates stages inside a step.
pub const STAGE_SEPARATOR: char = ',';

fn graph_error(message: impl Into<String>, stages: Vec<String>) -> ConfigurationError {
    ConfigurationError::new(message)
        .with_stages(stages)
        .with_info(ErrorInfo::new("CONFIG-DAG", "invalid stage graph"))
}

/// Splits a DAG string into ordered groups of stage names.
///
/// # Errors
///
/// Fails on an empty DAG, an empty step or a stage listed twice.
pub fn parse_dag(dag: &str) -> Result<Vec<Vec<String>>, ConfigurationError> {
    if dag.trim().is_empty() {
        return Err(graph_error("project DAG is empty", Vec::new()));
    }

    let mut seen = HashSet::new();
    let mut steps = Vec::new();

    for (index, raw_step) in dag.split(STEP_SEPARATOR).enumerate() {
        let mut step = Vec::new();
        for raw_stage in raw_step.split(STAGE_SEPARATOR) {
            let stage = raw_stage.trim();
            if stage.is_empty() {
                return Err(graph_error(
                    format!("step {} of the DAG contains an empty stage name", index + 1),
                    Vec::new(),
                ));
            }
            if !seen.insert(stage.to_string()) {
                return Err(graph_error(
                    format!("stage {stage} appears more than once in the DAG"),
                    vec![stage.to_string()],
                ));
            }
            step.push(stage.to_string());
        }
        steps.push(step);
    }

    Ok(steps)
}

/// Validated, ordered stages of a project.
#[derive(Debug, Clone)]
pub struct StageGraph {
    steps: Vec<Step>,
    failure_stage: Option<Arc<StageSpec>>,
}

impl StageGraph {
    /// Builds and validates the graph for `config`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the DAG is malformed, names an
    /// undeclared stage, a stage is declared twice, a stage's settings or
    /// resource name are invalid, or the failure stage is missing, not a
    /// batch stage or also part of the DAG.
    pub fn from_config(config: &ProjectConfig) -> Result<Self, ConfigurationError> {
        let declared = index_stages(config)?;
        let groups = parse_dag(&config.dag)?;

        let unknown: Vec<String> = groups
            .iter()
            .flatten()
            .filter(|name| !declared.contains_key(name.as_str()))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(graph_error(
                format!("DAG references undeclared stages: {}", unknown.join(", ")),
                unknown,
            ));
        }

        let steps: Vec<Step> = groups
            .iter()
            .enumerate()
            .map(|(index, names)| {
                let stages = names
                    .iter()
                    .filter_map(|name| declared.get(name.as_str()).cloned())
                    .collect();
                Step::new(index, stages)
            })
            .collect();

        let in_dag: HashSet<&str> = groups.iter().flatten().map(String::as_str).collect();
        let failure_stage = match &config.run_on_failure {
            Some(name) => Some(resolve_failure_stage(name, &declared, &in_dag)?),
            None => None,
        };

        let mut resource_names: HashMap<String, &str> = HashMap::new();
        for stage in &config.stages {
            let is_failure_stage = config.run_on_failure.as_deref() == Some(stage.name.as_str());
            validate_stage(&config.name, stage)?;
            let name = resource_name(&config.name, &stage.name);
            if let Some(other) = resource_names.insert(name.clone(), stage.name.as_str()) {
                return Err(graph_error(
                    format!(
                        "stages {other} and {} both map to resource name {name}",
                        stage.name
                    ),
                    vec![other.to_string(), stage.name.clone()],
                ));
            }
            if !in_dag.contains(stage.name.as_str()) && !is_failure_stage {
                warn!(stage = %stage.name, "stage is declared but not part of the DAG");
            }
        }

        Ok(Self {
            steps,
            failure_stage,
        })
    }

    /// Steps in execution order.
    #[must_use]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// The stage to run when the workflow fails.
    #[must_use]
    pub fn failure_stage(&self) -> Option<&Arc<StageSpec>> {
        self.failure_stage.as_ref()
    }

    /// Names of every stage in the DAG, in execution order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        self.steps.iter().flat_map(Step::stage_names).collect()
    }

    /// Number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if the graph has no steps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

fn index_stages(
    config: &ProjectConfig,
) -> Result<HashMap<&str, Arc<StageSpec>>, ConfigurationError> {
    let mut declared = HashMap::with_capacity(config.stages.len());
    for stage in &config.stages {
        if declared
            .insert(stage.name.as_str(), Arc::new(stage.clone()))
            .is_some()
        {
            return Err(graph_error(
                format!("stage {} is declared more than once", stage.name),
                vec![stage.name.clone()],
            ));
        }
    }
    Ok(declared)
}

fn resolve_failure_stage(
    name: &str,
    declared: &HashMap<&str, Arc<StageSpec>>,
    in_dag: &HashSet<&str>,
) -> Result<Arc<StageSpec>, ConfigurationError> {
    let stage = declared.get(name).ok_or_else(|| {
        graph_error(
            format!("failure stage {name} is not declared"),
            vec![name.to_string()],
        )
    })?;
    if !stage.kind.is_batch() {
        return Err(graph_error(
            format!("failure stage {name} must be a batch stage"),
            vec![name.to_string()],
        ));
    }
    if in_dag.contains(name) {
        return Err(graph_error(
            format!("failure stage {name} must not be part of the DAG"),
            vec![name.to_string()],
        ));
    }
    Ok(stage.clone())
}

fn validate_stage(project: &str, stage: &StageSpec) -> Result<(), ConfigurationError> {
    let invalid = |reason: String| {
        ConfigurationError::new(format!("stage {} is invalid: {reason}", stage.name))
            .with_stages(vec![stage.name.clone()])
    };

    let name = resource_name(project, &stage.name);
    if !is_valid_name(&name) {
        return Err(invalid(format!(
            "resource name {name} is not a valid cluster name"
        )));
    }

    if let StageKind::Service(service) = &stage.kind {
        if service.replicas == 0 {
            return Err(invalid("replicas must be at least 1".to_string()));
        }
        if service.port == 0 {
            return Err(invalid("port must be greater than 0".to_string()));
        }
    }

    if stage.resources.cpu <= 0.0 || stage.resources.memory_mb == 0 {
        return Err(invalid("resource requests must be positive".to_string()));
    }

    Ok(())
}
