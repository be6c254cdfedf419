//! Tracing setup and span helpers.

use std::time::Instant;
use tracing::Span;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::errors::{ConfigurationError, DeployflowError};

/// Installs the global tracing subscriber.
///
/// The filter is read from `RUST_LOG` and defaults to `info`. With `json`
/// set, events are emitted as one JSON object per line.
pub fn init_tracing(json: bool) -> Result<(), DeployflowError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    let result = if json {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };

    result.map_err(|e| {
        ConfigurationError::new(format!("cannot install tracing subscriber: {e}")).into()
    })
}

/// Span covering a whole workflow run.
#[must_use]
pub fn run_span(run_id: &str, namespace: &str, project: &str) -> Span {
    tracing::info_span!("workflow_run", run_id = %run_id, namespace = %namespace, project = %project)
}

/// Span covering one stage.
#[must_use]
pub fn stage_span(stage: &str, kind: &str, step: usize) -> Span {
    tracing::info_span!("stage", stage = %stage, kind = %kind, step = step)
}

/// Simple span timing helper.
#[derive(Debug)]
pub struct SpanTimer {
    start: Instant,
}

impl SpanTimer {
    /// Starts a new timer.
    #[must_use]
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Returns the elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}
