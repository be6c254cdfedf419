//! Human-readable progress output.
//!
//! Progress lines such as `attempting to run stage=<name>` are the run's
//! user-facing output channel. They are separate from structured `tracing`
//! events, which carry the same information as fields for log pipelines.

mod sink;

pub use sink::{CollectingSink, ProgressSink, StdoutSink, TracingSink};
