//! Testing utilities for deployflow.
//!
//! This module provides:
//! - An in-memory, scripted cluster that records every call
//! - Static project sources and image registries
//! - Fast engine settings and a sample project

mod cluster;
mod fixtures;

pub use crate::events::CollectingSink;
pub use cluster::{ClusterCall, FakeCluster};
pub use fixtures::{
    fast_config, test_project_config, test_project_ref, StaticProjectSource, StaticRegistry,
    TEST_COMMIT, TEST_IMAGE, TEST_NAMESPACE,
};
