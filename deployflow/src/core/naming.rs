//! Cluster resource naming.

use regex::Regex;
use std::sync::LazyLock;

/// Maximum length of a DNS-1123 label.
pub const MAX_NAME_LENGTH: usize = 63;

#[allow(clippy::expect_used)]
static DNS_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("DNS label pattern compiles")
});

/// Lowercases `name` and replaces underscores and spaces with hyphens.
#[must_use]
pub fn make_valid_name(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == '_' || c == ' ' { '-' } else { c })
        .collect()
}

/// Returns true if `name` is a valid DNS-1123 label.
#[must_use]
pub fn is_valid_name(name: &str) -> bool {
    name.len() <= MAX_NAME_LENGTH && DNS_LABEL.is_match(name)
}

/// Name of the job or deployment backing a stage: `<project>--<stage>`.
#[must_use]
pub fn resource_name(project: &str, stage: &str) -> String {
    format!("{}--{}", make_valid_name(project), make_valid_name(stage))
}

/// Ingress route for a service: `/<namespace>/<name>`.
#[must_use]
pub fn ingress_route(namespace: &str, name: &str) -> String {
    format!("/{namespace}/{name}")
}

/// Cluster-internal URL of a service.
#[must_use]
pub fn cluster_service_url(namespace: &str, name: &str) -> String {
    format!("http://{name}.{namespace}.svc.cluster.local")
}
