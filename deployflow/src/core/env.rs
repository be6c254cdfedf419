//! Container environment variables.

use serde::{Deserialize, Serialize};

/// Name of the variable carrying the project's source commit hash.
pub const GIT_COMMIT_HASH_ENV_VAR: &str = "DEPLOYFLOW_GIT_COMMIT_HASH";

/// Name of the variable passed to the failure-stage describing the failure.
pub const FAILURE_MESSAGE_ENV_VAR: &str = "DEPLOYFLOW_FAILURE_MESSAGE";

/// A single name/value pair injected into a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    /// Variable name.
    pub name: String,
    /// Variable value.
    pub value: String,
}

impl EnvVar {
    /// Creates a new environment variable.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// An ordered set of environment variables.
///
/// Names are unique. Setting an existing name replaces the value in place, so
/// later layers override earlier ones without reordering.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvVars(Vec<EnvVar>);

impl EnvVars {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a variable, replacing any existing value with the same name.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let var = EnvVar::new(name, value);
        match self.0.iter_mut().find(|existing| existing.name == var.name) {
            Some(existing) => existing.value = var.value,
            None => self.0.push(var),
        }
    }

    /// Sets a variable and returns self.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    /// Returns the value of a variable.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|var| var.name == name)
            .map(|var| var.value.as_str())
    }

    /// Returns a new set with `layer` applied on top of this one.
    #[must_use]
    pub fn merged<'a>(&self, layer: impl IntoIterator<Item = &'a EnvVar>) -> Self {
        let mut merged = self.clone();
        for var in layer {
            merged.set(var.name.clone(), var.value.clone());
        }
        merged
    }

    /// Iterates over the variables in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &EnvVar> {
        self.0.iter()
    }

    /// Returns the number of variables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if no variables are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consumes the set, returning the variables.
    #[must_use]
    pub fn into_vec(self) -> Vec<EnvVar> {
        self.0
    }
}

impl FromIterator<EnvVar> for EnvVars {
    fn from_iter<T: IntoIterator<Item = EnvVar>>(iter: T) -> Self {
        let mut vars = Self::new();
        for var in iter {
            vars.set(var.name, var.value);
        }
        vars
    }
}

impl<'a> IntoIterator for &'a EnvVars {
    type Item = &'a EnvVar;
    type IntoIter = std::slice::Iter<'a, EnvVar>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
