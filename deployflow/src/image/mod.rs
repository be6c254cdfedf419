//! Runtime image parsing and registry existence checks.
//!
//! Images are configured as `namespace/repository[:tag]`. Before any cluster
//! resource is created the engine asks the public registry whether the image
//! exists; "absent" and "unreachable" are reported as different errors so
//! operators can tell a typo from an outage.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

use crate::config::RegistryConfig;
use crate::errors::{ConfigurationError, DeployflowError, ErrorInfo};

/// Tag used when the image string has none.
pub const DEFAULT_TAG: &str = "latest";

/// A parsed `namespace/repository[:tag]` image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef {
    /// `namespace/repository`.
    pub repository: String,
    /// Image tag.
    pub tag: String,
}

impl ImageRef {
    /// Parses an image string.
    ///
    /// # Errors
    ///
    /// Returns a configuration error unless the part before the first `:`
    /// has exactly one `/`, the tag has neither `/` nor `:`, and no
    /// component is empty.
    pub fn parse(image: &str) -> Result<Self, ConfigurationError> {
        let invalid = || {
            ConfigurationError::new(format!(
                "invalid runtime image specified in project config: {image}"
            ))
            .with_info(
                ErrorInfo::new("CONFIG-IMAGE", "image must be namespace/repository[:tag]")
                    .with_fix_hint("use a string like acme/model or acme/model:v2")
                    .with_context_entry("image", image),
            )
        };

        let (repository, tag) = match image.split_once(':') {
            Some((repository, tag)) => (repository, tag),
            None => (image, DEFAULT_TAG),
        };

        if repository.matches('/').count() != 1 || tag.contains(['/', ':']) {
            return Err(invalid());
        }

        let valid_parts = repository
            .split('/')
            .all(|part| !part.is_empty() && !part.chars().any(char::is_whitespace));
        if !valid_parts || tag.is_empty() || tag.chars().any(char::is_whitespace) {
            return Err(invalid());
        }

        Ok(Self {
            repository: repository.to_string(),
            tag: tag.to_string(),
        })
    }

    /// The registry namespace (part before the `/`).
    #[must_use]
    pub fn namespace(&self) -> &str {
        self.repository
            .split_once('/')
            .map_or(self.repository.as_str(), |(ns, _)| ns)
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

/// Answers whether an image exists.
#[async_trait]
pub trait ImageRegistry: Send + Sync {
    /// Returns `Ok(true)` if the image exists, `Ok(false)` if it definitely
    /// does not, and `RegistryUnreachable` if the registry gave no answer.
    async fn image_exists(&self, image: &ImageRef) -> Result<bool, DeployflowError>;

    /// Human-readable registry location used in messages.
    fn location(&self) -> &str;
}

/// Checks images against a Docker Hub compatible HTTP API.
#[derive(Debug, Clone)]
pub struct ImageValidator {
    client: Client,
    config: RegistryConfig,
}

impl ImageValidator {
    /// Creates a validator with its own HTTP client.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the HTTP client cannot be built.
    pub fn new(config: RegistryConfig) -> Result<Self, DeployflowError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ConfigurationError::new(format!("cannot build registry client: {e}")))?;
        Ok(Self::with_client(config, client))
    }

    /// Creates a validator with a preconfigured HTTP client.
    #[must_use]
    pub fn with_client(config: RegistryConfig, client: Client) -> Self {
        Self { client, config }
    }

    /// URL of the tag resource for an image.
    #[must_use]
    pub fn tag_url(&self, image: &ImageRef) -> String {
        format!(
            "{}/v2/repositories/{}/tags/{}",
            self.config.base_url.trim_end_matches('/'),
            image.repository,
            image.tag
        )
    }

    /// Parses `image` and confirms it exists on the configured registry.
    ///
    /// # Errors
    ///
    /// See [`validate_image`].
    pub async fn validate(&self, image: &str) -> Result<ImageRef, DeployflowError> {
        validate_image(self, image).await
    }
}

#[async_trait]
impl ImageRegistry for ImageValidator {
    async fn image_exists(&self, image: &ImageRef) -> Result<bool, DeployflowError> {
        let url = self.tag_url(image);
        debug!(url = %url, "checking image on registry");

        let unreachable_err = |message: String| DeployflowError::RegistryUnreachable {
            registry: self.config.base_url.clone(),
            image: image.to_string(),
            message,
        };

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| unreachable_err(e.to_string()))?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            other => Err(unreachable_err(format!("unexpected HTTP status {other}"))),
        }
    }

    fn location(&self) -> &str {
        &self.config.base_url
    }
}

/// Parses `image` and confirms it exists on `registry`.
///
/// # Errors
///
/// Returns a configuration error for malformed or absent images, and
/// `RegistryUnreachable` when the registry cannot be queried. Parsing errors
/// are returned before any network call.
pub async fn validate_image(
    registry: &dyn ImageRegistry,
    image: &str,
) -> Result<ImageRef, DeployflowError> {
    let parsed = ImageRef::parse(image)?;

    if registry.image_exists(&parsed).await? {
        info!(image = %parsed, "runtime image found");
        Ok(parsed)
    } else {
        Err(ConfigurationError::new(format!(
            "cannot locate {parsed} on {}",
            registry.location()
        ))
        .with_info(
            ErrorInfo::new("CONFIG-IMAGE-MISSING", "runtime image does not exist")
                .with_context_entry("image", parsed.to_string()),
        )
        .into())
    }
}
