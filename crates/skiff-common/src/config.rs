//! Deployment configuration model.
//!
//! Configuration arrives in layers (stack file, then environment and CLI
//! flags) as a [`DeployConfig`] whose fields are all optional. Nothing
//! downstream reads a `DeployConfig` directly: [`DeployConfig::require`]
//! turns it into [`DeployInputs`], and that is where a missing image tag or
//! image URI aborts the deployment before any resource is touched.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_REGION, DEFAULT_STATE_FILE};
use crate::error::{Result, SkiffError};

/// Raw, partially specified deployment configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeployConfig {
    /// Logical service name; derived from `image_uri` when absent.
    #[serde(alias = "serviceName")]
    pub service_name: Option<String>,
    /// Registry URI the image build step pushes to.
    #[serde(alias = "imageUri")]
    pub image_uri: Option<String>,
    /// Tag of the image to run.
    #[serde(alias = "imageTag")]
    pub image_tag: Option<String>,
    /// Region the log driver ships to.
    pub region: Option<String>,
    /// Path of the persisted state file.
    #[serde(alias = "stateFile")]
    pub state_file: Option<PathBuf>,
}

impl DeployConfig {
    /// Loads a YAML stack file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a valid stack file.
    pub fn load(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "loading stack file");
        let content = std::fs::read_to_string(path).map_err(|e| SkiffError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_yaml(&content)
    }

    /// Parses a stack file from YAML text.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the text is not a valid stack file.
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| SkiffError::config(format!("malformed stack file: {e}")))
    }

    /// Layers `overrides` on top of `self`; set fields in `overrides` win.
    #[must_use]
    pub fn merge(self, overrides: Self) -> Self {
        Self {
            service_name: overrides.service_name.or(self.service_name),
            image_uri: overrides.image_uri.or(self.image_uri),
            image_tag: overrides.image_tag.or(self.image_tag),
            region: overrides.region.or(self.region),
            state_file: overrides.state_file.or(self.state_file),
        }
    }

    /// Returns the configured state file, or the default one.
    #[must_use]
    pub fn state_file(&self) -> PathBuf {
        self.state_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_FILE))
    }

    /// Validates the configuration and produces deployment inputs.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `image_uri` or `image_tag` is missing
    /// or malformed, or if the service name cannot be determined.
    pub fn require(&self) -> Result<DeployInputs> {
        let image_uri = non_empty(self.image_uri.as_deref(), "imageUri")?;
        let image_tag = non_empty(self.image_tag.as_deref(), "imageTag")?;
        let service_name = match self.service_name.as_deref() {
            Some(name) => name.to_string(),
            None => registry_name_of(image_uri)?.to_string(),
        };
        let inputs = DeployInputs::new(service_name, image_uri, image_tag)?;
        Ok(match self.region.as_deref() {
            Some(region) => inputs.with_region(region)?,
            None => inputs,
        })
    }
}

fn non_empty<'a>(value: Option<&'a str>, key: &str) -> Result<&'a str> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(SkiffError::config(format!(
            "required configuration value \"{key}\" is missing"
        ))),
    }
}

fn registry_name_of(image_uri: &str) -> Result<&str> {
    image_uri
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .ok_or_else(|| SkiffError::config(format!("imageUri \"{image_uri}\" names no registry")))
}

/// Validated inputs of one deployment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeployInputs {
    service_name: String,
    image_uri: String,
    image_tag: String,
    region: String,
}

impl DeployInputs {
    /// Validates and bundles the deployment inputs.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the service name is not a valid
    /// registry name, if the tag is empty or malformed, or if `image_uri`
    /// does not name the service's registry.
    pub fn new(
        service_name: impl Into<String>,
        image_uri: impl Into<String>,
        image_tag: impl Into<String>,
    ) -> Result<Self> {
        let service_name = service_name.into();
        let image_uri = image_uri.into();
        let image_tag = image_tag.into();

        check_service_name(&service_name)?;
        check_image_tag(&image_tag)?;
        let registry = registry_name_of(&image_uri)?;
        if registry != service_name {
            return Err(SkiffError::config(format!(
                "imageUri \"{image_uri}\" does not name the \"{service_name}\" registry"
            )));
        }

        Ok(Self {
            service_name,
            image_uri,
            image_tag,
            region: DEFAULT_REGION.to_string(),
        })
    }

    /// Overrides the deployment region.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the region is empty.
    pub fn with_region(mut self, region: impl Into<String>) -> Result<Self> {
        let region = region.into();
        if region.trim().is_empty() {
            return Err(SkiffError::config("region must not be empty"));
        }
        self.region = region;
        Ok(self)
    }

    /// Logical service name, also the registry name.
    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Registry URI supplied by the operator.
    ///
    /// Its last segment names the registry; convergence refuses the URI
    /// unless it equals the repository URI the stack resolves.
    #[must_use]
    pub fn image_uri(&self) -> &str {
        &self.image_uri
    }

    /// Image tag to deploy.
    #[must_use]
    pub fn image_tag(&self) -> &str {
        &self.image_tag
    }

    /// Deployment region.
    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }
}

fn check_service_name(name: &str) -> Result<()> {
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.'));
    let starts_alnum = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
    if name.len() < 2 || name.len() > 256 || !valid_chars || !starts_alnum {
        return Err(SkiffError::config(format!(
            "service name \"{name}\" is not a valid registry name"
        )));
    }
    Ok(())
}

fn check_image_tag(tag: &str) -> Result<()> {
    if tag.is_empty() {
        return Err(SkiffError::config("imageTag must not be empty"));
    }
    let valid_chars = tag
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if tag.len() > 128 || !valid_chars || tag.starts_with(['.', '-']) {
        return Err(SkiffError::config(format!(
            "imageTag \"{tag}\" is not a valid image tag"
        )));
    }
    Ok(())
}
