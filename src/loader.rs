//! Configuration loading.
//!
//! Parses YAML (and therefore JSON) documents, resolves `${property}`
//! placeholders in endpoint paths and validates the result.

use crate::config::Configuration;
use crate::error::ConfigError;
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, error, info};

/// Key-value properties used to resolve placeholders in endpoint paths.
pub trait PropertySource: Send + Sync {
    fn property(&self, key: &str) -> Option<String>;
}

impl PropertySource for HashMap<String, String> {
    fn property(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// Properties read from environment variables.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvProperties;

impl PropertySource for EnvProperties {
    fn property(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Explicit properties first, then the environment.
#[derive(Debug, Clone, Default)]
pub struct LayeredProperties {
    overrides: HashMap<String, String>,
}

impl LayeredProperties {
    pub fn new(overrides: HashMap<String, String>) -> Self {
        Self { overrides }
    }
}

impl PropertySource for LayeredProperties {
    fn property(&self, key: &str) -> Option<String> {
        self.overrides
            .property(key)
            .or_else(|| EnvProperties.property(key))
    }
}

/// Where a configuration document comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// A file on disk; eligible for hot reload
    File(PathBuf),
    /// An in-memory document
    Inline(String),
}

impl ConfigSource {
    /// The file path, when the source is a file.
    pub fn path(&self) -> Option<&Path> {
        match self {
            ConfigSource::File(path) => Some(path),
            ConfigSource::Inline(_) => None,
        }
    }
}

/// Parses configuration sources into [`Configuration`] values.
#[derive(Clone)]
pub struct ConfigLoader {
    properties: Arc<dyn PropertySource>,
    placeholder: Regex,
}

impl ConfigLoader {
    /// Create a loader resolving placeholders against `properties`.
    pub fn new(properties: Arc<dyn PropertySource>) -> Self {
        Self {
            properties,
            placeholder: Regex::new(r"\$\{([^{}]+)\}").expect("placeholder pattern is valid"),
        }
    }

    /// Parse and validate a document.
    pub fn parse(&self, content: &str) -> Result<Configuration, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Configuration::default());
        }
        self.prepare(serde_yaml::from_str(content)?)
    }

    /// Normalize methods, resolve path placeholders and validate.
    ///
    /// Applied to every configuration before routes are built from it.
    pub fn prepare(&self, mut config: Configuration) -> Result<Configuration, ConfigError> {
        for endpoint in &mut config.endpoints {
            endpoint.method = endpoint.method.trim().to_uppercase();

            let resolved = self.resolve_placeholders(&endpoint.path);
            if resolved != endpoint.path {
                debug!(original = %endpoint.path, resolved = %resolved, "Resolved endpoint path");
                endpoint.original_path = Some(std::mem::replace(&mut endpoint.path, resolved));
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a source.
    ///
    /// For file sources the modification time observed before reading is
    /// returned alongside the configuration.
    pub fn load(
        &self,
        source: &ConfigSource,
    ) -> Result<(Configuration, Option<SystemTime>), ConfigError> {
        match source {
            ConfigSource::Inline(content) => Ok((self.parse(content)?, None)),
            ConfigSource::File(path) => {
                let modified = std::fs::metadata(path)
                    .and_then(|meta| meta.modified())
                    .map_err(|e| io_error(path, e))?;
                let content = std::fs::read_to_string(path).map_err(|e| io_error(path, e))?;
                self.parse_file(path, &content, modified)
            }
        }
    }

    /// [`load`](Self::load) without blocking the runtime on file I/O.
    pub async fn load_async(
        &self,
        source: &ConfigSource,
    ) -> Result<(Configuration, Option<SystemTime>), ConfigError> {
        match source {
            ConfigSource::Inline(content) => Ok((self.parse(content)?, None)),
            ConfigSource::File(path) => {
                let modified = tokio::fs::metadata(path)
                    .await
                    .and_then(|meta| meta.modified())
                    .map_err(|e| io_error(path, e))?;
                let content = tokio::fs::read_to_string(path)
                    .await
                    .map_err(|e| io_error(path, e))?;
                self.parse_file(path, &content, modified)
            }
        }
    }

    fn parse_file(
        &self,
        path: &Path,
        content: &str,
        modified: SystemTime,
    ) -> Result<(Configuration, Option<SystemTime>), ConfigError> {
        let config = self.parse(content)?;
        info!(
            path = %path.display(),
            endpoints = config.endpoints.len(),
            "Loaded configuration"
        );
        Ok((config, Some(modified)))
    }

    /// Like [`load`](Self::load), but an unusable source yields an empty configuration.
    pub fn load_or_empty(&self, source: &ConfigSource) -> (Configuration, Option<SystemTime>) {
        match self.load(source) {
            Ok(loaded) => loaded,
            Err(e) => {
                error!(error = %e, "Failed to load configuration, starting with no endpoints");
                let modified = source
                    .path()
                    .and_then(|path| std::fs::metadata(path).ok())
                    .and_then(|meta| meta.modified().ok());
                (Configuration::default(), modified)
            }
        }
    }

    /// Substitute `${key}` and `${key:default}` placeholders that the property
    /// source can resolve.
    ///
    /// Anything left in `${...}` form is a path variable.
    pub fn resolve_placeholders(&self, path: &str) -> String {
        self.placeholder
            .replace_all(path, |caps: &Captures| {
                let expr = &caps[1];
                let (key, default) = match expr.split_once(':') {
                    Some((key, default)) => (key, Some(default)),
                    None => (expr, None),
                };
                self.properties
                    .property(key)
                    .or_else(|| default.map(str::to_string))
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }
}

/// A loader without properties: every `${...}` segment stays a path variable.
impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new(Arc::new(HashMap::<String, String>::new()))
    }
}

fn io_error(path: &Path, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl std::fmt::Debug for ConfigLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigLoader").finish_non_exhaustive()
    }
}
