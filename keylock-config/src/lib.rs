// Lock settings for keylock: files, environment overrides and validation

pub mod env;
pub mod error;
pub mod loader;
pub mod settings;
pub mod validation;

pub use env::EnvLoader;
pub use error::{ConfigError, Result};
pub use loader::{ConfigLoader, FileFormat};
pub use settings::{LockSettings, RecipeLockSettings, TokenLockSettings};
pub use validation::{ConfigValidator, Validate};

use serde_json::Value;
use std::path::PathBuf;

/// Builds [`LockSettings`] from defaults, an optional file and the environment.
///
/// Later sources win: defaults, then the file, then `.env`, then the
/// process environment.
#[derive(Debug, Clone)]
pub struct SettingsLoader {
    file: Option<PathBuf>,
    dotenv: Option<Option<PathBuf>>,
    env_prefix: Option<String>,
}

impl SettingsLoader {
    /// Loader reading `KEYLOCK_*` variables and nothing else
    pub fn new() -> Self {
        Self {
            file: None,
            dotenv: None,
            env_prefix: Some("KEYLOCK".to_string()),
        }
    }

    /// Read a settings file; the format follows the extension
    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Load a `.env` file into the process environment first
    ///
    /// With `None`, a missing `.env` in the working directory is ignored.
    pub fn dotenv(mut self, path: Option<PathBuf>) -> Self {
        self.dotenv = Some(path);
        self
    }

    /// Change the environment prefix (default `KEYLOCK`)
    pub fn env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = Some(prefix.into());
        self
    }

    /// Ignore the environment entirely
    pub fn without_env(mut self) -> Self {
        self.env_prefix = None;
        self
    }

    /// Merge all sources and validate the result
    pub fn load(&self) -> Result<LockSettings> {
        let mut merged = serde_json::to_value(LockSettings::default())
            .map_err(|e| ConfigError::DeserializationError(e.to_string()))?;

        if let Some(path) = &self.file {
            let data = ConfigLoader::auto(path)?.load_file(path)?;
            loader::merge(&mut merged, data);
        }

        match &self.dotenv {
            Some(Some(path)) => {
                dotenvy::from_path(path).map_err(|e| ConfigError::LoadError(e.to_string()))?;
            }
            Some(None) => {
                dotenvy::dotenv().ok();
            }
            None => {}
        }

        if let Some(prefix) = &self.env_prefix {
            let overlay = EnvLoader::new(Some(prefix.clone())).load_nested()?;
            loader::merge(&mut merged, overlay);
        }

        Self::finish(merged)
    }

    /// Parse settings from an in-memory document, without any other source
    pub fn parse_str(content: &str, format: FileFormat) -> Result<LockSettings> {
        let mut merged = serde_json::to_value(LockSettings::default())
            .map_err(|e| ConfigError::DeserializationError(e.to_string()))?;
        loader::merge(&mut merged, ConfigLoader::new(format).parse(content)?);
        Self::finish(merged)
    }

    fn finish(merged: Value) -> Result<LockSettings> {
        let settings: LockSettings = serde_json::from_value(merged)
            .map_err(|e| ConfigError::DeserializationError(e.to_string()))?;

        settings.validate()?;

        Ok(settings)
    }
}

impl Default for SettingsLoader {
    fn default() -> Self {
        Self::new()
    }
}
