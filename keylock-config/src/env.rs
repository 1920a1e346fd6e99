// Environment variable loading

use crate::loader::nest_pairs;
use crate::{ConfigError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::env;

/// Environment variable loader
pub struct EnvLoader {
    prefix: Option<String>,
}

impl EnvLoader {
    /// Create a new environment loader
    pub fn new(prefix: Option<String>) -> Self {
        Self { prefix }
    }

    /// Load all matching environment variables, prefix stripped and lowercased
    pub fn load(&self) -> Result<HashMap<String, String>> {
        let mut config = HashMap::new();

        for (key, value) in env::vars() {
            if let Some(ref prefix) = self.prefix {
                if let Some(rest) = key.strip_prefix(prefix.as_str())
                    && let Some(trimmed) = rest.strip_prefix('_')
                    && !trimmed.is_empty()
                {
                    config.insert(trimmed.to_lowercase(), value);
                }
            } else {
                config.insert(key.to_lowercase(), value);
            }
        }

        Ok(config)
    }

    /// Load matching variables as a nested settings overlay
    ///
    /// `KEYLOCK_TOKEN_RETRY_TIMES=5` becomes `{"token": {"retry_times": 5}}`.
    pub fn load_nested(&self) -> Result<Value> {
        Ok(nest_pairs(self.load()?))
    }

    /// Load a specific environment variable
    pub fn load_var(&self, key: &str) -> Result<String> {
        let full_key = if let Some(ref prefix) = self.prefix {
            format!("{}_{}", prefix, key.to_uppercase())
        } else {
            key.to_uppercase()
        };

        env::var(&full_key).map_err(ConfigError::EnvError)
    }

    /// Load with default value
    pub fn load_var_or(&self, key: &str, default: &str) -> String {
        self.load_var(key).unwrap_or_else(|_| default.to_string())
    }
}

impl Default for EnvLoader {
    fn default() -> Self {
        Self::new(Some("KEYLOCK".to_string()))
    }
}
