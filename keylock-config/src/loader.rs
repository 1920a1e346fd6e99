// Settings file loaders

use crate::{ConfigError, Result};
use serde_json::Value;
use std::fs;
use std::path::Path;

/// Supported settings file formats
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FileFormat {
    Json,
    Toml,
    Env,
}

impl FileFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "json" => Some(FileFormat::Json),
            "toml" => Some(FileFormat::Toml),
            "env" => Some(FileFormat::Env),
            _ => None,
        }
    }
}

/// Settings file loader
pub struct ConfigLoader {
    format: FileFormat,
}

impl ConfigLoader {
    pub fn new(format: FileFormat) -> Self {
        Self { format }
    }

    /// Auto-detect format from file extension
    pub fn auto(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .ok_or_else(|| ConfigError::LoadError(format!("No file extension: {}", path.display())))?;

        let format = FileFormat::from_extension(ext)
            .ok_or_else(|| ConfigError::LoadError(format!("Unsupported format: {}", ext)))?;

        Ok(Self::new(format))
    }

    /// Load settings from a file
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<Value> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::LoadError(format!("Failed to read {}: {}", path.as_ref().display(), e)))?;

        self.parse(&content)
    }

    /// Parse settings from a string
    pub fn parse(&self, content: &str) -> Result<Value> {
        match self.format {
            FileFormat::Json => self.parse_json(content),
            FileFormat::Toml => self.parse_toml(content),
            FileFormat::Env => self.parse_env(content),
        }
    }

    fn parse_json(&self, content: &str) -> Result<Value> {
        serde_json::from_str(content)
            .map_err(|e| ConfigError::ParseError(format!("JSON parse error: {}", e)))
    }

    fn parse_toml(&self, content: &str) -> Result<Value> {
        let toml_value: toml::Value = toml::from_str(content)
            .map_err(|e| ConfigError::ParseError(format!("TOML parse error: {}", e)))?;

        serde_json::to_value(toml_value)
            .map_err(|e| ConfigError::ParseError(format!("TOML to JSON conversion error: {}", e)))
    }

    /// `.env` files use the same `SECTION_FIELD` naming as environment overrides.
    fn parse_env(&self, content: &str) -> Result<Value> {
        let mut pairs = Vec::new();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                let value = value.trim().trim_matches('"').trim_matches('\'');
                pairs.push((key.trim().to_lowercase(), value.to_string()));
            }
        }

        Ok(nest_pairs(pairs))
    }
}

/// Sections that a flat `section_field` name is split into.
pub(crate) const SECTIONS: &[&str] = &["token", "recipe"];

/// Turn flat `token_ttl_ms=500` style pairs into `{"token": {"ttl_ms": "500"}}`.
///
/// Values stay strings; [`merge`] converts them to the type of the field
/// they land on.
pub(crate) fn nest_pairs<I>(pairs: I) -> Value
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut root = serde_json::Map::new();

    for (key, raw) in pairs {
        let value = Value::String(raw);
        match key.split_once('_') {
            Some((section, field)) if SECTIONS.contains(&section) => {
                let entry = root
                    .entry(section.to_string())
                    .or_insert_with(|| Value::Object(serde_json::Map::new()));
                if let Value::Object(map) = entry {
                    map.insert(field.to_string(), value);
                }
            }
            _ => {
                root.insert(key, value);
            }
        }
    }

    Value::Object(root)
}

/// Recursively overlay `overlay` onto `base`; scalars in `overlay` win.
///
/// A string landing on a numeric or boolean field is parsed as that type;
/// if it does not parse it is kept and deserialisation reports the field.
pub(crate) fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, Value::String(raw)) if slot.is_u64() => {
            *slot = match raw.trim().parse::<u64>() {
                Ok(n) => Value::from(n),
                Err(_) => Value::String(raw),
            };
        }
        (slot, Value::String(raw)) if slot.is_boolean() => {
            *slot = match raw.trim().to_lowercase().as_str() {
                "true" | "1" => Value::Bool(true),
                "false" | "0" => Value::Bool(false),
                _ => Value::String(raw),
            };
        }
        (slot, value) => *slot = value,
    }
}
