//! Configuration loading.
//!
//! The engine only ever sees the [`ConfigProvider`] capability. The binary
//! backs it with [`PropertiesConfig`], an INI-style `config.properties` file
//! whose values can be overridden per key by `SLOTHOUND_<KEY>` environment
//! variables.

pub mod policy;

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "config.properties";

/// Prefix for per-key environment overrides.
const ENV_PREFIX: &str = "SLOTHOUND_";

/// Section every key lives under.
const SECTION: &str = "DEFAULT";

/// Values written to a freshly created configuration file.
pub const DEFAULTS: &[(&str, &str)] = &[
    ("username", ""),
    ("password", ""),
    ("city_index", ""),
    ("unit_id", ""),
    ("unit_name", ""),
    ("dep_id", ""),
    ("dep_name", ""),
    ("doc_id", ""),
    ("doctor_name", ""),
    ("patient_name", ""),
    ("weeks", "1,2,3,4,5,6,7"),
    ("days", "am,pm"),
    ("sleepTime", "3000"),
    ("brushStartDate", ""),
    ("enableAppoint", "false"),
    ("appointTime", ""),
    ("brushChannel", ""),
    ("enableProxy", "false"),
    ("proxyFilePath", ""),
    ("proxyMode", "ROUND_ROBIN"),
    ("maxRetries", "3"),
    ("maxCycles", ""),
];

/// Read-only key/value lookup consumed by the engine.
pub trait ConfigProvider {
    /// Value for `key`, or `default` when unset.
    fn get(&self, key: &str, default: &str) -> String;
}

impl ConfigProvider for BTreeMap<String, String> {
    fn get(&self, key: &str, default: &str) -> String {
        BTreeMap::get(self, &normalize_key(key))
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }
}

/// File-backed configuration in `[DEFAULT]` INI form.
#[derive(Debug, Clone)]
pub struct PropertiesConfig {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl PropertiesConfig {
    /// Load `path`, creating it with [`DEFAULTS`] if it does not exist.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load(path);
        }

        tracing::info!("config file {} not found, writing defaults", path.display());
        let values = DEFAULTS
            .iter()
            .map(|(k, v)| (normalize_key(k), v.to_string()))
            .collect();
        let config = Self {
            path: path.to_path_buf(),
            values,
        };
        config.save()?;
        Ok(config)
    }

    /// Load an existing file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            values: parse_properties(&text),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Set a value and persist the whole file.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.values.insert(normalize_key(key), value.to_string());
        self.save()
    }

    /// Write all values back to disk.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.path, render_properties(&self.values))
            .with_context(|| format!("failed to write config: {}", self.path.display()))
    }
}

impl ConfigProvider for PropertiesConfig {
    fn get(&self, key: &str, default: &str) -> String {
        if let Some(v) = read_env_override(key) {
            return v;
        }
        self.values
            .get(&normalize_key(key))
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }
}

fn read_env_override(key: &str) -> Option<String> {
    let name = format!("{ENV_PREFIX}{}", key.to_ascii_uppercase());
    std::env::var(name).ok()
}

/// Keys are case-insensitive.
fn normalize_key(key: &str) -> String {
    key.trim().to_ascii_lowercase()
}

/// Parse INI-style text. Section headers are ignored, `#`/`;` start comments,
/// and both `=` and `:` separate key from value.
pub fn parse_properties(text: &str) -> BTreeMap<String, String> {
    let mut values = BTreeMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if line.starts_with('[') && line.ends_with(']') {
            continue;
        }
        let Some(idx) = line.find(['=', ':']) else {
            continue;
        };
        let (key, value) = line.split_at(idx);
        values.insert(normalize_key(key), value[1..].trim().to_string());
    }
    values
}

fn render_properties(values: &BTreeMap<String, String>) -> String {
    let mut out = format!("[{SECTION}]\n");
    for (key, value) in values {
        if value.is_empty() {
            out.push_str(&format!("{key} =\n"));
        } else {
            out.push_str(&format!("{key} = {value}\n"));
        }
    }
    out
}
