//! Dotted-key configuration backed by a TOML file.
//!
//! Nested tables flatten to dotted keys: `[python] path = "..."` is read as
//! `python.path`. Every key must be registered in [`CONFIG_ITEMS`]; items may
//! carry a default and an environment variable that overrides the file value.

use crate::error::{PylockError, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use toml_edit::{DocumentMut, Item, Table};

/// A configuration value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValue {
    Bool(bool),
    Str(String),
}

impl ConfigValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            Self::Bool(_) => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Str(_) => None,
        }
    }

    fn to_item(&self) -> Item {
        match self {
            Self::Bool(b) => toml_edit::value(*b),
            Self::Str(s) => toml_edit::value(s.as_str()),
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", b),
            Self::Str(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for ConfigValue {
    /// `"true"`/`"false"` (any case) become booleans.
    fn from(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "true" => Self::Bool(true),
            "false" => Self::Bool(false),
            _ => Self::Str(value.to_string()),
        }
    }
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Registered configuration key.
#[derive(Debug, Clone, Copy)]
pub struct ConfigItem {
    pub description: &'static str,
    pub default: Option<fn() -> ConfigValue>,
    /// Not allowed in a project-level config file.
    pub global_only: bool,
    pub env_var: Option<&'static str>,
}

impl ConfigItem {
    fn default_value(&self) -> Option<ConfigValue> {
        self.default.map(|f| f())
    }

    fn is_boolean(&self) -> bool {
        matches!(self.default_value(), Some(ConfigValue::Bool(_)))
    }
}

/// Every known configuration key.
pub const CONFIG_ITEMS: &[(&str, ConfigItem)] = &[
    (
        "cache_dir",
        ConfigItem {
            description: "The root directory of cached files",
            default: Some(default_cache_dir),
            global_only: true,
            env_var: Some("PYLOCK_CACHE_DIR"),
        },
    ),
    (
        "python.path",
        ConfigItem {
            description: "The Python interpreter path",
            default: None,
            global_only: false,
            env_var: Some("PYLOCK_PYTHON"),
        },
    ),
    (
        "python.version",
        ConfigItem {
            description: "The target Python version used to evaluate markers",
            default: Some(default_python_version),
            global_only: false,
            env_var: Some("PYLOCK_PYTHON_VERSION"),
        },
    ),
    (
        "build.isolation",
        ConfigItem {
            description: "Build source distributions in an isolated environment",
            default: Some(default_true),
            global_only: false,
            env_var: Some("PYLOCK_BUILD_ISOLATION"),
        },
    ),
];

fn default_cache_dir() -> ConfigValue {
    let base = std::env::var_os("XDG_CACHE_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".cache")))
        .unwrap_or_else(std::env::temp_dir);
    ConfigValue::Str(base.join("pylock").to_string_lossy().into_owned())
}

fn default_python_version() -> ConfigValue {
    ConfigValue::Str("3.8".into())
}

fn default_true() -> ConfigValue {
    ConfigValue::Bool(true)
}

/// Looks up a registered configuration item.
pub fn config_item(key: &str) -> Option<&'static ConfigItem> {
    CONFIG_ITEMS
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, item)| item)
}

/// Coerces an environment string to a boolean: `false`, `no`, `0` and the
/// empty string are false.
pub fn ensure_boolean(value: &str) -> bool {
    !value.is_empty() && !matches!(value.to_ascii_lowercase().as_str(), "false" | "no" | "0")
}

/// Configuration loaded from one TOML file.
///
/// # Examples
///
/// ```
/// use pylock_core::config::{Config, ConfigValue};
///
/// let dir = tempfile::tempdir().unwrap();
/// let path = dir.path().join("config.toml");
/// std::fs::write(&path, "[python]\npath = \"/usr/bin/python3\"\n").unwrap();
///
/// let config = Config::load(&path, false).unwrap();
/// assert_eq!(
///     config.get_with_env("python.path", |_| None).unwrap(),
///     ConfigValue::Str("/usr/bin/python3".into())
/// );
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    path: PathBuf,
    is_global: bool,
    file_data: BTreeMap<String, ConfigValue>,
}

impl Config {
    /// Loads `path`; a missing file yields an empty configuration.
    pub fn load(path: &Path, is_global: bool) -> Result<Self> {
        let file_data = if path.is_file() {
            let content = fs::read_to_string(path)?;
            let doc = content
                .parse::<DocumentMut>()
                .map_err(|source| PylockError::TomlParse {
                    file: path.display().to_string(),
                    source,
                })?;
            let mut data = BTreeMap::new();
            flatten(doc.as_table(), "", &mut data);
            data
        } else {
            BTreeMap::new()
        };

        tracing::debug!(
            "loaded {} config keys from {}",
            file_data.len(),
            path.display()
        );
        Ok(Self {
            path: path.to_path_buf(),
            is_global,
            file_data,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolves a key: environment variable, then file, then default.
    pub fn get(&self, key: &str) -> Result<ConfigValue> {
        self.get_with_env(key, |name| std::env::var(name).ok())
    }

    /// Same as [`Config::get`] with an explicit environment lookup.
    pub fn get_with_env<F>(&self, key: &str, env: F) -> Result<ConfigValue>
    where
        F: Fn(&str) -> Option<String>,
    {
        let item = config_item(key)
            .ok_or_else(|| PylockError::Config(format!("no such config key: {}", key)))?;

        if let Some(var) = item.env_var
            && let Some(value) = env(var)
        {
            return Ok(if item.is_boolean() {
                ConfigValue::Bool(ensure_boolean(&value))
            } else {
                ConfigValue::Str(value)
            });
        }

        self.file_data
            .get(key)
            .cloned()
            .or_else(|| item.default_value())
            .ok_or_else(|| PylockError::Config(format!("no value set for config key: {}", key)))
    }

    pub fn get_str(&self, key: &str) -> Result<String> {
        Ok(self.get(key)?.to_string())
    }

    pub fn get_bool(&self, key: &str) -> Result<bool> {
        match self.get(key)? {
            ConfigValue::Bool(b) => Ok(b),
            ConfigValue::Str(s) => Ok(ensure_boolean(&s)),
        }
    }

    /// Sets a key and writes the file back.
    pub fn set(&mut self, key: &str, value: impl Into<ConfigValue>) -> Result<()> {
        let item = config_item(key)
            .ok_or_else(|| PylockError::Config(format!("no such config key: {}", key)))?;
        if !self.is_global && item.global_only {
            return Err(PylockError::Config(format!(
                "config item '{}' is not allowed to set in project config",
                key
            )));
        }
        warn_if_shadowed(key, item);
        self.file_data.insert(key.to_string(), value.into());
        self.save()
    }

    /// Removes a key from the file, if present.
    pub fn unset(&mut self, key: &str) -> Result<()> {
        if self.file_data.remove(key).is_some() {
            if let Some(item) = config_item(key) {
                warn_if_shadowed(key, item);
            }
            self.save()?;
        }
        Ok(())
    }

    /// Keys explicitly present in the file.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.file_data.keys().map(String::as_str)
    }

    fn save(&self) -> Result<()> {
        let mut doc = DocumentMut::new();
        for (key, value) in &self.file_data {
            let mut parts: Vec<&str> = key.split('.').collect();
            let Some(last) = parts.pop() else {
                continue;
            };
            let mut table: &mut Table = doc.as_table_mut();
            for part in parts {
                table = table
                    .entry(part)
                    .or_insert(toml_edit::table())
                    .as_table_mut()
                    .ok_or_else(|| {
                        PylockError::Config(format!("config key conflicts with a value: {}", key))
                    })?;
            }
            table.insert(last, value.to_item());
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, doc.to_string())?;
        Ok(())
    }
}

fn warn_if_shadowed(key: &str, item: &ConfigItem) {
    if let Some(var) = item.env_var
        && std::env::var_os(var).is_some()
    {
        tracing::warn!(
            "config '{}' is shadowed by env var '{}', the new value won't take effect",
            key,
            var
        );
    }
}

fn flatten(table: &Table, prefix: &str, out: &mut BTreeMap<String, ConfigValue>) {
    for (key, item) in table.iter() {
        let full_key = if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}.{}", prefix, key)
        };

        if let Some(sub) = item.as_table() {
            flatten(sub, &full_key, out);
        } else if let Some(inline) = item.as_inline_table() {
            flatten(&inline.clone().into_table(), &full_key, out);
        } else if let Some(b) = item.as_bool() {
            out.insert(full_key, ConfigValue::Bool(b));
        } else if let Some(s) = item.as_str() {
            out.insert(full_key, ConfigValue::Str(s.to_string()));
        } else if let Some(value) = item.as_value() {
            out.insert(full_key, ConfigValue::Str(value.to_string().trim().to_string()));
        }
    }
}
