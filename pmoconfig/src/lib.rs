//! # PMOLive Configuration Module
//!
//! YAML configuration for PMOLive:
//! - Embedded defaults (`pmolive.yaml`) merged with `<dir>/config.yaml`
//! - Keys are case-insensitive (stored lowercased)
//! - `PMOLIVE_CONFIG__SECTION__KEY=value` environment overrides
//! - Path based getters and setters that write the file back
//! - A lazily loaded global instance
//!
//! ## Usage
//!
//! ```no_run
//! use pmoconfig::get_config;
//!
//! let config = get_config();
//! let level = config.get_log_min_level()?;
//! config.set_log_min_level("DEBUG")?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{Context, Result, bail};
use dirs::home_dir;
use lazy_static::lazy_static;
use serde_yaml::{Mapping, Value};
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
};
use tracing::{debug, info};

// Configuration par défaut intégrée
const EMBEDDED_DEFAULTS: &str = include_str!("pmolive.yaml");

const CONFIG_FILE: &str = "config.yaml";
const ENV_CONFIG_DIR: &str = "PMOLIVE_CONFIG";
const ENV_PREFIX: &str = "PMOLIVE_CONFIG__";
const CONFIG_DIR_NAME: &str = ".pmolive";

const LOG_MIN_LEVEL: &[&str] = &["host", "logger", "min_level"];
const LOG_ENABLE_CONSOLE: &[&str] = &["host", "logger", "enable_console"];

const DEFAULT_LOG_MIN_LEVEL: &str = "INFO";
const DEFAULT_LOG_ENABLE_CONSOLE: bool = true;

lazy_static! {
    static ref CONFIG: Arc<Config> =
        Arc::new(Config::load_config("").expect("Failed to load PMOLive configuration"));
}

/// Configuration backed by a YAML file
///
/// Every setter updates the in-memory tree and rewrites the file.
///
/// # Examples
///
/// ```no_run
/// use pmoconfig::Config;
///
/// let config = Config::load_config("/tmp/pmolive")?;
/// let channel = config.get_value(&["stream", "channel_url"])?;
/// println!("{channel:?}");
/// # Ok::<(), anyhow::Error>(())
/// ```
#[derive(Debug)]
pub struct Config {
    directory: PathBuf,
    file: PathBuf,
    data: Mutex<Value>,
}

impl Config {
    /// Loads the configuration from `directory`
    ///
    /// An empty `directory` is looked up in order: `$PMOLIVE_CONFIG`,
    /// `./.pmolive`, `~/.pmolive`, falling back to `./.pmolive`. The directory
    /// is created when missing. The merged result (defaults, user file, env
    /// overrides) is written back to `config.yaml`.
    pub fn load_config(directory: &str) -> Result<Self> {
        let directory = locate_directory(directory);
        prepare_directory(&directory)?;
        info!(config_dir = %directory.display(), "Using config directory");

        let file = directory.join(CONFIG_FILE);
        let mut data = lowercase_keys(serde_yaml::from_str(EMBEDDED_DEFAULTS)?);

        match fs::read_to_string(&file) {
            Ok(text) => {
                let user: Value = serde_yaml::from_str(&text)
                    .with_context(|| format!("Invalid YAML in {}", file.display()))?;
                // Un fichier vide ne doit pas écraser les valeurs par défaut
                if !user.is_null() {
                    merge_yaml(&mut data, &lowercase_keys(user));
                }
                info!(config_file = %file.display(), "Loaded config file");
            }
            Err(_) => {
                info!(config_file = %file.display(), "Config file not found, writing defaults");
            }
        }

        apply_env_overrides(&mut data, env::vars());

        let config = Config {
            directory,
            file,
            data: Mutex::new(data),
        };
        config.save()?;
        Ok(config)
    }

    fn lock_data(&self) -> MutexGuard<'_, Value> {
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Directory holding `config.yaml`
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Writes the current tree to `config.yaml`
    pub fn save(&self) -> Result<()> {
        let yaml = serde_yaml::to_string(&*self.lock_data())?;
        fs::write(&self.file, yaml)
            .with_context(|| format!("Cannot write {}", self.file.display()))
    }

    /// Sets the value at `path` (e.g. `&["stream", "channel_url"]`), creating
    /// intermediate sections, then saves
    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        insert_at(&mut self.lock_data(), path, value)?;
        self.save()
    }

    /// Returns a copy of the value at `path`
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        let data = self.lock_data();
        let mut node = &*data;
        for (depth, key) in path.iter().enumerate() {
            let Value::Mapping(map) = node else {
                bail!("Path {} is not a section", path[..depth].join("."));
            };
            match map.get(&Value::String(key.to_lowercase())) {
                Some(child) => node = child,
                None => bail!("Path {} does not exist", path[..=depth].join(".")),
            }
        }
        Ok(node.clone())
    }

    // ========================================================================
    // Logger
    // ========================================================================

    /// Niveau de log minimum (`ERROR`, `WARN`, `INFO`, `DEBUG`, `TRACE`)
    pub fn get_log_min_level(&self) -> Result<String> {
        match self.get_value(LOG_MIN_LEVEL) {
            Ok(Value::String(level)) => Ok(level),
            _ => Ok(DEFAULT_LOG_MIN_LEVEL.to_string()),
        }
    }

    pub fn set_log_min_level(&self, level: &str) -> Result<()> {
        self.set_value(LOG_MIN_LEVEL, Value::String(level.to_string()))
    }

    /// Whether logs are printed on the terminal
    pub fn get_log_enable_console(&self) -> Result<bool> {
        match self.get_value(LOG_ENABLE_CONSOLE) {
            Ok(Value::Bool(enabled)) => Ok(enabled),
            _ => Ok(DEFAULT_LOG_ENABLE_CONSOLE),
        }
    }
}

/// Returns the global configuration instance, loaded on first access
///
/// # Examples
///
/// ```no_run
/// use pmoconfig::get_config;
///
/// let console = get_config().get_log_enable_console()?;
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn get_config() -> Arc<Config> {
    CONFIG.clone()
}

fn locate_directory(directory: &str) -> PathBuf {
    if !directory.is_empty() {
        return PathBuf::from(directory);
    }

    if let Ok(from_env) = env::var(ENV_CONFIG_DIR) {
        debug!(env_var = ENV_CONFIG_DIR, path = %from_env, "Config directory from env");
        return PathBuf::from(from_env);
    }

    let local = PathBuf::from(CONFIG_DIR_NAME);
    if local.is_dir() {
        return local;
    }

    home_dir()
        .map(|home| home.join(CONFIG_DIR_NAME))
        .filter(|candidate| candidate.is_dir())
        .unwrap_or(local)
}

/// Creates the directory if needed and checks that it is writable
fn prepare_directory(directory: &Path) -> Result<()> {
    fs::create_dir_all(directory)
        .with_context(|| format!("Cannot create {}", directory.display()))?;
    if !directory.is_dir() {
        bail!("Configuration path {} is not a directory", directory.display());
    }

    let probe = directory.join(".write_test");
    fs::write(&probe, b"")
        .with_context(|| format!("Configuration directory {} is not writable", directory.display()))?;
    fs::remove_file(&probe)?;
    Ok(())
}

fn insert_at(node: &mut Value, path: &[&str], value: Value) -> Result<()> {
    let Some((head, rest)) = path.split_first() else {
        *node = value;
        return Ok(());
    };
    let Value::Mapping(map) = node else {
        bail!("Cannot set {}: parent is not a section", path.join("."));
    };

    let key = Value::String(head.to_lowercase());
    if rest.is_empty() {
        map.insert(key, value);
        Ok(())
    } else {
        let child = map.entry(key).or_insert_with(|| Value::Mapping(Mapping::new()));
        insert_at(child, rest, value)
    }
}

/// Applies `PMOLIVE_CONFIG__A__B=value` pairs; values are parsed as YAML
fn apply_env_overrides(data: &mut Value, vars: impl IntoIterator<Item = (String, String)>) {
    for (name, raw) in vars {
        let Some(stripped) = name.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let path: Vec<&str> = stripped.split("__").collect();
        let value = serde_yaml::from_str(&raw).unwrap_or(Value::String(raw.clone()));
        if insert_at(data, &path, value).is_ok() {
            debug!(variable = %name, "Applied env override");
        }
    }
}

fn lowercase_keys(value: Value) -> Value {
    match value {
        Value::Mapping(map) => Value::Mapping(
            map.into_iter()
                .map(|(key, child)| {
                    let key = match key {
                        Value::String(s) => Value::String(s.to_lowercase()),
                        other => other,
                    };
                    (key, lowercase_keys(child))
                })
                .collect(),
        ),
        Value::Sequence(items) => Value::Sequence(items.into_iter().map(lowercase_keys).collect()),
        other => other,
    }
}

/// Merges `external` into `base`: sections merge key by key, anything else
/// is replaced
fn merge_yaml(base: &mut Value, external: &Value) {
    match (base, external) {
        (Value::Mapping(base_map), Value::Mapping(external_map)) => {
            for (key, value) in external_map {
                match base_map.get_mut(key) {
                    Some(existing) => merge_yaml(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (slot, value) => *slot = value.clone(),
    }
}
