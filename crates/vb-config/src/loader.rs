//! YAML loader for bridge configuration files
//!
//! Supported tags:
//! - `!include path` - splice in another YAML file (relative to the including file)
//! - `!secret key` - substitute a value from secrets.yaml
//! - `!env_var NAME [default]` - substitute an environment variable

use crate::error::{ConfigError, ConfigResult};
use crate::secrets::Secrets;
use serde_yaml::Value;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Tag-aware YAML loader rooted at a config directory
pub struct ConfigLoader {
    config_dir: PathBuf,
    secrets: Secrets,
    /// Files currently being loaded, for cycle detection
    include_stack: HashSet<PathBuf>,
}

impl ConfigLoader {
    /// Create a loader, reading secrets.yaml from `config_dir` if present
    pub fn new(config_dir: impl Into<PathBuf>) -> ConfigResult<Self> {
        let config_dir = config_dir.into();
        let secrets = Secrets::load(&config_dir)?;

        Ok(Self {
            config_dir,
            secrets,
            include_stack: HashSet::new(),
        })
    }

    pub fn with_secrets(config_dir: impl Into<PathBuf>, secrets: Secrets) -> Self {
        Self {
            config_dir: config_dir.into(),
            secrets,
            include_stack: HashSet::new(),
        }
    }

    pub fn load_file(&mut self, path: impl AsRef<Path>) -> ConfigResult<Value> {
        let path = self.resolve_path(path.as_ref());
        debug!(path = ?path, "Loading config file");

        if self.include_stack.contains(&path) {
            return Err(ConfigError::CircularInclude { path });
        }

        let content = fs::read_to_string(&path).map_err(|e| ConfigError::ReadFile {
            path: path.clone(),
            source: e,
        })?;

        self.include_stack.insert(path.clone());
        let result = self.load_string(&content, &path);
        self.include_stack.remove(&path);

        result
    }

    pub fn load_string(&mut self, content: &str, source_path: &Path) -> ConfigResult<Value> {
        let value: Value = serde_yaml::from_str(content).map_err(|e| ConfigError::ParseYaml {
            path: source_path.to_path_buf(),
            source: e,
        })?;

        self.resolve_tags(value, source_path)
    }

    fn resolve_tags(&mut self, value: Value, source_path: &Path) -> ConfigResult<Value> {
        match value {
            Value::Tagged(tagged) => {
                let tagged = *tagged;
                let tag = tagged.tag.to_string();
                trace!(tag = %tag, "Resolving tag");
                match tag.as_str() {
                    "!include" => {
                        let include_path = self.include_path(&tagged.value, source_path)?;
                        self.load_file(&include_path)
                    }
                    "!secret" => self.secret(tagged.value),
                    "!env_var" => env_var(tagged.value),
                    _ => Err(ConfigError::InvalidValue {
                        key: tag,
                        reason: "unsupported tag".to_string(),
                    }),
                }
            }
            Value::Mapping(map) => {
                let mut resolved = serde_yaml::Mapping::new();
                for (k, v) in map {
                    resolved.insert(k, self.resolve_tags(v, source_path)?);
                }
                Ok(Value::Mapping(resolved))
            }
            Value::Sequence(seq) => seq
                .into_iter()
                .map(|v| self.resolve_tags(v, source_path))
                .collect::<ConfigResult<Vec<_>>>()
                .map(Value::Sequence),
            other => Ok(other),
        }
    }

    fn secret(&self, value: Value) -> ConfigResult<Value> {
        let Value::String(key) = value else {
            return Err(ConfigError::InvalidValue {
                key: "!secret".to_string(),
                reason: "secret key must be a string".to_string(),
            });
        };

        let secret = self.secrets.get(&key)?;
        debug!(key = %key, "Substituted secret");
        Ok(Value::String(secret.to_string()))
    }

    fn include_path(&self, value: &Value, source_path: &Path) -> ConfigResult<PathBuf> {
        let Value::String(path) = value else {
            return Err(ConfigError::InvalidIncludePath {
                path: format!("{:?}", value),
                reason: "path must be a string".to_string(),
            });
        };

        let candidate = Path::new(path);
        if candidate.is_absolute() {
            return Ok(candidate.to_path_buf());
        }
        let base_dir = source_path.parent().unwrap_or(&self.config_dir);
        Ok(base_dir.join(candidate))
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.config_dir.join(path)
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }
}

/// `!env_var NAME` or `!env_var NAME fallback`
fn env_var(value: Value) -> ConfigResult<Value> {
    let Value::String(spec) = value else {
        return Err(ConfigError::InvalidValue {
            key: "!env_var".to_string(),
            reason: "environment variable name must be a string".to_string(),
        });
    };

    let mut parts = spec.splitn(2, char::is_whitespace);
    let name = parts.next().unwrap_or_default().to_string();
    let fallback = parts.next().map(|s| s.trim().to_string());

    match (std::env::var(&name), fallback) {
        (Ok(value), _) => Ok(Value::String(value)),
        (Err(_), Some(fallback)) => Ok(Value::String(fallback)),
        (Err(_), None) => Err(ConfigError::EnvVarNotFound { var: name }),
    }
}

/// Load a YAML file from `config_dir` with tag resolution
pub fn load_yaml(config_dir: impl Into<PathBuf>, file: impl AsRef<Path>) -> ConfigResult<Value> {
    let mut loader = ConfigLoader::new(config_dir)?;
    loader.load_file(file)
}
