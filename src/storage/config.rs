//! Configuration handling
//!
//! The build is described by one file, `alter.yaml` by default (or the path
//! in `ALTER_CONF`). Files ending in `.toml` are read as TOML, anything else
//! as YAML; both map onto the same model.
//!
//! Plugin declarations are kept as raw values here and validated by
//! [`PluginSpec::from_decl`], so field errors name the plugin.

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Deserialize;
use serde_yaml::{Mapping, Value as Yaml};
use thiserror::Error;

use crate::domain::{PluginSpec, SpecError};

/// Name of the stage built from `preprocess.use`
pub const PREPROCESS: &str = "preprocess";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(
        "No configuration file found at {}. Set ALTER_CONF or create alter.yaml in the working directory.",
        .0.display()
    )]
    NotFound(PathBuf),

    #[error("Failed to read configuration {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Invalid exclude pattern in stage '{stage}': {source}")]
    Pattern {
        stage: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    collect: Option<RawCollect>,
    #[serde(default)]
    preprocess: Option<RawStage>,
    #[serde(default)]
    buildsystem: Option<Mapping>,
    #[serde(default)]
    plugins: Option<Mapping>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCollect {
    #[serde(default)]
    rules: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawStage {
    #[serde(default, rename = "use")]
    uses: Option<Vec<String>>,
    #[serde(default)]
    exclude: Vec<String>,
}

/// A named group of top-level requirements run together
#[derive(Debug, Clone)]
pub struct Stage {
    pub name: String,
    /// `None` when the stage declares no `use`; such a stage is skipped
    pub uses: Option<Vec<String>>,
    /// Files matching any of these are skipped by file plugins
    pub exclude: Vec<Regex>,
}

impl Stage {
    /// Who asked for this stage's slots, for diagnostics
    pub fn requester(&self) -> String {
        if self.name == PREPROCESS {
            format!("'{}' action", self.name)
        } else {
            format!("'{}' stage", self.name)
        }
    }
}

/// A loaded configuration file
#[derive(Debug, Clone)]
pub struct Config {
    path: PathBuf,
    base_dir: PathBuf,
    rules: Vec<String>,
    stages: Vec<Stage>,
    plugins: Vec<(String, Yaml)>,
}

impl Config {
    /// Loads the configuration at `path`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &text)
    }

    /// Parses `text` as the configuration found at `path`
    pub fn parse(path: &Path, text: &str) -> Result<Self, ConfigError> {
        let is_toml = path.extension().is_some_and(|ext| ext == "toml");
        let raw: RawConfig = if is_toml {
            toml::from_str(text).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?
        } else {
            // An empty YAML document is null
            serde_yaml::from_str::<Option<RawConfig>>(text)
                .map_err(|e| ConfigError::Parse {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })?
                .unwrap_or_default()
        };

        let path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let rules = match raw.collect.and_then(|c| c.rules) {
            None => {
                return Err(ConfigError::Invalid(
                    "No input rules specified (collect.rules does not exist)".to_string(),
                ))
            }
            Some(rules) if rules.is_empty() => {
                return Err(ConfigError::Invalid(
                    "No input rules specified (collect.rules is empty)".to_string(),
                ))
            }
            Some(rules) => rules,
        };

        let mut stages = Vec::new();
        if let Some(pre) = raw.preprocess {
            stages.push(build_stage(PREPROCESS, pre)?);
        }
        for (key, value) in raw.buildsystem.unwrap_or_default() {
            let name = map_key(&key, "buildsystem")?;
            if name == PREPROCESS {
                return Err(ConfigError::Invalid(format!(
                    "buildsystem stage name '{}' is reserved",
                    PREPROCESS
                )));
            }
            let stage: RawStage = match value {
                Yaml::Null => RawStage::default(),
                value => serde_yaml::from_value(value).map_err(|e| {
                    ConfigError::Invalid(format!("buildsystem.{}: {}", name, e))
                })?,
            };
            stages.push(build_stage(&name, stage)?);
        }

        let mut plugins = Vec::new();
        for (key, value) in raw.plugins.unwrap_or_default() {
            plugins.push((map_key(&key, "plugins")?, value));
        }

        tracing::debug!(
            "Loaded configuration {} ({} rules, {} stages, {} plugins)",
            path.display(),
            rules.len(),
            stages.len(),
            plugins.len()
        );

        Ok(Self {
            path,
            base_dir,
            rules,
            stages,
            plugins,
        })
    }

    /// Absolute path of the configuration file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory that relative rules and plugin paths are resolved against
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Collection glob rules, in declaration order
    pub fn rules(&self) -> &[String] {
        &self.rules
    }

    /// `preprocess` first (when present), then build system stages in
    /// declaration order
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Validates every plugin declaration
    pub fn plugin_specs(&self) -> Result<Vec<PluginSpec>, SpecError> {
        self.plugins
            .iter()
            .map(|(name, decl)| PluginSpec::from_decl(name, decl))
            .collect()
    }
}

fn build_stage(name: &str, raw: RawStage) -> Result<Stage, ConfigError> {
    let exclude = raw
        .exclude
        .iter()
        .map(|p| Regex::new(p))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| ConfigError::Pattern {
            stage: name.to_string(),
            source,
        })?;

    Ok(Stage {
        name: name.to_string(),
        uses: raw.uses,
        exclude,
    })
}

fn map_key(key: &Yaml, section: &str) -> Result<String, ConfigError> {
    key.as_str()
        .map(String::from)
        .ok_or_else(|| ConfigError::Invalid(format!("{} keys must be strings", section)))
}
