//! Plugin specifications
//!
//! A [`PluginSpec`] is the immutable description of one plugin: the slots it
//! provides, the slots it uses, and how its entrypoint is dispatched. Specs
//! are built once during discovery and live for the whole run.

use std::cell::OnceCell;
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_yaml::Value as Yaml;
use thiserror::Error;

use super::unit::{CodeUnit, ExecutableUnit, LoadError};

/// Keys accepted in a plugin declaration
const DECL_FIELDS: &[&str] = &["provides", "use", "path", "pipeline"];

#[derive(Debug, Error)]
pub enum SpecError {
    #[error("While loading plugin {plugin} info: declaration is not a table (actually {found})")]
    NotATable { plugin: String, found: String },

    #[error("While loading plugin {plugin} info: '{field}' {reason}")]
    InvalidField {
        plugin: String,
        field: String,
        reason: String,
    },

    #[error("While loading plugin {plugin} info: unknown field '{field}'")]
    UnknownField { plugin: String, field: String },

    #[error("While loading plugin {plugin} info: no source path")]
    MissingPath { plugin: String },

    #[error("While loading plugin {plugin} info: no pipeline info")]
    MissingPipeline { plugin: String },

    #[error("While loading plugin {plugin} info: unknown pipeline target '{target}' (expected 'file' or 'project')")]
    UnknownTarget { plugin: String, target: String },

    #[error("While loading plugin {plugin} info: invalid match pattern '{pattern}': {source}")]
    InvalidPattern {
        plugin: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("While loading plugin {plugin} info: slot '{slot}' appears more than once in 'use'")]
    DuplicateUse { plugin: String, slot: String },

    #[error("Plugin '{0}' is declared more than once")]
    DuplicateName(String),
}

/// Which shape of dispatch a pipeline uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineKind {
    /// One invocation against the whole sandbox
    Project,
    /// One invocation per matching file
    File,
}

impl PipelineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineKind::Project => "project",
            PipelineKind::File => "file",
        }
    }

    /// Describes the inputs an entrypoint of this kind receives
    pub fn signature(&self) -> &'static str {
        match self {
            PipelineKind::Project => "(project root path, project context)",
            PipelineKind::File => "(matched file path, file context)",
        }
    }
}

impl fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a plugin is dispatched against the sandbox
#[derive(Debug, Clone)]
pub enum Pipeline {
    Project {
        entrypoint: String,
    },
    File {
        entrypoint: String,
        /// Unanchored search patterns over the full file path
        patterns: Vec<Regex>,
    },
}

impl Pipeline {
    pub fn project(entrypoint: impl Into<String>) -> Self {
        Pipeline::Project {
            entrypoint: entrypoint.into(),
        }
    }

    /// Builds a file pipeline, compiling every pattern
    pub fn file<I, S>(entrypoint: impl Into<String>, patterns: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| Regex::new(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Pipeline::File {
            entrypoint: entrypoint.into(),
            patterns,
        })
    }

    pub fn kind(&self) -> PipelineKind {
        match self {
            Pipeline::Project { .. } => PipelineKind::Project,
            Pipeline::File { .. } => PipelineKind::File,
        }
    }

    pub fn entrypoint(&self) -> &str {
        match self {
            Pipeline::Project { entrypoint } | Pipeline::File { entrypoint, .. } => entrypoint,
        }
    }

    /// Returns true if a file pipeline should run against `path`.
    ///
    /// An empty pattern list never matches. Project pipelines match nothing.
    pub fn matches(&self, path: &Path) -> bool {
        match self {
            Pipeline::Project { .. } => false,
            Pipeline::File { patterns, .. } => {
                let full = path.to_string_lossy();
                patterns.iter().any(|p| p.is_match(&full))
            }
        }
    }

    /// Source text of the match patterns (empty for project pipelines)
    pub fn pattern_strs(&self) -> Vec<&str> {
        match self {
            Pipeline::Project { .. } => Vec::new(),
            Pipeline::File { patterns, .. } => patterns.iter().map(Regex::as_str).collect(),
        }
    }

    fn from_decl(plugin: &str, decl: &Yaml) -> Result<Self, SpecError> {
        let table = decl.as_mapping().ok_or_else(|| SpecError::InvalidField {
            plugin: plugin.to_string(),
            field: "pipeline".to_string(),
            reason: format!("is not table (actually {})", describe(decl)),
        })?;

        let target = match table.get("target") {
            Some(Yaml::String(s)) => s.as_str(),
            Some(other) => {
                return Err(invalid(plugin, "pipeline.target", other, "is not a string"));
            }
            None => {
                return Err(SpecError::InvalidField {
                    plugin: plugin.to_string(),
                    field: "pipeline.target".to_string(),
                    reason: "is missing".to_string(),
                })
            }
        };

        let entrypoint = match table.get("entrypoint") {
            Some(Yaml::String(s)) => s.clone(),
            Some(other) => {
                return Err(invalid(plugin, "pipeline.entrypoint", other, "is not a string"));
            }
            None => {
                return Err(SpecError::InvalidField {
                    plugin: plugin.to_string(),
                    field: "pipeline.entrypoint".to_string(),
                    reason: "is missing".to_string(),
                })
            }
        };

        for key in table.keys() {
            let known = matches!(key.as_str(), Some("target" | "entrypoint" | "match"));
            if !known {
                return Err(SpecError::UnknownField {
                    plugin: plugin.to_string(),
                    field: format!("pipeline.{}", key.as_str().unwrap_or("?")),
                });
            }
        }

        match target {
            "project" => {
                if table.contains_key("match") {
                    return Err(SpecError::InvalidField {
                        plugin: plugin.to_string(),
                        field: "pipeline.match".to_string(),
                        reason: "is not allowed for target 'project'".to_string(),
                    });
                }
                Ok(Pipeline::project(entrypoint))
            }
            "file" => {
                let rules = match table.get("match") {
                    Some(value) => string_list(plugin, "pipeline.match", value)?,
                    None => {
                        return Err(SpecError::InvalidField {
                            plugin: plugin.to_string(),
                            field: "pipeline.match".to_string(),
                            reason: "is required for target 'file'".to_string(),
                        })
                    }
                };

                let mut patterns = Vec::with_capacity(rules.len());
                for rule in rules {
                    let regex = Regex::new(&rule).map_err(|source| SpecError::InvalidPattern {
                        plugin: plugin.to_string(),
                        pattern: rule.clone(),
                        source,
                    })?;
                    patterns.push(regex);
                }

                Ok(Pipeline::File {
                    entrypoint,
                    patterns,
                })
            }
            other => Err(SpecError::UnknownTarget {
                plugin: plugin.to_string(),
                target: other.to_string(),
            }),
        }
    }
}

/// Where a plugin's executable unit comes from
#[derive(Debug, Clone)]
pub enum PluginSource {
    /// User plugin, loaded from `path` on demand
    User { path: PathBuf },
    /// Builtin plugin already bound to a unit
    Preloaded { unit: Option<Rc<ExecutableUnit>> },
    /// Synthesized root for a requirement list; never executed
    Virtual,
}

/// A plugin: identity, slots and pipeline
#[derive(Debug, Clone)]
pub struct PluginSpec {
    name: String,
    provides: BTreeSet<String>,
    uses: Vec<String>,
    pipeline: Pipeline,
    source: PluginSource,
    /// User plugin unit, once loaded
    loaded: OnceCell<Rc<ExecutableUnit>>,
}

impl PluginSpec {
    /// Creates a spec that provides only its own name and uses nothing
    pub fn new(name: impl Into<String>, pipeline: Pipeline, source: PluginSource) -> Self {
        let name = name.into();
        let mut provides = BTreeSet::new();
        provides.insert(name.clone());

        Self {
            name,
            provides,
            uses: Vec::new(),
            pipeline,
            source,
            loaded: OnceCell::new(),
        }
    }

    /// Creates a user plugin loaded from `path`
    pub fn user(name: impl Into<String>, pipeline: Pipeline, path: impl Into<PathBuf>) -> Self {
        Self::new(name, pipeline, PluginSource::User { path: path.into() })
    }

    /// Creates a builtin plugin bound to an already-loaded unit
    pub fn preloaded(name: impl Into<String>, pipeline: Pipeline, unit: ExecutableUnit) -> Self {
        Self::new(
            name,
            pipeline,
            PluginSource::Preloaded {
                unit: Some(Rc::new(unit)),
            },
        )
    }

    /// Synthesizes an anonymous plugin whose only purpose is to require `uses`.
    ///
    /// It provides no slots at all, not even its own name.
    pub fn virtual_root(reason: &str, uses: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: format!("(anonymous: {})", reason),
            provides: BTreeSet::new(),
            uses: uses.into_iter().map(Into::into).collect(),
            pipeline: Pipeline::project("(anonymous)"),
            source: PluginSource::Virtual,
            loaded: OnceCell::new(),
        }
    }

    /// Adds provided slots (the plugin's own name is always provided)
    pub fn with_provides(mut self, slots: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.provides.extend(slots.into_iter().map(Into::into));
        self
    }

    /// Sets the required slots, in declaration order
    pub fn with_uses(mut self, slots: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.uses = slots.into_iter().map(Into::into).collect();
        self
    }

    /// Builds a user plugin spec from its raw declaration
    pub fn from_decl(name: &str, decl: &Yaml) -> Result<Self, SpecError> {
        tracing::debug!("Constructing plugin data for {}", name);

        let table = decl.as_mapping().ok_or_else(|| SpecError::NotATable {
            plugin: name.to_string(),
            found: describe(decl),
        })?;

        for key in table.keys() {
            if !key.as_str().is_some_and(|k| DECL_FIELDS.contains(&k)) {
                return Err(SpecError::UnknownField {
                    plugin: name.to_string(),
                    field: key.as_str().unwrap_or("?").to_string(),
                });
            }
        }

        let mut provides = BTreeSet::new();
        match table.get("provides") {
            None | Some(Yaml::Null) => {}
            Some(Yaml::String(slot)) => {
                provides.insert(slot.clone());
            }
            Some(list @ Yaml::Sequence(_)) => {
                provides.extend(string_list(name, "provides", list)?);
            }
            Some(other) => {
                return Err(invalid(name, "provides", other, "is not list or string or nothing"));
            }
        }
        provides.insert(name.to_string());

        let uses = match table.get("use") {
            None | Some(Yaml::Null) => Vec::new(),
            Some(list @ Yaml::Sequence(_)) => string_list(name, "use", list)?,
            Some(other) => return Err(invalid(name, "use", other, "is not list or nothing")),
        };
        let mut seen = BTreeSet::new();
        for slot in &uses {
            if !seen.insert(slot.as_str()) {
                return Err(SpecError::DuplicateUse {
                    plugin: name.to_string(),
                    slot: slot.clone(),
                });
            }
        }

        let path = match table.get("path") {
            None | Some(Yaml::Null) => {
                return Err(SpecError::MissingPath {
                    plugin: name.to_string(),
                })
            }
            Some(Yaml::String(path)) => PathBuf::from(path),
            Some(other) => return Err(invalid(name, "path", other, "is not a string")),
        };

        let pipeline = match table.get("pipeline") {
            None | Some(Yaml::Null) => {
                return Err(SpecError::MissingPipeline {
                    plugin: name.to_string(),
                })
            }
            Some(decl) => Pipeline::from_decl(name, decl)?,
        };

        Ok(Self {
            name: name.to_string(),
            provides,
            uses,
            pipeline,
            source: PluginSource::User { path },
            loaded: OnceCell::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn provides(&self) -> &BTreeSet<String> {
        &self.provides
    }

    pub fn uses(&self) -> &[String] {
        &self.uses
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn source(&self) -> &PluginSource {
        &self.source
    }

    pub fn is_virtual(&self) -> bool {
        matches!(self.source, PluginSource::Virtual)
    }

    /// Resolves this plugin to its executable unit.
    ///
    /// User plugins are loaded through `loader` on the first call and the
    /// unit is reused afterwards; preloaded plugins hand out their bound unit.
    pub fn resolve(&self, loader: &dyn CodeUnit) -> Result<Rc<ExecutableUnit>, LoadError> {
        match &self.source {
            PluginSource::User { path } => {
                if let Some(unit) = self.loaded.get() {
                    return Ok(Rc::clone(unit));
                }
                let unit = Rc::new(loader.load_from_path(&self.name, path)?);
                let _ = self.loaded.set(Rc::clone(&unit));
                Ok(unit)
            }
            PluginSource::Preloaded { unit: Some(unit) } => Ok(Rc::clone(unit)),
            PluginSource::Preloaded { unit: None } => Err(LoadError::Unbound(self.name.clone())),
            PluginSource::Virtual => Err(LoadError::Virtual(self.name.clone())),
        }
    }
}

impl fmt::Display for PluginSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            PluginSource::User { path } => write!(f, "<UserPlugin {} -> {}>", self.name, path.display()),
            PluginSource::Preloaded { unit: Some(unit) } => {
                write!(f, "<PreloadPlugin {} -> {}>", self.name, unit.name())
            }
            PluginSource::Preloaded { unit: None } => write!(f, "<PreloadPlugin {} -> unbound!>", self.name),
            PluginSource::Virtual => write!(f, "<Plugin {}>", self.name),
        }
    }
}

fn string_list(plugin: &str, field: &str, value: &Yaml) -> Result<Vec<String>, SpecError> {
    let items = value
        .as_sequence()
        .ok_or_else(|| invalid(plugin, field, value, "is not a list"))?;

    items
        .iter()
        .map(|item| match item {
            Yaml::String(s) => Ok(s.clone()),
            other => Err(invalid(plugin, field, other, "contains a non-string entry")),
        })
        .collect()
}

fn invalid(plugin: &str, field: &str, value: &Yaml, reason: &str) -> SpecError {
    SpecError::InvalidField {
        plugin: plugin.to_string(),
        field: field.to_string(),
        reason: format!("{} (actually {})", reason, describe(value)),
    }
}

/// Short human-readable description of a YAML value's type
fn describe(value: &Yaml) -> String {
    match value {
        Yaml::Null => "nothing".to_string(),
        Yaml::Bool(b) => format!("bool {}", b),
        Yaml::Number(n) => format!("number {}", n),
        Yaml::String(s) => format!("string {:?}", s),
        Yaml::Sequence(_) => "list".to_string(),
        Yaml::Mapping(_) => "table".to_string(),
        Yaml::Tagged(_) => "tagged value".to_string(),
    }
}
