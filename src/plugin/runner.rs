//! Plugin execution
//!
//! The runner takes a [`LoadPlan`] and executes each plugin in order:
//!
//! ```text
//! Declared -> Resolved -> Validated -> Dispatched(n) -> Completed
//!                                                    \-> Failed
//! ```
//!
//! Project plugins are invoked once with the sandbox root. File plugins are
//! invoked once per regular file under the sandbox whose full path matches
//! one of their patterns, in sorted walk order. The first failure aborts the
//! whole run.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use walkdir::WalkDir;

use crate::context::ProjectContext;
use crate::domain::{
    CodeUnit, Entrypoint, FileFn, InvocationError, LoadError, LoadPlan, Pipeline, PipelineKind, PluginRegistry,
    PluginSpec, ProjectFn,
};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("plugin '{0}' is not registered")]
    UnknownPlugin(String),

    #[error("failed to load plugin '{plugin}': {source}")]
    Load {
        plugin: String,
        #[source]
        source: LoadError,
    },

    #[error("plugin '{plugin}' has no entrypoint '{entrypoint}' (available: {})", available.join(", "))]
    MissingEntrypoint {
        plugin: String,
        entrypoint: String,
        available: Vec<String>,
    },

    #[error(
        "entrypoint '{entrypoint}' of plugin '{plugin}' must have the shape {}, but it is declared as a {found} entrypoint",
        expected.signature()
    )]
    ShapeMismatch {
        plugin: String,
        entrypoint: String,
        expected: PipelineKind,
        found: PipelineKind,
    },

    #[error("failed to walk the sandbox for plugin '{plugin}': {source}")]
    Walk {
        plugin: String,
        #[source]
        source: walkdir::Error,
    },

    #[error("plugin '{plugin}' failed on {} with {kind}: {source}", target.display())]
    Invocation {
        plugin: String,
        target: PathBuf,
        kind: &'static str,
        #[source]
        source: InvocationError,
    },
}

impl RunError {
    /// Name of the plugin the error belongs to
    pub fn plugin(&self) -> &str {
        match self {
            RunError::UnknownPlugin(plugin)
            | RunError::Load { plugin, .. }
            | RunError::MissingEntrypoint { plugin, .. }
            | RunError::ShapeMismatch { plugin, .. }
            | RunError::Walk { plugin, .. }
            | RunError::Invocation { plugin, .. } => plugin,
        }
    }
}

/// Lifecycle of one plugin within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginState {
    Declared,
    Resolved,
    Validated,
    Dispatched(usize),
    Completed,
    Failed,
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginState::Declared => write!(f, "declared"),
            PluginState::Resolved => write!(f, "resolved"),
            PluginState::Validated => write!(f, "validated"),
            PluginState::Dispatched(n) => write!(f, "dispatched ({} invocations)", n),
            PluginState::Completed => write!(f, "completed"),
            PluginState::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Clone)]
enum Bound {
    Project(ProjectFn),
    File(FileFn),
}

/// One call of one plugin entrypoint against one target.
///
/// File invocations pick up the target's context from the project context
/// at call time, creating it on first reference.
#[derive(Clone)]
pub struct Invocation {
    plugin: String,
    target: PathBuf,
    call: Bound,
}

impl Invocation {
    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    /// Sandbox root or matched file
    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn kind(&self) -> PipelineKind {
        match self.call {
            Bound::Project(_) => PipelineKind::Project,
            Bound::File(_) => PipelineKind::File,
        }
    }

    pub fn invoke(&self, ctx: &mut ProjectContext) -> Result<(), InvocationError> {
        match &self.call {
            Bound::Project(f) => f(&self.target, ctx),
            Bound::File(f) => f(&self.target, ctx.file(&self.target)),
        }
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("plugin", &self.plugin)
            .field("target", &self.target)
            .field("kind", &self.kind())
            .finish()
    }
}

/// Outcome of one plugin
#[derive(Debug, Clone, Serialize)]
pub struct PluginReport {
    pub name: String,
    pub state: PluginState,
    pub invocations: usize,
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
}

/// Outcome of a completed run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub plugins: Vec<PluginReport>,
}

impl RunReport {
    pub fn invocations(&self) -> usize {
        self.plugins.iter().map(|p| p.invocations).sum()
    }
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

/// Executes load plans against a sandbox
pub struct Runner<'r> {
    registry: &'r PluginRegistry,
    loader: &'r dyn CodeUnit,
    exclude: Vec<Regex>,
}

impl<'r> Runner<'r> {
    pub fn new(registry: &'r PluginRegistry, loader: &'r dyn CodeUnit) -> Self {
        Self {
            registry,
            loader,
            exclude: Vec::new(),
        }
    }

    /// Files whose full path matches any of `exclude` are skipped by file plugins
    pub fn with_exclude(mut self, exclude: Vec<Regex>) -> Self {
        self.exclude = exclude;
        self
    }

    fn spec(&self, name: &str) -> Result<&'r PluginSpec, RunError> {
        self.registry
            .get(name)
            .ok_or_else(|| RunError::UnknownPlugin(name.to_string()))
    }

    /// Resolves, validates and expands one plugin into its invocations
    pub fn prepare(&self, name: &str, root: &Path) -> Result<Vec<Invocation>, RunError> {
        let spec = self.spec(name)?;
        tracing::debug!("{}: {}", spec, PluginState::Declared);

        let unit = spec.resolve(self.loader).map_err(|source| RunError::Load {
            plugin: name.to_string(),
            source,
        })?;
        tracing::debug!("{}: {}", name, PluginState::Resolved);

        let pipeline = spec.pipeline();
        let entrypoint = unit
            .entrypoint(pipeline.entrypoint())
            .ok_or_else(|| RunError::MissingEntrypoint {
                plugin: name.to_string(),
                entrypoint: pipeline.entrypoint().to_string(),
                available: unit.entrypoint_names().map(String::from).collect(),
            })?;

        let call = match (pipeline.kind(), entrypoint) {
            (PipelineKind::Project, Entrypoint::Project(f)) => Bound::Project(f.clone()),
            (PipelineKind::File, Entrypoint::File(f)) => Bound::File(f.clone()),
            (expected, found) => {
                return Err(RunError::ShapeMismatch {
                    plugin: name.to_string(),
                    entrypoint: pipeline.entrypoint().to_string(),
                    expected,
                    found: found.shape(),
                })
            }
        };
        tracing::debug!("{}: {}", name, PluginState::Validated);

        let targets = match pipeline {
            Pipeline::Project { .. } => vec![root.to_path_buf()],
            Pipeline::File { .. } => self.matching_files(name, pipeline, root)?,
        };

        Ok(targets
            .into_iter()
            .map(|target| Invocation {
                plugin: name.to_string(),
                target,
                call: call.clone(),
            })
            .collect())
    }

    fn matching_files(&self, name: &str, pipeline: &Pipeline, root: &Path) -> Result<Vec<PathBuf>, RunError> {
        let mut files = Vec::new();
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry.map_err(|source| RunError::Walk {
                plugin: name.to_string(),
                source,
            })?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            if !pipeline.matches(path) {
                continue;
            }
            let full = path.to_string_lossy();
            if self.exclude.iter().any(|re| re.is_match(&full)) {
                tracing::debug!("{}: excluded {}", name, path.display());
                continue;
            }
            files.push(path.to_path_buf());
        }
        Ok(files)
    }

    /// Runs every plugin of `plan` in order, stopping at the first failure
    pub fn run(&self, plan: &LoadPlan, root: &Path, ctx: &mut ProjectContext) -> Result<RunReport, RunError> {
        let started_at = Utc::now();
        let mut plugins = Vec::with_capacity(plan.len());

        for name in plan.iter() {
            let start = Instant::now();
            let invocations = self.prepare(name, root).inspect_err(|e| {
                tracing::error!("{}: {}", name, e);
            })?;
            tracing::debug!("{}: {}", name, PluginState::Dispatched(invocations.len()));

            for invocation in &invocations {
                if let Err(source) = invocation.invoke(ctx) {
                    tracing::error!(
                        "Error in plugin {} on {}: {}: {}",
                        name,
                        invocation.target().display(),
                        source.kind(),
                        source
                    );
                    tracing::debug!("{}: {}", name, PluginState::Failed);
                    return Err(RunError::Invocation {
                        plugin: name.to_string(),
                        target: invocation.target().to_path_buf(),
                        kind: source.kind(),
                        source,
                    });
                }
            }

            tracing::debug!("{}: {}", name, PluginState::Completed);
            plugins.push(PluginReport {
                name: name.to_string(),
                state: PluginState::Completed,
                invocations: invocations.len(),
                elapsed: start.elapsed(),
            });
        }

        tracing::debug!("{} file contexts in use", ctx.file_count());
        Ok(RunReport {
            started_at,
            finished_at: Utc::now(),
            plugins,
        })
    }
}
