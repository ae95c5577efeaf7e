//! Executable units
//!
//! An [`ExecutableUnit`] is what a plugin resolves to: a set of named
//! entrypoints, each declaring up front which pipeline shape it accepts.
//! The runner checks that declaration against the plugin's pipeline before
//! anything is invoked.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use thiserror::Error;

use crate::context::{ContextError, FileContext, ProjectContext};
use super::spec::PipelineKind;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot load a plugin from {}: file not found", .0.display())]
    NotFound(PathBuf),

    #[error("cannot load a plugin from {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid manifest from {}: {reason}", path.display())]
    Manifest { path: PathBuf, reason: String },

    #[error("attempt to resolve badly formed (no unit) preloaded plugin '{0}'")]
    Unbound(String),

    #[error("'{0}' is a virtual plugin and has no executable unit")]
    Virtual(String),
}

/// Failure raised by an entrypoint invocation
#[derive(Debug, Error)]
pub enum InvocationError {
    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Protocol(String),

    #[error("plugin process exited with {status}: {stderr}")]
    Exit { status: String, stderr: String },
}

impl InvocationError {
    /// Short name of the failure category, for diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            InvocationError::Failed(_) => "PluginFailure",
            InvocationError::Context(_) => "ContextError",
            InvocationError::Io(_) => "IoError",
            InvocationError::Protocol(_) => "ProtocolError",
            InvocationError::Exit { .. } => "ExitStatus",
        }
    }
}

/// A project entrypoint: `(project root, project context)`
pub type ProjectFn = Rc<dyn Fn(&Path, &mut ProjectContext) -> Result<(), InvocationError>>;

/// A file entrypoint: `(matched file path, file context)`
pub type FileFn = Rc<dyn Fn(&Path, &mut FileContext) -> Result<(), InvocationError>>;

/// A callable entrypoint with its declared shape
#[derive(Clone)]
pub enum Entrypoint {
    Project(ProjectFn),
    File(FileFn),
}

impl Entrypoint {
    /// The pipeline kind this entrypoint can serve
    pub fn shape(&self) -> PipelineKind {
        match self {
            Entrypoint::Project(_) => PipelineKind::Project,
            Entrypoint::File(_) => PipelineKind::File,
        }
    }
}

impl fmt::Debug for Entrypoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entrypoint::{:?}", self.shape())
    }
}

/// A loaded plugin: named entrypoints
#[derive(Clone, Default)]
pub struct ExecutableUnit {
    name: String,
    entrypoints: BTreeMap<String, Entrypoint>,
}

impl ExecutableUnit {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entrypoints: BTreeMap::new(),
        }
    }

    /// Adds a project entrypoint
    pub fn with_project<F>(mut self, entrypoint: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Path, &mut ProjectContext) -> Result<(), InvocationError> + 'static,
    {
        self.insert(entrypoint, Entrypoint::Project(Rc::new(f)));
        self
    }

    /// Adds a file entrypoint
    pub fn with_file<F>(mut self, entrypoint: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Path, &mut FileContext) -> Result<(), InvocationError> + 'static,
    {
        self.insert(entrypoint, Entrypoint::File(Rc::new(f)));
        self
    }

    pub fn insert(&mut self, entrypoint: impl Into<String>, callable: Entrypoint) {
        self.entrypoints.insert(entrypoint.into(), callable);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entrypoint(&self, name: &str) -> Option<&Entrypoint> {
        self.entrypoints.get(name)
    }

    pub fn entrypoint_names(&self) -> impl Iterator<Item = &str> {
        self.entrypoints.keys().map(String::as_str)
    }
}

impl fmt::Debug for ExecutableUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutableUnit")
            .field("name", &self.name)
            .field("entrypoints", &self.entrypoints)
            .finish()
    }
}

/// Loads a user plugin's executable unit from its source location
pub trait CodeUnit {
    fn load_from_path(&self, plugin: &str, path: &Path) -> Result<ExecutableUnit, LoadError>;
}
