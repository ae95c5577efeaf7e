//! Project management
//!
//! A [`Project`] is a loaded configuration plus the plugin registry built
//! from it: user plugins in declaration order, then builtins. It plans and
//! runs stages; the CLI only sequences them.

use std::path::Path;

use thiserror::Error;

use super::config::{Config, ConfigError, Stage};
use crate::context::ProjectContext;
use crate::domain::{
    linearize, resolve_requirements, LoadPlan, PluginRegistry, Requirements, ResolveError, Resolved,
    SequenceError, SpecError,
};
use crate::plugin::{list_builtins, ProcessLoader, RunError, RunReport, Runner};

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Spec(#[from] SpecError),

    #[error("Plugin dependency error: {0}")]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Sequence(#[from] SequenceError),

    #[error(transparent)]
    Run(#[from] RunError),

    #[error("No stage named '{0}'")]
    UnknownStage(String),
}

/// Resolution and load order for one stage
#[derive(Debug, Clone)]
pub struct StagePlan {
    pub stage: String,
    pub resolved: Resolved,
    pub order: LoadPlan,
}

/// A configured build
pub struct Project {
    config: Config,
    registry: PluginRegistry,
    loader: ProcessLoader,
}

impl Project {
    /// Loads the configuration at `path` and builds the registry
    pub fn open(path: &Path) -> Result<Self, ProjectError> {
        Self::from_config(Config::load(path)?)
    }

    pub fn from_config(config: Config) -> Result<Self, ProjectError> {
        let mut registry = PluginRegistry::from_specs(config.plugin_specs()?)?;
        let user = registry.len();
        for builtin in list_builtins() {
            registry.register(builtin)?;
        }
        tracing::info!("{} plugins ready ({} user, {} builtin)", registry.len(), user, registry.len() - user);

        let loader = ProcessLoader::new(config.base_dir());
        Ok(Self {
            config,
            registry,
            loader,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Every slot requested by a plugin or a stage, with its requesters
    pub fn requirements(&self) -> Requirements {
        let mut requirements = Requirements::from_plugins(self.registry.iter());
        for stage in self.config.stages() {
            for slot in stage.uses.iter().flatten() {
                requirements.add(slot, stage.requester());
            }
        }
        requirements
    }

    /// First-pass check that every requested slot has a provider.
    ///
    /// Slots with several providers are only warned about; the first one in
    /// discovery order is tried first.
    pub fn check(&self) -> Result<(), ProjectError> {
        let providers = self.registry.providers();
        self.requirements().check(&providers)?;

        for (slot, names) in providers.contested() {
            tracing::warn!(
                "slot '{}' is provided by {} plugins: {}",
                slot,
                names.len(),
                names.join(", ")
            );
        }
        Ok(())
    }

    pub fn stage(&self, name: &str) -> Result<&Stage, ProjectError> {
        self.config
            .stage(name)
            .ok_or_else(|| ProjectError::UnknownStage(name.to_string()))
    }

    /// Resolves and orders a stage. `None` if it declares no `use`.
    pub fn plan(&self, stage: &Stage) -> Result<Option<StagePlan>, ProjectError> {
        let Some(uses) = &stage.uses else {
            return Ok(None);
        };

        let providers = self.registry.providers();
        let resolved = resolve_requirements(&stage.name, uses, &providers)?;
        let order = linearize(&resolved.plan)?;
        Ok(Some(StagePlan {
            stage: stage.name.clone(),
            resolved,
            order,
        }))
    }

    /// Plans and runs a stage against `root`. `None` if it was skipped.
    pub fn run_stage(
        &self,
        stage: &Stage,
        root: &Path,
        ctx: &mut ProjectContext,
    ) -> Result<Option<RunReport>, ProjectError> {
        let Some(plan) = self.plan(stage)? else {
            tracing::info!("no {} steps specified, skipping", stage.name);
            return Ok(None);
        };

        tracing::debug!("Running {} in {}", stage.name, root.display());
        let report = Runner::new(&self.registry, &self.loader)
            .with_exclude(stage.exclude.clone())
            .run(&plan.order, root, ctx)?;
        Ok(Some(report))
    }
}
