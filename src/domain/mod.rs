//! Domain models for plugin resolution
//!
//! Contains the plugin model, executable units, provider lookup,
//! dependency resolution and load sequencing. Nothing here touches the
//! filesystem; loading user plugins goes through the [`CodeUnit`] trait.

mod registry;
mod resolve;
mod sequence;
mod spec;
mod unit;

pub use registry::{PluginRegistry, ProviderIndex, Requirements};
pub use resolve::{
    resolve, resolve_requirements, ResolutionPlan, ResolveError, ResolveStats, Resolved, Resolver,
    SlotChoice,
};
pub use sequence::{linearize, LoadPlan, SequenceError};
pub use spec::{Pipeline, PipelineKind, PluginSource, PluginSpec, SpecError};
pub use unit::{CodeUnit, Entrypoint, ExecutableUnit, FileFn, InvocationError, LoadError, ProjectFn};
