//! alter - a plugin-driven build and preprocessing tool
//!
//! Sources are collected into a sandbox and handed to plugins. Plugins
//! declare the slots they provide and use; each stage's requirements are
//! resolved into a dependency plan, flattened into a load order and run
//! against a shared, lazily computed context.

pub mod cli;
pub mod context;
pub mod domain;
pub mod plugin;
pub mod storage;

pub use context::{FileContext, ProjectContext};
pub use domain::{LoadPlan, PluginRegistry, PluginSpec, ResolutionPlan};
