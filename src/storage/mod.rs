//! # Storage Layer
//!
//! Everything that touches the filesystem outside plugin invocations.
//!
//! | Concern | Source | Type |
//! |---------|--------|------|
//! | Configuration | `alter.yaml` / `alter.toml` / `$ALTER_CONF` | [`Config`] |
//! | Sources | `collect.rules` globs | [`collect`] |
//! | Working copy | temporary `alter-*` directory | [`Sandbox`] |
//!
//! ## Key Types
//!
//! - [`Project`] - Configuration plus plugin registry; plans and runs stages
//! - [`Stage`] - `preprocess` or a `buildsystem` stage

mod collect;
mod config;
mod project;
mod sandbox;

pub use collect::{collect, CollectError};
pub use config::{Config, ConfigError, Stage, PREPROCESS};
pub use project::{Project, ProjectError, StagePlan};
pub use sandbox::{Sandbox, SandboxError};
