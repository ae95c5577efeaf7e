//! # Plugin System
//!
//! Loading and execution of plugins.
//!
//! ## Overview
//!
//! A plugin resolves to an [`ExecutableUnit`](crate::domain::ExecutableUnit): named entrypoints, each
//! declaring the pipeline shape it accepts. User plugins are separate
//! executables loaded through [`ProcessLoader`]; builtins are bound to
//! in-process units from the start.
//!
//! ## Entrypoint shapes
//!
//! | Pipeline | Entrypoint receives | Invocations |
//! |----------|---------------------|-------------|
//! | `project` | sandbox root, [`ProjectContext`](crate::context::ProjectContext) | one |
//! | `file` | matched file, [`FileContext`](crate::context::FileContext) | one per matching file |
//!
//! ## Protocol
//!
//! ```text
//! alter                          Plugin executable
//!  │                               │
//!  ├── <path> --manifest ─────────►│
//!  │◄── {"name", "entrypoints": {"main": "file"}}
//!  │                               │
//!  ├── Env: ALTER_PLUGIN, ALTER_ENTRYPOINT, ALTER_TARGET, ALTER_UNIT_ID
//!  ├── Stdin: {"entrypoint", "target", "path", "properties"}
//!  │◄── Stdout: {"success": true, "properties": {...}}
//! ```
//!
//! ## Key Types
//!
//! - [`ProcessLoader`] - Loads a user plugin's unit from its executable
//! - [`Runner`] - Executes a load plan against the sandbox
//! - [`RunReport`] - Per-plugin outcome of a run

pub mod builtin;
mod process;
mod protocol;
mod runner;

pub use builtin::list_builtins;
pub use process::{unit_id, ProcessLoader};
pub use protocol::{PluginManifest, PluginRequest, PluginResponse};
pub use runner::{Invocation, PluginReport, PluginState, RunError, RunReport, Runner};
