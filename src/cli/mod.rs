//! # Command-Line Interface
//!
//! User-facing CLI commands and output formatting.
//!
//! ## Commands
//!
//! | Command | Purpose |
//! |---------|---------|
//! | `build` (default) | Collect sources, prepare the sandbox, run every stage |
//! | `plan [STAGE]` | Print the resolution tree and load order of a stage |
//! | `plugins` | List user and builtin plugins |
//!
//! ## Configuration
//!
//! `--config/-c`, else `$ALTER_CONF`, else `alter.yaml` in the working
//! directory.
//!
//! ## Output Formats
//!
//! All commands support `--format` flag:
//! - `text` (default) - Human-readable output
//! - `json` - Machine-parseable JSON
//!
//! ## Verbose Mode
//!
//! Use `--verbose` (or `-v`) for debug logs on stderr; `RUST_LOG` overrides
//! the level:
//! ```bash
//! alter --verbose plan site
//! ```
//!
//! ## Entry Point
//!
//! Call [`run()`] to parse arguments and execute the appropriate command.

mod app;
mod build_cmd;
mod output;
mod plan_cmd;
mod plugin_cmd;

pub use app::{run, Cli, Commands};
pub use output::{Output, OutputFormat};
