//! `alter plugins`: list user and builtin plugins

use std::path::Path;

use anyhow::{Context, Result};

use super::output::Output;
use crate::domain::{PluginSource, PluginSpec};
use crate::storage::Project;

pub fn run(config: &Path, output: &Output) -> Result<()> {
    let project = Project::open(config).context("Failed to load configuration")?;
    let plugins: Vec<&PluginSpec> = project.registry().iter().collect();

    if output.is_json() {
        let items: Vec<_> = plugins
            .iter()
            .map(|p| {
                serde_json::json!({
                    "name": p.name(),
                    "kind": source_kind(p),
                    "provides": p.provides(),
                    "use": p.uses(),
                    "pipeline": {
                        "target": p.pipeline().kind(),
                        "entrypoint": p.pipeline().entrypoint(),
                        "match": p.pipeline().pattern_strs(),
                    },
                })
            })
            .collect();
        output.data(&items);
        return Ok(());
    }

    println!("{:<24} {:<8} {:<8} {:<20} {}", "NAME", "KIND", "TARGET", "PROVIDES", "USE");
    println!("{}", "-".repeat(78));
    for plugin in plugins {
        let provides: Vec<&str> = plugin
            .provides()
            .iter()
            .map(String::as_str)
            .filter(|slot| *slot != plugin.name())
            .collect();
        println!(
            "{:<24} {:<8} {:<8} {:<20} {}",
            plugin.name(),
            source_kind(plugin),
            plugin.pipeline().kind().as_str(),
            provides.join(", "),
            plugin.uses().join(", ")
        );
    }
    Ok(())
}

fn source_kind(spec: &PluginSpec) -> &'static str {
    match spec.source() {
        PluginSource::User { .. } => "user",
        PluginSource::Preloaded { .. } => "builtin",
        PluginSource::Virtual => "virtual",
    }
}
