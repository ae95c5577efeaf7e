//! `alter build`: collect, sandbox, then run every stage in order

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use super::output::Output;
use crate::context::ProjectContext;
use crate::plugin::RunReport;
use crate::storage::{collect, Project, Sandbox, PREPROCESS};

#[derive(Serialize)]
struct StageSummary<'a> {
    stage: &'a str,
    #[serde(flatten)]
    report: RunReport,
}

pub fn run(config: &Path, keep: bool, output: &Output) -> Result<()> {
    let project = Project::open(config).context("Failed to load configuration")?;
    project.check()?;

    let sources = collect(project.config().base_dir(), project.config().rules())?;
    let sandbox = Sandbox::prepare(&sources).context("Failed to prepare the sandbox")?;

    if project.config().stage(PREPROCESS).is_none() {
        tracing::info!("no pre-processing specified, skipping");
    }

    let mut ctx = ProjectContext::new();
    let mut summaries = Vec::new();
    for stage in project.config().stages() {
        let report = project
            .run_stage(stage, sandbox.root(), &mut ctx)
            .with_context(|| format!("Stage '{}' failed", stage.name))?;
        if let Some(report) = report {
            summaries.push(StageSummary {
                stage: &stage.name,
                report,
            });
        }
    }

    let kept = keep.then(|| sandbox.keep());

    if output.is_json() {
        output.data(&serde_json::json!({
            "success": true,
            "sources": sources.len(),
            "stages": summaries,
            "sandbox": kept,
        }));
        return Ok(());
    }

    for summary in &summaries {
        let names: Vec<&str> = summary.report.plugins.iter().map(|p| p.name.as_str()).collect();
        let invocations = format!("{} invocations", summary.report.invocations());
        let order = names.join(" -> ");
        output.row(&[summary.stage, invocations.as_str(), order.as_str()]);
    }
    if let Some(path) = &kept {
        output.success(&format!("Sandbox kept at {}", path.display()));
    }
    output.success(&format!(
        "Build complete: {} sources, {} stages run",
        sources.len(),
        summaries.len()
    ));
    Ok(())
}
