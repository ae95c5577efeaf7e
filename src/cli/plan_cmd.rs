//! `alter plan`: resolution tree and load order for one stage

use std::path::Path;

use anyhow::{Context, Result};

use super::output::Output;
use crate::domain::ResolutionPlan;
use crate::storage::{Project, PREPROCESS};

pub fn run(config: &Path, stage: Option<&str>, output: &Output) -> Result<()> {
    let project = Project::open(config).context("Failed to load configuration")?;
    let stage = project.stage(stage.unwrap_or(PREPROCESS))?;

    let Some(plan) = project.plan(stage)? else {
        output.success(&format!("Stage '{}' declares no requirements", stage.name));
        return Ok(());
    };

    if output.is_json() {
        output.data(&serde_json::json!({
            "stage": plan.stage,
            "plan": plan.resolved.plan,
            "order": plan.order,
            "attempts": plan.resolved.stats.attempts,
            "rejected": plan.resolved.stats.rejected,
        }));
        return Ok(());
    }

    println!("{}", plan.stage);
    print_tree(&plan.resolved.plan, "");
    output.blank();

    println!("Load order:");
    for (i, name) in plan.order.iter().enumerate() {
        println!("  {}. {}", i + 1, name);
    }
    output.blank();
    println!(
        "{} attempts, {} rejected chains",
        plan.resolved.stats.attempts, plan.resolved.stats.rejected
    );
    Ok(())
}

fn print_tree(plan: &ResolutionPlan, prefix: &str) {
    let choices = plan.choices();
    for (i, choice) in choices.iter().enumerate() {
        let last = i + 1 == choices.len();
        let (branch, indent) = if last { ("└── ", "    ") } else { ("├── ", "│   ") };

        if choice.slot == choice.provider {
            println!("{}{}{}", prefix, branch, choice.provider);
        } else {
            println!("{}{}{}: {}", prefix, branch, choice.slot, choice.provider);
        }
        print_tree(&choice.plan, &format!("{}{}", prefix, indent));
    }
}
