use crate::output;

use std::path::PathBuf;

use clap::Args;
use color_eyre::Result;

use matrix_service::{JobPlan, WorkflowParser};

/// Validate a workflow and show how it expands
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Path to the workflow YAML file
    pub workflow: PathBuf,

    /// Job to validate (required when the workflow has several)
    #[arg(long, value_name = "JOB")]
    pub job: Option<String>,
}

pub fn execute(args: ValidateArgs) -> Result<()> {
    let workflow_path = &args.workflow;

    if !workflow_path.exists() {
        color_eyre::eyre::bail!("Workflow file not found: {}", workflow_path.display());
    }

    output::status("Validating", &format!("{}", workflow_path.display()));

    let workflow = match WorkflowParser::from_file(workflow_path) {
        Ok(w) => w,
        Err(e) => {
            output::error(&e.to_string());
            std::process::exit(1);
        }
    };
    output::check("YAML syntax valid");

    let plan = match WorkflowParser::to_job_plan(&workflow, args.job.as_deref()) {
        Ok(plan) => plan,
        Err(e) => {
            output::error(&e.to_string());
            std::process::exit(1);
        }
    };
    output::check(&format!(
        "Job '{}': {} platforms, {} steps",
        plan.name(),
        plan.platforms().len(),
        plan.steps().len()
    ));

    print_plan(&plan);

    eprintln!();
    output::success("Workflow is valid");

    Ok(())
}

fn print_plan(plan: &JobPlan) {
    eprintln!();
    output::header("Platforms");
    for platform in plan.platforms() {
        let attributes: Vec<String> = platform
            .attributes
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        eprintln!("  {}", platform.id);
        output::dim(&format!("      {}", attributes.join(", ")));
    }

    eprintln!();
    output::header("Steps");
    for (index, step) in plan.steps().iter().enumerate() {
        let runs_on: Vec<&str> = plan
            .platforms()
            .iter()
            .filter(|p| step.applies_to(p))
            .map(|p| p.id.as_str())
            .collect();

        eprintln!("  {}. {}", index + 1, step.name);
        output::dim(&format!("      if: {}", step.condition));
        if runs_on.is_empty() {
            output::warning("      runs on no platform");
        } else {
            output::dim(&format!("      runs on: {}", runs_on.join(", ")));
        }
    }

    eprintln!();
    output::dim(&format!(
        "fail-fast: {}, max-parallel: {}",
        plan.fail_fast(),
        plan.max_parallel()
            .map(|n| n.to_string())
            .unwrap_or_else(|| "unlimited".to_string())
    ));
}
