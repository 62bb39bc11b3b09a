use crate::output;

use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use color_eyre::Result;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;

use matrix_service::execution::progress_channel;
use matrix_service::utils::{resolve_dir, resolve_working_dir};
use matrix_service::{
    ExecutionEvent, MatrixScheduler, OverallStatus, ReportFormat, Reporter, SchedulerConfig,
    ShellRunner, StepStatus, TriggerEvent, VariantStatus, WorkflowParser,
};

/// Run a workflow job across its platform matrix
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the workflow YAML file
    pub workflow: PathBuf,

    /// Job to run (required when the workflow has several)
    #[arg(long, value_name = "JOB")]
    pub job: Option<String>,

    /// Cancel remaining platforms after the first failure
    #[arg(long, overrides_with = "no_fail_fast")]
    pub fail_fast: bool,

    /// Let every platform finish regardless of failures
    #[arg(long, overrides_with = "fail_fast")]
    pub no_fail_fast: bool,

    /// Maximum number of platforms running at once
    #[arg(long, value_name = "N")]
    pub max_parallel: Option<usize>,

    /// Default per-step timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Working tree to run in (default: repository root)
    #[arg(long, short = 'w', value_name = "DIR")]
    pub working_dir: Option<PathBuf>,

    /// Run only these platform ids (can be repeated)
    #[arg(long = "platform", value_name = "ID")]
    pub platforms: Vec<String>,

    /// Target branch; the job is skipped when its trigger does not match
    #[arg(long, value_name = "NAME")]
    pub branch: Option<String>,

    /// Triggering event, checked together with --branch (default: any declared event)
    #[arg(long, value_name = "NAME", requires = "branch")]
    pub event: Option<String>,

    /// Report format: text or json
    #[arg(long, default_value = "text")]
    pub format: ReportFormat,
}

impl RunArgs {
    fn fail_fast(&self, declared: bool) -> bool {
        if self.fail_fast {
            true
        } else if self.no_fail_fast {
            false
        } else {
            declared
        }
    }
}

/// Returns the process exit code: 0 iff every platform passed
pub async fn execute(args: RunArgs) -> Result<i32> {
    let workflow_path = &args.workflow;

    if !workflow_path.exists() {
        color_eyre::eyre::bail!("Workflow file not found: {}", workflow_path.display());
    }

    let working_dir = match &args.working_dir {
        Some(dir) => resolve_dir(&std::env::current_dir()?, dir)?,
        None => resolve_working_dir(),
    };

    output::status("Loading", &format!("{}", workflow_path.display()));
    let mut plan = WorkflowParser::load_plan(workflow_path, args.job.as_deref())?;

    tracing::debug!(
        job = %plan.name(),
        platforms = plan.platforms().len(),
        steps = plan.steps().len(),
        "plan loaded"
    );

    if let Some(branch) = &args.branch {
        let event: Option<TriggerEvent> = args
            .event
            .as_deref()
            .map(|name| name.parse().unwrap_or_else(|never: Infallible| match never {}));
        let matched = match &event {
            Some(event) => plan.trigger().matches(event, branch),
            None => plan.trigger().matches_branch(branch),
        };
        if !matched {
            let on = event.map_or_else(|| "any event".to_string(), |e| e.to_string());
            tracing::info!(job = %plan.name(), %branch, event = %on, "trigger does not match");
            output::warning(&format!(
                "Job '{}' does not run on {} to '{}'; nothing to do",
                plan.name(),
                on,
                branch
            ));
            return Ok(0);
        }
    }

    if !args.platforms.is_empty() {
        plan = plan.restrict_to(&args.platforms)?;
    }

    let fail_fast = args.fail_fast(plan.fail_fast());

    output::info(&format!(
        "Job '{}': {} platforms, {} steps, fail-fast {}",
        plan.name(),
        plan.platforms().len(),
        plan.steps().len(),
        if fail_fast { "on" } else { "off" }
    ));
    output::dim(&format!("  working directory: {}", working_dir.display()));

    let config = SchedulerConfig {
        working_dir,
        default_step_timeout: args.timeout.map(Duration::from_secs),
        max_parallel: args.max_parallel,
    };
    tracing::debug!(?config, fail_fast, "scheduler configured");

    let (tx, rx) = progress_channel();
    let scheduler = MatrixScheduler::new(Arc::new(ShellRunner::new()))
        .with_config(config)
        .with_progress(tx);

    let run_handle = tokio::spawn(async move { scheduler.run(&plan, fail_fast).await });

    let mut events = UnboundedReceiverStream::new(rx);
    while let Some(event) = events.next().await {
        print_event(&event);
    }

    let result = run_handle.await?;

    println!("{}", Reporter::report(&result, args.format)?);

    Ok(result.exit_code())
}

fn print_event(event: &ExecutionEvent) {
    match event {
        ExecutionEvent::MatrixStarted {
            job_name,
            total_variants,
            ..
        } => {
            eprintln!();
            output::header(&format!("Job '{}' ({} platforms)", job_name, total_variants));
        }

        ExecutionEvent::MatrixCompleted {
            status, duration, ..
        } => {
            eprintln!();
            if *status == OverallStatus::Passed {
                output::success(&format!(
                    "All platforms passed in {:.2}s",
                    duration.as_secs_f64()
                ));
            } else {
                output::failure(&format!("Job failed after {:.2}s", duration.as_secs_f64()));
            }
        }

        ExecutionEvent::VariantStarted {
            platform_id,
            total_steps,
        } => {
            output::status("Running", &format!("{} ({} steps)", platform_id, total_steps));
        }

        ExecutionEvent::VariantCompleted {
            platform_id,
            status,
            duration,
        } => {
            let line = format!(
                "  [{}] {} ({:.2}s)",
                platform_id,
                status.to_string().to_uppercase(),
                duration.as_secs_f64()
            );
            match status {
                VariantStatus::Passed => output::dim_success(&line),
                VariantStatus::Cancelled => output::warning(&line),
                _ => output::dim_failure(&line),
            }
        }

        ExecutionEvent::FailFastTriggered { platform_id } => {
            output::warning(&format!(
                "'{}' failed; cancelling remaining platforms",
                platform_id
            ));
        }

        ExecutionEvent::StepStarted {
            platform_id,
            step_name,
            step_index,
        } => {
            eprintln!("  [{}] Step {}: {}", platform_id, step_index + 1, step_name);
        }

        ExecutionEvent::StepOutput {
            platform_id,
            output: line,
            ..
        } => {
            output::step_output(platform_id, line);
        }

        ExecutionEvent::StepCompleted {
            platform_id,
            step_name,
            status,
            duration,
            exit_code,
            ..
        } => {
            let exit_info = match exit_code {
                Some(code) if *code != 0 => format!(" (exit code: {})", code),
                _ => String::new(),
            };
            let line = format!(
                "  [{}] {} {} ({:.2}s){}",
                platform_id,
                step_name,
                if *status == StepStatus::Succeeded { "OK" } else { "FAIL" },
                duration.as_secs_f64(),
                exit_info
            );
            if *status == StepStatus::Succeeded {
                output::dim_success(&line);
            } else {
                output::dim_failure(&line);
            }
        }

        ExecutionEvent::StepSkipped {
            platform_id,
            step_name,
            reason,
            ..
        } => {
            output::dim(&format!("  [{}] {} skipped: {}", platform_id, step_name, reason));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser, Debug)]
    struct TestCli {
        #[command(flatten)]
        run: RunArgs,
    }

    #[test]
    fn test_fail_fast_flags() {
        let cli = TestCli::parse_from(["matrix-run", "ci.yml"]);
        assert!(cli.run.fail_fast(true));
        assert!(!cli.run.fail_fast(false));

        let cli = TestCli::parse_from(["matrix-run", "ci.yml", "--no-fail-fast"]);
        assert!(!cli.run.fail_fast(true));

        let cli = TestCli::parse_from(["matrix-run", "ci.yml", "--no-fail-fast", "--fail-fast"]);
        assert!(cli.run.fail_fast(false));
    }

    #[test]
    fn test_run_args() {
        let cli = TestCli::parse_from([
            "matrix-run",
            "ci.yml",
            "--platform",
            "ubuntu-latest",
            "--platform",
            "windows-latest",
            "--format",
            "json",
            "--max-parallel",
            "2",
        ]);

        assert_eq!(cli.run.platforms, vec!["ubuntu-latest", "windows-latest"]);
        assert_eq!(cli.run.format, ReportFormat::Json);
        assert_eq!(cli.run.max_parallel, Some(2));
        assert_eq!(cli.run.event, None);
    }

    #[test]
    fn test_event_requires_branch() {
        let cli = TestCli::parse_from([
            "matrix-run",
            "ci.yml",
            "--branch",
            "develop",
            "--event",
            "pull_request",
        ]);
        assert_eq!(cli.run.branch.as_deref(), Some("develop"));
        assert_eq!(cli.run.event.as_deref(), Some("pull_request"));

        assert!(TestCli::try_parse_from(["matrix-run", "ci.yml", "--event", "push"]).is_err());
    }
}
