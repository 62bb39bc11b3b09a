use crate::plan::{
    Action, BuiltinAction, CommandSpec, JobPlan, PlatformDescriptor, PlatformFamily, Shell, Step,
    Trigger, TriggerEvent,
};
use crate::workflow::expression::{self, ExpressionError};
use crate::workflow::matrix::MatrixExpander;
use crate::workflow::models::{self, Combination, Job, On, RunsOn, Workflow};
use crate::workflow::WorkflowError;

use std::collections::HashSet;
use std::convert::Infallible;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Id of the single platform used when a job names no runner
pub const LOCAL_PLATFORM_ID: &str = "local";

/// Parser for GitHub Actions-style workflow YAML files.
pub struct WorkflowParser;

impl WorkflowParser {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Workflow, WorkflowError> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Workflow, WorkflowError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Read a workflow file and build the plan for one of its jobs
    pub fn load_plan<P: AsRef<Path>>(path: P, job: Option<&str>) -> Result<JobPlan, WorkflowError> {
        let workflow = Self::from_file(path)?;
        Self::to_job_plan(&workflow, job)
    }

    /// Build a validated plan for `job`, or for the only job when `None`.
    pub fn to_job_plan(workflow: &Workflow, job: Option<&str>) -> Result<JobPlan, WorkflowError> {
        let (job_id, job) = Self::select_job(workflow, job)?;

        let platforms = Self::platforms(job)?;
        let steps = Self::steps(workflow, job)?;

        let (fail_fast, max_parallel) = match &job.strategy {
            Some(strategy) => (strategy.fail_fast.unwrap_or(true), strategy.max_parallel),
            None => (false, None),
        };

        debug!(
            job = %job_id,
            platforms = platforms.len(),
            steps = steps.len(),
            "Building job plan from workflow"
        );

        let mut builder = JobPlan::builder(job.name.clone().unwrap_or_else(|| job_id.to_string()))
            .steps(steps)
            .platforms(platforms)
            .trigger(Self::trigger(workflow.on.as_ref()))
            .fail_fast(fail_fast)
            .max_parallel(max_parallel);

        for (name, value) in workflow.env.iter().chain(job.env.iter()) {
            builder = builder.env(name, value);
        }

        Ok(builder.build()?)
    }

    fn select_job<'a>(
        workflow: &'a Workflow,
        job: Option<&str>,
    ) -> Result<(&'a str, &'a Job), WorkflowError> {
        match job {
            Some(id) => workflow
                .jobs
                .get_key_value(id)
                .map(|(k, v)| (k.as_str(), v))
                .ok_or_else(|| WorkflowError::MissingJob(id.to_string())),
            None => {
                let mut jobs = workflow.jobs.iter();
                match (jobs.next(), jobs.next()) {
                    (Some((id, job)), None) => Ok((id.as_str(), job)),
                    (None, _) => Err(WorkflowError::MissingJob("<any>".to_string())),
                    _ => Err(WorkflowError::AmbiguousJob(
                        workflow.jobs.keys().cloned().collect(),
                    )),
                }
            }
        }
    }

    fn trigger(on: Option<&On>) -> Trigger {
        fn event(name: &str) -> TriggerEvent {
            name.parse().unwrap_or_else(|never: Infallible| match never {})
        }

        match on {
            None => Trigger::default(),
            Some(On::Single(name)) => Trigger::default().on(event(name), Vec::new()),
            Some(On::Multiple(names)) => names
                .iter()
                .fold(Trigger::default(), |t, name| t.on(event(name), Vec::new())),
            Some(On::Detailed(events)) => {
                events.iter().fold(Trigger::default(), |t, (name, config)| {
                    let branches = config
                        .as_ref()
                        .map(|c| c.branches.clone())
                        .unwrap_or_default();
                    t.on(event(name), branches)
                })
            }
        }
    }

    /// One platform per matrix combination, or a single platform from `runs-on`
    fn platforms(job: &Job) -> Result<Vec<PlatformDescriptor>, WorkflowError> {
        let Some(matrix) = job.strategy.as_ref().and_then(|s| s.matrix.as_ref()) else {
            let platform = match Self::runner_label(job, None)? {
                Some(label) => PlatformDescriptor::for_runner(label),
                None => {
                    let local = PlatformDescriptor::new(LOCAL_PLATFORM_ID);
                    match PlatformFamily::host() {
                        Some(family) => local.with_family(family),
                        None => local,
                    }
                }
            };
            return Ok(vec![platform]);
        };

        let instances = MatrixExpander::expand(matrix);
        if instances.is_empty() {
            return Err(WorkflowError::InvalidMatrix(
                "matrix expands to no combinations".to_string(),
            ));
        }

        instances
            .into_iter()
            .map(|instance| -> Result<PlatformDescriptor, WorkflowError> {
                let mut platform = match Self::runner_label(job, Some(&instance.values))? {
                    Some(label) => PlatformDescriptor::for_runner(label),
                    None => PlatformDescriptor::new(instance.id.clone()),
                };
                platform.id = instance.id;
                for (name, value) in instance.values.iter() {
                    platform = platform.with_attribute(name, value);
                }
                Ok(platform)
            })
            .collect()
    }

    /// Resolve `runs-on`, substituting `${{ matrix.<key> }}` from `values`.
    ///
    /// With several labels, the first one that names a known platform family wins.
    fn runner_label(
        job: &Job,
        values: Option<&Combination>,
    ) -> Result<Option<String>, WorkflowError> {
        let resolve = |raw: &str| -> Result<String, WorkflowError> {
            let key = expression::matrix_reference(raw).map_err(|source| {
                WorkflowError::Expression {
                    context: "runs-on".to_string(),
                    source,
                }
            })?;
            match key {
                None => Ok(raw.trim().to_string()),
                Some(key) => values
                    .and_then(|v| v.get(key))
                    .map(str::to_string)
                    .ok_or_else(|| {
                        WorkflowError::InvalidMatrix(format!(
                            "runs-on references unknown matrix value '{}'",
                            key
                        ))
                    }),
            }
        };

        match &job.runs_on {
            None => Ok(None),
            Some(RunsOn::Label(label)) => resolve(label.as_str()).map(Some),
            Some(RunsOn::Labels(labels)) => {
                let labels = labels
                    .iter()
                    .map(|l| resolve(l.as_str()))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(labels
                    .iter()
                    .find(|l| PlatformFamily::from_runner_label(l).is_some())
                    .or_else(|| labels.first())
                    .cloned())
            }
        }
    }

    fn steps(workflow: &Workflow, job: &Job) -> Result<Vec<Step>, WorkflowError> {
        let workflow_run = workflow.defaults.as_ref().and_then(|d| d.run.as_ref());
        let default_shell = job
            .default_shell()
            .or_else(|| workflow_run.and_then(|r| r.shell.as_deref()));
        let default_dir = job
            .default_working_directory()
            .or_else(|| workflow_run.and_then(|r| r.working_directory.as_deref()));

        let mut names = HashSet::new();
        let mut steps = Vec::with_capacity(job.steps.len());

        for (index, raw) in job.steps.iter().enumerate() {
            let mut name = raw.display_name();
            // Generated names may repeat; explicit duplicates are left for plan validation
            if raw.name.is_none() {
                let base = name.clone();
                let mut n = 2;
                while names.contains(&name) {
                    name = format!("{} ({})", base, n);
                    n += 1;
                }
            }
            names.insert(name.clone());

            steps.push(Self::convert_step(
                index,
                name,
                raw,
                default_shell,
                default_dir,
            )?);
        }

        Ok(steps)
    }

    fn convert_step(
        index: usize,
        name: String,
        raw: &models::Step,
        default_shell: Option<&str>,
        default_dir: Option<&str>,
    ) -> Result<Step, WorkflowError> {
        let invalid = |message: &str| WorkflowError::InvalidStep {
            index,
            name: name.clone(),
            message: message.to_string(),
        };

        let action = match (&raw.run, &raw.uses) {
            (Some(script), None) => {
                let shell: Shell = match raw.shell.as_deref().or(default_shell) {
                    Some(shell) => shell.parse().map_err(|e: String| invalid(&e))?,
                    None => Shell::Default,
                };
                Action::Commands(vec![CommandSpec::new(script.clone()).with_shell(shell)])
            }
            (None, Some(uses)) => {
                let action = uses.split('@').next().unwrap_or(uses);
                if action == "actions/checkout" {
                    Action::Builtin(BuiltinAction::Checkout)
                } else {
                    Action::Builtin(BuiltinAction::Unsupported(uses.clone()))
                }
            }
            (None, None) => return Err(invalid("must have either 'run' or 'uses'")),
            (Some(_), Some(_)) => return Err(invalid("cannot have both 'run' and 'uses'")),
        };

        let mut step = Step::new(name.clone()).with_action(action);

        if let Some(condition) = &raw.if_condition {
            let condition =
                expression::compile(condition).map_err(|source: ExpressionError| {
                    WorkflowError::Expression {
                        context: format!("step '{}'", name),
                        source,
                    }
                })?;
            step = step.with_condition(condition);
        }

        for (key, value) in &raw.env {
            step = step.with_env(key, value);
        }

        if let Some(dir) = raw.working_directory.as_deref().or(default_dir) {
            step = step.with_working_directory(dir);
        }

        if let Some(minutes) = raw.timeout_minutes {
            step = step.with_timeout(Duration::from_secs(u64::from(minutes) * 60));
        }

        Ok(step.continue_on_error(raw.continue_on_error))
    }
}
