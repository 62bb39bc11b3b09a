// Variant Executor
// Runs the plan's steps in order against one platform

use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::plan::job::JobPlan;
use crate::plan::platform::PlatformDescriptor;
use crate::plan::step::{Action, BuiltinAction, CommandSpec, Step};
use crate::runners::{ActionOutput, ActionRequest, ActionRunner, OutputCallback};
use crate::utils::serialize_duration_secs;

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Lifecycle of one variant: `Pending -> Running -> {Passed, Failed, Cancelled}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VariantStatus {
    Pending,
    Running,
    Passed,
    Failed,
    Cancelled,
}

impl VariantStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            VariantStatus::Passed | VariantStatus::Failed | VariantStatus::Cancelled
        )
    }
}

impl fmt::Display for VariantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariantStatus::Pending => write!(f, "pending"),
            VariantStatus::Running => write!(f, "running"),
            VariantStatus::Passed => write!(f, "passed"),
            VariantStatus::Failed => write!(f, "failed"),
            VariantStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Succeeded,
    Failed,
    Skipped,
}

/// Why a step did not run on a platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    /// The step's condition is false for this platform
    ConditionFalse,
    /// An earlier step failed
    PreviousFailure,
    /// The variant was cancelled before reaching this step
    Cancelled,
    /// The action cannot be executed locally
    Unsupported { action: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::ConditionFalse => write!(f, "condition false"),
            SkipReason::PreviousFailure => write!(f, "previous step failed"),
            SkipReason::Cancelled => write!(f, "cancelled"),
            SkipReason::Unsupported { action } => write!(f, "unsupported action '{}'", action),
        }
    }
}

/// Why an executed step failed. Recorded on the outcome, never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum StepFailure {
    #[error("exit code {0}")]
    ExitCode(i32),

    #[error("terminated without an exit code")]
    Terminated,

    #[error("could not launch: {0}")]
    LaunchFailed(String),

    #[error("timed out after {}s", .0.as_secs_f64())]
    TimedOut(#[serde(serialize_with = "serialize_duration_secs")] Duration),
}

impl StepFailure {
    fn from_output(output: &ActionOutput, timeout: Option<Duration>) -> Option<Self> {
        if let Some(message) = &output.launch_error {
            Some(StepFailure::LaunchFailed(message.clone()))
        } else if output.timed_out {
            Some(StepFailure::TimedOut(timeout.unwrap_or_default()))
        } else {
            match output.exit_code {
                Some(0) => None,
                Some(code) => Some(StepFailure::ExitCode(code)),
                None => Some(StepFailure::Terminated),
            }
        }
    }
}

/// Outcome of one step on one platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    pub name: String,
    pub index: usize,
    pub status: StepStatus,
    pub exit_code: Option<i32>,
    pub output: String,
    #[serde(serialize_with = "serialize_duration_secs")]
    pub duration: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<StepFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
}

impl StepRecord {
    pub fn skipped(index: usize, name: impl Into<String>, reason: SkipReason) -> Self {
        Self {
            name: name.into(),
            index,
            status: StepStatus::Skipped,
            exit_code: None,
            output: String::new(),
            duration: Duration::ZERO,
            failure: None,
            skip_reason: Some(reason),
        }
    }

    pub fn was_executed(&self) -> bool {
        self.status != StepStatus::Skipped
    }
}

/// Per-platform result of a matrix run.
///
/// Holds exactly one record per plan step, in plan order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariantOutcome {
    pub platform: PlatformDescriptor,
    pub status: VariantStatus,
    pub steps: Vec<StepRecord>,
    #[serde(serialize_with = "serialize_duration_secs")]
    pub duration: Duration,
    /// Variant-level problem not tied to a step (e.g. the task crashed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VariantOutcome {
    pub fn pending(platform: &PlatformDescriptor) -> Self {
        Self {
            platform: platform.clone(),
            status: VariantStatus::Pending,
            steps: Vec::new(),
            duration: Duration::ZERO,
            error: None,
        }
    }

    /// Outcome of a variant cancelled before any executor was created
    pub fn cancelled_before_start(platform: &PlatformDescriptor, steps: &[Step]) -> Self {
        Self {
            status: VariantStatus::Cancelled,
            steps: steps
                .iter()
                .enumerate()
                .map(|(i, s)| StepRecord::skipped(i, &s.name, SkipReason::Cancelled))
                .collect(),
            ..Self::pending(platform)
        }
    }

    /// Outcome of a variant whose task died without producing a result
    pub fn crashed(platform: &PlatformDescriptor, steps: &[Step], error: impl Into<String>) -> Self {
        Self {
            status: VariantStatus::Failed,
            steps: steps
                .iter()
                .enumerate()
                .map(|(i, s)| StepRecord::skipped(i, &s.name, SkipReason::PreviousFailure))
                .collect(),
            error: Some(error.into()),
            ..Self::pending(platform)
        }
    }

    pub fn platform_id(&self) -> &str {
        &self.platform.id
    }

    /// Steps that actually ran, in order
    pub fn executed_steps(&self) -> impl Iterator<Item = &StepRecord> {
        self.steps.iter().filter(|s| s.was_executed())
    }

    pub fn skipped_steps(&self) -> impl Iterator<Item = &StepRecord> {
        self.steps.iter().filter(|s| !s.was_executed())
    }

    /// The step whose failure ended this variant
    pub fn failed_step(&self) -> Option<&StepRecord> {
        if self.status != VariantStatus::Failed {
            return None;
        }
        self.steps
            .iter()
            .rev()
            .find(|s| s.status == StepStatus::Failed)
    }

    pub fn step(&self, name: &str) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.name == name)
    }
}

/// Runs one plan instantiation against one platform.
///
/// The executor owns its outcome exclusively; nothing else mutates it while
/// it runs. Cancellation is cooperative and checked between steps only, so
/// a step that has started always runs to completion.
pub struct VariantExecutor {
    platform: Arc<PlatformDescriptor>,
    steps: Arc<[Step]>,
    plan_env: HashMap<String, String>,
    runner: Arc<dyn ActionRunner>,
    working_dir: PathBuf,
    default_timeout: Option<Duration>,
    cancel: CancellationToken,
    event_tx: Option<ProgressSender>,
    outcome: VariantOutcome,
}

impl VariantExecutor {
    pub fn new(
        plan: &JobPlan,
        platform: Arc<PlatformDescriptor>,
        runner: Arc<dyn ActionRunner>,
    ) -> Self {
        let outcome = VariantOutcome::pending(&platform);
        Self {
            platform,
            steps: plan.shared_steps(),
            plan_env: plan.env().clone(),
            runner,
            working_dir: PathBuf::from("."),
            default_timeout: None,
            cancel: CancellationToken::new(),
            event_tx: None,
            outcome,
        }
    }

    pub fn with_working_dir(mut self, working_dir: impl Into<PathBuf>) -> Self {
        self.working_dir = working_dir.into();
        self
    }

    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, tx: Option<ProgressSender>) -> Self {
        self.event_tx = tx;
        self
    }

    pub fn status(&self) -> VariantStatus {
        self.outcome.status
    }

    /// Run every step and return the terminal outcome
    pub async fn run(mut self) -> VariantOutcome {
        let start = Instant::now();
        let platform_id = self.platform.id.clone();
        let steps = Arc::clone(&self.steps);

        self.outcome.status = VariantStatus::Running;
        self.event_tx
            .send_event(ExecutionEvent::variant_started(&platform_id, steps.len()));
        tracing::info!(platform = %platform_id, steps = steps.len(), "variant started");

        let mut terminal: Option<VariantStatus> = None;

        for (index, step) in steps.iter().enumerate() {
            let skip = match terminal {
                Some(VariantStatus::Failed) => Some(SkipReason::PreviousFailure),
                Some(_) => Some(SkipReason::Cancelled),
                None if self.cancel.is_cancelled() => {
                    tracing::info!(platform = %platform_id, step = %step.name, "variant cancelled");
                    terminal = Some(VariantStatus::Cancelled);
                    Some(SkipReason::Cancelled)
                }
                None if !step.applies_to(&self.platform) => Some(SkipReason::ConditionFalse),
                None => None,
            };

            if let Some(reason) = skip {
                self.record_skip(index, step, reason);
                continue;
            }

            let commands = match &step.action {
                Action::Builtin(BuiltinAction::Unsupported(uses)) => {
                    let reason = SkipReason::Unsupported {
                        action: uses.clone(),
                    };
                    self.record_skip(index, step, reason);
                    continue;
                }
                Action::Builtin(BuiltinAction::Checkout) => None,
                Action::Commands(commands) => Some(commands.as_slice()),
            };

            let record = self.execute_step(index, step, commands).await;
            if record.status == StepStatus::Failed {
                if step.continue_on_error {
                    tracing::warn!(
                        platform = %platform_id,
                        step = %step.name,
                        "step failed, continuing on error"
                    );
                } else {
                    terminal = Some(VariantStatus::Failed);
                }
            }
            self.outcome.steps.push(record);
        }

        let status = terminal.unwrap_or(VariantStatus::Passed);
        let duration = start.elapsed();
        self.outcome.status = status;
        self.outcome.duration = duration;

        self.event_tx.send_event(ExecutionEvent::variant_completed(
            &platform_id,
            status,
            duration,
        ));
        tracing::info!(platform = %platform_id, %status, ?duration, "variant finished");

        self.outcome
    }

    fn record_skip(&mut self, index: usize, step: &Step, reason: SkipReason) {
        tracing::debug!(platform = %self.platform.id, step = %step.name, %reason, "step skipped");
        self.event_tx.send_event(ExecutionEvent::step_skipped(
            &self.platform.id,
            &step.name,
            index,
            reason.clone(),
        ));
        self.outcome
            .steps
            .push(StepRecord::skipped(index, &step.name, reason));
    }

    /// `commands` is `None` for a checkout, which reuses the existing working tree
    async fn execute_step(
        &self,
        index: usize,
        step: &Step,
        commands: Option<&[CommandSpec]>,
    ) -> StepRecord {
        let start = Instant::now();
        let platform_id = &self.platform.id;

        self.event_tx
            .send_event(ExecutionEvent::step_started(platform_id, &step.name, index));
        tracing::debug!(platform = %platform_id, step = %step.name, "step started");

        let (exit_code, output, failure) = match commands {
            None => {
                let line = format!(
                    "Checkout: using existing working tree at {}",
                    self.working_dir.display()
                );
                self.event_tx.send_event(ExecutionEvent::step_output(
                    platform_id,
                    &step.name,
                    index,
                    &line,
                ));
                (Some(0), line, None)
            }
            Some(commands) => {
                let timeout = step.timeout.or(self.default_timeout);
                let working_dir = match &step.working_directory {
                    Some(dir) => self.working_dir.join(dir),
                    None => self.working_dir.clone(),
                };
                let env = self.step_env(step);
                let on_output = self.output_callback(index, step);

                let mut combined = String::new();
                let mut exit_code = Some(0);
                let mut failure = None;

                for command in commands.iter() {
                    let result = self
                        .runner
                        .run(ActionRequest {
                            command: command.clone(),
                            working_dir: working_dir.clone(),
                            env: env.clone(),
                            timeout,
                            on_output: on_output.clone(),
                        })
                        .await;

                    if !result.output.is_empty() {
                        if !combined.is_empty() {
                            combined.push('\n');
                        }
                        combined.push_str(&result.output);
                    }
                    exit_code = result.exit_code;
                    failure = StepFailure::from_output(&result, timeout);
                    if failure.is_some() {
                        break;
                    }
                }

                (exit_code, combined, failure)
            }
        };

        let status = if failure.is_some() {
            StepStatus::Failed
        } else {
            StepStatus::Succeeded
        };
        let duration = start.elapsed();

        self.event_tx.send_event(ExecutionEvent::step_completed(
            platform_id,
            &step.name,
            index,
            status,
            duration,
            exit_code,
        ));

        match &failure {
            Some(f) => tracing::warn!(platform = %platform_id, step = %step.name, failure = %f, "step failed"),
            None => tracing::debug!(platform = %platform_id, step = %step.name, ?duration, "step succeeded"),
        }

        StepRecord {
            name: step.name.clone(),
            index,
            status,
            exit_code,
            output,
            duration,
            failure,
            skip_reason: None,
        }
    }

    /// Streams each output line of a running step as a progress event
    fn output_callback(&self, index: usize, step: &Step) -> Option<OutputCallback> {
        let tx = self.event_tx.clone()?;
        let platform_id = self.platform.id.clone();
        let step_name = step.name.clone();
        Some(Arc::new(move |line: &str| {
            tx.send_event(ExecutionEvent::step_output(
                &platform_id,
                &step_name,
                index,
                line,
            ));
        }))
    }

    /// Plan env, then step env, then the platform's own variables
    fn step_env(&self, step: &Step) -> HashMap<String, String> {
        let mut env = self.plan_env.clone();
        env.extend(step.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        env.extend(self.platform.env_vars());
        env
    }
}
