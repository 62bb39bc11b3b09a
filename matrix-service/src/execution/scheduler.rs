// Matrix Scheduler
// Fans a job plan out across its platforms and applies the fail-fast policy

use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::execution::variant::{VariantExecutor, VariantOutcome, VariantStatus};
use crate::plan::job::JobPlan;
use crate::report::{JobResult, ResultAggregator};
use crate::runners::{ActionRunner, ShellRunner};

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Configuration for matrix runs
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Checked-out working tree every variant runs in
    pub working_dir: PathBuf,
    /// Timeout for steps that do not set their own (None = no timeout)
    pub default_step_timeout: Option<Duration>,
    /// Maximum concurrently running variants (None = unlimited)
    pub max_parallel: Option<usize>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            working_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            default_step_timeout: None,
            max_parallel: None,
        }
    }
}

/// Runs every variant of a plan concurrently and collects one outcome per platform
pub struct MatrixScheduler {
    runner: Arc<dyn ActionRunner>,
    config: SchedulerConfig,
    event_tx: Option<ProgressSender>,
}

impl MatrixScheduler {
    pub fn new(runner: Arc<dyn ActionRunner>) -> Self {
        Self {
            runner,
            config: SchedulerConfig::default(),
            event_tx: None,
        }
    }

    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set progress event sender
    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Effective concurrency limit: the stricter of plan and config
    fn parallel_limit(&self, plan: &JobPlan) -> Option<usize> {
        match (plan.max_parallel(), self.config.max_parallel) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
        .map(|n| n.max(1))
    }

    /// Run the plan on every platform and return once all variants are terminal.
    ///
    /// With `fail_fast`, the first failed variant cancels the rest: running
    /// variants stop after their current step and variants still waiting for
    /// a slot are cancelled without being started.
    pub async fn run(&self, plan: &JobPlan, fail_fast: bool) -> JobResult {
        let start = Instant::now();
        let total = plan.platforms().len();

        self.event_tx.send_event(ExecutionEvent::matrix_started(
            plan.name(),
            total,
            fail_fast,
        ));
        tracing::info!(job = %plan.name(), variants = total, fail_fast, "matrix started");

        let cancel = CancellationToken::new();
        let slots = self
            .parallel_limit(plan)
            .map(|n| Arc::new(Semaphore::new(n)));
        let fail_fast_fired = Arc::new(AtomicBool::new(false));
        let mut tasks = JoinSet::new();

        let shared_plan = Arc::new(plan.clone());

        for platform in plan.platforms() {
            let platform = Arc::clone(platform);
            let plan = Arc::clone(&shared_plan);
            let runner = Arc::clone(&self.runner);
            let config = self.config.clone();
            let steps = plan.shared_steps();
            let cancel = cancel.clone();
            let slots = slots.clone();
            let event_tx = self.event_tx.clone();
            let fail_fast_fired = Arc::clone(&fail_fast_fired);

            tasks.spawn(async move {
                let _permit = match slots {
                    Some(slots) => {
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => None,
                            permit = slots.acquire_owned() => permit.ok(),
                        }
                    }
                    None => None,
                };

                if cancel.is_cancelled() {
                    tracing::info!(platform = %platform.id, "variant cancelled before start");
                    event_tx.send_event(ExecutionEvent::variant_completed(
                        &platform.id,
                        VariantStatus::Cancelled,
                        Duration::ZERO,
                    ));
                    return VariantOutcome::cancelled_before_start(&platform, &steps);
                }

                let executor = VariantExecutor::new(&plan, Arc::clone(&platform), runner)
                    .with_working_dir(config.working_dir)
                    .with_default_timeout(config.default_step_timeout)
                    .with_cancellation(cancel.child_token())
                    .with_progress(event_tx.clone());

                // A panic inside one variant must not take the others down
                let outcome = match tokio::spawn(executor.run()).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        tracing::error!(platform = %platform.id, error = %e, "variant task crashed");
                        let outcome = VariantOutcome::crashed(
                            &platform,
                            &steps,
                            format!("variant task crashed: {}", e),
                        );
                        event_tx.send_event(ExecutionEvent::variant_completed(
                            &platform.id,
                            outcome.status,
                            Duration::ZERO,
                        ));
                        outcome
                    }
                };

                // Cancel while still holding the slot so no waiter can start in between
                if fail_fast
                    && outcome.status == VariantStatus::Failed
                    && !fail_fast_fired.swap(true, Ordering::SeqCst)
                {
                    tracing::warn!(platform = %platform.id, "fail-fast: cancelling remaining variants");
                    event_tx.send_event(ExecutionEvent::FailFastTriggered {
                        platform_id: platform.id.clone(),
                    });
                    cancel.cancel();
                }

                outcome
            });
        }

        let mut outcomes = Vec::with_capacity(total);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => tracing::error!(error = %e, "variant scheduling task failed"),
            }
        }

        // Every platform gets an outcome, even if its scheduling task was lost
        let seen: HashSet<String> = outcomes.iter().map(|o| o.platform.id.clone()).collect();
        for platform in plan.platforms() {
            if !seen.contains(&platform.id) {
                outcomes.push(VariantOutcome::crashed(
                    platform,
                    plan.steps(),
                    "variant task did not report an outcome",
                ));
            }
        }

        let result = ResultAggregator::aggregate(plan.name(), outcomes, start.elapsed());

        self.event_tx.send_event(ExecutionEvent::matrix_completed(
            plan.name(),
            result.overall_status,
            result.duration,
        ));
        tracing::info!(
            job = %plan.name(),
            status = %result.overall_status,
            duration = ?result.duration,
            "matrix finished"
        );

        result
    }
}

impl Default for MatrixScheduler {
    fn default() -> Self {
        Self::new(Arc::new(ShellRunner::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::variant::{SkipReason, StepStatus};
    use crate::plan::platform::{PlatformDescriptor, PlatformFamily};
    use crate::plan::step::{Condition, Step};
    use crate::report::OverallStatus;
    use crate::test_support::ScriptedRunner;

    fn scenario_plan() -> JobPlan {
        JobPlan::builder("unit-tests")
            .platform(PlatformDescriptor::for_runner("ubuntu-latest"))
            .platform(PlatformDescriptor::for_runner("macos-latest"))
            .platform(PlatformDescriptor::for_runner("windows-latest"))
            .step(
                Step::new("install-deps")
                    .with_condition(Condition::family(PlatformFamily::Linux))
                    .run("install-deps"),
            )
            .step(Step::new("run-tests").run("run-tests"))
            .build()
            .unwrap()
    }

    fn scheduler(runner: Arc<ScriptedRunner>) -> MatrixScheduler {
        MatrixScheduler::new(runner)
    }

    #[tokio::test]
    async fn test_scenario_all_pass() {
        let plan = scenario_plan();
        let result = scheduler(Arc::new(ScriptedRunner::new()))
            .run(&plan, false)
            .await;

        assert_eq!(result.overall_status, OverallStatus::Passed);
        assert_eq!(result.outcomes.len(), 3);

        let linux = result.outcome("ubuntu-latest").unwrap();
        assert_eq!(linux.executed_steps().count(), 2);

        for id in ["macos-latest", "windows-latest"] {
            let outcome = result.outcome(id).unwrap();
            assert_eq!(outcome.status, VariantStatus::Passed);
            assert_eq!(outcome.executed_steps().count(), 1);
            assert_eq!(outcome.skipped_steps().count(), 1);
        }
    }

    #[tokio::test]
    async fn test_scenario_one_platform_fails_without_fail_fast() {
        let plan = scenario_plan();
        let runner = ScriptedRunner::new().fail("windows-latest", "run-tests", 1);

        let result = scheduler(Arc::new(runner)).run(&plan, false).await;

        assert_eq!(result.overall_status, OverallStatus::Failed);
        assert_eq!(
            result.outcome("ubuntu-latest").unwrap().status,
            VariantStatus::Passed
        );
        assert_eq!(
            result.outcome("macos-latest").unwrap().status,
            VariantStatus::Passed
        );
        let windows = result.outcome("windows-latest").unwrap();
        assert_eq!(windows.status, VariantStatus::Failed);
        assert_eq!(windows.failed_step().unwrap().name, "run-tests");
    }

    #[tokio::test]
    async fn test_no_fail_fast_never_cancels() {
        let plan = scenario_plan();
        let runner = ScriptedRunner::new()
            .fail("windows-latest", "run-tests", 1)
            .delay("ubuntu-latest", "install-deps", Duration::from_millis(100))
            .delay("macos-latest", "run-tests", Duration::from_millis(100));

        let result = scheduler(Arc::new(runner)).run(&plan, false).await;

        assert!(result
            .outcomes
            .iter()
            .all(|o| o.status != VariantStatus::Cancelled));
        assert_eq!(result.counts().passed, 2);
        assert_eq!(result.counts().failed, 1);
    }

    #[tokio::test]
    async fn test_scenario_fail_fast_cancels_running_variants() {
        let plan = scenario_plan();
        let runner = ScriptedRunner::new()
            .fail("windows-latest", "run-tests", 1)
            .delay("ubuntu-latest", "install-deps", Duration::from_millis(300))
            .delay("macos-latest", "run-tests", Duration::from_millis(300));
        let runner = Arc::new(runner);

        let result = scheduler(runner.clone()).run(&plan, true).await;

        assert_eq!(result.overall_status, OverallStatus::Failed);
        assert_eq!(
            result.outcome("windows-latest").unwrap().status,
            VariantStatus::Failed
        );

        // Linux was mid-step: that step finished, the next one never started
        let linux = result.outcome("ubuntu-latest").unwrap();
        assert_eq!(linux.status, VariantStatus::Cancelled);
        assert_eq!(
            linux.step("install-deps").unwrap().status,
            StepStatus::Succeeded
        );
        assert_eq!(
            linux.step("run-tests").unwrap().skip_reason,
            Some(SkipReason::Cancelled)
        );
        assert_eq!(runner.calls_for("ubuntu-latest"), vec!["install-deps"]);

        // macOS was in its last step; it completes rather than being preempted
        let macos = result.outcome("macos-latest").unwrap();
        assert_eq!(macos.status, VariantStatus::Passed);
    }

    #[tokio::test]
    async fn test_fail_fast_cancels_variants_waiting_for_a_slot() {
        let plan = JobPlan::builder("serial")
            .platform(PlatformDescriptor::for_runner("windows-latest"))
            .platform(PlatformDescriptor::for_runner("ubuntu-latest"))
            .platform(PlatformDescriptor::for_runner("macos-latest"))
            .step(Step::new("run-tests").run("run-tests"))
            .max_parallel(Some(1))
            .build()
            .unwrap();
        let runner = Arc::new(
            ScriptedRunner::new()
                .fail("windows-latest", "run-tests", 1)
                .fail("ubuntu-latest", "run-tests", 1)
                .fail("macos-latest", "run-tests", 1),
        );

        let result = scheduler(runner.clone()).run(&plan, true).await;

        let counts = result.counts();
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.cancelled, 2);
        assert_eq!(result.outcomes.len(), 3);

        let total_calls: usize = ["windows-latest", "ubuntu-latest", "macos-latest"]
            .iter()
            .map(|id| runner.calls_for(id).len())
            .sum();
        assert_eq!(total_calls, 1);

        for outcome in result
            .outcomes
            .iter()
            .filter(|o| o.status == VariantStatus::Cancelled)
        {
            assert_eq!(outcome.steps.len(), 1);
            assert_eq!(outcome.steps[0].skip_reason, Some(SkipReason::Cancelled));
        }
    }

    #[tokio::test]
    async fn test_max_parallel_from_config() {
        let plan = scenario_plan();
        let config = SchedulerConfig {
            max_parallel: Some(1),
            ..Default::default()
        };
        let runner = ScriptedRunner::new()
            .delay("ubuntu-latest", "run-tests", Duration::from_millis(50))
            .delay("macos-latest", "run-tests", Duration::from_millis(50))
            .delay("windows-latest", "run-tests", Duration::from_millis(50));

        let start = Instant::now();
        let result = scheduler(Arc::new(runner))
            .with_config(config)
            .run(&plan, false)
            .await;

        assert_eq!(result.overall_status, OverallStatus::Passed);
        assert!(start.elapsed() >= Duration::from_millis(150));
    }

    #[tokio::test]
    async fn test_runs_are_repeatable() {
        let plan = scenario_plan();
        let scheduler =
            scheduler(Arc::new(ScriptedRunner::new().fail("macos-latest", "run-tests", 3)));

        let first = scheduler.run(&plan, false).await;
        let second = scheduler.run(&plan, false).await;

        let statuses = |r: &JobResult| {
            r.outcomes
                .iter()
                .map(|o| (o.platform_id().to_string(), o.status))
                .collect::<Vec<_>>()
        };
        assert_eq!(statuses(&first), statuses(&second));
    }

    #[tokio::test]
    async fn test_matrix_events() {
        let plan = scenario_plan();
        let (tx, mut rx) = crate::execution::events::progress_channel();

        scheduler(Arc::new(ScriptedRunner::new()))
            .with_progress(tx)
            .run(&plan, false)
            .await;

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }

        assert!(matches!(
            events.first(),
            Some(ExecutionEvent::MatrixStarted { total_variants: 3, .. })
        ));
        assert!(matches!(
            events.last(),
            Some(ExecutionEvent::MatrixCompleted {
                status: OverallStatus::Passed,
                ..
            })
        ));
        let completed = events
            .iter()
            .filter(|e| matches!(e, ExecutionEvent::VariantCompleted { .. }))
            .count();
        assert_eq!(completed, 3);
    }

    #[test]
    fn test_parallel_limit() {
        let plan = JobPlan::builder("limits")
            .platform(PlatformDescriptor::new("a"))
            .max_parallel(Some(4))
            .build()
            .unwrap();

        let unlimited = MatrixScheduler::new(Arc::new(ScriptedRunner::new()));
        assert_eq!(unlimited.parallel_limit(&plan), Some(4));

        let stricter = MatrixScheduler::new(Arc::new(ScriptedRunner::new())).with_config(
            SchedulerConfig {
                max_parallel: Some(2),
                ..Default::default()
            },
        );
        assert_eq!(stricter.parallel_limit(&plan), Some(2));
    }
}
