// Result Aggregation
// Reduces per-variant outcomes into a job status and renders reports

use crate::execution::variant::{StepStatus, VariantOutcome, VariantStatus};
use crate::utils::{serialize_duration_secs, tail_lines};

use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Lines of captured output shown for each failure in the text report
const FAILURE_OUTPUT_LINES: usize = 40;

/// Overall status of a job run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Passed,
    Failed,
}

impl fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverallStatus::Passed => write!(f, "passed"),
            OverallStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VariantCounts {
    pub passed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// Result of a whole matrix run
#[derive(Debug, Clone, Serialize)]
pub struct JobResult {
    pub job_name: String,
    /// One outcome per platform, ordered by platform id
    pub outcomes: Vec<VariantOutcome>,
    pub overall_status: OverallStatus,
    #[serde(serialize_with = "serialize_duration_secs")]
    pub duration: Duration,
}

impl JobResult {
    pub fn outcome(&self, platform_id: &str) -> Option<&VariantOutcome> {
        self.outcomes.iter().find(|o| o.platform_id() == platform_id)
    }

    pub fn succeeded(&self) -> bool {
        self.overall_status == OverallStatus::Passed
    }

    /// Process exit code for calling automation: 0 iff the job passed
    pub fn exit_code(&self) -> i32 {
        if self.succeeded() {
            0
        } else {
            1
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &VariantOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.status == VariantStatus::Failed)
    }

    pub fn counts(&self) -> VariantCounts {
        let mut counts = VariantCounts::default();
        for outcome in &self.outcomes {
            match outcome.status {
                VariantStatus::Passed => counts.passed += 1,
                VariantStatus::Cancelled => counts.cancelled += 1,
                _ => counts.failed += 1,
            }
        }
        counts
    }
}

pub struct ResultAggregator;

impl ResultAggregator {
    /// Build the job result.
    ///
    /// Any failed variant fails the job. Cancelled variants only exist as a
    /// consequence of another variant's failure, so they fail it as well; so
    /// does a variant that somehow never reached a terminal state.
    pub fn aggregate(
        job_name: impl Into<String>,
        mut outcomes: Vec<VariantOutcome>,
        duration: Duration,
    ) -> JobResult {
        outcomes.sort_by(|a, b| a.platform.id.cmp(&b.platform.id));

        let overall_status = if outcomes
            .iter()
            .all(|o| o.status == VariantStatus::Passed)
        {
            OverallStatus::Passed
        } else {
            OverallStatus::Failed
        };

        JobResult {
            job_name: job_name.into(),
            outcomes,
            overall_status,
            duration,
        }
    }
}

/// Output format for job reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportFormat::Text => write!(f, "text"),
            ReportFormat::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "terminal" | "console" => Ok(ReportFormat::Text),
            "json" => Ok(ReportFormat::Json),
            _ => Err(format!(
                "Unknown report format '{}'. Valid formats: text, json",
                s
            )),
        }
    }
}

pub struct Reporter;

impl Reporter {
    pub fn report(result: &JobResult, format: ReportFormat) -> Result<String, serde_json::Error> {
        match format {
            ReportFormat::Text => Ok(Self::to_text(result)),
            ReportFormat::Json => Self::to_json(result),
        }
    }

    pub fn to_json(result: &JobResult) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(result)
    }

    /// Human-readable report: every variant with its per-step outcomes, then
    /// the first failing step and its output for each failed variant.
    pub fn to_text(result: &JobResult) -> String {
        let mut text = String::new();
        let counts = result.counts();

        text.push_str(&format!(
            "Job '{}': {} ({} variants: {} passed, {} failed, {} cancelled) in {:.2}s\n",
            result.job_name,
            result.overall_status.to_string().to_uppercase(),
            result.outcomes.len(),
            counts.passed,
            counts.failed,
            counts.cancelled,
            result.duration.as_secs_f64()
        ));

        for outcome in &result.outcomes {
            let label = match outcome.status {
                VariantStatus::Passed => "PASS",
                VariantStatus::Failed => "FAIL",
                VariantStatus::Cancelled => "CANCELLED",
                VariantStatus::Pending | VariantStatus::Running => "INCOMPLETE",
            };
            text.push_str(&format!(
                "\n  [{}] {} ({:.2}s)\n",
                label,
                outcome.platform_id(),
                outcome.duration.as_secs_f64()
            ));

            for step in &outcome.steps {
                let line = match step.status {
                    StepStatus::Succeeded => {
                        format!("ok    {} ({:.2}s)", step.name, step.duration.as_secs_f64())
                    }
                    StepStatus::Failed => {
                        let why = step
                            .failure
                            .as_ref()
                            .map(|f| f.to_string())
                            .unwrap_or_else(|| "failed".to_string());
                        format!(
                            "FAIL  {} ({}, {:.2}s)",
                            step.name,
                            why,
                            step.duration.as_secs_f64()
                        )
                    }
                    StepStatus::Skipped => {
                        let why = step
                            .skip_reason
                            .as_ref()
                            .map(|r| r.to_string())
                            .unwrap_or_default();
                        format!("skip  {} ({})", step.name, why)
                    }
                };
                text.push_str(&format!("      {}\n", line));
            }

            if let Some(error) = &outcome.error {
                text.push_str(&format!("      error: {}\n", error));
            }
        }

        let failures: Vec<_> = result.failures().collect();
        if !failures.is_empty() {
            text.push_str("\nFailures:\n");
            for outcome in failures {
                match outcome.failed_step() {
                    Some(step) => {
                        let why = step
                            .failure
                            .as_ref()
                            .map(|f| f.to_string())
                            .unwrap_or_else(|| "failed".to_string());
                        text.push_str(&format!(
                            "  {}: step '{}' failed: {}\n",
                            outcome.platform_id(),
                            step.name,
                            why
                        ));
                        for line in tail_lines(&step.output, FAILURE_OUTPUT_LINES) {
                            text.push_str(&format!("    | {}\n", line));
                        }
                    }
                    None => {
                        text.push_str(&format!(
                            "  {}: {}\n",
                            outcome.platform_id(),
                            outcome.error.as_deref().unwrap_or("failed")
                        ));
                    }
                }
            }
        }

        text
    }
}
