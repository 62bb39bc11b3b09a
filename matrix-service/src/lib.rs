// Matrix Service Library
// Runs one job plan across a matrix of platforms and aggregates the results

pub mod error;
pub mod execution;
pub mod plan;
pub mod report;
pub mod runners;
pub mod utils;
pub mod workflow;

#[cfg(test)]
mod test_support;

pub use error::{ServiceError, ServiceResult};

pub use plan::{
    Action, BuiltinAction, CommandSpec, Condition, JobPlan, JobPlanBuilder, PlanError,
    PlatformDescriptor, PlatformFamily, Shell, Step, Trigger, TriggerEvent,
};

pub use execution::{
    progress_channel, ExecutionEvent, MatrixScheduler, ProgressReceiver, ProgressSender,
    SchedulerConfig, SkipReason, StepFailure, StepRecord, StepStatus, VariantExecutor,
    VariantOutcome, VariantStatus,
};

pub use report::{JobResult, OverallStatus, ReportFormat, Reporter, ResultAggregator, VariantCounts};

pub use runners::{ActionOutput, ActionRequest, ActionRunner, OutputCallback, ShellRunner};

pub use workflow::{WorkflowError, WorkflowParser};
