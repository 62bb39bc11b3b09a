// Execution Module
// Runs a job plan: one variant executor per platform, scheduled concurrently

pub mod events;
pub mod scheduler;
pub mod variant;

pub use events::{progress_channel, EventSender, ExecutionEvent, ProgressReceiver, ProgressSender};
pub use scheduler::{MatrixScheduler, SchedulerConfig};
pub use variant::{
    SkipReason, StepFailure, StepRecord, StepStatus, VariantExecutor, VariantOutcome,
    VariantStatus,
};
