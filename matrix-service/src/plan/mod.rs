// Plan Module
// Immutable description of what to run and where: platforms, steps, job plans

pub mod job;
pub mod platform;
pub mod step;

pub use job::{JobPlan, JobPlanBuilder, PlanError, Trigger, TriggerEvent};
pub use platform::{PlatformDescriptor, PlatformFamily};
pub use step::{Action, BuiltinAction, CommandSpec, Condition, Shell, Step};
