// Service Errors
// Error types shared across plan construction and workflow loading

use thiserror::Error;

use crate::plan::PlanError;
use crate::workflow::WorkflowError;

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Top-level error for the orchestration service.
///
/// Variant-level failures never surface here: they are recorded on the
/// `VariantOutcome` of the platform that produced them.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
