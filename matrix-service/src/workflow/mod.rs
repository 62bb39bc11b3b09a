// Workflow Loading
// Builds job plans from a GitHub Actions-style workflow subset

pub mod expression;
pub mod matrix;
pub mod models;
pub mod parser;

pub use expression::ExpressionError;
pub use matrix::{MatrixExpander, MatrixInstance};
pub use models::{Combination, Job, Matrix, On, RunsOn, Strategy, Workflow};
pub use parser::WorkflowParser;

use crate::plan::PlanError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Failed to read workflow: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid workflow YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Job '{0}' not found in workflow")]
    MissingJob(String),

    #[error("Workflow has several jobs ({}); choose one", .0.join(", "))]
    AmbiguousJob(Vec<String>),

    #[error("Invalid expression in {context}: {source}")]
    Expression {
        context: String,
        #[source]
        source: ExpressionError,
    },

    #[error("Step {index} '{name}': {message}")]
    InvalidStep {
        index: usize,
        name: String,
        message: String,
    },

    #[error("Invalid matrix: {0}")]
    InvalidMatrix(String),

    #[error(transparent)]
    Plan(#[from] PlanError),
}
