// Sales workflow automation
//
// Task assignment, follow-up sequences, quotation approval and the lead
// rules that generate tasks as leads move through the pipeline.

pub mod assignment;
pub mod conditions;
pub mod followups;
pub mod lead_events;
pub mod quotations;
pub mod sequence;
pub mod tasks;

pub use assignment::AssignmentError;
pub use lead_events::LeadTaskEngine;
pub use quotations::{Decision, QuotationWorkflow};
pub use tasks::{NewTask, TaskFilter, TaskService};

use thiserror::Error;

use crate::error::AppError;

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    InvalidState(String),
    #[error(transparent)]
    Assignment(#[from] AssignmentError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;

impl From<WorkflowError> for AppError {
    fn from(err: WorkflowError) -> Self {
        match err {
            WorkflowError::NotFound(what) => AppError::NotFound(what.to_string()),
            WorkflowError::InvalidState(msg) => AppError::BadRequest(msg),
            WorkflowError::Assignment(e) => AppError::InternalError(e.to_string()),
            WorkflowError::Database(e) => AppError::from(e),
        }
    }
}
