//! Error types for ferry
//!
//! Errors carry structured fields (claim names, job names, task IDs) so a
//! failed migration can be traced back to the resources it touched.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

const NO_FAILURE_MESSAGE: &str = "no failure message reported";

/// Main error type for ferry operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A resource or task did not meet the preconditions of a migration
    #[error("validation error for {resource}: {message}")]
    Validation {
        /// Resource the check was run against (e.g. "ns/claim")
        resource: String,
        /// Description of what's invalid
        message: String,
    },

    /// A strategy was asked to run a task it cannot handle
    #[error("strategy {strategy} cannot do task {task_id}")]
    StrategyNotApplicable {
        /// Name of the strategy
        strategy: String,
        /// ID of the rejected task
        task_id: String,
    },

    /// None of the registered strategies can handle the task
    #[error("no strategy can do task {task_id}")]
    NoApplicableStrategy {
        /// ID of the task
        task_id: String,
    },

    /// The migration Job reached the Failed condition
    #[error("job {namespace}/{job} failed: {message}")]
    JobFailed {
        /// Job name
        job: String,
        /// Job namespace
        namespace: String,
        /// Message from the Failed condition, if any
        message: String,
        /// Migration task that owns the Job, from its labels
        task_id: Option<String>,
    },

    /// Some of a task's resources could not be deleted
    #[error("cleanup of task {task_id} in {namespace} failed: {message}")]
    CleanupFailed {
        /// ID of the task being cleaned up
        task_id: String,
        /// Namespace that was swept
        namespace: String,
        /// Failures per resource kind, joined
        message: String,
    },

    /// A wait loop gave up
    #[error("{operation} timed out after {seconds}s")]
    Timeout {
        /// What was being waited on
        operation: String,
        /// Timeout in seconds
        seconds: u64,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Where the error occurred (e.g. "create_client")
        context: String,
    },
}

impl Error {
    /// Create a validation error without resource context
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
        }
    }

    /// Create a validation error for a specific resource
    pub fn validation_for(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
        }
    }

    /// Create a strategy-not-applicable error
    pub fn not_applicable(strategy: impl Into<String>, task_id: impl Into<String>) -> Self {
        Self::StrategyNotApplicable {
            strategy: strategy.into(),
            task_id: task_id.into(),
        }
    }

    /// Create a job failure error
    pub fn job_failed(
        job: impl Into<String>,
        namespace: impl Into<String>,
        message: Option<String>,
    ) -> Self {
        Self::JobFailed {
            job: job.into(),
            namespace: namespace.into(),
            message: message.unwrap_or_else(|| NO_FAILURE_MESSAGE.to_string()),
            task_id: None,
        }
    }

    /// Create a job failure error for a Job owned by a migration task
    pub fn job_failed_for_task(
        task_id: impl Into<String>,
        job: impl Into<String>,
        namespace: impl Into<String>,
        message: Option<String>,
    ) -> Self {
        Self::JobFailed {
            job: job.into(),
            namespace: namespace.into(),
            message: message.unwrap_or_else(|| NO_FAILURE_MESSAGE.to_string()),
            task_id: Some(task_id.into()),
        }
    }

    /// Create a cleanup error from per-kind failures
    pub fn cleanup_failed(
        task_id: impl Into<String>,
        namespace: impl Into<String>,
        failures: &[String],
    ) -> Self {
        Self::CleanupFailed {
            task_id: task_id.into(),
            namespace: namespace.into(),
            message: failures.join("; "),
        }
    }

    /// Create an internal error without context
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Get the task ID if this error is tied to a migration task
    pub fn task_id(&self) -> Option<&str> {
        match self {
            Error::StrategyNotApplicable { task_id, .. } => Some(task_id),
            Error::NoApplicableStrategy { task_id } => Some(task_id),
            Error::JobFailed { task_id, .. } => task_id.as_deref(),
            Error::CleanupFailed { task_id, .. } => Some(task_id),
            _ => None,
        }
    }
}
