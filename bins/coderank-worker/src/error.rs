use thiserror::Error;

/// Failures raised by the container runtime adapter.
///
/// Timeouts are deliberately absent: a stage hitting its deadline is a
/// normal terminal outcome (synthetic exit code 124), not an error. Compile
/// failures are a pipeline state, and malformed jobs never get past the
/// consumer boundary.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("failed to pull image '{image}': {reason}")]
    ImagePull { image: String, reason: String },

    #[error("container runtime error: {0}")]
    Runtime(#[from] bollard::errors::Error),

    #[error("file injection failed: {0}")]
    Injection(#[from] std::io::Error),

    #[error("log transport error: {0}")]
    LogTransport(String),
}

/// Failure persisting a status transition or result record. Non-fatal for
/// the job: callers log it and continue.
#[derive(Debug, Error)]
#[error("report failed: {0}")]
pub struct ReportError(#[from] redis::RedisError);
