use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One submission's execution request, produced by the gateway and consumed
/// by exactly one worker. Field names match the gateway's JSON wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionJob {
    pub submission_id: String,
    pub user_id: String,
    pub language: String,
    pub source_code: String,
    #[serde(default)]
    pub input_data: Option<String>,
    pub language_config: LanguageRuntimeConfig,
}

/// Trusted snapshot of a language's runtime configuration, embedded in the
/// job message by the gateway. Never re-fetched by the worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageRuntimeConfig {
    pub language_id: String,
    pub display_name: String,
    pub docker_image: String,
    #[serde(default)]
    pub compile_command: Option<String>,
    pub execute_command: String,
    pub timeout_seconds: u64,
    pub max_memory_mb: u64,
    pub is_active: bool,
}

/// Final outcome of one execution attempt. Exactly one of `compilation_error`
/// and `runtime_error` is set on failure; both are `None` on success.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub submission_id: String,
    pub stdout: String,
    pub stderr: String,
    #[serde(default)]
    pub compilation_error: Option<String>,
    #[serde(default)]
    pub runtime_error: Option<String>,
    pub execution_time_ms: u64,
    pub exit_code: i64,
    /// Declared on the wire but never populated: the hard memory cap is
    /// enforced, actual usage is not measured.
    #[serde(default)]
    pub memory_used_kb: Option<u64>,
}

impl ExecutionResult {
    /// Success iff the run stage exited 0 and no failure classification holds.
    pub fn is_success(&self) -> bool {
        self.exit_code == 0 && self.compilation_error.is_none() && self.runtime_error.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SubmissionStatus::Pending => "pending",
            SubmissionStatus::Running => "running",
            SubmissionStatus::Completed => "completed",
            SubmissionStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Status record kept alongside the result so clients can poll transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionState {
    pub status: SubmissionStatus,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_deserializes_from_gateway_json() {
        let raw = r#"{
            "submissionId": "sub-1",
            "userId": "user-1",
            "language": "python",
            "sourceCode": "print('hi')",
            "languageConfig": {
                "languageId": "python",
                "displayName": "Python 3",
                "dockerImage": "python:3.11-slim",
                "executeCommand": "python3 solution.py",
                "timeoutSeconds": 10,
                "maxMemoryMb": 256,
                "isActive": true
            }
        }"#;

        let job: ExecutionJob = serde_json::from_str(raw).unwrap();
        assert_eq!(job.submission_id, "sub-1");
        assert!(job.input_data.is_none());
        assert!(job.language_config.compile_command.is_none());
        assert_eq!(job.language_config.timeout_seconds, 10);
    }

    #[test]
    fn success_requires_zero_exit_and_no_errors() {
        let mut result = ExecutionResult {
            submission_id: "sub-1".to_string(),
            stdout: "ok".to_string(),
            stderr: String::new(),
            compilation_error: None,
            runtime_error: None,
            execution_time_ms: 12,
            exit_code: 0,
            memory_used_kb: None,
        };
        assert!(result.is_success());

        result.runtime_error = Some("boom".to_string());
        assert!(!result.is_success());

        result.runtime_error = None;
        result.exit_code = 124;
        assert!(!result.is_success());
    }
}
