//! Execution pipeline: one job in, exactly one well-formed result out.
//!
//! Per job: create a workspace, write the source (and input) files, run the
//! optional compile stage, run the execute stage, classify. Terminal states
//! are compile-failed, run-failed, and succeeded. Nothing escapes
//! `execute`: adapter failures and internal errors are converted into a
//! run-failed result so the consumer never has to unwind a job.

use crate::config::FileDelivery;
use crate::docker::{SandboxRuntime, SandboxSpec};
use crate::output::truncate_output;
use anyhow::Context;
use coderank_common::types::{ExecutionJob, ExecutionResult};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Working directory inside every sandbox; the job workspace is mounted or
/// injected here.
const SANDBOX_WORKDIR: &str = "/app";

const INPUT_FILE: &str = "input.txt";

/// Sentinel when a run stage fails without producing any stderr.
const GENERIC_RUNTIME_ERROR: &str = "Runtime error";

/// Language-to-filename dispatch table. Adding a language is a data change;
/// unknown languages fall back to `solution.{language}`.
const SOURCE_FILE_NAMES: &[(&str, &str)] = &[
    ("python", "solution.py"),
    ("python3", "solution.py"),
    ("javascript", "solution.js"),
    ("js", "solution.js"),
    ("java", "Solution.java"),
    ("cpp", "solution.cpp"),
    ("c++", "solution.cpp"),
    ("c", "solution.c"),
    ("go", "solution.go"),
    ("rust", "solution.rs"),
    ("typescript", "solution.ts"),
];

pub fn source_file_name(language: &str) -> String {
    let language = language.to_lowercase();
    SOURCE_FILE_NAMES
        .iter()
        .find(|(id, _)| *id == language)
        .map(|(_, name)| (*name).to_string())
        .unwrap_or_else(|| format!("solution.{}", language))
}

pub struct CodeExecutor {
    runtime: Arc<dyn SandboxRuntime>,
    max_output_bytes: usize,
    file_delivery: FileDelivery,
}

impl CodeExecutor {
    pub fn new(
        runtime: Arc<dyn SandboxRuntime>,
        max_output_bytes: usize,
        file_delivery: FileDelivery,
    ) -> Self {
        CodeExecutor {
            runtime,
            max_output_bytes,
            file_delivery,
        }
    }

    /// Run one job to a terminal state. Always returns a result; any
    /// failure inside the stages becomes a run-failed classification with
    /// the time spent up to the failure.
    pub async fn execute(&self, job: &ExecutionJob) -> ExecutionResult {
        let started = Instant::now();

        match self.run_stages(job, started).await {
            Ok(result) => result,
            Err(e) => {
                warn!(
                    submission_id = %job.submission_id,
                    error = %e,
                    "pipeline failed, reporting run failure"
                );
                ExecutionResult {
                    submission_id: job.submission_id.clone(),
                    stdout: String::new(),
                    stderr: String::new(),
                    compilation_error: None,
                    runtime_error: Some(truncate_output(&e.to_string(), self.max_output_bytes)),
                    execution_time_ms: started.elapsed().as_millis() as u64,
                    exit_code: 1,
                    memory_used_kb: None,
                }
            }
        }
    }

    async fn run_stages(
        &self,
        job: &ExecutionJob,
        started: Instant,
    ) -> anyhow::Result<ExecutionResult> {
        let config = &job.language_config;
        // TempDir removes the workspace on drop, on every exit path.
        let workspace = self.prepare_workspace(job)?;
        let timeout = Duration::from_secs(config.timeout_seconds);

        if let Some(compile_command) = &config.compile_command {
            let spec = self.stage_spec(job, compile_command, workspace.path(), true);
            let compiled = self.runtime.run(&spec, timeout).await?;

            if compiled.exit_code != 0 {
                info!(
                    submission_id = %job.submission_id,
                    exit_code = compiled.exit_code,
                    "compilation failed"
                );
                let message = if !compiled.stderr.is_empty() {
                    compiled.stderr
                } else {
                    compiled.stdout
                };
                return Ok(ExecutionResult {
                    submission_id: job.submission_id.clone(),
                    stdout: String::new(),
                    stderr: String::new(),
                    compilation_error: Some(truncate_output(&message, self.max_output_bytes)),
                    runtime_error: None,
                    execution_time_ms: started.elapsed().as_millis() as u64,
                    exit_code: 1,
                    memory_used_kb: None,
                });
            }
            debug!(submission_id = %job.submission_id, "compilation succeeded");
        }

        let mut execute_command = config.execute_command.clone();
        if job.input_data.is_some() {
            execute_command.push_str(&format!(" < {}", INPUT_FILE));
        }

        let spec = self.stage_spec(job, &execute_command, workspace.path(), false);
        let executed = self.runtime.run(&spec, timeout).await?;

        let execution_time_ms = started.elapsed().as_millis() as u64;
        info!(
            submission_id = %job.submission_id,
            exit_code = executed.exit_code,
            execution_time_ms,
            stdout_bytes = executed.stdout.len(),
            "execution finished"
        );

        let runtime_error = if executed.exit_code != 0 {
            let message = if !executed.stderr.is_empty() {
                executed.stderr.clone()
            } else {
                GENERIC_RUNTIME_ERROR.to_string()
            };
            Some(truncate_output(&message, self.max_output_bytes))
        } else {
            None
        };

        Ok(ExecutionResult {
            submission_id: job.submission_id.clone(),
            stdout: truncate_output(&executed.stdout, self.max_output_bytes),
            stderr: truncate_output(&executed.stderr, self.max_output_bytes),
            compilation_error: None,
            runtime_error,
            execution_time_ms,
            exit_code: executed.exit_code,
            memory_used_kb: None,
        })
    }

    /// Create the job workspace and write the source and input files.
    fn prepare_workspace(&self, job: &ExecutionJob) -> anyhow::Result<TempDir> {
        let workspace = tempfile::Builder::new()
            .prefix("coderank-exec-")
            .tempdir()
            .context("failed to create job workspace")?;

        // The sandbox user is unlikely to match the worker uid; open up the
        // workspace so compile stages can write artifacts through the mount.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(workspace.path(), fs::Permissions::from_mode(0o777))
                .context("failed to set workspace permissions")?;
        }

        let file_name = source_file_name(&job.language);
        fs::write(workspace.path().join(&file_name), &job.source_code)
            .with_context(|| format!("failed to write source file {}", file_name))?;

        if let Some(input) = &job.input_data {
            fs::write(workspace.path().join(INPUT_FILE), input)
                .context("failed to write input file")?;
        }

        debug!(
            submission_id = %job.submission_id,
            workspace = %workspace.path().display(),
            source_file = %file_name,
            has_input = job.input_data.is_some(),
            "workspace prepared"
        );
        Ok(workspace)
    }

    fn stage_spec(
        &self,
        job: &ExecutionJob,
        command: &str,
        workspace: &Path,
        export_artifacts: bool,
    ) -> SandboxSpec {
        let config = &job.language_config;
        let mut spec = SandboxSpec {
            image: config.docker_image.clone(),
            cmd: vec![
                "/bin/bash".to_string(),
                "-c".to_string(),
                command.to_string(),
            ],
            env: Vec::new(),
            working_dir: SANDBOX_WORKDIR.to_string(),
            memory_limit_mb: config.max_memory_mb,
            network_disabled: true,
            ..Default::default()
        };

        match self.file_delivery {
            FileDelivery::Bind => {
                spec.binds = vec![format!("{}:{}", workspace.display(), SANDBOX_WORKDIR)];
            }
            FileDelivery::Copy => {
                spec.copy_in = Some(workspace.to_path_buf());
                if export_artifacts {
                    // Compile artifacts must survive into the run sandbox.
                    spec.copy_out = Some(workspace.to_path_buf());
                }
            }
        }

        spec
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docker::{SandboxOutput, TIMEOUT_EXIT_CODE, TIME_LIMIT_MESSAGE};
    use crate::error::AdapterError;
    use coderank_common::types::LanguageRuntimeConfig;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Scripted stand-in for the Docker adapter: pops one canned outcome per
    /// stage and records every spec it was asked to run.
    struct ScriptedRuntime {
        outcomes: Mutex<VecDeque<Result<SandboxOutput, AdapterError>>>,
        calls: Mutex<Vec<SandboxSpec>>,
    }

    impl ScriptedRuntime {
        fn new(outcomes: Vec<Result<SandboxOutput, AdapterError>>) -> Arc<Self> {
            Arc::new(ScriptedRuntime {
                outcomes: Mutex::new(outcomes.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<SandboxSpec> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl SandboxRuntime for ScriptedRuntime {
        async fn run(
            &self,
            spec: &SandboxSpec,
            _timeout: Duration,
        ) -> Result<SandboxOutput, AdapterError> {
            self.calls.lock().unwrap().push(spec.clone());
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(SandboxOutput::default()))
        }
    }

    fn job(compile_command: Option<&str>, input_data: Option<&str>) -> ExecutionJob {
        ExecutionJob {
            submission_id: "sub-1".to_string(),
            user_id: "user-1".to_string(),
            language: "python".to_string(),
            source_code: "print('hello')".to_string(),
            input_data: input_data.map(str::to_string),
            language_config: LanguageRuntimeConfig {
                language_id: "python".to_string(),
                display_name: "Python 3".to_string(),
                docker_image: "python:3.11-slim".to_string(),
                compile_command: compile_command.map(str::to_string),
                execute_command: "python3 solution.py".to_string(),
                timeout_seconds: 10,
                max_memory_mb: 256,
                is_active: true,
            },
        }
    }

    fn executor(runtime: Arc<ScriptedRuntime>) -> CodeExecutor {
        CodeExecutor::new(runtime, 50 * 1024, FileDelivery::Bind)
    }

    fn ok(stdout: &str, stderr: &str, exit_code: i64) -> Result<SandboxOutput, AdapterError> {
        Ok(SandboxOutput {
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            exit_code,
        })
    }

    #[tokio::test]
    async fn run_only_job_succeeds() {
        let runtime = ScriptedRuntime::new(vec![ok("hello\n", "", 0)]);
        let result = executor(runtime.clone()).execute(&job(None, None)).await;

        assert_eq!(result.stdout, "hello\n");
        assert_eq!(result.stderr, "");
        assert_eq!(result.exit_code, 0);
        assert!(result.compilation_error.is_none());
        assert!(result.runtime_error.is_none());
        assert!(result.is_success());

        // No compile command means exactly one sandbox.
        let calls = runtime.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].cmd[2], "python3 solution.py");
    }

    #[tokio::test]
    async fn compile_failure_short_circuits_the_run_stage() {
        let runtime = ScriptedRuntime::new(vec![ok("", "syntax error", 1)]);
        let result = executor(runtime.clone())
            .execute(&job(Some("gcc solution.c -o solution"), None))
            .await;

        assert_eq!(result.compilation_error.as_deref(), Some("syntax error"));
        assert!(result.runtime_error.is_none());
        assert_eq!(result.exit_code, 1);
        // The run stage never happened.
        assert_eq!(runtime.calls().len(), 1);
    }

    #[tokio::test]
    async fn compile_error_falls_back_to_stdout() {
        let runtime = ScriptedRuntime::new(vec![ok("error on line 3", "", 2)]);
        let result = executor(runtime.clone())
            .execute(&job(Some("javac Solution.java"), None))
            .await;

        assert_eq!(result.compilation_error.as_deref(), Some("error on line 3"));
    }

    #[tokio::test]
    async fn compile_then_run_uses_two_sandboxes() {
        let runtime = ScriptedRuntime::new(vec![ok("", "", 0), ok("42\n", "", 0)]);
        let result = executor(runtime.clone())
            .execute(&job(Some("gcc solution.c -o solution"), None))
            .await;

        assert!(result.is_success());
        assert_eq!(result.stdout, "42\n");
        let calls = runtime.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].cmd[2], "gcc solution.c -o solution");
        assert_eq!(calls[1].cmd[2], "python3 solution.py");
    }

    #[tokio::test]
    async fn input_is_redirected_into_the_run_command() {
        let runtime = ScriptedRuntime::new(vec![ok("84\n", "", 0)]);
        executor(runtime.clone())
            .execute(&job(None, Some("42\n")))
            .await;

        let calls = runtime.calls();
        assert_eq!(calls[0].cmd[2], "python3 solution.py < input.txt");
    }

    #[tokio::test]
    async fn nonzero_exit_sets_runtime_error_from_stderr() {
        let runtime = ScriptedRuntime::new(vec![ok("partial", "stack trace", 3)]);
        let result = executor(runtime).execute(&job(None, None)).await;

        assert_eq!(result.runtime_error.as_deref(), Some("stack trace"));
        assert!(result.compilation_error.is_none());
        assert_eq!(result.exit_code, 3);
        assert_eq!(result.stdout, "partial");
    }

    #[tokio::test]
    async fn nonzero_exit_with_empty_stderr_uses_the_sentinel() {
        let runtime = ScriptedRuntime::new(vec![ok("", "", 1)]);
        let result = executor(runtime).execute(&job(None, None)).await;

        assert_eq!(result.runtime_error.as_deref(), Some(GENERIC_RUNTIME_ERROR));
    }

    #[tokio::test]
    async fn timeout_is_a_classified_result_not_an_error() {
        let runtime =
            ScriptedRuntime::new(vec![ok("", TIME_LIMIT_MESSAGE, TIMEOUT_EXIT_CODE)]);
        let result = executor(runtime).execute(&job(None, None)).await;

        assert_eq!(result.exit_code, TIMEOUT_EXIT_CODE);
        assert_eq!(result.stdout, "");
        assert_eq!(result.runtime_error.as_deref(), Some(TIME_LIMIT_MESSAGE));
    }

    #[tokio::test]
    async fn adapter_failure_still_returns_a_result() {
        let runtime = ScriptedRuntime::new(vec![Err(AdapterError::ImagePull {
            image: "ghost:latest".to_string(),
            reason: "registry unreachable".to_string(),
        })]);
        let result = executor(runtime).execute(&job(None, None)).await;

        assert_eq!(result.exit_code, 1);
        let message = result.runtime_error.expect("runtime error set");
        assert!(message.contains("ghost:latest"));
        assert!(result.compilation_error.is_none());
    }

    #[tokio::test]
    async fn oversized_stdout_is_truncated_with_a_marker() {
        let big = "x".repeat(100 * 1024);
        let runtime = ScriptedRuntime::new(vec![ok(&big, "", 0)]);
        let result = executor(runtime).execute(&job(None, None)).await;

        assert!(result.stdout.len() < big.len());
        assert!(result.stdout.contains("total size: 102400 bytes"));
    }

    #[tokio::test]
    async fn copy_delivery_exports_artifacts_only_from_the_compile_stage() {
        let runtime = ScriptedRuntime::new(vec![ok("", "", 0), ok("", "", 0)]);
        let executor = CodeExecutor::new(runtime.clone(), 50 * 1024, FileDelivery::Copy);
        executor
            .execute(&job(Some("gcc solution.c -o solution"), None))
            .await;

        let calls = runtime.calls();
        assert!(calls[0].copy_in.is_some());
        assert!(calls[0].copy_out.is_some());
        assert!(calls[1].copy_in.is_some());
        assert!(calls[1].copy_out.is_none());
        assert!(calls[0].binds.is_empty());
    }

    #[test]
    fn filename_table_covers_known_languages_and_defaults() {
        assert_eq!(source_file_name("python"), "solution.py");
        assert_eq!(source_file_name("Java"), "Solution.java");
        assert_eq!(source_file_name("c++"), "solution.cpp");
        assert_eq!(source_file_name("kotlin"), "solution.kotlin");
    }
}
