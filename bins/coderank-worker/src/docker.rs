//! Container runtime adapter.
//!
//! Drives one sandbox through its whole lifecycle: create with resource
//! caps and network isolation, inject files, start, race completion against
//! the stage deadline, collect and demultiplex the combined log stream,
//! inspect for the exit code, and remove the container on every path.
//!
//! A deadline firing is a normal outcome (synthetic exit code 124), never
//! an error. Removal failures are logged and swallowed: a leaked container
//! must not change the job's visible result.

use crate::demux::{self, StdioStreams};
use crate::error::AdapterError;
use crate::injector;
use bollard::container::{
    Config, CreateContainerOptions, DownloadFromContainerOptions, InspectContainerOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions, UploadToContainerOptions,
    WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use bytes::Bytes;
use futures_util::stream::StreamExt;
use http_body_util::{BodyExt, Empty};
use hyper_util::client::legacy::Client;
use hyperlocal::{UnixClientExt, UnixConnector, Uri};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Exit code reported when a stage hits its deadline, mirroring `timeout(1)`.
pub const TIMEOUT_EXIT_CODE: i64 = 124;

/// Synthetic stderr for a timed-out stage.
pub const TIME_LIMIT_MESSAGE: &str = "time limit exceeded";

/// Everything needed to run one single-use sandbox.
#[derive(Debug, Clone, Default)]
pub struct SandboxSpec {
    pub image: String,
    pub cmd: Vec<String>,
    pub env: Vec<String>,
    pub working_dir: String,
    pub memory_limit_mb: u64,
    pub network_disabled: bool,
    /// Host bind mounts, `host:container` form.
    pub binds: Vec<String>,
    /// Directory whose files are injected into the working directory before
    /// start (copy delivery).
    pub copy_in: Option<PathBuf>,
    /// Where to export the working directory after a zero-exit run (copy
    /// delivery: carries compile artifacts back to the job workspace).
    pub copy_out: Option<PathBuf>,
}

/// Raw outcome of one sandbox: demultiplexed stdio and the exit code.
#[derive(Debug, Clone, Default)]
pub struct SandboxOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
}

/// Execution backend seam. Production uses [`DockerManager`]; the pipeline
/// tests script this with an in-memory fake.
#[async_trait::async_trait]
pub trait SandboxRuntime: Send + Sync {
    async fn run(&self, spec: &SandboxSpec, timeout: Duration)
        -> Result<SandboxOutput, AdapterError>;
}

pub struct DockerManager {
    docker: Docker,
    socket_path: String,
    log_client: Client<UnixConnector, Empty<Bytes>>,
}

impl DockerManager {
    pub fn new(socket_path: &str) -> Result<Self, AdapterError> {
        let docker =
            Docker::connect_with_socket(socket_path, 120, bollard::API_DEFAULT_VERSION)?;
        Ok(DockerManager {
            docker,
            socket_path: socket_path.to_string(),
            log_client: Client::unix(),
        })
    }

    /// Make sure `image` is present locally, pulling it on a miss.
    /// Idempotent; any probe failure other than "not found" is an
    /// [`AdapterError::ImagePull`].
    pub async fn ensure_image(&self, image: &str) -> Result<(), AdapterError> {
        match self.docker.inspect_image(image).await {
            Ok(_) => {
                debug!(image, "image cache hit");
                return Ok(());
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                info!(image, "image cache miss, pulling");
            }
            Err(e) => {
                return Err(AdapterError::ImagePull {
                    image: image.to_string(),
                    reason: e.to_string(),
                })
            }
        }

        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });
        let mut pull = self.docker.create_image(options, None, None);
        while let Some(progress) = pull.next().await {
            progress.map_err(|e| AdapterError::ImagePull {
                image: image.to_string(),
                reason: e.to_string(),
            })?;
        }

        info!(image, "image pulled");
        Ok(())
    }

    /// Drive one sandbox to completion and hand back its demultiplexed
    /// output. The container is removed before this returns, on every path.
    async fn run_sandbox(
        &self,
        spec: &SandboxSpec,
        timeout: Duration,
    ) -> Result<SandboxOutput, AdapterError> {
        self.ensure_image(&spec.image).await?;

        let name = format!("coderank-{}", uuid::Uuid::new_v4());
        let memory_bytes = (spec.memory_limit_mb as i64) * 1024 * 1024;

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.cmd.clone()),
            env: Some(spec.env.clone()),
            working_dir: Some(spec.working_dir.clone()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            network_disabled: Some(spec.network_disabled),
            host_config: Some(HostConfig {
                memory: Some(memory_bytes),
                // Same cap on memory+swap disables swap entirely.
                memory_swap: Some(memory_bytes),
                network_mode: spec.network_disabled.then(|| "none".to_string()),
                binds: if spec.binds.is_empty() {
                    None
                } else {
                    Some(spec.binds.clone())
                },
                ..Default::default()
            }),
            ..Default::default()
        };

        let create_options = CreateContainerOptions {
            name: name.as_str(),
            platform: None,
        };
        let container = self
            .docker
            .create_container(Some(create_options), config)
            .await?;
        let container_id = container.id;
        debug!(container = %short_id(&container_id), image = %spec.image, "sandbox created");

        // Everything past creation runs under the removal guarantee.
        let outcome = self.supervise(&container_id, spec, timeout).await;
        self.remove(&container_id).await;
        outcome
    }

    async fn supervise(
        &self,
        id: &str,
        spec: &SandboxSpec,
        timeout: Duration,
    ) -> Result<SandboxOutput, AdapterError> {
        if let Some(dir) = &spec.copy_in {
            let archive = injector::archive_dir(dir)?;
            let options = UploadToContainerOptions {
                path: spec.working_dir.as_str(),
                ..Default::default()
            };
            self.docker
                .upload_to_container(id, Some(options), bollard::body_full(archive.into()))
                .await?;
            debug!(container = %short_id(id), "workspace injected");
        }

        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await?;

        let wait_options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut wait_stream = self.docker.wait_container(id, Some(wait_options));

        let wait_outcome = match tokio::time::timeout(timeout, wait_stream.next()).await {
            Err(_) => {
                warn!(
                    container = %short_id(id),
                    timeout_ms = timeout.as_millis() as u64,
                    "sandbox hit its deadline, stopping"
                );
                if let Err(e) = self
                    .docker
                    .stop_container(id, Some(StopContainerOptions { t: 0 }))
                    .await
                {
                    warn!(container = %short_id(id), error = %e, "failed to stop timed-out sandbox");
                }
                return Ok(SandboxOutput {
                    stdout: String::new(),
                    stderr: TIME_LIMIT_MESSAGE.to_string(),
                    exit_code: TIMEOUT_EXIT_CODE,
                });
            }
            Ok(outcome) => outcome,
        };

        match wait_outcome {
            // The daemon reports a non-zero exit through the wait body; the
            // sandbox still completed, so it is not an adapter failure.
            Some(Ok(_)) | Some(Err(bollard::errors::Error::DockerContainerWaitError { .. }))
            | None => {}
            Some(Err(e)) => return Err(AdapterError::Runtime(e)),
        }

        let raw = self.combined_logs(id).await?;
        let StdioStreams { stdout, stderr } = demux::demux(&raw);

        let inspect = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await?;
        let exit_code = inspect
            .state
            .and_then(|state| state.exit_code)
            .unwrap_or(-1);

        if exit_code == 0 {
            if let Some(dest) = &spec.copy_out {
                self.export_dir(id, &spec.working_dir, dest).await?;
            }
        }

        Ok(SandboxOutput {
            stdout,
            stderr,
            exit_code,
        })
    }

    /// Fetch the combined multiplexed log stream raw off the daemon socket.
    /// bollard pre-parses log frames, but splitting has to go through the
    /// demultiplexer, so this endpoint is read directly.
    async fn combined_logs(&self, id: &str) -> Result<Vec<u8>, AdapterError> {
        let uri = Uri::new(
            &self.socket_path,
            &format!("/containers/{}/logs?stdout=true&stderr=true", id),
        );
        let response = self
            .log_client
            .get(uri.into())
            .await
            .map_err(|e| AdapterError::LogTransport(e.to_string()))?;

        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| AdapterError::LogTransport(e.to_string()))?
            .to_bytes();

        if !status.is_success() {
            return Err(AdapterError::LogTransport(format!(
                "log fetch returned {}: {}",
                status,
                String::from_utf8_lossy(&body)
            )));
        }

        Ok(body.to_vec())
    }

    /// Export the sandbox working directory back into `dest` on the host.
    async fn export_dir(
        &self,
        id: &str,
        container_path: &str,
        dest: &Path,
    ) -> Result<(), AdapterError> {
        let options = DownloadFromContainerOptions {
            path: container_path.to_string(),
        };
        let mut stream = self.docker.download_from_container(id, Some(options));
        let mut bytes = Vec::new();
        while let Some(chunk) = stream.next().await {
            bytes.extend_from_slice(&chunk?);
        }
        injector::extract_archive(&bytes, dest)?;
        debug!(container = %short_id(id), "workspace exported");
        Ok(())
    }

    /// Best-effort removal; failures are logged, never raised.
    async fn remove(&self, id: &str) {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self.docker.remove_container(id, Some(options)).await {
            Ok(()) => debug!(container = %short_id(id), "sandbox removed"),
            Err(e) => warn!(container = %short_id(id), error = %e, "failed to remove sandbox"),
        }
    }
}

#[async_trait::async_trait]
impl SandboxRuntime for DockerManager {
    async fn run(
        &self,
        spec: &SandboxSpec,
        timeout: Duration,
    ) -> Result<SandboxOutput, AdapterError> {
        self.run_sandbox(spec, timeout).await
    }
}

fn short_id(id: &str) -> &str {
    &id[..id.len().min(12)]
}
