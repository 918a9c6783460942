// Worker configuration, assembled from the environment at boot.
use crate::output::DEFAULT_MAX_OUTPUT_BYTES;
use anyhow::{bail, Context, Result};

/// How job files reach a sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileDelivery {
    /// Bind-mount the job workspace into the sandbox (default; requires the
    /// daemon to share a filesystem with the worker).
    Bind,
    /// Inject the workspace as a tar archive before start, exporting compile
    /// artifacts back out between stages. Works against remote daemons.
    Copy,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub redis_url: String,
    pub consumer_group: String,
    pub consumer_name: String,
    pub concurrency: usize,
    pub drain_timeout_secs: u64,
    pub docker_socket: String,
    pub max_output_bytes: usize,
    pub file_delivery: FileDelivery,
    pub health_addr: String,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self> {
        let concurrency = env_parse("QUEUE_CONCURRENCY", 5usize)?;
        if concurrency == 0 {
            bail!("QUEUE_CONCURRENCY must be at least 1");
        }

        let file_delivery = match std::env::var("SANDBOX_FILE_DELIVERY")
            .unwrap_or_else(|_| "bind".to_string())
            .to_lowercase()
            .as_str()
        {
            "bind" => FileDelivery::Bind,
            "copy" => FileDelivery::Copy,
            other => bail!("invalid SANDBOX_FILE_DELIVERY '{}': expected bind or copy", other),
        };

        Ok(WorkerConfig {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            consumer_group: std::env::var("JOB_CONSUMER_GROUP")
                .unwrap_or_else(|_| "execution-group".to_string()),
            consumer_name: std::env::var("WORKER_NAME")
                .unwrap_or_else(|_| format!("worker-{}", std::process::id())),
            concurrency,
            drain_timeout_secs: env_parse("DRAIN_TIMEOUT_SECONDS", 30u64)?,
            docker_socket: std::env::var("DOCKER_SOCKET_PATH")
                .unwrap_or_else(|_| "/var/run/docker.sock".to_string()),
            max_output_bytes: env_parse("MAX_OUTPUT_BYTES", DEFAULT_MAX_OUTPUT_BYTES)?,
            file_delivery,
            health_addr: std::env::var("HEALTH_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:8088".to_string()),
        })
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("invalid {}: '{}'", name, raw)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env-var tests mutate process state; keep them to defaults-only so they
    // stay order-independent.
    #[test]
    fn defaults_are_sane() {
        let config = WorkerConfig::from_env().unwrap();
        assert_eq!(config.concurrency, 5);
        assert_eq!(config.consumer_group, "execution-group");
        assert_eq!(config.max_output_bytes, DEFAULT_MAX_OUTPUT_BYTES);
        assert_eq!(config.file_delivery, FileDelivery::Bind);
        assert!(config.consumer_name.starts_with("worker-"));
    }
}
