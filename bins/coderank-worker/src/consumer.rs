//! Job stream consumer: one member of the worker consumer group.
//!
//! Reads are bounded by free execution slots; at capacity the loop stops
//! reading entirely and the broker holds the backlog for the group. Entries
//! are acknowledged at dispatch, so a job is owned by exactly one worker
//! and is not redelivered if that worker dies mid-execution.
//!
//! The consumer must own a dedicated connection: a blocking group read
//! parks the multiplexed connection for the whole block window, and any
//! reporting command sharing it would queue behind the idle read.

use crate::config::WorkerConfig;
use crate::executor::CodeExecutor;
use crate::registry::InFlightRegistry;
use crate::reporter::ResultReporter;
use anyhow::Context;
use coderank_common::redis as store;
use coderank_common::types::ExecutionJob;
use redis::aio::ConnectionManager;
use redis::streams::{StreamId, StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, RedisResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// How long a blocking stream read waits before cycling.
const READ_BLOCK_MS: usize = 5_000;

/// Poll interval while at capacity or draining.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

pub struct JobConsumer {
    conn: ConnectionManager,
    config: WorkerConfig,
    registry: Arc<InFlightRegistry>,
    executor: Arc<CodeExecutor>,
    reporter: Arc<dyn ResultReporter>,
}

impl JobConsumer {
    pub fn new(
        conn: ConnectionManager,
        config: WorkerConfig,
        registry: Arc<InFlightRegistry>,
        executor: Arc<CodeExecutor>,
        reporter: Arc<dyn ResultReporter>,
    ) -> Self {
        JobConsumer {
            conn,
            config,
            registry,
            executor,
            reporter,
        }
    }

    /// Consume until the shutdown flag is raised. Broker errors are logged
    /// and retried; the loop itself only fails if the consumer group cannot
    /// be created.
    ///
    /// Every entry a read returns is dispatched or acknowledged before the
    /// flag is honored, so shutdown never strands a just-delivered entry in
    /// the group's pending list. Shutdown latency is bounded by the read
    /// block window.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        store::create_consumer_group(&mut conn, &self.config.consumer_group)
            .await
            .context("failed to create consumer group")?;
        info!(
            group = %self.config.consumer_group,
            consumer = %self.config.consumer_name,
            concurrency = self.config.concurrency,
            "consumer joined job stream"
        );

        while !*shutdown.borrow() {
            let available = self.registry.available();
            if available == 0 {
                tokio::time::sleep(POLL_INTERVAL).await;
                continue;
            }

            let options = StreamReadOptions::default()
                .group(&self.config.consumer_group, &self.config.consumer_name)
                .count(available)
                .block(READ_BLOCK_MS);
            let reply: StreamReadReply = match conn
                .xread_options(&[store::JOB_STREAM], &[">"], &options)
                .await
            {
                Ok(reply) => reply,
                Err(e) => {
                    error!(error = %e, "job stream read failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            for stream in reply.keys {
                for entry in stream.ids {
                    self.dispatch(&mut conn, entry).await;
                }
            }
        }

        info!("consumer stopped");
        Ok(())
    }

    /// Validate, admit, acknowledge and spawn one stream entry. Entries that
    /// cannot become jobs are acknowledged and dropped so they never wedge
    /// the group's pending list.
    async fn dispatch(&self, conn: &mut ConnectionManager, entry: StreamId) {
        let entry_id = entry.id.clone();

        let Some(payload) = entry.get::<String>(store::PAYLOAD_FIELD) else {
            warn!(entry = %entry_id, "dropping stream entry without a payload field");
            self.ack(conn, &entry_id).await;
            return;
        };

        let job: ExecutionJob = match serde_json::from_str(&payload) {
            Ok(job) => job,
            Err(e) => {
                warn!(entry = %entry_id, error = %e, "dropping malformed job payload");
                self.ack(conn, &entry_id).await;
                return;
            }
        };

        if job.submission_id.is_empty() {
            warn!(entry = %entry_id, "dropping job with empty submission id");
            self.ack(conn, &entry_id).await;
            return;
        }

        // Reads are capped at free slots, so a refusal here means the
        // submission is already executing on this worker.
        if !self.registry.try_admit(&job.submission_id) {
            warn!(
                submission_id = %job.submission_id,
                "submission already executing, dropping duplicate"
            );
            self.ack(conn, &entry_id).await;
            return;
        }

        self.ack(conn, &entry_id).await;

        let executor = self.executor.clone();
        let reporter = self.reporter.clone();
        let registry = self.registry.clone();
        tokio::spawn(async move {
            run_job(job, executor, reporter, registry).await;
        });
    }

    async fn ack(&self, conn: &mut ConnectionManager, entry_id: &str) {
        let acked: RedisResult<i64> = conn
            .xack(store::JOB_STREAM, &self.config.consumer_group, &[entry_id])
            .await;
        if let Err(e) = acked {
            warn!(entry = %entry_id, error = %e, "failed to acknowledge stream entry");
        }
    }

    /// Wait for in-flight jobs to finish, up to the configured drain window.
    pub async fn drain(&self) {
        if self.registry.is_empty() {
            return;
        }
        info!(in_flight = self.registry.len(), "draining in-flight jobs");
        let deadline = Instant::now() + Duration::from_secs(self.config.drain_timeout_secs);

        while !self.registry.is_empty() {
            if Instant::now() >= deadline {
                warn!(
                    remaining = self.registry.len(),
                    "drain window elapsed, abandoning remaining jobs"
                );
                return;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        info!("all in-flight jobs drained");
    }
}

/// Run one admitted job through the pipeline and report every transition.
/// Reporting failures are logged and do not stop the sequence; the registry
/// slot is released last, on every path.
async fn run_job(
    job: ExecutionJob,
    executor: Arc<CodeExecutor>,
    reporter: Arc<dyn ResultReporter>,
    registry: Arc<InFlightRegistry>,
) {
    let submission_id = job.submission_id.clone();
    info!(
        submission_id = %submission_id,
        language = %job.language,
        in_flight = registry.len(),
        "job started"
    );

    if let Err(e) = reporter.mark_running(&submission_id).await {
        warn!(submission_id = %submission_id, error = %e, "failed to mark submission running");
    }

    let result = executor.execute(&job).await;
    let success = result.is_success();

    if let Err(e) = reporter.save_result(&result).await {
        error!(submission_id = %submission_id, error = %e, "failed to persist result");
    }
    if let Err(e) = reporter.mark_completed(&submission_id, success).await {
        warn!(submission_id = %submission_id, error = %e, "failed to mark submission completed");
    }

    registry.complete(&submission_id);
    info!(
        submission_id = %submission_id,
        success,
        execution_time_ms = result.execution_time_ms,
        "job finished"
    );
}
