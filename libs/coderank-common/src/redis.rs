use crate::types::{ExecutionJob, ExecutionResult, SubmissionState, SubmissionStatus};
use chrono::{DateTime, Utc};
use redis::{AsyncCommands, RedisResult};

/// Redis queue semantics - defines only semantics, not runtime logic.
/// Ensures the gateway and the workers never drift on stream and key names,
/// and keeps autoscaler queue-depth probes deterministic.

pub const JOB_STREAM: &str = "coderank:jobs";
pub const RESULT_PREFIX: &str = "coderank:result";
pub const STATUS_PREFIX: &str = "coderank:status";

/// Stream entry field holding the JSON-encoded [`ExecutionJob`].
pub const PAYLOAD_FIELD: &str = "payload";
/// Stream entry field duplicating the message key for affinity/debugging.
pub const KEY_FIELD: &str = "submissionId";

/// Results and status records expire after 24 hours.
const RECORD_TTL_SECS: u64 = 86_400;

/// Generate result key for a submission
pub fn result_key(submission_id: &str) -> String {
    format!("{}:{}", RESULT_PREFIX, submission_id)
}

/// Generate status key for a submission
pub fn status_key(submission_id: &str) -> String {
    format!("{}:{}", STATUS_PREFIX, submission_id)
}

fn serde_err(e: serde_json::Error) -> redis::RedisError {
    redis::RedisError::from((
        redis::ErrorKind::TypeError,
        "serialization error",
        e.to_string(),
    ))
}

/// Append a job to the shared job stream. Each entry is delivered to exactly
/// one member of the worker consumer group.
pub async fn enqueue_job(
    conn: &mut redis::aio::ConnectionManager,
    job: &ExecutionJob,
) -> RedisResult<String> {
    let payload = serde_json::to_string(job).map_err(serde_err)?;
    conn.xadd(
        JOB_STREAM,
        "*",
        &[
            (KEY_FIELD, job.submission_id.as_str()),
            (PAYLOAD_FIELD, payload.as_str()),
        ],
    )
    .await
}

/// Create the worker consumer group on the job stream, creating the stream if
/// it does not exist yet. Safe to call from every worker at boot: a group
/// that already exists is not an error.
pub async fn create_consumer_group(
    conn: &mut redis::aio::ConnectionManager,
    group: &str,
) -> RedisResult<()> {
    let created: RedisResult<()> = redis::cmd("XGROUP")
        .arg("CREATE")
        .arg(JOB_STREAM)
        .arg(group)
        .arg("$")
        .arg("MKSTREAM")
        .query_async(conn)
        .await;

    match created {
        Ok(()) => Ok(()),
        Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
        Err(e) => Err(e),
    }
}

/// Store an execution result, overwriting any previous attempt for the same
/// submission (a retried submission must overwrite, not duplicate).
pub async fn store_result(
    conn: &mut redis::aio::ConnectionManager,
    result: &ExecutionResult,
) -> RedisResult<()> {
    let payload = serde_json::to_string(result).map_err(serde_err)?;
    conn.set_ex(result_key(&result.submission_id), payload, RECORD_TTL_SECS)
        .await
}

/// Retrieve an execution result, if one has been persisted.
pub async fn get_result(
    conn: &mut redis::aio::ConnectionManager,
    submission_id: &str,
) -> RedisResult<Option<ExecutionResult>> {
    let payload: Option<String> = conn.get(result_key(submission_id)).await?;
    match payload {
        Some(data) => {
            let result = serde_json::from_str(&data).map_err(serde_err)?;
            Ok(Some(result))
        }
        None => Ok(None),
    }
}

/// Mark a submission RUNNING with its start timestamp.
pub async fn set_submission_running(
    conn: &mut redis::aio::ConnectionManager,
    submission_id: &str,
) -> RedisResult<()> {
    let key = status_key(submission_id);
    let now = Utc::now().to_rfc3339();
    let _: () = conn
        .hset_multiple(
            &key,
            &[
                ("status", SubmissionStatus::Running.to_string()),
                ("startedAt", now),
            ],
        )
        .await?;
    conn.expire(&key, RECORD_TTL_SECS as i64).await
}

/// Mark a submission terminal with its completion timestamp. The start
/// timestamp written by [`set_submission_running`] is preserved.
pub async fn set_submission_finished(
    conn: &mut redis::aio::ConnectionManager,
    submission_id: &str,
    success: bool,
) -> RedisResult<()> {
    let status = if success {
        SubmissionStatus::Completed
    } else {
        SubmissionStatus::Failed
    };
    let key = status_key(submission_id);
    let now = Utc::now().to_rfc3339();
    let _: () = conn
        .hset_multiple(
            &key,
            &[("status", status.to_string()), ("completedAt", now)],
        )
        .await?;
    conn.expire(&key, RECORD_TTL_SECS as i64).await
}

/// Read back the status record for a submission.
pub async fn get_submission_state(
    conn: &mut redis::aio::ConnectionManager,
    submission_id: &str,
) -> RedisResult<Option<SubmissionState>> {
    let fields: std::collections::HashMap<String, String> =
        conn.hgetall(status_key(submission_id)).await?;
    if fields.is_empty() {
        return Ok(None);
    }

    let status = match fields.get("status").map(String::as_str) {
        Some("running") => SubmissionStatus::Running,
        Some("completed") => SubmissionStatus::Completed,
        Some("failed") => SubmissionStatus::Failed,
        _ => SubmissionStatus::Pending,
    };
    let parse_ts = |field: &str| -> Option<DateTime<Utc>> {
        fields
            .get(field)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|ts| ts.with_timezone(&Utc))
    };

    Ok(Some(SubmissionState {
        status,
        started_at: parse_ts("startedAt"),
        completed_at: parse_ts("completedAt"),
    }))
}
