//! Result reporting seam between the consumer and Redis.
//!
//! The consumer drives state transitions through this trait so the dispatch
//! path is testable without a live Redis. Reporting failures never kill a
//! job; callers log and move on.

use crate::error::ReportError;
use coderank_common::redis as store;
use coderank_common::types::ExecutionResult;
use redis::aio::ConnectionManager;

#[async_trait::async_trait]
pub trait ResultReporter: Send + Sync {
    /// Record that a submission has started executing.
    async fn mark_running(&self, submission_id: &str) -> Result<(), ReportError>;

    /// Persist the execution result, overwriting any previous attempt.
    async fn save_result(&self, result: &ExecutionResult) -> Result<(), ReportError>;

    /// Record the terminal status for a submission.
    async fn mark_completed(&self, submission_id: &str, success: bool) -> Result<(), ReportError>;
}

pub struct RedisReporter {
    conn: ConnectionManager,
}

impl RedisReporter {
    pub fn new(conn: ConnectionManager) -> Self {
        RedisReporter { conn }
    }
}

#[async_trait::async_trait]
impl ResultReporter for RedisReporter {
    async fn mark_running(&self, submission_id: &str) -> Result<(), ReportError> {
        let mut conn = self.conn.clone();
        store::set_submission_running(&mut conn, submission_id).await?;
        Ok(())
    }

    async fn save_result(&self, result: &ExecutionResult) -> Result<(), ReportError> {
        let mut conn = self.conn.clone();
        store::store_result(&mut conn, result).await?;
        Ok(())
    }

    async fn mark_completed(&self, submission_id: &str, success: bool) -> Result<(), ReportError> {
        let mut conn = self.conn.clone();
        store::set_submission_finished(&mut conn, submission_id, success).await?;
        Ok(())
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records every reporter call in order, for asserting the
    /// running -> result -> terminal sequence.
    #[derive(Default)]
    pub struct RecordingReporter {
        pub calls: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl ResultReporter for RecordingReporter {
        async fn mark_running(&self, submission_id: &str) -> Result<(), ReportError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("running:{}", submission_id));
            Ok(())
        }

        async fn save_result(&self, result: &ExecutionResult) -> Result<(), ReportError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("result:{}", result.submission_id));
            Ok(())
        }

        async fn mark_completed(
            &self,
            submission_id: &str,
            success: bool,
        ) -> Result<(), ReportError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("completed:{}:{}", submission_id, success));
            Ok(())
        }
    }
}
