//! The job repository/engine seam.
//!
//! The gateway never executes jobs itself. Everything it knows about jobs,
//! instances, executions and steps comes through [`JobRepository`], and every
//! control request is forwarded to it.

mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;

pub use memory::{JobDefinition, MemoryJobRepository};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Starting,
    Started,
    Stopping,
    Stopped,
    Completed,
    Failed,
    Abandoned,
    Unknown,
}

impl BatchStatus {
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            BatchStatus::Starting | BatchStatus::Started | BatchStatus::Stopping
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitStatus {
    pub exit_code: String,
    pub exit_description: String,
}

impl ExitStatus {
    fn with_code(code: &str, description: impl Into<String>) -> Self {
        Self {
            exit_code: code.to_string(),
            exit_description: description.into(),
        }
    }

    pub fn completed() -> Self {
        Self::with_code("COMPLETED", "")
    }

    pub fn stopped() -> Self {
        Self::with_code("STOPPED", "")
    }

    pub fn failed(description: impl Into<String>) -> Self {
        Self::with_code("FAILED", description)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInstance {
    pub id: i64,
    pub job_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepExecution {
    pub id: i64,
    pub step_name: String,
    pub job_execution_id: i64,
    pub status: BatchStatus,
    pub read_count: u64,
    pub write_count: u64,
    pub commit_count: u64,
    pub execution_context: Map<String, Value>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl StepExecution {
    pub fn new(id: i64, step_name: impl Into<String>, job_execution_id: i64) -> Self {
        Self {
            id,
            step_name: step_name.into(),
            job_execution_id,
            status: BatchStatus::Starting,
            read_count: 0,
            write_count: 0,
            commit_count: 0,
            execution_context: Map::new(),
            start_time: None,
            end_time: None,
            last_updated: None,
        }
    }

    /// Wall-clock duration, only known once the step has ended.
    pub fn duration_ms(&self) -> Option<u64> {
        let (start, end) = (self.start_time?, self.end_time?);
        Some((end - start).num_milliseconds().max(0) as u64)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobExecution {
    pub id: i64,
    pub job_name: String,
    /// Absent for executions the engine does not track per instance.
    pub job_instance_id: Option<i64>,
    pub parameters: BTreeMap<String, String>,
    pub status: BatchStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
    pub exit_status: Option<ExitStatus>,
    pub step_executions: Vec<StepExecution>,
}

impl JobExecution {
    pub fn new(
        id: i64,
        job_name: impl Into<String>,
        job_instance_id: Option<i64>,
        parameters: BTreeMap<String, String>,
    ) -> Self {
        Self {
            id,
            job_name: job_name.into(),
            job_instance_id,
            parameters,
            status: BatchStatus::Starting,
            start_time: None,
            end_time: None,
            last_updated: None,
            exit_status: None,
            step_executions: Vec::new(),
        }
    }
}

/// Read and control access to the batch engine.
///
/// Listing methods return newest entries first and take an `offset`/`limit`
/// window; counts are independent calls and may observe a different state.
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn job_names(&self, offset: u64, limit: u64) -> Result<Vec<String>>;
    async fn count_jobs(&self) -> Result<u64>;
    async fn has_job(&self, job_name: &str) -> Result<bool>;
    async fn is_launchable(&self, job_name: &str) -> Result<bool>;
    async fn is_incrementable(&self, job_name: &str) -> Result<bool>;

    async fn job_instances(&self, job_name: &str, offset: u64, limit: u64) -> Result<Vec<JobInstance>>;
    async fn count_job_instances(&self, job_name: &str) -> Result<u64>;
    async fn job_instance(&self, instance_id: i64) -> Result<JobInstance>;

    async fn job_executions(&self, offset: u64, limit: u64) -> Result<Vec<JobExecution>>;
    async fn count_job_executions(&self) -> Result<u64>;
    async fn job_executions_for_job(&self, job_name: &str, offset: u64, limit: u64) -> Result<Vec<JobExecution>>;
    async fn count_job_executions_for_job(&self, job_name: &str) -> Result<u64>;
    async fn job_executions_for_instance(&self, job_name: &str, instance_id: i64) -> Result<Vec<JobExecution>>;
    async fn job_execution(&self, execution_id: i64) -> Result<JobExecution>;
    async fn running_executions(&self) -> Result<Vec<JobExecution>>;

    async fn step_executions(&self, job_execution_id: i64) -> Result<Vec<StepExecution>>;
    async fn step_execution(&self, job_execution_id: i64, step_execution_id: i64) -> Result<StepExecution>;
    async fn step_executions_for_step(
        &self,
        job_name: &str,
        step_name: &str,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<StepExecution>>;

    async fn launch(&self, job_name: &str, parameters: BTreeMap<String, String>) -> Result<JobExecution>;
    /// Ask the engine to stop; the returned execution reflects the engine's view right after the request.
    async fn stop(&self, execution_id: i64) -> Result<JobExecution>;
    async fn restart(&self, execution_id: i64) -> Result<JobExecution>;
}
