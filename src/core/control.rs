//! Launching, stopping and restarting job executions.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{Instrument, Span, info, info_span, warn};

use super::jobs::JobQueryService;
use super::models::JobExecutionInfo;
use crate::engine::JobRepository;
use crate::error::{Error, Result};

pub struct JobControlService {
    repository: Arc<dyn JobRepository>,
    queries: Arc<JobQueryService>,
    span: Span,
}

impl JobControlService {
    pub fn new(repository: Arc<dyn JobRepository>, queries: Arc<JobQueryService>, span: Span) -> Self {
        Self {
            repository,
            queries,
            span,
        }
    }

    /// Launch a new execution of `job_name`. The returned execution is
    /// running and has no exit status yet.
    pub async fn launch(&self, job_name: &str, parameters: BTreeMap<String, String>) -> Result<JobExecutionInfo> {
        let span = info_span!(parent: &self.span, "launch", job = %job_name);
        async {
            if !self.queries.has_job(job_name).await? {
                return Err(Error::NoSuchJob(job_name.to_string()));
            }
            let execution = self.repository.launch(job_name, parameters).await?;
            info!(execution_id = execution.id, "Launched job execution");
            Ok(JobExecutionInfo::from_execution(&execution))
        }
        .instrument(span)
        .await
    }

    /// Request a graceful stop. Stopping an execution that already finished
    /// returns it unchanged.
    pub async fn stop(&self, execution_id: i64) -> Result<JobExecutionInfo> {
        self.queries.get_execution(execution_id).await?;
        let execution = self.repository.stop(execution_id).await?;
        info!(parent: &self.span, execution_id, status = ?execution.status, "Stop requested");
        Ok(JobExecutionInfo::from_execution(&execution))
    }

    /// Signal every running execution and return how many were signalled.
    pub async fn stop_all(&self) -> Result<usize> {
        let span = info_span!(parent: &self.span, "stop_all");
        async {
            let running = self.repository.running_executions().await?;
            let mut stopped = 0;
            for execution in &running {
                match self.repository.stop(execution.id).await {
                    Ok(_) => stopped += 1,
                    Err(e) => warn!(execution_id = execution.id, error = %e, "Failed to stop execution"),
                }
            }
            info!(running = running.len(), stopped, "Stop all complete");
            Ok(stopped)
        }
        .instrument(span)
        .await
    }

    /// Start a new execution of the same instance as a stopped or failed one.
    pub async fn restart(&self, execution_id: i64) -> Result<JobExecutionInfo> {
        self.queries.get_execution(execution_id).await?;
        let execution = self.repository.restart(execution_id).await?;
        info!(parent: &self.span, execution_id, restarted_as = execution.id, "Restarted job execution");
        Ok(JobExecutionInfo::from_execution(&execution))
    }
}

/// Parse `key=value` pairs separated by commas, e.g. `input=a.csv,date=2024-01-01`.
pub fn parse_job_parameters(raw: &str) -> Result<BTreeMap<String, String>> {
    let mut parameters = BTreeMap::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let Some((key, value)) = pair.split_once('=') else {
            return Err(Error::InvalidParameters(format!("expected key=value, got {}", pair)));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(Error::InvalidParameters(format!("missing key in {}", pair)));
        }
        parameters.insert(key.to_string(), value.trim().to_string());
    }
    Ok(parameters)
}
