//! Read-side access to jobs, instances, executions and steps.

use std::sync::Arc;

use chrono::Utc;
use tracing::{Span, debug};

use super::models::{JobDetail, JobExecutionInfo, JobInstanceInfo, JobSummary, StepExecutionInfo};
use super::progress::{StepExecutionHistory, StepExecutionProgressInfo};
use crate::engine::JobRepository;
use crate::error::{Error, Result};

/// How many earlier executions of a step feed a progress estimate.
pub const PROGRESS_HISTORY_LIMIT: u64 = 1000;

pub struct JobQueryService {
    repository: Arc<dyn JobRepository>,
    span: Span,
}

impl JobQueryService {
    pub fn new(repository: Arc<dyn JobRepository>, span: Span) -> Self {
        Self { repository, span }
    }

    pub async fn has_job(&self, job_name: &str) -> Result<bool> {
        self.repository.has_job(job_name).await
    }

    async fn summary(&self, job_name: &str) -> Result<JobSummary> {
        let last_execution = self
            .repository
            .job_executions_for_job(job_name, 0, 1)
            .await?
            .first()
            .map(JobExecutionInfo::from_execution);

        Ok(JobSummary {
            name: job_name.to_string(),
            launchable: self.repository.is_launchable(job_name).await?,
            incrementable: self.repository.is_incrementable(job_name).await?,
            execution_count: self.repository.count_job_executions_for_job(job_name).await?,
            last_execution,
        })
    }

    pub async fn list_jobs(&self, offset: u64, limit: u64) -> Result<Vec<JobSummary>> {
        let names = self.repository.job_names(offset, limit).await?;
        let mut jobs = Vec::with_capacity(names.len());
        for name in &names {
            jobs.push(self.summary(name).await?);
        }
        Ok(jobs)
    }

    pub async fn count_jobs(&self) -> Result<u64> {
        self.repository.count_jobs().await
    }

    /// A job summary with one window of its instances, newest first.
    pub async fn job_detail(&self, job_name: &str, start_instance: u64, page_size: u64) -> Result<JobDetail> {
        if !self.repository.has_job(job_name).await? {
            return Err(Error::NoSuchJob(job_name.to_string()));
        }
        Ok(JobDetail {
            summary: self.summary(job_name).await?,
            job_instances: self.list_instances(job_name, start_instance, page_size).await?,
        })
    }

    pub async fn list_instances(&self, job_name: &str, offset: u64, limit: u64) -> Result<Vec<JobInstanceInfo>> {
        let instances = self.repository.job_instances(job_name, offset, limit).await?;
        let mut infos = Vec::with_capacity(instances.len());
        for instance in &instances {
            let executions = self
                .repository
                .job_executions_for_instance(&instance.job_name, instance.id)
                .await?;
            infos.push(JobInstanceInfo::new(instance, &executions));
        }
        Ok(infos)
    }

    pub async fn count_instances(&self, job_name: &str) -> Result<u64> {
        self.repository.count_job_instances(job_name).await
    }

    pub async fn get_instance(&self, instance_id: i64) -> Result<JobInstanceInfo> {
        let instance = self.repository.job_instance(instance_id).await?;
        let executions = self
            .repository
            .job_executions_for_instance(&instance.job_name, instance.id)
            .await?;
        Ok(JobInstanceInfo::new(&instance, &executions))
    }

    pub async fn list_executions(&self, offset: u64, limit: u64) -> Result<Vec<JobExecutionInfo>> {
        let executions = self.repository.job_executions(offset, limit).await?;
        Ok(executions.iter().map(JobExecutionInfo::from_execution).collect())
    }

    pub async fn count_executions(&self) -> Result<u64> {
        self.repository.count_job_executions().await
    }

    /// Executions of one job. An unknown job simply has none.
    pub async fn list_executions_for_job(&self, job_name: &str, offset: u64, limit: u64) -> Result<Vec<JobExecutionInfo>> {
        let executions = self.repository.job_executions_for_job(job_name, offset, limit).await?;
        Ok(executions.iter().map(JobExecutionInfo::from_execution).collect())
    }

    pub async fn count_executions_for_job(&self, job_name: &str) -> Result<u64> {
        self.repository.count_job_executions_for_job(job_name).await
    }

    /// Executions of one instance. Without a job name the instance's own job
    /// is used.
    pub async fn list_executions_for_instance(
        &self,
        job_name: Option<&str>,
        instance_id: i64,
    ) -> Result<Vec<JobExecutionInfo>> {
        let job_name = match job_name {
            Some(name) => name.to_string(),
            None => self.repository.job_instance(instance_id).await?.job_name,
        };
        let executions = self
            .repository
            .job_executions_for_instance(&job_name, instance_id)
            .await?;
        Ok(executions.iter().map(JobExecutionInfo::from_execution).collect())
    }

    pub async fn get_execution(&self, execution_id: i64) -> Result<JobExecutionInfo> {
        let execution = self.repository.job_execution(execution_id).await?;
        Ok(JobExecutionInfo::from_execution(&execution))
    }

    pub async fn list_step_executions(&self, job_execution_id: i64) -> Result<Vec<StepExecutionInfo>> {
        let steps = self.repository.step_executions(job_execution_id).await?;
        Ok(steps.iter().map(StepExecutionInfo::from_step).collect())
    }

    pub async fn get_step_execution(&self, job_execution_id: i64, step_execution_id: i64) -> Result<StepExecutionInfo> {
        let step = self
            .repository
            .step_execution(job_execution_id, step_execution_id)
            .await?;
        Ok(StepExecutionInfo::from_step(&step))
    }

    /// Estimate progress of a step against earlier executions of the same
    /// step in the same job.
    pub async fn get_step_progress(
        &self,
        job_execution_id: i64,
        step_execution_id: i64,
    ) -> Result<StepExecutionProgressInfo> {
        let step = self
            .repository
            .step_execution(job_execution_id, step_execution_id)
            .await?;
        let execution = self.repository.job_execution(job_execution_id).await?;

        let previous = self
            .repository
            .step_executions_for_step(&execution.job_name, &step.step_name, 0, PROGRESS_HISTORY_LIMIT)
            .await?;
        let history = StepExecutionHistory::from_steps(
            step.step_name.clone(),
            previous.iter().filter(|s| s.id != step.id),
        );

        debug!(
            parent: &self.span,
            job_execution_id,
            step_execution_id,
            history = history.count,
            "Estimating step progress"
        );
        Ok(StepExecutionProgressInfo::new(&step, history, Utc::now()))
    }
}
