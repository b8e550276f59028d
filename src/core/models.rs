use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::engine::{BatchStatus, JobExecution, JobInstance, StepExecution};

/// A staged file as reported to API clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub path: String,
    pub short_path: String,
    pub timestamp: String,
    pub local: bool,
    pub delete_count: usize,
    /// Set on files produced by an upload; tells repeated uploads of one path apart.
    #[serde(skip)]
    pub upload_id: Option<Uuid>,
}

impl FileInfo {
    pub fn new(path: impl Into<String>, timestamp: impl Into<String>, local: bool, root: &str) -> Self {
        let path = path.into();
        let short_path = short_path(&path, root);
        Self {
            path,
            short_path,
            timestamp: timestamp.into(),
            local,
            delete_count: 0,
            upload_id: None,
        }
    }

    /// The result of a pattern delete: echoes the pattern and how many files went away.
    pub fn deleted(pattern: impl Into<String>, delete_count: usize) -> Self {
        let pattern = pattern.into();
        Self {
            short_path: pattern.clone(),
            path: pattern,
            timestamp: String::new(),
            local: true,
            delete_count,
            upload_id: None,
        }
    }
}

fn short_path(path: &str, root: &str) -> String {
    let root = root.trim_matches('/');
    if root.is_empty() {
        return path.to_string();
    }
    match path.strip_prefix(root) {
        Some(rest) if rest.starts_with('/') => rest.trim_start_matches('/').to_string(),
        _ => path.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitStatusInfo {
    pub code: String,
    pub description: String,
    pub running: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobExecutionInfo {
    pub id: i64,
    pub job_name: String,
    pub job_instance_id: Option<i64>,
    pub parameters: BTreeMap<String, String>,
    pub status: BatchStatus,
    pub running: bool,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_status: Option<ExitStatusInfo>,
    pub step_execution_count: usize,
    pub duration: Option<String>,
}

impl JobExecutionInfo {
    pub fn from_execution(execution: &JobExecution) -> Self {
        let running = execution.status.is_running();
        Self {
            id: execution.id,
            job_name: execution.job_name.clone(),
            job_instance_id: execution.job_instance_id,
            parameters: execution.parameters.clone(),
            status: execution.status,
            running,
            start_time: execution.start_time,
            end_time: execution.end_time,
            last_updated: execution.last_updated,
            exit_status: execution.exit_status.as_ref().map(|exit| ExitStatusInfo {
                code: exit.exit_code.clone(),
                description: exit.exit_description.clone(),
                running,
            }),
            step_execution_count: execution.step_executions.len(),
            duration: duration_between(execution.start_time, execution.end_time),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub name: String,
    pub launchable: bool,
    pub incrementable: bool,
    pub execution_count: u64,
    pub last_execution: Option<JobExecutionInfo>,
}

/// A job summary plus one window of its instances.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDetail {
    #[serde(flatten)]
    pub summary: JobSummary,
    pub job_instances: Vec<JobInstanceInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobInstanceInfo {
    pub id: i64,
    pub job_name: String,
    pub executions: Vec<JobExecutionInfo>,
}

impl JobInstanceInfo {
    pub fn new(instance: &JobInstance, executions: &[JobExecution]) -> Self {
        Self {
            id: instance.id,
            job_name: instance.job_name.clone(),
            executions: executions.iter().map(JobExecutionInfo::from_execution).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepExecutionInfo {
    pub id: i64,
    pub name: String,
    pub job_execution_id: i64,
    pub status: BatchStatus,
    pub read_count: u64,
    pub write_count: u64,
    pub commit_count: u64,
    pub execution_context: Map<String, Value>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
    pub duration: Option<String>,
}

impl StepExecutionInfo {
    pub fn from_step(step: &StepExecution) -> Self {
        Self {
            id: step.id,
            name: step.step_name.clone(),
            job_execution_id: step.job_execution_id,
            status: step.status,
            read_count: step.read_count,
            write_count: step.write_count,
            commit_count: step.commit_count,
            execution_context: step.execution_context.clone(),
            start_time: step.start_time,
            end_time: step.end_time,
            last_updated: step.last_updated,
            duration: duration_between(step.start_time, step.end_time),
        }
    }
}

/// Elapsed time as `HH:MM:SS`, measured up to now while `end` is unset.
pub fn duration_between(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Option<String> {
    let start = start?;
    let end = end.unwrap_or_else(Utc::now);
    let millis = (end - start).num_milliseconds().max(0) as u64;
    Some(format_duration_ms(millis))
}

pub fn format_duration_ms(millis: u64) -> String {
    let secs = millis / 1000;
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}
