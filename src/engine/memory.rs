//! In-memory job repository.
//!
//! Holds job definitions, instances and executions behind a shared lock. It is
//! what `batchgate serve` runs against when no external engine is wired in, and
//! what the tests drive. With a step duration configured, launched executions
//! are advanced through their steps by a background task.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::{BatchStatus, ExitStatus, JobExecution, JobInstance, JobRepository, StepExecution};
use crate::error::{Error, Result};

const RUN_ID_KEY: &str = "run.id";

/// Number of progress ticks the simulated runner spreads a step over.
const SIMULATED_TICKS: u64 = 10;
const SIMULATED_ITEMS_PER_TICK: u64 = 10;

/// A job the engine knows how to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDefinition {
    pub name: String,
    #[serde(default = "default_true")]
    pub launchable: bool,
    #[serde(default)]
    pub incrementable: bool,
    #[serde(default = "default_true")]
    pub restartable: bool,
    /// Allow a new launch while another execution of this job is running.
    #[serde(default)]
    pub concurrent: bool,
    #[serde(default)]
    pub required_parameters: Vec<String>,
    #[serde(default)]
    pub steps: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl JobDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            launchable: true,
            incrementable: false,
            restartable: true,
            concurrent: false,
            required_parameters: Vec::new(),
            steps: Vec::new(),
        }
    }

    pub fn with_steps<I, S>(mut self, steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.steps = steps.into_iter().map(Into::into).collect();
        self
    }
}

struct InstanceRecord {
    instance: JobInstance,
    identifying: BTreeMap<String, String>,
}

#[derive(Default)]
struct State {
    definitions: BTreeMap<String, JobDefinition>,
    instances: BTreeMap<i64, InstanceRecord>,
    executions: BTreeMap<i64, JobExecution>,
    /// Executions currently driven by a simulated runner.
    attached: HashSet<i64>,
    next_instance_id: i64,
    next_execution_id: i64,
    next_step_id: i64,
}

impl State {
    fn execution(&self, id: i64) -> Result<&JobExecution> {
        self.executions.get(&id).ok_or(Error::NoSuchExecution(id))
    }

    fn execution_mut(&mut self, id: i64) -> Result<&mut JobExecution> {
        self.executions.get_mut(&id).ok_or(Error::NoSuchExecution(id))
    }

    fn job_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.definitions.keys().cloned().collect();
        for execution in self.executions.values() {
            if !self.definitions.contains_key(&execution.job_name) {
                names.push(execution.job_name.clone());
            }
        }
        names.sort();
        names.dedup();
        names
    }

    fn executions_newest_first(&self) -> impl Iterator<Item = &JobExecution> {
        self.executions.values().rev()
    }

    fn next_run_id(&self, job_name: &str) -> i64 {
        self.executions
            .values()
            .filter(|e| e.job_name == job_name)
            .filter_map(|e| e.parameters.get(RUN_ID_KEY)?.parse::<i64>().ok())
            .max()
            .unwrap_or(0)
            + 1
    }

    fn new_execution(&mut self, job_name: &str, instance_id: Option<i64>, parameters: BTreeMap<String, String>) -> JobExecution {
        self.next_execution_id += 1;
        let now = Utc::now();
        let mut execution = JobExecution::new(self.next_execution_id, job_name, instance_id, parameters);
        execution.status = BatchStatus::Started;
        execution.start_time = Some(now);
        execution.last_updated = Some(now);
        self.executions.insert(execution.id, execution.clone());
        execution
    }

    fn finalize(&mut self, id: i64, status: BatchStatus, exit_status: ExitStatus) -> Result<JobExecution> {
        let now = Utc::now();
        let execution = self.execution_mut(id)?;
        execution.status = status;
        execution.exit_status = Some(exit_status);
        execution.end_time = Some(now);
        execution.last_updated = Some(now);
        for step in execution.step_executions.iter_mut().filter(|s| s.status.is_running()) {
            step.status = status;
            step.end_time = Some(now);
            step.last_updated = Some(now);
        }
        let snapshot = execution.clone();
        self.attached.remove(&id);
        Ok(snapshot)
    }
}

fn window<T: Clone>(items: impl Iterator<Item = T>, offset: u64, limit: u64) -> Vec<T> {
    items.skip(offset as usize).take(limit as usize).collect()
}

/// Thread-safe in-memory job repository, cheap to clone.
#[derive(Clone, Default)]
pub struct MemoryJobRepository {
    state: Arc<RwLock<State>>,
    step_duration: Option<Duration>,
}

impl MemoryJobRepository {
    pub fn new(definitions: impl IntoIterator<Item = JobDefinition>) -> Self {
        let state = State {
            definitions: definitions
                .into_iter()
                .map(|definition| (definition.name.clone(), definition))
                .collect(),
            ..State::default()
        };
        Self {
            state: Arc::new(RwLock::new(state)),
            step_duration: None,
        }
    }

    /// Run launched executions in the background, spending `step_duration` on each step.
    pub fn with_simulation(mut self, step_duration: Duration) -> Self {
        self.step_duration = Some(step_duration);
        self
    }

    /// Begin a step within a running execution and return its id.
    pub async fn start_step(&self, execution_id: i64, step_name: &str) -> Result<i64> {
        let mut state = self.state.write().await;
        state.next_step_id += 1;
        let step_id = state.next_step_id;
        let now = Utc::now();

        let execution = state.execution_mut(execution_id)?;
        let mut step = StepExecution::new(step_id, step_name, execution_id);
        step.status = BatchStatus::Started;
        step.start_time = Some(now);
        step.last_updated = Some(now);
        execution.step_executions.push(step);
        execution.last_updated = Some(now);
        Ok(step_id)
    }

    /// Record `items` read and written by a step, as one committed chunk.
    pub async fn record_chunk(&self, execution_id: i64, step_id: i64, items: u64) -> Result<()> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let execution = state.execution_mut(execution_id)?;
        let step = execution
            .step_executions
            .iter_mut()
            .find(|s| s.id == step_id)
            .ok_or(Error::NoSuchStepExecution {
                job_execution_id: execution_id,
                step_execution_id: step_id,
            })?;
        step.read_count += items;
        step.write_count += items;
        step.commit_count += 1;
        step.execution_context
            .insert("read.count".to_string(), Value::from(step.read_count));
        step.last_updated = Some(now);
        execution.last_updated = Some(now);
        Ok(())
    }

    pub async fn finish_step(&self, execution_id: i64, step_id: i64, status: BatchStatus) -> Result<()> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let execution = state.execution_mut(execution_id)?;
        let step = execution
            .step_executions
            .iter_mut()
            .find(|s| s.id == step_id)
            .ok_or(Error::NoSuchStepExecution {
                job_execution_id: execution_id,
                step_execution_id: step_id,
            })?;
        step.status = status;
        step.end_time = Some(now);
        step.last_updated = Some(now);
        Ok(())
    }

    /// Move an execution to a terminal status.
    pub async fn finish_execution(&self, execution_id: i64, status: BatchStatus, exit_status: ExitStatus) -> Result<JobExecution> {
        self.state.write().await.finalize(execution_id, status, exit_status)
    }

    fn attach_runner(&self, execution: &JobExecution, steps: Vec<String>) {
        let Some(step_duration) = self.step_duration else {
            return;
        };
        let repo = self.clone();
        let execution_id = execution.id;

        tokio::spawn(async move {
            if let Err(e) = repo.simulate(execution_id, steps, step_duration).await {
                warn!(execution_id, error = %e, "Simulated execution aborted");
            }
        });
    }

    async fn simulate(&self, execution_id: i64, steps: Vec<String>, step_duration: Duration) -> Result<()> {
        let tick = step_duration / SIMULATED_TICKS as u32;
        info!(execution_id, steps = steps.len(), "Simulated execution started");

        for step_name in steps {
            let step_id = self.start_step(execution_id, &step_name).await?;
            for _ in 0..SIMULATED_TICKS {
                sleep(tick).await;
                if self.stop_requested(execution_id).await? {
                    self.finish_execution(execution_id, BatchStatus::Stopped, ExitStatus::stopped())
                        .await?;
                    info!(execution_id, step = %step_name, "Simulated execution stopped");
                    return Ok(());
                }
                self.record_chunk(execution_id, step_id, SIMULATED_ITEMS_PER_TICK)
                    .await?;
            }
            self.finish_step(execution_id, step_id, BatchStatus::Completed).await?;
            debug!(execution_id, step = %step_name, "Simulated step complete");
        }

        let status = self.finish_simulated(execution_id).await?;
        info!(execution_id, status = ?status, "Simulated execution finished");
        Ok(())
    }

    /// Finalize a simulated run that got through all its steps. A stop that
    /// arrived after the last tick still wins over completion.
    async fn finish_simulated(&self, execution_id: i64) -> Result<BatchStatus> {
        let mut state = self.state.write().await;
        let (status, exit_status) = if state.execution(execution_id)?.status == BatchStatus::Stopping {
            (BatchStatus::Stopped, ExitStatus::stopped())
        } else {
            (BatchStatus::Completed, ExitStatus::completed())
        };
        state.finalize(execution_id, status, exit_status)?;
        Ok(status)
    }

    async fn stop_requested(&self, execution_id: i64) -> Result<bool> {
        let state = self.state.read().await;
        Ok(state.execution(execution_id)?.status == BatchStatus::Stopping)
    }
}

#[async_trait]
impl JobRepository for MemoryJobRepository {
    async fn job_names(&self, offset: u64, limit: u64) -> Result<Vec<String>> {
        let state = self.state.read().await;
        Ok(window(state.job_names().into_iter(), offset, limit))
    }

    async fn count_jobs(&self) -> Result<u64> {
        Ok(self.state.read().await.job_names().len() as u64)
    }

    async fn has_job(&self, job_name: &str) -> Result<bool> {
        let state = self.state.read().await;
        Ok(state.definitions.contains_key(job_name)
            || state.executions.values().any(|e| e.job_name == job_name))
    }

    async fn is_launchable(&self, job_name: &str) -> Result<bool> {
        let state = self.state.read().await;
        Ok(state.definitions.get(job_name).is_some_and(|d| d.launchable))
    }

    async fn is_incrementable(&self, job_name: &str) -> Result<bool> {
        let state = self.state.read().await;
        Ok(state.definitions.get(job_name).is_some_and(|d| d.incrementable))
    }

    async fn job_instances(&self, job_name: &str, offset: u64, limit: u64) -> Result<Vec<JobInstance>> {
        let state = self.state.read().await;
        let instances = state
            .instances
            .values()
            .rev()
            .filter(|r| r.instance.job_name == job_name)
            .map(|r| r.instance.clone());
        Ok(window(instances, offset, limit))
    }

    async fn count_job_instances(&self, job_name: &str) -> Result<u64> {
        let state = self.state.read().await;
        Ok(state
            .instances
            .values()
            .filter(|r| r.instance.job_name == job_name)
            .count() as u64)
    }

    async fn job_instance(&self, instance_id: i64) -> Result<JobInstance> {
        let state = self.state.read().await;
        state
            .instances
            .get(&instance_id)
            .map(|r| r.instance.clone())
            .ok_or(Error::NoSuchJobInstance(instance_id))
    }

    async fn job_executions(&self, offset: u64, limit: u64) -> Result<Vec<JobExecution>> {
        let state = self.state.read().await;
        Ok(window(state.executions_newest_first().cloned(), offset, limit))
    }

    async fn count_job_executions(&self) -> Result<u64> {
        Ok(self.state.read().await.executions.len() as u64)
    }

    async fn job_executions_for_job(&self, job_name: &str, offset: u64, limit: u64) -> Result<Vec<JobExecution>> {
        let state = self.state.read().await;
        let executions = state
            .executions_newest_first()
            .filter(|e| e.job_name == job_name)
            .cloned();
        Ok(window(executions, offset, limit))
    }

    async fn count_job_executions_for_job(&self, job_name: &str) -> Result<u64> {
        let state = self.state.read().await;
        Ok(state
            .executions
            .values()
            .filter(|e| e.job_name == job_name)
            .count() as u64)
    }

    async fn job_executions_for_instance(&self, job_name: &str, instance_id: i64) -> Result<Vec<JobExecution>> {
        let state = self.state.read().await;
        match state.instances.get(&instance_id) {
            Some(record) if record.instance.job_name == job_name => Ok(state
                .executions_newest_first()
                .filter(|e| e.job_instance_id == Some(instance_id))
                .cloned()
                .collect()),
            _ => Err(Error::NoSuchJobInstance(instance_id)),
        }
    }

    async fn job_execution(&self, execution_id: i64) -> Result<JobExecution> {
        self.state.read().await.execution(execution_id).cloned()
    }

    async fn running_executions(&self) -> Result<Vec<JobExecution>> {
        let state = self.state.read().await;
        Ok(state
            .executions_newest_first()
            .filter(|e| e.status.is_running())
            .cloned()
            .collect())
    }

    async fn step_executions(&self, job_execution_id: i64) -> Result<Vec<StepExecution>> {
        let state = self.state.read().await;
        Ok(state.execution(job_execution_id)?.step_executions.clone())
    }

    async fn step_execution(&self, job_execution_id: i64, step_execution_id: i64) -> Result<StepExecution> {
        let state = self.state.read().await;
        state
            .executions
            .get(&job_execution_id)
            .and_then(|e| e.step_executions.iter().find(|s| s.id == step_execution_id))
            .cloned()
            .ok_or(Error::NoSuchStepExecution {
                job_execution_id,
                step_execution_id,
            })
    }

    async fn step_executions_for_step(
        &self,
        job_name: &str,
        step_name: &str,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<StepExecution>> {
        let state = self.state.read().await;
        let mut steps: Vec<StepExecution> = state
            .executions
            .values()
            .filter(|e| e.job_name == job_name)
            .flat_map(|e| e.step_executions.iter())
            .filter(|s| s.step_name == step_name)
            .cloned()
            .collect();
        steps.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(window(steps.into_iter(), offset, limit))
    }

    async fn launch(&self, job_name: &str, parameters: BTreeMap<String, String>) -> Result<JobExecution> {
        let (execution, steps) = {
            let mut state = self.state.write().await;
            let definition = state
                .definitions
                .get(job_name)
                .cloned()
                .ok_or_else(|| Error::NoSuchJob(job_name.to_string()))?;

            if !definition.launchable {
                return Err(Error::InvalidParameters(format!(
                    "job {} is not launchable",
                    job_name
                )));
            }

            let missing: Vec<&str> = definition
                .required_parameters
                .iter()
                .filter(|p| !parameters.contains_key(p.as_str()))
                .map(String::as_str)
                .collect();
            if !missing.is_empty() {
                return Err(Error::InvalidParameters(format!(
                    "missing required parameters: {}",
                    missing.join(", ")
                )));
            }

            if !definition.concurrent
                && state
                    .executions
                    .values()
                    .any(|e| e.job_name == job_name && e.status.is_running())
            {
                return Err(Error::JobAlreadyRunning(job_name.to_string()));
            }

            let mut parameters = parameters;
            if definition.incrementable {
                let run_id = state.next_run_id(job_name);
                parameters.insert(RUN_ID_KEY.to_string(), run_id.to_string());
            }

            let existing = state
                .instances
                .values()
                .find(|r| r.instance.job_name == job_name && r.identifying == parameters)
                .map(|r| r.instance.id);

            let instance_id = match existing {
                Some(id) => {
                    let previous = state
                        .executions
                        .values()
                        .filter(|e| e.job_instance_id == Some(id));
                    let mut complete = false;
                    for e in previous {
                        if e.status.is_running() {
                            return Err(Error::JobAlreadyRunning(job_name.to_string()));
                        }
                        complete |= e.status == BatchStatus::Completed;
                    }
                    if complete {
                        return Err(Error::JobInstanceAlreadyComplete(job_name.to_string()));
                    }
                    id
                }
                None => {
                    state.next_instance_id += 1;
                    let id = state.next_instance_id;
                    state.instances.insert(
                        id,
                        InstanceRecord {
                            instance: JobInstance {
                                id,
                                job_name: job_name.to_string(),
                            },
                            identifying: parameters.clone(),
                        },
                    );
                    id
                }
            };

            let execution = state.new_execution(job_name, Some(instance_id), parameters);
            if self.step_duration.is_some() {
                state.attached.insert(execution.id);
            }
            (execution, definition.steps)
        };

        info!(job = %job_name, execution_id = execution.id, "Job launched");
        self.attach_runner(&execution, steps);
        Ok(execution)
    }

    async fn stop(&self, execution_id: i64) -> Result<JobExecution> {
        let mut state = self.state.write().await;
        let attached = state.attached.contains(&execution_id);
        let execution = state.execution_mut(execution_id)?;

        if !execution.status.is_running() {
            debug!(execution_id, status = ?execution.status, "Stop requested for finished execution");
            return Ok(execution.clone());
        }

        execution.status = BatchStatus::Stopping;
        execution.last_updated = Some(Utc::now());
        if attached {
            return Ok(execution.clone());
        }
        // Nothing is driving this execution, so the stop takes effect immediately.
        state.finalize(execution_id, BatchStatus::Stopped, ExitStatus::stopped())
    }

    async fn restart(&self, execution_id: i64) -> Result<JobExecution> {
        let (execution, steps) = {
            let mut state = self.state.write().await;
            let previous = state.execution(execution_id)?.clone();

            let instance_id = previous
                .job_instance_id
                .ok_or(Error::JobNotRestartable(execution_id))?;
            let definition = state
                .definitions
                .get(&previous.job_name)
                .cloned()
                .ok_or_else(|| Error::NoSuchJob(previous.job_name.clone()))?;

            if !definition.restartable {
                return Err(Error::JobNotRestartable(execution_id));
            }
            match previous.status {
                BatchStatus::Stopped | BatchStatus::Failed => {}
                status if status.is_running() => {
                    return Err(Error::JobAlreadyRunning(previous.job_name));
                }
                _ => return Err(Error::JobNotRestartable(execution_id)),
            }
            let mut complete = false;
            for e in state
                .executions
                .values()
                .filter(|e| e.job_instance_id == Some(instance_id))
            {
                if e.status.is_running() {
                    return Err(Error::JobAlreadyRunning(previous.job_name));
                }
                complete |= e.status == BatchStatus::Completed;
            }
            // A later run of this instance may already have completed it
            if complete {
                return Err(Error::JobInstanceAlreadyComplete(previous.job_name));
            }

            let execution = state.new_execution(&previous.job_name, Some(instance_id), previous.parameters);
            if self.step_duration.is_some() {
                state.attached.insert(execution.id);
            }
            (execution, definition.steps)
        };

        info!(execution_id, restarted_as = execution.id, "Job restarted");
        self.attach_runner(&execution, steps);
        Ok(execution)
    }
}
