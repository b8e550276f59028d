//! Progress estimation for step executions.
//!
//! A step has no notion of its own total work, so progress is estimated
//! against earlier runs of the same step: how many items they read and how
//! long they took. Nothing here is cached; every estimate is derived from the
//! current step and the history passed in.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::models::{StepExecutionInfo, format_duration_ms};
use crate::engine::StepExecution;

/// Running estimates never claim completion.
const MAX_RUNNING_ESTIMATE: f64 = 0.99;

/// Statistics over finished executions of one step.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepExecutionHistory {
    pub step_name: String,
    pub count: u64,
    pub mean_duration_ms: f64,
    pub min_duration_ms: u64,
    pub max_duration_ms: u64,
    pub mean_read_count: f64,
    pub min_read_count: u64,
    pub max_read_count: u64,
}

impl StepExecutionHistory {
    pub fn new(step_name: impl Into<String>) -> Self {
        Self {
            step_name: step_name.into(),
            ..Self::default()
        }
    }

    /// Build statistics from `steps`, ignoring any that have not finished.
    pub fn from_steps<'a>(step_name: impl Into<String>, steps: impl IntoIterator<Item = &'a StepExecution>) -> Self {
        let mut history = Self::new(step_name);
        for step in steps {
            history.append(step);
        }
        history
    }

    pub fn append(&mut self, step: &StepExecution) {
        if step.status.is_running() {
            return;
        }
        let Some(duration) = step.duration_ms() else {
            return;
        };

        if self.count == 0 {
            self.min_duration_ms = duration;
            self.max_duration_ms = duration;
            self.min_read_count = step.read_count;
            self.max_read_count = step.read_count;
        } else {
            self.min_duration_ms = self.min_duration_ms.min(duration);
            self.max_duration_ms = self.max_duration_ms.max(duration);
            self.min_read_count = self.min_read_count.min(step.read_count);
            self.max_read_count = self.max_read_count.max(step.read_count);
        }

        let n = self.count as f64;
        self.mean_duration_ms = (self.mean_duration_ms * n + duration as f64) / (n + 1.0);
        self.mean_read_count = (self.mean_read_count * n + step.read_count as f64) / (n + 1.0);
        self.count += 1;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepExecutionProgressInfo {
    pub current: StepExecutionInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent_complete: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_duration: Option<String>,
    pub finished: bool,
    pub message: String,
    pub history: StepExecutionHistory,
}

impl StepExecutionProgressInfo {
    pub fn new(step: &StepExecution, history: StepExecutionHistory, now: DateTime<Utc>) -> Self {
        let finished = !step.status.is_running();
        let (percent_complete, message) = estimate(step, &history, finished, now);
        let estimated_duration = (history.count > 0).then(|| format_duration_ms(history.mean_duration_ms.round() as u64));

        Self {
            current: StepExecutionInfo::from_step(step),
            percent_complete,
            estimated_duration,
            finished,
            message,
            history,
        }
    }
}

fn estimate(
    step: &StepExecution,
    history: &StepExecutionHistory,
    finished: bool,
    now: DateTime<Utc>,
) -> (Option<f64>, String) {
    if history.count == 0 {
        return (None, format!("No history for step {}; progress cannot be estimated", step.step_name));
    }
    if finished {
        return (Some(1.0), format!("Step has finished with status {:?}", step.status));
    }

    if history.mean_read_count > 0.0 {
        let fraction = step.read_count as f64 / history.mean_read_count;
        return (
            Some(fraction.min(MAX_RUNNING_ESTIMATE)),
            format!(
                "Estimated from {} items read against a mean of {:.0} over {} executions",
                step.read_count, history.mean_read_count, history.count
            ),
        );
    }

    if history.mean_duration_ms > 0.0 {
        let elapsed = step
            .start_time
            .map(|start| (now - start).num_milliseconds().max(0))
            .unwrap_or(0);
        let fraction = elapsed as f64 / history.mean_duration_ms;
        return (
            Some(fraction.min(MAX_RUNNING_ESTIMATE)),
            format!(
                "Estimated from elapsed time against a mean duration of {:.0} ms over {} executions",
                history.mean_duration_ms, history.count
            ),
        );
    }

    (None, "History has no read counts or durations to estimate from".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::BatchStatus;
    use chrono::{Duration, TimeZone};

    fn finished_step(id: i64, read_count: u64, seconds: i64) -> StepExecution {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut step = StepExecution::new(id, "step1", id);
        step.status = BatchStatus::Completed;
        step.read_count = read_count;
        step.start_time = Some(start);
        step.end_time = Some(start + Duration::seconds(seconds));
        step
    }

    fn running_step(read_count: u64, started: DateTime<Utc>) -> StepExecution {
        let mut step = StepExecution::new(99, "step1", 99);
        step.status = BatchStatus::Started;
        step.read_count = read_count;
        step.start_time = Some(started);
        step
    }

    #[test]
    fn history_ignores_unfinished_steps() {
        let now = Utc::now();
        let steps = [finished_step(1, 100, 10), finished_step(2, 300, 30), running_step(5, now)];
        let history = StepExecutionHistory::from_steps("step1", &steps);

        assert_eq!(history.count, 2);
        assert_eq!(history.mean_read_count, 200.0);
        assert_eq!(history.mean_duration_ms, 20_000.0);
        assert_eq!(history.min_duration_ms, 10_000);
        assert_eq!(history.max_read_count, 300);
    }

    #[test]
    fn no_history_means_no_estimate() {
        let now = Utc::now();
        let progress = StepExecutionProgressInfo::new(&running_step(10, now), StepExecutionHistory::new("step1"), now);

        assert!(progress.percent_complete.is_none());
        assert!(progress.estimated_duration.is_none());
        assert!(!progress.finished);

        let json = serde_json::to_value(&progress).unwrap();
        assert!(json.get("percentComplete").is_none());
        assert!(json.get("estimatedDuration").is_none());
    }

    #[test]
    fn running_estimate_uses_read_counts_and_is_capped() {
        let now = Utc::now();
        let history = StepExecutionHistory::from_steps("step1", &[finished_step(1, 200, 60)]);

        let halfway = StepExecutionProgressInfo::new(&running_step(100, now), history.clone(), now);
        assert_eq!(halfway.percent_complete, Some(0.5));
        assert_eq!(halfway.estimated_duration.as_deref(), Some("00:01:00"));

        let overrun = StepExecutionProgressInfo::new(&running_step(500, now), history, now);
        assert_eq!(overrun.percent_complete, Some(MAX_RUNNING_ESTIMATE));
    }

    #[test]
    fn running_estimate_falls_back_to_elapsed_time() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let history = StepExecutionHistory::from_steps("step1", &[finished_step(1, 0, 40)]);

        let progress = StepExecutionProgressInfo::new(&running_step(0, now - Duration::seconds(10)), history, now);
        assert_eq!(progress.percent_complete, Some(0.25));
    }

    #[test]
    fn finished_step_is_complete() {
        let history = StepExecutionHistory::from_steps("step1", &[finished_step(1, 200, 60)]);
        let progress = StepExecutionProgressInfo::new(&finished_step(2, 50, 5), history, Utc::now());

        assert!(progress.finished);
        assert_eq!(progress.percent_complete, Some(1.0));
    }
}
