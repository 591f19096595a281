use std::fmt;

use serde::Serialize;
use time::OffsetDateTime;

/// Index of a job inside its [`Run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct JobId(pub(crate) usize);

impl JobId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Index of a step inside its [`Run`]. Steps of every job share one arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct StepId(pub(crate) usize);

impl StepId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Status shared by runs and jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    Success,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Success | RunStatus::Failed)
    }

    /// Human readable label used by presentation layers.
    pub fn label(self) -> &'static str {
        match self {
            RunStatus::Queued => "Queued",
            RunStatus::InProgress => "Running",
            RunStatus::Success => "Succeeded",
            RunStatus::Failed => "Failed",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::InProgress => "in_progress",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    InProgress,
    Success,
    Failed,
    Skipped,
}

impl StepStatus {
    /// Maps the `<status>` token of a log line to a terminal step status.
    ///
    /// Matching is case-insensitive; `ok` is accepted for `success` and
    /// `error` for `failed`. Anything else (including `in_progress`) yields
    /// `None`.
    pub fn from_marker(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "success" | "ok" => Some(StepStatus::Success),
            "failed" | "error" => Some(StepStatus::Failed),
            "skipped" => Some(StepStatus::Skipped),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, StepStatus::InProgress)
    }

    pub fn label(self) -> &'static str {
        match self {
            StepStatus::InProgress => "In progress",
            StepStatus::Success => "Success",
            StepStatus::Failed => "Failed",
            StepStatus::Skipped => "Skipped",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::InProgress => "in_progress",
            StepStatus::Success => "success",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    /// 1-based position within the owning step.
    pub line_no: u32,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Step {
    pub id: StepId,
    pub job: JobId,
    pub parent: Option<StepId>,
    pub name: String,
    pub status: StepStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub ended_at: Option<OffsetDateTime>,
    pub duration_ms: Option<u64>,
    pub logs: Vec<LogEntry>,
    pub children: Vec<StepId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Job {
    pub id: JobId,
    pub name: String,
    pub status: RunStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub ended_at: Option<OffsetDateTime>,
    pub duration_ms: Option<u64>,
    /// Top-level steps only; sub-steps hang off their parent.
    pub steps: Vec<StepId>,
}

/// Root of the execution tree.
///
/// Jobs and steps live in flat arenas indexed by [`JobId`] / [`StepId`];
/// the tree shape is carried by `Job::steps` and `Step::children`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Run {
    pub title: String,
    pub status: RunStatus,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub ended_at: Option<OffsetDateTime>,
    pub jobs: Vec<Job>,
    pub steps: Vec<Step>,
}

impl Run {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            status: RunStatus::Queued,
            started_at: None,
            ended_at: None,
            jobs: Vec::new(),
            steps: Vec::new(),
        }
    }

    pub fn job(&self, id: JobId) -> Option<&Job> {
        self.jobs.get(id.0)
    }

    pub fn step(&self, id: StepId) -> Option<&Step> {
        self.steps.get(id.0)
    }

    pub fn top_level_steps(&self, job: JobId) -> impl Iterator<Item = &Step> + '_ {
        self.job(job)
            .into_iter()
            .flat_map(|job| job.steps.iter())
            .filter_map(|id| self.step(*id))
    }

    pub fn children(&self, step: StepId) -> impl Iterator<Item = &Step> + '_ {
        self.step(step)
            .into_iter()
            .flat_map(|step| step.children.iter())
            .filter_map(|id| self.step(*id))
    }

    /// Every step (top-level and nested) belonging to `job`.
    pub fn steps_of(&self, job: JobId) -> impl Iterator<Item = &Step> + '_ {
        self.steps.iter().filter(move |step| step.job == job)
    }

    pub fn has_failed_step(&self) -> bool {
        self.steps
            .iter()
            .any(|step| step.status == StepStatus::Failed)
    }

    pub fn duration_ms(&self) -> Option<u64> {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => elapsed_ms(start, end),
            _ => None,
        }
    }
}

/// Milliseconds between two instants, or `None` when `end` precedes `start`.
pub fn elapsed_ms(start: OffsetDateTime, end: OffsetDateTime) -> Option<u64> {
    let elapsed = end - start;
    if elapsed.is_negative() {
        None
    } else {
        u64::try_from(elapsed.whole_milliseconds()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test_timeout::timeout]
    fn status_markers_accept_aliases_in_any_case() {
        assert_eq!(StepStatus::from_marker("Success"), Some(StepStatus::Success));
        assert_eq!(StepStatus::from_marker("OK"), Some(StepStatus::Success));
        assert_eq!(StepStatus::from_marker("failed"), Some(StepStatus::Failed));
        assert_eq!(StepStatus::from_marker("Error"), Some(StepStatus::Failed));
        assert_eq!(StepStatus::from_marker("SKIPPED"), Some(StepStatus::Skipped));
        assert_eq!(StepStatus::from_marker("in_progress"), None);
        assert_eq!(StepStatus::from_marker("warning"), None);
    }

    #[test_timeout::timeout]
    fn elapsed_is_none_when_clock_went_backwards() {
        let start = datetime!(2025-11-26 11:43:21 UTC);
        let end = datetime!(2025-11-26 11:43:20 UTC);
        assert_eq!(elapsed_ms(start, end), None);
        assert_eq!(elapsed_ms(end, start), Some(1_000));
    }
}
