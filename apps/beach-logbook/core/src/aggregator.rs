//! Owns the run → job → step graph and every mutation on it.
//!
//! The parser never touches the model directly; it calls the operations
//! here and the aggregator forwards a [`RunEvent`] to its sink after each
//! change.

use thiserror::Error;
use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::model::{elapsed_ms, Job, JobId, LogEntry, Run, RunStatus, Step, StepId, StepStatus};
use crate::sink::{NoopSink, RunEvent, RunSink};

/// Contract violations. Bad input never produces one of these; they mean the
/// caller handed over an id that this aggregator did not issue, or asked for
/// a transition the model does not have.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AggregateError {
    #[error("unknown job {0:?}")]
    UnknownJob(JobId),
    #[error("unknown step {0:?}")]
    UnknownStep(StepId),
    #[error("parent step {parent:?} belongs to {parent_job:?}, not {job:?}")]
    ForeignParent {
        job: JobId,
        parent: StepId,
        parent_job: JobId,
    },
    #[error("step {0:?} is already a sub-step; only one level of nesting is supported")]
    NestingTooDeep(StepId),
    #[error("cannot finish step {0:?} with non-terminal status")]
    StepNotTerminal(StepId),
    #[error("cannot finish job {0:?} with non-terminal status {1}")]
    JobNotTerminal(JobId, RunStatus),
}

pub type AggregateResult<T> = Result<T, AggregateError>;

pub struct RunAggregator<S = NoopSink, C = SystemClock> {
    run: Run,
    sink: S,
    clock: C,
}

impl RunAggregator {
    pub fn detached(title: impl Into<String>) -> Self {
        Self::with_clock(title, NoopSink, SystemClock)
    }
}

impl<S: RunSink> RunAggregator<S, SystemClock> {
    pub fn new(title: impl Into<String>, sink: S) -> Self {
        Self::with_clock(title, sink, SystemClock)
    }
}

impl<S: RunSink, C: Clock> RunAggregator<S, C> {
    pub fn with_clock(title: impl Into<String>, sink: S, clock: C) -> Self {
        Self {
            run: Run::new(title),
            sink,
            clock,
        }
    }

    pub fn run(&self) -> &Run {
        &self.run
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_parts(self) -> (Run, S) {
        (self.run, self.sink)
    }

    pub fn job(&self, id: JobId) -> AggregateResult<&Job> {
        self.run.job(id).ok_or(AggregateError::UnknownJob(id))
    }

    pub fn step(&self, id: StepId) -> AggregateResult<&Step> {
        self.run.step(id).ok_or(AggregateError::UnknownStep(id))
    }

    /// Every step of `job`, sub-steps included, in creation order.
    pub fn steps_of(&self, job: JobId) -> AggregateResult<Vec<&Step>> {
        self.job(job)?;
        Ok(self.run.steps_of(job).collect())
    }

    pub fn children_of(&self, step: StepId) -> AggregateResult<Vec<&Step>> {
        self.step(step)?;
        Ok(self.run.children(step).collect())
    }

    /// Appends a job in progress. The first job of a run also stamps the
    /// run's start time; any new job re-opens a finished run.
    pub fn add_job(&mut self, name: impl Into<String>) -> JobId {
        let now = self.clock.now();
        let id = JobId(self.run.jobs.len());
        self.run.jobs.push(Job {
            id,
            name: name.into(),
            status: RunStatus::InProgress,
            started_at: now,
            ended_at: None,
            duration_ms: None,
            steps: Vec::new(),
        });

        if self.run.jobs.len() == 1 {
            self.run.started_at = Some(now);
        }
        self.run.status = RunStatus::InProgress;
        self.run.ended_at = None;

        self.emit(RunEvent::JobAdded { job: id });
        id
    }

    /// Appends a step under `job`, or under `parent` when given.
    pub fn add_step(
        &mut self,
        job: JobId,
        name: impl Into<String>,
        parent: Option<StepId>,
    ) -> AggregateResult<StepId> {
        self.job(job)?;
        if let Some(parent_id) = parent {
            let parent_step = self.step(parent_id)?;
            if parent_step.job != job {
                return Err(AggregateError::ForeignParent {
                    job,
                    parent: parent_id,
                    parent_job: parent_step.job,
                });
            }
            if parent_step.parent.is_some() {
                return Err(AggregateError::NestingTooDeep(parent_id));
            }
        }

        let id = StepId(self.run.steps.len());
        self.run.steps.push(Step {
            id,
            job,
            parent,
            name: name.into(),
            status: StepStatus::InProgress,
            started_at: self.clock.now(),
            ended_at: None,
            duration_ms: None,
            logs: Vec::new(),
            children: Vec::new(),
        });

        match parent {
            Some(parent_id) => self.run.steps[parent_id.0].children.push(id),
            None => self.run.jobs[job.0].steps.push(id),
        }

        self.emit(RunEvent::StepAdded { job, step: id, parent });
        Ok(id)
    }

    /// Appends a log message and returns its 1-based number within the step.
    pub fn append_log(&mut self, step: StepId, message: impl Into<String>) -> AggregateResult<u32> {
        let entry = self
            .run
            .steps
            .get_mut(step.0)
            .ok_or(AggregateError::UnknownStep(step))?;
        let line_no = next_line_no(entry.logs.len());
        entry.logs.push(LogEntry {
            line_no,
            message: message.into(),
        });

        self.emit(RunEvent::LogAppended { step, line_no });
        Ok(line_no)
    }

    /// Finishes a step. A finished step never goes back to in progress; a
    /// second finish is only applied when it escalates to `failed`.
    /// A failed step marks its job failed straight away but leaves the run
    /// alone until [`finish_run`](Self::finish_run).
    pub fn finish(&mut self, step: StepId, status: StepStatus) -> AggregateResult<()> {
        if !status.is_terminal() {
            return Err(AggregateError::StepNotTerminal(step));
        }

        let now = self.clock.now();
        let entry = self
            .run
            .steps
            .get_mut(step.0)
            .ok_or(AggregateError::UnknownStep(step))?;

        if entry.status.is_terminal()
            && (entry.status == status || status != StepStatus::Failed)
        {
            debug!(
                step = step.index(),
                current = %entry.status,
                requested = %status,
                "ignoring repeated step finish"
            );
            return Ok(());
        }

        entry.status = status;
        entry.ended_at = Some(now);
        entry.duration_ms = elapsed_ms(entry.started_at, now);
        let job = entry.job;

        self.emit(RunEvent::StepFinished { step, status });

        if status == StepStatus::Failed {
            let job_entry = &mut self.run.jobs[job.0];
            if job_entry.status != RunStatus::Failed {
                job_entry.status = RunStatus::Failed;
                self.emit(RunEvent::JobFailed { job, step });
            }
        }

        Ok(())
    }

    /// Finishes a job. A job that already failed stays failed whatever
    /// status is passed in.
    pub fn finish_job(&mut self, job: JobId, status: RunStatus) -> AggregateResult<()> {
        if !status.is_terminal() {
            return Err(AggregateError::JobNotTerminal(job, status));
        }

        let now = self.clock.now();
        let entry = self
            .run
            .jobs
            .get_mut(job.0)
            .ok_or(AggregateError::UnknownJob(job))?;

        let status = if entry.status == RunStatus::Failed {
            RunStatus::Failed
        } else {
            status
        };
        entry.status = status;
        entry.ended_at = Some(now);
        entry.duration_ms = elapsed_ms(entry.started_at, now);

        self.emit(RunEvent::JobFinished { job, status });
        Ok(())
    }

    /// Finalises the run. Without an override the status is `failed` when
    /// any step anywhere in the run failed, `success` otherwise.
    pub fn finish_run(&mut self, status_override: Option<RunStatus>) -> RunStatus {
        let now = self.clock.now();
        let status = match status_override {
            Some(status) => status,
            None if self.run.has_failed_step() => RunStatus::Failed,
            None => RunStatus::Success,
        };

        if self.run.started_at.is_none() {
            self.run.started_at = Some(now);
        }
        self.run.ended_at = Some(now);
        self.run.status = status;

        self.emit(RunEvent::RunFinished { status });
        status
    }

    fn emit(&mut self, event: RunEvent) {
        self.sink.on_event(&self.run, &event);
    }
}

/// 1-based number for the entry after `existing` ones, saturating at `u32::MAX`.
fn next_line_no(existing: usize) -> u32 {
    u32::try_from(existing).unwrap_or(u32::MAX).saturating_add(1)
}
