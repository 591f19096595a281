//! Change notifications emitted by the aggregator.
//!
//! Presentation layers implement [`RunSink`] and redraw only the node named
//! by each event instead of re-rendering the whole tree.

use serde::Serialize;
use tracing::{debug, info};

use crate::model::{JobId, Run, RunStatus, StepId, StepStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    JobAdded {
        job: JobId,
    },
    StepAdded {
        job: JobId,
        step: StepId,
        parent: Option<StepId>,
    },
    LogAppended {
        step: StepId,
        line_no: u32,
    },
    StepFinished {
        step: StepId,
        status: StepStatus,
    },
    /// A failed step marked its owning job failed before the job finished.
    JobFailed {
        job: JobId,
        step: StepId,
    },
    JobFinished {
        job: JobId,
        status: RunStatus,
    },
    RunFinished {
        status: RunStatus,
    },
}

pub trait RunSink {
    /// Called after every mutation, with the run already updated.
    fn on_event(&mut self, run: &Run, event: &RunEvent);
}

impl<F> RunSink for F
where
    F: FnMut(&Run, &RunEvent),
{
    fn on_event(&mut self, run: &Run, event: &RunEvent) {
        (self)(run, event)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl RunSink for NoopSink {
    fn on_event(&mut self, _run: &Run, _event: &RunEvent) {}
}

/// Keeps every event in order. Mostly useful in tests.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    pub events: Vec<RunEvent>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&mut self) -> Vec<RunEvent> {
        std::mem::take(&mut self.events)
    }
}

impl RunSink for RecordingSink {
    fn on_event(&mut self, _run: &Run, event: &RunEvent) {
        self.events.push(event.clone());
    }
}

/// Emits each mutation as a structured tracing event.
#[derive(Debug, Clone)]
pub struct TracingSink {
    channel: String,
}

impl TracingSink {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
        }
    }
}

impl RunSink for TracingSink {
    fn on_event(&mut self, run: &Run, event: &RunEvent) {
        match event {
            RunEvent::JobAdded { job } => {
                let name = run.job(*job).map(|j| j.name.as_str()).unwrap_or_default();
                info!(channel = %self.channel, job = job.index(), name, "job started");
            }
            RunEvent::StepAdded { step, parent, .. } => {
                let name = run.step(*step).map(|s| s.name.as_str()).unwrap_or_default();
                debug!(
                    channel = %self.channel,
                    step = step.index(),
                    parent = ?parent.map(StepId::index),
                    name,
                    "step started"
                );
            }
            RunEvent::LogAppended { step, line_no } => {
                let message = run
                    .step(*step)
                    .and_then(|s| s.logs.last())
                    .map(|entry| entry.message.as_str())
                    .unwrap_or_default();
                debug!(channel = %self.channel, step = step.index(), line_no, message, "log line");
            }
            RunEvent::StepFinished { step, status } => {
                let name = run.step(*step).map(|s| s.name.as_str()).unwrap_or_default();
                info!(channel = %self.channel, step = step.index(), name, %status, "step finished");
            }
            RunEvent::JobFailed { job, step } => {
                info!(
                    channel = %self.channel,
                    job = job.index(),
                    step = step.index(),
                    "job marked failed"
                );
            }
            RunEvent::JobFinished { job, status } => {
                info!(channel = %self.channel, job = job.index(), %status, "job finished");
            }
            RunEvent::RunFinished { status } => {
                info!(
                    channel = %self.channel,
                    title = %run.title,
                    %status,
                    duration_ms = ?run.duration_ms(),
                    "run finished"
                );
            }
        }
    }
}
