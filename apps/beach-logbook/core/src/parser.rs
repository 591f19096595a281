//! Incremental execution-log parser.
//!
//! Lines look like
//!
//! ```text
//! [2025-11-26 11:41:56] [Infrastructure Provisioning] [DNS] <Success> DNS completed
//! ```
//!
//! i.e. a timestamp, a main step label, an optional sub-step label, an
//! optional `<status>` and free text. `Execution Start` / `Execution End`
//! banners (and the `[DONE]` sentinel) delimit runs.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::aggregator::{AggregateResult, RunAggregator};
use crate::clock::Clock;
use crate::model::{JobId, RunStatus, StepId, StepStatus};
use crate::sink::RunSink;
use crate::DEFAULT_JOB_NAME;

/// End-of-stream sentinel sent by producers independently of the banner.
pub const DONE_SENTINEL: &str = "[DONE]";

fn line_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\[([^\]]+)]\s+\[([^\]]+)](?:\s+\[([^\]]+)])?(?:\s+<([^>]+)>)?\s*(.*)$")
            .expect("log line pattern compiles")
    })
}

fn start_marker() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)execution\s+start").expect("start marker compiles"))
}

fn end_marker() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)execution\s+end").expect("end marker compiles"))
}

/// One structured log line, borrowed from the raw text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLine<'a> {
    pub timestamp: &'a str,
    pub main: &'a str,
    pub sub: Option<&'a str>,
    /// Raw token between `<` and `>`, if any.
    pub status: Option<&'a str>,
    pub message: &'a str,
}

impl ParsedLine<'_> {
    pub fn step_status(&self) -> Option<StepStatus> {
        self.status.and_then(StepStatus::from_marker)
    }
}

/// Matches a single trimmed line against the structured format.
pub fn parse_line(line: &str) -> Option<ParsedLine<'_>> {
    let caps = line_pattern().captures(line)?;
    Some(ParsedLine {
        timestamp: caps.get(1)?.as_str(),
        main: caps.get(2)?.as_str(),
        sub: caps.get(3).map(|m| m.as_str()),
        status: caps.get(4).map(|m| m.as_str()),
        message: caps.get(5).map(|m| m.as_str()).unwrap_or_default(),
    })
}

/// What a single call to [`LogLineParser::process_line`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOutcome {
    Empty,
    RunStarted { job: JobId },
    RunFinished { status: RunStatus },
    /// Did not match the structured format; nothing changed.
    Unparsed,
    Step {
        step: StepId,
        finished: Option<StepStatus>,
    },
}

/// Identity of a step within the current job. Labels may contain any
/// character, so a sub-step never shares a key with a top-level step.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum StepKey {
    Main(String),
    Sub(String, String),
}

/// Per-session parse state: the current job and the steps already created
/// for it.
#[derive(Debug, Default)]
pub struct LogLineParser {
    current_job: Option<JobId>,
    steps: HashMap<StepKey, StepId>,
    unparsed: u64,
}

impl LogLineParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_job(&self) -> Option<JobId> {
        self.current_job
    }

    pub fn known_steps(&self) -> usize {
        self.steps.len()
    }

    /// Lines dropped because they did not match the structured format.
    pub fn unparsed_lines(&self) -> u64 {
        self.unparsed
    }

    pub fn reset(&mut self) {
        self.current_job = None;
        self.steps.clear();
    }

    /// Feeds one raw line. Malformed input is never an error; an `Err` only
    /// comes back if the aggregator rejects an id this parser handed it.
    pub fn process_line<S: RunSink, C: Clock>(
        &mut self,
        aggregator: &mut RunAggregator<S, C>,
        raw: &str,
    ) -> AggregateResult<LineOutcome> {
        let line = raw.trim();
        if line.is_empty() {
            return Ok(LineOutcome::Empty);
        }

        if start_marker().is_match(line) {
            debug!(line, "execution start marker");
            self.reset();
            let job = aggregator.add_job(DEFAULT_JOB_NAME);
            self.current_job = Some(job);
            return Ok(LineOutcome::RunStarted { job });
        }

        if line == DONE_SENTINEL || end_marker().is_match(line) {
            debug!(line, "execution end marker");
            let status = aggregator.finish_run(None);
            let job = self.current_job.take();
            self.reset();
            if let Some(job) = job {
                aggregator.finish_job(job, status)?;
            }
            return Ok(LineOutcome::RunFinished { status });
        }

        let Some(parsed) = parse_line(line) else {
            self.unparsed += 1;
            debug!(line, "skipping unparsed log line");
            return Ok(LineOutcome::Unparsed);
        };

        let job = match self.current_job {
            Some(job) => job,
            None => {
                warn!("log line before execution start; auto-creating job");
                let job = aggregator.add_job(DEFAULT_JOB_NAME);
                self.current_job = Some(job);
                job
            }
        };

        let main_key = StepKey::Main(parsed.main.to_owned());
        let main_step = match self.steps.get(&main_key) {
            Some(step) => *step,
            None => {
                let step = aggregator.add_step(job, parsed.main, None)?;
                self.steps.insert(main_key, step);
                step
            }
        };

        let step = match parsed.sub {
            Some(sub) => {
                let key = StepKey::Sub(parsed.main.to_owned(), sub.to_owned());
                match self.steps.get(&key) {
                    Some(step) => *step,
                    None => {
                        let step = aggregator.add_step(job, sub, Some(main_step))?;
                        self.steps.insert(key, step);
                        step
                    }
                }
            }
            None => main_step,
        };

        if !parsed.message.is_empty() {
            aggregator.append_log(step, parsed.message)?;
        }

        let finished = parsed.step_status();
        match (finished, parsed.status) {
            (Some(status), _) => aggregator.finish(step, status)?,
            (None, Some(token)) => debug!(token, "ignoring unknown step status"),
            (None, None) => {}
        }

        Ok(LineOutcome::Step { step, finished })
    }
}
