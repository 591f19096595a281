//! Plain-text and JSON dumps of a run tree.

use std::fmt::Write as _;
use std::io;

use beach_logbook_core::{format_duration, Job, Run, RunStatus, Step, StepStatus};
use clap::ValueEnum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Copy)]
pub struct RenderOptions {
    pub format: OutputFormat,
    pub show_logs: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            format: OutputFormat::Text,
            show_logs: true,
        }
    }
}

/// Writes `run` in one piece so concurrent channels do not interleave.
pub fn write_run<W: io::Write>(out: &mut W, run: &Run, options: RenderOptions) -> io::Result<()> {
    let rendered = match options.format {
        OutputFormat::Text => render_text(run, options.show_logs),
        OutputFormat::Json => {
            let mut json = serde_json::to_string(run).map_err(io::Error::other)?;
            json.push('\n');
            json
        }
    };
    out.write_all(rendered.as_bytes())?;
    out.flush()
}

pub fn render_text(run: &Run, show_logs: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{}{}",
        header(&run.title, run.status.label()),
        duration_suffix(run.duration_ms())
    );
    for job in &run.jobs {
        render_job(&mut out, run, job, show_logs);
    }
    out
}

fn render_job(out: &mut String, run: &Run, job: &Job, show_logs: bool) {
    let _ = writeln!(
        out,
        "{} {}{}",
        run_icon(job.status),
        header(&job.name, job.status.label()),
        duration_suffix(job.duration_ms)
    );
    for step in run.top_level_steps(job.id) {
        render_step(out, step, 1, show_logs);
        for child in run.children(step.id) {
            render_step(out, child, 2, show_logs);
        }
    }
}

fn render_step(out: &mut String, step: &Step, depth: usize, show_logs: bool) {
    let indent = "  ".repeat(depth);
    let duration = format_duration(step.duration_ms);
    let _ = write!(
        out,
        "{indent}{} {}",
        step_icon(step.status),
        header(&step.name, step.status.label())
    );
    if duration.is_empty() {
        out.push('\n');
    } else {
        let _ = writeln!(out, " · {duration}");
    }

    if show_logs {
        let width = step
            .logs
            .last()
            .map(|entry| entry.line_no.to_string().len())
            .unwrap_or(1);
        for entry in &step.logs {
            let _ = writeln!(
                out,
                "{indent}    {:>width$}  {}",
                entry.line_no, entry.message
            );
        }
    }
}

fn header(name: &str, label: &str) -> String {
    format!("{name} · {label}")
}

fn duration_suffix(duration_ms: Option<u64>) -> String {
    let duration = format_duration(duration_ms);
    if duration.is_empty() {
        duration
    } else {
        format!(" · Duration · {duration}")
    }
}

fn run_icon(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Queued => "○",
        RunStatus::InProgress => "●",
        RunStatus::Success => "✓",
        RunStatus::Failed => "✗",
    }
}

fn step_icon(status: StepStatus) -> &'static str {
    match status {
        StepStatus::InProgress => "●",
        StepStatus::Success => "✓",
        StepStatus::Failed => "✗",
        StepStatus::Skipped => "-",
    }
}
