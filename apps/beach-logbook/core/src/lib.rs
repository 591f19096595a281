//! Shared primitives for Beach Logbook: the run/job/step model, the
//! incremental execution-log parser and the aggregator that turns parse
//! events into model mutations.
//!
//! The server only moves raw lines around; everything in this crate runs on
//! the viewer side, one [`LogSession`] per connected channel.

pub mod aggregator;
pub mod clock;
pub mod duration;
pub mod model;
pub mod parser;
pub mod session;
pub mod sink;

pub use aggregator::{AggregateError, RunAggregator};
pub use clock::{Clock, ManualClock, SystemClock};
pub use duration::format_duration;
pub use model::{Job, JobId, LogEntry, Run, RunStatus, Step, StepId, StepStatus};
pub use parser::{parse_line, LineOutcome, LogLineParser, ParsedLine, DONE_SENTINEL};
pub use session::LogSession;
pub use sink::{NoopSink, RecordingSink, RunEvent, RunSink, TracingSink};

/// Job name used for both explicit start markers and auto-created jobs.
pub const DEFAULT_JOB_NAME: &str = "Execution";
