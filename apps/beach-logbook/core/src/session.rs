use tracing::warn;

use crate::aggregator::{AggregateResult, RunAggregator};
use crate::clock::{Clock, SystemClock};
use crate::model::Run;
use crate::parser::{LineOutcome, LogLineParser};
use crate::sink::RunSink;

/// Parser and aggregator for one consumer of one channel.
///
/// Lines are handled strictly one at a time: `feed` returns only after the
/// aggregator and its sink have seen every side effect of the line.
pub struct LogSession<S, C = SystemClock> {
    parser: LogLineParser,
    aggregator: RunAggregator<S, C>,
    rejected: u64,
}

impl<S: RunSink> LogSession<S, SystemClock> {
    pub fn new(title: impl Into<String>, sink: S) -> Self {
        Self::with_aggregator(RunAggregator::new(title, sink))
    }
}

impl<S: RunSink, C: Clock> LogSession<S, C> {
    pub fn with_aggregator(aggregator: RunAggregator<S, C>) -> Self {
        Self {
            parser: LogLineParser::new(),
            aggregator,
            rejected: 0,
        }
    }

    pub fn feed(&mut self, line: &str) -> AggregateResult<LineOutcome> {
        self.parser.process_line(&mut self.aggregator, line)
    }

    /// Feeds a transport message that may carry several newline separated
    /// lines. Stops at the first contract violation.
    pub fn feed_message(&mut self, message: &str) -> AggregateResult<Vec<LineOutcome>> {
        message.lines().map(|line| self.feed(line)).collect()
    }

    /// Feeds every line of `message`, skipping lines the aggregator rejects
    /// so one bad line never costs the rest of the run.
    pub fn feed_lossy(&mut self, message: &str) -> Vec<LineOutcome> {
        let mut outcomes = Vec::new();
        for line in message.lines() {
            match self.feed(line) {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => {
                    self.rejected += 1;
                    warn!(
                        line,
                        error = %err,
                        rejected = self.rejected,
                        "dropping rejected log line"
                    );
                }
            }
        }
        outcomes
    }

    /// Lines dropped by [`feed_lossy`](Self::feed_lossy).
    pub fn rejected_lines(&self) -> u64 {
        self.rejected
    }

    pub fn run(&self) -> &Run {
        self.aggregator.run()
    }

    pub fn parser(&self) -> &LogLineParser {
        &self.parser
    }

    pub fn aggregator(&self) -> &RunAggregator<S, C> {
        &self.aggregator
    }

    pub fn aggregator_mut(&mut self) -> &mut RunAggregator<S, C> {
        &mut self.aggregator
    }

    pub fn into_run(self) -> Run {
        self.aggregator.into_parts().0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RunStatus;
    use crate::sink::RecordingSink;

    #[test_timeout::timeout]
    fn lossy_feed_skips_rejected_lines_and_still_finishes() {
        let mut session = LogSession::new("run", RecordingSink::new());
        session.feed("=== Execution Start ===").unwrap();
        session.feed("[t] [A] one").unwrap();

        // Swap in an aggregator that knows the job but none of the steps.
        let mut fresh = RunAggregator::new("run", RecordingSink::new());
        fresh.add_job("Execution");
        *session.aggregator_mut() = fresh;

        let outcomes = session.feed_lossy("[t] [A] two\n[t] [B] three\n[DONE]\n");
        assert_eq!(session.rejected_lines(), 1);
        assert_eq!(outcomes.len(), 2);
        assert_eq!(
            outcomes[1],
            LineOutcome::RunFinished {
                status: RunStatus::Success
            }
        );
        assert_eq!(session.run().status, RunStatus::Success);
        assert_eq!(session.run().jobs[0].status, RunStatus::Success);
        assert_eq!(session.run().steps[0].name, "B");
        assert!(session.feed_message("[t] [A] four").is_ok());
    }
}
