//! Drives tests through the collector, one logical test at a time.
//!
//! Retries are an explicit loop here rather than re-entrant calls from the
//! collector: each attempt runs to completion, then the collector decides
//! whether another attempt follows.

pub mod command;
mod panics;

use std::io::Write;

use chrono::{DateTime, Local};
use tracing::{debug, info};

use crate::case::{TestCase, TestContext, TestFault};
use crate::collector::{Collector, Counts, RetryDecision, RetryPolicy, TestOutcome};

pub use command::{CommandCase, CommandScreenshot};

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub counts: Counts,
    pub outcomes: Vec<TestOutcome>,
}

impl RunResult {
    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }

    pub fn was_successful(&self) -> bool {
        self.counts.failure == 0 && self.counts.error == 0
    }
}

pub struct Runner {
    collector: Collector,
}

impl Runner {
    pub fn new(policy: RetryPolicy, verbosity: u8) -> Self {
        Self {
            collector: Collector::new(policy, verbosity),
        }
    }

    /// Redirect progress marks away from stderr.
    pub fn with_progress(mut self, progress: Box<dyn Write>) -> Self {
        self.collector = self.collector.with_progress(progress);
        self
    }

    /// Run every case in order and return the collected result.
    pub fn run(mut self, cases: &[Box<dyn TestCase>]) -> RunResult {
        let started_at = Local::now();
        info!(tests = cases.len(), policy = ?self.collector.policy(), "starting run");

        for case in cases {
            self.run_case(case.as_ref());
        }

        let finished_at = Local::now();
        let (counts, outcomes) = self.collector.into_parts();
        info!(
            success = counts.success,
            failure = counts.failure,
            error = counts.error,
            "run finished"
        );
        RunResult {
            started_at,
            finished_at,
            counts,
            outcomes,
        }
    }

    /// Attempt one logical test until it passes or its retries run out.
    /// Returns the number of attempts made.
    pub fn run_case(&mut self, case: &dyn TestCase) -> u32 {
        let mut attempt = 0;
        loop {
            let mut ctx = self.collector.start_test(case, attempt);
            match execute(case, &mut ctx) {
                Ok(()) => self.collector.add_success(ctx),
                Err(TestFault::Failure(detail)) => {
                    self.collector.add_failure(ctx, &detail, case.screenshot())
                }
                Err(TestFault::Error(detail)) => {
                    self.collector.add_error(ctx, &detail, case.screenshot())
                }
            }
            match self.collector.stop_test() {
                RetryDecision::Retry { attempt: next } => attempt = next,
                RetryDecision::Done => return attempt + 1,
            }
        }
    }
}

/// Run one attempt. A panic becomes a fault instead of unwinding further.
fn execute(case: &dyn TestCase, ctx: &mut TestContext) -> Result<(), TestFault> {
    let result = panics::catch(|| case.run(ctx));
    if let Err(fault) = &result {
        debug!(test = %case.id(), %fault, "attempt faulted");
    }
    result
}
