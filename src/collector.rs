//! Result collection and the retry state machine.
//!
//! The collector is a passive recorder: the runner calls its lifecycle hooks
//! (`start_test`, one of `add_success`/`add_failure`/`add_error`, then
//! `stop_test`) once per attempt, and `stop_test` tells the runner whether the
//! same logical test should be attempted again.

use std::io::{self, Write};
use std::panic::{self, AssertUnwindSafe};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::capture::{CaptureGuard, OutputCapture};
use crate::case::{ScreenshotCapable, TestCase, TestContext, TestId};

/// Classification of one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Success,
    Failure,
    Error,
}

impl OutcomeKind {
    /// Label used in status strings and report rows.
    pub fn label(self) -> &'static str {
        match self {
            OutcomeKind::Success => "Pass",
            OutcomeKind::Failure => "Failure",
            OutcomeKind::Error => "Error",
        }
    }

    pub fn is_success(self) -> bool {
        self == OutcomeKind::Success
    }
}

/// Recorded result of one attempt. Never mutated after it is appended.
#[derive(Debug, Clone)]
pub struct TestOutcome {
    pub kind: OutcomeKind,
    pub id: TestId,
    /// Test doc, annotated with the retry number on retried attempts.
    pub description: Option<String>,
    pub suite_doc: Option<String>,
    pub attempt: u32,
    /// Interleaved stdout/stderr of the attempt.
    pub output: String,
    /// Failure or error detail; empty on success.
    pub trace: String,
    /// Screenshots, in the order they were taken.
    pub attachments: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    pub success: u32,
    pub failure: u32,
    pub error: u32,
}

impl Counts {
    pub fn total(&self) -> u32 {
        self.success + self.failure + self.error
    }

    fn bump(&mut self, kind: OutcomeKind) {
        match kind {
            OutcomeKind::Success => self.success += 1,
            OutcomeKind::Failure => self.failure += 1,
            OutcomeKind::Error => self.error += 1,
        }
    }

    fn drop_one(&mut self, kind: OutcomeKind) {
        let slot = match kind {
            OutcomeKind::Success => &mut self.success,
            OutcomeKind::Failure => &mut self.failure,
            OutcomeKind::Error => &mut self.error,
        };
        *slot = slot.saturating_sub(1);
    }
}

/// How flaky tests are retried.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Extra attempts allowed after a failure or error. 0 disables retries.
    pub limit: u32,
    /// Drop superseded failing attempts so only the last one is reported.
    pub keep_last_attempt_only: bool,
}

impl RetryPolicy {
    pub fn new(limit: u32, keep_last_attempt_only: bool) -> Self {
        Self {
            limit,
            keep_last_attempt_only,
        }
    }
}

/// What the runner should do after `stop_test`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Run the same test again as retry number `attempt`.
    Retry { attempt: u32 },
    Done,
}

#[derive(Debug)]
struct CurrentAttempt {
    id: TestId,
    description: Option<String>,
    suite_doc: Option<String>,
    attempt: u32,
    failed: bool,
}

/// Collects outcomes for one run.
pub struct Collector {
    policy: RetryPolicy,
    verbosity: u8,
    capture: OutputCapture,
    guard: Option<CaptureGuard>,
    current: Option<CurrentAttempt>,
    counts: Counts,
    outcomes: Vec<TestOutcome>,
    tries: u32,
    progress: Box<dyn Write>,
}

impl Collector {
    pub fn new(policy: RetryPolicy, verbosity: u8) -> Self {
        Self {
            policy,
            verbosity,
            capture: OutputCapture::new(),
            guard: None,
            current: None,
            counts: Counts::default(),
            outcomes: Vec::new(),
            tries: 0,
            progress: Box::new(io::stderr()),
        }
    }

    /// Send progress marks (`.`, `F`, `E`, retry notices) somewhere other
    /// than stderr.
    pub fn with_progress(mut self, progress: Box<dyn Write>) -> Self {
        self.progress = progress;
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn counts(&self) -> Counts {
        self.counts
    }

    pub fn outcomes(&self) -> &[TestOutcome] {
        &self.outcomes
    }

    pub fn was_successful(&self) -> bool {
        self.counts.failure == 0 && self.counts.error == 0
    }

    pub fn into_parts(self) -> (Counts, Vec<TestOutcome>) {
        (self.counts, self.outcomes)
    }

    /// Begin an attempt: reset and activate output capture.
    pub fn start_test(&mut self, case: &dyn TestCase, attempt: u32) -> TestContext {
        // Release any capture a previous attempt left behind before truncating.
        self.guard = None;
        self.current = Some(CurrentAttempt {
            id: case.id().clone(),
            description: annotate_retry(case.doc(), attempt),
            suite_doc: case.suite_doc().map(str::to_string),
            attempt,
            failed: false,
        });
        self.guard = Some(self.capture.begin());
        debug!(test = %case.id(), attempt, "test started");
        TestContext::new(&self.capture, attempt)
    }

    /// Stop redirecting and return what the attempt printed. Safe to call
    /// more than once per attempt.
    pub fn complete_output(&mut self) -> String {
        if let Some(mut guard) = self.guard.take() {
            guard.release();
        }
        self.capture.contents()
    }

    pub fn add_success(&mut self, ctx: TestContext) {
        self.tries = 0;
        let attachments = ctx.into_attachments();
        self.record(OutcomeKind::Success, String::new(), attachments);
    }

    pub fn add_failure(
        &mut self,
        ctx: TestContext,
        detail: &str,
        screenshot: Option<&dyn ScreenshotCapable>,
    ) {
        self.record_fault(OutcomeKind::Failure, ctx, detail, screenshot);
    }

    pub fn add_error(
        &mut self,
        ctx: TestContext,
        detail: &str,
        screenshot: Option<&dyn ScreenshotCapable>,
    ) {
        self.record_fault(OutcomeKind::Error, ctx, detail, screenshot);
    }

    fn record_fault(
        &mut self,
        kind: OutcomeKind,
        ctx: TestContext,
        detail: &str,
        screenshot: Option<&dyn ScreenshotCapable>,
    ) {
        let mut attachments = ctx.into_attachments();
        if let Some(current) = self.current.as_mut() {
            current.failed = true;
            if let Some(image) = grab_screenshot(&current.id, screenshot) {
                attachments.push(image);
            }
        }
        self.record(kind, detail.to_string(), attachments);
    }

    fn record(&mut self, kind: OutcomeKind, trace: String, attachments: Vec<Vec<u8>>) {
        let output = self.complete_output();
        let Some(current) = self.current.as_ref() else {
            warn!(kind = kind.label(), "outcome reported outside of a test; ignored");
            return;
        };

        self.counts.bump(kind);
        let outcome = TestOutcome {
            kind,
            id: current.id.clone(),
            description: current.description.clone(),
            suite_doc: current.suite_doc.clone(),
            attempt: current.attempt,
            output,
            trace,
            attachments,
        };
        debug!(test = %outcome.id, kind = kind.label(), attempt = outcome.attempt, "test finished");
        self.report_progress(&outcome);
        self.outcomes.push(outcome);
    }

    fn report_progress(&mut self, outcome: &TestOutcome) {
        let result = if self.verbosity > 1 {
            let mark = match outcome.kind {
                OutcomeKind::Success => "ok ",
                OutcomeKind::Failure => "F  ",
                OutcomeKind::Error => "E  ",
            };
            writeln!(self.progress, "{}{}", mark, outcome.id)
        } else {
            let mark = match outcome.kind {
                OutcomeKind::Success => ".",
                OutcomeKind::Failure => "F",
                OutcomeKind::Error => "E",
            };
            write!(self.progress, "{}", mark)
        };
        if let Err(e) = result {
            debug!(error = %e, "failed to write progress");
        }
    }

    /// End an attempt. Always called, whatever the outcome. Releases output
    /// capture unconditionally.
    pub fn stop_test(&mut self) -> RetryDecision {
        let current = self.current.take();
        let failed = current.as_ref().is_some_and(|c| c.failed);

        let mut decision = RetryDecision::Done;
        if self.policy.limit > 0 && failed {
            self.tries += 1;
            if self.tries <= self.policy.limit {
                if self.policy.keep_last_attempt_only {
                    self.discard_last();
                }
                if let Some(current) = current.as_ref() {
                    info!(test = %current.id, retry = self.tries, "retrying failed test");
                    if let Err(e) = writeln!(self.progress, "Retesting... {}..{}", current.id, self.tries) {
                        debug!(error = %e, "failed to write progress");
                    }
                }
                decision = RetryDecision::Retry {
                    attempt: self.tries,
                };
            }
        }
        if decision == RetryDecision::Done {
            self.tries = 0;
        }

        self.complete_output();
        decision
    }

    fn discard_last(&mut self) {
        if let Some(superseded) = self.outcomes.pop() {
            self.counts.drop_one(superseded.kind);
            debug!(test = %superseded.id, kind = superseded.kind.label(), "discarded superseded attempt");
        }
    }
}

/// Screenshot capability faults, including panics, end up as "no image".
fn grab_screenshot(id: &TestId, screenshot: Option<&dyn ScreenshotCapable>) -> Option<Vec<u8>> {
    let capability = screenshot?;
    match panic::catch_unwind(AssertUnwindSafe(|| capability.capture_screenshot())) {
        Ok(Ok(image)) if !image.is_empty() => Some(image),
        Ok(Ok(_)) => {
            debug!(test = %id, "screenshot capture returned an empty image");
            None
        }
        Ok(Err(e)) => {
            debug!(test = %id, error = %e, "screenshot capture failed");
            None
        }
        Err(_) => {
            debug!(test = %id, "screenshot capture panicked");
            None
        }
    }
}

fn annotate_retry(doc: Option<&str>, attempt: u32) -> Option<String> {
    if attempt == 0 {
        return doc.map(str::to_string);
    }
    match doc.map(str::trim).filter(|d| !d.is_empty()) {
        Some(doc) => Some(format!("{} (retry {})", doc, attempt)),
        None => Some(format!("retry {}", attempt)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::{ScreenshotError, TestFault};

    struct Fake {
        id: TestId,
        screenshot: Option<Camera>,
    }

    impl Fake {
        fn new(name: &str) -> Self {
            Self {
                id: TestId::new("fake", name),
                screenshot: None,
            }
        }

        fn with_camera(mut self, camera: Camera) -> Self {
            self.screenshot = Some(camera);
            self
        }
    }

    impl TestCase for Fake {
        fn id(&self) -> &TestId {
            &self.id
        }

        fn doc(&self) -> Option<&str> {
            Some("fake test")
        }

        fn run(&self, _ctx: &mut TestContext) -> Result<(), TestFault> {
            Ok(())
        }

        fn screenshot(&self) -> Option<&dyn ScreenshotCapable> {
            self.screenshot.as_ref().map(|c| c as &dyn ScreenshotCapable)
        }
    }

    enum Camera {
        Works,
        Broken,
        Panics,
    }

    impl ScreenshotCapable for Camera {
        fn capture_screenshot(&self) -> Result<Vec<u8>, ScreenshotError> {
            match self {
                Camera::Works => Ok(vec![0x89, b'P', b'N', b'G']),
                Camera::Broken => Err(ScreenshotError::Capture("driver gone".to_string())),
                Camera::Panics => panic!("driver exploded"),
            }
        }
    }

    fn quiet(policy: RetryPolicy) -> Collector {
        Collector::new(policy, 1).with_progress(Box::new(io::sink()))
    }

    /// Drive one logical test through the hooks, failing the first
    /// `failures` attempts.
    fn run_flaky(collector: &mut Collector, case: &Fake, failures: u32) -> u32 {
        let mut attempt = 0;
        loop {
            let ctx = collector.start_test(case, attempt);
            if attempt < failures {
                collector.add_failure(ctx, "assertion failed", case.screenshot());
            } else {
                collector.add_success(ctx);
            }
            match collector.stop_test() {
                RetryDecision::Retry { attempt: next } => attempt = next,
                RetryDecision::Done => return attempt + 1,
            }
        }
    }

    #[test]
    fn test_no_retry_counts_each_test_once() {
        let mut collector = quiet(RetryPolicy::default());
        let case = Fake::new("a");

        let ctx = collector.start_test(&case, 0);
        collector.add_success(ctx);
        assert_eq!(collector.stop_test(), RetryDecision::Done);

        let ctx = collector.start_test(&case, 0);
        collector.add_failure(ctx, "boom", None);
        assert_eq!(collector.stop_test(), RetryDecision::Done);

        let ctx = collector.start_test(&case, 0);
        collector.add_error(ctx, "panic", None);
        assert_eq!(collector.stop_test(), RetryDecision::Done);

        let counts = collector.counts();
        assert_eq!(counts, Counts { success: 1, failure: 1, error: 1 });
        assert_eq!(counts.total() as usize, collector.outcomes().len());
        assert!(!collector.was_successful());
    }

    #[test]
    fn test_flaky_keep_last_reports_single_success() {
        let mut collector = quiet(RetryPolicy::new(3, true));
        let attempts = run_flaky(&mut collector, &Fake::new("flaky"), 2);

        assert_eq!(attempts, 3);
        assert_eq!(collector.counts(), Counts { success: 1, failure: 0, error: 0 });
        assert_eq!(collector.outcomes().len(), 1);
        let outcome = &collector.outcomes()[0];
        assert_eq!(outcome.attempt, 2);
        assert_eq!(outcome.description.as_deref(), Some("fake test (retry 2)"));
    }

    #[test]
    fn test_flaky_keep_all_retains_failed_attempts() {
        let mut collector = quiet(RetryPolicy::new(3, false));
        run_flaky(&mut collector, &Fake::new("flaky"), 2);

        assert_eq!(collector.counts(), Counts { success: 1, failure: 2, error: 0 });
        let kinds: Vec<_> = collector.outcomes().iter().map(|o| o.kind).collect();
        assert_eq!(
            kinds,
            vec![OutcomeKind::Failure, OutcomeKind::Failure, OutcomeKind::Success]
        );
    }

    #[test]
    fn test_always_failing_counts_once_when_keeping_last() {
        let mut collector = quiet(RetryPolicy::new(2, true));
        let attempts = run_flaky(&mut collector, &Fake::new("broken"), u32::MAX);

        assert_eq!(attempts, 3);
        assert_eq!(collector.counts(), Counts { success: 0, failure: 1, error: 0 });
        assert_eq!(collector.outcomes()[0].attempt, 2);
    }

    #[test]
    fn test_retry_counter_resets_per_logical_test() {
        let mut collector = quiet(RetryPolicy::new(1, true));
        assert_eq!(run_flaky(&mut collector, &Fake::new("first"), u32::MAX), 2);
        // A fresh test gets its own retry budget.
        assert_eq!(run_flaky(&mut collector, &Fake::new("second"), 1), 2);
        assert_eq!(collector.counts(), Counts { success: 1, failure: 1, error: 0 });
    }

    #[test]
    fn test_success_never_retries() {
        let mut collector = quiet(RetryPolicy::new(5, true));
        assert_eq!(run_flaky(&mut collector, &Fake::new("solid"), 0), 1);
    }

    #[test]
    fn test_screenshot_attached_on_failure() {
        let mut collector = quiet(RetryPolicy::default());
        let case = Fake::new("ui").with_camera(Camera::Works);
        run_flaky(&mut collector, &case, 1);
        assert_eq!(collector.outcomes()[0].attachments.len(), 1);
    }

    #[test]
    fn test_screenshot_failure_is_swallowed() {
        for camera in [Camera::Broken, Camera::Panics] {
            let mut collector = quiet(RetryPolicy::default());
            let case = Fake::new("ui").with_camera(camera);
            let ctx = collector.start_test(&case, 0);
            collector.add_error(ctx, "lost session", case.screenshot());
            collector.stop_test();

            let outcome = &collector.outcomes()[0];
            assert_eq!(outcome.kind, OutcomeKind::Error);
            assert!(outcome.attachments.is_empty());
        }
    }

    #[test]
    fn test_output_attributed_to_each_attempt() {
        let mut collector = quiet(RetryPolicy::default());
        let case = Fake::new("printer");

        let mut ctx = collector.start_test(&case, 0);
        write!(ctx.stdout(), "hello from A").unwrap();
        collector.add_success(ctx);
        collector.stop_test();

        let mut ctx = collector.start_test(&case, 0);
        write!(ctx.stderr(), "hello from B").unwrap();
        collector.add_failure(ctx, "nope", None);
        collector.stop_test();

        assert_eq!(collector.outcomes()[0].output, "hello from A");
        assert_eq!(collector.outcomes()[1].output, "hello from B");
        assert_eq!(collector.outcomes()[1].trace, "nope");
    }

    #[test]
    fn test_stop_without_outcome_releases_capture() {
        let mut collector = quiet(RetryPolicy::new(1, true));
        let case = Fake::new("bypassed");
        let _ctx = collector.start_test(&case, 0);
        assert!(collector.capture.is_active());
        assert_eq!(collector.stop_test(), RetryDecision::Done);
        assert!(!collector.capture.is_active());
        assert!(collector.outcomes().is_empty());
    }

    #[test]
    fn test_progress_marks() {
        let sink = OutputCapture::new();
        let _guard = sink.begin();
        let mut collector = Collector::new(RetryPolicy::new(1, true), 2)
            .with_progress(Box::new(sink.stderr()));
        run_flaky(&mut collector, &Fake::new("flaky"), 1);

        let text = sink.contents();
        assert!(text.contains("F  fake.flaky"));
        assert!(text.contains("Retesting... fake.flaky..1"));
        assert!(text.contains("ok fake.flaky"));
    }

    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_progress_write_errors_do_not_stop_retries() {
        let mut collector =
            Collector::new(RetryPolicy::new(2, true), 2).with_progress(Box::new(ClosedPipe));
        assert_eq!(run_flaky(&mut collector, &Fake::new("flaky"), 2), 3);
        assert_eq!(collector.counts().success, 1);
        assert_eq!(collector.counts().total(), 1);
    }

    #[test]
    fn test_annotate_retry() {
        assert_eq!(annotate_retry(None, 0), None);
        assert_eq!(annotate_retry(Some("login"), 0).as_deref(), Some("login"));
        assert_eq!(annotate_retry(Some("login"), 2).as_deref(), Some("login (retry 2)"));
        assert_eq!(annotate_retry(None, 1).as_deref(), Some("retry 1"));
    }
}
