//! The harness boundary: what a test must expose to be run and reported.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capture::{OutputCapture, Redirector};

/// Stable identity of a logical test, shared by all of its attempts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TestId {
    /// Grouping unit (module or suite name).
    pub suite: String,
    pub name: String,
}

impl TestId {
    pub fn new(suite: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            suite: suite.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.suite, self.name)
    }
}

/// Why an attempt did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TestFault {
    /// An assertion did not hold.
    #[error("{0}")]
    Failure(String),

    /// Something unexpected went wrong while running the test.
    #[error("{0}")]
    Error(String),
}

impl TestFault {
    pub fn failure(detail: impl Into<String>) -> Self {
        Self::Failure(detail.into())
    }

    pub fn error(detail: impl Into<String>) -> Self {
        Self::Error(detail.into())
    }
}

/// Return `Err(TestFault::Failure)` unless `cond` holds.
pub fn ensure(cond: bool, detail: impl Into<String>) -> Result<(), TestFault> {
    if cond {
        Ok(())
    } else {
        Err(TestFault::failure(detail))
    }
}

#[derive(Debug, Error)]
pub enum ScreenshotError {
    #[error("screenshot capture failed: {0}")]
    Capture(String),

    #[error("screenshot capture produced no image")]
    Empty,
}

/// Optional capability of a test: grab the current visual state as an image.
pub trait ScreenshotCapable {
    fn capture_screenshot(&self) -> Result<Vec<u8>, ScreenshotError>;
}

/// A single runnable test.
pub trait TestCase {
    fn id(&self) -> &TestId;

    /// Short human description of the test.
    fn doc(&self) -> Option<&str> {
        None
    }

    /// Description of the suite the test belongs to.
    fn suite_doc(&self) -> Option<&str> {
        None
    }

    fn run(&self, ctx: &mut TestContext) -> Result<(), TestFault>;

    /// Screenshot support, if the test drives something visual.
    fn screenshot(&self) -> Option<&dyn ScreenshotCapable> {
        None
    }
}

/// Handed to a test for the duration of one attempt.
#[derive(Debug)]
pub struct TestContext {
    stdout: Redirector,
    stderr: Redirector,
    attempt: u32,
    attachments: Vec<Vec<u8>>,
}

impl TestContext {
    pub fn new(capture: &OutputCapture, attempt: u32) -> Self {
        Self {
            stdout: capture.stdout(),
            stderr: capture.stderr(),
            attempt,
            attachments: Vec::new(),
        }
    }

    pub fn stdout(&mut self) -> &mut Redirector {
        &mut self.stdout
    }

    pub fn stderr(&mut self) -> &mut Redirector {
        &mut self.stderr
    }

    /// 0 for the first attempt, N for the N-th retry.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Attach an image to this attempt's outcome, whatever the outcome is.
    pub fn attach_screenshot(&mut self, image: Vec<u8>) {
        if !image.is_empty() {
            self.attachments.push(image);
        }
    }

    pub(crate) fn into_attachments(self) -> Vec<Vec<u8>> {
        self.attachments
    }
}
