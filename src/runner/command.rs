//! Tests backed by external commands.
//!
//! Exit status 0 is a pass and 1 a failed check. Any other status, death by
//! signal, or a command that cannot be started is an error.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Output};

use tracing::debug;

use crate::case::{ScreenshotCapable, ScreenshotError, TestCase, TestContext, TestFault, TestId};

/// Command whose stdout is an image of the system under test.
#[derive(Debug, Clone)]
pub struct CommandScreenshot {
    pub argv: Vec<String>,
    pub workdir: Option<PathBuf>,
}

impl ScreenshotCapable for CommandScreenshot {
    fn capture_screenshot(&self) -> Result<Vec<u8>, ScreenshotError> {
        let output = spawn(&self.argv, self.workdir.as_ref())
            .map_err(ScreenshotError::Capture)?;
        if !output.status.success() {
            return Err(ScreenshotError::Capture(format!(
                "`{}` exited with {}: {}",
                self.argv.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        if output.stdout.is_empty() {
            return Err(ScreenshotError::Empty);
        }
        Ok(output.stdout)
    }
}

#[derive(Debug, Clone)]
pub struct CommandCase {
    pub id: TestId,
    pub doc: Option<String>,
    pub suite_doc: Option<String>,
    pub argv: Vec<String>,
    pub workdir: Option<PathBuf>,
    pub screenshot: Option<CommandScreenshot>,
}

impl CommandCase {
    pub fn new(id: TestId, argv: Vec<String>) -> Self {
        Self {
            id,
            doc: None,
            suite_doc: None,
            argv,
            workdir: None,
            screenshot: None,
        }
    }

    fn command_line(&self) -> String {
        self.argv.join(" ")
    }
}

fn spawn(argv: &[String], workdir: Option<&PathBuf>) -> Result<Output, String> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| "empty command".to_string())?;
    let mut cmd = Command::new(program);
    cmd.args(args);
    if let Some(dir) = workdir {
        cmd.current_dir(dir);
    }
    debug!(command = %argv.join(" "), "spawning test command");
    cmd.output()
        .map_err(|e| format!("failed to start `{}`: {}", program, e))
}

impl TestCase for CommandCase {
    fn id(&self) -> &TestId {
        &self.id
    }

    fn doc(&self) -> Option<&str> {
        self.doc.as_deref()
    }

    fn suite_doc(&self) -> Option<&str> {
        self.suite_doc.as_deref()
    }

    fn run(&self, ctx: &mut TestContext) -> Result<(), TestFault> {
        let output = spawn(&self.argv, self.workdir.as_ref()).map_err(TestFault::Error)?;

        ctx.stdout()
            .write_all(&output.stdout)
            .and_then(|()| ctx.stderr().write_all(&output.stderr))
            .map_err(|e| TestFault::error(format!("failed to capture output: {}", e)))?;

        match output.status.code() {
            Some(0) => Ok(()),
            Some(1) => Err(TestFault::failure(format!(
                "`{}` exited with status 1",
                self.command_line()
            ))),
            Some(code) => Err(TestFault::error(format!(
                "`{}` exited with status {}",
                self.command_line(),
                code
            ))),
            None => Err(TestFault::error(format!(
                "`{}` was terminated by a signal",
                self.command_line()
            ))),
        }
    }

    fn screenshot(&self) -> Option<&dyn ScreenshotCapable> {
        self.screenshot
            .as_ref()
            .map(|s| s as &dyn ScreenshotCapable)
    }
}
