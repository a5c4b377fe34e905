//! TOML test manifests for the command line runner.
//!
//! ```toml
//! [[suite]]
//! name = "checkout"
//! doc = "Checkout flow against the staging site"
//! screenshot = ["./grab-screen.sh"]
//!
//! [[suite.test]]
//! name = "pay_with_card"
//! doc = "Card payment succeeds"
//! command = ["./e2e.sh", "pay_with_card"]
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::case::{TestCase, TestId};
use crate::runner::{CommandCase, CommandScreenshot};

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse manifest: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("test {id} has an empty command")]
    EmptyCommand { id: TestId },

    #[error("test {id} is declared more than once")]
    DuplicateTest { id: TestId },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[serde(rename = "suite", default)]
    pub suites: Vec<SuiteSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SuiteSpec {
    pub name: String,
    #[serde(default)]
    pub doc: Option<String>,
    /// Default screenshot command for every test in the suite.
    #[serde(default)]
    pub screenshot: Option<Vec<String>>,
    #[serde(rename = "test", default)]
    pub tests: Vec<TestSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestSpec {
    pub name: String,
    #[serde(default)]
    pub doc: Option<String>,
    pub command: Vec<String>,
    #[serde(default)]
    pub screenshot: Option<Vec<String>>,
    /// Relative paths resolve against the manifest's directory.
    #[serde(default)]
    pub workdir: Option<PathBuf>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let manifest = Self::parse(&content)?;
        info!(path = %path.display(), tests = manifest.test_count(), "loaded test manifest");
        Ok(manifest)
    }

    pub fn parse(content: &str) -> Result<Self, ManifestError> {
        Ok(toml::from_str(content)?)
    }

    pub fn test_count(&self) -> usize {
        self.suites.iter().map(|s| s.tests.len()).sum()
    }

    /// Turn the manifest into runnable cases, in declaration order.
    /// `base_dir` anchors relative working directories; it is also the
    /// default working directory.
    pub fn into_cases(self, base_dir: &Path) -> Result<Vec<Box<dyn TestCase>>, ManifestError> {
        let mut seen = HashSet::new();
        let mut cases: Vec<Box<dyn TestCase>> = Vec::with_capacity(self.test_count());

        for suite in self.suites {
            for test in suite.tests {
                let id = TestId::new(suite.name.as_str(), test.name.as_str());
                if test.command.is_empty() {
                    return Err(ManifestError::EmptyCommand { id });
                }
                if !seen.insert(id.clone()) {
                    return Err(ManifestError::DuplicateTest { id });
                }

                let workdir = match test.workdir {
                    Some(dir) if dir.is_absolute() => dir,
                    Some(dir) => base_dir.join(dir),
                    None => base_dir.to_path_buf(),
                };
                let screenshot = test
                    .screenshot
                    .or_else(|| suite.screenshot.clone())
                    .filter(|argv| !argv.is_empty())
                    .map(|argv| CommandScreenshot {
                        argv,
                        workdir: Some(workdir.clone()),
                    });

                cases.push(Box::new(CommandCase {
                    id,
                    doc: test.doc,
                    suite_doc: suite.doc.clone(),
                    argv: test.command,
                    workdir: Some(workdir),
                    screenshot,
                }));
            }
        }
        Ok(cases)
    }
}
