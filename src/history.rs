//! Rolling history of past runs, kept next to the report.
//!
//! The history lives in a single JSON document (`<report>.json`) holding at
//! most [`MAX_RUNS`] summaries, oldest first. Every run reads the whole
//! document, edits it in memory and writes it back. There is no locking: two
//! processes appending to the same history at once can lose an update.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

/// Runs kept in the history document.
pub const MAX_RUNS: usize = 10;

/// Layout version written into the document.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("failed to access run history {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("run history {} is malformed: {source}", .path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize run history {}: {source}", .path.display())]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("run history {} has format version {found}, expected {}", .path.display(), FORMAT_VERSION)]
    UnsupportedVersion { path: PathBuf, found: u32 },
}

/// Summary of one finished run, as stored in the history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// `YYYY-MM-DD HH:MM:SS`, local time.
    pub start_time: String,
    pub duration: String,
    /// e.g. `Pass 3 Failure 1`, or `none`.
    pub status: String,
    /// Rendered result table of the run.
    pub fragment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<u32>,
}

impl RunSummary {
    /// Build a summary; the numeric counts are read back out of `status`.
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        start_time: impl Into<String>,
        duration: impl Into<String>,
        status: impl Into<String>,
        fragment: impl Into<String>,
    ) -> Self {
        let status = status.into();
        let counts = StatusCounts::parse(&status);
        Self {
            run_id: Uuid::new_v4(),
            title: title.into(),
            description: description.into(),
            start_time: start_time.into(),
            duration: duration.into(),
            status,
            fragment: fragment.into(),
            success: counts.success,
            fail: counts.fail,
            error: counts.error,
        }
    }
}

/// Counts recovered from a status string such as `Pass 2 Error 1`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub success: Option<u32>,
    pub fail: Option<u32>,
    pub error: Option<u32>,
}

impl StatusCounts {
    pub fn parse(status: &str) -> Self {
        let mut counts = Self::default();
        let words: Vec<&str> = status.split_whitespace().collect();
        for pair in words.windows(2) {
            let Ok(n) = pair[1].parse::<u32>() else {
                continue;
            };
            match pair[0] {
                "Pass" => counts.success = Some(n),
                "Failure" => counts.fail = Some(n),
                "Error" => counts.error = Some(n),
                _ => {}
            }
        }
        counts
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct HistoryDocument {
    version: u32,
    runs: Vec<RunSummary>,
}

impl HistoryDocument {
    fn empty() -> Self {
        Self {
            version: FORMAT_VERSION,
            runs: Vec::new(),
        }
    }
}

/// File-backed run history.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// History stored beside a report: same base name, `.json` extension.
    /// A report that is itself `.json` keeps its history in
    /// `<stem>.history.json` so the two never share a file.
    pub fn for_report(report: &Path) -> Self {
        let is_json = report
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::new(report.with_extension("history.json"))
        } else {
            Self::new(report.with_extension("json"))
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create an empty history if none exists yet. Returns whether a new
    /// document was written.
    pub fn ensure_initialized(&self) -> Result<bool, HistoryError> {
        if self.path.exists() {
            return Ok(false);
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| self.io_error(source))?;
        }
        self.write(&HistoryDocument::empty())?;
        info!(path = %self.path.display(), "initialized run history");
        Ok(true)
    }

    /// All stored runs, oldest first.
    pub fn load(&self) -> Result<Vec<RunSummary>, HistoryError> {
        Ok(self.read()?.runs)
    }

    /// Append `summary`, evicting the oldest runs beyond [`MAX_RUNS`], and
    /// write the document back. Returns the stored runs after the append.
    ///
    /// A malformed document is left untouched.
    pub fn append_run(&self, summary: RunSummary) -> Result<Vec<RunSummary>, HistoryError> {
        self.ensure_initialized()?;
        let mut doc = self.read()?;

        while doc.runs.len() >= MAX_RUNS {
            let evicted = doc.runs.remove(0);
            debug!(run_id = %evicted.run_id, start_time = %evicted.start_time, "evicted oldest run");
        }
        doc.runs.push(summary);

        self.write(&doc)?;
        debug!(path = %self.path.display(), runs = doc.runs.len(), "run history updated");
        Ok(doc.runs)
    }

    fn read(&self) -> Result<HistoryDocument, HistoryError> {
        let content = fs::read_to_string(&self.path).map_err(|source| self.io_error(source))?;
        let doc: HistoryDocument =
            serde_json::from_str(&content).map_err(|source| HistoryError::Malformed {
                path: self.path.clone(),
                source,
            })?;
        if doc.version != FORMAT_VERSION {
            return Err(HistoryError::UnsupportedVersion {
                path: self.path.clone(),
                found: doc.version,
            });
        }
        Ok(doc)
    }

    fn write(&self, doc: &HistoryDocument) -> Result<(), HistoryError> {
        let json = serde_json::to_string_pretty(doc).map_err(|source| HistoryError::Serialize {
            path: self.path.clone(),
            source,
        })?;
        fs::write(&self.path, json).map_err(|source| self.io_error(source))
    }

    fn io_error(&self, source: io::Error) -> HistoryError {
        HistoryError::Io {
            path: self.path.clone(),
            source,
        }
    }
}
