//! HTML report rendering.
//!
//! The page embeds everything it needs to draw its charts: the counts of the
//! current run and the stored run history, serialized inline as JSON.

pub mod table;

use std::fs;
use std::path::{Path, PathBuf};

use askama::Template;
use thiserror::Error;
use tracing::{info, warn};

use crate::collector::Counts;
use crate::history::{HistoryError, HistoryStore, RunSummary};
use crate::runner::RunResult;

pub use table::{pass_rate, render_fragment};

pub const DEFAULT_TITLE: &str = "Unit Test Report";

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to render report: {0}")]
    Template(#[from] askama::Error),

    #[error("failed to serialize run history: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to write report {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One `name: value` line in the report heading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: &'static str,
    pub value: String,
}

/// Presentation settings for a report.
#[derive(Debug, Clone)]
pub struct ReportOptions {
    pub title: String,
    pub description: String,
    /// Test docs are shown next to test names above 1.
    pub verbosity: u8,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            title: DEFAULT_TITLE.to_string(),
            description: String::new(),
            verbosity: 1,
        }
    }
}

/// A rendered page plus what happened to the history along the way.
#[derive(Debug)]
pub struct RenderedReport {
    pub html: String,
    /// Runs drawn in the trend chart.
    pub history: Vec<RunSummary>,
    /// Set when the history could not be updated. The page is still complete.
    pub history_error: Option<HistoryError>,
}

#[derive(Template)]
#[template(path = "report.html")]
struct ReportPageTemplate<'a> {
    title: &'a str,
    generator: &'a str,
    description: &'a str,
    attributes: &'a [Attribute],
    fragment: &'a str,
    pass: u32,
    fail: u32,
    error: u32,
    history_json: &'a str,
}

/// `Pass 2 Failure 1`; only non-zero counts are listed, `none` when all are 0.
pub fn status_line(counts: &Counts) -> String {
    let parts: Vec<String> = [
        ("Pass", counts.success),
        ("Failure", counts.failure),
        ("Error", counts.error),
    ]
    .iter()
    .filter(|(_, n)| *n > 0)
    .map(|(label, n)| format!("{} {}", label, n))
    .collect();

    if parts.is_empty() {
        "none".to_string()
    } else {
        parts.join(" ")
    }
}

/// `H:MM:SS` with a `.ffffff` suffix when there are leftover microseconds.
pub fn format_duration(duration: chrono::Duration) -> String {
    let micros = duration.num_microseconds().unwrap_or(i64::MAX).max(0);
    let secs = micros / 1_000_000;
    let frac = micros % 1_000_000;
    let (h, m, s) = (secs / 3600, secs % 3600 / 60, secs % 60);
    if frac == 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{}:{:02}:{:02}.{:06}", h, m, s, frac)
    }
}

/// Start time, duration and status of a run.
pub fn report_attributes(result: &RunResult) -> Vec<Attribute> {
    vec![
        Attribute {
            name: "Start Time",
            value: result.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        },
        Attribute {
            name: "Duration",
            value: format_duration(result.duration()),
        },
        Attribute {
            name: "Status",
            value: status_line(&result.counts),
        },
    ]
}

/// JSON safe to drop inside a `<script>` element.
fn inline_json(runs: &[RunSummary]) -> Result<String, serde_json::Error> {
    Ok(serde_json::to_string(runs)?.replace("</", "<\\/"))
}

/// Renders a run into a page and records it in the run history.
pub struct HtmlReport {
    options: ReportOptions,
}

impl HtmlReport {
    pub fn new(options: ReportOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ReportOptions {
        &self.options
    }

    /// Build the page for `result`. The run's summary is appended to
    /// `history`; if that fails the failure is logged and returned in the
    /// result, and the trend chart shows only this run.
    pub fn render(
        &self,
        result: &RunResult,
        history: &HistoryStore,
    ) -> Result<RenderedReport, ReportError> {
        let attributes = report_attributes(result);
        let fragment = render_fragment(&result.counts, &result.outcomes, self.options.verbosity)?;

        let summary = RunSummary::new(
            self.options.title.as_str(),
            self.options.description.as_str(),
            attributes[0].value.as_str(),
            attributes[1].value.as_str(),
            attributes[2].value.as_str(),
            fragment.as_str(),
        );

        let (runs, history_error) = match history.append_run(summary.clone()) {
            Ok(runs) => (runs, None),
            Err(e) => {
                warn!(error = %e, "run history not updated; check the history file (expected a versioned JSON document)");
                (vec![summary], Some(e))
            }
        };

        let generator = format!("testchart {}", env!("CARGO_PKG_VERSION"));
        let history_json = inline_json(&runs)?;
        let html = ReportPageTemplate {
            title: &self.options.title,
            generator: &generator,
            description: &self.options.description,
            attributes: &attributes,
            fragment: &fragment,
            pass: result.counts.success,
            fail: result.counts.failure,
            error: result.counts.error,
            history_json: &history_json,
        }
        .render()?;

        Ok(RenderedReport {
            html,
            history: runs,
            history_error,
        })
    }

    /// Render and write the page to `path`, keeping the history beside it.
    pub fn write(&self, result: &RunResult, path: &Path) -> Result<RenderedReport, ReportError> {
        let history = HistoryStore::for_report(path);
        let rendered = self.render(result, &history)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| ReportError::Write {
                path: path.to_path_buf(),
                source,
            })?;
        }
        fs::write(path, &rendered.html).map_err(|source| ReportError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), runs = rendered.history.len(), "report written");
        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::TestId;
    use crate::collector::{OutcomeKind, TestOutcome};
    use chrono::{Local, TimeZone};

    fn result(counts: Counts, outcomes: Vec<TestOutcome>) -> RunResult {
        let started_at = Local.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap();
        RunResult {
            started_at,
            finished_at: started_at + chrono::Duration::milliseconds(1500),
            counts,
            outcomes,
        }
    }

    fn passed(name: &str) -> TestOutcome {
        TestOutcome {
            kind: OutcomeKind::Success,
            id: TestId::new("suite", name),
            description: None,
            suite_doc: None,
            attempt: 0,
            output: String::new(),
            trace: String::new(),
            attachments: Vec::new(),
        }
    }

    #[test]
    fn test_status_line() {
        assert_eq!(status_line(&Counts::default()), "none");
        assert_eq!(
            status_line(&Counts { success: 2, failure: 0, error: 1 }),
            "Pass 2 Error 1"
        );
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(chrono::Duration::seconds(3725)), "1:02:05");
        assert_eq!(
            format_duration(chrono::Duration::milliseconds(1500)),
            "0:00:01.500000"
        );
    }

    #[test]
    fn test_report_attributes() {
        let r = result(Counts { success: 1, failure: 0, error: 0 }, vec![passed("a")]);
        let attrs = report_attributes(&r);
        assert_eq!(attrs[0].value, "2024-03-01 09:30:00");
        assert_eq!(attrs[1].value, "0:00:01.500000");
        assert_eq!(attrs[2].value, "Pass 1");
    }

    #[test]
    fn test_render_appends_history() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = HistoryStore::for_report(&dir.path().join("report.html"));
        let report = HtmlReport::new(ReportOptions {
            title: "Smoke <tests>".to_string(),
            ..ReportOptions::default()
        });
        let r = result(Counts { success: 1, failure: 0, error: 0 }, vec![passed("a")]);

        report.render(&r, &store).unwrap();
        let rendered = report.render(&r, &store).unwrap();

        assert!(rendered.history_error.is_none());
        assert_eq!(rendered.history.len(), 2);
        assert_eq!(rendered.history[1].success, Some(1));
        assert!(rendered.html.contains("Smoke &lt;tests&gt;"));
        assert!(rendered.html.contains("Pass 1"));
        assert!(rendered.html.contains("var data = [{"));
    }

    #[test]
    fn test_json_report_path_keeps_history_separate() {
        let dir = tempfile::TempDir::new().unwrap();
        let report_path = dir.path().join("results.json");
        let report = HtmlReport::new(ReportOptions::default());
        let r = result(Counts { success: 1, failure: 0, error: 0 }, vec![passed("a")]);

        report.write(&r, &report_path).unwrap();
        let second = report.write(&r, &report_path).unwrap();

        assert!(second.history_error.is_none());
        assert_eq!(second.history.len(), 2);
        assert!(dir.path().join("results.history.json").exists());
        assert!(fs::read_to_string(&report_path).unwrap().contains("<html"));
    }

    #[test]
    fn test_inline_json_cannot_close_script() {
        let summary = RunSummary::new("t", "", "s", "d", "none", "</script><script>");
        let json = inline_json(&[summary]).unwrap();
        assert!(!json.contains("</script>"));
        assert!(json.contains("<\\/script>"));
    }

    #[test]
    fn test_malformed_history_still_renders() {
        let dir = tempfile::TempDir::new().unwrap();
        let report_path = dir.path().join("report.html");
        let history_path = dir.path().join("report.json");
        fs::write(&history_path, "var data = [").unwrap();

        let report = HtmlReport::new(ReportOptions::default());
        let r = result(Counts { success: 1, failure: 0, error: 0 }, vec![passed("a")]);
        let rendered = report.write(&r, &report_path).unwrap();

        assert!(matches!(rendered.history_error, Some(HistoryError::Malformed { .. })));
        assert_eq!(rendered.history.len(), 1);
        assert!(fs::read_to_string(&report_path).unwrap().contains(DEFAULT_TITLE));
        assert_eq!(fs::read_to_string(&history_path).unwrap(), "var data = [");
    }
}
