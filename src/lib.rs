//! testchart -- HTML test reports with result charts, run history and
//! flaky-test retries.
//!
//! This crate provides per-test output capture, a result collector with a
//! retry policy, a bounded run history stored beside each report, and the
//! HTML renderer that ties them together.

pub mod capture;
pub mod case;
pub mod collector;
pub mod config;
pub mod history;
pub mod manifest;
pub mod report;
pub mod runner;

use std::path::Path;

use anyhow::{Context, Result};

use crate::collector::RetryPolicy;
use crate::manifest::Manifest;
use crate::report::{HtmlReport, RenderedReport, ReportOptions};
use crate::runner::{RunResult, Runner};

/// Run the tests declared in a manifest and write the report to `output`.
pub fn run_manifest(
    manifest_path: &Path,
    output: &Path,
    options: ReportOptions,
    policy: RetryPolicy,
) -> Result<(RunResult, RenderedReport)> {
    // 1. Load the tests
    let manifest = Manifest::load(manifest_path)?;
    let base_dir = manifest_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let cases = manifest
        .into_cases(base_dir)
        .with_context(|| format!("invalid manifest: {}", manifest_path.display()))?;

    // 2. Run them
    tracing::info!(tests = cases.len(), output = %output.display(), "running manifest");
    let result = Runner::new(policy, options.verbosity).run(&cases);

    // 3. Render the report and update the history
    let rendered = HtmlReport::new(options)
        .write(&result, output)
        .with_context(|| format!("failed to produce report: {}", output.display()))?;

    Ok((result, rendered))
}
