//! The result table: suite rows with subtotals, then one row per test.

use askama::Template;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::collector::{Counts, OutcomeKind, TestOutcome};

pub(crate) struct SuiteRow {
    pub cid: String,
    pub style: &'static str,
    pub desc: String,
    pub count: u32,
    pub pass: u32,
    pub fail: u32,
    pub error: u32,
    pub tests: Vec<TestRow>,
}

pub(crate) struct TestRow {
    pub tid: String,
    pub row_class: &'static str,
    pub style: &'static str,
    pub desc: String,
    pub status: &'static str,
    pub has_output: bool,
    pub output: String,
    /// Base64 encoded screenshots.
    pub images: Vec<String>,
}

#[derive(Template)]
#[template(path = "result_table.html")]
struct ResultTableTemplate<'a> {
    suites: &'a [SuiteRow],
    total: u32,
    pass: u32,
    fail: u32,
    error: u32,
    pass_rate: String,
}

/// Group outcomes by suite, suites in order of first appearance and tests in
/// completion order.
pub(crate) fn group_by_suite(outcomes: &[TestOutcome]) -> Vec<(&str, Vec<&TestOutcome>)> {
    let mut groups: Vec<(&str, Vec<&TestOutcome>)> = Vec::new();
    for outcome in outcomes {
        let suite = outcome.id.suite.as_str();
        match groups.iter_mut().find(|(name, _)| *name == suite) {
            Some((_, members)) => members.push(outcome),
            None => groups.push((suite, vec![outcome])),
        }
    }
    groups
}

/// `12.50%`, or `0.00%` for an empty run.
pub fn pass_rate(counts: &Counts) -> String {
    let total = counts.total();
    if total == 0 {
        return "0.00%".to_string();
    }
    format!("{:.2}%", f64::from(counts.success) / f64::from(total) * 100.0)
}

pub(crate) fn build_rows(outcomes: &[TestOutcome], verbosity: u8) -> Vec<SuiteRow> {
    group_by_suite(outcomes)
        .into_iter()
        .enumerate()
        .map(|(cid, (suite, members))| suite_row(cid, suite, &members, verbosity))
        .collect()
}

fn suite_row(cid: usize, suite: &str, members: &[&TestOutcome], verbosity: u8) -> SuiteRow {
    let mut subtotal = Counts::default();
    for outcome in members {
        match outcome.kind {
            OutcomeKind::Success => subtotal.success += 1,
            OutcomeKind::Failure => subtotal.failure += 1,
            OutcomeKind::Error => subtotal.error += 1,
        }
    }

    let style = if subtotal.error > 0 {
        "errorClass"
    } else if subtotal.failure > 0 {
        "failClass"
    } else {
        "passClass"
    };

    let doc = members
        .first()
        .and_then(|o| o.suite_doc.as_deref())
        .and_then(|d| d.lines().next())
        .map(str::trim)
        .filter(|d| !d.is_empty());
    let desc = match doc {
        Some(doc) => format!("{}: {}", suite, doc),
        None => suite.to_string(),
    };

    let tests = members
        .iter()
        .enumerate()
        .map(|(tid, outcome)| test_row(cid, tid, outcome, verbosity))
        .collect();

    SuiteRow {
        cid: format!("c{}", cid + 1),
        style,
        desc,
        count: subtotal.total(),
        pass: subtotal.success,
        fail: subtotal.failure,
        error: subtotal.error,
        tests,
    }
}

fn test_row(cid: usize, tid: usize, outcome: &TestOutcome, verbosity: u8) -> TestRow {
    let prefix = if outcome.kind.is_success() { 'p' } else { 'f' };
    let tid = format!("{}t{}.{}", prefix, cid + 1, tid + 1);

    let doc = if verbosity > 1 {
        outcome.description.as_deref().unwrap_or("")
    } else {
        ""
    };
    let desc = if doc.is_empty() {
        outcome.id.name.clone()
    } else {
        format!("{}: {}", outcome.id.name, doc)
    };

    let (row_class, style) = match outcome.kind {
        OutcomeKind::Success => ("hiddenRow", "passCase"),
        OutcomeKind::Failure => ("none", "failCase"),
        OutcomeKind::Error => ("none", "errorCase"),
    };

    TestRow {
        has_output: !(outcome.output.is_empty() && outcome.trace.is_empty()),
        output: format!("{}: {}{}", tid, outcome.output, outcome.trace),
        tid,
        row_class,
        style,
        desc,
        status: outcome.kind.label(),
        images: outcome.attachments.iter().map(|img| STANDARD.encode(img)).collect(),
    }
}

/// Render the result table fragment that is both embedded in the page and
/// stored in the run history.
pub fn render_fragment(
    counts: &Counts,
    outcomes: &[TestOutcome],
    verbosity: u8,
) -> Result<String, askama::Error> {
    let suites = build_rows(outcomes, verbosity);
    ResultTableTemplate {
        suites: &suites,
        total: counts.total(),
        pass: counts.success,
        fail: counts.failure,
        error: counts.error,
        pass_rate: pass_rate(counts),
    }
    .render()
}
