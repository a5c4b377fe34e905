use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

use testchart::collector::RetryPolicy;
use testchart::config::ReportConfig;
use testchart::history::HistoryStore;

#[derive(Parser)]
#[command(
    name = "testchart",
    about = "HTML test reports with result charts, run history and flaky-test retries",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (defaults to $TESTCHART_CONFIG, then ./testchart.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the tests in a manifest and write the HTML report
    Run {
        /// TOML test manifest
        manifest: PathBuf,

        /// Report title
        #[arg(long)]
        title: Option<String>,

        /// Report description
        #[arg(long)]
        description: Option<String>,

        /// Report file; the run history is kept beside it as .json
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// 1 prints one mark per test, 2 prints test names
        #[arg(short, long)]
        verbosity: Option<u8>,

        /// Extra attempts for a failing test
        #[arg(long)]
        retry: Option<u32>,

        /// Report only the last attempt of a retried test
        #[arg(long, overrides_with = "no_keep_last_attempt")]
        keep_last_attempt: bool,

        /// Report every attempt of a retried test, even if the config says otherwise
        #[arg(long, overrides_with = "keep_last_attempt")]
        no_keep_last_attempt: bool,
    },

    /// Show the run history stored beside a report
    History {
        /// Report file the history was written beside
        report: PathBuf,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = ReportConfig::resolve(cli.config.as_deref())?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            manifest,
            title,
            description,
            output,
            verbosity,
            retry,
            keep_last_attempt,
            no_keep_last_attempt,
        } => {
            let mut options = config.report_options();
            if let Some(title) = title {
                options.title = title;
            }
            if let Some(description) = description {
                options.description = description;
            }
            if let Some(verbosity) = verbosity {
                options.verbosity = verbosity;
            }
            let keep_last = match (keep_last_attempt, no_keep_last_attempt) {
                (true, _) => true,
                (_, true) => false,
                _ => config.retry.keep_last_attempt_only,
            };
            let policy = RetryPolicy::new(retry.unwrap_or(config.retry.limit), keep_last);
            let output = output.unwrap_or_else(|| config.report.output.clone());

            tracing::info!(manifest = %manifest.display(), ?policy, "Running tests");
            let (result, rendered) = testchart::run_manifest(&manifest, &output, options, policy)?;

            eprintln!("\nTime Elapsed: {}", testchart::report::format_duration(result.duration()));
            if let Some(e) = &rendered.history_error {
                eprintln!("warning: run history not updated: {}", e);
            }
            println!(
                "{} ({} test{}, {})",
                output.display(),
                result.counts.total(),
                if result.counts.total() == 1 { "" } else { "s" },
                testchart::report::status_line(&result.counts)
            );

            if result.was_successful() {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }
        Commands::History { report, json } => {
            let store = HistoryStore::for_report(&report);
            let runs = store.load()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&runs)?);
            } else if runs.is_empty() {
                println!("No runs recorded.");
            } else {
                println!("{:<3} | {:<19} | {:<16} | {:<30} | Title", "#", "Start Time", "Duration", "Status");
                println!("{:-<3}-|-{:-<19}-|-{:-<16}-|-{:-<30}-|-{:-<20}", "", "", "", "", "");
                for (i, run) in runs.iter().enumerate() {
                    println!(
                        "{:<3} | {:<19} | {:<16} | {:<30} | {}",
                        i + 1,
                        run.start_time,
                        run.duration,
                        run.status,
                        run.title
                    );
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
