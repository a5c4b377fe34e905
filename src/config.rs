//! TOML configuration for report runs.
//!
//! Every setting has a default, so a partial (or missing) file is fine.
//! Command line flags override whatever is loaded here.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::collector::RetryPolicy;
use crate::report::{ReportOptions, DEFAULT_TITLE};

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "TESTCHART_CONFIG";

/// Config file picked up from the working directory.
pub const LOCAL_CONFIG: &str = "testchart.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default)]
    pub report: ReportSection,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ReportConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Resolve configuration, in order:
    /// 1. `explicit`, when given (errors are returned, not swallowed).
    /// 2. The path in `TESTCHART_CONFIG`.
    /// 3. `testchart.toml` in the working directory.
    /// 4. Compiled-in defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "TESTCHART_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let local = Path::new(LOCAL_CONFIG);
        if local.exists() {
            match Self::load(local) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %local.display(),
                        error = %e,
                        "local config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Ok(Self::default())
    }

    pub fn report_options(&self) -> ReportOptions {
        ReportOptions {
            title: self.report.title.clone(),
            description: self.report.description.clone(),
            verbosity: self.report.verbosity,
        }
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportSection {
    pub title: String,
    pub description: String,
    /// Where the HTML page goes. The history sits next to it as `.json`.
    pub output: PathBuf,
    /// 1 prints one mark per test; 2 and above print test names and show
    /// test docs in the report.
    pub verbosity: u8,
}

impl Default for ReportSection {
    fn default() -> Self {
        Self {
            title: DEFAULT_TITLE.to_string(),
            description: String::new(),
            output: PathBuf::from("report.html"),
            verbosity: 1,
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
