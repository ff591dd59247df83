//! Evidence & Report Pipeline.
//!
//! One [`ReportPipeline`] is shared (behind an `Arc`) by every test in a run.
//! It owns the run lifecycle:
//!
//! ```text
//! Uninitialized --begin_test--> Initialized --end_run--> Flushed
//!        ^                                                  |
//!        +------------------- begin_test -------------------+  (new run)
//! ```
//!
//! Each test gets its own [`TestContext`], which collects step outcomes and
//! log entries without touching shared state until [`TestContext::finish`].
//! Initialization, finishing and flushing all happen under one mutex.

use crate::config::SuiteConfig;
use crate::dispatch::DispatchMode;
use crate::error::ReportError;
use crate::session::Session;
use chrono::{DateTime, Local};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};
use uuid::Uuid;

/// Result type for report operations
pub type ReportResult<T> = Result<T, ReportError>;

/// Title written into every report
pub const REPORT_TITLE: &str = "Automation Test Report";

#[allow(clippy::expect_used)]
static UNSAFE_FILENAME_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9_-]+").expect("valid filename regex"));

// =============================================================================
// OUTCOMES AND LOG ENTRIES
// =============================================================================

/// Status of one journey step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// Post-condition satisfied
    Success,
    /// Step failed; the journey stopped here
    Failure,
    /// Optional step whose target was absent, or a guard was already met
    Skipped,
}

/// Immutable result of one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutcome {
    /// Step name
    pub step: String,
    /// Status
    pub status: StepStatus,
    /// Diagnostic message
    pub message: String,
    /// Screenshot captured for this step, if any
    pub evidence: Option<PathBuf>,
    /// Dispatch tier that performed the step's action
    pub dispatch: Option<DispatchMode>,
    /// Time spent on the step
    pub duration_ms: u64,
}

impl StepOutcome {
    /// Successful step
    pub fn success(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(step, StepStatus::Success, message)
    }

    /// Failed step
    pub fn failure(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(step, StepStatus::Failure, message)
    }

    /// Skipped step
    pub fn skipped(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(step, StepStatus::Skipped, message)
    }

    fn with_status(step: impl Into<String>, status: StepStatus, message: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            status,
            message: message.into(),
            evidence: None,
            dispatch: None,
            duration_ms: 0,
        }
    }

    /// Attach an evidence path
    #[must_use]
    pub fn with_evidence(mut self, evidence: Option<PathBuf>) -> Self {
        self.evidence = evidence;
        self
    }

    /// Record the dispatch tier used
    #[must_use]
    pub const fn with_dispatch(mut self, mode: Option<DispatchMode>) -> Self {
        self.dispatch = mode;
        self
    }

    /// Record the step duration
    #[must_use]
    pub const fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Check if the step failed
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.status == StepStatus::Failure
    }
}

/// Severity of a free-form test log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Informational
    Info,
    /// A check passed
    Pass,
    /// A check failed
    Fail,
}

/// Timestamped log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// When it was logged
    pub at: DateTime<Local>,
    /// Level
    pub level: LogLevel,
    /// Message
    pub message: String,
}

/// Overall test status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    /// No failed step and no `fail` log entry
    Passed,
    /// At least one failure
    Failed,
}

/// A finished test as stored in the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRecord {
    /// Test name
    pub name: String,
    /// Final status
    pub status: TestStatus,
    /// Start time
    pub started_at: DateTime<Local>,
    /// End time
    pub finished_at: DateTime<Local>,
    /// Step outcomes in execution order
    pub steps: Vec<StepOutcome>,
    /// Log entries in order
    pub logs: Vec<LogEntry>,
    /// Number of screenshot attempts, successful or not
    pub evidence_attempts: u32,
}

impl TestRecord {
    /// Wall-clock duration in milliseconds
    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }

    /// First failure message, from steps or logs
    #[must_use]
    pub fn first_failure(&self) -> Option<&str> {
        self.steps
            .iter()
            .find(|s| s.is_failure())
            .map(|s| s.message.as_str())
            .or_else(|| {
                self.logs
                    .iter()
                    .find(|l| l.level == LogLevel::Fail)
                    .map(|l| l.message.as_str())
            })
    }
}

// =============================================================================
// PIPELINE
// =============================================================================

/// Observable lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportPhase {
    /// No run started yet
    Uninitialized,
    /// A run is collecting tests
    Initialized,
    /// The last run was written out; the next `begin_test` starts a new one
    Flushed,
}

#[derive(Debug)]
struct RunState {
    run_id: Uuid,
    started_at: DateTime<Local>,
    dir: PathBuf,
    screenshots_dir: PathBuf,
    tests: Vec<TestRecord>,
}

#[derive(Debug)]
enum ReportState {
    Uninitialized,
    Initialized(RunState),
    Flushed,
}

/// Summary returned by [`ReportPipeline::end_run`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Run identifier
    pub run_id: Uuid,
    /// Run directory
    pub dir: PathBuf,
    /// Tests recorded
    pub total: usize,
    /// Tests that passed
    pub passed: usize,
    /// Tests that failed
    pub failed: usize,
    /// HTML report path
    pub html: PathBuf,
    /// JSON report path
    pub json: PathBuf,
    /// JUnit XML path
    pub junit: PathBuf,
}

/// Serialized form of a flushed run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Report title
    pub title: String,
    /// Run identifier
    pub run_id: Uuid,
    /// Run start
    pub started_at: DateTime<Local>,
    /// Run end
    pub finished_at: DateTime<Local>,
    /// Environment details
    pub system: BTreeMap<String, String>,
    /// Finished tests
    pub tests: Vec<TestRecord>,
}

/// Process-wide report service shared by concurrent tests
#[derive(Debug)]
pub struct ReportPipeline {
    root: PathBuf,
    system: BTreeMap<String, String>,
    state: Mutex<ReportState>,
}

impl ReportPipeline {
    /// Pipeline writing runs under `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let mut system = BTreeMap::new();
        system.insert("OS".to_string(), std::env::consts::OS.to_string());
        system.insert("Arch".to_string(), std::env::consts::ARCH.to_string());
        system.insert(
            "Tester".to_string(),
            std::env::var("USER")
                .or_else(|_| std::env::var("USERNAME"))
                .unwrap_or_else(|_| "unknown".to_string()),
        );
        system.insert(
            "Storeflow Version".to_string(),
            env!("CARGO_PKG_VERSION").to_string(),
        );
        Self {
            root: root.into(),
            system,
            state: Mutex::new(ReportState::Uninitialized),
        }
    }

    /// Shared pipeline writing runs under `root`
    pub fn shared(root: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self::new(root))
    }

    /// Pipeline rooted at the suite's `report_root`, with the target store
    /// and browser in the report header
    pub fn from_config(config: &SuiteConfig) -> Arc<Self> {
        Arc::new(
            Self::new(&config.report_root)
                .with_info("Browser", &config.browser)
                .with_info("Base URL", &config.base_url),
        )
    }

    /// Add an environment detail to the report header
    #[must_use]
    pub fn with_info(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.system.insert(key.into(), value.into());
        self
    }

    fn lock(&self) -> MutexGuard<'_, ReportState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> ReportPhase {
        match &*self.lock() {
            ReportState::Uninitialized => ReportPhase::Uninitialized,
            ReportState::Initialized(_) => ReportPhase::Initialized,
            ReportState::Flushed => ReportPhase::Flushed,
        }
    }

    /// Identifier of the live run, if any
    pub fn current_run(&self) -> Option<Uuid> {
        match &*self.lock() {
            ReportState::Initialized(run) => Some(run.run_id),
            _ => None,
        }
    }

    fn initialize(&self) -> ReportResult<RunState> {
        let run_id = Uuid::new_v4();
        let started_at = Local::now();
        let mut dir = self
            .root
            .join(started_at.format("%Y-%m-%d_%H-%M-%S").to_string());
        if dir.exists() {
            let short = run_id.simple().to_string();
            dir = self.root.join(format!(
                "{}_{}",
                started_at.format("%Y-%m-%d_%H-%M-%S"),
                &short[..8]
            ));
        }
        let screenshots_dir = dir.join("screenshots");
        std::fs::create_dir_all(&screenshots_dir)?;
        info!(%run_id, dir = %dir.display(), "report run initialized");
        Ok(RunState {
            run_id,
            started_at,
            dir,
            screenshots_dir,
            tests: Vec::new(),
        })
    }

    /// Start a test, initializing the run on first use
    pub fn begin_test(self: &Arc<Self>, name: impl Into<String>) -> ReportResult<TestContext> {
        let name = name.into();
        let mut state = self.lock();
        if !matches!(*state, ReportState::Initialized(_)) {
            *state = ReportState::Initialized(self.initialize()?);
        }
        let ReportState::Initialized(run) = &*state else {
            return Err(ReportError::InvalidState {
                message: "run did not initialize".to_string(),
            });
        };
        info!(test = %name, run_id = %run.run_id, "test started");
        Ok(TestContext {
            name,
            run_id: run.run_id,
            screenshots_dir: run.screenshots_dir.clone(),
            started_at: Local::now(),
            steps: Vec::new(),
            logs: Vec::new(),
            evidence_attempts: 0,
            pipeline: Arc::clone(self),
        })
    }

    fn accept(&self, record: TestRecord, run_id: Uuid) {
        let mut state = self.lock();
        match &mut *state {
            ReportState::Initialized(run) if run.run_id == run_id => run.tests.push(record),
            _ => warn!(test = %record.name, %run_id, "dropping test result from a finished run"),
        }
    }

    /// Write the run to disk and reset the pipeline.
    ///
    /// Returns `None` when no run was live. The run stays live when any
    /// artifact fails to write, so a later call can retry the flush.
    pub fn end_run(&self) -> ReportResult<Option<RunSummary>> {
        let mut state = self.lock();
        let ReportState::Initialized(run) = &*state else {
            return Ok(None);
        };

        let report = RunReport {
            title: REPORT_TITLE.to_string(),
            run_id: run.run_id,
            started_at: run.started_at,
            finished_at: Local::now(),
            system: self.system.clone(),
            tests: run.tests.clone(),
        };
        let html = run.dir.join("report.html");
        let json = run.dir.join("report.json");
        let junit = run.dir.join("junit.xml");
        if let Err(err) = Self::write_artifacts(&report, &run.dir, &html, &json, &junit) {
            warn!(run_id = %run.run_id, error = %err, "report flush failed, run kept live");
            return Err(err);
        }

        let summary = RunSummary {
            run_id: run.run_id,
            dir: run.dir.clone(),
            total: report.tests.len(),
            passed: report.passed_count(),
            failed: report.failed_count(),
            html,
            json,
            junit,
        };
        *state = ReportState::Flushed;
        info!(
            run_id = %summary.run_id,
            total = summary.total,
            failed = summary.failed,
            "report run flushed"
        );
        Ok(Some(summary))
    }

    fn write_artifacts(
        report: &RunReport,
        dir: &Path,
        html: &Path,
        json: &Path,
        junit: &Path,
    ) -> ReportResult<()> {
        std::fs::write(html, report.render_html(dir))?;
        std::fs::write(json, serde_json::to_string_pretty(report)?)?;
        std::fs::write(junit, report.render_junit())?;
        Ok(())
    }
}

// =============================================================================
// TEST CONTEXT
// =============================================================================

/// Per-test log owned by exactly one executing test
#[derive(Debug)]
pub struct TestContext {
    name: String,
    run_id: Uuid,
    screenshots_dir: PathBuf,
    started_at: DateTime<Local>,
    steps: Vec<StepOutcome>,
    logs: Vec<LogEntry>,
    evidence_attempts: u32,
    pipeline: Arc<ReportPipeline>,
}

impl TestContext {
    /// Test name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run this context belongs to
    #[must_use]
    pub const fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Append a step outcome
    pub fn record(&mut self, outcome: StepOutcome) {
        self.steps.push(outcome);
    }

    /// Append a log entry
    pub fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        self.logs.push(LogEntry {
            at: Local::now(),
            level,
            message: message.into(),
        });
    }

    /// Log at `info`
    pub fn info(&mut self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    /// Log at `pass`
    pub fn pass(&mut self, message: impl Into<String>) {
        self.log(LogLevel::Pass, message);
    }

    /// Log at `fail`
    pub fn fail(&mut self, message: impl Into<String>) {
        self.log(LogLevel::Fail, message);
    }

    /// Recorded steps
    #[must_use]
    pub fn steps(&self) -> &[StepOutcome] {
        &self.steps
    }

    /// Recorded log entries
    #[must_use]
    pub fn logs(&self) -> &[LogEntry] {
        &self.logs
    }

    /// Number of screenshot attempts so far
    #[must_use]
    pub const fn evidence_attempts(&self) -> u32 {
        self.evidence_attempts
    }

    /// Check if anything failed
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.steps.iter().any(StepOutcome::is_failure)
            || self.logs.iter().any(|l| l.level == LogLevel::Fail)
    }

    /// Screenshot the session into the run's screenshot directory.
    ///
    /// Never fails outward: any capture or write error is logged and yields
    /// `None`.
    pub async fn capture_evidence(&mut self, session: &dyn Session, label: &str) -> Option<PathBuf> {
        self.evidence_attempts += 1;
        let bytes = match session.screenshot().await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(test = %self.name, error = %err, "screenshot capture failed");
                self.info(format!("evidence capture failed: {err}"));
                return None;
            }
        };
        let path = self.screenshots_dir.join(evidence_file_name(label, Local::now()));
        let written = std::fs::create_dir_all(&self.screenshots_dir)
            .and_then(|()| std::fs::write(&path, bytes));
        match written {
            Ok(()) => {
                info!(test = %self.name, path = %path.display(), "evidence captured");
                self.info(format!("evidence captured: {}", path.display()));
                Some(path)
            }
            Err(err) => {
                warn!(test = %self.name, error = %err, "writing screenshot failed");
                self.info(format!("evidence capture failed: {err}"));
                None
            }
        }
    }

    /// Hand the collected log to the pipeline
    pub fn finish(self) -> TestStatus {
        let status = if self.has_failures() {
            TestStatus::Failed
        } else {
            TestStatus::Passed
        };
        info!(test = %self.name, ?status, "test finished");
        let record = TestRecord {
            name: self.name,
            status,
            started_at: self.started_at,
            finished_at: Local::now(),
            steps: self.steps,
            logs: self.logs,
            evidence_attempts: self.evidence_attempts,
        };
        self.pipeline.accept(record, self.run_id);
        status
    }
}

/// `{label}_{yyyyMMdd_HHmmss_SSS}.png`, with `screenshot` for an empty label
#[must_use]
pub fn evidence_file_name(label: &str, at: DateTime<Local>) -> String {
    let cleaned = UNSAFE_FILENAME_CHARS.replace_all(label.trim(), "_");
    let prefix = if cleaned.trim_matches('_').is_empty() {
        "screenshot"
    } else {
        cleaned.as_ref()
    };
    format!("{prefix}_{}.png", at.format("%Y%m%d_%H%M%S_%3f"))
}

// =============================================================================
// RENDERING
// =============================================================================

impl RunReport {
    /// Number of passed tests
    #[must_use]
    pub fn passed_count(&self) -> usize {
        self.tests
            .iter()
            .filter(|t| t.status == TestStatus::Passed)
            .count()
    }

    /// Number of failed tests
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.tests.len() - self.passed_count()
    }

    /// Pass rate (0.0 - 1.0)
    #[must_use]
    pub fn pass_rate(&self) -> f64 {
        if self.tests.is_empty() {
            return 1.0;
        }
        self.passed_count() as f64 / self.tests.len() as f64
    }

    /// Render the HTML report; evidence links are relative to `run_dir`
    #[must_use]
    pub fn render_html(&self, run_dir: &Path) -> String {
        let mut html = String::new();

        html.push_str(&format!(
            r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <title>{}</title>
    <style>
        body {{ font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; margin: 20px; }}
        .summary {{ background: #f5f5f5; padding: 20px; border-radius: 8px; margin-bottom: 20px; }}
        .progress-bar {{ background: #ddd; height: 20px; border-radius: 10px; overflow: hidden; }}
        .passed {{ background: #4caf50; height: 100%; }}
        .test {{ padding: 10px; margin: 5px 0; border-radius: 4px; }}
        .test.pass {{ background: #e8f5e9; border-left: 4px solid #4caf50; }}
        .test.fail {{ background: #ffebee; border-left: 4px solid #f44336; }}
        .step.failure, .log.fail {{ color: #d32f2f; }}
        .step.skipped {{ color: #ef6c00; }}
        .step.success, .log.pass {{ color: #2e7d32; }}
        .evidence img {{ max-width: 480px; border: 1px solid #ddd; }}
    </style>
</head>
<body>
"#,
            REPORT_TITLE
        ));

        html.push_str(&format!(
            r#"<div class="summary">
    <h1>{}</h1>
    <h2>Results: {}/{} passed ({:.1}%)</h2>
    <div class="progress-bar">
        <div class="passed" style="width: {:.1}%"></div>
    </div>
    <p>Run {} started {}</p>
    <table>
"#,
            REPORT_TITLE,
            self.passed_count(),
            self.tests.len(),
            self.pass_rate() * 100.0,
            self.pass_rate() * 100.0,
            self.run_id,
            self.started_at.format("%Y-%m-%d %H:%M:%S"),
        ));
        for (key, value) in &self.system {
            html.push_str(&format!(
                "        <tr><th>{}</th><td>{}</td></tr>\n",
                escape_html(key),
                escape_html(value)
            ));
        }
        html.push_str("    </table>\n</div>\n");

        html.push_str("<h2>Tests</h2>\n");
        for test in &self.tests {
            let class = match test.status {
                TestStatus::Passed => "pass",
                TestStatus::Failed => "fail",
            };
            html.push_str(&format!(
                r#"<div class="test {}">
    <strong>{}</strong> - {:?} ({}ms)
    <ol>
"#,
                class,
                escape_html(&test.name),
                test.status,
                test.duration_ms()
            ));
            for step in &test.steps {
                let status = match step.status {
                    StepStatus::Success => "success",
                    StepStatus::Failure => "failure",
                    StepStatus::Skipped => "skipped",
                };
                html.push_str(&format!(
                    "        <li class=\"step {status}\">{} [{status}] {}",
                    escape_html(&step.step),
                    escape_html(&step.message)
                ));
                if let Some(path) = &step.evidence {
                    let href = path.strip_prefix(run_dir).unwrap_or(path);
                    html.push_str(&format!(
                        "<div class=\"evidence\"><img src=\"{}\" alt=\"evidence\"></div>",
                        escape_html(&href.display().to_string())
                    ));
                }
                html.push_str("</li>\n");
            }
            html.push_str("    </ol>\n    <ul>\n");
            for entry in &test.logs {
                let level = match entry.level {
                    LogLevel::Info => "info",
                    LogLevel::Pass => "pass",
                    LogLevel::Fail => "fail",
                };
                html.push_str(&format!(
                    "        <li class=\"log {level}\">{} {level}: {}</li>\n",
                    entry.at.format("%H:%M:%S%.3f"),
                    escape_html(&entry.message)
                ));
            }
            html.push_str("    </ul>\n</div>\n");
        }

        html.push_str(
            r#"
<footer>
    <p>Generated by Storeflow</p>
</footer>
</body>
</html>
"#,
        );

        html
    }

    /// Render JUnit XML content
    #[must_use]
    pub fn render_junit(&self) -> String {
        let mut xml = String::new();

        xml.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        xml.push('\n');
        xml.push_str(&format!(
            r#"<testsuite name="{}" tests="{}" failures="{}" time="{:.3}">"#,
            escape_html(&self.title),
            self.tests.len(),
            self.failed_count(),
            (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
        ));
        xml.push('\n');

        for test in &self.tests {
            xml.push_str(&format!(
                r#"  <testcase name="{}" time="{:.3}">"#,
                escape_html(&test.name),
                test.duration_ms() as f64 / 1000.0
            ));
            xml.push('\n');
            if let Some(message) = test.first_failure() {
                xml.push_str(&format!(
                    r#"    <failure message="{}">{}</failure>"#,
                    escape_html(message),
                    escape_html(message)
                ));
                xml.push('\n');
            }
            xml.push_str("  </testcase>\n");
        }

        xml.push_str("</testsuite>\n");
        xml
    }
}

/// Escape HTML/XML special characters
fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
