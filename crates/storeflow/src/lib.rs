//! Storeflow: resilient browser journeys for storefront regression suites
//!
//! Storeflow drives a browser session through multi-step shopping journeys
//! (login, add to cart, checkout, receipt download) on a dynamic storefront
//! and produces a timestamped HTML/JSON/JUnit report per run.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                    STOREFLOW Architecture                      │
//! ├───────────────────────────────────────────────────────────────┤
//! │   ┌──────────┐   ┌──────────┐   ┌────────────┐   ┌─────────┐  │
//! │   │ Journey  │──►│ Poller + │──►│ Dispatcher │──►│ Session │  │
//! │   │ (steps)  │   │ Locators │   │ direct/js  │   │ (CDP)   │  │
//! │   └────┬─────┘   └──────────┘   └────────────┘   └─────────┘  │
//! │        │ outcomes, evidence                                    │
//! │        ▼                                                       │
//! │   ┌──────────────────┐                                         │
//! │   │ ReportPipeline   │──► report.html / report.json / junit.xml│
//! │   └──────────────────┘                                         │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use storeflow::{MockSession, ReportPipeline, Storefront, SuiteConfig};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Storefront::new(SuiteConfig::default());
//! let pipeline = ReportPipeline::shared("target/reports");
//! let session = MockSession::new();
//!
//! let mut ctx = pipeline.begin_test("home page loads")?;
//! let report = store.home_page_loads().run(&session, &mut ctx).await;
//! assert!(report.is_success() || report.failed_step().is_some());
//! let _status = ctx.finish();
//!
//! if let Some(summary) = pipeline.end_run()? {
//!     println!("report: {}", summary.html.display());
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
// Lints are configured in workspace Cargo.toml [workspace.lints.clippy]

#[allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]
pub mod error;

#[allow(clippy::missing_errors_doc)]
pub mod config;
pub mod logging;

/// Session contract and the scripted in-memory session
#[allow(clippy::missing_errors_doc, clippy::must_use_candidate)]
pub mod session;

pub mod locator;

/// Condition polling
#[allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]
pub mod wait;

pub mod download;

#[allow(clippy::missing_errors_doc)]
pub mod dispatch;

/// Journeys and steps
#[allow(
    clippy::missing_errors_doc,
    clippy::must_use_candidate,
    clippy::too_many_lines
)]
pub mod journey;

#[allow(
    clippy::missing_errors_doc,
    clippy::cast_precision_loss,
    clippy::too_many_lines
)]
pub mod report;

pub mod storefront;

/// Chromium session over CDP
#[cfg(feature = "browser")]
#[allow(clippy::missing_errors_doc)]
pub mod browser;

pub use config::SuiteConfig;
pub use dispatch::{ActionOutcome, DispatchMode, DispatchPolicy, Dispatcher};
pub use download::{await_download, clear_download_dir, DownloadSettings, DownloadStable, DownloadedFile};
pub use error::{
    AttemptError, ConfigError, DispatchError, ReportError, SessionError, SessionResult, StepError,
    StorefrontError, StorefrontResult, TimeoutFailure, WaitFailure,
};
pub use journey::{run_parallel, Journey, JourneyReport, JourneyState, Step, StepAction};
pub use locator::{resolve, LocatorChain, Resolution, ResolvedElement, Selector};
pub use logging::{LogFormat, Verbosity};
pub use report::{
    ReportPipeline, ReportPhase, RunReport, RunSummary, StepOutcome, StepStatus, TestContext,
    TestRecord, TestStatus,
};
pub use session::{ElementHandle, Interaction, MockEffect, MockElement, MockSession, Session};
pub use storefront::{ShippingDetails, Storefront};
pub use wait::{
    await_condition, text_snapshot, DynCondition, Poller, Probe, Satisfied, TextSnapshot,
    WaitCondition, WaitOptions,
};

#[cfg(feature = "browser")]
pub use browser::{ChromiumSession, LaunchSettings};
