//! Browser session lifecycle core for acceptance-test suites.
//!
//! One isolated browser session per scenario, retried acquisition under
//! transient failure, liveness verification, diagnostic capture on failure,
//! and cross-scenario metrics aggregation. The central guarantee is
//! exactly-once release: whatever path a scenario exits through — clean
//! pass, assertion failure, dead driver, timeout — its session is released
//! once, and diagnostics/metrics never mask the original outcome.
//!
//! # Components
//!
//! - [`session::SessionManager`] — creates, probes, and releases sessions
//!   with a retry policy under a hard acquisition deadline.
//! - [`capture::DiagnosticCapture`] — persists screenshots tied to a
//!   scenario, independent of pass/fail outcome.
//! - [`metrics::MetricsAggregator`] — suite-wide counters, histograms, and
//!   gauges with a derived JSON summary and a text exposition.
//! - [`lifecycle::LifecycleController`] — orchestrates the Before/After
//!   hooks around each scenario body and guarantees release.
//!
//! # Example
//!
//! ```ignore
//! let harness = SuiteHarness::start(factory, SuiteConfig::from_env(), SessionConfig::from_env()?)?;
//! let controller = harness.controller();
//!
//! let mut ctx = ScenarioContext::new("user can log in", vec!["@smoke".into()]);
//! if controller.before_scenario(&mut ctx).await.is_ok() {
//!     // scenario body runs against ctx.session()
//!     ctx.scenario.mark_passed();
//! }
//! controller.after_scenario(&mut ctx).await;
//!
//! harness.finish();
//! ```

pub mod capture;
pub mod config;
pub mod driver;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod metrics;
pub mod retry;
pub mod server;
pub mod session;
pub mod testing;

pub use capture::{Artifact, ArtifactKind, DiagnosticCapture};
pub use config::{
    BrowserConfig, BrowserKind, ChromeConfig, FirefoxConfig, SessionConfig, SuiteConfig,
};
pub use driver::{DriverFactory, WebDriverLike};
pub use error::{HarnessError, Result};
pub use lifecycle::{
    LifecycleController, LifecycleState, Scenario, ScenarioContext, ScenarioStatus, SuiteHarness,
};
pub use metrics::{MetricsAggregator, TestSummary};
pub use retry::RetryPolicy;
pub use session::{Liveness, Session, SessionManager};
