//! Scenario lifecycle orchestration.
//!
//! [`LifecycleController`] owns the Before/After hook sequence around every
//! scenario body: acquire a session, hand it to the scenario, and afterwards
//! re-probe, capture diagnostics on failure, record metrics, and release.
//! Release sits on a guaranteed-final path — whatever the earlier steps do,
//! each acquired session is released exactly once. Diagnostics and metrics
//! failures are logged and swallowed so they can never mask the scenario's
//! own outcome.
//!
//! Per-scenario state machine:
//!
//! ```text
//! Unbound -> Acquiring -> Bound -> Completing -> Released
//!                |                                  ^
//!                `------ acquisition failed --------'
//! ```
//!
//! `Released` is terminal; running the After hook again is a no-op.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::capture::{ArtifactKind, DiagnosticCapture};
use crate::config::{SessionConfig, SuiteConfig};
use crate::driver::DriverFactory;
use crate::error::{HarnessError, Result};
use crate::metrics::MetricsAggregator;
use crate::retry::deadline;
use crate::session::{Session, SessionManager};

pub const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(120);

/// Final result of a scenario.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ScenarioStatus {
    #[default]
    Pending,
    Passed,
    Failed,
    /// The scenario never ran, e.g. session acquisition failed.
    Errored,
}

/// One executable test case with its timing and outcome.
#[derive(Debug)]
pub struct Scenario {
    pub name: String,
    pub tags: Vec<String>,
    pub status: ScenarioStatus,
    started_at: Option<DateTime<Utc>>,
    started: Option<Instant>,
    duration: Option<Duration>,
}

impl Scenario {
    pub fn new(name: impl Into<String>, tags: Vec<String>) -> Self {
        Self {
            name: name.into(),
            tags,
            status: ScenarioStatus::Pending,
            started_at: None,
            started: None,
            duration: None,
        }
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Duration between start and finish; zero if the body never ran.
    pub fn duration(&self) -> Duration {
        self.duration.unwrap_or(Duration::ZERO)
    }

    pub fn mark_passed(&mut self) {
        self.status = ScenarioStatus::Passed;
    }

    pub fn mark_failed(&mut self) {
        self.status = ScenarioStatus::Failed;
    }

    pub fn mark_errored(&mut self) {
        self.status = ScenarioStatus::Errored;
    }

    fn start(&mut self) {
        self.started_at = Some(Utc::now());
        self.started = Some(Instant::now());
    }

    fn finish(&mut self) -> Duration {
        let elapsed = self
            .started
            .map(|s| s.elapsed())
            .unwrap_or(Duration::ZERO);
        self.duration = Some(elapsed);
        elapsed
    }
}

/// Per-scenario binding state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LifecycleState {
    #[default]
    Unbound,
    Acquiring,
    Bound,
    Completing,
    Released,
}

/// A scenario plus its (at most one) bound session and lifecycle state.
#[derive(Debug)]
pub struct ScenarioContext {
    pub scenario: Scenario,
    session: Option<Session>,
    state: LifecycleState,
    console_logs: Vec<String>,
}

impl ScenarioContext {
    pub fn new(name: impl Into<String>, tags: Vec<String>) -> Self {
        Self {
            scenario: Scenario::new(name, tags),
            session: None,
            state: LifecycleState::Unbound,
            console_logs: Vec::new(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// The bound session, for the scenario body. `None` before the Before
    /// hook ran, after release, or when acquisition failed.
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn session_mut(&mut self) -> Option<&mut Session> {
        self.session.as_mut()
    }

    /// Console lines collected by the After hook, when the browser exposes
    /// the capability.
    pub fn console_logs(&self) -> &[String] {
        &self.console_logs
    }
}

/// Orchestrates Before/After hooks for scenarios.
#[derive(Clone)]
pub struct LifecycleController {
    manager: Arc<SessionManager>,
    capture: Arc<DiagnosticCapture>,
    metrics: Arc<MetricsAggregator>,
    session_config: SessionConfig,
    hook_timeout: Duration,
}

impl LifecycleController {
    pub fn new(
        manager: Arc<SessionManager>,
        capture: Arc<DiagnosticCapture>,
        metrics: Arc<MetricsAggregator>,
        session_config: SessionConfig,
    ) -> Self {
        Self {
            manager,
            capture,
            metrics,
            session_config,
            hook_timeout: DEFAULT_HOOK_TIMEOUT,
        }
    }

    pub fn with_hook_timeout(mut self, timeout: Duration) -> Self {
        self.hook_timeout = timeout;
        self
    }

    /// Before hook: acquires a session and binds it into the context.
    ///
    /// Failure is scenario-fatal — the scenario is marked
    /// [`ScenarioStatus::Errored`] and its body must never run.
    pub async fn before_scenario(&self, ctx: &mut ScenarioContext) -> Result<()> {
        ctx.state = LifecycleState::Acquiring;
        debug!(
            target = "gauntlet.lifecycle",
            scenario = %ctx.scenario.name,
            "before hook: acquiring session"
        );

        let acquired = deadline(
            self.hook_timeout,
            "before hook",
            self.manager.acquire(&self.session_config),
        )
        .await;

        match acquired {
            Ok(session) => {
                ctx.session = Some(session);
                ctx.state = LifecycleState::Bound;
                ctx.scenario.start();
                self.metrics
                    .record_test_start(&ctx.scenario.name, self.session_config.kind());
                Ok(())
            }
            Err(err) => {
                ctx.scenario.mark_errored();
                self.metrics.record_error(error_label(&err));
                warn!(
                    target = "gauntlet.lifecycle",
                    scenario = %ctx.scenario.name,
                    error = %err,
                    "before hook failed, scenario will not run"
                );
                Err(err)
            }
        }
    }

    /// After hook, run unconditionally once the scenario body has finished
    /// (or was skipped). Never fails; the guaranteed-final release runs even
    /// when the bounded diagnostic steps time out.
    pub async fn after_scenario(&self, ctx: &mut ScenarioContext) {
        if ctx.state == LifecycleState::Released {
            debug!(
                target = "gauntlet.lifecycle",
                scenario = %ctx.scenario.name,
                "after hook on released scenario ignored"
            );
            return;
        }
        ctx.state = LifecycleState::Completing;

        let bounded = deadline(self.hook_timeout, "after hook", async {
            self.run_after_steps(ctx).await;
            Ok(())
        })
        .await;
        if let Err(err) = bounded {
            warn!(
                target = "gauntlet.lifecycle",
                error = %err,
                "after hook exceeded its bound, proceeding to release"
            );
            self.metrics.record_error("after_hook_timeout");
        }

        // Guaranteed-final: the one place sessions are released.
        if let Some(mut session) = ctx.session.take() {
            self.manager.release(&mut session).await;
        }
        ctx.state = LifecycleState::Released;
    }

    async fn run_after_steps(&self, ctx: &mut ScenarioContext) {
        // 1. Re-probe: the driver may have died mid-scenario. A dead driver
        //    must not produce a secondary failure that obscures the original
        //    one, so the screenshot is skipped entirely.
        let alive = match ctx.session.as_mut() {
            Some(session) => self.manager.probe(session).await,
            None => false,
        };

        if !alive && ctx.session.is_some() {
            warn!(
                target = "gauntlet.lifecycle",
                scenario = %ctx.scenario.name,
                "driver unresponsive at scenario end, skipping screenshot"
            );
            self.metrics.record_error("driver_unresponsive");
            if ctx.scenario.status != ScenarioStatus::Errored {
                ctx.scenario.mark_failed();
            }
        }

        // 2. Failure screenshot, only with a live driver.
        if let Some(session) = ctx
            .session
            .as_ref()
            .filter(|_| alive && ctx.scenario.status == ScenarioStatus::Failed)
        {
            match self
                .capture
                .take_failure_screenshot(session, &ctx.scenario.name)
                .await
            {
                Ok(artifact) => {
                    info!(
                        target = "gauntlet.lifecycle",
                        scenario = %ctx.scenario.name,
                        artifact = %artifact.path.display(),
                        "failure screenshot captured"
                    );
                    self.metrics.record_screenshot(ArtifactKind::Failure);
                }
                Err(err) => {
                    warn!(
                        target = "gauntlet.lifecycle",
                        scenario = %ctx.scenario.name,
                        error = %err,
                        "failure screenshot could not be captured"
                    );
                    self.metrics.record_error("screenshot");
                }
            }
        }

        // 3. Console logs, best-effort; a backend without the capability is
        //    not an error.
        if alive {
            if let Some(session) = ctx.session.as_ref() {
                if let Some(driver) = session.driver() {
                    match driver.console_logs().await {
                        Ok(Some(lines)) => {
                            debug!(
                                target = "gauntlet.lifecycle",
                                scenario = %ctx.scenario.name,
                                lines = lines.len(),
                                "console logs collected"
                            );
                            ctx.console_logs = lines;
                        }
                        Ok(None) => {}
                        Err(err) => debug!(
                            target = "gauntlet.lifecycle",
                            error = %err,
                            "console log collection failed"
                        ),
                    }
                }
            }
        }

        // 4. Record the outcome. Scenarios that never started (acquisition
        //    failed) were already counted in errors_total and get no
        //    completion sample.
        if ctx.scenario.started_at().is_some() {
            let duration = ctx.scenario.finish();
            self.metrics.record_test_completion(
                &ctx.scenario.name,
                self.session_config.kind(),
                ctx.scenario.status == ScenarioStatus::Passed,
                duration.as_secs_f64(),
            );
        }
    }

}

fn error_label(err: &HarnessError) -> &'static str {
    match err {
        HarnessError::UnsupportedBrowser(_) => "unsupported_browser",
        HarnessError::Timeout { .. } => "timeout",
        HarnessError::DriverUnresponsive(_) => "driver_unresponsive",
        HarnessError::ScreenshotTimeout { .. } | HarnessError::Screenshot { .. } => "screenshot",
        HarnessError::Metrics(_) => "metrics",
        HarnessError::Cleanup(_) => "cleanup",
        _ => "session_creation",
    }
}

/// Suite-level bootstrap: constructs the shared collaborators once, before
/// any scenario, and tears them down after the last one.
pub struct SuiteHarness {
    suite_config: SuiteConfig,
    session_config: SessionConfig,
    manager: Arc<SessionManager>,
    capture: Arc<DiagnosticCapture>,
    metrics: Arc<MetricsAggregator>,
}

impl SuiteHarness {
    /// Once-before-all hook: ensures artifact/report directories exist,
    /// initializes the aggregator, and constructs the session manager.
    pub fn start(
        factory: Arc<dyn DriverFactory>,
        suite_config: SuiteConfig,
        session_config: SessionConfig,
    ) -> Result<Self> {
        let capture = Arc::new(DiagnosticCapture::new(&suite_config.artifact_dir)?);
        std::fs::create_dir_all(&suite_config.report_dir)?;

        let metrics = Arc::new(MetricsAggregator::new(&suite_config));
        metrics.record_suite_start();
        let manager = Arc::new(SessionManager::new(factory));

        info!(
            target = "gauntlet.lifecycle",
            environment = %suite_config.environment,
            browser = %session_config.kind(),
            "suite started"
        );

        Ok(Self {
            suite_config,
            session_config,
            manager,
            capture,
            metrics,
        })
    }

    pub fn controller(&self) -> LifecycleController {
        LifecycleController::new(
            self.manager.clone(),
            self.capture.clone(),
            self.metrics.clone(),
            self.session_config.clone(),
        )
    }

    pub fn manager(&self) -> Arc<SessionManager> {
        self.manager.clone()
    }

    pub fn capture(&self) -> Arc<DiagnosticCapture> {
        self.capture.clone()
    }

    pub fn metrics(&self) -> Arc<MetricsAggregator> {
        self.metrics.clone()
    }

    /// Once-after-all hook: writes the final metrics report and surfaces
    /// any session accounting mismatch. Report failures are logged, never
    /// raised — observability must not break the suite.
    pub fn finish(&self) {
        match self.metrics.generate_report(&self.suite_config.report_dir) {
            Ok(path) => info!(
                target = "gauntlet.lifecycle",
                report = %path.display(),
                "suite finished"
            ),
            Err(err) => warn!(
                target = "gauntlet.lifecycle",
                error = %err,
                "final metrics report failed"
            ),
        }

        let acquired = self.manager.acquired();
        let released = self.manager.released();
        if acquired != released {
            warn!(
                target = "gauntlet.lifecycle",
                acquired,
                released,
                "session accounting mismatch at suite end"
            );
        }
    }
}
