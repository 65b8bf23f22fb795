//! Testing infrastructure for the lifecycle core.
//!
//! Provides mock implementations of [`WebDriverLike`] and [`DriverFactory`]
//! so session, capture, and lifecycle code can be exercised without spawning
//! actual browsers. Mocks share state through `Arc`, so a test can keep a
//! handle to a driver the harness owns and inspect it after the fact.
//!
//! # Example
//!
//! ```ignore
//! let factory = MockDriverFactory::new();
//! factory.fail_creations(2); // first two create() calls fail
//!
//! let manager = SessionManager::new(Arc::new(factory.clone()));
//! let session = manager.acquire(&SessionConfig::default()).await?;
//! assert_eq!(factory.created(), 1); // only the third attempt produced a driver
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::config::SessionConfig;
use crate::driver::{DriverFactory, WebDriverLike};
use crate::error::{HarnessError, Result};

#[derive(Debug)]
struct MockDriverState {
    title: String,
    alive: bool,
    /// Number of upcoming `title()` calls that fail before recovering.
    transient_title_failures: u32,
    screenshot_bytes: Vec<u8>,
    screenshot_delay: Duration,
    console_logs: Option<Vec<String>>,
    fail_maximize: bool,
    fail_quit: bool,
    quit_calls: u32,
    calls: Vec<String>,
}

impl Default for MockDriverState {
    fn default() -> Self {
        Self {
            title: "Mock Page".to_string(),
            alive: true,
            transient_title_failures: 0,
            // PNG signature so persisted artifacts look like real captures
            screenshot_bytes: vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A],
            screenshot_delay: Duration::ZERO,
            console_logs: Some(vec![]),
            fail_maximize: false,
            fail_quit: false,
            quit_calls: 0,
            calls: Vec::new(),
        }
    }
}

/// In-memory [`WebDriverLike`] double with scripted failures.
#[derive(Clone, Debug, Default)]
pub struct MockDriver {
    state: Arc<Mutex<MockDriverState>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the driver dead: every subsequent probe and capture fails.
    pub fn kill(&self) {
        self.state.lock().alive = false;
    }

    pub fn is_alive(&self) -> bool {
        self.state.lock().alive
    }

    /// Fails the next `count` calls to `title()`, then recovers.
    pub fn fail_titles(&self, count: u32) {
        self.state.lock().transient_title_failures = count;
    }

    pub fn set_title(&self, title: impl Into<String>) {
        self.state.lock().title = title.into();
    }

    pub fn set_screenshot_bytes(&self, bytes: Vec<u8>) {
        self.state.lock().screenshot_bytes = bytes;
    }

    /// Delays every capture, for exercising the screenshot timeout race.
    pub fn set_screenshot_delay(&self, delay: Duration) {
        self.state.lock().screenshot_delay = delay;
    }

    /// `None` models a backend without the console log capability.
    pub fn set_console_logs(&self, logs: Option<Vec<String>>) {
        self.state.lock().console_logs = logs;
    }

    pub fn set_fail_maximize(&self, fail: bool) {
        self.state.lock().fail_maximize = fail;
    }

    pub fn set_fail_quit(&self, fail: bool) {
        self.state.lock().fail_quit = fail;
    }

    pub fn quit_calls(&self) -> u32 {
        self.state.lock().quit_calls
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn was_called(&self, method: &str) -> bool {
        self.state
            .lock()
            .calls
            .iter()
            .any(|c| c.starts_with(method))
    }

    fn record(&self, call: impl Into<String>) {
        self.state.lock().calls.push(call.into());
    }

    fn check_alive(&self) -> Result<()> {
        if self.state.lock().alive {
            Ok(())
        } else {
            Err(HarnessError::DriverUnresponsive(
                "mock driver killed".to_string(),
            ))
        }
    }
}

#[async_trait]
impl WebDriverLike for MockDriver {
    async fn title(&self) -> Result<String> {
        self.record("title");
        {
            let mut state = self.state.lock();
            if state.transient_title_failures > 0 {
                state.transient_title_failures -= 1;
                return Err(HarnessError::DriverUnresponsive(
                    "mock title failure".to_string(),
                ));
            }
        }
        self.check_alive()?;
        Ok(self.state.lock().title.clone())
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        self.record("screenshot");
        self.check_alive()?;
        let (delay, bytes) = {
            let state = self.state.lock();
            (state.screenshot_delay, state.screenshot_bytes.clone())
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(bytes)
    }

    async fn element_screenshot(&self, selector: &str) -> Result<Vec<u8>> {
        self.record(format!("element_screenshot:{selector}"));
        self.screenshot().await
    }

    async fn execute_script(&self, script: &str) -> Result<serde_json::Value> {
        self.record(format!("execute_script:{script}"));
        self.check_alive()?;
        // Page extent queries get plausible dimensions; everything else null.
        if script.contains("scrollWidth") || script.contains("scrollHeight") {
            Ok(serde_json::json!({ "width": 1280, "height": 2400 }))
        } else {
            Ok(serde_json::Value::Null)
        }
    }

    async fn set_window_size(&self, width: u32, height: u32) -> Result<()> {
        self.record(format!("set_window_size:{width}x{height}"));
        self.check_alive()
    }

    async fn maximize_window(&self) -> Result<()> {
        self.record("maximize_window");
        if self.state.lock().fail_maximize {
            return Err(HarnessError::Driver("mock maximize failure".to_string()));
        }
        self.check_alive()
    }

    async fn console_logs(&self) -> Result<Option<Vec<String>>> {
        self.record("console_logs");
        self.check_alive()?;
        Ok(self.state.lock().console_logs.clone())
    }

    async fn quit(&self) -> Result<()> {
        self.record("quit");
        let mut state = self.state.lock();
        state.quit_calls += 1;
        state.alive = false;
        if state.fail_quit {
            return Err(HarnessError::Cleanup("mock quit failure".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MockFactoryState {
    /// Upcoming `create()` calls that fail outright.
    failing_creations: u32,
    /// Upcoming `create()` calls that hand out a driver whose first probe fails.
    dead_on_arrival: u32,
    /// Every handed-out driver fails `maximize_window()`.
    fail_maximize: bool,
    created: u32,
    drivers: Vec<MockDriver>,
}

/// [`DriverFactory`] double that scripts creation failures and keeps handles
/// to every driver it hands out.
#[derive(Clone, Debug, Default)]
pub struct MockDriverFactory {
    state: Arc<Mutex<MockFactoryState>>,
}

impl MockDriverFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the next `count` create() calls with a creation error.
    pub fn fail_creations(&self, count: u32) {
        self.state.lock().failing_creations = count;
    }

    /// The next `count` created drivers fail their first liveness probe.
    pub fn fail_first_probes(&self, count: u32) {
        self.state.lock().dead_on_arrival = count;
    }

    /// Every driver handed out from now on fails `maximize_window()`.
    pub fn fail_maximize(&self, fail: bool) {
        self.state.lock().fail_maximize = fail;
    }

    /// Total number of successful create() calls so far.
    pub fn created(&self) -> u32 {
        self.state.lock().created
    }

    /// Handles to every driver handed out, in creation order.
    pub fn drivers(&self) -> Vec<MockDriver> {
        self.state.lock().drivers.clone()
    }

    /// Total quit() calls across all handed-out drivers.
    pub fn total_quits(&self) -> u32 {
        self.state
            .lock()
            .drivers
            .iter()
            .map(MockDriver::quit_calls)
            .sum()
    }
}

#[async_trait]
impl DriverFactory for MockDriverFactory {
    async fn create(&self, _config: &SessionConfig) -> Result<Box<dyn WebDriverLike>> {
        let driver = {
            let mut state = self.state.lock();
            if state.failing_creations > 0 {
                state.failing_creations -= 1;
                return Err(HarnessError::SessionCreation(
                    "mock creation failure".to_string(),
                ));
            }
            let driver = MockDriver::new();
            if state.dead_on_arrival > 0 {
                state.dead_on_arrival -= 1;
                driver.fail_titles(u32::MAX);
            }
            if state.fail_maximize {
                driver.set_fail_maximize(true);
            }
            state.created += 1;
            state.drivers.push(driver.clone());
            driver
        };
        Ok(Box::new(driver))
    }
}
