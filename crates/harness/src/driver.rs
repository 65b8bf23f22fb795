//! Driver capability seam.
//!
//! The harness never talks to a concrete WebDriver implementation directly;
//! it drives anything implementing [`WebDriverLike`]. Production factories
//! (chromedriver/geckodriver transports) are external collaborators wired in
//! through [`DriverFactory`]; tests use the mocks in [`crate::testing`].

use async_trait::async_trait;

use crate::config::SessionConfig;
use crate::error::Result;

/// Minimal browser surface the lifecycle core depends on.
///
/// `title()` doubles as the liveness probe: it is the cheapest synchronous
/// read every WebDriver backend supports.
#[async_trait]
pub trait WebDriverLike: Send + Sync {
    /// Returns the current page title. Used as the liveness probe.
    async fn title(&self) -> Result<String>;

    /// Captures the visible viewport as PNG bytes.
    async fn screenshot(&self) -> Result<Vec<u8>>;

    /// Captures a single element, located by CSS selector, as PNG bytes.
    async fn element_screenshot(&self, selector: &str) -> Result<Vec<u8>>;

    /// Evaluates JavaScript in the page and returns the result as JSON.
    async fn execute_script(&self, script: &str) -> Result<serde_json::Value>;

    /// Resizes the window to the given dimensions in CSS pixels.
    async fn set_window_size(&self, width: u32, height: u32) -> Result<()>;

    /// Maximizes the window. Callers treat failure as non-fatal.
    async fn maximize_window(&self) -> Result<()>;

    /// Returns captured console log lines, or [`None`] when the backend does
    /// not expose the capability (varies by browser).
    async fn console_logs(&self) -> Result<Option<Vec<String>>>;

    /// Gracefully shuts down the underlying browser process.
    async fn quit(&self) -> Result<()>;
}

/// Creates driver instances from a session configuration.
///
/// Injection point for retry tests and for swapping transports without
/// touching the lifecycle code.
#[async_trait]
pub trait DriverFactory: Send + Sync {
    async fn create(&self, config: &SessionConfig) -> Result<Box<dyn WebDriverLike>>;
}
