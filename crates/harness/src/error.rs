use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, HarnessError>;

#[derive(Debug, Error)]
pub enum HarnessError {
    /// Browser kind not recognized. Never retried.
    #[error("unsupported browser: {0}")]
    UnsupportedBrowser(String),

    #[error("session creation failed: {0}")]
    SessionCreation(String),

    #[error("timeout after {ms}ms: {operation}")]
    Timeout { ms: u64, operation: String },

    /// Liveness probe failed; the driver is considered dead.
    #[error("driver unresponsive: {0}")]
    DriverUnresponsive(String),

    #[error("screenshot timed out after {ms}ms: {name}")]
    ScreenshotTimeout { ms: u64, name: String },

    #[error("screenshot failed at {path}")]
    Screenshot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Generic driver command failure surfaced by a collaborator.
    #[error("driver command failed: {0}")]
    Driver(String),

    #[error("metrics report failed: {0}")]
    Metrics(String),

    #[error("cleanup failed: {0}")]
    Cleanup(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl HarnessError {
    /// True for errors that mark the driver itself dead, as opposed to a
    /// failed operation on a live driver.
    pub fn is_driver_dead(&self) -> bool {
        matches!(self, HarnessError::DriverUnresponsive(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            HarnessError::Timeout { .. } | HarnessError::ScreenshotTimeout { .. }
        )
    }
}
