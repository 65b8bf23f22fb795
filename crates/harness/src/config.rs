//! Session and suite configuration.
//!
//! Per-browser options are a tagged [`BrowserConfig`] enum rather than a
//! free-form capability map; every variant produces arguments for one common
//! session-construction path. Environment parsing is deliberately thin: the
//! surrounding runner owns real configuration, these helpers only read the
//! conventional variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, Result};

/// Browser engine driving a session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserKind {
    #[default]
    Chrome,
    Firefox,
}

impl std::fmt::Display for BrowserKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrowserKind::Chrome => write!(f, "chrome"),
            BrowserKind::Firefox => write!(f, "firefox"),
        }
    }
}

impl FromStr for BrowserKind {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chrome" => Ok(BrowserKind::Chrome),
            "firefox" => Ok(BrowserKind::Firefox),
            other => Err(HarnessError::UnsupportedBrowser(other.to_string())),
        }
    }
}

/// Chrome-specific launch options.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChromeConfig {
    pub binary: Option<PathBuf>,
    pub args: Vec<String>,
}

/// Firefox-specific launch options.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FirefoxConfig {
    pub binary: Option<PathBuf>,
    pub args: Vec<String>,
    pub profile: Option<PathBuf>,
}

/// Tagged per-browser options; all variants satisfy the same
/// session-construction contract.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "browser", rename_all = "lowercase")]
pub enum BrowserConfig {
    Chrome(ChromeConfig),
    Firefox(FirefoxConfig),
}

impl BrowserConfig {
    pub fn kind(&self) -> BrowserKind {
        match self {
            BrowserConfig::Chrome(_) => BrowserKind::Chrome,
            BrowserConfig::Firefox(_) => BrowserKind::Firefox,
        }
    }

    /// Launch arguments for the underlying driver, headless flags included.
    pub fn launch_args(&self, headless: bool) -> Vec<String> {
        match self {
            BrowserConfig::Chrome(cfg) => {
                let mut args = vec![
                    "--no-sandbox".to_string(),
                    "--disable-dev-shm-usage".to_string(),
                ];
                if headless {
                    args.push("--headless=new".to_string());
                }
                args.extend(cfg.args.iter().cloned());
                args
            }
            BrowserConfig::Firefox(cfg) => {
                let mut args = Vec::new();
                if headless {
                    args.push("-headless".to_string());
                }
                args.extend(cfg.args.iter().cloned());
                args
            }
        }
    }
}

impl From<BrowserKind> for BrowserConfig {
    fn from(kind: BrowserKind) -> Self {
        match kind {
            BrowserKind::Chrome => BrowserConfig::Chrome(ChromeConfig::default()),
            BrowserKind::Firefox => BrowserConfig::Firefox(FirefoxConfig::default()),
        }
    }
}

/// Everything needed to construct one browser session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(flatten)]
    pub browser: BrowserConfig,
    pub headless: bool,
    /// Page load timeout in milliseconds.
    pub page_load_timeout_ms: u64,
    /// Script execution timeout in milliseconds.
    pub script_timeout_ms: u64,
    /// Implicit element wait in milliseconds.
    pub implicit_wait_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            browser: BrowserConfig::Chrome(ChromeConfig::default()),
            headless: true,
            page_load_timeout_ms: 30_000,
            script_timeout_ms: 30_000,
            implicit_wait_ms: 10_000,
        }
    }
}

impl SessionConfig {
    pub fn new(browser: BrowserConfig) -> Self {
        Self {
            browser,
            ..Self::default()
        }
    }

    /// Read `BROWSER` and `HEADLESS` from the environment; unset variables
    /// fall back to defaults, an unknown `BROWSER` value is an error.
    pub fn from_env() -> Result<Self> {
        let kind = match std::env::var("BROWSER") {
            Ok(value) => value.parse::<BrowserKind>()?,
            Err(_) => BrowserKind::default(),
        };
        let headless = std::env::var("HEADLESS")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        Ok(Self {
            browser: kind.into(),
            headless,
            ..Self::default()
        })
    }

    pub fn kind(&self) -> BrowserKind {
        self.browser.kind()
    }

    pub fn page_load_timeout(&self) -> Duration {
        Duration::from_millis(self.page_load_timeout_ms)
    }

    pub fn script_timeout(&self) -> Duration {
        Duration::from_millis(self.script_timeout_ms)
    }

    pub fn implicit_wait(&self) -> Duration {
        Duration::from_millis(self.implicit_wait_ms)
    }
}

/// Suite-wide settings: artifact locations and the labels attached to every
/// recorded metric.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SuiteConfig {
    pub artifact_dir: PathBuf,
    pub report_dir: PathBuf,
    pub environment: String,
    pub build_number: String,
    pub git_branch: String,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            artifact_dir: PathBuf::from("target/artifacts/screenshots"),
            report_dir: PathBuf::from("target/artifacts/reports"),
            environment: "local".to_string(),
            build_number: "dev".to_string(),
            git_branch: "unknown".to_string(),
        }
    }
}

impl SuiteConfig {
    /// Read `TEST_ENVIRONMENT`, `BUILD_NUMBER`, and `GIT_BRANCH`, keeping
    /// defaults for anything unset.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            environment: std::env::var("TEST_ENVIRONMENT").unwrap_or(defaults.environment),
            build_number: std::env::var("BUILD_NUMBER").unwrap_or(defaults.build_number),
            git_branch: std::env::var("GIT_BRANCH").unwrap_or(defaults.git_branch),
            ..defaults
        }
    }

    pub fn with_artifact_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifact_dir = dir.into();
        self
    }

    pub fn with_report_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.report_dir = dir.into();
        self
    }
}
