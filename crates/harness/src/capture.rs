//! Failure diagnostics: screenshots and artifact housekeeping.
//!
//! Captures are tied to a scenario but never decide its outcome: every error
//! raised here is meant to be logged and swallowed by the caller. Artifacts
//! land under one directory as `{prefix}_{timestamp}[_{suffix}].png` with a
//! millisecond-resolution timestamp baked into the filename, which also lets
//! cleanup age files out without trusting filesystem mtimes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{HarnessError, Result};
use crate::retry::deadline;
use crate::session::Session;

pub const DEFAULT_CAPTURE_TIMEOUT: Duration = Duration::from_secs(10);
/// Delay after viewport changes or page mutations before capturing.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(500);

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S-%3f";
/// `2026-08-25_13-45-01-123` is always 23 characters.
const TIMESTAMP_LEN: usize = 23;

/// Why an artifact was captured.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Failure,
    Manual,
    FullPage,
    Comparison,
}

/// Metadata for one persisted capture.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Artifact {
    pub filename: String,
    pub path: PathBuf,
    pub timestamp: DateTime<Utc>,
    pub scenario: String,
    pub kind: ArtifactKind,
}

/// Persists screenshots and prunes old ones.
#[derive(Clone, Debug)]
pub struct DiagnosticCapture {
    artifact_dir: PathBuf,
    capture_timeout: Duration,
    settle_delay: Duration,
}

impl DiagnosticCapture {
    /// Creates the capture helper and ensures the artifact directory exists.
    pub fn new(artifact_dir: impl Into<PathBuf>) -> Result<Self> {
        let artifact_dir = artifact_dir.into();
        std::fs::create_dir_all(&artifact_dir)?;
        Ok(Self {
            artifact_dir,
            capture_timeout: DEFAULT_CAPTURE_TIMEOUT,
            settle_delay: DEFAULT_SETTLE_DELAY,
        })
    }

    pub fn with_capture_timeout(mut self, timeout: Duration) -> Self {
        self.capture_timeout = timeout;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn artifact_dir(&self) -> &Path {
        &self.artifact_dir
    }

    /// Timestamped, sanitized filename for a capture taken now.
    pub fn generate_filename(&self, prefix: &str, suffix: Option<&str>) -> String {
        filename_at(prefix, suffix, Utc::now())
    }

    /// Viewport screenshot under a caller-chosen name.
    pub async fn take_screenshot(&self, session: &Session, name: &str) -> Result<Artifact> {
        let driver = live_driver(session)?;
        let bytes = deadline(self.capture_timeout, "screenshot", driver.screenshot())
            .await
            .map_err(|err| self.as_screenshot_timeout(err, name))?;
        self.persist(name, None, ArtifactKind::Manual, name, &bytes)
    }

    /// Failure screenshot for a scenario; the filename is derived from the
    /// sanitized scenario name.
    pub async fn take_failure_screenshot(
        &self,
        session: &Session,
        scenario: &str,
    ) -> Result<Artifact> {
        let driver = live_driver(session)?;
        let bytes = deadline(self.capture_timeout, "failure screenshot", driver.screenshot())
            .await
            .map_err(|err| self.as_screenshot_timeout(err, scenario))?;
        self.persist(scenario, Some("failure"), ArtifactKind::Failure, scenario, &bytes)
    }

    /// Screenshot of one element located by CSS selector.
    pub async fn take_element_screenshot(
        &self,
        session: &Session,
        selector: &str,
        name: &str,
    ) -> Result<Artifact> {
        let driver = live_driver(session)?;
        let bytes = deadline(
            self.capture_timeout,
            "element screenshot",
            driver.element_screenshot(selector),
        )
        .await
        .map_err(|err| self.as_screenshot_timeout(err, name))?;
        self.persist(name, Some("element"), ArtifactKind::Manual, name, &bytes)
    }

    /// Full-page screenshot: measures the page extents via script, resizes
    /// the viewport to fit, waits for layout to settle, then captures.
    pub async fn take_full_page_screenshot(
        &self,
        session: &Session,
        name: &str,
    ) -> Result<Artifact> {
        let driver = live_driver(session)?;

        let extents = driver
            .execute_script(
                "return {width: document.documentElement.scrollWidth, \
                 height: document.documentElement.scrollHeight};",
            )
            .await?;
        let width = extents.get("width").and_then(|v| v.as_u64()).unwrap_or(1920) as u32;
        let height = extents.get("height").and_then(|v| v.as_u64()).unwrap_or(1080) as u32;

        driver.set_window_size(width, height).await?;
        tokio::time::sleep(self.settle_delay).await;

        let bytes = deadline(self.capture_timeout, "full page screenshot", driver.screenshot())
            .await
            .map_err(|err| self.as_screenshot_timeout(err, name))?;
        self.persist(name, Some("fullpage"), ArtifactKind::FullPage, name, &bytes)
    }

    /// Captures the page, runs a caller-supplied action, waits for the page
    /// to settle, and captures again. Returns (before, after).
    pub async fn take_comparison_screenshots<F, Fut>(
        &self,
        session: &Session,
        name: &str,
        action: F,
    ) -> Result<(Artifact, Artifact)>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        let driver = live_driver(session)?;

        let before_bytes = deadline(self.capture_timeout, "comparison before", driver.screenshot())
            .await
            .map_err(|err| self.as_screenshot_timeout(err, name))?;
        let before =
            self.persist(name, Some("before"), ArtifactKind::Comparison, name, &before_bytes)?;

        action().await?;
        tokio::time::sleep(self.settle_delay).await;

        let after_bytes = deadline(self.capture_timeout, "comparison after", driver.screenshot())
            .await
            .map_err(|err| self.as_screenshot_timeout(err, name))?;
        let after =
            self.persist(name, Some("after"), ArtifactKind::Comparison, name, &after_bytes)?;

        Ok((before, after))
    }

    /// Deletes artifacts older than `max_age_days` and returns how many were
    /// removed. Age comes from the timestamp baked into the filename, with
    /// filesystem mtime as a fallback for foreign files.
    pub fn cleanup_old_screenshots(&self, max_age_days: u64) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::days(max_age_days as i64);
        let entries = std::fs::read_dir(&self.artifact_dir)
            .map_err(|err| HarnessError::Cleanup(format!("reading artifact dir: {err}")))?;

        let mut deleted = 0;
        for entry in entries {
            let Ok(entry) = entry else { continue };
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("png") {
                continue;
            }
            let Some(created) = artifact_timestamp(&path) else {
                continue;
            };
            if created < cutoff {
                match std::fs::remove_file(&path) {
                    Ok(()) => {
                        debug!(
                            target = "gauntlet.capture",
                            path = %path.display(),
                            "deleted expired artifact"
                        );
                        deleted += 1;
                    }
                    Err(err) => warn!(
                        target = "gauntlet.capture",
                        path = %path.display(),
                        error = %err,
                        "failed to delete expired artifact"
                    ),
                }
            }
        }
        Ok(deleted)
    }

    fn persist(
        &self,
        prefix: &str,
        suffix: Option<&str>,
        kind: ArtifactKind,
        scenario: &str,
        bytes: &[u8],
    ) -> Result<Artifact> {
        let timestamp = Utc::now();
        let filename = filename_at(prefix, suffix, timestamp);
        let path = self.artifact_dir.join(&filename);

        std::fs::write(&path, bytes).map_err(|source| HarnessError::Screenshot {
            path: path.clone(),
            source,
        })?;
        debug!(
            target = "gauntlet.capture",
            path = %path.display(),
            bytes = bytes.len(),
            "artifact persisted"
        );

        Ok(Artifact {
            filename,
            path,
            timestamp,
            scenario: scenario.to_string(),
            kind,
        })
    }

    fn as_screenshot_timeout(&self, err: HarnessError, name: &str) -> HarnessError {
        match err {
            HarnessError::Timeout { ms, .. } => HarnessError::ScreenshotTimeout {
                ms,
                name: sanitize(name),
            },
            other => other,
        }
    }
}

fn live_driver(session: &Session) -> Result<&dyn crate::driver::WebDriverLike> {
    session.driver().ok_or_else(|| {
        HarnessError::DriverUnresponsive(format!(
            "session {} has no live driver to capture from",
            session.id()
        ))
    })
}

/// Lowercases, maps every non-alphanumeric run to a single `_`, and trims
/// leading/trailing underscores.
pub fn sanitize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_was_sep = true; // suppresses a leading underscore
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('_');
            last_was_sep = true;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

/// Pure core of [`DiagnosticCapture::generate_filename`]; deterministic for
/// a fixed timestamp.
pub fn filename_at(prefix: &str, suffix: Option<&str>, at: DateTime<Utc>) -> String {
    let stamp = at.format(TIMESTAMP_FORMAT);
    match suffix {
        Some(suffix) => format!("{}_{stamp}_{}.png", sanitize(prefix), sanitize(suffix)),
        None => format!("{}_{stamp}.png", sanitize(prefix)),
    }
}

/// Recovers the capture time from a filename produced by [`filename_at`],
/// falling back to the file's mtime.
fn artifact_timestamp(path: &Path) -> Option<DateTime<Utc>> {
    let stem = path.file_stem()?.to_str()?;
    for (idx, _) in stem.match_indices('_') {
        let start = idx + 1;
        let Some(candidate) = stem.get(start..start + TIMESTAMP_LEN) else {
            break;
        };
        if let Ok(naive) = NaiveDateTime::parse_from_str(candidate, TIMESTAMP_FORMAT) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    let modified = path.metadata().ok()?.modified().ok()?;
    Some(DateTime::<Utc>::from(modified))
}
