//! Session acquisition and release.
//!
//! One [`Session`] wraps one live browser process and is owned by exactly
//! one scenario. The [`SessionManager`] is the only component that creates
//! or destroys sessions: acquisition retries transient failures under a hard
//! wall-clock deadline, and release is idempotent so every exit path can
//! call it unconditionally.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::{BrowserKind, SessionConfig};
use crate::driver::{DriverFactory, WebDriverLike};
use crate::error::{HarnessError, Result};
use crate::retry::{RetryPolicy, deadline};

pub const DEFAULT_ACQUIRE_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Liveness of a session, only ever changed by an explicit probe or release.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Liveness {
    Healthy,
    /// A liveness probe failed. The driver handle is kept so release can
    /// still reap the native process.
    Unresponsive,
    Closed,
}

/// A bound browser-automation handle. Not `Clone`: exclusive ownership by
/// the scenario it was acquired for.
pub struct Session {
    id: u64,
    browser: BrowserKind,
    headless: bool,
    liveness: Liveness,
    driver: Option<Box<dyn WebDriverLike>>,
}

impl Session {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn browser(&self) -> BrowserKind {
        self.browser
    }

    pub fn headless(&self) -> bool {
        self.headless
    }

    pub fn liveness(&self) -> Liveness {
        self.liveness
    }

    pub fn is_healthy(&self) -> bool {
        self.liveness == Liveness::Healthy
    }

    /// The driver, if the session is still healthy. Callers must go through
    /// this accessor rather than assuming a handle exists.
    pub fn driver(&self) -> Option<&dyn WebDriverLike> {
        if self.liveness == Liveness::Healthy {
            self.driver.as_deref()
        } else {
            None
        }
    }

    fn mark_unresponsive(&mut self) {
        self.liveness = Liveness::Unresponsive;
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("browser", &self.browser)
            .field("headless", &self.headless)
            .field("liveness", &self.liveness)
            .finish()
    }
}

/// Creates, probes, and releases browser sessions.
pub struct SessionManager {
    factory: Arc<dyn DriverFactory>,
    retry: RetryPolicy,
    acquire_timeout: Duration,
    next_id: AtomicU64,
    acquired: AtomicU64,
    released: AtomicU64,
}

impl SessionManager {
    pub fn new(factory: Arc<dyn DriverFactory>) -> Self {
        Self {
            factory,
            retry: RetryPolicy::fixed(DEFAULT_ACQUIRE_ATTEMPTS, DEFAULT_RETRY_DELAY),
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            next_id: AtomicU64::new(1),
            acquired: AtomicU64::new(0),
            released: AtomicU64::new(0),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Sessions handed out so far.
    pub fn acquired(&self) -> u64 {
        self.acquired.load(Ordering::SeqCst)
    }

    /// Sessions released so far. Equal to [`Self::acquired`] once a suite
    /// has fully drained.
    pub fn released(&self) -> u64 {
        self.released.load(Ordering::SeqCst)
    }

    /// Acquires a fresh session for `config`.
    ///
    /// Creation is retried on transient failure; a probe failure right after
    /// creation discards the half-born driver and consumes one attempt. The
    /// whole loop, sleeps included, races the acquisition deadline —
    /// whichever bound trips first wins.
    pub async fn acquire(&self, config: &SessionConfig) -> Result<Session> {
        let driver = deadline(
            self.acquire_timeout,
            "session acquisition",
            self.retry.run(|attempt| self.create_and_probe(config, attempt)),
        )
        .await?;

        if !config.headless {
            // Window size only matters for a visible browser; failure here
            // must not cost us the session.
            if let Err(err) = driver.maximize_window().await {
                warn!(
                    target = "gauntlet.session",
                    error = %err,
                    "failed to maximize window"
                );
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.acquired.fetch_add(1, Ordering::SeqCst);
        debug!(
            target = "gauntlet.session",
            id,
            browser = %config.kind(),
            headless = config.headless,
            "session acquired"
        );

        Ok(Session {
            id,
            browser: config.kind(),
            headless: config.headless,
            liveness: Liveness::Healthy,
            driver: Some(driver),
        })
    }

    async fn create_and_probe(
        &self,
        config: &SessionConfig,
        attempt: u32,
    ) -> Result<Box<dyn WebDriverLike>> {
        debug!(
            target = "gauntlet.session",
            attempt,
            browser = %config.kind(),
            "creating driver"
        );
        let driver = self.factory.create(config).await?;

        // A driver that cannot answer the cheapest read is unusable; discard
        // it and let the retry policy decide whether to try again.
        if let Err(err) = driver.title().await {
            warn!(
                target = "gauntlet.session",
                attempt,
                error = %err,
                "post-creation liveness probe failed, discarding driver"
            );
            if let Err(quit_err) = driver.quit().await {
                debug!(
                    target = "gauntlet.session",
                    error = %quit_err,
                    "discarding unprobeable driver also failed to quit"
                );
            }
            return Err(HarnessError::SessionCreation(format!(
                "liveness probe failed after creation: {err}"
            )));
        }

        Ok(driver)
    }

    /// Re-checks that `session` still responds. On failure the session is
    /// marked [`Liveness::Unresponsive`]; death is never inferred any other
    /// way.
    pub async fn probe(&self, session: &mut Session) -> bool {
        let Some(driver) = session.driver.as_deref() else {
            return false;
        };
        if session.liveness != Liveness::Healthy {
            return false;
        }
        match driver.title().await {
            Ok(_) => true,
            Err(err) => {
                warn!(
                    target = "gauntlet.session",
                    id = session.id,
                    error = %err,
                    "liveness probe failed, marking session unresponsive"
                );
                session.mark_unresponsive();
                false
            }
        }
    }

    /// Releases `session`. Idempotent: a second call on a closed session is
    /// a no-op. Shutdown errors are logged and swallowed so release can sit
    /// on every exit path without masking the original outcome.
    pub async fn release(&self, session: &mut Session) {
        if session.liveness == Liveness::Closed {
            debug!(
                target = "gauntlet.session",
                id = session.id,
                "release on already-closed session ignored"
            );
            return;
        }

        if let Some(driver) = session.driver.take() {
            if let Err(err) = driver.quit().await {
                warn!(
                    target = "gauntlet.session",
                    id = session.id,
                    error = %err,
                    "graceful shutdown failed"
                );
            }
        }

        session.liveness = Liveness::Closed;
        self.released.fetch_add(1, Ordering::SeqCst);
        debug!(target = "gauntlet.session", id = session.id, "session released");
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("retry", &self.retry)
            .field("acquire_timeout", &self.acquire_timeout)
            .field("acquired", &self.acquired)
            .field("released", &self.released)
            .finish()
    }
}
