//! Heavyweight fetcher: a real browser driven over WebDriver
//!
//! Sessions are expensive, so they are pooled. A fetch checks a session out
//! through a [`SessionGuard`]; dropping the guard releases the pool slot
//! whether the fetch finished, failed, or was cancelled mid-flight.

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::{FetchOutcome, FetchStrategy, Page, PageFetcher, TransportErrorKind};
use crate::error::EngineResult;
use hwx_common::config::BrowserConfig;

/// Browser automation seam
#[async_trait]
pub trait BrowserBackend: Send + Sync {
    /// Open a browser session, returning its id
    async fn open_session(&self) -> Result<String, TransportErrorKind>;

    /// Navigate and wait for the page to load
    async fn navigate(&self, session: &str, url: &str) -> Result<(), TransportErrorKind>;

    /// Rendered page source
    async fn page_source(&self, session: &str) -> Result<String, TransportErrorKind>;

    /// URL the session ended up on after redirects
    async fn current_url(&self, session: &str) -> Result<String, TransportErrorKind>;

    async fn close_session(&self, session: &str) -> Result<(), TransportErrorKind>;
}

// ============================================================================
// WebDriver backend
// ============================================================================

/// W3C WebDriver client (chromedriver, geckodriver)
pub struct WebDriverBackend {
    client: Client,
    base_url: String,
    headless: bool,
}

#[derive(Debug, Deserialize)]
struct WdResponse<T> {
    value: T,
}

#[derive(Debug, Deserialize)]
struct NewSession {
    #[serde(rename = "sessionId")]
    session_id: String,
}

impl WebDriverBackend {
    pub fn new(config: &BrowserConfig) -> EngineResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            client,
            base_url: config.webdriver_url.trim_end_matches('/').to_string(),
            headless: config.headless,
        })
    }

    fn capabilities(&self) -> serde_json::Value {
        let mut args = vec![
            "--disable-blink-features=AutomationControlled",
            "--window-size=1366,900",
        ];
        if self.headless {
            args.push("--headless=new");
        }
        json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": { "args": args }
                }
            }
        })
    }

    async fn send<T: for<'de> Deserialize<'de>>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, TransportErrorKind> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportErrorKind::Timeout
            } else {
                TransportErrorKind::Session(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportErrorKind::Session(format!(
                "webdriver returned {}: {}",
                status.as_u16(),
                body.chars().take(200).collect::<String>()
            )));
        }

        response
            .json::<WdResponse<T>>()
            .await
            .map(|r| r.value)
            .map_err(|e| TransportErrorKind::Session(format!("bad webdriver response: {}", e)))
    }
}

#[async_trait]
impl BrowserBackend for WebDriverBackend {
    async fn open_session(&self) -> Result<String, TransportErrorKind> {
        let url = format!("{}/session", self.base_url);
        let session: NewSession = self
            .send(self.client.post(url).json(&self.capabilities()))
            .await?;
        tracing::debug!(session = %session.session_id, "WebDriver session opened");
        Ok(session.session_id)
    }

    async fn navigate(&self, session: &str, url: &str) -> Result<(), TransportErrorKind> {
        let endpoint = format!("{}/session/{}/url", self.base_url, session);
        self.send::<serde_json::Value>(self.client.post(endpoint).json(&json!({ "url": url })))
            .await
            .map(|_| ())
    }

    async fn page_source(&self, session: &str) -> Result<String, TransportErrorKind> {
        let endpoint = format!("{}/session/{}/source", self.base_url, session);
        self.send(self.client.get(endpoint)).await
    }

    async fn current_url(&self, session: &str) -> Result<String, TransportErrorKind> {
        let endpoint = format!("{}/session/{}/url", self.base_url, session);
        self.send(self.client.get(endpoint)).await
    }

    async fn close_session(&self, session: &str) -> Result<(), TransportErrorKind> {
        let endpoint = format!("{}/session/{}", self.base_url, session);
        self.send::<serde_json::Value>(self.client.delete(endpoint))
            .await
            .map(|_| ())
    }
}

// ============================================================================
// Session pool
// ============================================================================

/// Bounded pool of browser sessions
pub struct SessionPool {
    backend: Arc<dyn BrowserBackend>,
    permits: Arc<Semaphore>,
    max_sessions: usize,
    idle: Mutex<Vec<String>>,
    checked_out: Mutex<HashSet<String>>,
    closed: AtomicBool,
}

impl SessionPool {
    pub fn new(backend: Arc<dyn BrowserBackend>, max_sessions: usize) -> Arc<Self> {
        let max_sessions = max_sessions.max(1);
        Arc::new(Self {
            backend,
            permits: Arc::new(Semaphore::new(max_sessions)),
            max_sessions,
            idle: Mutex::new(Vec::new()),
            checked_out: Mutex::new(HashSet::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Check out a session, waiting for a free slot
    pub async fn acquire(self: &Arc<Self>) -> Result<SessionGuard, TransportErrorKind> {
        if self.is_closed() {
            return Err(TransportErrorKind::Session("browser pool is shut down".to_string()));
        }

        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| TransportErrorKind::Session("browser pool is shut down".to_string()))?;

        let reused = lock(&self.idle).pop();
        let session = match reused {
            Some(session) => session,
            None => self.backend.open_session().await?,
        };

        // Checked under the lock shutdown drains, so a session is either
        // drained by shutdown or closed here
        {
            let mut checked_out = lock(&self.checked_out);
            if !self.is_closed() {
                checked_out.insert(session.clone());
                return Ok(SessionGuard {
                    pool: Arc::clone(self),
                    session: Some(session),
                    healthy: false,
                    _permit: permit,
                });
            }
        }

        tracing::debug!(session = %session, "Pool shut down during checkout; closing session");
        if let Err(e) = self.backend.close_session(&session).await {
            tracing::warn!(session = %session, error = %e, "Failed to close browser session");
        }
        Err(TransportErrorKind::Session("browser pool is shut down".to_string()))
    }

    /// Slots not currently checked out
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    pub fn idle_sessions(&self) -> usize {
        lock(&self.idle).len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close every session, including checked-out ones, and refuse new checkouts
    ///
    /// Returns the number of sessions closed.
    pub async fn shutdown(&self) -> usize {
        if self.closed.swap(true, Ordering::SeqCst) {
            return 0;
        }
        self.permits.close();

        let mut sessions: Vec<String> = lock(&self.idle).drain(..).collect();
        sessions.extend(lock(&self.checked_out).drain());

        let results = join_all(sessions.iter().map(|session| self.backend.close_session(session))).await;
        let mut closed = 0;
        for (session, result) in sessions.iter().zip(results) {
            match result {
                Ok(()) => closed += 1,
                Err(e) => tracing::warn!(session = %session, error = %e, "Failed to close browser session"),
            }
        }
        tracing::info!(closed, "Browser pool shut down");
        closed
    }

    fn release(&self, session: String, healthy: bool) {
        let was_checked_out = lock(&self.checked_out).remove(&session);

        // Already closed by shutdown
        if !was_checked_out {
            return;
        }

        if healthy && !self.is_closed() {
            lock(&self.idle).push(session);
            return;
        }

        // Interrupted or failed sessions may be mid-navigation; close them
        let backend = Arc::clone(&self.backend);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = backend.close_session(&session).await {
                        tracing::debug!(session = %session, error = %e, "Discarded session close failed");
                    }
                });
            }
            Err(_) => tracing::warn!(session = %session, "No runtime to close discarded browser session"),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    // A panic while holding the lock cannot leave a Vec/HashSet inconsistent
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Checked-out session; returns to the pool on drop
pub struct SessionGuard {
    pool: Arc<SessionPool>,
    session: Option<String>,
    healthy: bool,
    _permit: OwnedSemaphorePermit,
}

impl SessionGuard {
    pub fn id(&self) -> &str {
        self.session.as_deref().unwrap_or_default()
    }

    /// Mark the session reusable; unmarked sessions are closed on drop
    pub fn mark_healthy(&mut self) {
        self.healthy = true;
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.pool.release(session, self.healthy);
        }
    }
}

// ============================================================================
// Fetcher
// ============================================================================

pub struct BrowserFetcher {
    pool: Arc<SessionPool>,
}

impl BrowserFetcher {
    pub fn new(pool: Arc<SessionPool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<SessionPool> {
        &self.pool
    }

    async fn load(&self, target: &str) -> Result<Page, TransportErrorKind> {
        let mut guard = self.pool.acquire().await?;
        let backend = &self.pool.backend;

        backend.navigate(guard.id(), target).await?;
        let body = backend.page_source(guard.id()).await?;
        let final_url = backend
            .current_url(guard.id())
            .await
            .unwrap_or_else(|_| target.to_string());

        guard.mark_healthy();
        Ok(Page {
            body,
            status: None,
            final_url,
        })
    }
}

#[async_trait]
impl PageFetcher for BrowserFetcher {
    fn strategy(&self) -> FetchStrategy {
        FetchStrategy::Heavyweight
    }

    async fn fetch(&self, target: &str, timeout: Duration) -> FetchOutcome {
        tracing::debug!(target, "Browser fetch");
        match tokio::time::timeout(timeout, self.load(target)).await {
            Ok(Ok(page)) => FetchOutcome::Content(page),
            Ok(Err(kind)) => FetchOutcome::TransportError { kind },
            Err(_) => FetchOutcome::TransportError {
                kind: TransportErrorKind::Timeout,
            },
        }
    }
}
