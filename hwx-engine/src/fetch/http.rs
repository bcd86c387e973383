//! Lightweight fetcher: plain HTTP with browser-like headers

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use reqwest::Client;
use std::time::Duration;

use super::detector::{is_antibot_error, Severity};
use super::{FetchOutcome, FetchStrategy, Page, PageFetcher, TransportErrorKind};
use crate::error::EngineResult;

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Build the client; `timeout` is the default per-request limit
    pub fn new(user_agent: &str, timeout: Duration) -> EngineResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        let client = Client::builder()
            .user_agent(user_agent)
            .default_headers(headers)
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .cookie_store(true)
            .gzip(true)
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    fn strategy(&self) -> FetchStrategy {
        FetchStrategy::Lightweight
    }

    async fn fetch(&self, target: &str, timeout: Duration) -> FetchOutcome {
        tracing::debug!(target, "HTTP GET");

        let response = match self.client.get(target).timeout(timeout).send().await {
            Ok(response) => response,
            Err(e) => return classify_error(&e),
        };

        let status = response.status().as_u16();
        let final_url = response.url().to_string();

        match response.text().await {
            Ok(body) => FetchOutcome::Content(Page {
                body,
                status: Some(status),
                final_url,
            }),
            Err(e) => classify_error(&e),
        }
    }
}

fn classify_error(e: &reqwest::Error) -> FetchOutcome {
    let message = e.to_string();
    if e.is_timeout() {
        return FetchOutcome::TransportError {
            kind: TransportErrorKind::Timeout,
        };
    }
    if is_antibot_error(&message) {
        return FetchOutcome::Blocked {
            reason: format!("transport: {}", message),
            severity: Severity::Hard,
        };
    }
    let kind = if e.is_connect() {
        TransportErrorKind::Connect(message)
    } else {
        TransportErrorKind::Other(message)
    };
    FetchOutcome::TransportError { kind }
}
