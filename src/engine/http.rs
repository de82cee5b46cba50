//! Plain HTTP fetch engine (C3, §4.3).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::seq::IndexedRandom;
use reqwest::Client;

use crate::error::{CrawlError, ErrorEvent, ErrorSource};
use crate::proxy_pool::{Egress, Outcome, ProxyPool};

use super::{EngineRequest, FetchEngine, FetchResult};

/// One cached `reqwest::Client` per egress identity, so connections are reused
/// across requests through the same proxy (§4.3: "a per-egress cached HTTP
/// client").
pub struct HttpEngine {
    proxy_pool: Arc<ProxyPool>,
    clients: Mutex<HashMap<String, Client>>,
    user_agents: Vec<String>,
    accept_language: String,
    request_timeout: Duration,
    backoff_sec: Vec<u64>,
}

impl HttpEngine {
    pub fn new(
        proxy_pool: Arc<ProxyPool>,
        user_agents: Vec<String>,
        accept_language: String,
        request_timeout: Duration,
        backoff_sec: Vec<u64>,
    ) -> Self {
        Self {
            proxy_pool,
            clients: Mutex::new(HashMap::new()),
            user_agents,
            accept_language,
            request_timeout,
            backoff_sec,
        }
    }

    fn client_for(&self, egress: &Egress) -> Result<Client, CrawlError> {
        let key = egress.to_string();
        if let Some(client) = self.clients.lock().get(&key) {
            return Ok(client.clone());
        }

        let mut builder = Client::builder().timeout(self.request_timeout);
        if let Egress::Proxy(url) = egress {
            let proxy = reqwest::Proxy::all(url).map_err(|e| CrawlError::TransportError {
                url: url.clone(),
                source: e.into(),
            })?;
            builder = builder.proxy(proxy);
        }
        let client = builder.build().map_err(|e| CrawlError::TransportError {
            url: key.clone(),
            source: e.into(),
        })?;
        self.clients.lock().insert(key, client.clone());
        Ok(client)
    }

    fn backoff_for(&self, attempt: usize) -> Duration {
        let idx = attempt.min(self.backoff_sec.len().saturating_sub(1));
        Duration::from_secs(self.backoff_sec.get(idx).copied().unwrap_or(0))
    }

    fn pick_user_agent(&self) -> &str {
        self.user_agents
            .choose(&mut rand::rng())
            .map(String::as_str)
            .unwrap_or("Mozilla/5.0")
    }

    /// Fetches raw bytes through the shared egress rotation (used by the image
    /// saver, which needs the `Content-Type` header rather than parsed HTML).
    pub async fn fetch_bytes(&self, url: &str) -> Result<(Vec<u8>, Option<String>), CrawlError> {
        let max_attempts = self.backoff_sec.len() as u32 + 1;
        let mut last_err = None;

        for attempt in 0..max_attempts {
            let egress = self.proxy_pool.acquire()?;
            let client = self.client_for(&egress)?;
            let result = client
                .get(url)
                .header("User-Agent", self.pick_user_agent())
                .header("Accept-Language", &self.accept_language)
                .send()
                .await;

            match result {
                Ok(resp) if resp.status() == reqwest::StatusCode::FORBIDDEN => {
                    self.proxy_pool.report(&egress, Outcome::Http403);
                    last_err = Some(CrawlError::HttpStatusError { url: url.to_string(), code: 403 });
                    continue;
                }
                Ok(resp) if resp.status().is_server_error() => {
                    self.proxy_pool.report(&egress, Outcome::TransportError);
                    last_err = Some(CrawlError::HttpStatusError {
                        url: url.to_string(),
                        code: resp.status().as_u16(),
                    });
                    tokio::time::sleep(self.backoff_for(attempt as usize)).await;
                    continue;
                }
                Ok(resp) => {
                    let content_type = resp
                        .headers()
                        .get(reqwest::header::CONTENT_TYPE)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    self.proxy_pool.report(&egress, Outcome::Ok);
                    let bytes = resp.bytes().await.map_err(|e| CrawlError::TransportError {
                        url: url.to_string(),
                        source: e.into(),
                    })?;
                    return Ok((bytes.to_vec(), content_type));
                }
                Err(e) => {
                    let outcome = if e.is_timeout() { Outcome::Timeout } else { Outcome::TransportError };
                    self.proxy_pool.report(&egress, outcome);
                    last_err = Some(CrawlError::TransportError { url: url.to_string(), source: e.into() });
                    tokio::time::sleep(self.backoff_for(attempt as usize)).await;
                }
            }
        }

        let err = last_err.unwrap_or(CrawlError::TransportError {
            url: url.to_string(),
            source: anyhow::anyhow!("retries exhausted"),
        });
        ErrorEvent::new("http_retries_exhausted", ErrorSource::Http, "rotate_proxy")
            .with_url(url)
            .log_warn();
        Err(err)
    }
}

#[async_trait]
impl FetchEngine for HttpEngine {
    async fn fetch(&self, request: EngineRequest) -> Result<FetchResult, CrawlError> {
        let max_attempts = self.backoff_sec.len() as u32 + 1;
        let mut last_err = None;

        for attempt in 0..max_attempts {
            let egress = self.proxy_pool.acquire()?;
            let client = self.client_for(&egress)?;

            let result = client
                .get(&request.url)
                .header("User-Agent", self.pick_user_agent())
                .header("Accept-Language", &self.accept_language)
                .send()
                .await;

            match result {
                Ok(resp) if resp.status() == reqwest::StatusCode::FORBIDDEN => {
                    self.proxy_pool.report(&egress, Outcome::Http403);
                    last_err = Some(CrawlError::HttpStatusError { url: request.url.clone(), code: 403 });
                    continue;
                }
                Ok(resp) if resp.status().is_server_error() => {
                    self.proxy_pool.report(&egress, Outcome::TransportError);
                    let code = resp.status().as_u16();
                    last_err = Some(CrawlError::HttpStatusError { url: request.url.clone(), code });
                    ErrorEvent::new("http_5xx", ErrorSource::Http, "increase_timeout")
                        .with_url(&request.url)
                        .with_proxy(egress.to_string())
                        .with_retry_index(attempt)
                        .log_warn();
                    tokio::time::sleep(self.backoff_for(attempt as usize)).await;
                    continue;
                }
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let final_url = resp.url().to_string();
                    let html = resp.text().await.map_err(|e| CrawlError::TransportError {
                        url: request.url.clone(),
                        source: e.into(),
                    })?;
                    self.proxy_pool.report(&egress, Outcome::Ok);
                    return Ok(FetchResult {
                        final_url,
                        html,
                        status,
                        egress_used: egress.to_string(),
                        stopped: false,
                        behavior_trace: None,
                    });
                }
                Err(e) => {
                    let outcome = if e.is_timeout() { Outcome::Timeout } else { Outcome::TransportError };
                    self.proxy_pool.report(&egress, outcome);
                    last_err = Some(CrawlError::TransportError { url: request.url.clone(), source: e.into() });
                    ErrorEvent::new("http_transport_error", ErrorSource::Http, "rotate_proxy")
                        .with_url(&request.url)
                        .with_proxy(egress.to_string())
                        .with_retry_index(attempt)
                        .log_warn();
                    tokio::time::sleep(self.backoff_for(attempt as usize)).await;
                }
            }
        }

        Err(last_err.unwrap_or(CrawlError::TransportError {
            url: request.url,
            source: anyhow::anyhow!("retries exhausted"),
        }))
    }
}
