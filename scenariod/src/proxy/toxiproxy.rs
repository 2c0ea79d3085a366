//! HTTP client for the Toxiproxy control API

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use super::{Proxy, ProxyHandle, Toxic, ToxicSpec};
use crate::config::ProxyDefinition;
use crate::error::ProxyError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const READY_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Proxy record as returned by `GET /proxies`
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyRecord {
    /// Proxy name
    pub name: String,
    /// Listen address
    pub listen: String,
    /// Upstream address
    pub upstream: String,
    /// Whether traffic currently flows
    pub enabled: bool,
}

/// Client for one Toxiproxy server
#[derive(Debug, Clone)]
pub struct ToxiproxyClient {
    http: Client,
    base_url: String,
}

impl ToxiproxyClient {
    /// Create a client for the API at `base_url`, e.g. `http://localhost:8474`
    pub fn new(base_url: &str) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// API base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// All proxies known to the server, keyed by name
    pub async fn proxies(&self) -> Result<HashMap<String, ProxyRecord>, ProxyError> {
        let response = self
            .http
            .get(self.url("/proxies"))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        Ok(check_status(response).await?.json().await?)
    }

    /// Create a proxy; it starts enabled
    pub async fn create_proxy(&self, def: &ProxyDefinition) -> Result<ToxiproxyProxy, ProxyError> {
        let body = json!({
            "name": def.name,
            "listen": def.listen,
            "upstream": def.upstream,
            "enabled": true,
        });
        let response = self
            .http
            .post(self.url("/proxies"))
            .timeout(REQUEST_TIMEOUT)
            .json(&body)
            .send()
            .await?;
        check_status(response).await?;
        Ok(self.proxy(&def.name))
    }

    /// Delete a proxy by name
    pub async fn delete_proxy(&self, name: &str) -> Result<(), ProxyError> {
        let response = self
            .http
            .delete(self.url(&format!("/proxies/{name}")))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    /// Handle to an existing proxy; no request is made
    pub fn proxy(&self, name: &str) -> ToxiproxyProxy {
        ToxiproxyProxy {
            client: self.clone(),
            name: name.to_string(),
        }
    }

    /// Wait for the server, replace any existing proxies and create `defs`
    ///
    /// Polls every 500ms until `GET /proxies` answers or `ready_timeout`
    /// passes. Proxies are returned in the order of `defs`.
    pub async fn setup(
        &self,
        defs: &[ProxyDefinition],
        ready_timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<ProxyHandle>, ProxyError> {
        let started = Instant::now();
        let existing = loop {
            match self.proxies().await {
                Ok(existing) => break existing,
                Err(e) => {
                    if started.elapsed() >= ready_timeout {
                        tracing::error!("Toxiproxy at {} not ready: {}", self.base_url, e);
                        return Err(ProxyError::NotReady {
                            waited: started.elapsed(),
                        });
                    }
                    tracing::debug!("Waiting for toxiproxy at {}: {}", self.base_url, e);
                }
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ProxyError::Cancelled),
                _ = tokio::time::sleep(READY_POLL_INTERVAL) => {}
            }
        };

        for name in existing.keys() {
            if let Err(e) = self.delete_proxy(name).await {
                tracing::warn!("Failed to delete existing proxy {}: {}", name, e);
            }
        }

        let mut proxies: Vec<ProxyHandle> = Vec::with_capacity(defs.len());
        for def in defs {
            let proxy = self.create_proxy(def).await?;
            proxy.enable().await?;
            tracing::info!(
                "Created proxy {} ({} -> {})",
                def.name,
                def.listen,
                def.upstream
            );
            proxies.push(Arc::new(proxy));
        }

        Ok(proxies)
    }
}

/// A proxy managed through the Toxiproxy HTTP API
#[derive(Debug, Clone)]
pub struct ToxiproxyProxy {
    client: ToxiproxyClient,
    name: String,
}

impl ToxiproxyProxy {
    async fn set_enabled(&self, enabled: bool) -> Result<(), ProxyError> {
        let response = self
            .client
            .http
            .post(self.client.url(&format!("/proxies/{}", self.name)))
            .timeout(REQUEST_TIMEOUT)
            .json(&json!({ "enabled": enabled }))
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}

#[async_trait]
impl Proxy for ToxiproxyProxy {
    fn name(&self) -> &str {
        &self.name
    }

    async fn enable(&self) -> Result<(), ProxyError> {
        self.set_enabled(true).await
    }

    async fn disable(&self) -> Result<(), ProxyError> {
        self.set_enabled(false).await
    }

    async fn add_toxic(&self, spec: &ToxicSpec) -> Result<Toxic, ProxyError> {
        let response = self
            .client
            .http
            .post(self.client.url(&format!("/proxies/{}/toxics", self.name)))
            .timeout(REQUEST_TIMEOUT)
            .json(spec)
            .send()
            .await?;
        Ok(check_status(response).await?.json().await?)
    }

    async fn remove_toxic(&self, name: &str) -> Result<(), ProxyError> {
        let response = self
            .client
            .http
            .delete(
                self.client
                    .url(&format!("/proxies/{}/toxics/{}", self.name, name)),
            )
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn toxics(&self) -> Result<Vec<Toxic>, ProxyError> {
        let response = self
            .client
            .http
            .get(self.client.url(&format!("/proxies/{}/toxics", self.name)))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        Ok(check_status(response).await?.json().await?)
    }
}

async fn check_status(response: Response) -> Result<Response, ProxyError> {
    let status = response.status();
    if status.is_success() || status == StatusCode::NOT_MODIFIED {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ProxyError::Status {
        status: status.as_u16(),
        body: body.trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let client = ToxiproxyClient::new("http://localhost:8474/");
        assert_eq!(client.base_url(), "http://localhost:8474");
        assert_eq!(client.url("/proxies"), "http://localhost:8474/proxies");
    }

    #[test]
    fn test_proxy_handle_keeps_name() {
        let client = ToxiproxyClient::new("http://localhost:8474");
        assert_eq!(client.proxy("memcache2").name(), "memcache2");
    }

    #[tokio::test]
    async fn test_setup_gives_up_when_unreachable() {
        // Port 9 (discard) is closed on test machines
        let client = ToxiproxyClient::new("http://127.0.0.1:9");
        let cancel = CancellationToken::new();
        let err = client
            .setup(&[], Duration::ZERO, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::NotReady { .. }));
    }

    #[tokio::test]
    async fn test_setup_observes_cancellation() {
        let client = ToxiproxyClient::new("http://127.0.0.1:9");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = client
            .setup(&[], Duration::from_secs(30), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::Cancelled));
    }
}
