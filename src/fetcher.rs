use crate::errors::AppError;
use crate::models::{FetchedPage, Identity};
use async_trait::async_trait;
use moka::future::Cache;
use reqwest::header::USER_AGENT;
use std::time::Duration;

/// Fetches one page while presenting `identity` to the remote side.
///
/// Any HTTP response, whatever its status, is returned as a page. Errors are
/// reserved for requests that produced no response: [`AppError::TransientFetch`]
/// when another attempt or identity may succeed (timeouts, resets, unusable
/// proxy), any other variant when it will not.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, url: &str, identity: &Identity) -> Result<FetchedPage, AppError>;
}

/// HTTP implementation of [`Fetch`] on top of reqwest.
///
/// One client is built per proxy and cached, since a reqwest proxy is fixed
/// at client construction. The user agent is applied per request.
/// Status classification is left to the caller.
#[derive(Clone)]
pub struct HttpFetcher {
    timeout: Duration,
    clients: Cache<String, reqwest::Client>,
}

impl HttpFetcher {
    /// Creates a new `HttpFetcher`.
    ///
    /// # Arguments
    ///
    /// * `timeout` - Per-request timeout, covering connect and body read.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            clients: Cache::builder()
                .time_to_live(Duration::from_secs(3600))
                .max_capacity(256)
                .build(),
        }
    }

    async fn client_for(&self, proxy: Option<&str>) -> Result<reqwest::Client, AppError> {
        let key = proxy.unwrap_or_default().to_string();
        if let Some(client) = self.clients.get(&key).await {
            return Ok(client);
        }

        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .redirect(reqwest::redirect::Policy::limited(5));
        if let Some(proxy_url) = proxy {
            // A bad pool entry only costs this attempt; the next identity may work.
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| AppError::TransientFetch(format!("Invalid proxy URL: {}", e)))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| AppError::InternalError(format!("Failed to create HTTP client: {}", e)))?;

        self.clients.insert(key, client.clone()).await;
        Ok(client)
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, url: &str, identity: &Identity) -> Result<FetchedPage, AppError> {
        let client = self.client_for(identity.proxy.as_deref()).await?;
        tracing::debug!(
            "Fetching {} (proxy: {})",
            url,
            if identity.proxy.is_some() { "yes" } else { "direct" }
        );

        let response = client
            .get(url)
            .header(USER_AGENT, identity.user_agent.as_str())
            .send()
            .await
            .map_err(|e| AppError::TransientFetch(format!("Request to {} failed: {}", url, e)))?;

        // Throttled and failing responses are returned as pages too, so the
        // caller can still recognise a challenge served with a 429.
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AppError::TransientFetch(format!("Failed to read {}: {}", url, e)))?;

        Ok(FetchedPage {
            url: url.to_string(),
            status: status.as_u16(),
            text,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_client_is_reused_per_proxy() {
        let fetcher = HttpFetcher::new(Duration::from_secs(1));
        fetcher.client_for(None).await.unwrap();
        fetcher.client_for(None).await.unwrap();
        fetcher.clients.run_pending_tasks().await;
        assert_eq!(fetcher.clients.entry_count(), 1);
    }

    #[tokio::test]
    async fn test_malformed_proxy_is_retryable() {
        let fetcher = HttpFetcher::new(Duration::from_secs(1));
        let err = fetcher.client_for(Some("http://[::1")).await.unwrap_err();
        assert!(matches!(err, AppError::TransientFetch(_)));
        assert!(err.is_transient());
    }
}
