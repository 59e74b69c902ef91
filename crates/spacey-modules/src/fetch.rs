// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! HTTP access for external-link modules

use crate::error::{ModuleError, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, instrument};

/// Network operations needed to load remote modules
#[async_trait]
pub trait Fetch: Send + Sync {
    /// Final URL after following redirects
    async fn resolve_redirect(&self, url: &str) -> Result<String>;

    /// Body of a successful GET as text
    async fn fetch_text(&self, url: &str) -> Result<String>;
}

/// [`Fetch`] implementation over reqwest
#[derive(Clone)]
pub struct HttpFetch {
    client: Client,
}

impl HttpFetch {
    /// Create a client that follows up to 10 redirects
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(30))
            .redirect(reqwest::redirect::Policy::limited(10))
            .referer(false)
            .user_agent(format!("spacey-modules/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ModuleError::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetch for HttpFetch {
    #[instrument(skip(self))]
    async fn resolve_redirect(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|e| ModuleError::network(url, e))?;
        let resolved = response.url().to_string();
        if resolved != url {
            debug!("{url} redirects to {resolved}");
        }
        Ok(resolved)
    }

    #[instrument(skip(self))]
    async fn fetch_text(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ModuleError::network(url, e))?;
        if !response.status().is_success() {
            return Err(ModuleError::network(url, format!("HTTP {}", response.status())));
        }
        response.text().await.map_err(|e| ModuleError::network(url, e))
    }
}

/// Limits concurrent requests issued through a [`Fetch`]
pub struct FetchPool {
    fetch: Arc<dyn Fetch>,
    permits: Arc<Semaphore>,
}

impl FetchPool {
    pub fn new(fetch: Arc<dyn Fetch>, concurrency: usize) -> Self {
        Self {
            fetch,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    pub async fn resolve_redirect(&self, url: &str) -> Result<String> {
        let _permit = self.acquire().await?;
        self.fetch.resolve_redirect(url).await
    }

    pub async fn fetch_text(&self, url: &str) -> Result<String> {
        let _permit = self.acquire().await?;
        self.fetch.fetch_text(url).await
    }

    async fn acquire(&self) -> Result<tokio::sync::SemaphorePermit<'_>> {
        self.permits
            .acquire()
            .await
            .map_err(|e| ModuleError::Config(format!("fetch pool closed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct SlowFetch {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Fetch for SlowFetch {
        async fn resolve_redirect(&self, url: &str) -> Result<String> {
            Ok(url.to_string())
        }

        async fn fetch_text(&self, url: &str) -> Result<String> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(format!("// {url}"))
        }
    }

    #[tokio::test]
    async fn test_fetch_pool_limits_concurrency() {
        let fetch = Arc::new(SlowFetch {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let pool = FetchPool::new(fetch.clone(), 2);
        let urls: Vec<String> = (0..6).map(|i| format!("https://example.com/{i}.js")).collect();
        let bodies = futures::future::join_all(urls.iter().map(|url| pool.fetch_text(url))).await;
        assert!(bodies.iter().all(Result::is_ok));
        assert_eq!(fetch.peak.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_http_fetch_builds() {
        assert!(HttpFetch::new().is_ok());
    }
}
