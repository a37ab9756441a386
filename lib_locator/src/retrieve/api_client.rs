//! # HTTP Retrieval Utilities
//!
//! An asynchronous API client around `reqwest` with exponential backoff
//! retries for transient failures and JSON response handling.

use anyhow::Context;
use reqwest::{Method, Url};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::de::DeserializeOwned;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// A response with its status; `data` is only set for 2xx replies.
#[derive(Debug)]
pub struct ApiResponse<T> {
    pub data: Option<T>,
    /// Raw body of a non-2xx reply.
    pub error_body: Option<String>,
    pub status: u16,
    pub success: bool,
}

/// A flexible asynchronous HTTP client.
///
/// Paths are joined onto `base_url`; an empty path requests the base URL
/// itself. Transient failures (connect errors, 5xx, 429) are retried up to
/// `max_retries` times.
#[derive(Clone)]
pub struct ApiClient {
    inner: ClientWithMiddleware,
    base_url: Url,
}

impl ApiClient {
    pub fn new(base_url: &str, max_retries: u32) -> anyhow::Result<Self> {
        let url = Url::parse(base_url).with_context(|| format!("Invalid base URL '{base_url}' (must be absolute)"))?;

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(max_retries);
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        let client = ClientBuilder::new(http)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            inner: client,
            base_url: url,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// GET `path` with query parameters and decode a JSON reply.
    pub async fn get_json<T>(&self, path: &str, query: &[(&str, String)]) -> anyhow::Result<ApiResponse<T>>
    where
        T: DeserializeOwned,
    {
        self.request(Method::GET, path, query).await
    }

    /// Performs a request and decodes a successful JSON reply into `T`.
    pub async fn request<T>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
    ) -> anyhow::Result<ApiResponse<T>>
    where
        T: DeserializeOwned,
    {
        let full_url = self.base_url.join(path)?;
        let mut req = self.inner.request(method, full_url);

        if !query.is_empty() {
            req = req.query(query);
        }

        let response = req.send().await?;
        let status = response.status();

        if status.is_success() {
            let data = response.json::<T>().await?;
            Ok(ApiResponse {
                data: Some(data),
                error_body: None,
                status: status.as_u16(),
                success: true,
            })
        } else {
            let error_text = response.text().await.ok();
            Ok(ApiResponse {
                data: None,
                error_body: error_text,
                status: status.as_u16(),
                success: false,
            })
        }
    }
}
