//! HTTP client for the remote index service.
//!
//! Both endpoints are plain `GET` requests sent with
//! `Content-Type: application/json`. Any 2xx response is a success; the body
//! of the trigger response is ignored.

use feedsync_core::error::AppError;
use feedsync_core::traits::RemoteSyncClient;
use feedsync_core::{HttpConfig, SyncStatusResponse};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response};
use tracing::debug;

const JSON_CONTENT_TYPE: &str = "application/json";

/// reqwest-backed [`RemoteSyncClient`].
///
/// # Examples
///
/// ```no_run
/// use feedsync_client::SyncServiceClient;
/// use feedsync_core::HttpConfig;
/// use feedsync_core::traits::RemoteSyncClient;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = SyncServiceClient::new(&HttpConfig::default())?;
/// let status = client.sync_status("http://search.local/sync/status").await?;
/// println!("current index: {:?}", status.current.index_name);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SyncServiceClient {
    client: Client,
}

impl SyncServiceClient {
    /// Builds a client with the configured timeout and user agent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ClientError` if the HTTP client cannot be built.
    pub fn new(config: &HttpConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::ClientError(e.to_string()))?;
        Ok(Self { client })
    }

    async fn get(&self, url: &str) -> Result<Response, AppError> {
        self.client
            .get(url)
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::ClientError(format!("Request to {} timed out", url))
                } else {
                    AppError::ClientError(e.to_string())
                }
            })
    }
}

impl RemoteSyncClient for SyncServiceClient {
    async fn trigger_sync(&self, url: &str) -> Result<(), AppError> {
        let resp = self.get(url).await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AppError::SyncTriggerFailed(format!(
                "HTTP {} from {}",
                status.as_u16(),
                url
            )));
        }
        debug!(url, status = status.as_u16(), "Remote sync triggered");
        Ok(())
    }

    async fn sync_status(&self, url: &str) -> Result<SyncStatusResponse, AppError> {
        let resp = self.get(url).await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AppError::StatusCheckFailed(format!(
                "HTTP {} from {}",
                status.as_u16(),
                url
            )));
        }
        resp.json::<SyncStatusResponse>()
            .await
            .map_err(|e| AppError::ClientError(format!("Invalid sync status body: {}", e)))
    }
}
