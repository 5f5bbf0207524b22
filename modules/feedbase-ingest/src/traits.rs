// Trait abstractions for the collector's feed dependency.
//
// FeedSource opens sessions against the provider; FeedStream yields decoded
// items from one open connection. The collector only sees these traits, so
// tests drive it with scripted sources and no network.

use async_trait::async_trait;
use serde_json::Value;

use feed_client::{FeedClient, Result};

// ---------------------------------------------------------------------------
// FeedSource
// ---------------------------------------------------------------------------

#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Open a long-lived connection to a streaming endpoint.
    async fn open_stream(
        &self,
        endpoint: &str,
        params: &[(String, String)],
    ) -> Result<Box<dyn FeedStream>>;

    /// Fetch one page of a paged endpoint.
    async fn fetch_page(&self, endpoint: &str, params: &[(String, String)]) -> Result<Vec<Value>>;
}

#[async_trait]
impl FeedSource for FeedClient {
    async fn open_stream(
        &self,
        endpoint: &str,
        params: &[(String, String)],
    ) -> Result<Box<dyn FeedStream>> {
        let stream = FeedClient::open_stream(self, endpoint, params).await?;
        Ok(Box::new(stream))
    }

    async fn fetch_page(&self, endpoint: &str, params: &[(String, String)]) -> Result<Vec<Value>> {
        FeedClient::fetch_page(self, endpoint, params).await
    }
}

// ---------------------------------------------------------------------------
// FeedStream
// ---------------------------------------------------------------------------

#[async_trait]
pub trait FeedStream: Send {
    /// Next decoded item; `Ok(None)` once the server closes the connection.
    async fn next_item(&mut self) -> Result<Option<Value>>;
}

#[async_trait]
impl FeedStream for feed_client::FeedStream {
    async fn next_item(&mut self) -> Result<Option<Value>> {
        feed_client::FeedStream::next_item(self).await
    }
}
