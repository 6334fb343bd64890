//! HTTP client for the live stats feed.
//!
//! Fetches the window and details feeds for the same starting time
//! concurrently and combines them into one [`Chunk`].

use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::trace;

use crate::config::FeedConfig;
use crate::frames::{Chunk, DetailRecord, Metadata, WindowRecord};
use crate::source::{FeedFuture, FeedSource};
use crate::{Error, Result};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WindowPayload {
    #[serde(default)]
    game_metadata: Option<Metadata>,
    #[serde(default)]
    frames: Vec<WindowRecord>,
}

#[derive(Debug, Default, Deserialize)]
struct DetailsPayload {
    #[serde(default)]
    frames: Vec<DetailRecord>,
}

/// Feed client backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct LiveStatsClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl LiveStatsClient {
    /// Build a client from feed settings.
    pub fn new(config: &FeedConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: config.request_timeout(),
        })
    }

    /// URL of one feed endpoint.
    #[must_use]
    pub fn endpoint(&self, feed: &str, event_id: &str) -> String {
        format!("{}/{feed}/{event_id}", self.base_url)
    }

    async fn get_payload<T>(&self, feed: &str, event_id: &str, starting_time: &str) -> Result<T>
    where
        T: DeserializeOwned + Default,
    {
        let url = self.endpoint(feed, event_id);
        trace!(%url, starting_time, "Fetching feed chunk");
        let response = self
            .client
            .get(&url)
            .query(&[("startingTime", starting_time)])
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    Error::Timeout(self.timeout)
                } else {
                    Error::Http(err)
                }
            })?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(T::default());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Fetch(format!("{feed} feed returned {status}: {body}")));
        }

        let body = response.text().await?;
        decode_payload(&body)
    }

    async fn fetch(&self, event_id: &str, starting_time: &str) -> Result<Chunk> {
        let (window, details) = tokio::try_join!(
            self.get_payload::<WindowPayload>("window", event_id, starting_time),
            self.get_payload::<DetailsPayload>("details", event_id, starting_time),
        )?;
        Ok(Chunk {
            window: window.frames,
            details: details.frames,
            metadata: window.game_metadata,
        })
    }
}

/// Decode a feed body; an empty body means "no frames".
fn decode_payload<T>(body: &str) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    if body.trim().is_empty() {
        return Ok(T::default());
    }
    Ok(serde_json::from_str(body)?)
}

impl FeedSource for LiveStatsClient {
    type Fut<'a> = FeedFuture<'a>;

    fn fetch_chunk<'a>(&'a self, event_id: &'a str, starting_time: &'a str) -> Self::Fut<'a> {
        Box::pin(self.fetch(event_id, starting_time))
    }
}
