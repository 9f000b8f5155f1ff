//! Upstream feed client: fetches recent posts for a handle.
//!
//! The poller and bot depend on the [`FeedService`] trait so tests can swap in
//! a recording fake; [`FeedClient`] is the real HTTP implementation.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use std::fmt;
use tracing::warn;

const FEED_API_BASE: &str = "https://api.twitter.com/";

/// One post from the upstream feed, normalized to UTC.
#[derive(Debug, Clone)]
pub struct Post {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub url: String,
}

#[async_trait]
pub trait FeedService: Send + Sync {
    /// Most recent posts for `handle`, newest first, at most `max_count`.
    /// Rate-limit responses degrade to an empty list rather than an error.
    async fn recent_posts(&self, handle: &str, max_count: u32) -> Result<Vec<Post>>;
}

#[derive(Clone)]
pub struct FeedClient {
    http: Client,
    base_url: Url,
    bearer_token: String,
}

impl fmt::Debug for FeedClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

/// Recent search rejects `max_results` outside 10..=100; callers asking for
/// fewer get a valid request and the surplus is trimmed after the fetch.
fn clamp_max_results(max_count: u32) -> u32 {
    max_count.clamp(10, 100)
}

#[derive(Debug, Deserialize)]
struct SearchResp {
    #[serde(default)]
    data: Vec<Tweet>,
}

#[derive(Debug, Deserialize)]
struct Tweet {
    id: String,
    created_at: DateTime<Utc>,
}

impl FeedClient {
    pub fn new(bearer_token: String) -> Self {
        let base_url = Url::parse(FEED_API_BASE).expect("valid default feed URL");
        Self::with_base_url(bearer_token, base_url)
    }

    pub fn with_base_url(bearer_token: String, base_url: Url) -> Self {
        let http = Client::builder()
            .user_agent("tw-snoopbot/0.1")
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url,
            bearer_token,
        }
    }
}

#[async_trait]
impl FeedService for FeedClient {
    async fn recent_posts(&self, handle: &str, max_count: u32) -> Result<Vec<Post>> {
        let endpoint = self
            .base_url
            .join("2/tweets/search/recent")
            .context("invalid feed base URL")?;
        let resp = self
            .http
            .get(endpoint)
            .bearer_auth(&self.bearer_token)
            .query(&[
                ("query", format!("from:{handle}")),
                ("max_results", clamp_max_results(max_count).to_string()),
                ("tweet.fields", "created_at".to_string()),
            ])
            .send()
            .await
            .context("feed request failed")?;

        if resp.status() == StatusCode::TOO_MANY_REQUESTS {
            warn!(handle, "feed rate limited; returning no posts");
            return Ok(Vec::new());
        }
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("feed returned {status}: {body}"));
        }

        let parsed: SearchResp = resp.json().await.context("invalid feed response body")?;
        Ok(parsed
            .data
            .into_iter()
            .take(max_count as usize)
            .map(|tweet| Post {
                url: format!("https://twitter.com/{handle}/status/{}", tweet.id),
                id: tweet.id,
                created_at: tweet.created_at,
            })
            .collect())
    }
}
