//! Notification poller: idle → polling → idle, forever.
//!
//! Each sweep lists all handles, fetches posts newer than the previous
//! checkpoint, and fans one message out per (post, watcher) pair. The
//! checkpoint advances to the sweep's start time only after the whole sweep
//! completes, so a crashed sweep is re-run rather than skipped.

use crate::checkpoint::Checkpoint;
use crate::db::{self, Pool};
use crate::feed::FeedService;
use crate::notify::{Delivery, Notifier};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

pub struct Poller {
    pool: Pool,
    feed: Arc<dyn FeedService>,
    notifier: Arc<dyn Notifier>,
    max_fetch_count: u32,
}

impl Poller {
    pub fn new(
        pool: Pool,
        feed: Arc<dyn FeedService>,
        notifier: Arc<dyn Notifier>,
        max_fetch_count: u32,
    ) -> Self {
        Self {
            pool,
            feed,
            notifier,
            max_fetch_count,
        }
    }

    /// Loop forever with a fixed sleep between sweeps. Never reentrant: the
    /// next sweep starts only after the previous one finished.
    pub async fn run(&self, checkpoint: &Checkpoint, interval: Duration) {
        loop {
            self.run_once(checkpoint).await;
            tokio::time::sleep(interval).await;
        }
    }

    /// One iteration of the loop: read the checkpoint, sweep, advance it.
    ///
    /// Every failure degrades to skipping: a failed sweep or a failed
    /// checkpoint write keeps the old watermark on disk, so the next
    /// iteration re-covers the same window instead of losing posts.
    pub async fn run_once(&self, checkpoint: &Checkpoint) {
        let since = match checkpoint.load_or_init(Utc::now()) {
            Ok(since) => since,
            Err(err) => {
                error!(?err, "checkpoint read failed; skipping sweep");
                return;
            }
        };
        let started = Utc::now();
        match self.run_sweep(since).await {
            Ok(dispatched) => {
                if dispatched > 0 {
                    info!(dispatched, "sweep dispatched notifications");
                }
                if let Err(err) = checkpoint.advance(started) {
                    error!(?err, "checkpoint write failed; keeping old watermark");
                }
            }
            Err(err) => {
                error!(?err, "sweep failed");
            }
        }
    }

    /// One sweep over all handles. Returns the number of messages dispatched.
    ///
    /// Per-handle feed failures and unreachable chats are logged and skipped;
    /// only a failure to list the handles aborts the sweep.
    #[instrument(skip_all, fields(since = %since))]
    pub async fn run_sweep(&self, since: DateTime<Utc>) -> Result<u64> {
        let handles = db::fetch_all_handles(&self.pool).await?;
        let mut dispatched = 0u64;

        for handle in handles {
            let posts = match self.feed.recent_posts(&handle, self.max_fetch_count).await {
                Ok(posts) => posts,
                Err(err) => {
                    warn!(?err, handle, "feed fetch failed; skipping handle");
                    continue;
                }
            };
            // Both sides are UTC, so a plain comparison is the precision
            // normalization the upstream representation needs.
            let fresh: Vec<_> = posts.into_iter().filter(|p| p.created_at > since).collect();
            if fresh.is_empty() {
                continue;
            }

            let watchers = match db::fetch_handle(&self.pool, &handle).await {
                Ok(fetched) => fetched.watchers,
                Err(err) => {
                    warn!(?err, handle, "failed to load watchers; skipping handle");
                    continue;
                }
            };

            for post in &fresh {
                let text = format!("@{handle} has posted:\n\n{}", post.url);
                for watcher in &watchers {
                    match self.notifier.send(&watcher.chat_id, &text).await {
                        Ok(Delivery::Sent) => dispatched += 1,
                        Ok(Delivery::Unreachable) => {
                            warn!(chat_id = %watcher.chat_id, "chat unreachable; dropping notification");
                        }
                        Err(err) => {
                            warn!(?err, chat_id = %watcher.chat_id, "delivery failed; dropping notification");
                        }
                    }
                }
            }
        }

        Ok(dispatched)
    }
}
