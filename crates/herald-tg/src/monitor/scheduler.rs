use super::client::{ActionClient, FetchError, SourceClient};
use super::executor::{ActionExecutor, ActionOutcome, PerformError};
use super::filter;
use super::health::HealthMonitor;
use super::model::*;
use super::store::Store;
use crate::prelude::*;
use chrono::prelude::*;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

enum Disposition {
    Continue,
    /// The channel lost its permissions mid-cycle; the rest of its posts
    /// stay untouched until it is re-enabled.
    PermissionLost,
}

/// The periodic driver. One global tick enumerates the enabled channels
/// that are due per their own check interval and runs a
/// fetch → filter → act → record cycle for each, strictly one channel at a
/// time. A failure inside one channel's cycle never reaches the others.
pub(crate) struct Scheduler {
    store: Arc<dyn Store>,
    source: Arc<dyn SourceClient>,
    executor: ActionExecutor,
    health: HealthMonitor,
    tick_interval: Duration,
    /// Overlap protection: a tick never starts a channel's cycle while the
    /// previous one is still in flight.
    guards: parking_lot::Mutex<HashMap<ChannelId, Arc<tokio::sync::Mutex<()>>>>,
}

impl Scheduler {
    pub(crate) fn new(
        store: Arc<dyn Store>,
        source: Arc<dyn SourceClient>,
        actions: Arc<dyn ActionClient>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            executor: ActionExecutor::new(actions.clone(), store.clone()),
            health: HealthMonitor::new(store.clone(), actions),
            store,
            source,
            tick_interval,
            guards: Default::default(),
        }
    }

    pub(crate) async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            tick = format_args!("{:.2?}", self.tick_interval),
            "Channel monitoring started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                // Either the shutdown flag flipped or the sender is gone;
                // both mean we're done.
                _ = shutdown.changed() => break,
            }

            if *shutdown.borrow() {
                break;
            }

            self.run_cycle(&shutdown).await;
        }

        info!("Channel monitoring stopped");
    }

    /// One pass over all due channels.
    pub(crate) async fn run_cycle(&self, shutdown: &watch::Receiver<bool>) {
        metrics::increment_counter!("monitor_cycles_total");

        let channels = match self.store.list_channels().await {
            Ok(channels) => channels,
            Err(err) => {
                error!(err = tracing_err(&err), "Failed to list channels");
                return;
            }
        };

        let now = Utc::now();
        let due: Vec<Channel> = channels
            .into_iter()
            .filter(|channel| {
                channel.enabled && channel.status != ChannelStatus::Disabled && channel.is_due(now)
            })
            .collect();

        debug!(channels = due.len(), "Starting a monitoring cycle");

        for channel in due {
            if *shutdown.borrow() {
                info!("Shutdown requested, cutting the cycle short");
                return;
            }

            if let Err(err) = self.process_channel(&channel, shutdown).await {
                // Error isolation: record the failure against this channel
                // and move on to the next one.
                error!(
                    err = tracing_err(&err),
                    err_id = err.id(),
                    channel = %channel.chat_id,
                    "Channel cycle failed"
                );

                let chain = err.display_chain().to_string();
                let entry = NewLogEntry {
                    channel_id: channel.id,
                    post_id: None,
                    outcome: Outcome::Error,
                    details: json!({ "event": "cycle_failed", "error": chain }),
                };
                if let Err(log_err) = self.store.append_log(entry).await {
                    error!(
                        err = tracing_err(&log_err),
                        "Failed to record the cycle failure"
                    );
                }

                let status = self
                    .store
                    .set_status(channel.id, ChannelStatus::Error, Some(&chain))
                    .await;
                if let Err(status_err) = status {
                    error!(
                        err = tracing_err(&status_err),
                        "Failed to update the channel status"
                    );
                }
            }
        }
    }

    async fn process_channel(
        &self,
        channel: &Channel,
        shutdown: &watch::Receiver<bool>,
    ) -> crate::Result {
        let guard = self.guard(channel.id);
        let Ok(_cycle) = guard.try_lock() else {
            debug!(
                channel = %channel.chat_id,
                "Previous cycle is still in flight, skipping"
            );
            return Ok(());
        };

        self.store.touch_last_check(channel.id).await?;

        let fetched = self
            .source
            .fetch_posts_after(channel.chat_id, channel.last_processed_id)
            .await;

        let mut posts = match fetched {
            Ok(posts) => posts,
            Err(FetchError::AccessDenied { message }) => {
                self.health.on_permission_error(channel, &message).await?;
                self.store
                    .append_log(NewLogEntry {
                        channel_id: channel.id,
                        post_id: None,
                        outcome: Outcome::Error,
                        details: json!({ "event": "fetch_access_denied", "error": message }),
                    })
                    .await?;
                return Ok(());
            }
            Err(err) => {
                // Rate limits and network trouble on the fetch path are not
                // a reason to disable anything: record and retry next tick.
                warn!(
                    err = tracing_err(&err),
                    channel = %channel.chat_id,
                    "Failed to fetch new posts"
                );
                self.store
                    .append_log(NewLogEntry {
                        channel_id: channel.id,
                        post_id: None,
                        outcome: Outcome::Error,
                        details: json!({ "event": "fetch_failed", "error": err.to_string() }),
                    })
                    .await?;
                return Ok(());
            }
        };

        if !posts.is_empty() {
            info!(
                channel = %channel.chat_id,
                posts = posts.len(),
                "Detected new posts"
            );
        }

        // The client contract promises ascending order already, but the
        // processing order is an invariant we'd rather not outsource.
        posts.sort_by_key(Post::id);

        for post in &posts {
            if *shutdown.borrow() {
                info!(
                    channel = %channel.chat_id,
                    "Shutdown requested, stopping at a post boundary"
                );
                return Ok(());
            }

            match self.process_post(channel, post).await? {
                Disposition::Continue => {}
                Disposition::PermissionLost => return Ok(()),
            }
        }

        self.store
            .set_status(channel.id, ChannelStatus::Active, None)
            .await?;

        Ok(())
    }

    async fn process_post(&self, channel: &Channel, post: &Post) -> crate::Result<Disposition> {
        if !filter::accepts(post, &channel.allowed_kinds) {
            debug!(
                post = %post.id(),
                kinds = ?post.kinds(),
                "Post filtered out"
            );

            self.store
                .append_log(NewLogEntry {
                    channel_id: channel.id,
                    post_id: Some(post.id()),
                    outcome: Outcome::Filtered,
                    details: json!({ "event": "filtered", "kinds": post.kinds() }),
                })
                .await?;
            self.store
                .bump_stats(channel.id, Outcome::Filtered, post.primary_kind())
                .await?;
            self.store.advance_progress(channel.id, post.id()).await?;

            metrics::increment_counter!("monitor_posts_total", "outcome" => "filtered");
            return Ok(Disposition::Continue);
        }

        if matches!(channel.action, ActionParams::Boost(_)) {
            // The ledger, not the high-water-mark, decides whether the post
            // was actually boosted: the mark may lag behind it after a
            // crash between the action and the advance.
            if self.store.already_boosted(channel.id, post.id()).await? {
                debug!(post = %post.id(), "Already boosted, skipping");
                self.store.advance_progress(channel.id, post.id()).await?;
                return Ok(Disposition::Continue);
            }
        }

        match self.executor.perform(channel, post).await {
            Ok(outcome) => {
                // Advance only after the outcome is recorded. The reverse
                // order could lose the record on a crash; this order at
                // worst reattempts an action that the ledger check above
                // will skip.
                self.store.advance_progress(channel.id, post.id()).await?;

                let label = match outcome {
                    ActionOutcome::Boosted { .. } => "boosted",
                    ActionOutcome::Reposted { .. } => "reposted",
                    ActionOutcome::Failed => "failed",
                };
                metrics::increment_counter!("monitor_posts_total", "outcome" => label);

                Ok(Disposition::Continue)
            }
            Err(PerformError::Permission { message }) => {
                self.health.on_permission_error(channel, &message).await?;
                Ok(Disposition::PermissionLost)
            }
            Err(PerformError::Store(source)) => Err(source.into()),
        }
    }

    fn guard(&self, id: ChannelId) -> Arc<tokio::sync::Mutex<()>> {
        self.guards.lock().entry(id).or_default().clone()
    }
}
