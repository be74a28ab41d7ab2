mod activity_log;
mod boosted_post;
mod cfg;
mod channel;
mod conv;
mod stats;

use crate::monitor::{
    ActivityLog, BoostRecord, Channel, ChannelId, ChannelStats, ChannelStatus, ContentKind,
    NewChannel, NewLogEntry, Outcome, PostId, Store, StoreResult,
};
use crate::prelude::*;
use crate::Result;
use async_trait::async_trait;

pub(crate) use cfg::*;

#[derive(Debug, thiserror::Error)]
pub(crate) enum DbError {
    #[error("failed to connect to the database")]
    Connect { source: sqlx::Error },

    #[error("failed to apply database migrations")]
    Migrate { source: sqlx::migrate::MigrateError },
}

pub(crate) struct Repo {
    channels: channel::ChannelRepo,
    boosted_posts: boosted_post::BoostedPostRepo,
    activity_log: activity_log::ActivityLogRepo,
    stats: stats::ChannelStatsRepo,
}

pub(crate) async fn init(cfg: Config) -> Result<Repo> {
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(cfg.pool_size)
        .connect(cfg.url.as_str())
        .await
        .map_err(err_ctx!(DbError::Connect))?;

    info!("Connected to the database, applying migrations...");

    sqlx::migrate!()
        .run(&pool)
        .await
        .map_err(err_ctx!(DbError::Migrate))?;

    Ok(Repo {
        channels: channel::ChannelRepo::new(pool.clone()),
        boosted_posts: boosted_post::BoostedPostRepo::new(pool.clone()),
        activity_log: activity_log::ActivityLogRepo::new(pool.clone()),
        stats: stats::ChannelStatsRepo::new(pool),
    })
}

/// The engine sees the database only through the [`Store`] seam.
#[async_trait]
impl Store for Repo {
    async fn list_channels(&self) -> StoreResult<Vec<Channel>> {
        self.channels.list().await
    }

    async fn insert_channel(&self, new: NewChannel) -> StoreResult<Channel> {
        self.channels.insert(new).await
    }

    async fn remove_channel(&self, id: ChannelId) -> StoreResult<bool> {
        // The stats row and the ledger go away with the channel row via
        // the schema's cascade; the activity log has no such tie.
        self.channels.remove(id).await
    }

    async fn set_enabled(&self, id: ChannelId, enabled: bool) -> StoreResult<bool> {
        self.channels.set_enabled(id, enabled).await
    }

    async fn set_status(
        &self,
        id: ChannelId,
        status: ChannelStatus,
        last_error: Option<&str>,
    ) -> StoreResult<()> {
        self.channels.set_status(id, status, last_error).await
    }

    async fn touch_last_check(&self, id: ChannelId) -> StoreResult<()> {
        self.channels.touch_last_check(id).await
    }

    async fn advance_progress(&self, id: ChannelId, post_id: PostId) -> StoreResult<()> {
        self.channels.advance_progress(id, post_id).await
    }

    async fn already_boosted(&self, id: ChannelId, post_id: PostId) -> StoreResult<bool> {
        self.boosted_posts.exists(id, post_id).await
    }

    async fn record_boosted(&self, record: BoostRecord) -> StoreResult<()> {
        self.boosted_posts.insert(record).await
    }

    async fn append_log(&self, entry: NewLogEntry) -> StoreResult<()> {
        self.activity_log.append(entry).await
    }

    async fn recent_activity(&self, id: ChannelId, limit: u64) -> StoreResult<Vec<ActivityLog>> {
        self.activity_log.recent(id, limit).await
    }

    async fn bump_stats(
        &self,
        id: ChannelId,
        outcome: Outcome,
        kind: ContentKind,
    ) -> StoreResult<()> {
        self.stats.bump(id, outcome, kind).await
    }

    async fn get_stats(&self, id: ChannelId) -> StoreResult<Option<ChannelStats>> {
        self.stats.get(id).await
    }
}
