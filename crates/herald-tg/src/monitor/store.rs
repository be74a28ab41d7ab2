use super::model::*;
use crate::util::DynError;
use async_trait::async_trait;

/// Failure of the persistence collaborator. Opaque on purpose: the engine
/// treats any store failure the same way (log, isolate, carry on with the
/// other channels).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store query failed")]
    Query {
        #[source]
        source: Box<DynError>,
    },

    #[error("stored value is malformed: {message}")]
    Corrupt { message: String },
}

impl StoreError {
    pub fn query(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Query {
            source: Box::new(source),
        }
    }

    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt {
            message: message.into(),
        }
    }
}

pub type StoreResult<T = ()> = Result<T, StoreError>;

/// Narrow persistence seam of the engine. The production implementation
/// sits on Postgres; tests run against an in-memory fake.
#[async_trait]
pub trait Store: Send + Sync {
    async fn list_channels(&self) -> StoreResult<Vec<Channel>>;

    async fn insert_channel(&self, new: NewChannel) -> StoreResult<Channel>;

    /// Removes the channel together with its stats row and ledger, but
    /// never with its activity log history. Returns `false` when there was
    /// nothing to remove.
    async fn remove_channel(&self, id: ChannelId) -> StoreResult<bool>;

    async fn set_enabled(&self, id: ChannelId, enabled: bool) -> StoreResult<bool>;

    async fn set_status(
        &self,
        id: ChannelId,
        status: ChannelStatus,
        last_error: Option<&str>,
    ) -> StoreResult<()>;

    async fn touch_last_check(&self, id: ChannelId) -> StoreResult<()>;

    /// Persists `greatest(stored, post_id)`: advancing with an
    /// equal-or-lesser id is a no-op.
    async fn advance_progress(&self, id: ChannelId, post_id: PostId) -> StoreResult<()>;

    async fn already_boosted(&self, id: ChannelId, post_id: PostId) -> StoreResult<bool>;

    async fn record_boosted(&self, record: BoostRecord) -> StoreResult<()>;

    async fn append_log(&self, entry: NewLogEntry) -> StoreResult<()>;

    async fn recent_activity(&self, id: ChannelId, limit: u64) -> StoreResult<Vec<ActivityLog>>;

    /// Atomically folds one operation outcome into the channel's aggregate
    /// counters.
    async fn bump_stats(
        &self,
        id: ChannelId,
        outcome: Outcome,
        kind: ContentKind,
    ) -> StoreResult<()>;

    async fn get_stats(&self, id: ChannelId) -> StoreResult<Option<ChannelStats>>;
}
