use super::conv::*;
use crate::monitor::{ActivityLog, ChannelId, NewLogEntry, PostId, StoreResult};
use crate::prelude::*;
use chrono::prelude::*;
use sea_query::{Expr, Iden, Order, Query};

#[derive(Iden)]
enum ActivityLogIden {
    #[iden = "activity_log"]
    Table,
    ChannelId,
    PostId,
    Outcome,
    Details,
    CreatedAt,
}

#[derive(Debug, sqlx::FromRow)]
struct ActivityLogRecord {
    channel_id: i64,
    post_id: Option<i64>,
    outcome: i16,
    details: String,
    created_at: DateTime<Utc>,
}

impl ActivityLogRecord {
    fn try_into_log(self) -> StoreResult<ActivityLog> {
        Ok(ActivityLog {
            channel_id: ChannelId(self.channel_id),
            post_id: self.post_id.map(PostId),
            outcome: enum_from_i16(self.outcome)?,
            details: from_json_text(&self.details, "activity_log.details")?,
            created_at: self.created_at,
        })
    }
}

/// Append-only operation history. Carries a plain channel id instead of a
/// foreign key: removing a channel must not erase what happened in it.
pub(crate) struct ActivityLogRepo {
    db: sqlx::PgPool,
}

impl ActivityLogRepo {
    pub(crate) fn new(db: sqlx::PgPool) -> Self {
        Self { db }
    }

    pub(crate) async fn append(&self, entry: NewLogEntry) -> StoreResult<()> {
        Query::insert()
            .into_table(ActivityLogIden::Table)
            .columns([
                ActivityLogIden::ChannelId,
                ActivityLogIden::PostId,
                ActivityLogIden::Outcome,
                ActivityLogIden::Details,
            ])
            .values_panic(expr_vec![
                entry.channel_id.0,
                entry.post_id.map(|post| post.0),
                i16::from(entry.outcome),
                to_json_text(&entry.details),
            ])
            .into_sqlx()
            .query()
            .execute(&self.db)
            .await
            .map_err(query_err)?;

        Ok(())
    }

    pub(crate) async fn recent(&self, channel: ChannelId, limit: u64) -> StoreResult<Vec<ActivityLog>> {
        Query::select()
            .columns([
                ActivityLogIden::ChannelId,
                ActivityLogIden::PostId,
                ActivityLogIden::Outcome,
                ActivityLogIden::Details,
                ActivityLogIden::CreatedAt,
            ])
            .from(ActivityLogIden::Table)
            .and_where(Expr::col(ActivityLogIden::ChannelId).eq(channel.0))
            .order_by(ActivityLogIden::CreatedAt, Order::Desc)
            .limit(limit)
            .into_sqlx()
            .query_as::<ActivityLogRecord>()
            .fetch_all(&self.db)
            .await
            .map_err(query_err)?
            .map_collect(ActivityLogRecord::try_into_log)
    }
}
