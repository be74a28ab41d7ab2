use super::conv::*;
use crate::monitor::{ChannelId, ChannelStats, ContentKind, Outcome, StoreResult};
use chrono::prelude::*;
use sea_query::{Expr, Iden, Query};

#[derive(Iden)]
enum ChannelStatsIden {
    #[iden = "channel_stats"]
    Table,
    ChannelId,
    Total,
    Successful,
    Failed,
    Filtered,
    KindCounts,
    LastActionAt,
}

#[derive(Debug, sqlx::FromRow)]
struct ChannelStatsRecord {
    total: i64,
    successful: i64,
    failed: i64,
    filtered: i64,
    kind_counts: String,
    last_action_at: Option<DateTime<Utc>>,
}

impl ChannelStatsRecord {
    fn try_into_stats(self) -> StoreResult<ChannelStats> {
        Ok(ChannelStats {
            total: self.total,
            successful: self.successful,
            failed: self.failed,
            filtered: self.filtered,
            kind_counts: from_json_text(&self.kind_counts, "channel_stats.kind_counts")?,
            last_action_at: self.last_action_at,
        })
    }
}

pub(crate) struct ChannelStatsRepo {
    db: sqlx::PgPool,
}

impl ChannelStatsRepo {
    pub(crate) fn new(db: sqlx::PgPool) -> Self {
        Self { db }
    }

    pub(crate) async fn get(&self, channel: ChannelId) -> StoreResult<Option<ChannelStats>> {
        Query::select()
            .columns(counter_columns())
            .from(ChannelStatsIden::Table)
            .and_where(Expr::col(ChannelStatsIden::ChannelId).eq(channel.0))
            .into_sqlx()
            .query_as::<ChannelStatsRecord>()
            .fetch_optional(&self.db)
            .await
            .map_err(query_err)?
            .map(ChannelStatsRecord::try_into_stats)
            .transpose()
    }

    /// Read-modify-write of the whole aggregate in one transaction. The
    /// scheduler is the only writer of any channel's row (one cycle in
    /// flight per channel), so no row locking on top of the transaction.
    pub(crate) async fn bump(
        &self,
        channel: ChannelId,
        outcome: Outcome,
        kind: ContentKind,
    ) -> StoreResult<()> {
        let mut tx = self.db.begin().await.map_err(query_err)?;

        let existing = Query::select()
            .columns(counter_columns())
            .from(ChannelStatsIden::Table)
            .and_where(Expr::col(ChannelStatsIden::ChannelId).eq(channel.0))
            .into_sqlx()
            .query_as::<ChannelStatsRecord>()
            .fetch_optional(&mut *tx)
            .await
            .map_err(query_err)?;

        let fresh = existing.is_none();

        let mut stats = existing
            .map(ChannelStatsRecord::try_into_stats)
            .transpose()?
            .unwrap_or_default();
        stats.apply(outcome, kind, Utc::now());

        let kind_counts = to_json_text(&stats.kind_counts);

        if fresh {
            Query::insert()
                .into_table(ChannelStatsIden::Table)
                .columns([
                    ChannelStatsIden::ChannelId,
                    ChannelStatsIden::Total,
                    ChannelStatsIden::Successful,
                    ChannelStatsIden::Failed,
                    ChannelStatsIden::Filtered,
                    ChannelStatsIden::KindCounts,
                    ChannelStatsIden::LastActionAt,
                ])
                .values_panic(expr_vec![
                    channel.0,
                    stats.total,
                    stats.successful,
                    stats.failed,
                    stats.filtered,
                    kind_counts,
                    stats.last_action_at,
                ])
                .into_sqlx()
                .query()
                .execute(&mut *tx)
                .await
                .map_err(query_err)?;
        } else {
            Query::update()
                .table(ChannelStatsIden::Table)
                .value(ChannelStatsIden::Total, stats.total)
                .value(ChannelStatsIden::Successful, stats.successful)
                .value(ChannelStatsIden::Failed, stats.failed)
                .value(ChannelStatsIden::Filtered, stats.filtered)
                .value(ChannelStatsIden::KindCounts, kind_counts)
                .value(ChannelStatsIden::LastActionAt, stats.last_action_at)
                .and_where(Expr::col(ChannelStatsIden::ChannelId).eq(channel.0))
                .into_sqlx()
                .query()
                .execute(&mut *tx)
                .await
                .map_err(query_err)?;
        }

        tx.commit().await.map_err(query_err)
    }
}

fn counter_columns() -> [ChannelStatsIden; 6] {
    [
        ChannelStatsIden::Total,
        ChannelStatsIden::Successful,
        ChannelStatsIden::Failed,
        ChannelStatsIden::Filtered,
        ChannelStatsIden::KindCounts,
        ChannelStatsIden::LastActionAt,
    ]
}
