use super::conv::*;
use crate::monitor::{BoostRecord, ChannelId, PostId, StoreResult};
use sea_query::{Expr, Iden, OnConflict, Query};

#[derive(Iden)]
enum BoostedPostIden {
    #[iden = "boosted_post"]
    Table,
    Id,
    ChannelId,
    PostId,
    ReactionCount,
    EmojisUsed,
}

/// The per-post idempotence ledger. Rows are written once after a
/// successful boost and never touched again.
pub(crate) struct BoostedPostRepo {
    db: sqlx::PgPool,
}

impl BoostedPostRepo {
    pub(crate) fn new(db: sqlx::PgPool) -> Self {
        Self { db }
    }

    pub(crate) async fn exists(&self, channel: ChannelId, post: PostId) -> StoreResult<bool> {
        let id: Option<i64> = Query::select()
            .column(BoostedPostIden::Id)
            .from(BoostedPostIden::Table)
            .and_where(Expr::col(BoostedPostIden::ChannelId).eq(channel.0))
            .and_where(Expr::col(BoostedPostIden::PostId).eq(post.0))
            .limit(1)
            .into_sqlx()
            .query_scalar()
            .fetch_optional(&self.db)
            .await
            .map_err(query_err)?;

        Ok(id.is_some())
    }

    /// A concurrent or crash-replayed insert of the same (channel, post)
    /// pair is a no-op, same as the in-SQL unique constraint demands.
    pub(crate) async fn insert(&self, record: BoostRecord) -> StoreResult<()> {
        let mut on_conflict =
            OnConflict::columns([BoostedPostIden::ChannelId, BoostedPostIden::PostId]);
        on_conflict.do_nothing();

        Query::insert()
            .into_table(BoostedPostIden::Table)
            .columns([
                BoostedPostIden::ChannelId,
                BoostedPostIden::PostId,
                BoostedPostIden::ReactionCount,
                BoostedPostIden::EmojisUsed,
            ])
            .values_panic(expr_vec![
                record.channel_id.0,
                record.post_id.0,
                record.reaction_count as i32,
                to_json_text(&record.emojis_used),
            ])
            .on_conflict(on_conflict)
            .into_sqlx()
            .query()
            .execute(&self.db)
            .await
            .map_err(query_err)?;

        Ok(())
    }
}
