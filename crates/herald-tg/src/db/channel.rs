use super::conv::*;
use crate::monitor::{
    ActionParams, BoostParams, Channel, ChannelId, ChannelStatus, ContentKind, DelayRange,
    NewChannel, PostId, RepostParams, StoreResult,
};
use crate::prelude::*;
use chrono::prelude::*;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use sea_query::{Expr, Func, Iden, IntoColumnRef, Order, Query, SimpleExpr};
use teloxide::types::ChatId;

#[derive(Iden)]
pub(crate) enum ChannelIden {
    #[iden = "channel"]
    Table,
    Id,
    ChatId,
    Title,
    IsEnabled,
    Status,
    CheckIntervalSecs,
    LastProcessedId,
    ActionKind,
    Emojis,
    ReactionCount,
    DelayMinSecs,
    DelayMaxSecs,
    TargetChatId,
    Watermark,
    KeepAttribution,
    RepostDelaySecs,
    AllowedKinds,
    LastError,
    LastCheckAt,
    UpdatedAt,
}

#[derive(Iden)]
struct Greatest;

#[derive(Iden)]
struct Now;

fn now() -> SimpleExpr {
    Func::cust(Now).into()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(i16)]
enum ActionKind {
    Boost,
    Repost,
}

#[derive(Debug, sqlx::FromRow)]
struct ChannelRecord {
    id: i64,
    chat_id: i64,
    title: String,
    is_enabled: bool,
    status: i16,
    check_interval_secs: i64,
    last_processed_id: i64,
    action_kind: i16,
    emojis: Option<String>,
    reaction_count: Option<i32>,
    delay_min_secs: Option<f64>,
    delay_max_secs: Option<f64>,
    target_chat_id: Option<i64>,
    watermark: Option<String>,
    keep_attribution: Option<bool>,
    repost_delay_secs: Option<i64>,
    allowed_kinds: String,
    last_error: Option<String>,
    last_check_at: Option<DateTime<Utc>>,
}

impl ChannelRecord {
    fn try_into_channel(self) -> StoreResult<Channel> {
        let action = match enum_from_i16::<ActionKind>(self.action_kind)? {
            ActionKind::Boost => ActionParams::Boost(BoostParams {
                emojis: from_json_text(
                    &required(self.emojis, "channel.emojis")?,
                    "channel.emojis",
                )?,
                reaction_count: required(self.reaction_count, "channel.reaction_count")? as usize,
                delay: DelayRange {
                    min: duration_from_secs_f64(
                        required(self.delay_min_secs, "channel.delay_min_secs")?,
                        "channel.delay_min_secs",
                    )?,
                    max: duration_from_secs_f64(
                        required(self.delay_max_secs, "channel.delay_max_secs")?,
                        "channel.delay_max_secs",
                    )?,
                },
            }),
            ActionKind::Repost => ActionParams::Repost(RepostParams {
                target_chat_id: ChatId(required(self.target_chat_id, "channel.target_chat_id")?),
                watermark: self.watermark,
                keep_attribution: self.keep_attribution.unwrap_or(false),
                delay: duration_from_secs(
                    self.repost_delay_secs.unwrap_or(0),
                    "channel.repost_delay_secs",
                )?,
            }),
        };

        let allowed_kinds: Vec<ContentKind> =
            from_json_text(&self.allowed_kinds, "channel.allowed_kinds")?;

        Ok(Channel {
            id: ChannelId(self.id),
            chat_id: ChatId(self.chat_id),
            title: self.title,
            enabled: self.is_enabled,
            status: enum_from_i16(self.status)?,
            check_interval: duration_from_secs(
                self.check_interval_secs,
                "channel.check_interval_secs",
            )?,
            last_processed_id: PostId(self.last_processed_id),
            action,
            allowed_kinds,
            last_error: self.last_error,
            last_check_at: self.last_check_at,
        })
    }
}

pub(crate) struct ChannelRepo {
    db: sqlx::PgPool,
}

impl ChannelRepo {
    pub(crate) fn new(db: sqlx::PgPool) -> Self {
        Self { db }
    }

    pub(crate) async fn list(&self) -> StoreResult<Vec<Channel>> {
        Query::select()
            .columns(select_columns())
            .from(ChannelIden::Table)
            .order_by(ChannelIden::Id, Order::Asc)
            .into_sqlx()
            .query_as::<ChannelRecord>()
            .fetch_all(&self.db)
            .await
            .map_err(query_err)?
            .map_collect(ChannelRecord::try_into_channel)
    }

    pub(crate) async fn insert(&self, new: NewChannel) -> StoreResult<Channel> {
        let NewChannel {
            chat_id,
            title,
            check_interval,
            action,
            allowed_kinds,
        } = new;

        struct ActionColumns {
            kind: ActionKind,
            emojis: Option<String>,
            reaction_count: Option<i32>,
            delay_min_secs: Option<f64>,
            delay_max_secs: Option<f64>,
            target_chat_id: Option<i64>,
            watermark: Option<String>,
            keep_attribution: Option<bool>,
            repost_delay_secs: Option<i64>,
        }

        let cols = match action {
            ActionParams::Boost(params) => ActionColumns {
                kind: ActionKind::Boost,
                emojis: Some(to_json_text(&params.emojis)),
                reaction_count: Some(params.reaction_count as i32),
                delay_min_secs: Some(params.delay.min.as_secs_f64()),
                delay_max_secs: Some(params.delay.max.as_secs_f64()),
                target_chat_id: None,
                watermark: None,
                keep_attribution: None,
                repost_delay_secs: None,
            },
            ActionParams::Repost(params) => ActionColumns {
                kind: ActionKind::Repost,
                emojis: None,
                reaction_count: None,
                delay_min_secs: None,
                delay_max_secs: None,
                target_chat_id: Some(params.target_chat_id.0),
                watermark: params.watermark,
                keep_attribution: Some(params.keep_attribution),
                repost_delay_secs: Some(params.delay.as_secs() as i64),
            },
        };

        Query::insert()
            .into_table(ChannelIden::Table)
            .columns([
                ChannelIden::ChatId,
                ChannelIden::Title,
                ChannelIden::CheckIntervalSecs,
                ChannelIden::ActionKind,
                ChannelIden::Emojis,
                ChannelIden::ReactionCount,
                ChannelIden::DelayMinSecs,
                ChannelIden::DelayMaxSecs,
                ChannelIden::TargetChatId,
                ChannelIden::Watermark,
                ChannelIden::KeepAttribution,
                ChannelIden::RepostDelaySecs,
                ChannelIden::AllowedKinds,
            ])
            .values_panic(expr_vec![
                chat_id.0,
                title,
                check_interval.as_secs() as i64,
                i16::from(cols.kind),
                cols.emojis,
                cols.reaction_count,
                cols.delay_min_secs,
                cols.delay_max_secs,
                cols.target_chat_id,
                cols.watermark,
                cols.keep_attribution,
                cols.repost_delay_secs,
                to_json_text(&allowed_kinds),
            ])
            .returning_all()
            .into_sqlx()
            .query_as::<ChannelRecord>()
            .fetch_one(&self.db)
            .await
            .map_err(query_err)?
            .try_into_channel()
    }

    pub(crate) async fn remove(&self, id: ChannelId) -> StoreResult<bool> {
        let result = Query::delete()
            .from_table(ChannelIden::Table)
            .and_where(Expr::col(ChannelIden::Id).eq(id.0))
            .into_sqlx()
            .query()
            .execute(&self.db)
            .await
            .map_err(query_err)?;

        Ok(result.rows_affected() > 0)
    }

    pub(crate) async fn set_enabled(&self, id: ChannelId, enabled: bool) -> StoreResult<bool> {
        let result = Query::update()
            .table(ChannelIden::Table)
            .value(ChannelIden::IsEnabled, enabled)
            .value(ChannelIden::UpdatedAt, now())
            .and_where(Expr::col(ChannelIden::Id).eq(id.0))
            .into_sqlx()
            .query()
            .execute(&self.db)
            .await
            .map_err(query_err)?;

        Ok(result.rows_affected() > 0)
    }

    pub(crate) async fn set_status(
        &self,
        id: ChannelId,
        status: ChannelStatus,
        last_error: Option<&str>,
    ) -> StoreResult<()> {
        Query::update()
            .table(ChannelIden::Table)
            .value(ChannelIden::Status, i16::from(status))
            .value(ChannelIden::LastError, last_error.map(ToOwned::to_owned))
            .value(ChannelIden::UpdatedAt, now())
            .and_where(Expr::col(ChannelIden::Id).eq(id.0))
            .into_sqlx()
            .query()
            .execute(&self.db)
            .await
            .map_err(query_err)?;

        Ok(())
    }

    pub(crate) async fn touch_last_check(&self, id: ChannelId) -> StoreResult<()> {
        Query::update()
            .table(ChannelIden::Table)
            .value(ChannelIden::LastCheckAt, now())
            .value(ChannelIden::UpdatedAt, now())
            .and_where(Expr::col(ChannelIden::Id).eq(id.0))
            .into_sqlx()
            .query()
            .execute(&self.db)
            .await
            .map_err(query_err)?;

        Ok(())
    }

    /// `greatest()` keeps the mark monotonic: advancing with an
    /// equal-or-lesser id changes nothing.
    pub(crate) async fn advance_progress(&self, id: ChannelId, post_id: PostId) -> StoreResult<()> {
        let greatest = SimpleExpr::from(Func::cust(Greatest).args([
            SimpleExpr::Column(ChannelIden::LastProcessedId.into_column_ref()),
            SimpleExpr::from(post_id.0),
        ]));

        Query::update()
            .table(ChannelIden::Table)
            .value(ChannelIden::LastProcessedId, greatest)
            .value(ChannelIden::UpdatedAt, now())
            .and_where(Expr::col(ChannelIden::Id).eq(id.0))
            .into_sqlx()
            .query()
            .execute(&self.db)
            .await
            .map_err(query_err)?;

        Ok(())
    }
}

fn select_columns() -> [ChannelIden; 19] {
    [
        ChannelIden::Id,
        ChannelIden::ChatId,
        ChannelIden::Title,
        ChannelIden::IsEnabled,
        ChannelIden::Status,
        ChannelIden::CheckIntervalSecs,
        ChannelIden::LastProcessedId,
        ChannelIden::ActionKind,
        ChannelIden::Emojis,
        ChannelIden::ReactionCount,
        ChannelIden::DelayMinSecs,
        ChannelIden::DelayMaxSecs,
        ChannelIden::TargetChatId,
        ChannelIden::Watermark,
        ChannelIden::KeepAttribution,
        ChannelIden::RepostDelaySecs,
        ChannelIden::AllowedKinds,
        ChannelIden::LastError,
        ChannelIden::LastCheckAt,
    ]
}
