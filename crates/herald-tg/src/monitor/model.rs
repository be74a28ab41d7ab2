use chrono::prelude::*;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use teloxide::types::ChatId;

/// Database-scoped identity of a monitored channel. Not to be confused with
/// the Telegram [`ChatId`] of the channel itself.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display, derive_more::From, Serialize,
)]
pub struct ChannelId(pub i64);

/// Identifier of a single post within its channel. Telegram message ids are
/// totally ordered within one chat, which is what the whole progress
/// tracking scheme relies on.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    derive_more::Display,
    derive_more::From,
    Serialize,
)]
pub struct PostId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive, Serialize)]
#[repr(i16)]
pub enum ChannelStatus {
    Active,
    /// The last cycle failed. The channel is still picked up on the next
    /// tick; the status exists for the operator's eyes.
    Error,
    /// Turned off by the health monitor after a permission loss. Skipped by
    /// the scheduler until explicitly re-enabled.
    Disabled,
}

/// Terminal outcome of one operation (or sub-action) on one post.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    TryFromPrimitive,
    IntoPrimitive,
    strum::Display,
    Serialize,
)]
#[strum(serialize_all = "snake_case")]
#[repr(i16)]
pub enum Outcome {
    Success,
    Failed,
    Filtered,
    Error,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Text,
    Photo,
    Video,
    Document,
    Audio,
    Voice,
    Animation,
    Sticker,
    Poll,
    Location,
}

/// A single channel post as seen by the engine.
#[derive(Debug, Clone)]
pub struct Post {
    id: PostId,
    kinds: Vec<ContentKind>,
    text: Option<String>,
}

impl Post {
    /// An unclassifiable post degrades to plain text instead of being
    /// dropped, so `kinds` is never empty.
    pub fn new(id: PostId, kinds: Vec<ContentKind>, text: Option<String>) -> Self {
        let kinds = if kinds.is_empty() {
            vec![ContentKind::Text]
        } else {
            kinds
        };
        Self { id, kinds, text }
    }

    pub fn id(&self) -> PostId {
        self.id
    }

    pub fn kinds(&self) -> &[ContentKind] {
        &self.kinds
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    /// The kind used for the per-kind statistics breakdown.
    pub fn primary_kind(&self) -> ContentKind {
        self.kinds[0]
    }
}

/// Bounds for the uniformly random pause between successive reactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayRange {
    pub min: Duration,
    pub max: Duration,
}

pub const MAX_REACTIONS_PER_POST: usize = 100;

#[derive(Debug, Clone)]
pub struct BoostParams {
    pub emojis: Vec<String>,
    pub reaction_count: usize,
    pub delay: DelayRange,
}

#[derive(Debug, Clone)]
pub struct RepostParams {
    pub target_chat_id: ChatId,
    pub watermark: Option<String>,
    /// Forward (keeping the "forwarded from" header) instead of copying.
    pub keep_attribution: bool,
    /// Single pause after each relayed post.
    pub delay: Duration,
}

#[derive(Debug, Clone)]
pub enum ActionParams {
    Boost(BoostParams),
    Repost(RepostParams),
}

impl ActionParams {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Self::Boost(params) => params.validate(),
            Self::Repost(_) => Ok(()),
        }
    }
}

impl BoostParams {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.emojis.is_empty() {
            return Err(ConfigError::EmptyEmojiSet);
        }
        if self.reaction_count == 0 || self.reaction_count > MAX_REACTIONS_PER_POST {
            return Err(ConfigError::ReactionCountOutOfRange {
                count: self.reaction_count,
            });
        }
        if self.reaction_count > self.emojis.len() {
            return Err(ConfigError::ReactionCountExceedsEmojis {
                count: self.reaction_count,
                available: self.emojis.len(),
            });
        }
        if self.delay.max < self.delay.min {
            return Err(ConfigError::DelayRangeInverted {
                min: self.delay.min,
                max: self.delay.max,
            });
        }
        Ok(())
    }
}

/// Rejected synchronously when a channel is configured; never reaches the
/// dispatch engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("at least one emoji must be configured")]
    EmptyEmojiSet,

    #[error("reaction count must be within 1..={MAX_REACTIONS_PER_POST}, got {count}")]
    ReactionCountOutOfRange { count: usize },

    #[error("reaction count {count} exceeds the emoji set size {available}")]
    ReactionCountExceedsEmojis { count: usize, available: usize },

    #[error("max delay {max:?} is below min delay {min:?}")]
    DelayRangeInverted { min: Duration, max: Duration },

    #[error("check interval must be positive")]
    ZeroCheckInterval,
}

/// One monitored source channel with its action configuration.
#[derive(Debug, Clone)]
pub struct Channel {
    pub id: ChannelId,
    pub chat_id: ChatId,
    pub title: String,
    pub enabled: bool,
    pub status: ChannelStatus,
    pub check_interval: Duration,
    /// High-water-mark: the last post id confirmed processed. Monotonically
    /// non-decreasing.
    pub last_processed_id: PostId,
    pub action: ActionParams,
    /// Empty means every content kind is allowed.
    pub allowed_kinds: Vec<ContentKind>,
    pub last_error: Option<String>,
    pub last_check_at: Option<DateTime<Utc>>,
}

impl Channel {
    /// The chat the action needs admin rights in: the channel itself for
    /// boosts, the repost target otherwise.
    pub fn action_target(&self) -> ChatId {
        match &self.action {
            ActionParams::Boost(_) => self.chat_id,
            ActionParams::Repost(params) => params.target_chat_id,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_check_at {
            None => true,
            Some(checked) => now
                .signed_duration_since(checked)
                .to_std()
                .map_or(false, |elapsed| elapsed >= self.check_interval),
        }
    }
}

/// Payload for registering a new channel.
#[derive(Debug, Clone)]
pub struct NewChannel {
    pub chat_id: ChatId,
    pub title: String,
    pub check_interval: Duration,
    pub action: ActionParams,
    pub allowed_kinds: Vec<ContentKind>,
}

impl NewChannel {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.check_interval.is_zero() {
            return Err(ConfigError::ZeroCheckInterval);
        }
        self.action.validate()
    }
}

/// Ledger row: this post has had reactions applied, never to be boosted
/// again.
#[derive(Debug, Clone)]
pub struct BoostRecord {
    pub channel_id: ChannelId,
    pub post_id: PostId,
    pub reaction_count: u32,
    pub emojis_used: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct NewLogEntry {
    pub channel_id: ChannelId,
    pub post_id: Option<PostId>,
    pub outcome: Outcome,
    pub details: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct ActivityLog {
    pub channel_id: ChannelId,
    pub post_id: Option<PostId>,
    pub outcome: Outcome,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Aggregated per-channel counters. A derived cache: unlike the activity
/// log this row dies together with its channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub total: i64,
    pub successful: i64,
    pub failed: i64,
    pub filtered: i64,
    pub kind_counts: HashMap<ContentKind, i64>,
    pub last_action_at: Option<DateTime<Utc>>,
}

impl ChannelStats {
    pub fn apply(&mut self, outcome: Outcome, kind: ContentKind, now: DateTime<Utc>) {
        self.total += 1;
        match outcome {
            Outcome::Success => {
                self.successful += 1;
                self.last_action_at = Some(now);
            }
            Outcome::Failed | Outcome::Error => self.failed += 1,
            Outcome::Filtered => self.filtered += 1,
        }
        *self.kind_counts.entry(kind).or_default() += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn boost(emojis: &[&str], reaction_count: usize, min: u64, max: u64) -> ActionParams {
        ActionParams::Boost(BoostParams {
            emojis: emojis.iter().map(|emoji| (*emoji).to_owned()).collect(),
            reaction_count,
            delay: DelayRange {
                min: Duration::from_secs(min),
                max: Duration::from_secs(max),
            },
        })
    }

    #[test]
    fn boost_params_validation() {
        assert_matches!(boost(&["👍", "❤"], 2, 2, 8).validate(), Ok(()));

        assert_matches!(boost(&[], 1, 2, 8).validate(), Err(ConfigError::EmptyEmojiSet));

        assert_matches!(
            boost(&["👍"], 0, 2, 8).validate(),
            Err(ConfigError::ReactionCountOutOfRange { count: 0 })
        );

        assert_matches!(
            boost(&["👍", "❤"], 3, 2, 8).validate(),
            Err(ConfigError::ReactionCountExceedsEmojis {
                count: 3,
                available: 2,
            })
        );

        assert_matches!(
            boost(&["👍", "❤"], 2, 8, 2).validate(),
            Err(ConfigError::DelayRangeInverted { .. })
        );
    }

    #[test]
    fn new_channel_requires_positive_interval() {
        let channel = NewChannel {
            chat_id: ChatId(-100),
            title: "news".to_owned(),
            check_interval: Duration::ZERO,
            action: boost(&["🔥"], 1, 0, 0),
            allowed_kinds: vec![],
        };

        assert_matches!(channel.validate(), Err(ConfigError::ZeroCheckInterval));
    }

    #[test]
    fn unclassifiable_post_degrades_to_text() {
        let post = Post::new(PostId(1), vec![], None);
        assert_eq!(post.kinds(), [ContentKind::Text]);
        assert_eq!(post.primary_kind(), ContentKind::Text);
    }
}
