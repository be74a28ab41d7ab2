//! In-memory fakes for the engine's three seams, shared by the unit tests
//! of this module tree.

use super::client::{ActionClient, ActionError, FetchError, RelayOptions, SourceClient};
use super::model::*;
use async_trait::async_trait;
use chrono::prelude::*;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;
use teloxide::types::ChatId;

pub(crate) use super::store::{Store, StoreResult};

pub(crate) const TARGET_CHAT: ChatId = ChatId(-2000);

pub(crate) fn text_post(id: i64) -> Post {
    Post::new(PostId(id), vec![ContentKind::Text], Some("hello".to_owned()))
}

pub(crate) fn boost_params(
    emojis: &[&str],
    reaction_count: usize,
    min_secs: u64,
    max_secs: u64,
) -> BoostParams {
    BoostParams {
        emojis: emojis.iter().map(|emoji| (*emoji).to_owned()).collect(),
        reaction_count,
        delay: DelayRange {
            min: Duration::from_secs(min_secs),
            max: Duration::from_secs(max_secs),
        },
    }
}

pub(crate) fn transient_error() -> ActionError {
    ActionError::Transient {
        source: Box::new(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset",
        )),
    }
}

#[derive(Default)]
struct MemState {
    next_channel_id: i64,
    next_chat_id: i64,
    channels: Vec<Channel>,
    boosted: Vec<BoostRecord>,
    logs: Vec<ActivityLog>,
    stats: HashMap<ChannelId, ChannelStats>,
}

/// In-memory [`Store`]: the same contract as the Postgres repos, without
/// the Postgres.
#[derive(Default)]
pub(crate) struct MemStore {
    state: Mutex<MemState>,
}

impl MemStore {
    pub(crate) async fn seed_boost_channel(&self, emojis: &[&str], count: usize) -> Channel {
        let chat_id = self.next_chat_id();
        self.insert_channel(NewChannel {
            chat_id,
            title: format!("channel {chat_id}"),
            check_interval: Duration::ZERO,
            action: ActionParams::Boost(boost_params(emojis, count, 0, 0)),
            allowed_kinds: vec![],
        })
        .await
        .unwrap()
    }

    pub(crate) async fn seed_repost_channel(&self, target: ChatId) -> Channel {
        let chat_id = self.next_chat_id();
        self.insert_channel(NewChannel {
            chat_id,
            title: format!("channel {chat_id}"),
            check_interval: Duration::ZERO,
            action: ActionParams::Repost(RepostParams {
                target_chat_id: target,
                watermark: None,
                keep_attribution: false,
                delay: Duration::ZERO,
            }),
            allowed_kinds: vec![],
        })
        .await
        .unwrap()
    }

    pub(crate) async fn channel(&self, id: ChannelId) -> Channel {
        self.state
            .lock()
            .channels
            .iter()
            .find(|channel| channel.id == id)
            .cloned()
            .unwrap()
    }

    pub(crate) async fn replace_channel(&self, channel: Channel) {
        let mut state = self.state.lock();
        let slot = state
            .channels
            .iter_mut()
            .find(|existing| existing.id == channel.id)
            .unwrap();
        *slot = channel;
    }

    pub(crate) async fn force_progress(&self, id: ChannelId, post_id: PostId) {
        let mut state = self.state.lock();
        let channel = state
            .channels
            .iter_mut()
            .find(|channel| channel.id == id)
            .unwrap();
        channel.last_processed_id = post_id;
    }

    pub(crate) async fn is_boosted(&self, id: ChannelId, post_id: PostId) -> bool {
        self.already_boosted(id, post_id).await.unwrap()
    }

    pub(crate) async fn stats(&self, id: ChannelId) -> ChannelStats {
        self.state.lock().stats.get(&id).cloned().unwrap_or_default()
    }

    pub(crate) async fn logs(&self, id: ChannelId) -> Vec<ActivityLog> {
        self.state
            .lock()
            .logs
            .iter()
            .filter(|log| log.channel_id == id)
            .cloned()
            .collect()
    }

    fn next_chat_id(&self) -> ChatId {
        let mut state = self.state.lock();
        state.next_chat_id += 1;
        ChatId(-1000 - state.next_chat_id)
    }
}

#[async_trait]
impl Store for MemStore {
    async fn list_channels(&self) -> StoreResult<Vec<Channel>> {
        Ok(self.state.lock().channels.clone())
    }

    async fn insert_channel(&self, new: NewChannel) -> StoreResult<Channel> {
        let mut state = self.state.lock();
        state.next_channel_id += 1;

        let channel = Channel {
            id: ChannelId(state.next_channel_id),
            chat_id: new.chat_id,
            title: new.title,
            enabled: true,
            status: ChannelStatus::Active,
            check_interval: new.check_interval,
            last_processed_id: PostId(0),
            action: new.action,
            allowed_kinds: new.allowed_kinds,
            last_error: None,
            last_check_at: None,
        };

        state.channels.push(channel.clone());
        Ok(channel)
    }

    async fn remove_channel(&self, id: ChannelId) -> StoreResult<bool> {
        let mut state = self.state.lock();
        let before = state.channels.len();
        state.channels.retain(|channel| channel.id != id);
        state.boosted.retain(|record| record.channel_id != id);
        state.stats.remove(&id);
        // Activity log history intentionally survives.
        Ok(state.channels.len() != before)
    }

    async fn set_enabled(&self, id: ChannelId, enabled: bool) -> StoreResult<bool> {
        let mut state = self.state.lock();
        match state.channels.iter_mut().find(|channel| channel.id == id) {
            Some(channel) => {
                channel.enabled = enabled;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_status(
        &self,
        id: ChannelId,
        status: ChannelStatus,
        last_error: Option<&str>,
    ) -> StoreResult<()> {
        let mut state = self.state.lock();
        if let Some(channel) = state.channels.iter_mut().find(|channel| channel.id == id) {
            channel.status = status;
            channel.last_error = last_error.map(ToOwned::to_owned);
        }
        Ok(())
    }

    async fn touch_last_check(&self, id: ChannelId) -> StoreResult<()> {
        let mut state = self.state.lock();
        if let Some(channel) = state.channels.iter_mut().find(|channel| channel.id == id) {
            channel.last_check_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn advance_progress(&self, id: ChannelId, post_id: PostId) -> StoreResult<()> {
        let mut state = self.state.lock();
        if let Some(channel) = state.channels.iter_mut().find(|channel| channel.id == id) {
            channel.last_processed_id = channel.last_processed_id.max(post_id);
        }
        Ok(())
    }

    async fn already_boosted(&self, id: ChannelId, post_id: PostId) -> StoreResult<bool> {
        Ok(self
            .state
            .lock()
            .boosted
            .iter()
            .any(|record| record.channel_id == id && record.post_id == post_id))
    }

    async fn record_boosted(&self, record: BoostRecord) -> StoreResult<()> {
        let mut state = self.state.lock();
        let exists = state
            .boosted
            .iter()
            .any(|existing| {
                existing.channel_id == record.channel_id && existing.post_id == record.post_id
            });
        if !exists {
            state.boosted.push(record);
        }
        Ok(())
    }

    async fn append_log(&self, entry: NewLogEntry) -> StoreResult<()> {
        self.state.lock().logs.push(ActivityLog {
            channel_id: entry.channel_id,
            post_id: entry.post_id,
            outcome: entry.outcome,
            details: entry.details,
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn recent_activity(&self, id: ChannelId, limit: u64) -> StoreResult<Vec<ActivityLog>> {
        Ok(self
            .state
            .lock()
            .logs
            .iter()
            .rev()
            .filter(|log| log.channel_id == id)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn bump_stats(
        &self,
        id: ChannelId,
        outcome: Outcome,
        kind: ContentKind,
    ) -> StoreResult<()> {
        self.state
            .lock()
            .stats
            .entry(id)
            .or_default()
            .apply(outcome, kind, Utc::now());
        Ok(())
    }

    async fn get_stats(&self, id: ChannelId) -> StoreResult<Option<ChannelStats>> {
        Ok(self.state.lock().stats.get(&id).cloned())
    }
}

/// Scripted [`ActionClient`]: succeeds unless a failure was queued or the
/// chat was marked as denied.
#[derive(Default)]
pub(crate) struct FakeActionClient {
    calls: AtomicUsize,
    next_relay_id: AtomicI64,
    reactions: Mutex<Vec<(ChatId, PostId, String)>>,
    relays: Mutex<Vec<(ChatId, PostId, ChatId, RelayOptions)>>,
    failures: Mutex<VecDeque<ActionError>>,
    denied: Mutex<HashSet<ChatId>>,
    not_admin: Mutex<HashSet<ChatId>>,
}

impl FakeActionClient {
    pub(crate) fn push_failure(&self, error: ActionError) {
        self.failures.lock().push_back(error);
    }

    /// Every action in `chat` fails with a permission error from now on.
    pub(crate) fn deny(&self, chat: ChatId) {
        self.denied.lock().insert(chat);
        self.not_admin.lock().insert(chat);
    }

    pub(crate) fn set_admin(&self, chat: ChatId, is_admin: bool) {
        if is_admin {
            self.not_admin.lock().remove(&chat);
            self.denied.lock().remove(&chat);
        } else {
            self.not_admin.lock().insert(chat);
        }
    }

    pub(crate) fn reaction_count(&self) -> usize {
        self.reactions.lock().len()
    }

    pub(crate) fn relay_count(&self) -> usize {
        self.relays.lock().len()
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn reacted_posts(&self) -> Vec<PostId> {
        self.reactions.lock().iter().map(|(_, post, _)| *post).collect()
    }

    fn check(&self, chat: ChatId) -> Result<(), ActionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.denied.lock().contains(&chat) {
            return Err(ActionError::PermissionDenied {
                message: "bot has no rights in the chat".to_owned(),
            });
        }
        if let Some(error) = self.failures.lock().pop_front() {
            return Err(error);
        }
        Ok(())
    }
}

#[async_trait]
impl ActionClient for FakeActionClient {
    async fn add_reaction(
        &self,
        chat: ChatId,
        post: PostId,
        emoji: &str,
    ) -> Result<(), ActionError> {
        self.check(chat)?;
        self.reactions.lock().push((chat, post, emoji.to_owned()));
        Ok(())
    }

    async fn relay(
        &self,
        from: ChatId,
        post: &Post,
        target: ChatId,
        options: &RelayOptions,
    ) -> Result<PostId, ActionError> {
        self.check(from)?;
        self.relays
            .lock()
            .push((from, post.id(), target, options.clone()));
        let id = self.next_relay_id.fetch_add(1, Ordering::SeqCst);
        Ok(PostId(10_000 + id))
    }

    async fn is_admin(&self, chat: ChatId) -> Result<bool, ActionError> {
        Ok(!self.not_admin.lock().contains(&chat))
    }
}

/// Scripted [`SourceClient`] backed by a per-chat list of posts.
#[derive(Default)]
pub(crate) struct FakeSourceClient {
    posts: Mutex<HashMap<ChatId, Vec<Post>>>,
    denied: Mutex<HashSet<ChatId>>,
    fail_once: Mutex<HashSet<ChatId>>,
}

impl FakeSourceClient {
    pub(crate) async fn publish(&self, chat: ChatId, posts: Vec<Post>) {
        self.posts.lock().entry(chat).or_default().extend(posts);
    }

    pub(crate) fn deny(&self, chat: ChatId) {
        self.denied.lock().insert(chat);
    }

    pub(crate) async fn fail_next_fetch(&self, chat: ChatId) {
        self.fail_once.lock().insert(chat);
    }
}

#[async_trait]
impl SourceClient for FakeSourceClient {
    async fn fetch_posts_after(
        &self,
        chat: ChatId,
        after: PostId,
    ) -> Result<Vec<Post>, FetchError> {
        if self.denied.lock().contains(&chat) {
            return Err(FetchError::AccessDenied {
                message: "chat not found".to_owned(),
            });
        }
        if self.fail_once.lock().remove(&chat) {
            return Err(FetchError::Transient {
                source: Box::new(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "request timed out",
                )),
            });
        }

        Ok(self
            .posts
            .lock()
            .get(&chat)
            .map(|posts| {
                posts
                    .iter()
                    .filter(|post| post.id() > after)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
