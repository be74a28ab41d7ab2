use super::Bot;
use crate::monitor::{
    ActionClient, ActionError, ContentKind, FetchError, Post, PostId, RelayOptions, SourceClient,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use teloxide::payloads::{CopyMessageSetters as _, SetMessageReactionSetters as _};
use teloxide::prelude::*;
use teloxide::types::{ChatId, MediaKind, Message, MessageId, MessageKind, ReactionType};
use teloxide::{ApiError, RequestError};

/// Posts the engine hasn't consumed yet. Bots cannot read channel history
/// over the Bot API, so new posts are captured from `channel_post` updates
/// as they arrive (the dispatcher records them here) and served to the
/// engine on its next fetch.
#[derive(Default)]
pub(crate) struct PostBuffer {
    chats: Mutex<HashMap<ChatId, BTreeMap<i64, Post>>>,
}

/// Keeps the buffer bounded even for chats nobody monitors.
const BUFFERED_POSTS_PER_CHAT: usize = 512;

impl PostBuffer {
    pub(crate) fn record(&self, message: &Message) {
        let post = post_from_message(message);
        let mut chats = self.chats.lock();
        let posts = chats.entry(message.chat.id).or_default();
        posts.insert(post.id().0, post);
        while posts.len() > BUFFERED_POSTS_PER_CHAT {
            posts.pop_first();
        }
    }

    fn posts_after(&self, chat: ChatId, after: PostId) -> Vec<Post> {
        self.chats
            .lock()
            .get(&chat)
            .map(|posts| {
                posts
                    .range(after.0 + 1..)
                    .map(|(_, post)| post.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

pub(crate) fn post_from_message(message: &Message) -> Post {
    let text = message
        .caption()
        .or_else(|| message.text())
        .map(ToOwned::to_owned);

    Post::new(PostId(i64::from(message.id.0)), classify(message), text)
}

fn classify(message: &Message) -> Vec<ContentKind> {
    let MessageKind::Common(common) = &message.kind else {
        return vec![];
    };

    let kind = match &common.media_kind {
        MediaKind::Text(_) => ContentKind::Text,
        MediaKind::Photo(_) => ContentKind::Photo,
        MediaKind::Video(_) => ContentKind::Video,
        MediaKind::Document(_) => ContentKind::Document,
        MediaKind::Audio(_) => ContentKind::Audio,
        MediaKind::Voice(_) => ContentKind::Voice,
        MediaKind::Animation(_) => ContentKind::Animation,
        MediaKind::Sticker(_) => ContentKind::Sticker,
        MediaKind::Poll(_) => ContentKind::Poll,
        MediaKind::Location(_) => ContentKind::Location,
        // Venues, contacts, games and whatever the platform adds next flow
        // through the text fallback instead of being dropped.
        _ => return vec![],
    };

    vec![kind]
}

/// Both collaborator seams of the engine, backed by one bot instance.
#[derive(Clone)]
pub(crate) struct TgChannelClient {
    pub(crate) bot: Bot,
    pub(crate) posts: Arc<PostBuffer>,
}

#[async_trait]
impl SourceClient for TgChannelClient {
    async fn fetch_posts_after(
        &self,
        chat: ChatId,
        after: PostId,
    ) -> Result<Vec<Post>, FetchError> {
        // An empty buffer is indistinguishable from lost access, so probe
        // the chat first: this is where a kicked bot finds out.
        self.bot
            .get_chat(chat)
            .await
            .map_err(classify_fetch_error)?;

        Ok(self.posts.posts_after(chat, after))
    }
}

#[async_trait]
impl ActionClient for TgChannelClient {
    async fn add_reaction(
        &self,
        chat: ChatId,
        post: PostId,
        emoji: &str,
    ) -> Result<(), ActionError> {
        self.bot
            .set_message_reaction(chat, MessageId(post.0 as i32))
            .reaction(vec![ReactionType::Emoji {
                emoji: emoji.to_owned(),
            }])
            .await
            .map_err(classify_action_error)?;

        Ok(())
    }

    async fn relay(
        &self,
        from: ChatId,
        post: &Post,
        target: ChatId,
        options: &RelayOptions,
    ) -> Result<PostId, ActionError> {
        let message_id = MessageId(post.id().0 as i32);

        if options.keep_attribution {
            let forwarded = self
                .bot
                .forward_message(target, from, message_id)
                .await
                .map_err(classify_action_error)?;
            return Ok(PostId(i64::from(forwarded.id.0)));
        }

        let watermarked = options.watermark.as_deref().map(|watermark| {
            match post.text() {
                Some(text) => format!("{text}\n\n{watermark}"),
                None => watermark.to_owned(),
            }
        });

        // copy_message has no way to override the body of a plain text
        // post, so a watermarked text post is sent as a fresh message.
        if let (Some(text), [ContentKind::Text]) = (&watermarked, post.kinds()) {
            let sent = self
                .bot
                .send_message(target, text.clone())
                .await
                .map_err(classify_action_error)?;
            return Ok(PostId(i64::from(sent.id.0)));
        }

        let request = self.bot.copy_message(target, from, message_id);
        let request = match watermarked {
            Some(text) => request.caption(text),
            None => request,
        };

        let copied = request.await.map_err(classify_action_error)?;
        Ok(PostId(i64::from(copied.0)))
    }

    async fn is_admin(&self, chat: ChatId) -> Result<bool, ActionError> {
        let me = self.bot.get_me().await.map_err(classify_action_error)?;
        let member = self
            .bot
            .get_chat_member(chat, me.user.id)
            .await
            .map_err(classify_action_error)?;

        Ok(member.is_privileged())
    }
}

/// The single place where the platform's error zoo is folded into the
/// engine's closed failure sums.
fn classify_action_error(error: RequestError) -> ActionError {
    match error {
        RequestError::RetryAfter(seconds) => ActionError::RateLimited {
            retry_after: seconds.duration(),
        },
        RequestError::Api(api) => classify_api_error(api),
        other => ActionError::Transient {
            source: Box::new(other),
        },
    }
}

fn classify_api_error(error: ApiError) -> ActionError {
    use ApiError::*;

    match &error {
        BotKicked | BotKickedFromSupergroup | NotEnoughRightsToPostMessages | ChatNotFound => {
            ActionError::PermissionDenied {
                message: error.to_string(),
            }
        }
        MessageIdInvalid | MessageToForwardNotFound | MessageToCopyNotFound
        | MessageCantBeForwarded => ActionError::Content {
            message: error.to_string(),
        },
        Unknown(text) if is_permission_text(text) => ActionError::PermissionDenied {
            message: text.clone(),
        },
        _ => ActionError::Transient {
            source: Box::new(error),
        },
    }
}

fn classify_fetch_error(error: RequestError) -> FetchError {
    match error {
        RequestError::RetryAfter(seconds) => FetchError::RateLimited {
            retry_after: seconds.duration(),
        },
        RequestError::Api(api) => match &api {
            ApiError::ChatNotFound | ApiError::BotKicked | ApiError::BotKickedFromSupergroup => {
                FetchError::AccessDenied {
                    message: api.to_string(),
                }
            }
            ApiError::Unknown(text) if is_permission_text(text) => FetchError::AccessDenied {
                message: text.clone(),
            },
            _ => FetchError::Transient {
                source: Box::new(api),
            },
        },
        other => FetchError::Transient {
            source: Box::new(other),
        },
    }
}

/// Telegram's error strings are not a stable API; the well-known
/// permission phrases are probed in the catch-all text variant.
fn is_permission_text(text: &str) -> bool {
    let text = text.to_lowercase();
    ["forbidden", "not enough rights", "have no rights", "kicked", "chat_write_forbidden"]
        .iter()
        .any(|phrase| text.contains(phrase))
}
