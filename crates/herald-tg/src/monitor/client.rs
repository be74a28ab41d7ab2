use super::model::{Post, PostId};
use crate::util::DynError;
use async_trait::async_trait;
use std::time::Duration;
use teloxide::types::ChatId;

/// Ways a fetch from a source channel can fail. Exhaustively matched by the
/// scheduler; there is deliberately no catch-all "unknown" bucket that could
/// swallow a permission loss.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("no access to the source channel: {message}")]
    AccessDenied { message: String },

    #[error("rate limited while fetching, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("transient fetch failure")]
    Transient {
        #[source]
        source: Box<DynError>,
    },
}

/// Ways a side-effecting action on one post can fail.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("permission denied: {message}")]
    PermissionDenied { message: String },

    /// The post is gone or cannot carry this action (e.g. deleted before we
    /// got to it). Not retried.
    #[error("content not actionable: {message}")]
    Content { message: String },

    #[error("transient action failure")]
    Transient {
        #[source]
        source: Box<DynError>,
    },
}

/// Read side of the remote platform: incremental detection of new posts.
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Returns the posts of `chat` with ids strictly greater than `after`,
    /// in ascending id order.
    async fn fetch_posts_after(&self, chat: ChatId, after: PostId)
        -> Result<Vec<Post>, FetchError>;
}

#[derive(Debug, Clone)]
pub struct RelayOptions {
    pub watermark: Option<String>,
    pub keep_attribution: bool,
}

/// Write side of the remote platform: the two supported actions plus the
/// permission probe used by the health monitor.
#[async_trait]
pub trait ActionClient: Send + Sync {
    async fn add_reaction(
        &self,
        chat: ChatId,
        post: PostId,
        emoji: &str,
    ) -> Result<(), ActionError>;

    /// Relays one post to `target` and returns the id of the new post
    /// there.
    async fn relay(
        &self,
        from: ChatId,
        post: &Post,
        target: ChatId,
        options: &RelayOptions,
    ) -> Result<PostId, ActionError>;

    /// Whether the bot currently holds admin rights in `chat`.
    async fn is_admin(&self, chat: ChatId) -> Result<bool, ActionError>;
}
