use super::model::{ContentKind, Post};

/// Content-type allow-list check. An empty allow-list accepts everything;
/// a post with several attachments passes if at least one of its kinds is
/// allowed.
pub(crate) fn accepts(post: &Post, allowed: &[ContentKind]) -> bool {
    if allowed.is_empty() {
        return true;
    }
    post.kinds().iter().any(|kind| allowed.contains(kind))
}
