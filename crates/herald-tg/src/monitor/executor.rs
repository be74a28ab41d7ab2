use super::client::{ActionClient, ActionError, RelayOptions};
use super::model::*;
use super::store::{Store, StoreError};
use crate::prelude::*;
use itertools::Itertools;
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Total attempts per sub-action, including the first one.
const MAX_ATTEMPTS: u32 = 3;

/// The platform told us we lost the rights needed for the action. Terminal
/// for the whole channel's cycle; the scheduler hands it to the health
/// monitor.
#[derive(Debug, thiserror::Error)]
pub(crate) enum PerformError {
    #[error("permission lost: {message}")]
    Permission { message: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug)]
pub(crate) enum ActionOutcome {
    Boosted { reactions_added: u32 },
    Reposted { target_post_id: PostId },
    /// Every sub-action failed terminally. Logged already; the post is
    /// skipped, not reattempted.
    Failed,
}

/// Performs the configured action on one post: reaction boosting or
/// reposting, with bounded retries and natural-timing jitter. Records one
/// activity log entry per sub-action outcome and one stats bump per post,
/// always before the caller advances the progress mark.
pub(crate) struct ActionExecutor {
    actions: Arc<dyn ActionClient>,
    store: Arc<dyn Store>,
}

impl ActionExecutor {
    pub(crate) fn new(actions: Arc<dyn ActionClient>, store: Arc<dyn Store>) -> Self {
        Self { actions, store }
    }

    pub(crate) async fn perform(
        &self,
        channel: &Channel,
        post: &Post,
    ) -> Result<ActionOutcome, PerformError> {
        match &channel.action {
            ActionParams::Boost(params) => self.boost(channel, params, post).await,
            ActionParams::Repost(params) => self.repost(channel, params, post).await,
        }
    }

    async fn boost(
        &self,
        channel: &Channel,
        params: &BoostParams,
        post: &Post,
    ) -> Result<ActionOutcome, PerformError> {
        let emojis = select_emojis(params);

        debug!(
            post = %post.id(),
            emojis = %emojis.iter().join(" "),
            "Boosting the post"
        );

        let mut reactions_added = 0;

        for (index, emoji) in emojis.iter().enumerate() {
            let result = with_retry(|| {
                self.actions.add_reaction(channel.chat_id, post.id(), emoji)
            })
            .await;

            match result {
                Ok(()) => {
                    reactions_added += 1;

                    self.store
                        .append_log(NewLogEntry {
                            channel_id: channel.id,
                            post_id: Some(post.id()),
                            outcome: Outcome::Success,
                            details: json!({ "event": "reaction_added", "emoji": emoji }),
                        })
                        .await?;

                    // No pause after the last reaction; the next post brings
                    // its own timing.
                    if index + 1 < emojis.len() {
                        tokio::time::sleep(draw_delay(&params.delay)).await;
                    }
                }
                Err(failure) if failure.is_permission_denied() => {
                    let message = failure.error.to_string();

                    self.store
                        .append_log(NewLogEntry {
                            channel_id: channel.id,
                            post_id: Some(post.id()),
                            outcome: Outcome::Error,
                            details: json!({
                                "event": "permission_denied",
                                "emoji": emoji,
                                "attempts": failure.attempts,
                                "error": message,
                            }),
                        })
                        .await?;

                    return Err(PerformError::Permission { message });
                }
                Err(failure) => {
                    warn!(
                        err = tracing_err(&failure.error),
                        %emoji,
                        attempts = failure.attempts,
                        "Skipping one reaction"
                    );

                    self.store
                        .append_log(NewLogEntry {
                            channel_id: channel.id,
                            post_id: Some(post.id()),
                            outcome: Outcome::Failed,
                            details: json!({
                                "event": "reaction_failed",
                                "emoji": emoji,
                                "attempts": failure.attempts,
                                "error": failure.error.to_string(),
                            }),
                        })
                        .await?;
                }
            }
        }

        if reactions_added == 0 {
            self.store
                .bump_stats(channel.id, Outcome::Failed, post.primary_kind())
                .await?;
            return Ok(ActionOutcome::Failed);
        }

        self.store
            .record_boosted(BoostRecord {
                channel_id: channel.id,
                post_id: post.id(),
                reaction_count: reactions_added,
                emojis_used: emojis.clone(),
            })
            .await?;

        self.store
            .append_log(NewLogEntry {
                channel_id: channel.id,
                post_id: Some(post.id()),
                outcome: Outcome::Success,
                details: json!({
                    "event": "boost_completed",
                    "reaction_count": reactions_added,
                }),
            })
            .await?;

        self.store
            .bump_stats(channel.id, Outcome::Success, post.primary_kind())
            .await?;

        Ok(ActionOutcome::Boosted { reactions_added })
    }

    async fn repost(
        &self,
        channel: &Channel,
        params: &RepostParams,
        post: &Post,
    ) -> Result<ActionOutcome, PerformError> {
        let options = RelayOptions {
            watermark: params.watermark.clone(),
            keep_attribution: params.keep_attribution,
        };

        let result = with_retry(|| {
            self.actions
                .relay(channel.chat_id, post, params.target_chat_id, &options)
        })
        .await;

        match result {
            Ok(target_post_id) => {
                self.store
                    .append_log(NewLogEntry {
                        channel_id: channel.id,
                        post_id: Some(post.id()),
                        outcome: Outcome::Success,
                        details: json!({
                            "event": "reposted",
                            "target_post_id": target_post_id,
                            "kind": post.primary_kind(),
                        }),
                    })
                    .await?;

                self.store
                    .bump_stats(channel.id, Outcome::Success, post.primary_kind())
                    .await?;

                if !params.delay.is_zero() {
                    tokio::time::sleep(params.delay).await;
                }

                Ok(ActionOutcome::Reposted { target_post_id })
            }
            Err(failure) if failure.is_permission_denied() => {
                let message = failure.error.to_string();

                self.store
                    .append_log(NewLogEntry {
                        channel_id: channel.id,
                        post_id: Some(post.id()),
                        outcome: Outcome::Error,
                        details: json!({
                            "event": "permission_denied",
                            "attempts": failure.attempts,
                            "error": message,
                        }),
                    })
                    .await?;

                Err(PerformError::Permission { message })
            }
            Err(failure) => {
                warn!(
                    err = tracing_err(&failure.error),
                    post = %post.id(),
                    attempts = failure.attempts,
                    "Skipping the post after a failed relay"
                );

                self.store
                    .append_log(NewLogEntry {
                        channel_id: channel.id,
                        post_id: Some(post.id()),
                        outcome: Outcome::Failed,
                        details: json!({
                            "event": "repost_failed",
                            "attempts": failure.attempts,
                            "error": failure.error.to_string(),
                        }),
                    })
                    .await?;

                self.store
                    .bump_stats(channel.id, Outcome::Failed, post.primary_kind())
                    .await?;

                Ok(ActionOutcome::Failed)
            }
        }
    }
}

struct RetryFailure {
    error: ActionError,
    attempts: u32,
}

impl RetryFailure {
    fn is_permission_denied(&self) -> bool {
        matches!(self.error, ActionError::PermissionDenied { .. })
    }
}

/// Retry loop shared by both actions. Rate limits sleep exactly the time
/// the platform asked for; transient failures back off exponentially;
/// permission and content errors are terminal right away.
async fn with_retry<T, Fut>(op: impl Fn() -> Fut) -> Result<T, RetryFailure>
where
    Fut: Future<Output = Result<T, ActionError>>,
{
    let mut attempt = 0;
    loop {
        let error = match op().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(%attempt, "Action succeeded after a retry");
                }
                return Ok(value);
            }
            Err(error) => error,
        };

        attempt += 1;

        match &error {
            ActionError::RateLimited { retry_after } if attempt < MAX_ATTEMPTS => {
                warn!(
                    %attempt,
                    retry_after = format_args!("{retry_after:.2?}"),
                    "Rate limited, sleeping before the next attempt"
                );
                tokio::time::sleep(*retry_after).await;
            }
            ActionError::Transient { .. } if attempt < MAX_ATTEMPTS => {
                let delay = backoff_delay(attempt);
                warn!(
                    err = tracing_err(&error),
                    %attempt,
                    delay = format_args!("{delay:.2?}"),
                    "Transient failure, backing off"
                );
                tokio::time::sleep(delay).await;
            }
            _ => {
                return Err(RetryFailure {
                    error,
                    attempts: attempt,
                })
            }
        }
    }
}

/// 1s, 2s for the attempts the cap allows. Strictly increasing.
fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(1u64 << (attempt - 1))
}

/// Unbiased shuffle of the configured set, truncated to the configured
/// count. The count never exceeds the set size: validated when the channel
/// is configured.
fn select_emojis(params: &BoostParams) -> Vec<String> {
    let mut emojis = params.emojis.clone();
    emojis.shuffle(&mut rand::thread_rng());
    emojis.truncate(params.reaction_count);
    emojis
}

fn draw_delay(range: &DelayRange) -> Duration {
    rand::thread_rng().gen_range(range.min..=range.max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::testing::*;
    use assert_matches::assert_matches;

    fn executor(actions: &Arc<FakeActionClient>, store: &Arc<MemStore>) -> ActionExecutor {
        ActionExecutor::new(actions.clone(), store.clone())
    }

    #[test]
    fn emoji_selection_respects_count_and_set() {
        let params = boost_params(&["👍", "❤", "🔥", "🎉", "💯"], 3, 0, 0);

        for _ in 0..100 {
            let selected = select_emojis(&params);
            assert_eq!(selected.len(), 3);
            assert!(selected.iter().all_unique());
            assert!(selected.iter().all(|emoji| params.emojis.contains(emoji)));
        }
    }

    #[test]
    fn emoji_selection_is_not_deterministic() {
        let params = boost_params(&["👍", "❤", "🔥", "🎉", "💯"], 5, 0, 0);

        let orderings: std::collections::HashSet<Vec<String>> =
            (0..50).map(|_| select_emojis(&params)).collect();

        // 5! orderings, 50 draws: a repeat of a single ordering every time
        // is practically impossible.
        assert!(orderings.len() > 1);
    }

    #[test]
    fn drawn_delay_stays_within_bounds() {
        let range = DelayRange {
            min: Duration::from_millis(200),
            max: Duration::from_millis(900),
        };

        for _ in 0..100 {
            let delay = draw_delay(&range);
            assert!(delay >= range.min && delay <= range.max, "{delay:?}");
        }
    }

    #[test]
    fn backoff_strictly_increases() {
        assert!(backoff_delay(1) < backoff_delay(2));
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn boost_adds_reactions_and_records_the_ledger() {
        let actions = Arc::new(FakeActionClient::default());
        let store = Arc::new(MemStore::default());
        let channel = store.seed_boost_channel(&["👍", "❤", "🔥"], 2).await;
        let post = text_post(101);

        let outcome = executor(&actions, &store)
            .perform(&channel, &post)
            .await
            .unwrap();

        assert_matches!(outcome, ActionOutcome::Boosted { reactions_added: 2 });
        assert_eq!(actions.reaction_count(), 2);
        assert!(store.is_boosted(channel.id, post.id()).await);

        let stats = store.stats(channel.id).await;
        assert_eq!(stats.successful, 1);
        assert_eq!(stats.failed, 0);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn rate_limit_sleeps_and_retries_before_giving_up() {
        let actions = Arc::new(FakeActionClient::default());
        actions.push_failure(ActionError::RateLimited {
            retry_after: Duration::from_secs(5),
        });
        let store = Arc::new(MemStore::default());
        let channel = store.seed_boost_channel(&["👍"], 1).await;

        let outcome = executor(&actions, &store)
            .perform(&channel, &text_post(101))
            .await
            .unwrap();

        // First call rate-limited, second one succeeds after the exact
        // retry-after sleep.
        assert_matches!(outcome, ActionOutcome::Boosted { reactions_added: 1 });
        assert_eq!(actions.reaction_count(), 1);
        assert_eq!(actions.total_calls(), 2);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn rate_limit_exhaustion_skips_the_reaction() {
        let actions = Arc::new(FakeActionClient::default());
        for _ in 0..3 {
            actions.push_failure(ActionError::RateLimited {
                retry_after: Duration::from_secs(1),
            });
        }
        let store = Arc::new(MemStore::default());
        let channel = store.seed_boost_channel(&["👍"], 1).await;
        let post = text_post(101);

        let outcome = executor(&actions, &store)
            .perform(&channel, &post)
            .await
            .unwrap();

        assert_matches!(outcome, ActionOutcome::Failed);
        assert_eq!(actions.total_calls(), 3);
        assert!(!store.is_boosted(channel.id, post.id()).await);

        let logs = store.logs(channel.id).await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].outcome, Outcome::Failed);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn transient_failures_back_off_then_skip_but_other_emojis_continue() {
        let actions = Arc::new(FakeActionClient::default());
        // The first emoji burns all 3 attempts, the second goes through.
        for _ in 0..3 {
            actions.push_failure(transient_error());
        }
        let store = Arc::new(MemStore::default());
        let channel = store.seed_boost_channel(&["👍", "❤"], 2).await;
        let post = text_post(101);

        let outcome = executor(&actions, &store)
            .perform(&channel, &post)
            .await
            .unwrap();

        assert_matches!(outcome, ActionOutcome::Boosted { reactions_added: 1 });
        assert!(store.is_boosted(channel.id, post.id()).await);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn permission_denied_is_terminal_and_never_retried() {
        let actions = Arc::new(FakeActionClient::default());
        actions.push_failure(ActionError::PermissionDenied {
            message: "bot is not an admin".to_owned(),
        });
        let store = Arc::new(MemStore::default());
        let channel = store.seed_boost_channel(&["👍", "❤"], 2).await;
        let post = text_post(101);

        let result = executor(&actions, &store).perform(&channel, &post).await;

        assert_matches!(result, Err(PerformError::Permission { .. }));
        assert_eq!(actions.total_calls(), 1);
        assert!(!store.is_boosted(channel.id, post.id()).await);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn content_error_fails_the_repost_without_retry() {
        let actions = Arc::new(FakeActionClient::default());
        actions.push_failure(ActionError::Content {
            message: "message to copy not found".to_owned(),
        });
        let store = Arc::new(MemStore::default());
        let channel = store.seed_repost_channel(TARGET_CHAT).await;

        let outcome = executor(&actions, &store)
            .perform(&channel, &text_post(7))
            .await
            .unwrap();

        assert_matches!(outcome, ActionOutcome::Failed);
        assert_eq!(actions.total_calls(), 1);

        let stats = store.stats(channel.id).await;
        assert_eq!(stats.failed, 1);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn repost_success_records_target_post_id() {
        let actions = Arc::new(FakeActionClient::default());
        let store = Arc::new(MemStore::default());
        let channel = store.seed_repost_channel(TARGET_CHAT).await;

        let outcome = executor(&actions, &store)
            .perform(&channel, &text_post(7))
            .await
            .unwrap();

        assert_matches!(outcome, ActionOutcome::Reposted { .. });
        assert_eq!(actions.relay_count(), 1);

        let stats = store.stats(channel.id).await;
        assert_eq!(stats.successful, 1);
    }
}
