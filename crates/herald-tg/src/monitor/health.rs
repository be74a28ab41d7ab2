use super::client::ActionClient;
use super::model::{Channel, ChannelStatus};
use super::store::{Store, StoreResult};
use crate::prelude::*;
use std::sync::Arc;

/// Reacts to permission losses reported by the platform and validates that
/// the rights are back before a channel goes live again.
#[derive(Clone)]
pub(crate) struct HealthMonitor {
    store: Arc<dyn Store>,
    actions: Arc<dyn ActionClient>,
}

impl HealthMonitor {
    pub(crate) fn new(store: Arc<dyn Store>, actions: Arc<dyn ActionClient>) -> Self {
        Self { store, actions }
    }

    /// Flips the channel to [`ChannelStatus::Disabled`] and stores the
    /// error text. Idempotent: a channel already known to be disabled is
    /// left untouched, so repeated reports within one cycle don't stack.
    pub(crate) async fn on_permission_error(
        &self,
        channel: &Channel,
        message: &str,
    ) -> StoreResult<()> {
        if channel.status == ChannelStatus::Disabled {
            return Ok(());
        }

        warn!(
            channel = %channel.chat_id,
            message,
            "Disabling the channel after a permission loss"
        );

        self.store
            .set_status(channel.id, ChannelStatus::Disabled, Some(message))
            .await
    }

    /// Re-validates the action precondition (admin rights in the action
    /// target) and brings the channel back to [`ChannelStatus::Active`] on
    /// success, touching nothing else. Returns whether the channel is
    /// active again.
    pub(crate) async fn recheck_and_maybe_reenable(&self, channel: &Channel) -> crate::Result<bool> {
        let target = channel.action_target();

        if !self.actions.is_admin(target).await? {
            debug!(
                channel = %channel.chat_id,
                %target,
                "Still no admin rights, leaving the channel disabled"
            );
            return Ok(false);
        }

        self.store
            .set_status(channel.id, ChannelStatus::Active, None)
            .await?;

        info!(channel = %channel.chat_id, "Channel re-enabled");

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::testing::*;

    fn monitor(store: &Arc<MemStore>, actions: &Arc<FakeActionClient>) -> HealthMonitor {
        HealthMonitor::new(store.clone(), actions.clone())
    }

    #[test_log::test(tokio::test)]
    async fn permission_error_disables_the_channel_idempotently() {
        let store = Arc::new(MemStore::default());
        let actions = Arc::new(FakeActionClient::default());
        let monitor = monitor(&store, &actions);

        let channel = store.seed_boost_channel(&["👍"], 1).await;

        monitor
            .on_permission_error(&channel, "bot is not an admin")
            .await
            .unwrap();

        let disabled = store.channel(channel.id).await;
        assert_eq!(disabled.status, ChannelStatus::Disabled);
        assert_eq!(disabled.last_error.as_deref(), Some("bot is not an admin"));

        // A second report with a fresh snapshot changes nothing.
        monitor
            .on_permission_error(&disabled, "bot is not an admin, again")
            .await
            .unwrap();

        let still_disabled = store.channel(channel.id).await;
        assert_eq!(still_disabled.status, ChannelStatus::Disabled);
        assert_eq!(
            still_disabled.last_error.as_deref(),
            Some("bot is not an admin")
        );
    }

    #[test_log::test(tokio::test)]
    async fn reenable_requires_admin_rights_in_the_action_target() {
        let store = Arc::new(MemStore::default());
        let actions = Arc::new(FakeActionClient::default());
        let monitor = monitor(&store, &actions);

        let channel = store.seed_boost_channel(&["👍"], 1).await;
        monitor
            .on_permission_error(&channel, "kicked")
            .await
            .unwrap();

        actions.set_admin(channel.chat_id, false);
        let channel = store.channel(channel.id).await;
        assert!(!monitor.recheck_and_maybe_reenable(&channel).await.unwrap());
        assert_eq!(store.channel(channel.id).await.status, ChannelStatus::Disabled);

        actions.set_admin(channel.chat_id, true);
        assert!(monitor.recheck_and_maybe_reenable(&channel).await.unwrap());

        let active = store.channel(channel.id).await;
        assert_eq!(active.status, ChannelStatus::Active);
        assert_eq!(active.last_error, None);
    }
}
