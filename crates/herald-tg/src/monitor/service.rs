use super::client::ActionClient;
use super::health::HealthMonitor;
use super::model::*;
use super::store::Store;
use crate::prelude::*;
use std::sync::Arc;

/// The narrow surface the admin/configuration collaborator works through.
/// Everything here validates synchronously; nothing invalid ever reaches
/// the dispatch engine.
pub struct MonitorService {
    store: Arc<dyn Store>,
    health: HealthMonitor,
}

impl MonitorService {
    pub fn new(store: Arc<dyn Store>, actions: Arc<dyn ActionClient>) -> Self {
        Self {
            health: HealthMonitor::new(store.clone(), actions),
            store,
        }
    }

    pub async fn add_channel(&self, new: NewChannel) -> crate::Result<Channel> {
        new.validate()?;

        let channel = self.store.insert_channel(new).await?;

        info!(
            channel = %channel.chat_id,
            title = %channel.title,
            "Registered a channel for monitoring"
        );

        Ok(channel)
    }

    /// Removes the channel configuration, its stats and its ledger. The
    /// activity log history deliberately stays.
    pub async fn remove_channel(&self, id: ChannelId) -> crate::Result<bool> {
        let removed = self.store.remove_channel(id).await?;
        if removed {
            info!(%id, "Removed the channel from monitoring");
        }
        Ok(removed)
    }

    pub async fn set_enabled(&self, id: ChannelId, enabled: bool) -> crate::Result<bool> {
        Ok(self.store.set_enabled(id, enabled).await?)
    }

    pub async fn list_channels(&self) -> crate::Result<Vec<Channel>> {
        Ok(self.store.list_channels().await?)
    }

    pub async fn get_stats(&self, id: ChannelId) -> crate::Result<Option<ChannelStats>> {
        Ok(self.store.get_stats(id).await?)
    }

    pub async fn recent_activity(
        &self,
        id: ChannelId,
        limit: u64,
    ) -> crate::Result<Vec<ActivityLog>> {
        Ok(self.store.recent_activity(id, limit).await?)
    }

    /// Manual recovery path after a permission loss: re-validates the
    /// bot's rights and re-activates the channel only when they are back.
    pub async fn reenable(&self, id: ChannelId) -> crate::Result<bool> {
        let channel = self
            .store
            .list_channels()
            .await?
            .into_iter()
            .find(|channel| channel.id == id);

        let Some(channel) = channel else {
            return Ok(false);
        };

        self.health.recheck_and_maybe_reenable(&channel).await
    }
}
