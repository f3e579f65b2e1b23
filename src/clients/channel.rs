use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;

use crate::{
    error::{ChannelError, DeliveryError},
    models::notification::{NotificationId, NotificationKind, NotificationRequest},
};

/// A concrete delivery transport. One send is one attempt; retrying belongs
/// to the caller.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &str;

    async fn send(
        &self,
        notification_id: &NotificationId,
        request: &NotificationRequest,
    ) -> Result<(), ChannelError>;
}

#[derive(Clone, Default)]
pub struct ChannelRegistry {
    channels: HashMap<NotificationKind, Arc<dyn NotificationChannel>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channel(mut self, kind: NotificationKind, channel: Arc<dyn NotificationChannel>) -> Self {
        self.register(kind, channel);
        self
    }

    pub fn register(&mut self, kind: NotificationKind, channel: Arc<dyn NotificationChannel>) {
        self.channels.insert(kind, channel);
    }

    pub fn get(&self, kind: NotificationKind) -> Result<&Arc<dyn NotificationChannel>, DeliveryError> {
        self.channels
            .get(&kind)
            .ok_or_else(|| DeliveryError::UnsupportedKind(kind.to_string()))
    }

    pub fn kinds(&self) -> Vec<NotificationKind> {
        NotificationKind::ALL
            .into_iter()
            .filter(|kind| self.channels.contains_key(kind))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NotificationKind, &Arc<dyn NotificationChannel>)> {
        self.channels.iter()
    }
}
