//! Publishing uploaded files to downstream consumers.
//!
//! A publish makes a staged file visible as batch input: in-process
//! subscribers receive it over a broadcast channel and, when configured, an
//! external channel (log line or webhook) is notified. Publishing is
//! idempotent per file path and timestamp.

mod webhook;

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{Mutex, broadcast};
use uuid::Uuid;
use tracing::{debug, info};

use crate::config::{PublishChannelType, PublishConfig};
use crate::core::models::FileInfo;

const SUBSCRIBER_CAPACITY: usize = 64;

/// Trait for downstream channel implementations (log, webhook, etc.)
#[async_trait]
pub trait PublishChannel: Send + Sync {
    async fn publish(&self, file: &FileInfo) -> Result<()>;
}

/// Factory function to create a channel based on config
pub fn create_channel(config: &PublishConfig) -> Option<Arc<dyn PublishChannel>> {
    match &config.channel {
        PublishChannelType::None => None,
        PublishChannelType::Log => Some(Arc::new(LogChannel)),
        PublishChannelType::Webhook => {
            let url = config.webhook_url.as_ref()?;
            if url.is_empty() {
                return None;
            }
            Some(Arc::new(webhook::WebhookChannel::new(url.clone())))
        }
    }
}

/// Emits a structured log event per published file.
pub struct LogChannel;

#[async_trait]
impl PublishChannel for LogChannel {
    async fn publish(&self, file: &FileInfo) -> Result<()> {
        info!(path = %file.path, timestamp = %file.timestamp, "File published");
        Ok(())
    }
}

/// Fans published files out to subscribers and the configured channel.
#[derive(Clone)]
pub struct Publisher {
    channel: Option<Arc<dyn PublishChannel>>,
    subscribers: broadcast::Sender<FileInfo>,
    published: Arc<Mutex<HashSet<(String, String, Option<Uuid>)>>>,
}

impl Default for Publisher {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Publisher {
    pub fn new(channel: Option<Arc<dyn PublishChannel>>) -> Self {
        let (subscribers, _) = broadcast::channel(SUBSCRIBER_CAPACITY);
        Self {
            channel,
            subscribers,
            published: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FileInfo> {
        self.subscribers.subscribe()
    }

    /// Publish `file`. Returns `Ok(false)` if it had already been published.
    ///
    /// The file is claimed before the channel is notified so concurrent
    /// publishes of the same file deliver once; a failed delivery releases
    /// the claim so the publish can be retried.
    pub async fn publish(&self, file: &FileInfo) -> Result<bool> {
        let key = (file.path.clone(), file.timestamp.clone(), file.upload_id);
        if !self.published.lock().await.insert(key.clone()) {
            debug!(path = %file.path, "File already published");
            return Ok(false);
        }

        if let Some(channel) = &self.channel {
            if let Err(e) = channel.publish(file).await {
                self.published.lock().await.remove(&key);
                return Err(e);
            }
        }

        // No receivers is fine
        let _ = self.subscribers.send(file.clone());
        Ok(true)
    }
}
