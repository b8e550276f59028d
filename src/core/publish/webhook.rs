use super::PublishChannel;
use crate::core::models::FileInfo;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

pub struct WebhookChannel {
    url: String,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(url: String) -> Self {
        Self {
            url,
            client: reqwest::Client::new(),
        }
    }

    fn format_message(&self, file: &FileInfo) -> serde_json::Value {
        json!({
            "event": "file.published",
            "file": {
                "path": file.path,
                "shortPath": file.short_path,
                "timestamp": file.timestamp,
                "local": file.local,
            }
        })
    }
}

#[async_trait]
impl PublishChannel for WebhookChannel {
    async fn publish(&self, file: &FileInfo) -> Result<()> {
        let payload = self.format_message(file);
        self.client
            .post(&self.url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
