use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde_json::json;

use crate::models::{ActivityChangeEvent, CapturedEvent, ScreenshotEvent};
use crate::sensing::EventSink;

use super::ApiClient;

impl ApiClient {
    /// `POST /screenshots/upload` as multipart `file`, `folder_name`, `activity_name`.
    pub async fn upload_screenshot(&self, shot: &ScreenshotEvent) -> Result<()> {
        let file = Part::bytes(shot.image_bytes.clone())
            .file_name(format!("screenshot_{}.png", shot.timestamp.format("%Y%m%d_%H%M%S")))
            .mime_str("image/png")
            .context("invalid screenshot mime type")?;
        let form = Form::new()
            .part("file", file)
            .text("folder_name", shot.routing_key.clone())
            .text("activity_name", shot.label.clone());

        let request = self
            .http
            .post(self.url("screenshots/upload"))
            .timeout(self.upload_timeout)
            .multipart(form);
        self.authorized(request).await?;
        Ok(())
    }

    /// `POST /monitoring/activities`.
    pub async fn report_activity(&self, change: &ActivityChangeEvent) -> Result<()> {
        let request = self
            .http
            .post(self.url("monitoring/activities"))
            .json(&json!({
                "activity_type": change.kind.as_str(),
                "application_name": change.application_name,
                "window_title": change.window_title,
                "url": change.url,
                "in_allowlist": change.in_allowlist,
            }));
        self.authorized(request).await?;
        Ok(())
    }
}

#[async_trait]
impl EventSink for ApiClient {
    // The backend attributes uploads to the caller's active session.
    async fn submit(&self, _session_id: &str, event: &CapturedEvent) -> Result<()> {
        match event {
            CapturedEvent::Screenshot(shot) => self.upload_screenshot(shot).await,
            CapturedEvent::ActivityChange(change) => self.report_activity(change).await,
        }
    }
}
