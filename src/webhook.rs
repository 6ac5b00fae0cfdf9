use std::time::Duration;

use log::{debug, info};
use reqwest::multipart::{Form, Part};

use crate::error::WebhookError;
use crate::types::{Embed, MessagePayload, Severity};

/// Posts outcome notices and images to a single Discord webhook.
#[derive(Clone)]
pub struct WebhookClient {
    webhook_url: String,
    http: reqwest::Client,
    timeout: Duration,
}

impl WebhookClient {
    pub fn with_timeout(webhook_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            webhook_url: webhook_url.into(),
            http: reqwest::Client::new(),
            timeout,
        }
    }

    pub async fn send_error(&self, title: &str, description: &str) -> Result<(), WebhookError> {
        self.send_embed(Severity::Error, title, description).await
    }

    pub async fn send_success(&self, title: &str, description: &str) -> Result<(), WebhookError> {
        self.send_embed(Severity::Success, title, description).await
    }

    /// Uploads `image` as a file attachment with a caption embed.
    ///
    /// The request carries exactly two parts: `file` (the bytes) and
    /// `payload_json` (the caption).
    pub async fn send_image(
        &self,
        image: Vec<u8>,
        filename: &str,
        mime: &str,
        phone_number: &str,
    ) -> Result<(), WebhookError> {
        let caption = MessagePayload::embed(
            Embed::new(
                Severity::Info,
                "WhatsApp Profile Image",
                &format!("Profile image for: {}", phone_number),
            )
            .with_attachment(filename),
        );
        let caption = serde_json::to_string(&caption)?;

        let size = image.len();
        let file = Part::bytes(image)
            .file_name(filename.to_string())
            .mime_str(mime)?;
        let form = Form::new().part("file", file).text("payload_json", caption);

        debug!("Uploading {} ({} bytes) to webhook", filename, size);
        let response = self
            .http
            .post(&self.webhook_url)
            .multipart(form)
            .timeout(self.timeout)
            .send()
            .await?;
        check_status(response).await?;

        info!("Uploaded {} to webhook", filename);
        Ok(())
    }

    async fn send_embed(
        &self,
        severity: Severity,
        title: &str,
        description: &str,
    ) -> Result<(), WebhookError> {
        self.send_payload(&MessagePayload::embed(Embed::new(severity, title, description)))
            .await
    }

    async fn send_payload(&self, payload: &MessagePayload) -> Result<(), WebhookError> {
        let body = serde_json::to_vec(payload)?;
        let response = self
            .http
            .post(&self.webhook_url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .timeout(self.timeout)
            .send()
            .await?;
        check_status(response).await
    }
}

async fn check_status(response: reqwest::Response) -> Result<(), WebhookError> {
    let status = response.status();
    if status.is_client_error() || status.is_server_error() {
        let body = response.text().await.unwrap_or_default();
        return Err(WebhookError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(())
}
