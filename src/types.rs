use serde::{Deserialize, Serialize};

pub const FOOTER_TEXT: &str = "WhatsApp Profile Fetcher";

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct MessagePayload {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embeds: Vec<Embed>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<Footer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<EmbedImage>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Footer {
    pub text: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EmbedImage {
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Success,
    Error,
}

impl Severity {
    pub fn color(self) -> u32 {
        match self {
            Severity::Info => 0x0099FF,
            Severity::Success => 0x00FF00,
            Severity::Error => 0xFF0000,
        }
    }
}

impl Embed {
    pub fn new(severity: Severity, title: &str, description: &str) -> Self {
        Self {
            title: Some(title.to_string()),
            description: Some(description.to_string()),
            color: Some(severity.color()),
            timestamp: Some(chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)),
            footer: Some(Footer {
                text: FOOTER_TEXT.to_string(),
            }),
            image: None,
        }
    }

    /// Points the embed at an attachment uploaded in the same request.
    pub fn with_attachment(mut self, filename: &str) -> Self {
        self.image = Some(EmbedImage {
            url: format!("attachment://{}", filename),
        });
        self
    }
}

impl MessagePayload {
    pub fn embed(embed: Embed) -> Self {
        Self {
            embeds: vec![embed],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_embed_shape() {
        let payload = MessagePayload::embed(Embed::new(
            Severity::Error,
            "Connection Error",
            "Failed to connect",
        ));
        let value = serde_json::to_value(&payload).unwrap();

        assert!(value.get("content").is_none());
        let embed = &value["embeds"][0];
        assert_eq!(embed["title"], "Connection Error");
        assert_eq!(embed["color"], 0xFF0000);
        assert_eq!(embed["footer"]["text"], FOOTER_TEXT);
        assert!(embed.get("image").is_none());

        let timestamp = embed["timestamp"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(timestamp).is_ok());
    }

    #[test]
    fn attachment_reference() {
        let embed = Embed::new(Severity::Info, "t", "d").with_attachment("profile_1.jpg");
        assert_eq!(embed.image.unwrap().url, "attachment://profile_1.jpg");
    }
}
