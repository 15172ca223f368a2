use crate::backend::records::{Contact, FallAlert};
use async_trait::async_trait;
use serde_json::{json, Value};

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Best effort. Failures are logged and reported as `false`, never raised.
    async fn notify(&self, contact: &Contact, alert: &FallAlert) -> bool;
}

/// Drops the first space and then the first `+`. Nothing else is touched, so
/// malformed numbers pass straight through to the provider.
pub fn normalize_phone(raw: &str) -> String {
    raw.replacen(' ', "", 1).replacen('+', "", 1)
}

pub struct WhatsAppClient {
    http: reqwest::Client,
    api_url: String,
    phone_number_id: String,
    token: String,
    template: String,
    language: String,
}

impl WhatsAppClient {
    pub fn new(
        http: reqwest::Client,
        api_url: &str,
        phone_number_id: &str,
        token: &str,
        template: &str,
        language: &str,
    ) -> Self {
        Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            phone_number_id: phone_number_id.to_string(),
            token: token.to_string(),
            template: template.to_string(),
            language: language.to_string(),
        }
    }

    fn message_body(&self, to: &str, alert: &FallAlert) -> Value {
        let mut components = Vec::new();
        if let Some(url) = &alert.media_url {
            components.push(json!({
                "type": "header",
                "parameters": [{ "type": "image", "image": { "link": url } }]
            }));
        }
        components.push(json!({
            "type": "body",
            "parameters": [
                { "type": "text", "text": alert.subject_name },
                { "type": "text", "text": alert.timestamp },
                { "type": "text", "text": alert.date },
            ]
        }));

        json!({
            "messaging_product": "whatsapp",
            "to": to,
            "type": "template",
            "template": {
                "name": self.template,
                "language": { "code": self.language },
                "components": components,
            }
        })
    }
}

#[async_trait]
impl Notifier for WhatsAppClient {
    async fn notify(&self, contact: &Contact, alert: &FallAlert) -> bool {
        let to = normalize_phone(&contact.phone_number);
        let url = format!("{}/{}/messages", self.api_url, self.phone_number_id);

        let result = self
            .http
            .post(url)
            .bearer_auth(&self.token)
            .json(&self.message_body(&to, alert))
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => {
                tracing::info!(to = %to, "fall alert sent");
                true
            }
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                tracing::warn!(to = %to, %status, body = %body, "messaging provider rejected alert");
                false
            }
            Err(e) => {
                tracing::warn!(to = %to, error = %e, "failed to reach messaging provider");
                false
            }
        }
    }
}
