use super::compose::OutboundMessage;
use super::traits::{Gateway, GatewayResponse};
use crate::flows::types::InboundMessage;
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::time::Duration;

/// Maximum number of message ids to track for dedup (bounded FIFO).
const MAX_SEEN_MESSAGES: usize = 10_000;

pub const DEFAULT_API_BASE: &str = "https://graph.facebook.com/v19.0";

/// Bounded seen-set for webhook message id dedup. The platform redelivers a
/// webhook when it does not get a timely 200.
pub struct SeenMessages {
    set: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl SeenMessages {
    pub fn new() -> Self {
        Self::with_capacity(MAX_SEEN_MESSAGES)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            set: HashSet::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    /// Insert a message id. Returns `true` if new, `false` if duplicate.
    pub fn insert(&mut self, id: &str) -> bool {
        if !self.set.insert(id.to_string()) {
            return false;
        }
        self.order.push_back(id.to_string());
        while self.order.len() > self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.set.remove(&old);
            }
        }
        true
    }
}

impl Default for SeenMessages {
    fn default() -> Self {
        Self::new()
    }
}

/// One user message pulled out of a webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookMessage {
    pub id: String,
    pub from: String,
    pub message: InboundMessage,
}

/// Extract every supported message from a Cloud API webhook payload.
///
/// Status callbacks, media and other message types are skipped.
pub fn decode_webhook(payload: &serde_json::Value) -> Vec<WebhookMessage> {
    let mut out = Vec::new();

    let entries = payload
        .get("entry")
        .and_then(serde_json::Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    for entry in entries {
        let changes = entry
            .get("changes")
            .and_then(serde_json::Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        for change in changes {
            let Some(messages) = change["value"]
                .get("messages")
                .and_then(serde_json::Value::as_array)
            else {
                continue;
            };

            for msg in messages {
                let from = msg["from"].as_str().unwrap_or_default();
                let id = msg["id"].as_str().unwrap_or_default();
                if from.is_empty() {
                    tracing::warn!("WhatsApp: message {id} has no sender, skipping");
                    continue;
                }
                match decode_message(msg) {
                    Some(message) => out.push(WebhookMessage {
                        id: id.to_string(),
                        from: from.to_string(),
                        message,
                    }),
                    None => {
                        let kind = msg["type"].as_str().unwrap_or("unknown");
                        tracing::debug!("WhatsApp: unsupported message type '{kind}' from {from}");
                    }
                }
            }
        }
    }

    out
}

fn decode_message(msg: &serde_json::Value) -> Option<InboundMessage> {
    match msg["type"].as_str()? {
        "text" => {
            let body = msg["text"]["body"].as_str()?;
            Some(InboundMessage::text(body))
        }
        "interactive" => {
            let interactive = &msg["interactive"];
            match interactive["type"].as_str()? {
                "button_reply" => {
                    let id = interactive["button_reply"]["id"].as_str()?;
                    Some(InboundMessage::button(id))
                }
                "list_reply" => {
                    let reply = &interactive["list_reply"];
                    let id = reply["id"].as_str()?;
                    let title = reply["title"].as_str().unwrap_or_default();
                    Some(InboundMessage::list(id, title))
                }
                _ => None,
            }
        }
        // Quick-reply buttons on template messages.
        "button" => {
            let payload = msg["button"]["payload"].as_str()?;
            Some(InboundMessage::button(payload))
        }
        _ => None,
    }
}

/// WhatsApp Cloud API gateway.
pub struct WhatsAppGateway {
    api_base: String,
    phone_number_id: String,
    access_token: String,
    client: reqwest::Client,
}

impl WhatsAppGateway {
    pub fn new(api_base: String, phone_number_id: String, access_token: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("WhatsApp: falling back to default HTTP client: {e}");
                reqwest::Client::new()
            });
        Self {
            api_base,
            phone_number_id,
            access_token,
            client,
        }
    }

    pub fn messages_url(&self) -> String {
        format!(
            "{}/{}/messages",
            self.api_base.trim_end_matches('/'),
            self.phone_number_id
        )
    }

    /// Build the Cloud API request body (for testing without network).
    pub fn build_message_json(phone: &str, message: &OutboundMessage) -> serde_json::Value {
        let mut body = serde_json::json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": phone,
        });

        match message {
            OutboundMessage::Text { body: text } => {
                body["type"] = "text".into();
                body["text"] = serde_json::json!({
                    "preview_url": false,
                    "body": text,
                });
            }
            OutboundMessage::Buttons { body_text, buttons } => {
                let buttons: Vec<serde_json::Value> = buttons
                    .iter()
                    .map(|b| {
                        serde_json::json!({
                            "type": "reply",
                            "reply": { "id": b.id, "title": b.title },
                        })
                    })
                    .collect();
                body["type"] = "interactive".into();
                body["interactive"] = serde_json::json!({
                    "type": "button",
                    "body": { "text": body_text },
                    "action": { "buttons": buttons },
                });
            }
            OutboundMessage::List {
                header,
                body_text,
                button_label,
                sections,
            } => {
                let sections: Vec<serde_json::Value> = sections
                    .iter()
                    .map(|s| {
                        let rows: Vec<serde_json::Value> = s
                            .rows
                            .iter()
                            .map(|r| {
                                let mut row = serde_json::json!({ "id": r.id, "title": r.title });
                                if let Some(ref d) = r.description {
                                    row["description"] = d.as_str().into();
                                }
                                row
                            })
                            .collect();
                        serde_json::json!({ "title": s.title, "rows": rows })
                    })
                    .collect();
                let mut interactive = serde_json::json!({
                    "type": "list",
                    "body": { "text": body_text },
                    "action": { "button": button_label, "sections": sections },
                });
                if !header.is_empty() {
                    interactive["header"] = serde_json::json!({ "type": "text", "text": header });
                }
                body["type"] = "interactive".into();
                body["interactive"] = interactive;
            }
        }

        body
    }
}

#[async_trait]
impl Gateway for WhatsAppGateway {
    fn name(&self) -> &str {
        "whatsapp"
    }

    async fn send(
        &self,
        phone: &str,
        message: &OutboundMessage,
    ) -> anyhow::Result<GatewayResponse> {
        let body = Self::build_message_json(phone, message);
        let resp = self
            .client
            .post(self.messages_url())
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        let raw = serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text));

        if !status.is_success() {
            tracing::warn!(
                status = ?status,
                "WhatsApp send ({}) to {phone} rejected: {raw}",
                message.kind()
            );
            return Ok(GatewayResponse { ok: false, raw });
        }

        tracing::debug!("WhatsApp {} sent to {phone}", message.kind());
        Ok(GatewayResponse { ok: true, raw })
    }

    async fn health_check(&self) -> bool {
        let url = format!(
            "{}/{}",
            self.api_base.trim_end_matches('/'),
            self.phone_number_id
        );
        self.client
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}
