use super::compose::OutboundMessage;
use async_trait::async_trait;

/// What the messaging channel said about one send.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayResponse {
    pub ok: bool,
    pub raw: serde_json::Value,
}

/// Outbound side of a messaging platform.
///
/// Transport failures are errors; a delivered request the platform refused
/// comes back as `ok == false`.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Human-readable channel name
    fn name(&self) -> &str;

    /// Deliver one message to a phone number
    async fn send(&self, phone: &str, message: &OutboundMessage)
        -> anyhow::Result<GatewayResponse>;

    /// Check if the channel is reachable
    async fn health_check(&self) -> bool {
        true
    }
}
